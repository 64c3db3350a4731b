//! Minimal DevTools client: numbered commands over one websocket, with
//! responses routed back by id and events fanned out on a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::BrowserError;
use crate::logging::{self, v_str, Domain};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, BrowserError>>>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

pub struct CdpClient {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    call_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str, call_timeout: Duration) -> Result<Self, BrowserError> {
        let (ws, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::Socket(e.to_string()))?;
        let (mut write, mut read) = ws.split();
        logging::debug(Domain::Browser, "cdp.connected", &[("url", v_str(ws_url))]);

        let (outgoing, mut outbox) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(256);

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => dispatch(&text, &reader_pending, &reader_events),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            // Fail everything still waiting so callers do not hang.
            if let Ok(mut pending) = reader_pending.lock() {
                for (_, tx) in pending.drain() {
                    let _ = tx.send(Err(BrowserError::Closed));
                }
            }
            logging::debug(Domain::Browser, "cdp.closed", &[]);
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            outgoing,
            pending,
            events,
            call_timeout,
            tasks: vec![writer, reader],
        })
    }

    /// Send a command and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        if self.outgoing.send(Message::Text(frame)).is_err() {
            self.forget(id);
            return Err(BrowserError::Closed);
        }
        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result.map_err(|e| match e {
                BrowserError::Protocol { code, message, .. } => BrowserError::Protocol {
                    method: method.to_string(),
                    code,
                    message,
                },
                other => other,
            }),
            Ok(Err(_)) => Err(BrowserError::Closed),
            Err(_) => {
                self.forget(id);
                Err(BrowserError::Timeout {
                    method: method.to_string(),
                    after: self.call_timeout,
                })
            }
        }
    }

    /// Subscribe to protocol events. Subscribe before issuing the command
    /// whose events you need.
    pub fn events(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn dispatch(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            logging::warn(Domain::Browser, "cdp.bad_frame", &[("error", v_str(&err.to_string()))]);
            return;
        }
    };
    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
        if let Some(tx) = waiter {
            let _ = tx.send(parse_reply(&msg));
        }
    } else if let Some(method) = msg.get("method").and_then(Value::as_str) {
        let _ = events.send(CdpEvent {
            method: method.to_string(),
            params: msg.get("params").cloned().unwrap_or(Value::Null),
        });
    }
}

fn parse_reply(msg: &Value) -> Result<Value, BrowserError> {
    if let Some(err) = msg.get("error") {
        return Err(BrowserError::Protocol {
            method: String::new(),
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(msg.get("result").cloned().unwrap_or(Value::Null))
}
