//! One page under DevTools control: interceptor install, navigation, and
//! reads of the page-side capture slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{timeout_at, Instant};

use super::{BrowserError, CdpClient};
use crate::capture::script::{interceptor_script, probe_expression};
use crate::capture::{Captured, SlotSource};
use crate::logging::{self, v_str, Domain};

const LOAD_EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of checking that the interceptor ran before page scripts.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallCheck {
    pub ready_state: String,
    pub seq: u64,
}

/// What the probe expression returns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotSnapshot {
    #[serde(default)]
    installed_ready_state: String,
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    parse_failures: u64,
}

fn parse_snapshot(value: Value) -> Result<Option<SlotSnapshot>, BrowserError> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| BrowserError::ScriptException(format!("unexpected slot shape: {}", e)))
}

fn snapshot_capture(snapshot: &SlotSnapshot) -> Option<Captured> {
    if snapshot.payload.is_null() {
        return None;
    }
    Some(Captured {
        seq: snapshot.seq,
        url: snapshot.url.clone().unwrap_or_default(),
        payload: Arc::new(snapshot.payload.clone()),
    })
}

fn check_install(snapshot: Option<SlotSnapshot>) -> Result<InstallCheck, BrowserError> {
    let snapshot = snapshot.ok_or(BrowserError::InterceptorNotInstalled)?;
    if snapshot.installed_ready_state != "loading" {
        return Err(BrowserError::InterceptorInstalledLate(snapshot.installed_ready_state));
    }
    Ok(InstallCheck {
        ready_state: snapshot.installed_ready_state,
        seq: snapshot.seq,
    })
}

/// `Runtime.evaluate` result or the page exception it carried.
fn evaluation_value(result: Value) -> Result<Value, BrowserError> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("uncaught exception")
            .to_string();
        return Err(BrowserError::ScriptException(text));
    }
    Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
}

pub struct PageSession {
    cdp: Arc<CdpClient>,
    slot_name: String,
}

impl PageSession {
    pub fn new(cdp: Arc<CdpClient>, slot_name: impl Into<String>) -> Self {
        Self {
            cdp,
            slot_name: slot_name.into(),
        }
    }

    /// Register the interceptor for every document this page creates from
    /// now on. Must precede `navigate`.
    pub async fn install_interceptor(&self, marker: &str) -> Result<(), BrowserError> {
        self.cdp.call("Page.enable", json!({})).await?;
        self.cdp.call("Runtime.enable", json!({})).await?;
        let source = interceptor_script(marker, &self.slot_name);
        let reply = self
            .cdp
            .call("Page.addScriptToEvaluateOnNewDocument", json!({ "source": source }))
            .await?;
        logging::info(
            Domain::Browser,
            "browser.interceptor_installed",
            &[
                ("marker", v_str(marker)),
                ("identifier", reply.get("identifier").cloned().unwrap_or(Value::Null)),
            ],
        );
        Ok(())
    }

    /// Navigate and wait for the load event. A missing load event is logged,
    /// not fatal; the capture wait has its own deadline.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let mut events = self.cdp.events();
        let reply = self.cdp.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(reason) = reply.get("errorText").and_then(Value::as_str) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }

        let until = Instant::now() + LOAD_EVENT_TIMEOUT;
        loop {
            match timeout_at(until, events.recv()).await {
                Ok(Ok(ev)) if ev.method == "Page.loadEventFired" => {
                    logging::info(Domain::Browser, "browser.loaded", &[("url", v_str(url))]);
                    return Ok(());
                }
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => return Err(BrowserError::Closed),
                Err(_) => {
                    logging::warn(
                        Domain::Browser,
                        "browser.load_event_missing",
                        &[("url", v_str(url)), ("after_ms", json!(LOAD_EVENT_TIMEOUT.as_millis() as u64))],
                    );
                    return Ok(());
                }
            }
        }
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .cdp
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;
        evaluation_value(result)
    }

    pub async fn title(&self) -> Result<String, BrowserError> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Confirm the interceptor exists and ran while the document was still
    /// loading, i.e. before any page script could issue the request.
    pub async fn verify_interceptor(&self) -> Result<InstallCheck, BrowserError> {
        let snapshot = parse_snapshot(self.evaluate(&probe_expression(&self.slot_name)).await?)?;
        let check = check_install(snapshot)?;
        logging::debug(
            Domain::Browser,
            "browser.interceptor_verified",
            &[("ready_state", v_str(&check.ready_state))],
        );
        Ok(check)
    }

    pub fn slot(&self) -> PageSlot {
        PageSlot {
            cdp: self.cdp.clone(),
            probe: probe_expression(&self.slot_name),
            seen_failures: AtomicU64::new(0),
        }
    }
}

/// Poll-only view of the page slot.
pub struct PageSlot {
    cdp: Arc<CdpClient>,
    probe: String,
    seen_failures: AtomicU64,
}

#[async_trait]
impl SlotSource for PageSlot {
    async fn read_slot(&self) -> Result<Option<Captured>> {
        let result = self
            .cdp
            .call(
                "Runtime.evaluate",
                json!({ "expression": self.probe, "returnByValue": true }),
            )
            .await?;
        let Some(snapshot) = parse_snapshot(evaluation_value(result)?)? else {
            return Ok(None);
        };
        let before = self.seen_failures.swap(snapshot.parse_failures, Ordering::SeqCst);
        if snapshot.parse_failures > before {
            logging::warn(
                Domain::Capture,
                "capture.parse_failure",
                &[("total", json!(snapshot.parse_failures))],
            );
        }
        Ok(snapshot_capture(&snapshot))
    }
}
