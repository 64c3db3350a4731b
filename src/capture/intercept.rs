//! In-process interception layer.
//!
//! A [`Transport`] is the single network-request abstraction; wrapping it in
//! [`Intercepted`] lets an [`InterceptLayer`] observe every response whose
//! request URL matches a rule. Observers only borrow the response, so callers
//! receive exactly what the inner transport produced.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::slot::SlotWriter;
use crate::logging::{self, v_num, v_str, Domain};

/// The two request primitives a page exposes. Both are intercepted the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Fetch,
    Xhr,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Fetch => "fetch",
            RequestKind::Xhr => "xhr",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub kind: RequestKind,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(kind: RequestKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

type UrlPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type ResponseObserver = Box<dyn Fn(&Request, &Response) + Send + Sync>;

pub struct InterceptRule {
    name: String,
    predicate: UrlPredicate,
    on_response: ResponseObserver,
}

/// Case-sensitive substring match against the request URL.
pub fn url_contains(marker: &str) -> impl Fn(&str) -> bool + Send + Sync + 'static {
    let marker = marker.to_string();
    move |url: &str| url.contains(marker.as_str())
}

#[derive(Default)]
pub struct InterceptLayer {
    rules: Vec<InterceptRule>,
}

impl InterceptLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers run synchronously, in registration
    /// order, once the response has resolved.
    pub fn on<P, F>(&mut self, name: &str, predicate: P, on_response: F) -> &mut Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        self.rules.push(InterceptRule {
            name: name.to_string(),
            predicate: Box::new(predicate),
            on_response: Box::new(on_response),
        });
        self
    }

    /// Standard capture rule: JSON object or array bodies of matching
    /// responses go into the slot. Any other body leaves the slot untouched
    /// and bumps the slot's failure counter.
    pub fn capture_json(&mut self, marker: &str, writer: SlotWriter) -> &mut Self {
        self.on("capture_json", url_contains(marker), move |req, resp| {
            let parsed = serde_json::from_slice::<Value>(&resp.body)
                .map_err(|e| e.to_string())
                .and_then(|v| match v {
                    Value::Object(_) | Value::Array(_) => Ok(v),
                    other => Err(format!("expected an object or array, got {}", other)),
                });
            match parsed {
                Ok(payload) => {
                    let seq = writer.store(&req.url, payload);
                    logging::debug(
                        Domain::Capture,
                        "capture.stored",
                        &[
                            ("url", v_str(&req.url)),
                            ("kind", v_str(req.kind.as_str())),
                            ("seq", json!(seq)),
                        ],
                    );
                }
                Err(err) => {
                    let failures = writer.record_parse_failure();
                    logging::warn(
                        Domain::Capture,
                        "capture.parse_failure",
                        &[
                            ("url", v_str(&req.url)),
                            ("kind", v_str(req.kind.as_str())),
                            ("status", json!(resp.status)),
                            ("error", v_str(&err)),
                            ("failures", v_num(failures as f64)),
                        ],
                    );
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn observe(&self, request: &Request, response: &Response) {
        for rule in &self.rules {
            if (rule.predicate)(&request.url) {
                logging::debug(
                    Domain::Capture,
                    "capture.match",
                    &[("rule", v_str(&rule.name)), ("url", v_str(&request.url))],
                );
                (rule.on_response)(request, response);
            }
        }
    }
}

/// A transport with an interception layer wrapped around it once.
pub struct Intercepted<T> {
    inner: T,
    layer: Arc<InterceptLayer>,
}

impl<T: Transport> Intercepted<T> {
    pub fn new(inner: T, layer: InterceptLayer) -> Self {
        Self {
            inner,
            layer: Arc::new(layer),
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for Intercepted<T> {
    async fn send(&self, request: Request) -> Result<Response> {
        let observed = request.clone();
        let response = self.inner.send(request).await?;
        self.layer.observe(&observed, &response);
        Ok(response)
    }
}
