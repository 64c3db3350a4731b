//! Direct-API path: the heatmap endpoint requested over HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::json;

use crate::capture::{Request, RequestKind, Response, Transport};
use crate::config::Config;
use crate::logging::{self, v_num, v_str, Domain};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// `reqwest`-backed transport. Non-2xx answers are returned, not raised, so
/// interceptors see every response.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("bad method {}", request.method))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder
            .send()
            .await
            .with_context(|| format!("requesting {}", request.url))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.context("reading response body")?.to_vec();
        let fields = [
            ("url", v_str(&request.url)),
            ("status", json!(status)),
            ("bytes", v_num(body.len() as f64)),
        ];
        if (200..300).contains(&status) {
            logging::info(Domain::Fetch, "fetch.response", &fields);
        } else {
            logging::warn(Domain::Fetch, "fetch.response", &fields);
        }
        Ok(Response { status, body })
    }
}

pub fn heatmap_url(cfg: &Config) -> Result<String> {
    let base = format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.marker);
    let url = url::Url::parse_with_params(
        &base,
        &[
            ("exchangeName", cfg.exchange.as_str()),
            ("symbol", cfg.symbol.as_str()),
            ("interval", cfg.interval.as_str()),
        ],
    )
    .with_context(|| format!("invalid api base {}", cfg.api_base))?;
    Ok(url.to_string())
}

/// The request a browser would make for the heatmap, with web-client headers.
pub fn heatmap_request(cfg: &Config) -> Result<Request> {
    let mut req = Request::get(RequestKind::Fetch, heatmap_url(cfg)?)
        .header("accept", "application/json, text/plain, */*")
        .header("client", "web")
        .header("web-version", "101")
        .header("user-agent", USER_AGENT);
    if let Some(key) = &cfg.api_key {
        req = req.header("coinank-apikey", key);
    }
    Ok(req)
}
