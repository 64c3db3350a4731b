//! Browser process lifecycle and the DevTools HTTP endpoint.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::logging::{self, v_str, Domain};
use crate::retry::{retry_async, RetryConfig};

/// A browser started by us; killed and cleaned up on drop.
pub struct BrowserProcess {
    child: Child,
    profile_dir: PathBuf,
}

impl BrowserProcess {
    pub fn launch(cfg: &Config) -> Result<Self> {
        let profile_dir = std::env::temp_dir().join(format!(
            "liqmap-profile-{}-{}",
            std::process::id(),
            logging::ts_epoch_ms()
        ));
        std::fs::create_dir_all(&profile_dir)
            .with_context(|| format!("creating profile dir {}", profile_dir.display()))?;

        let mut cmd = Command::new(&cfg.chrome_path);
        cmd.args(launch_args(cfg, &profile_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd
            .spawn()
            .with_context(|| format!("launching browser {}", cfg.chrome_path))?;

        logging::info(
            Domain::Browser,
            "browser.launched",
            &[
                ("path", v_str(&cfg.chrome_path)),
                ("pid", json!(child.id())),
                ("port", json!(cfg.chrome_debug_port)),
                ("headless", json!(cfg.headless)),
            ],
        );
        Ok(Self { child, profile_dir })
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.profile_dir);
        logging::info(Domain::Browser, "browser.stopped", &[]);
    }
}

fn launch_args(cfg: &Config, profile_dir: &std::path::Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", cfg.chrome_debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "about:blank".to_string(),
    ];
    if cfg.headless {
        args.insert(0, "--headless=new".to_string());
    }
    args
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageTarget {
    pub id: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: String,
}

/// `http://host:port/` of a DevTools server.
#[derive(Debug, Clone, PartialEq)]
pub struct DevtoolsEndpoint {
    base: Url,
}

impl DevtoolsEndpoint {
    pub fn local(port: u16) -> Result<Self> {
        let base = Url::parse(&format!("http://127.0.0.1:{}/", port))?;
        Ok(Self { base })
    }

    /// Derive the HTTP endpoint from a `ws://host:port/devtools/...` URL.
    pub fn from_ws_url(ws_url: &str) -> Result<Self> {
        let ws = Url::parse(ws_url).with_context(|| format!("invalid devtools url {}", ws_url))?;
        let scheme = match ws.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => return Err(anyhow!("unsupported devtools scheme {}", other)),
        };
        let host = ws.host_str().ok_or_else(|| anyhow!("devtools url has no host"))?;
        let port = ws
            .port_or_known_default()
            .ok_or_else(|| anyhow!("devtools url has no port"))?;
        let base = Url::parse(&format!("{}://{}:{}/", scheme, host, port))?;
        Ok(Self { base })
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base.join(path).with_context(|| format!("joining {}", path))
    }

    /// Poll `/json/version` until the browser answers.
    pub async fn wait_ready(&self, client: &Client, retry: &RetryConfig) -> Result<BrowserVersion> {
        let url = self.join("json/version")?;
        let version = retry_async(retry, "devtools_ready", || {
            let url = url.clone();
            async move {
                let resp = client.get(url).send().await?.error_for_status()?;
                let version: BrowserVersion = resp.json().await?;
                Ok::<_, anyhow::Error>(version)
            }
        })
        .await
        .context("devtools endpoint never became ready")?;
        logging::info(Domain::Browser, "browser.ready", &[("browser", v_str(&version.browser))]);
        Ok(version)
    }

    /// Open a fresh `about:blank` tab.
    pub async fn open_page(&self, client: &Client) -> Result<PageTarget> {
        let url = self.join("json/new?about:blank")?;
        // Recent Chrome requires PUT; older builds only accept GET.
        let resp = client.put(url.clone()).send().await?;
        let resp = if resp.status().is_success() {
            resp
        } else {
            client.get(url).send().await?.error_for_status()?
        };
        let target: PageTarget = resp.json().await.context("parsing new target")?;
        logging::debug(Domain::Browser, "browser.page_opened", &[("target", v_str(&target.id))]);
        Ok(target)
    }

    pub async fn close_page(&self, client: &Client, target_id: &str) -> Result<()> {
        let url = self.join(&format!("json/close/{}", target_id))?;
        client.get(url).send().await?.error_for_status()?;
        Ok(())
    }
}
