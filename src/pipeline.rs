//! Orchestration: obtain a response (API, browser page or file), then turn it
//! into the requested output.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::time::sleep;

use crate::browser::{BrowserProcess, CdpClient, DevtoolsEndpoint, PageSession, PageTarget};
use crate::capture::script::DEFAULT_SLOT_NAME;
use crate::capture::{
    capture_slot, CancelToken, CaptureOutcome, CaptureWaiter, InterceptLayer, Intercepted, NotCapturedReason, Request,
    SlotReader, Transport, WaitConfig,
};
use crate::config::Config;
use crate::export::csv::render_csv;
use crate::export::grid::GridRender;
use crate::export::html::render_html;
use crate::export::write_output;
use crate::fetch::{heatmap_request, HttpTransport};
use crate::logging::{self, v_num, v_str, Domain};
use crate::payload::SparseHeatmapPayload;
use crate::retry::RetryConfig;
use crate::transform::{densify, densify_many, DenseMatrix, TransformOptions, TransformReport};

const CDP_CALL_TIMEOUT: Duration = Duration::from_secs(15);
const DEVTOOLS_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputMode {
    /// Sparse entries as `time,price,value` rows
    Csv,
    /// Plotly heatmap page
    Plot,
    /// Grid render payload as JSON
    Grid,
}

/// How a dense matrix is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseFormat {
    Html,
    Json,
}

impl OutputMode {
    /// `None` for CSV, which is written from the sparse entries.
    pub fn dense_format(&self) -> Option<DenseFormat> {
        match self {
            OutputMode::Csv => None,
            OutputMode::Plot => Some(DenseFormat::Html),
            OutputMode::Grid => Some(DenseFormat::Json),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputMode::Csv => "csv",
            OutputMode::Plot => "html",
            OutputMode::Grid => "grid.json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub mode: OutputMode,
    pub csv_file: PathBuf,
    pub html_file: PathBuf,
    pub grid_file: PathBuf,
    /// Where to keep the raw response, if anywhere
    pub json_file: Option<PathBuf>,
    pub transform: TransformOptions,
    pub title: String,
}

impl OutputOptions {
    pub fn target(&self) -> &Path {
        match self.mode {
            OutputMode::Csv => &self.csv_file,
            OutputMode::Plot => &self.html_file,
            OutputMode::Grid => &self.grid_file,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub fingerprint: String,
    pub path: PathBuf,
    /// Present for the dense outputs only
    pub report: Option<TransformReport>,
}

/// Send one request through an intercepted transport and wait for the slot.
///
/// The request itself is always awaited to completion; `cancel` only cuts the
/// wait that follows.
pub async fn capture_with_transport<T: Transport>(
    transport: &T,
    request: Request,
    reader: &SlotReader,
    wait: WaitConfig,
    cancel: &CancelToken,
) -> Result<CaptureOutcome> {
    let url = request.url.clone();
    let response = transport
        .send(request)
        .await
        .with_context(|| format!("requesting {}", url))?;
    logging::debug(
        Domain::Fetch,
        "fetch.completed",
        &[("url", v_str(&url)), ("status", json!(response.status))],
    );
    Ok(CaptureWaiter::new(wait).wait(reader, cancel).await)
}

/// Run a capture, giving up as soon as `cancel` fires. Unlike the waiter's own
/// cancellation this also abandons launch, navigation and requests in flight;
/// dropping the capture releases the browser and its page.
pub async fn until_cancelled<F>(capture: F, cancel: &CancelToken) -> Result<CaptureOutcome>
where
    F: Future<Output = Result<CaptureOutcome>>,
{
    tokio::select! {
        outcome = capture => outcome,
        _ = cancel.cancelled() => {
            logging::warn(Domain::System, "capture.abandoned", &[]);
            Ok(CaptureOutcome::NotCaptured(NotCapturedReason::Cancelled))
        }
    }
}

/// Request the heatmap endpoint directly, capturing through the same
/// interception rule the page path uses.
pub async fn capture_api(cfg: &Config, cancel: &CancelToken) -> Result<CaptureOutcome> {
    let (writer, reader) = capture_slot();
    let mut layer = InterceptLayer::new();
    layer.capture_json(&cfg.marker, writer);
    let timeout = Duration::from_millis(cfg.deadline_ms.max(1));
    let transport = Intercepted::new(HttpTransport::new(timeout), layer);
    let request = heatmap_request(cfg)?;
    logging::info(
        Domain::Fetch,
        "fetch.start",
        &[("url", v_str(&request.url)), ("symbol", v_str(&cfg.symbol))],
    );
    // The response has already resolved when the wait begins.
    let wait = WaitConfig {
        settle: Duration::ZERO,
        deadline: Duration::ZERO,
        poll_interval: cfg.wait_config().poll_interval,
    };
    capture_with_transport(&transport, request, &reader, wait, cancel).await
}

/// Load the chart page in a browser and capture the heatmap response its own
/// scripts request.
pub async fn capture_browser(cfg: &Config, cancel: &CancelToken) -> Result<CaptureOutcome> {
    let http = Client::builder()
        .timeout(DEVTOOLS_HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new());

    // Held until the end of the capture; dropping it stops the browser.
    let (endpoint, _process) = match &cfg.chrome_ws_url {
        Some(ws) => (DevtoolsEndpoint::from_ws_url(ws)?, None),
        None => {
            let process = BrowserProcess::launch(cfg)?;
            (DevtoolsEndpoint::local(cfg.chrome_debug_port)?, Some(process))
        }
    };
    endpoint.wait_ready(&http, &RetryConfig::default()).await?;
    let target = endpoint.open_page(&http).await?;

    let outcome = drive_page(cfg, &target, cancel).await;

    if let Err(err) = endpoint.close_page(&http, &target.id).await {
        logging::debug(
            Domain::Browser,
            "browser.close_page_failed",
            &[("error", v_str(&format!("{:#}", err)))],
        );
    }
    outcome
}

async fn drive_page(cfg: &Config, target: &PageTarget, cancel: &CancelToken) -> Result<CaptureOutcome> {
    let cdp = CdpClient::connect(&target.ws_url, CDP_CALL_TIMEOUT)
        .await
        .context("connecting to page")?;
    let session = PageSession::new(Arc::new(cdp), DEFAULT_SLOT_NAME);

    session.install_interceptor(&cfg.marker).await?;
    let url = cfg.page_url();
    logging::info(
        Domain::Browser,
        "browser.navigate",
        &[("url", v_str(&url)), ("symbol", v_str(&cfg.symbol))],
    );
    session.navigate(&url).await?;
    match session.title().await {
        Ok(title) => logging::info(Domain::Browser, "browser.title", &[("title", v_str(&title))]),
        Err(err) => logging::warn(Domain::Browser, "browser.title_failed", &[("error", v_str(&err.to_string()))]),
    }
    session.verify_interceptor().await?;

    let slot = session.slot();
    let outcome = CaptureWaiter::new(cfg.wait_config()).wait(&slot, cancel).await;

    if cfg.stay_ms > 0 && matches!(outcome, CaptureOutcome::Captured(_)) {
        logging::info(Domain::Browser, "browser.stay", &[("ms", json!(cfg.stay_ms))]);
        tokio::select! {
            _ = sleep(Duration::from_millis(cfg.stay_ms)) => {}
            _ = cancel.cancelled() => {}
        }
    }
    Ok(outcome)
}

/// A response saved earlier with `--json-file`.
pub fn load_file(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// SHA-256 of the response's JSON text. Object keys are serialised sorted,
/// so equal documents hash equally.
pub fn fingerprint(response: &Value) -> String {
    let bytes = serde_json::to_vec(response).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn render_dense(matrix: &DenseMatrix, format: DenseFormat, title: &str) -> String {
    let grid = GridRender::from_matrix(matrix);
    match format {
        DenseFormat::Html => render_html(&grid, title),
        DenseFormat::Json => grid.to_json(),
    }
}

fn log_report(report: &TransformReport, dims: (usize, usize)) {
    logging::info(
        Domain::Transform,
        "transform.done",
        &[
            ("times", v_num(dims.0 as f64)),
            ("prices", v_num(dims.1 as f64)),
            ("entries", v_num(report.entries as f64)),
            ("written", v_num(report.written as f64)),
            ("skipped", v_num(report.skipped as f64)),
            ("overwritten", v_num(report.overwritten as f64)),
        ],
    );
}

/// Render one payload in the requested mode.
pub fn render(payload: &SparseHeatmapPayload, opts: &OutputOptions) -> Result<(String, Option<TransformReport>)> {
    let _scope = logging::ProfileScope::with_context(
        "render",
        &[("mode", v_str(&format!("{:?}", opts.mode).to_lowercase())), ("entries", v_num(payload.data.len() as f64))],
    );
    match opts.mode.dense_format() {
        None => Ok((render_csv(payload, opts.transform)?, None)),
        Some(format) => {
            let (matrix, report) = densify(payload, opts.transform)?;
            log_report(&report, matrix.dims());
            Ok((render_dense(&matrix, format, &opts.title), Some(report)))
        }
    }
}

/// Save (optionally), validate, convert and write one captured response.
pub fn process(response: &Value, opts: &OutputOptions) -> Result<Processed> {
    if let Some(path) = &opts.json_file {
        let raw = serde_json::to_string_pretty(response).context("serialising response")?;
        write_output(path, &raw)?;
    }
    let fingerprint = fingerprint(response);
    logging::info(Domain::Capture, "capture.fingerprint", &[("sha256", v_str(&fingerprint))]);

    let payload = SparseHeatmapPayload::from_response(response).context("unusable heatmap response")?;
    let (contents, report) = render(&payload, opts)?;
    let path = opts.target().to_path_buf();
    write_output(&path, &contents)?;
    Ok(Processed {
        fingerprint,
        path,
        report,
    })
}

/// Offline conversion. A single response is written to the configured
/// output file, exactly like a live capture; several are converted together
/// by `process_files`.
pub fn convert_files(paths: &[PathBuf], opts: &OutputOptions) -> Result<Vec<Processed>> {
    match paths {
        [] => Err(anyhow!("no input files")),
        [single] => Ok(vec![process(&load_file(single)?, opts)?]),
        many => process_files(many, opts),
    }
}

/// Convert several saved responses at once. Each output lands next to its
/// input, with the mode's extension.
pub fn process_files(paths: &[PathBuf], opts: &OutputOptions) -> Result<Vec<Processed>> {
    let mut responses = Vec::with_capacity(paths.len());
    let mut payloads = Vec::with_capacity(paths.len());
    for path in paths {
        let response = load_file(path)?;
        let payload = SparseHeatmapPayload::from_response(&response)
            .with_context(|| format!("unusable heatmap response in {}", path.display()))?;
        responses.push(response);
        payloads.push(payload);
    }

    let _scope = logging::ProfileScope::with_context("render_batch", &[("files", v_num(paths.len() as f64))]);
    let rendered: Vec<(String, Option<TransformReport>)> = match opts.mode.dense_format() {
        None => payloads
            .iter()
            .map(|p| render_csv(p, opts.transform).map(|csv| (csv, None)))
            .collect::<Result<_, _>>()?,
        Some(format) => densify_many(&payloads, opts.transform)
            .into_iter()
            .map(|r| {
                r.map(|(matrix, report)| {
                    log_report(&report, matrix.dims());
                    (render_dense(&matrix, format, &opts.title), Some(report))
                })
            })
            .collect::<Result<_, _>>()?,
    };

    let mut out = Vec::with_capacity(paths.len());
    for ((input, response), (contents, report)) in paths.iter().zip(&responses).zip(rendered) {
        let path = input.with_extension(opts.mode.extension());
        write_output(&path, &contents)?;
        out.push(Processed {
            fingerprint: fingerprint(response),
            path,
            report,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":[1,2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":[1,2],"a":1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
        assert_ne!(fingerprint(&a), fingerprint(&json!({"a": 2})));
    }

    #[test]
    fn test_output_target_follows_mode() {
        let mut opts = OutputOptions {
            mode: OutputMode::Csv,
            csv_file: "a.csv".into(),
            html_file: "a.html".into(),
            grid_file: "a.json".into(),
            json_file: None,
            transform: TransformOptions::default(),
            title: String::new(),
        };
        assert_eq!(opts.target(), Path::new("a.csv"));
        opts.mode = OutputMode::Plot;
        assert_eq!(opts.target(), Path::new("a.html"));
        assert_eq!(OutputMode::Grid.extension(), "grid.json");
    }

    #[test]
    fn test_only_dense_modes_have_a_dense_format() {
        assert_eq!(OutputMode::Csv.dense_format(), None);
        assert_eq!(OutputMode::Plot.dense_format(), Some(DenseFormat::Html));
        assert_eq!(OutputMode::Grid.dense_format(), Some(DenseFormat::Json));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_a_stalled_capture() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        // stands in for a navigation that never finishes
        let stalled = std::future::pending::<Result<CaptureOutcome>>();
        let outcome = until_cancelled(stalled, &cancel).await.unwrap();
        assert_eq!(outcome, CaptureOutcome::NotCaptured(NotCapturedReason::Cancelled));
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_finished_capture_passes_through() {
        let captured = async { Ok(CaptureOutcome::NotCaptured(NotCapturedReason::Timeout)) };
        let outcome = until_cancelled(captured, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, CaptureOutcome::NotCaptured(NotCapturedReason::Timeout));
    }
}
