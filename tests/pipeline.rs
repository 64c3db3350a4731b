//! End-to-end: a response goes through an intercepted transport, lands in the
//! slot, and comes out as files on disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use liqmap::capture::{
    capture_slot, CancelToken, CaptureOutcome, InterceptLayer, Intercepted, NotCapturedReason, Request, RequestKind,
    Response, Transport, WaitConfig,
};
use liqmap::pipeline::{
    capture_with_transport, convert_files, load_file, process, process_files, OutputMode, OutputOptions,
};
use liqmap::transform::TransformOptions;

const MARKER: &str = "/api/liqMap/getLiqHeatMap";

/// Answers every request with the same body.
struct CannedTransport {
    body: Vec<u8>,
}

#[async_trait]
impl Transport for CannedTransport {
    async fn send(&self, _request: Request) -> Result<Response> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Response {
            status: 200,
            body: self.body.clone(),
        })
    }
}

fn reference_response() -> Value {
    json!({
        "success": true,
        "code": "1",
        "data": {
            "liqHeatMap": {
                "chartTimeArray": [1000, 2000],
                "priceArray": ["10.0", "20.0"],
                "data": [[0, 1, 5], [1, 0, 3]],
                "maxLiqValue": 5
            }
        }
    })
}

fn numbers<T: serde::de::DeserializeOwned>(v: &Value) -> T {
    serde_json::from_value(v.clone()).unwrap()
}

fn quick_wait() -> WaitConfig {
    WaitConfig {
        settle: Duration::ZERO,
        deadline: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
    }
}

fn outputs(dir: &std::path::Path, mode: OutputMode) -> OutputOptions {
    OutputOptions {
        mode,
        csv_file: dir.join("out.csv"),
        html_file: dir.join("out.html"),
        grid_file: dir.join("out_grid.json"),
        json_file: None,
        transform: TransformOptions::default(),
        title: "BTCUSDT liquidation heatmap (3d)".to_string(),
    }
}

fn intercepted(body: Vec<u8>) -> (Intercepted<CannedTransport>, liqmap::capture::SlotReader) {
    let (writer, reader) = capture_slot();
    let mut layer = InterceptLayer::new();
    layer.capture_json(MARKER, writer);
    (Intercepted::new(CannedTransport { body }, layer), reader)
}

#[tokio::test]
async fn captured_response_exports_reference_csv() {
    let (transport, reader) = intercepted(reference_response().to_string().into_bytes());
    let request = Request::get(RequestKind::Fetch, format!("https://api.example.com{}?symbol=BTCUSDT", MARKER));

    let outcome = capture_with_transport(&transport, request, &reader, quick_wait(), &CancelToken::new())
        .await
        .unwrap();
    let captured = outcome.captured().expect("response should be captured");

    let dir = tempfile::tempdir().unwrap();
    let processed = process(&captured.payload, &outputs(dir.path(), OutputMode::Csv)).unwrap();
    let csv = std::fs::read_to_string(&processed.path).unwrap();
    assert_eq!(
        csv,
        "time,price,value\n1970-01-01T00:00:01.000Z,20,5\n1970-01-01T00:00:02.000Z,10,3"
    );
    assert!(processed.report.is_none());
    assert_eq!(processed.fingerprint.len(), 64);
}

#[tokio::test]
async fn xhr_requests_are_captured_like_fetch() {
    let (transport, reader) = intercepted(reference_response().to_string().into_bytes());
    let request = Request::get(RequestKind::Xhr, format!("https://api.example.com{}", MARKER));
    let outcome = capture_with_transport(&transport, request, &reader, quick_wait(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(*outcome.captured().unwrap().payload, reference_response());
}

#[tokio::test]
async fn unrelated_request_times_out() {
    let (transport, reader) = intercepted(reference_response().to_string().into_bytes());
    let request = Request::get(RequestKind::Fetch, "https://api.example.com/api/ticker");
    let outcome = capture_with_transport(&transport, request, &reader, quick_wait(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CaptureOutcome::NotCaptured(NotCapturedReason::Timeout));
}

#[tokio::test]
async fn non_json_body_is_counted_not_captured() {
    let (transport, reader) = intercepted(b"<html>busy</html>".to_vec());
    let request = Request::get(RequestKind::Fetch, format!("https://api.example.com{}", MARKER));
    let outcome = capture_with_transport(&transport, request, &reader, quick_wait(), &CancelToken::new())
        .await
        .unwrap();
    assert!(outcome.captured().is_none());
    assert_eq!(reader.parse_failures(), 1);
}

#[test]
fn grid_output_is_price_major_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let processed = process(&reference_response(), &outputs(dir.path(), OutputMode::Grid)).unwrap();
    let grid: Value = serde_json::from_str(&std::fs::read_to_string(&processed.path).unwrap()).unwrap();
    assert_eq!(grid["x"], json!(["1970-01-01T00:00:01.000Z", "1970-01-01T00:00:02.000Z"]));
    assert_eq!(numbers::<Vec<f64>>(&grid["y"]), vec![10.0, 20.0]);
    assert_eq!(numbers::<Vec<Vec<f64>>>(&grid["z"]), vec![vec![0.0, 3.0], vec![5.0, 0.0]]);
    assert_eq!(grid["zmax"].as_f64(), Some(5.0));
    let report = processed.report.unwrap();
    assert_eq!((report.entries, report.written, report.skipped), (2, 2, 0));
}

#[test]
fn plot_output_embeds_title_and_trace() {
    let dir = tempfile::tempdir().unwrap();
    let processed = process(&reference_response(), &outputs(dir.path(), OutputMode::Plot)).unwrap();
    let html = std::fs::read_to_string(&processed.path).unwrap();
    assert!(html.contains("BTCUSDT liquidation heatmap (3d)"));
    assert!(html.contains("\"heatmap\""));
}

#[test]
fn raw_response_is_saved_and_reloadable() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = outputs(dir.path(), OutputMode::Csv);
    opts.json_file = Some(dir.path().join("raw").join("response.json"));
    let first = process(&reference_response(), &opts).unwrap();

    let reloaded = load_file(opts.json_file.as_ref().unwrap()).unwrap();
    assert_eq!(reloaded, reference_response());
    let second = process(&reloaded, &opts).unwrap();
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[test]
fn out_of_range_entry_fails_strict_and_skips_lenient() {
    let mut response = reference_response();
    response["data"]["liqHeatMap"]["data"] = json!([[0, 1, 5], [2, 0, 9], [1, 0, 3]]);
    let dir = tempfile::tempdir().unwrap();

    let strict = outputs(dir.path(), OutputMode::Grid);
    assert!(process(&response, &strict).is_err());
    assert!(!strict.grid_file.exists());

    let mut lenient = strict.clone();
    lenient.transform = TransformOptions { lenient: true };
    let report = process(&response, &lenient).unwrap().report.unwrap();
    assert_eq!((report.written, report.skipped), (2, 1));
}

#[test]
fn rejected_envelope_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = process(
        &json!({"success": false, "msg": "rate limited"}),
        &outputs(dir.path(), OutputMode::Csv),
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("rate limited"));
}

#[test]
fn batch_conversion_writes_next_to_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut second = reference_response();
    second["data"]["liqHeatMap"]["data"] = json!([]);
    let paths: Vec<PathBuf> = [("a.json", reference_response()), ("b.json", second)]
        .into_iter()
        .map(|(name, body)| {
            let path = dir.path().join(name);
            std::fs::write(&path, body.to_string()).unwrap();
            path
        })
        .collect();

    let done = process_files(&paths, &outputs(dir.path(), OutputMode::Grid)).unwrap();
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].path, dir.path().join("a.grid.json"));
    assert_eq!(done[1].report.as_ref().unwrap().written, 0);

    let empty: Value = serde_json::from_str(&std::fs::read_to_string(&done[1].path).unwrap()).unwrap();
    assert_eq!(numbers::<Vec<Vec<f64>>>(&empty["z"]), vec![vec![0.0, 0.0], vec![0.0, 0.0]]);
    // inputs untouched
    assert_eq!(load_file(&paths[0]).unwrap(), reference_response());
}

fn saved(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, reference_response().to_string()).unwrap();
    path
}

#[test]
fn single_file_goes_to_the_configured_target() {
    let dir = tempfile::tempdir().unwrap();
    let input = saved(dir.path(), "a.json");
    let opts = outputs(dir.path(), OutputMode::Plot);

    let done = convert_files(&[input], &opts).unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].path, opts.html_file);
    assert!(opts.html_file.exists());
    assert!(!dir.path().join("a.html").exists());
}

#[test]
fn several_files_go_next_to_their_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![saved(dir.path(), "a.json"), saved(dir.path(), "b.json")];
    let opts = outputs(dir.path(), OutputMode::Csv);

    let done = convert_files(&inputs, &opts).unwrap();
    let paths: Vec<PathBuf> = done.iter().map(|p| p.path.clone()).collect();
    assert_eq!(paths, vec![dir.path().join("a.csv"), dir.path().join("b.csv")]);
    assert!(!opts.csv_file.exists());
    assert_eq!(done[0].fingerprint, done[1].fingerprint);
}

#[test]
fn no_files_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(convert_files(&[], &outputs(dir.path(), OutputMode::Csv)).is_err());
}
