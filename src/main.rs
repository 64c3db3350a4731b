use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use liqmap::capture::{CancelToken, CaptureOutcome};
use liqmap::config::Config;
use liqmap::logging::{self, v_num, v_str, Domain};
use liqmap::pipeline::{self, OutputMode, OutputOptions, Processed};
use liqmap::transform::TransformOptions;

#[derive(Parser)]
#[command(
    name = "liqmap",
    version,
    about = "Capture a liquidation heatmap and export it as CSV, a plot or a grid"
)]
struct Cli {
    #[command(subcommand)]
    source: Source,

    #[command(flatten)]
    opts: GlobalArgs,
}

#[derive(Subcommand)]
enum Source {
    /// Request the heatmap endpoint directly
    Api,
    /// Load the chart page in a browser and capture its heatmap request
    Browser,
    /// Convert responses saved earlier with --json-file. One path is written
    /// to the --csv-file/--html-file/--grid-file target; several are each
    /// written next to their input.
    File {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Args)]
struct GlobalArgs {
    /// Output kind
    #[arg(long, value_enum, default_value_t = OutputMode::Csv, global = true)]
    mode: OutputMode,

    /// CSV destination ("-" for stdout)
    #[arg(long, default_value = "liq_heat_map.csv", global = true)]
    csv_file: PathBuf,

    #[arg(long, default_value = "liq_heat_map.html", global = true)]
    html_file: PathBuf,

    #[arg(long, default_value = "liq_heat_map_grid.json", global = true)]
    grid_file: PathBuf,

    /// Also save the raw captured response here
    #[arg(long, global = true)]
    json_file: Option<PathBuf>,

    #[arg(long, global = true)]
    symbol: Option<String>,

    #[arg(long, global = true)]
    interval: Option<String>,

    #[arg(long, global = true)]
    exchange: Option<String>,

    #[arg(long, default_value_t = false, global = true)]
    headless: bool,

    /// Skip out-of-range entries instead of failing
    #[arg(long, default_value_t = false, global = true)]
    lenient: bool,

    #[arg(long, global = true)]
    settle_ms: Option<u64>,

    #[arg(long, global = true)]
    deadline_ms: Option<u64>,

    #[arg(long, global = true)]
    poll_ms: Option<u64>,

    /// Keep the page open this long after a capture
    #[arg(long, global = true)]
    stay_ms: Option<u64>,
}

impl GlobalArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(symbol) = &self.symbol {
            cfg.symbol = symbol.to_uppercase();
        }
        if let Some(interval) = &self.interval {
            cfg.interval = interval.clone();
        }
        if let Some(exchange) = &self.exchange {
            cfg.exchange = exchange.clone();
        }
        cfg.headless |= self.headless;
        cfg.lenient |= self.lenient;
        cfg.settle_ms = self.settle_ms.unwrap_or(cfg.settle_ms);
        cfg.deadline_ms = self.deadline_ms.unwrap_or(cfg.deadline_ms);
        cfg.poll_ms = self.poll_ms.unwrap_or(cfg.poll_ms);
        cfg.stay_ms = self.stay_ms.unwrap_or(cfg.stay_ms);
    }

    fn output(&self, cfg: &Config) -> OutputOptions {
        OutputOptions {
            mode: self.mode,
            csv_file: self.csv_file.clone(),
            html_file: self.html_file.clone(),
            grid_file: self.grid_file.clone(),
            json_file: self.json_file.clone(),
            transform: TransformOptions { lenient: cfg.lenient },
            title: format!("{} liquidation heatmap ({})", cfg.symbol, cfg.interval),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(err) = &result {
        logging::error(Domain::System, "failed", &[("error", v_str(&format!("{:#}", err)))]);
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::from_env();
    cli.opts.apply(&mut cfg);
    let output = cli.opts.output(&cfg);

    logging::info(
        Domain::System,
        "startup",
        &[
            ("symbol", v_str(&cfg.symbol)),
            ("interval", v_str(&cfg.interval)),
            ("exchange", v_str(&cfg.exchange)),
            ("mode", v_str(&format!("{:?}", output.mode).to_lowercase())),
            ("deadline_ms", v_num(cfg.deadline_ms as f64)),
        ],
    );

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logging::warn(Domain::System, "interrupted", &[]);
            on_signal.cancel();
        }
    });

    let outcome = match &cli.source {
        Source::File { paths } => {
            for processed in pipeline::convert_files(paths, &output)? {
                log_done(&processed);
            }
            return Ok(());
        }
        Source::Api => pipeline::until_cancelled(pipeline::capture_api(&cfg, &cancel), &cancel).await?,
        Source::Browser => pipeline::until_cancelled(pipeline::capture_browser(&cfg, &cancel), &cancel).await?,
    };

    match outcome {
        CaptureOutcome::Captured(captured) => {
            log_done(&pipeline::process(&captured.payload, &output)?);
            Ok(())
        }
        CaptureOutcome::NotCaptured(reason) => {
            bail!("no heatmap response captured ({:?})", reason)
        }
    }
}

fn log_done(processed: &Processed) {
    logging::info(
        Domain::System,
        "done",
        &[
            ("path", v_str(&processed.path.display().to_string())),
            ("sha256", v_str(&processed.fingerprint)),
        ],
    );
}
