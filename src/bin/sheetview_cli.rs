//! CLI tool for sheetview - opens a JSON workbook through the worker pipeline
//! and prints resolved cells
//!
//! Usage:
//!   sheetview_cli <workbook.json>                          # First visible sheet, A1:J40
//!   sheetview_cli <workbook.json> --sheet 2 --range B2:D9  # Pick sheet and range
//!   sheetview_cli <workbook.json> --json                   # Full attributes as JSON lines
//!   sheetview_cli format <value> <pattern> [--1904]        # Format a single number
//!
//! Log output is controlled by `RUST_LOG` (default `warn`).

#![allow(clippy::exit)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

use std::env;
use std::io::{self, Write};

use sheetview::cell_ref::{format_cell_ref, require_cell_range};
use sheetview::numfmt;
use sheetview::{
    DateSystem, FileSource, JsonWorkbookEngine, Orchestrator, RenderContext, RpcClient,
    ViewerConfig, WorkerHost,
};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: sheetview_cli <workbook.json> [--sheet N] [--range A1:J40] [--json]\n       sheetview_cli format <value> <pattern> [--1904]";

struct ViewArgs {
    path: String,
    sheet: usize,
    range: String,
    json: bool,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn parse_view_args(args: &[String]) -> ViewArgs {
    let mut view = ViewArgs {
        path: args[0].clone(),
        sheet: 0,
        range: "A1:J40".to_string(),
        json: false,
    };
    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--sheet" => {
                let value = rest.next().unwrap_or_else(|| fail(USAGE));
                view.sheet = value
                    .parse()
                    .unwrap_or_else(|_| fail(format!("Invalid sheet position: {value}")));
            }
            "--range" => view.range = rest.next().unwrap_or_else(|| fail(USAGE)).clone(),
            "--json" => view.json = true,
            other => fail(format!("Unknown argument: {other}\n{USAGE}")),
        }
    }
    view
}

fn run_format(args: &[String]) {
    if args.len() < 2 {
        fail(USAGE);
    }
    let value: f64 = args[0]
        .parse()
        .unwrap_or_else(|_| fail(format!("Not a number: {}", args[0])));
    let system = DateSystem::from_1904_flag(args[2..].iter().any(|a| a == "--1904"));
    let formatted = numfmt::format_value(value, &args[1], system);
    match formatted.color {
        Some(color) => println!("{}\t{color}", formatted.text),
        None => println!("{}", formatted.text),
    }
}

async fn run_view(view: ViewArgs) -> sheetview::ViewerResult<()> {
    let range = require_cell_range(&view.range)?;
    let config = ViewerConfig::from_env()?;

    let (host, endpoint) = WorkerHost::spawn(JsonWorkbookEngine::new())?;
    let rpc = RpcClient::open(endpoint, config.worker_timeout());
    let debounce = config.debounce();
    let mut orchestrator = Orchestrator::new(config, FileSource::new(), rpc);

    orchestrator.open(&view.path).await?;
    if view.sheet != 0 {
        orchestrator.switch_sheet(view.sheet).await?;
    }

    let now = Instant::now();
    if orchestrator.on_visible_region(range, now) {
        orchestrator.poll_viewport(now + debounce).await?;
    }

    let sheets = orchestrator.worksheets();
    let name = sheets.get(view.sheet).map_or("", |w| w.name.as_str());
    eprintln!(
        "{name}: {} rows x {} cols, {} cells loaded",
        orchestrator.store().total_rows(),
        orchestrator.store().total_cols(),
        orchestrator.store().len()
    );

    let ctx = RenderContext::default();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for cell in orchestrator.store().cells_in(range) {
        let Some(attrs) = orchestrator.resolve_cell(cell.row, cell.col, &ctx) else {
            continue;
        };
        let addr = format_cell_ref(cell.address());
        if view.json {
            let line = serde_json::json!({ "cell": addr, "attributes": attrs });
            writeln!(out, "{line}")?;
        } else if !attrs.text.is_empty() {
            writeln!(out, "{addr}\t{}", attrs.text)?;
        }
    }

    orchestrator.teardown();
    if tokio::task::spawn_blocking(move || host.join()).await.is_err() {
        tracing::warn!("Worker thread did not shut down cleanly");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        fail(USAGE);
    }

    if args[0] == "format" {
        run_format(&args[1..]);
        return;
    }

    let view = parse_view_args(&args);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(format!("Error starting runtime: {e}")));
    if let Err(e) = runtime.block_on(run_view(view)) {
        fail(format!("Error: {e}"));
    }
}
