//! sheetview - spreadsheet viewer core
//!
//! Parsing happens in a background worker; this crate drives it and turns the
//! cells currently in view into renderer-ready attributes:
//! - Worker RPC with request correlation, timeouts and fault handling
//! - Debounced, buffered viewport loading
//! - O(1) cell lookup over the loaded region, with extents and merges
//! - Pure style resolution: number formats, colors, borders, alignment
//!
//! # Usage (Rust)
//!
//! ```no_run
//! # async fn demo() -> sheetview::error::Result<()> {
//! use sheetview::{FileSource, JsonWorkbookEngine, Orchestrator, RpcClient, ViewerConfig, WorkerHost};
//!
//! let config = ViewerConfig::from_env()?;
//! let (_host, endpoint) = WorkerHost::spawn(JsonWorkbookEngine::new())?;
//! let rpc = RpcClient::open(endpoint, config.worker_timeout());
//! let mut orchestrator = Orchestrator::new(config, FileSource::new(), rpc);
//! orchestrator.open("book.json").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Usage (JavaScript)
//!
//! ```javascript
//! import init, { format_value, resolve_cell } from 'sheetview';
//! await init();
//! format_value(1234.5, "$#,##0.00", false); // { text: "$1,234.50" }
//! ```

// Style resolution
pub mod cell_ref;
pub mod color;
pub mod numfmt;
pub mod resolve;
pub mod types;

// Data pipeline
pub mod cell_store;
pub mod config;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod protocol;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod viewport;
pub mod worker;

use wasm_bindgen::prelude::*;

pub use cell_store::CellStore;
pub use config::ViewerConfig;
pub use error::{Result as ViewerResult, ViewerError};
pub use fetch::{DocumentSource, Download, FileSource};
pub use orchestrator::{DiagnosticsSink, LoadStage, LoadState, Orchestrator};
pub use resolve::resolve;
pub use retry::RetryPolicy;
pub use rpc::{RpcClient, WorkerEndpoint};
pub use session::SessionHandle;
pub use viewport::{MemoryState, ViewportController};
pub use worker::{DocumentEngine, JsonWorkbookEngine, WorkerHost};

pub use types::*;

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
}

fn from_js<T: serde::de::DeserializeOwned>(value: JsValue, what: &str) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Invalid {what}: {e}")))
}

/// Format a number with an Excel format code.
///
/// Returns `{ text, color? }`.
///
/// # Errors
/// Returns an error if the result cannot be converted to a JS value.
#[wasm_bindgen]
pub fn format_value(value: f64, format_code: &str, date1904: bool) -> Result<JsValue, JsValue> {
    let formatted = numfmt::format_value(value, format_code, DateSystem::from_1904_flag(date1904));
    to_js(&formatted)
}

/// Resolve one cell for display.
///
/// # Arguments
/// * `value` - The raw cell value as sent by the worker
/// * `style` - A style descriptor object, or `undefined`
/// * `ctx` - A render context object, or `undefined` for defaults
///
/// # Errors
/// Returns an error if `style` or `ctx` has the wrong shape.
#[wasm_bindgen]
pub fn resolve_cell(value: JsValue, style: JsValue, ctx: JsValue) -> Result<JsValue, JsValue> {
    let raw: serde_json::Value = if value.is_undefined() {
        serde_json::Value::Null
    } else {
        from_js(value, "cell value")?
    };
    let style: StyleDescriptor = if style.is_undefined() || style.is_null() {
        StyleDescriptor::default()
    } else {
        from_js(style, "style")?
    };
    let ctx: RenderContext = if ctx.is_undefined() || ctx.is_null() {
        RenderContext::default()
    } else {
        from_js(ctx, "render context")?
    };
    to_js(&resolve(&CellValue::from_raw(&raw), &style, &ctx))
}

/// Install the panic hook that forwards Rust panics to the browser console.
#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

/// Get the library version
#[must_use]
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
