//! Sheet orchestrator and session tests
//!
//! Full pipeline: an in-memory document source, a real worker thread running
//! `JsonWorkbookEngine`, and the orchestrator state machine on top.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::json;
use sheetview::error::{Result, ViewerError};
use sheetview::orchestrator::{CancelHandle, DiagnosticReport};
use sheetview::protocol::SearchOptions;
use sheetview::{
    session, CellAddress, DiagnosticsSink, DocumentEngine, DocumentSource, Download,
    JsonWorkbookEngine, LoadStage, LoadState, Orchestrator, RawCell, RenderContext,
    ResolvedBorders, RetryPolicy, RpcClient, SheetBatch, ViewerConfig, Viewport,
    WorkbookSummary, WorkerHost,
};
use tokio::sync::watch;

const BOOK: &str = "book.json";

fn workbook() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "sheets": [
            {
                "name": "Summary",
                "showGridLines": false,
                "cells": [
                    { "row": 1, "col": 1, "value": "Revenue" },
                    { "row": 1, "col": 2, "value": 1234.5, "style": { "numFmt": "$#,##0.00" } },
                    { "row": 400, "col": 1, "value": "far" }
                ]
            },
            { "name": "Lookup", "state": "hidden" },
            { "name": "Secret", "state": "veryHidden" },
            {
                "name": "Data",
                "cells": [
                    { "row": 2, "col": 1, "value": "needle in a haystack" },
                    { "row": 5, "col": 3, "value": "Needle" },
                    { "row": 6, "col": 3, "value": "thread" }
                ]
            }
        ]
    }))
    .unwrap()
}

// ============================================================================
// Fixtures
// ============================================================================

/// Serves documents from memory, failing the first `failures` fetches with 503.
#[derive(Default)]
struct MemorySource {
    docs: HashMap<String, Vec<u8>>,
    failures: AtomicU32,
    fetches: Arc<AtomicU32>,
    observer: Arc<OnceLock<watch::Receiver<LoadState>>>,
    progress_seen: Arc<Mutex<Vec<Option<String>>>>,
    cancel_on_fetch: Arc<OnceLock<CancelHandle>>,
}

impl MemorySource {
    fn with_book() -> Self {
        Self {
            docs: HashMap::from([(BOOK.to_string(), workbook())]),
            ..Self::default()
        }
    }

    fn with_doc(mut self, id: &str, bytes: Vec<u8>) -> Self {
        self.docs.insert(id.to_string(), bytes);
        self
    }

    fn failing(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }
}

impl DocumentSource for MemorySource {
    async fn fetch(&self, document_id: &str) -> Result<Download> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(rx) = self.observer.get() {
            self.progress_seen
                .lock()
                .unwrap()
                .push(rx.borrow().progress.clone());
        }
        if let Some(handle) = self.cancel_on_fetch.get() {
            handle.cancel();
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ViewerError::Network {
                status: Some(503),
                message: "service unavailable".to_string(),
            });
        }
        match self.docs.get(document_id) {
            Some(bytes) => Ok(Download::from_bytes(bytes.clone())),
            None => Err(ViewerError::Network {
                status: Some(404),
                message: "not found".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<DiagnosticReport>>);

impl DiagnosticsSink for Recorder {
    fn report(&self, report: &DiagnosticReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

/// Engine that crashes on load.
struct Crashing;

impl DocumentEngine for Crashing {
    fn load(&mut self, _bytes: &[u8]) -> Result<WorkbookSummary> {
        panic!("corrupt heap");
    }

    fn process_sheet(&mut self, _sheet: usize, _viewport: Viewport) -> Result<SheetBatch> {
        Err(ViewerError::Parse("unreachable".to_string()))
    }

    fn cell_range(&mut self, _sheet: usize, _range: Viewport) -> Result<Vec<RawCell>> {
        Ok(Vec::new())
    }

    fn search(&mut self, _sheet: usize, _q: &str, _o: SearchOptions) -> Result<Vec<CellAddress>> {
        Ok(Vec::new())
    }
}

/// Wraps the JSON engine with configurable delays and search failures.
#[derive(Default)]
struct Scripted {
    inner: JsonWorkbookEngine,
    loads: Arc<AtomicU32>,
    /// The first `slow_loads` loads sleep for `load_delay`
    slow_loads: u32,
    load_delay: Duration,
    process_delay: Duration,
    fail_search: bool,
}

impl DocumentEngine for Scripted {
    fn load(&mut self, bytes: &[u8]) -> Result<WorkbookSummary> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst);
        if n < self.slow_loads {
            std::thread::sleep(self.load_delay);
        }
        self.inner.load(bytes)
    }

    fn process_sheet(&mut self, sheet: usize, viewport: Viewport) -> Result<SheetBatch> {
        std::thread::sleep(self.process_delay);
        self.inner.process_sheet(sheet, viewport)
    }

    fn cell_range(&mut self, sheet: usize, range: Viewport) -> Result<Vec<RawCell>> {
        self.inner.cell_range(sheet, range)
    }

    fn search(&mut self, sheet: usize, q: &str, o: SearchOptions) -> Result<Vec<CellAddress>> {
        if self.fail_search {
            return Err(ViewerError::Parse("search index unavailable".to_string()));
        }
        self.inner.search(sheet, q, o)
    }
}

fn start_with<E: DocumentEngine>(
    engine: E,
    source: MemorySource,
    config: ViewerConfig,
) -> (Orchestrator<MemorySource>, WorkerHost) {
    let (host, endpoint) = WorkerHost::spawn(engine).unwrap();
    let rpc = RpcClient::open(endpoint, config.worker_timeout());
    (Orchestrator::new(config, source, rpc), host)
}

fn config() -> ViewerConfig {
    ViewerConfig {
        worker_timeout_ms: 5_000,
        debounce_ms: 20,
        download_retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        worker_retry: RetryPolicy::none(),
        ..ViewerConfig::default()
    }
}

fn start(source: MemorySource, config: ViewerConfig) -> (Orchestrator<MemorySource>, WorkerHost) {
    let (host, endpoint) = WorkerHost::spawn(JsonWorkbookEngine::new()).unwrap();
    let rpc = RpcClient::open(endpoint, config.worker_timeout());
    (Orchestrator::new(config, source, rpc), host)
}

// ============================================================================
// Loading
// ============================================================================

mod loading {
    use super::*;

    #[tokio::test]
    async fn test_hidden_sheets_filtered_but_addressable() {
        let (mut orch, _host) = start(MemorySource::with_book(), config());
        orch.open(BOOK).await.unwrap();

        assert_eq!(orch.state().stage, LoadStage::Ready);
        let names: Vec<&str> = orch.worksheets().iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["Summary", "Data"]);
        assert_eq!(orch.all_worksheets().len(), 4);
        assert_eq!(orch.internal_index(0), Some(0));
        assert_eq!(orch.internal_index(1), Some(3));
        assert_eq!(orch.internal_index(2), None);
        assert_eq!(orch.active_sheet(), Some(0));
    }

    #[tokio::test]
    async fn test_first_sheet_resolves_through_store() {
        let (mut orch, _host) = start(MemorySource::with_book(), config());
        orch.open(BOOK).await.unwrap();

        let ctx = RenderContext::default();
        let b1 = orch.resolve_cell(1, 2, &ctx).unwrap();
        assert_eq!(b1.text, "$1,234.50");
        // Sheet has grid lines off, so no default hairlines.
        assert_eq!(b1.borders, ResolvedBorders::default());
        assert!(orch.resolve_cell(2, 2, &ctx).is_none());
        assert!(orch.resolve_cell(400, 1, &ctx).is_none());
    }

    #[tokio::test]
    async fn test_same_document_is_not_reprocessed() {
        let source = MemorySource::with_book();
        let fetches = Arc::clone(&source.fetches);
        let (mut orch, _host) = start(source, config());

        orch.open(BOOK).await.unwrap();
        orch.open(BOOK).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_download_failures_retry_with_progress() {
        let source = MemorySource::with_book().failing(2);
        let fetches = Arc::clone(&source.fetches);
        let seen = Arc::clone(&source.progress_seen);
        let observer = Arc::clone(&source.observer);
        let (mut orch, _host) = start(source, config());
        observer.set(orch.subscribe()).unwrap();

        orch.open(BOOK).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Some("Downloading…".to_string()),
                Some("Retrying download (2/3)…".to_string()),
                Some("Retrying download (3/3)…".to_string()),
            ]
        );
        assert_eq!(orch.state().stage, LoadStage::Ready);
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let source = MemorySource::with_book();
        let fetches = Arc::clone(&source.fetches);
        let recorder = Arc::new(Recorder::default());
        let (orch, _host) = start(source, config());
        let mut orch = orch.with_diagnostics(Arc::clone(&recorder) as Arc<dyn DiagnosticsSink>);

        let err = orch.open("missing.json").await.unwrap_err();
        assert!(matches!(err, ViewerError::Network { status: Some(404), .. }));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let state = orch.state();
        assert_eq!(state.stage, LoadStage::Error);
        assert!(state.error.unwrap().contains("404"));

        let reports = recorder.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stage, LoadStage::Downloading);
        assert_eq!(reports[0].kind, "NetworkError");
    }

    #[tokio::test]
    async fn test_retry_after_exhausted_attempts() {
        let source = MemorySource::with_book().failing(3);
        let fetches = Arc::clone(&source.fetches);
        let (mut orch, _host) = start(source, config());

        assert!(orch.open(BOOK).await.is_err());
        let state = orch.state();
        assert_eq!(state.stage, LoadStage::Error);
        assert!(state.retryable);

        orch.retry().await.unwrap();
        assert_eq!(orch.state().stage, LoadStage::Ready);
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_oversized_document_rejected() {
        let config = ViewerConfig {
            max_payload_bytes: 16,
            ..config()
        };
        let (mut orch, _host) = start(MemorySource::with_book(), config);

        let err = orch.open(BOOK).await.unwrap_err();
        assert!(matches!(err, ViewerError::PayloadTooLarge { limit: 16, .. }));
        assert_eq!(orch.state().stage, LoadStage::Error);
    }

    #[tokio::test]
    async fn test_worker_crash_is_fatal() {
        let (host, endpoint) = WorkerHost::spawn(Crashing).unwrap();
        let config = config();
        let rpc = RpcClient::open(endpoint, config.worker_timeout());
        let mut orch = Orchestrator::new(config, MemorySource::with_book(), rpc);

        let err = orch.open(BOOK).await.unwrap_err();
        assert!(matches!(err, ViewerError::WorkerFault(_)));
        let state = orch.state();
        assert_eq!(state.stage, LoadStage::Error);
        assert!(!state.retryable);
        orch.teardown();
        host.join();
    }

    #[tokio::test]
    async fn test_workbook_load_retries_after_worker_timeout() {
        let loads = Arc::new(AtomicU32::new(0));
        let engine = Scripted {
            loads: Arc::clone(&loads),
            slow_loads: 1,
            load_delay: Duration::from_millis(250),
            ..Scripted::default()
        };
        let config = ViewerConfig {
            worker_timeout_ms: 200,
            worker_retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
            ..config()
        };
        let (mut orch, _host) = start_with(engine, MemorySource::with_book(), config);

        orch.open(BOOK).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(orch.state().stage, LoadStage::Ready);
        assert_eq!(orch.worksheets().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_load_is_not_an_error() {
        let source = MemorySource::with_book();
        let cancel = Arc::clone(&source.cancel_on_fetch);
        let recorder = Arc::new(Recorder::default());
        let (orch, _host) = start(source, config());
        let mut orch = orch.with_diagnostics(Arc::clone(&recorder) as Arc<dyn DiagnosticsSink>);
        cancel.set(orch.cancel_handle()).unwrap();

        let err = orch.open(BOOK).await.unwrap_err();
        assert!(err.is_cancellation());
        assert_ne!(orch.state().stage, LoadStage::Error);
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}

// ============================================================================
// Sheets and search
// ============================================================================

mod sheets {
    use super::*;

    #[tokio::test]
    async fn test_switch_resets_selection_and_search() {
        let (mut orch, _host) = start(MemorySource::with_book(), config());
        orch.open(BOOK).await.unwrap();
        orch.select_cell(CellAddress::new(1, 1));
        orch.search("Revenue", SearchOptions::default()).await;
        assert_eq!(orch.search_results(), &[CellAddress::new(1, 1)]);

        assert!(orch.switch_sheet(1).await.unwrap());
        assert_eq!(orch.active_sheet(), Some(1));
        assert!(orch.selection().is_none());
        assert!(orch.search_results().is_empty());
        assert_eq!(
            orch.resolve_cell(6, 3, &RenderContext::default()).unwrap().text,
            "thread"
        );
    }

    #[tokio::test]
    async fn test_search_options() {
        let (mut orch, _host) = start(MemorySource::with_book(), config());
        orch.open(BOOK).await.unwrap();
        orch.switch_sheet(1).await.unwrap();

        let hits = orch.search("needle", SearchOptions::default()).await;
        assert_eq!(hits, vec![CellAddress::new(2, 1), CellAddress::new(5, 3)]);

        let exact = SearchOptions {
            match_case: true,
            whole_cell: true,
        };
        assert_eq!(
            orch.search("Needle", exact).await,
            vec![CellAddress::new(5, 3)]
        );
    }

    #[tokio::test]
    async fn test_search_error_reply_gives_no_results() {
        let engine = Scripted {
            fail_search: true,
            ..Scripted::default()
        };
        let recorder = Arc::new(Recorder::default());
        let (orch, _host) = start_with(engine, MemorySource::with_book(), config());
        let mut orch = orch.with_diagnostics(Arc::clone(&recorder) as Arc<dyn DiagnosticsSink>);
        orch.open(BOOK).await.unwrap();

        assert!(orch.search("Revenue", SearchOptions::default()).await.is_empty());
        assert!(orch.search_results().is_empty());
        assert_eq!(orch.state().stage, LoadStage::Ready);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_full_sheet_load_is_skipped() {
        let engine = Scripted {
            process_delay: Duration::from_millis(100),
            ..Scripted::default()
        };
        let (host, endpoint) = WorkerHost::spawn(engine).unwrap();
        let rpc = RpcClient::open(endpoint, config().worker_timeout());
        let busy = Arc::new(AtomicBool::new(false));
        let mut first = Orchestrator::new(config(), MemorySource::with_book(), rpc.clone())
            .with_busy_flag(Arc::clone(&busy));
        let mut second = Orchestrator::new(config(), MemorySource::with_book(), rpc)
            .with_busy_flag(Arc::clone(&busy));
        first.open(BOOK).await.unwrap();
        second.open(BOOK).await.unwrap();

        let (a, b) = tokio::join!(first.switch_sheet(1), second.switch_sheet(1));
        assert!(a.unwrap());
        assert!(!b.unwrap());
        assert_eq!(first.active_sheet(), Some(1));
        assert_eq!(second.active_sheet(), Some(0));
        assert_eq!(second.state().stage, LoadStage::Ready);
        assert!(!busy.load(Ordering::SeqCst));
        assert!(!second.is_busy());

        first.teardown();
        second.teardown();
        tokio::task::spawn_blocking(move || host.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_sheet_position_fails() {
        let (mut orch, _host) = start(MemorySource::with_book(), config());
        orch.open(BOOK).await.unwrap();
        assert!(orch.switch_sheet(5).await.is_err());
    }

    #[tokio::test]
    async fn test_scroll_loads_new_region() {
        let (mut orch, _host) = start(MemorySource::with_book(), config());
        orch.open(BOOK).await.unwrap();

        let t0 = tokio::time::Instant::now();
        assert!(orch.on_visible_region(Viewport::new(380, 1, 420, 10), t0));
        let deadline = orch.viewport_deadline().unwrap();
        assert!(!orch.poll_viewport(t0).await.unwrap());
        assert!(orch.poll_viewport(deadline).await.unwrap());

        let ctx = RenderContext::default();
        assert_eq!(orch.resolve_cell(400, 1, &ctx).unwrap().text, "far");
        assert!(orch.resolve_cell(1, 1, &ctx).is_none());
        assert_eq!(orch.state().stage, LoadStage::Ready);
    }
}

// ============================================================================
// Session actor
// ============================================================================

mod sessions {
    use super::*;

    #[tokio::test]
    async fn test_session_round_trip() {
        let (orch, _host) = start(MemorySource::with_book(), config());
        let (handle, task) = session::spawn(orch);

        handle.open(BOOK).unwrap();
        let state = handle
            .wait_for(|s| matches!(s.stage, LoadStage::Ready | LoadStage::Error))
            .await
            .unwrap();
        assert_eq!(state.stage, LoadStage::Ready);

        let sheets = handle.worksheets().await.unwrap();
        assert_eq!(sheets.len(), 2);

        handle.scroll_to(Viewport::new(380, 1, 420, 10)).unwrap();
        let ctx = RenderContext::default();
        let mut far = None;
        for _ in 0..100 {
            far = handle.resolve_cell(400, 1, ctx.clone()).await.unwrap();
            if far.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(far.unwrap().text, "far");

        assert!(handle.switch_sheet(1).await.unwrap());
        let hits = handle
            .search("needle", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        handle.close().unwrap();
        task.await.unwrap();
        assert!(handle.open(BOOK).is_err());
        assert_eq!(handle.state().stage, LoadStage::Idle);
    }

    #[tokio::test]
    async fn test_second_open_abandons_running_load() {
        let other = serde_json::to_vec(&json!({
            "sheets": [{ "name": "Other", "cells": [{ "row": 1, "col": 1, "value": "x" }] }]
        }))
        .unwrap();
        let source = MemorySource::with_book().with_doc("other.json", other);
        let engine = Scripted {
            slow_loads: 1,
            load_delay: Duration::from_millis(300),
            ..Scripted::default()
        };
        let recorder = Arc::new(Recorder::default());
        let (orch, _host) = start_with(engine, source, config());
        let orch = orch.with_diagnostics(Arc::clone(&recorder) as Arc<dyn DiagnosticsSink>);
        let (handle, task) = session::spawn(orch);

        handle.open(BOOK).unwrap();
        handle
            .wait_for(|s| s.stage == LoadStage::Parsing)
            .await
            .unwrap();
        handle.open("other.json").unwrap();

        let state = handle
            .wait_for(|s| matches!(s.stage, LoadStage::Ready | LoadStage::Error))
            .await
            .unwrap();
        assert_eq!(state.stage, LoadStage::Ready);
        let names: Vec<String> = handle
            .worksheets()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["Other".to_string()]);
        assert!(recorder.0.lock().unwrap().is_empty());

        handle.close().unwrap();
        task.await.unwrap();
    }
}
