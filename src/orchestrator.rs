//! Sheet orchestrator: download, parse, sheet selection and viewport loads.
//!
//! State flows `Idle -> Downloading -> Parsing -> Rendering -> Ready`, with
//! `Error` reachable from any stage and `Ready -> Rendering` on a sheet switch
//! or viewport reload. The current state and its progress text are published
//! on a `watch` channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cell_store::CellStore;
use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::fetch::{download, DocumentSource};
use crate::protocol::SearchOptions;
use crate::resolve::resolve;
use crate::retry::{retry, RetryPolicy};
use crate::rpc::RpcClient;
use crate::types::{
    CellAddress, DateSystem, RenderContext, Selection, SheetBatch, Viewport, VisualAttributes,
    WorksheetDescriptor,
};
use crate::viewport::{FetchRequest, MemoryState, ViewportController};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadStage {
    #[default]
    Idle,
    Downloading,
    Parsing,
    Rendering,
    Ready,
    Error,
}

impl LoadStage {
    /// Stages in which a document is loading or loaded.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Downloading | Self::Parsing | Self::Rendering | Self::Ready
        )
    }
}

/// Observable load state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadState {
    pub stage: LoadStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether [`Orchestrator::retry`] is offered for the current error
    pub retryable: bool,
}

impl LoadState {
    fn stage(stage: LoadStage, progress: impl Into<String>) -> Self {
        Self {
            stage,
            progress: Some(progress.into()),
            ..Self::default()
        }
    }
}

/// Context attached to fatal error reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub stage: LoadStage,
    pub progress: Option<String>,
    pub document_size: Option<u64>,
    pub kind: &'static str,
    pub message: String,
}

/// Receives fatal error reports.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, report: &DiagnosticReport);
}

/// Logs reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, report: &DiagnosticReport) {
        tracing::error!(
            stage = ?report.stage,
            progress = report.progress.as_deref().unwrap_or(""),
            document_size = report.document_size,
            kind = report.kind,
            "{}",
            report.message
        );
    }
}

/// Cancels whatever load is in flight when the handle is used.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    generation: Arc<AtomicU64>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Ties a load to the generation it started in.
#[derive(Debug)]
struct LoadToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl LoadToken {
    fn check(&self) -> Result<()> {
        if self.current.load(Ordering::SeqCst) == self.generation {
            Ok(())
        } else {
            Err(ViewerError::Cancelled)
        }
    }
}

/// Clears the busy flag when a full-sheet load ends, however it ends.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then(|| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator<S: DocumentSource> {
    config: ViewerConfig,
    source: S,
    rpc: RpcClient,
    diagnostics: Arc<dyn DiagnosticsSink>,
    state: watch::Sender<LoadState>,
    generation: Arc<AtomicU64>,
    busy: Arc<AtomicBool>,

    document: Option<String>,
    document_size: Option<u64>,
    worksheets: Vec<WorksheetDescriptor>,
    /// Positions in `worksheets` of the user-facing sheets
    visible: Vec<usize>,
    date_system: DateSystem,
    active: Option<usize>,

    store: CellStore,
    viewport: ViewportController,
    selection: Option<Selection>,
    search_results: Vec<CellAddress>,
}

impl<S: DocumentSource> Orchestrator<S> {
    pub fn new(config: ViewerConfig, source: S, rpc: RpcClient) -> Self {
        let viewport = ViewportController::new(config.debounce());
        Self {
            config,
            source,
            rpc,
            diagnostics: Arc::new(TracingDiagnostics),
            state: watch::Sender::new(LoadState::default()),
            generation: Arc::new(AtomicU64::new(0)),
            busy: Arc::new(AtomicBool::new(false)),
            document: None,
            document_size: None,
            worksheets: Vec::new(),
            visible: Vec::new(),
            date_system: DateSystem::Excel1900,
            active: None,
            store: CellStore::new(),
            viewport,
            selection: None,
            search_results: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Use `flag` as the full-sheet busy flag. Orchestrators driving the same
    /// worker share one flag so their full-sheet loads never overlap.
    pub fn with_busy_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.busy = flag;
        self
    }

    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.busy)
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            generation: Arc::clone(&self.generation),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }

    /// User-facing sheet list: hidden and very-hidden sheets are left out.
    pub fn worksheets(&self) -> Vec<&WorksheetDescriptor> {
        self.visible
            .iter()
            .filter_map(|&i| self.worksheets.get(i))
            .collect()
    }

    /// Every sheet in the workbook, hidden ones included.
    pub fn all_worksheets(&self) -> &[WorksheetDescriptor] {
        &self.worksheets
    }

    /// Workbook index of the sheet at a user-facing position.
    pub fn internal_index(&self, position: usize) -> Option<usize> {
        let slot = *self.visible.get(position)?;
        self.worksheets.get(slot).map(|w| w.index)
    }

    /// User-facing position of the active sheet.
    pub fn active_sheet(&self) -> Option<usize> {
        self.active
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn search_results(&self) -> &[CellAddress] {
        &self.search_results
    }

    pub fn select_cell(&mut self, addr: CellAddress) {
        self.selection = Some(Selection::cell(addr));
    }

    pub fn extend_selection(&mut self, focus: CellAddress) {
        self.selection = Some(match self.selection {
            Some(sel) => sel.extend_to(focus),
            None => Selection::cell(focus),
        });
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.store.set_zoom(zoom);
    }

    pub fn set_memory_state(&mut self, memory: MemoryState) {
        self.viewport.set_memory_state(memory);
    }

    fn publish(&self, state: LoadState) {
        tracing::debug!(stage = ?state.stage, progress = ?state.progress, "Load state");
        self.state.send_replace(state);
    }

    fn begin_load(&mut self) -> LoadToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        LoadToken {
            generation,
            current: Arc::clone(&self.generation),
        }
    }

    fn current_token(&self) -> LoadToken {
        LoadToken {
            generation: self.generation.load(Ordering::SeqCst),
            current: Arc::clone(&self.generation),
        }
    }

    /// Download and parse a document, then show its first visible sheet.
    ///
    /// Opening the document that is already loading or loaded does nothing.
    /// A superseded load returns [`ViewerError::Cancelled`] without entering
    /// the error state.
    pub async fn open(&mut self, document_id: &str) -> Result<()> {
        let stage = self.state.borrow().stage;
        if self.document.as_deref() == Some(document_id) && stage.is_active() {
            tracing::debug!(document_id, "Document already open");
            return Ok(());
        }

        let token = self.begin_load();
        self.document = Some(document_id.to_string());
        self.document_size = None;
        self.worksheets.clear();
        self.visible.clear();
        self.active = None;
        self.reset_sheet_state();

        let result = self.run_open(document_id, &token).await;
        self.settle(result)
    }

    async fn run_open(&mut self, document_id: &str, token: &LoadToken) -> Result<()> {
        tracing::info!(document_id, "Opening document");
        self.publish(LoadState::stage(LoadStage::Downloading, "Downloading…"));

        let state = &self.state;
        let source = &self.source;
        let limit = self.config.max_payload_bytes;
        let bytes = retry(
            self.config.download_retry,
            ViewerError::is_retryable,
            |next, max, err| {
                tracing::warn!(attempt = next, max, error = %err, "Retrying download");
                state.send_replace(LoadState::stage(
                    LoadStage::Downloading,
                    format!("Retrying download ({next}/{max})…"),
                ));
            },
            |_| download(source, document_id, limit),
        )
        .await?;
        token.check()?;
        self.document_size = u64::try_from(bytes.len()).ok();

        self.publish(LoadState::stage(LoadStage::Parsing, "Parsing workbook…"));
        let rpc = &self.rpc;
        let summary = retry(
            self.config.worker_retry,
            is_worker_timeout,
            |next, max, err| {
                tracing::warn!(attempt = next, max, error = %err, "Retrying workbook parse");
                state.send_replace(LoadState::stage(
                    LoadStage::Parsing,
                    format!("Retrying parse ({next}/{max})…"),
                ));
            },
            |_| rpc.load_workbook(bytes.clone()),
        )
        .await?;
        token.check()?;

        let (worksheets, date_system) = summary.into_parts();
        self.visible = worksheets
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_visible())
            .map(|(slot, _)| slot)
            .collect();
        self.worksheets = worksheets;
        self.date_system = date_system;
        tracing::info!(
            sheets = self.worksheets.len(),
            visible = self.visible.len(),
            "Workbook parsed"
        );
        if self.visible.is_empty() {
            return Err(ViewerError::Parse("Workbook has no visible sheets".to_string()));
        }

        self.load_sheet(0, token).await.map(|_| ())
    }

    /// Show another sheet, by user-facing position.
    ///
    /// Returns `Ok(false)` when a full-sheet load is already running.
    pub async fn switch_sheet(&mut self, position: usize) -> Result<bool> {
        if self.internal_index(position).is_none() {
            return Err(ViewerError::Parse(format!("No sheet at position {position}")));
        }
        let token = self.current_token();
        let result = self.load_sheet(position, &token).await;
        self.settle(result)
    }

    async fn load_sheet(&mut self, position: usize, token: &LoadToken) -> Result<bool> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            tracing::debug!(position, "Full sheet load already running, skipping");
            return Ok(false);
        };
        let Some(sheet_index) = self.internal_index(position) else {
            return Err(ViewerError::Parse(format!("No sheet at position {position}")));
        };
        let name = self
            .visible
            .get(position)
            .and_then(|&slot| self.worksheets.get(slot))
            .map_or_else(String::new, |w| w.name.clone());

        self.reset_sheet_state();
        self.active = Some(position);
        self.publish(LoadState::stage(
            LoadStage::Rendering,
            format!("Loading {name}…"),
        ));

        let request = self.viewport.begin_fetch(self.config.initial_viewport());
        let batch = fetch_batch(
            &self.rpc,
            &self.state,
            self.config.worker_retry,
            sheet_index,
            request.region,
        )
        .await?;
        token.check()?;
        self.apply_batch(&request, batch);

        self.publish(LoadState::stage(LoadStage::Ready, "Ready"));
        Ok(true)
    }

    /// Apply a fetched batch unless a newer fetch already landed.
    fn apply_batch(&mut self, request: &FetchRequest, mut batch: SheetBatch) -> bool {
        if !self.viewport.apply_result(request) {
            tracing::debug!(seq = request.seq, "Discarding stale sheet batch");
            return false;
        }
        batch.viewport = Some(request.region);
        tracing::debug!(cells = batch.cells.len(), region = ?request.region, "Applying sheet batch");
        self.store.replace(batch);
        true
    }

    fn reset_sheet_state(&mut self) {
        self.selection = None;
        self.search_results.clear();
        self.viewport.reset();
        self.store.clear();
    }

    /// Record a visible-region change from scrolling or resizing.
    pub fn on_visible_region(&mut self, region: Viewport, now: Instant) -> bool {
        self.viewport.on_visible_region(region, now)
    }

    /// When the pending scroll debounce fires.
    pub fn viewport_deadline(&self) -> Option<Instant> {
        self.viewport.deadline()
    }

    /// Fire the scroll debounce and load the new region if needed.
    ///
    /// Returns whether a batch was applied.
    pub async fn poll_viewport(&mut self, now: Instant) -> Result<bool> {
        let stage = self.state.borrow().stage;
        let (Some(position), LoadStage::Ready) = (self.active, stage) else {
            return Ok(false);
        };
        let Some(request) = self.viewport.poll(now) else {
            return Ok(false);
        };
        let Some(sheet_index) = self.internal_index(position) else {
            return Ok(false);
        };

        let token = self.current_token();
        self.publish(LoadState::stage(LoadStage::Rendering, "Loading cells…"));
        let result = fetch_batch(
            &self.rpc,
            &self.state,
            self.config.worker_retry,
            sheet_index,
            request.region,
        )
        .await
        .and_then(|batch| token.check().map(|()| batch));

        match result {
            Ok(batch) => {
                let applied = self.apply_batch(&request, batch);
                self.publish(LoadState::stage(LoadStage::Ready, "Ready"));
                Ok(applied)
            }
            Err(err) => self.settle(Err(err)),
        }
    }

    /// Search the active sheet. Failures degrade to an empty result list.
    pub async fn search(&mut self, query: &str, options: SearchOptions) -> Vec<CellAddress> {
        let Some(sheet_index) = self.active.and_then(|p| self.internal_index(p)) else {
            return Vec::new();
        };
        self.search_results = match self.rpc.search(sheet_index, query, options).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, query, "Search failed");
                Vec::new()
            }
        };
        self.search_results.clone()
    }

    /// Retry the last failed open.
    pub async fn retry(&mut self) -> Result<()> {
        let state = self.state();
        if state.stage != LoadStage::Error || !state.retryable {
            return Ok(());
        }
        let Some(document_id) = self.document.take() else {
            return Ok(());
        };
        self.open(&document_id).await
    }

    /// Resolve the cell at a 1-based address for display.
    ///
    /// Absent cells resolve to `None`. The workbook date system and the sheet's
    /// grid-line flag override the corresponding fields of `ctx`.
    pub fn resolve_cell(&self, row: u32, col: u32, ctx: &RenderContext) -> Option<VisualAttributes> {
        let cell = self.store.get(row, col)?;
        let ctx = RenderContext {
            date_system: self.date_system,
            grid_lines_visible: ctx.grid_lines_visible && self.store.show_grid_lines(),
            ..ctx.clone()
        };
        Some(resolve(&cell.value, &cell.style, &ctx))
    }

    /// Abandon the current load without reporting an error.
    pub fn cancel_load(&mut self) {
        self.cancel_handle().cancel();
        self.viewport.cancel();
        if self.state.borrow().stage != LoadStage::Ready {
            self.document = None;
            self.publish(LoadState::default());
        }
    }

    /// Cancel everything and release the worker.
    pub fn teardown(&mut self) {
        self.cancel_handle().cancel();
        self.viewport.cancel();
        self.rpc.close();
        self.document = None;
        self.publish(LoadState::default());
    }

    /// Turn a load outcome into the published state.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if err.is_cancellation() {
            tracing::debug!("Load cancelled");
            return Err(err);
        }

        let previous = self.state();
        let retryable = !matches!(err, ViewerError::WorkerFault(_) | ViewerError::WorkerUnavailable(_));
        self.diagnostics.report(&DiagnosticReport {
            stage: previous.stage,
            progress: previous.progress,
            document_size: self.document_size,
            kind: err.kind(),
            message: err.to_string(),
        });
        self.publish(LoadState {
            stage: LoadStage::Error,
            progress: None,
            error: Some(err.to_string()),
            retryable,
        });
        Err(err)
    }
}

/// `PROCESS_SHEET` under the worker retry policy, publishing retry progress.
async fn fetch_batch(
    rpc: &RpcClient,
    state: &watch::Sender<LoadState>,
    policy: RetryPolicy,
    sheet_index: usize,
    region: Viewport,
) -> Result<SheetBatch> {
    retry(
        policy,
        is_worker_timeout,
        |next, max, err| {
            tracing::warn!(attempt = next, max, error = %err, "Retrying sheet load");
            state.send_replace(LoadState::stage(
                LoadStage::Rendering,
                format!("Retrying sheet load ({next}/{max})…"),
            ));
        },
        |_| rpc.process_sheet(sheet_index, region),
    )
    .await
}

fn is_worker_timeout(err: &ViewerError) -> bool {
    matches!(err, ViewerError::WorkerTimeout { .. })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_guard_check_and_skip() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(first);
        assert!(BusyGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_token_invalidated_by_cancel() {
        let current = Arc::new(AtomicU64::new(3));
        let token = LoadToken {
            generation: 3,
            current: Arc::clone(&current),
        };
        assert!(token.check().is_ok());
        CancelHandle {
            generation: current,
        }
        .cancel();
        assert!(matches!(token.check(), Err(ViewerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_stale_batch_is_not_applied() {
        use crate::fetch::FileSource;
        use crate::rpc::WorkerEndpoint;
        use crate::types::RawCell;

        let (endpoint, _requests, _events) = WorkerEndpoint::pair();
        let rpc = RpcClient::open(endpoint, std::time::Duration::from_secs(1));
        let mut orch = Orchestrator::new(ViewerConfig::default(), FileSource::new(), rpc);

        let stale = orch.viewport.begin_fetch(Viewport::new(1, 1, 10, 10));
        let fresh = orch.viewport.begin_fetch(Viewport::new(300, 1, 310, 10));
        assert!(orch.apply_batch(&fresh, SheetBatch::default()));

        let late = SheetBatch {
            cells: vec![RawCell {
                row: 1,
                col: 1,
                value: serde_json::json!("old"),
                style: None,
            }],
            ..SheetBatch::default()
        };
        assert!(!orch.apply_batch(&stale, late));
        assert!(orch.store().get(1, 1).is_none());
        assert_eq!(orch.store().loaded_region(), Some(fresh.region));
    }

    #[test]
    fn test_active_stages() {
        assert!(LoadStage::Ready.is_active());
        assert!(!LoadStage::Error.is_active());
        assert!(!LoadStage::Idle.is_active());
    }
}
