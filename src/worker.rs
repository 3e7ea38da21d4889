//! Document worker host.
//!
//! A [`DocumentEngine`] does the actual parsing. [`WorkerHost::spawn`] runs one
//! on a dedicated OS thread and speaks the JSON protocol over channels, so the
//! control task never blocks on document work.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, ViewerError};
use crate::protocol::{
    CellRangePayload, LoadWorkbookPayload, ProcessSheetPayload, RequestKind, SearchOptions,
    SearchPayload, WorkerEvent, WorkerRequest, WorkerResponse,
};
use crate::resolve::resolve;
use crate::rpc::WorkerEndpoint;
use crate::types::{
    CellAddress, CellValue, MergeRange, RawCell, RenderContext, SheetBatch, SheetState,
    StyleDescriptor, Viewport, WorkbookSummary, WorksheetDescriptor,
};

/// Parser behind the worker protocol.
///
/// Returning [`ViewerError::WorkerFault`] from any method kills the worker;
/// every other error is reported back as an `ERROR` response to that request.
pub trait DocumentEngine: Send + 'static {
    fn load(&mut self, bytes: &[u8]) -> Result<WorkbookSummary>;

    fn process_sheet(&mut self, sheet_index: usize, viewport: Viewport) -> Result<SheetBatch>;

    fn cell_range(&mut self, sheet_index: usize, range: Viewport) -> Result<Vec<RawCell>>;

    fn search(
        &mut self,
        sheet_index: usize,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<CellAddress>>;
}

/// Owns the worker thread.
#[derive(Debug)]
pub struct WorkerHost {
    handle: Option<JoinHandle<()>>,
}

impl WorkerHost {
    /// Start `engine` on its own thread and return the endpoint to talk to it.
    pub fn spawn<E: DocumentEngine>(engine: E) -> Result<(Self, WorkerEndpoint)> {
        let (endpoint, requests, events) = WorkerEndpoint::pair();
        let handle = std::thread::Builder::new()
            .name("sheetview-worker".to_string())
            .spawn(move || run(engine, requests, &events))
            .map_err(|e| ViewerError::WorkerUnavailable(e.to_string()))?;
        Ok((
            Self {
                handle: Some(handle),
            },
            endpoint,
        ))
    }

    /// Wait for the worker thread to exit. It exits once every request
    /// sender is dropped or after a fault.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

fn run<E: DocumentEngine>(
    mut engine: E,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    tracing::debug!("Worker started");
    while let Some(request) = requests.blocking_recv() {
        let (id, kind) = (request.id, request.kind);
        let outcome = catch_unwind(AssertUnwindSafe(|| handle(&mut engine, request)));

        let event = match outcome {
            Ok(Ok(data)) => WorkerEvent::Response(WorkerResponse::success(kind, id, data)),
            Ok(Err(ViewerError::WorkerFault(message))) => WorkerEvent::Fault(message),
            Ok(Err(err)) => WorkerEvent::Response(WorkerResponse::error(id, err.to_string())),
            Err(_) => WorkerEvent::Fault(format!("engine panicked while handling {kind}")),
        };
        let fatal = matches!(event, WorkerEvent::Fault(_));
        if events.send(event).is_err() || fatal {
            break;
        }
    }
    tracing::debug!("Worker stopped");
}

fn handle<E: DocumentEngine>(engine: &mut E, request: WorkerRequest) -> Result<Value> {
    let value = match request.kind {
        RequestKind::LoadWorkbook => {
            let payload: LoadWorkbookPayload = serde_json::from_value(request.data)?;
            serde_json::to_value(engine.load(&payload.bytes)?)?
        }
        RequestKind::ProcessSheet => {
            let payload: ProcessSheetPayload = serde_json::from_value(request.data)?;
            serde_json::to_value(engine.process_sheet(payload.sheet_index, payload.viewport)?)?
        }
        RequestKind::GetCellRange => {
            let payload: CellRangePayload = serde_json::from_value(request.data)?;
            serde_json::to_value(engine.cell_range(payload.sheet_index, payload.range)?)?
        }
        RequestKind::SearchInSheet => {
            let payload: SearchPayload = serde_json::from_value(request.data)?;
            serde_json::to_value(engine.search(
                payload.sheet_index,
                &payload.query,
                payload.options,
            )?)?
        }
    };
    Ok(value)
}

// ============================================================================
// JSON workbook engine
// ============================================================================

/// A workbook stored as JSON: the format read by [`JsonWorkbookEngine`].
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct JsonWorkbook {
    #[serde(default)]
    pub date1904: bool,
    pub sheets: Vec<JsonSheet>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct JsonSheet {
    pub name: String,
    #[serde(default)]
    pub state: SheetState,
    #[serde(default)]
    pub cells: Vec<RawCell>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub row_heights: BTreeMap<u32, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub col_widths: BTreeMap<u32, f64>,
    #[serde(default)]
    pub merged_cells: Vec<MergeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_grid_lines: Option<bool>,
}

/// Engine over [`JsonWorkbook`] documents.
#[derive(Debug, Default)]
pub struct JsonWorkbookEngine {
    workbook: Option<JsonWorkbook>,
}

impl JsonWorkbookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn sheet(&self, index: usize) -> Result<&JsonSheet> {
        let workbook = self
            .workbook
            .as_ref()
            .ok_or_else(|| ViewerError::Parse("No workbook loaded".to_string()))?;
        workbook
            .sheets
            .get(index)
            .ok_or_else(|| ViewerError::Parse(format!("Sheet index {index} out of range")))
    }
}

impl DocumentEngine for JsonWorkbookEngine {
    fn load(&mut self, bytes: &[u8]) -> Result<WorkbookSummary> {
        let workbook: JsonWorkbook = serde_json::from_slice(bytes)
            .map_err(|e| ViewerError::Parse(format!("Unsupported or corrupt workbook: {e}")))?;
        let worksheets = workbook
            .sheets
            .iter()
            .enumerate()
            .map(|(index, sheet)| WorksheetDescriptor {
                name: sheet.name.clone(),
                index,
                state: sheet.state,
            })
            .collect();
        let summary = WorkbookSummary::Detailed {
            worksheets,
            date1904: workbook.date1904,
        };
        tracing::debug!(sheets = workbook.sheets.len(), "Loaded JSON workbook");
        self.workbook = Some(workbook);
        Ok(summary)
    }

    fn process_sheet(&mut self, sheet_index: usize, viewport: Viewport) -> Result<SheetBatch> {
        let sheet = self.sheet(sheet_index)?;
        let merged_cells = sheet
            .merged_cells
            .iter()
            .filter(|m| {
                m.start_row <= viewport.end_row
                    && m.end_row >= viewport.start_row
                    && m.start_col <= viewport.end_col
                    && m.end_col >= viewport.start_col
            })
            .copied()
            .collect();
        Ok(SheetBatch {
            cells: cells_within(sheet, viewport),
            row_heights: Some(sheet.row_heights.clone()).filter(|m| !m.is_empty()),
            col_widths: Some(sheet.col_widths.clone()).filter(|m| !m.is_empty()),
            merged_cells,
            show_grid_lines: sheet.show_grid_lines,
            viewport: Some(viewport),
        })
    }

    fn cell_range(&mut self, sheet_index: usize, range: Viewport) -> Result<Vec<RawCell>> {
        Ok(cells_within(self.sheet(sheet_index)?, range))
    }

    fn search(
        &mut self,
        sheet_index: usize,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<CellAddress>> {
        let sheet = self.sheet(sheet_index)?;
        let date1904 = self.workbook.as_ref().is_some_and(|w| w.date1904);
        let ctx = RenderContext {
            date_system: crate::types::DateSystem::from_1904_flag(date1904),
            ..RenderContext::default()
        };
        let needle = if options.match_case {
            query.to_string()
        } else {
            query.to_lowercase()
        };
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let default_style = StyleDescriptor::default();
        let mut hits: Vec<CellAddress> = sheet
            .cells
            .iter()
            .filter(|raw| {
                let value = CellValue::from_raw(&raw.value);
                let style = raw.style.as_ref().unwrap_or(&default_style);
                let text = resolve(&value, style, &ctx).text;
                let hay = if options.match_case {
                    text
                } else {
                    text.to_lowercase()
                };
                if options.whole_cell {
                    hay == needle
                } else {
                    hay.contains(&needle)
                }
            })
            .map(|raw| CellAddress::new(raw.row, raw.col))
            .collect();
        hits.sort_unstable();
        Ok(hits)
    }
}

fn cells_within(sheet: &JsonSheet, range: Viewport) -> Vec<RawCell> {
    sheet
        .cells
        .iter()
        .filter(|c| range.contains_cell(CellAddress::new(c.row, c.col)))
        .cloned()
        .collect()
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
    use serde_json::json;

    fn sample() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "sheets": [
                {"name": "Data", "cells": [
                    {"row": 1, "col": 1, "value": "Revenue"},
                    {"row": 1, "col": 2, "value": 1234.5, "style": {"numFmt": "$#,##0.00"}},
                    {"row": 40, "col": 3, "value": "revenue total"}
                ], "mergedCells": [{"startRow": 1, "startCol": 4, "endRow": 2, "endCol": 5}]},
                {"name": "Hidden", "state": "hidden"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_load_reports_every_sheet() {
        let mut engine = JsonWorkbookEngine::new();
        let (sheets, _) = engine.load(&sample()).unwrap().into_parts();
        assert_eq!(sheets.len(), 2);
        assert!(!sheets[1].is_visible());
    }

    #[test]
    fn test_process_sheet_filters_to_viewport() {
        let mut engine = JsonWorkbookEngine::new();
        engine.load(&sample()).unwrap();
        let batch = engine.process_sheet(0, Viewport::new(1, 1, 10, 10)).unwrap();
        assert_eq!(batch.cells.len(), 2);
        assert_eq!(batch.merged_cells.len(), 1);
        assert_eq!(batch.viewport, Some(Viewport::new(1, 1, 10, 10)));
    }

    #[test]
    fn test_search_options() {
        let mut engine = JsonWorkbookEngine::new();
        engine.load(&sample()).unwrap();
        let hits = engine.search(0, "revenue", SearchOptions::default()).unwrap();
        assert_eq!(hits, vec![CellAddress::new(1, 1), CellAddress::new(40, 3)]);

        let case = SearchOptions {
            match_case: true,
            ..SearchOptions::default()
        };
        assert_eq!(engine.search(0, "revenue", case).unwrap().len(), 1);

        let whole = SearchOptions {
            whole_cell: true,
            ..SearchOptions::default()
        };
        assert_eq!(engine.search(0, "revenue", whole).unwrap().len(), 1);

        // Searches formatted text, not the raw number
        let hits = engine.search(0, "$1,234", SearchOptions::default()).unwrap();
        assert_eq!(hits, vec![CellAddress::new(1, 2)]);
    }

    #[test]
    fn test_errors_before_load() {
        let mut engine = JsonWorkbookEngine::new();
        let err = engine.process_sheet(0, Viewport::new(1, 1, 1, 1)).unwrap_err();
        assert!(matches!(err, ViewerError::Parse(_)));
        assert!(engine.load(b"not json").is_err());
    }

    #[test]
    fn test_thread_host_answers_requests() {
        let (host, endpoint) = WorkerHost::spawn(JsonWorkbookEngine::new()).unwrap();
        let WorkerEndpoint {
            requests,
            mut events,
        } = endpoint;
        requests
            .send(WorkerRequest {
                kind: RequestKind::LoadWorkbook,
                data: serde_json::to_value(LoadWorkbookPayload { bytes: sample() }).unwrap(),
                id: 1,
            })
            .unwrap();
        let event = events.blocking_recv().unwrap();
        assert!(matches!(
            event,
            WorkerEvent::Response(WorkerResponse::Success { id: 1, .. })
        ));

        drop(requests);
        host.join();
    }
}
