//! Viewport loading and cell store tests
//!
//! Scroll events through the debounce controller, and the batches they load
//! through the cell store.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use sheetview::cell_store::{CellStore, DEFAULT_ROW_HEIGHT, MIN_COLS, MIN_ROWS};
use sheetview::viewport::{FetchRequest, MemoryState, ViewportController, DEFAULT_DEBOUNCE};
use sheetview::{CellAddress, MergeRange, RawCell, SheetBatch, Viewport};
use tokio::time::Instant;

fn raw(row: u32, col: u32, value: serde_json::Value) -> RawCell {
    RawCell {
        row,
        col,
        value,
        style: None,
    }
}

fn loaded(region: Viewport) -> ViewportController {
    let mut vc = ViewportController::default();
    assert!(vc.apply_result(&FetchRequest {
        seq: 1,
        visible: region,
        region,
    }));
    vc
}

// ============================================================================
// Viewport controller
// ============================================================================

mod controller {
    use super::*;

    #[test]
    fn test_contained_region_triggers_no_fetch() {
        let t0 = Instant::now();
        let mut vc = loaded(Viewport::new(0, 0, 1000, 50));
        vc.on_visible_region(Viewport::new(200, 1, 600, 20), t0);
        assert!(vc.poll(t0 + DEFAULT_DEBOUNCE).is_none());
        assert!(!vc.is_pending());
    }

    #[test]
    fn test_duplicate_region_fetches_once() {
        let t0 = Instant::now();
        let mut vc = ViewportController::default();
        let region = Viewport::new(1, 1, 40, 12);

        assert!(vc.on_visible_region(region, t0));
        assert!(!vc.on_visible_region(region, t0 + Duration::from_millis(50)));
        let fetch = vc.poll(t0 + DEFAULT_DEBOUNCE).unwrap();
        assert_eq!(fetch.visible, region);
        assert!(vc.apply_result(&fetch));

        assert!(!vc.on_visible_region(region, t0 + Duration::from_secs(1)));
        assert!(vc.poll(t0 + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn test_newer_event_replaces_pending_deadline() {
        let t0 = Instant::now();
        let mut vc = ViewportController::new(Duration::from_millis(200));
        vc.on_visible_region(Viewport::new(1, 1, 40, 12), t0);
        let later = t0 + Duration::from_millis(150);
        vc.on_visible_region(Viewport::new(300, 1, 340, 12), later);
        assert_eq!(vc.deadline(), Some(later + Duration::from_millis(200)));
        assert!(vc.poll(t0 + Duration::from_millis(250)).is_none());
        assert_eq!(
            vc.poll(later + Duration::from_millis(200)).unwrap().visible,
            Viewport::new(300, 1, 340, 12)
        );
    }

    #[test]
    fn test_edge_outside_loaded_region_reloads() {
        let vc = loaded(Viewport::new(1, 1, 150, 56));
        assert!(!vc.needs_reload(Viewport::new(1, 1, 150, 56)));
        assert!(vc.needs_reload(Viewport::new(1, 1, 151, 56)));
        assert!(vc.needs_reload(Viewport::new(1, 1, 150, 57)));
    }

    #[test]
    fn test_critical_memory_uses_smallest_buffer() {
        let mut vc = ViewportController::default();
        vc.set_memory_state(MemoryState::Critical);
        let fetch = vc.begin_fetch(Viewport::new(100, 40, 140, 50));
        assert_eq!(fetch.region, Viewport::new(70, 25, 170, 65));
    }
}

// ============================================================================
// Cell store
// ============================================================================

mod store {
    use super::*;

    fn batch() -> SheetBatch {
        SheetBatch {
            cells: vec![
                raw(1, 1, json!("Name")),
                raw(1, 2, json!(42)),
                raw(3, 1, json!({ "formula": "SUM(B1:B2)", "result": 42 })),
            ],
            row_heights: Some(BTreeMap::from([(2, 40.0)])),
            col_widths: Some(BTreeMap::from([(30, 80.0)])),
            merged_cells: vec![MergeRange {
                start_row: 1,
                start_col: 1,
                end_row: 2,
                end_col: 2,
            }],
            show_grid_lines: Some(false),
            viewport: Some(Viewport::new(1, 1, 150, 56)),
        }
    }

    #[test]
    fn test_absent_lookup_is_none() {
        let mut store = CellStore::new();
        assert!(store.get(1, 1).is_none());
        store.replace(batch());
        assert!(store.get(2, 2).is_none());
        assert!(store.get(0, 0).is_none());
        assert!(store.get_at(CellAddress::new(1, 2)).is_some());
    }

    #[test]
    fn test_replace_is_idempotent() {
        let mut store = CellStore::new();
        store.replace(batch());
        let first: Vec<_> = store
            .cells_in(Viewport::new(1, 1, 10, 10))
            .iter()
            .map(|c| (c.row, c.col, c.value.clone()))
            .collect();
        store.replace(batch());
        let second: Vec<_> = store
            .cells_in(Viewport::new(1, 1, 10, 10))
            .iter()
            .map(|c| (c.row, c.col, c.value.clone()))
            .collect();
        assert_eq!(first, second);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_extents_and_layout() {
        let mut store = CellStore::new();
        store.replace(batch());
        assert_eq!(store.total_rows(), MIN_ROWS + 1);
        assert_eq!(store.total_cols(), MIN_COLS.max(30) + 1);
        assert!(!store.show_grid_lines());
        assert_eq!(store.row_offset(3), DEFAULT_ROW_HEIGHT + 40.0);
    }

    #[test]
    fn test_reversed_wire_viewport_is_normalized() {
        let mut store = CellStore::new();
        store.replace(batch());
        let range: Viewport = serde_json::from_value(json!({
            "startRow": 10, "startCol": 5, "endRow": 1, "endCol": 1
        }))
        .unwrap();
        assert_eq!(range, Viewport::new(1, 1, 10, 5));
        assert_eq!(store.cells_in(range).len(), 3);
    }

    #[test]
    fn test_merge_geometry_follows_zoom() {
        let mut store = CellStore::new();
        store.replace(batch());
        let rect = store.merge_geometry()[0];
        assert_eq!((rect.x, rect.y), (0.0, 0.0));
        assert_eq!(rect.height, DEFAULT_ROW_HEIGHT + 40.0);

        store.set_zoom(2.0);
        let zoomed = store.merge_geometry()[0];
        assert_eq!(zoomed.height, rect.height * 2.0);
        assert_eq!(zoomed.width, rect.width * 2.0);
        assert!(store.merge_at(CellAddress::new(2, 2)).is_some());
        assert!(store.merge_at(CellAddress::new(3, 1)).is_none());
    }
}
