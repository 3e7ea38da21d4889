//! Keyed storage for the currently loaded region of a sheet.
//!
//! The store is rebuilt wholesale from each [`SheetBatch`]; cells are never
//! patched in place. Lookups are O(1) through a composite `u64` key, and sheet
//! geometry (offsets, extents, merged rectangles) is derived from sparse sizing
//! maps.

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};

use crate::types::{Cell, CellAddress, MergeRange, SheetBatch, Viewport};

/// Default column width in pixels at 100% zoom
pub const DEFAULT_COL_WIDTH: f64 = 64.0;

/// Default row height in pixels at 100% zoom
pub const DEFAULT_ROW_HEIGHT: f64 = 20.0;

/// Minimum number of rows reported by [`CellStore::total_rows`]
pub const MIN_ROWS: u32 = 100;

/// Minimum number of columns reported by [`CellStore::total_cols`]
pub const MIN_COLS: u32 = 26;

/// Collision-free key: row in the high 32 bits, column in the low 32.
#[inline]
pub const fn cell_key(row: u32, col: u32) -> u64 {
    ((row as u64) << 32) | col as u64
}

/// Pixel rectangle covered by a merged range, zoom applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeRect {
    pub range: MergeRange,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Default)]
pub struct CellStore {
    cells: HashMap<u64, Cell>,
    row_heights: BTreeMap<u32, f64>,
    col_widths: BTreeMap<u32, f64>,
    merges: Vec<MergeRange>,
    show_grid_lines: bool,
    loaded: Option<Viewport>,
    zoom: f64,
    max_cell_row: u32,
    max_cell_col: u32,
    merge_geometry: OnceCell<Vec<MergeRect>>,
}

impl CellStore {
    pub fn new() -> Self {
        Self {
            show_grid_lines: true,
            zoom: 1.0,
            ..Self::default()
        }
    }

    /// Replace everything with the contents of a freshly loaded batch.
    pub fn replace(&mut self, batch: SheetBatch) {
        self.cells.clear();
        self.max_cell_row = 0;
        self.max_cell_col = 0;
        self.cells.reserve(batch.cells.len());
        for raw in batch.cells {
            let cell = Cell::from_raw(raw);
            self.max_cell_row = self.max_cell_row.max(cell.row);
            self.max_cell_col = self.max_cell_col.max(cell.col);
            self.cells.insert(cell_key(cell.row, cell.col), cell);
        }
        self.row_heights = batch.row_heights.unwrap_or_default();
        self.col_widths = batch.col_widths.unwrap_or_default();
        self.merges = batch.merged_cells;
        self.show_grid_lines = batch.show_grid_lines.unwrap_or(true);
        self.loaded = batch.viewport;
        self.merge_geometry = OnceCell::new();
    }

    /// Drop all cells and layout, keeping the zoom factor.
    pub fn clear(&mut self) {
        let zoom = self.zoom;
        *self = Self::new();
        self.zoom = zoom;
    }

    /// Cell at a 1-based address. `None` means no cell was loaded there.
    pub fn get(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&cell_key(row, col))
    }

    pub fn get_at(&self, addr: CellAddress) -> Option<&Cell> {
        self.get(addr.row, addr.col)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Region covered by the last batch, if it reported one.
    pub fn loaded_region(&self) -> Option<Viewport> {
        self.loaded
    }

    pub fn show_grid_lines(&self) -> bool {
        self.show_grid_lines
    }

    /// Cells inside `range`, in row-major order.
    pub fn cells_in(&self, range: Viewport) -> Vec<&Cell> {
        let area = u64::from(range.row_count()) * u64::from(range.col_count());
        if area <= u64::try_from(self.cells.len()).unwrap_or(u64::MAX) {
            (range.start_row..=range.end_row)
                .flat_map(|row| (range.start_col..=range.end_col).map(move |col| (row, col)))
                .filter_map(|(row, col)| self.get(row, col))
                .collect()
        } else {
            let mut found: Vec<&Cell> = self
                .cells
                .values()
                .filter(|c| range.contains_cell(c.address()))
                .collect();
            found.sort_unstable_by_key(|c| (c.row, c.col));
            found
        }
    }

    /// Total rows: the larger of the default minimum, the highest sized row and
    /// the highest populated row, plus one.
    pub fn total_rows(&self) -> u32 {
        let sized = self.row_heights.keys().next_back().copied().unwrap_or(0);
        MIN_ROWS.max(sized).max(self.max_cell_row).saturating_add(1)
    }

    /// Total columns, computed like [`Self::total_rows`].
    pub fn total_cols(&self) -> u32 {
        let sized = self.col_widths.keys().next_back().copied().unwrap_or(0);
        MIN_COLS.max(sized).max(self.max_cell_col).saturating_add(1)
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        if (zoom - self.zoom).abs() > f64::EPSILON {
            self.zoom = zoom;
            self.merge_geometry = OnceCell::new();
        }
    }

    pub fn set_row_height(&mut self, row: u32, height: f64) {
        self.row_heights.insert(row, height.max(0.0));
        self.merge_geometry = OnceCell::new();
    }

    pub fn set_col_width(&mut self, col: u32, width: f64) {
        self.col_widths.insert(col, width.max(0.0));
        self.merge_geometry = OnceCell::new();
    }

    /// Row height in pixels, zoom applied.
    pub fn row_height(&self, row: u32) -> f64 {
        self.row_heights.get(&row).copied().unwrap_or(DEFAULT_ROW_HEIGHT) * self.zoom
    }

    /// Column width in pixels, zoom applied.
    pub fn col_width(&self, col: u32) -> f64 {
        self.col_widths.get(&col).copied().unwrap_or(DEFAULT_COL_WIDTH) * self.zoom
    }

    /// Y of the top edge of a 1-based row.
    pub fn row_offset(&self, row: u32) -> f64 {
        sparse_offset(&self.row_heights, row, DEFAULT_ROW_HEIGHT) * self.zoom
    }

    /// X of the left edge of a 1-based column.
    pub fn col_offset(&self, col: u32) -> f64 {
        sparse_offset(&self.col_widths, col, DEFAULT_COL_WIDTH) * self.zoom
    }

    pub fn merges(&self) -> &[MergeRange] {
        &self.merges
    }

    /// Merged range covering an address, if any.
    pub fn merge_at(&self, addr: CellAddress) -> Option<&MergeRange> {
        self.merges.iter().find(|m| m.contains(addr))
    }

    /// Pixel rectangles for every merged range, recomputed after any sizing
    /// or zoom change.
    pub fn merge_geometry(&self) -> &[MergeRect] {
        self.merge_geometry.get_or_init(|| {
            self.merges
                .iter()
                .map(|&range| {
                    let x = self.col_offset(range.start_col);
                    let y = self.row_offset(range.start_row);
                    MergeRect {
                        range,
                        x,
                        y,
                        width: self.col_offset(range.end_col.saturating_add(1)) - x,
                        height: self.row_offset(range.end_row.saturating_add(1)) - y,
                    }
                })
                .collect()
        })
    }
}

/// Sum of sizes for indices `1..index`, treating missing entries as `default`.
fn sparse_offset(sizes: &BTreeMap<u32, f64>, index: u32, default: f64) -> f64 {
    let preceding = index.saturating_sub(1);
    let adjustment: f64 = sizes.range(1..index).map(|(_, size)| size - default).sum();
    f64::from(preceding) * default + adjustment
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::types::{CellValue, RawCell};
    use serde_json::json;

    fn raw(row: u32, col: u32, value: serde_json::Value) -> RawCell {
        RawCell {
            row,
            col,
            value,
            style: None,
        }
    }

    #[test]
    fn test_key_is_collision_free() {
        assert_ne!(cell_key(1, 2), cell_key(2, 1));
        assert_ne!(cell_key(0, u32::MAX), cell_key(1, 0));
    }

    #[test]
    fn test_absent_vs_empty() {
        let mut store = CellStore::new();
        store.replace(SheetBatch {
            cells: vec![raw(2, 2, json!(null))],
            ..SheetBatch::default()
        });
        assert!(store.get(1, 1).is_none());
        let empty = store.get(2, 2).unwrap();
        assert_eq!(empty.value, CellValue::Empty);
    }

    #[test]
    fn test_extents_use_minimums() {
        let store = CellStore::new();
        assert_eq!(store.total_rows(), 101);
        assert_eq!(store.total_cols(), 27);
    }

    #[test]
    fn test_extents_follow_cells_and_sizing() {
        let mut store = CellStore::new();
        store.replace(SheetBatch {
            cells: vec![raw(250, 3, json!(1))],
            col_widths: Some(BTreeMap::from([(40, 100.0)])),
            ..SheetBatch::default()
        });
        assert_eq!(store.total_rows(), 251);
        assert_eq!(store.total_cols(), 41);
    }

    #[test]
    fn test_offsets_with_sparse_sizes() {
        let mut store = CellStore::new();
        store.replace(SheetBatch {
            row_heights: Some(BTreeMap::from([(2, 40.0)])),
            ..SheetBatch::default()
        });
        assert_eq!(store.row_offset(1), 0.0);
        assert_eq!(store.row_offset(2), 20.0);
        assert_eq!(store.row_offset(3), 60.0);
        assert_eq!(store.col_offset(3), 128.0);

        store.set_zoom(2.0);
        assert_eq!(store.row_offset(3), 120.0);
        assert_eq!(store.row_height(2), 80.0);
    }

    #[test]
    fn test_merge_geometry_invalidated() {
        let mut store = CellStore::new();
        store.replace(SheetBatch {
            merged_cells: vec![MergeRange {
                start_row: 1,
                start_col: 1,
                end_row: 2,
                end_col: 2,
            }],
            ..SheetBatch::default()
        });
        let rect = store.merge_geometry()[0];
        assert_eq!((rect.width, rect.height), (128.0, 40.0));

        store.set_col_width(1, 100.0);
        let rect = store.merge_geometry()[0];
        assert_eq!(rect.width, 164.0);

        store.set_zoom(0.5);
        let rect = store.merge_geometry()[0];
        assert_eq!((rect.width, rect.height), (82.0, 20.0));
        assert!(store.merge_at(CellAddress::new(2, 1)).is_some());
        assert!(store.merge_at(CellAddress::new(3, 1)).is_none());
    }

    #[test]
    fn test_cells_in_row_major() {
        let mut store = CellStore::new();
        store.replace(SheetBatch {
            cells: vec![
                raw(2, 1, json!("c")),
                raw(1, 2, json!("b")),
                raw(1, 1, json!("a")),
                raw(50, 50, json!("far")),
            ],
            ..SheetBatch::default()
        });
        let order: Vec<_> = store
            .cells_in(Viewport::new(1, 1, 10, 10))
            .iter()
            .map(|c| (c.row, c.col))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 1)]);
        assert_eq!(store.cells_in(Viewport::new(1, 1, 1, 1)).len(), 1);
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut store = CellStore::new();
        store.replace(SheetBatch {
            cells: vec![raw(1, 1, json!(1))],
            show_grid_lines: Some(false),
            ..SheetBatch::default()
        });
        store.replace(SheetBatch {
            cells: vec![raw(5, 5, json!(2))],
            ..SheetBatch::default()
        });
        assert!(store.get(1, 1).is_none());
        assert!(store.get(5, 5).is_some());
        assert!(store.show_grid_lines());
    }
}
