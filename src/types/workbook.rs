use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CellAddress, RawCell, Viewport};

/// Sheet visibility state
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SheetState {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

/// Workbook-level metadata for one sheet.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorksheetDescriptor {
    pub name: String,
    /// Position of the sheet inside the workbook, hidden sheets included.
    pub index: usize,
    #[serde(default)]
    pub state: SheetState,
}

impl WorksheetDescriptor {
    pub fn is_visible(&self) -> bool {
        self.state == SheetState::Visible
    }
}

/// Workbook date epoch.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DateSystem {
    /// Serial 1 is 1900-01-01, with the phantom 1900-02-29 at serial 60.
    #[default]
    Excel1900,
    /// Serial 0 is 1904-01-01.
    Excel1904,
}

impl DateSystem {
    pub fn from_1904_flag(date1904: bool) -> Self {
        if date1904 {
            Self::Excel1904
        } else {
            Self::Excel1900
        }
    }
}

/// Result of `LOAD_WORKBOOK`.
///
/// Workers may answer with a bare descriptor list or with an object that also
/// carries the date system.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum WorkbookSummary {
    Detailed {
        worksheets: Vec<WorksheetDescriptor>,
        #[serde(default)]
        date1904: bool,
    },
    List(Vec<WorksheetDescriptor>),
}

impl WorkbookSummary {
    pub fn into_parts(self) -> (Vec<WorksheetDescriptor>, DateSystem) {
        match self {
            Self::Detailed {
                worksheets,
                date1904,
            } => (worksheets, DateSystem::from_1904_flag(date1904)),
            Self::List(worksheets) => (worksheets, DateSystem::Excel1900),
        }
    }
}

/// A merged rectangle, 1-based and inclusive.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl MergeRange {
    pub fn contains(&self, addr: CellAddress) -> bool {
        (self.start_row..=self.end_row).contains(&addr.row)
            && (self.start_col..=self.end_col).contains(&addr.col)
    }
}

/// Result of `PROCESS_SHEET`: one viewport's worth of cells plus sheet layout.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SheetBatch {
    #[serde(default)]
    pub cells: Vec<RawCell>,
    /// Explicit row heights in pixels keyed by 1-based row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_heights: Option<BTreeMap<u32, f64>>,
    /// Explicit column widths in pixels keyed by 1-based column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_widths: Option<BTreeMap<u32, f64>>,
    #[serde(default)]
    pub merged_cells: Vec<MergeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_grid_lines: Option<bool>,
    /// Region this batch covers. Filled in by the requester when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
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

    #[test]
    fn test_summary_accepts_bare_list() {
        let summary: WorkbookSummary = serde_json::from_value(json!([
            {"name": "Data", "index": 0},
            {"name": "Secret", "index": 1, "state": "veryHidden"}
        ]))
        .unwrap();
        let (sheets, system) = summary.into_parts();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[1].state, SheetState::VeryHidden);
        assert_eq!(system, DateSystem::Excel1900);
    }

    #[test]
    fn test_summary_accepts_object_with_1904_flag() {
        let summary: WorkbookSummary = serde_json::from_value(json!({
            "worksheets": [{"name": "Mac", "index": 0}],
            "date1904": true
        }))
        .unwrap();
        let (_, system) = summary.into_parts();
        assert_eq!(system, DateSystem::Excel1904);
    }

    #[test]
    fn test_batch_defaults() {
        let batch: SheetBatch = serde_json::from_value(json!({"cells": []})).unwrap();
        assert!(batch.row_heights.is_none());
        assert!(batch.merged_cells.is_empty());
        assert!(batch.show_grid_lines.is_none());
    }
}
