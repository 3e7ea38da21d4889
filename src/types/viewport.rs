use serde::{Deserialize, Serialize};

use super::CellAddress;

/// Rectangular (row, col) range, inclusive on both ends.
///
/// Invariant: `start_row <= end_row` and `start_col <= end_col`. Coordinates are
/// unsigned, so they clamp at zero.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", from = "RawViewport")]
pub struct Viewport {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

/// Wire shape of a [`Viewport`]; corners are normalized on the way in.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawViewport {
    start_row: u32,
    start_col: u32,
    end_row: u32,
    end_col: u32,
}

impl From<RawViewport> for Viewport {
    fn from(raw: RawViewport) -> Self {
        Self::new(raw.start_row, raw.start_col, raw.end_row, raw.end_col)
    }
}

impl Viewport {
    /// Create a viewport, swapping corners if they arrive reversed.
    pub fn new(start_row: u32, start_col: u32, end_row: u32, end_col: u32) -> Self {
        Self {
            start_row: start_row.min(end_row),
            start_col: start_col.min(end_col),
            end_row: start_row.max(end_row),
            end_col: start_col.max(end_col),
        }
    }

    /// Create a viewport from signed coordinates, clamping negatives to zero.
    pub fn from_signed(start_row: i64, start_col: i64, end_row: i64, end_col: i64) -> Self {
        Self::new(
            clamp_coord(start_row),
            clamp_coord(start_col),
            clamp_coord(end_row),
            clamp_coord(end_col),
        )
    }

    /// True when `other` lies entirely inside this viewport.
    pub fn contains(&self, other: &Self) -> bool {
        other.start_row >= self.start_row
            && other.end_row <= self.end_row
            && other.start_col >= self.start_col
            && other.end_col <= self.end_col
    }

    pub fn contains_cell(&self, addr: CellAddress) -> bool {
        (self.start_row..=self.end_row).contains(&addr.row)
            && (self.start_col..=self.end_col).contains(&addr.col)
    }

    /// Grow on every side by the given amounts, clamping at zero.
    pub fn expand(&self, rows: u32, cols: u32) -> Self {
        Self {
            start_row: self.start_row.saturating_sub(rows),
            start_col: self.start_col.saturating_sub(cols),
            end_row: self.end_row.saturating_add(rows),
            end_col: self.end_col.saturating_add(cols),
        }
    }

    pub fn row_count(&self) -> u32 {
        self.end_row.saturating_sub(self.start_row).saturating_add(1)
    }

    pub fn col_count(&self) -> u32 {
        self.end_col.saturating_sub(self.start_col).saturating_add(1)
    }
}

fn clamp_coord(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_corners() {
        let v = Viewport::new(10, 5, 2, 1);
        assert_eq!(v, Viewport::new(2, 1, 10, 5));
        assert_eq!(v.row_count(), 9);
        assert_eq!(v.col_count(), 5);
    }

    #[test]
    fn test_deserialize_normalizes_corners() {
        let v: Viewport =
            serde_json::from_str(r#"{"startRow":10,"startCol":4,"endRow":2,"endCol":1}"#).unwrap();
        assert_eq!(v, Viewport::new(2, 1, 10, 4));
        assert_eq!(v.row_count(), 9);
    }

    #[test]
    fn test_full_range_counts_saturate() {
        let v = Viewport::new(0, 0, u32::MAX, u32::MAX);
        assert_eq!(v.row_count(), u32::MAX);
        assert_eq!(v.col_count(), u32::MAX);
    }

    #[test]
    fn test_negative_coordinates_clamp() {
        let v = Viewport::from_signed(-5, -1, 20, 3);
        assert_eq!(v, Viewport::new(0, 0, 20, 3));
    }

    #[test]
    fn test_containment() {
        let loaded = Viewport::new(0, 0, 1000, 50);
        assert!(loaded.contains(&Viewport::new(200, 0, 600, 20)));
        assert!(!loaded.contains(&Viewport::new(900, 0, 1100, 20)));
        assert!(!loaded.contains(&Viewport::new(0, 10, 10, 51)));
    }

    #[test]
    fn test_expand_saturates_at_zero() {
        let v = Viewport::new(10, 2, 20, 4).expand(100, 30);
        assert_eq!(v, Viewport::new(0, 0, 120, 34));
    }
}
