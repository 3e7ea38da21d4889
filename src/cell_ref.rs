//! Utilities for parsing and formatting A1-style cell references and ranges.
//!
//! Addresses are 1-based, matching the cell store.

use crate::error::{Result, ViewerError};
use crate::types::{CellAddress, Viewport};

/// Parse a cell reference like "B3" or "$B$3" into a 1-based address.
pub fn parse_cell_ref(cell_ref: &str) -> Option<CellAddress> {
    let mut col: u32 = 0;
    let mut row: u32 = 0;
    let mut saw_col = false;
    let mut saw_row = false;

    for ch in cell_ref.trim().chars() {
        match ch {
            '$' => {}
            'A'..='Z' | 'a'..='z' if !saw_row => {
                let digit = u32::from(ch.to_ascii_uppercase()) - u32::from('A') + 1;
                col = col.checked_mul(26)?.checked_add(digit)?;
                saw_col = true;
            }
            '0'..='9' if saw_col => {
                row = row.checked_mul(10)?.checked_add(ch.to_digit(10)?)?;
                saw_row = true;
            }
            _ => return None,
        }
    }

    (saw_col && saw_row && row > 0).then(|| CellAddress::new(row, col))
}

/// Parse a range like "A1:J40" (or a single cell) into a viewport.
pub fn parse_cell_range(range: &str) -> Option<Viewport> {
    let (start, end) = range.split_once(':').unwrap_or((range, range));
    let start = parse_cell_ref(start)?;
    let end = parse_cell_ref(end)?;
    Some(Viewport::new(start.row, start.col, end.row, end.col))
}

/// Like [`parse_cell_range`] but with a descriptive error.
pub fn require_cell_range(range: &str) -> Result<Viewport> {
    parse_cell_range(range).ok_or_else(|| ViewerError::CellRef(range.to_string()))
}

/// Column letters for a 1-based column index (1 = "A", 27 = "AA").
pub fn column_name(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(char::from(b'A' + u8::try_from(rem).unwrap_or(0)));
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Format a 1-based address as "B3".
pub fn format_cell_ref(addr: CellAddress) -> String {
    format!("{}{}", column_name(addr.col), addr.row)
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
    use test_case::test_case;

    #[test_case("A1", 1, 1)]
    #[test_case("b3", 3, 2)]
    #[test_case("$Z$10", 10, 26)]
    #[test_case("AA100", 100, 27)]
    #[test_case("XFD1048576", 1_048_576, 16_384)]
    fn test_parse_cell_ref(input: &str, row: u32, col: u32) {
        assert_eq!(parse_cell_ref(input), Some(CellAddress::new(row, col)));
    }

    #[test_case("")]
    #[test_case("A")]
    #[test_case("12")]
    #[test_case("A0")]
    #[test_case("1A")]
    #[test_case("A1B")]
    fn test_parse_cell_ref_rejects(input: &str) {
        assert_eq!(parse_cell_ref(input), None);
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_cell_range("A1:J40"), Some(Viewport::new(1, 1, 40, 10)));
        assert_eq!(parse_cell_range("J40:A1"), Some(Viewport::new(1, 1, 40, 10)));
        assert_eq!(parse_cell_range("C5"), Some(Viewport::new(5, 3, 5, 3)));
        assert!(matches!(
            require_cell_range("nope"),
            Err(ViewerError::CellRef(_))
        ));
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_name(1), "A");
        assert_eq!(column_name(26), "Z");
        assert_eq!(column_name(27), "AA");
        assert_eq!(column_name(702), "ZZ");
        assert_eq!(column_name(703), "AAA");
        assert_eq!(format_cell_ref(CellAddress::new(3, 2)), "B3");
    }
}
