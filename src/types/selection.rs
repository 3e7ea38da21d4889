use super::{CellAddress, Viewport};

/// Current selection: the anchor cell plus the cell the range extends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub anchor: CellAddress,
    pub focus: CellAddress,
}

impl Selection {
    /// Select a single cell
    pub fn cell(addr: CellAddress) -> Self {
        Self {
            anchor: addr,
            focus: addr,
        }
    }

    /// Extend the selection to a new focus cell, keeping the anchor
    pub fn extend_to(self, focus: CellAddress) -> Self {
        Self { focus, ..self }
    }

    /// Normalized rectangle covered by the selection
    pub fn bounds(&self) -> Viewport {
        Viewport::new(
            self.anchor.row,
            self.anchor.col,
            self.focus.row,
            self.focus.col,
        )
    }
}
