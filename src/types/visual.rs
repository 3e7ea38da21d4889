use serde::{Deserialize, Serialize};

use super::{BorderStyle, DateSystem, HAlign, UnderlineStyle, VAlign};
use crate::numfmt::FormatKind;

/// Everything outside the cell itself that affects how it is drawn.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderContext {
    pub zoom_factor: f64,
    pub dark_mode: bool,
    pub print_mode: bool,
    pub grid_lines_visible: bool,
    pub date_system: DateSystem,
    /// Workbook theme palette; the Office default is used when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub theme_colors: Vec<String>,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            zoom_factor: 1.0,
            dark_mode: false,
            print_mode: false,
            grid_lines_visible: true,
            date_system: DateSystem::Excel1900,
            theme_colors: Vec::new(),
        }
    }
}

impl RenderContext {
    /// Zoom factor with non-finite or non-positive values treated as 100%.
    pub fn zoom(&self) -> f64 {
        if self.zoom_factor.is_finite() && self.zoom_factor > 0.0 {
            self.zoom_factor
        } else {
            1.0
        }
    }

    /// Dark palette applies only on screen.
    pub fn uses_dark_palette(&self) -> bool {
        self.dark_mode && !self.print_mode
    }
}

/// Fully resolved, renderer-ready attributes for one cell.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisualAttributes {
    pub text: String,
    /// `#RRGGBB`
    pub text_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    pub font: ResolvedFont,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h_align: Option<HAlign>,
    pub v_align: VAlign,
    pub wrap: bool,
    /// Indent in pixels, zoom applied
    pub indent: f64,
    pub borders: ResolvedBorders,
    pub format_kind: FormatKind,
    pub is_formula: bool,
    pub is_error: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFont {
    pub family: String,
    /// Size in points, zoom applied
    pub size: f64,
    pub bold: bool,
    pub italic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline: Option<UnderlineStyle>,
    pub strikethrough: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBorders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<ResolvedBorder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<ResolvedBorder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<ResolvedBorder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<ResolvedBorder>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBorder {
    pub style: BorderStyle,
    /// Stroke width in pixels, zoom applied
    pub width: f64,
    pub color: String,
    pub origin: BorderOrigin,
}

/// Whether a border came from the cell style or is the default grid hairline.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BorderOrigin {
    Explicit,
    Gridline,
}
