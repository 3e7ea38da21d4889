//! Color resolution utilities
//!
//! Handles theme colors, indexed colors, RGB, and tint/shade calculations.

use crate::types::ColorSpec;

/// Excel's 64 indexed colors (legacy palette)
pub const INDEXED_COLORS: [&str; 64] = [
    "#000000", "#FFFFFF", "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF",
    "#000000", "#FFFFFF", "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF",
    "#800000", "#008000", "#000080", "#808000", "#800080", "#008080", "#C0C0C0", "#808080",
    "#9999FF", "#993366", "#FFFFCC", "#CCFFFF", "#660066", "#FF8080", "#0066CC", "#CCCCFF",
    "#000080", "#FF00FF", "#FFFF00", "#00FFFF", "#800080", "#800000", "#008080", "#0000FF",
    "#00CCFF", "#CCFFFF", "#CCFFCC", "#FFFF99", "#99CCFF", "#FF99CC", "#CC99FF", "#FFCC99",
    "#3366FF", "#33CCCC", "#99CC00", "#FFCC00", "#FF9900", "#FF6600", "#666699", "#969696",
    "#003366", "#339966", "#003300", "#333300", "#993300", "#993366", "#333399", "#333333",
];

/// Default theme colors (Office theme) used when the workbook carries none
///
/// 0: lt1, 1: dk1, 2: lt2, 3: dk2, 4-9: accent1-6, 10: hlink, 11: folHlink
pub const DEFAULT_THEME_COLORS: [&str; 12] = [
    "#FFFFFF", "#000000", "#E7E6E6", "#44546A", "#4472C4", "#ED7D31", "#A5A5A5", "#FFC000",
    "#5B9BD5", "#70AD47", "#0563C1", "#954F72",
];

/// RGB color with u8 components for tint math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `RRGGBB` or `AARRGGBB`, with or without `#`. Alpha is discarded.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        let hex = match hex.len() {
            8 => hex.get(2..)?,
            6 => hex,
            _ => return None,
        };
        let r = u8::from_str_radix(hex.get(0..2)?, 16).ok()?;
        let g = u8::from_str_radix(hex.get(2..4)?, 16).ok()?;
        let b = u8::from_str_radix(hex.get(4..6)?, 16).ok()?;
        Some(Self { r, g, b })
    }

    /// `#RRGGBB`, uppercase
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Blend toward white. 0.0 = unchanged, 1.0 = white.
    pub fn lighten(self, factor: f64) -> Self {
        Self {
            r: Self::blend_component(self.r, 255, factor),
            g: Self::blend_component(self.g, 255, factor),
            b: Self::blend_component(self.b, 255, factor),
        }
    }

    /// Blend toward black. 0.0 = unchanged, 1.0 = black.
    pub fn darken(self, factor: f64) -> Self {
        Self {
            r: Self::blend_component(self.r, 0, factor),
            g: Self::blend_component(self.g, 0, factor),
            b: Self::blend_component(self.b, 0, factor),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn blend_component(from: u8, to: u8, factor: f64) -> u8 {
        let from = f64::from(from);
        let to = f64::from(to);
        let blended = from + (to - from) * factor.clamp(0.0, 1.0);
        blended.clamp(0.0, 255.0).round() as u8
    }
}

/// Resolve a `ColorSpec` to an #RRGGBB string
///
/// Priority: rgb > theme (+tint) > indexed. An empty theme palette falls back to
/// [`DEFAULT_THEME_COLORS`].
pub fn resolve_color(color: &ColorSpec, theme_colors: &[String]) -> Option<String> {
    if let Some(rgb) = &color.rgb {
        if let Some(parsed) = Rgb::from_hex(rgb) {
            return Some(parsed.to_hex());
        }
    }

    if let Some(theme_idx) = color.theme {
        let idx = theme_idx as usize;
        let base = theme_colors
            .get(idx)
            .map(String::as_str)
            .or_else(|| DEFAULT_THEME_COLORS.get(idx).copied())?;
        return match color.tint {
            Some(tint) => apply_tint(base, tint),
            None => Rgb::from_hex(base).map(Rgb::to_hex),
        };
    }

    if let Some(indexed) = color.indexed {
        // 64 is "system foreground"
        if indexed == 64 {
            return Some("#000000".to_string());
        }
        return INDEXED_COLORS
            .get(indexed as usize)
            .map(|c| (*c).to_string());
    }

    None
}

/// Apply a tint value to a color
///
/// Positive tints blend linearly toward white, negative toward black.
pub fn apply_tint(hex_color: &str, tint: f64) -> Option<String> {
    let base = Rgb::from_hex(hex_color)?;
    let tinted = if tint < 0.0 {
        base.darken(-tint)
    } else {
        base.lighten(tint)
    };
    Some(tinted.to_hex())
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

    #[test]
    fn test_tint_lighten() {
        assert_eq!(apply_tint("#000000", 0.5).unwrap(), "#808080");
    }

    #[test]
    fn test_tint_darken() {
        assert_eq!(apply_tint("#FFFFFF", -0.5).unwrap(), "#808080");
    }

    #[test]
    fn test_tint_is_linear() {
        // accent1 #4472C4 lightened 40%
        assert_eq!(apply_tint("#4472C4", 0.4).unwrap(), "#8FAADC");
        assert_eq!(apply_tint("#4472C4", 0.0).unwrap(), "#4472C4");
    }

    #[test]
    fn test_argb_alpha_stripped() {
        let spec = ColorSpec::rgb("FFFF0000");
        assert_eq!(resolve_color(&spec, &[]).unwrap(), "#FF0000");
    }

    #[test]
    fn test_rgb_with_hash_and_lowercase() {
        let spec = ColorSpec::rgb("#00ff7f");
        assert_eq!(resolve_color(&spec, &[]).unwrap(), "#00FF7F");
    }

    #[test]
    fn test_invalid_rgb_falls_through_to_theme() {
        let spec = ColorSpec {
            rgb: Some("zzz".into()),
            theme: Some(1),
            ..ColorSpec::default()
        };
        assert_eq!(resolve_color(&spec, &[]).unwrap(), "#000000");
    }

    #[test]
    fn test_theme_uses_workbook_palette_first() {
        let palette = vec!["#101010".to_string(), "#202020".to_string()];
        assert_eq!(
            resolve_color(&ColorSpec::theme(1, None), &palette).unwrap(),
            "#202020"
        );
        // Index beyond the workbook palette falls back to the Office default
        assert_eq!(
            resolve_color(&ColorSpec::theme(4, None), &palette).unwrap(),
            "#4472C4"
        );
    }

    #[test]
    fn test_theme_with_shade() {
        let spec = ColorSpec::theme(0, Some(-0.25));
        assert_eq!(resolve_color(&spec, &[]).unwrap(), "#BFBFBF");
    }

    #[test]
    fn test_indexed_colors() {
        let red = ColorSpec {
            indexed: Some(10),
            ..ColorSpec::default()
        };
        assert_eq!(resolve_color(&red, &[]).unwrap(), "#FF0000");

        let system = ColorSpec {
            indexed: Some(64),
            ..ColorSpec::default()
        };
        assert_eq!(resolve_color(&system, &[]).unwrap(), "#000000");

        let out_of_range = ColorSpec {
            indexed: Some(200),
            ..ColorSpec::default()
        };
        assert!(resolve_color(&out_of_range, &[]).is_none());
    }

    #[test]
    fn test_priority_rgb_over_theme() {
        let spec = ColorSpec {
            rgb: Some("FF00FF00".into()),
            theme: Some(4),
            ..ColorSpec::default()
        };
        assert_eq!(resolve_color(&spec, &[]).unwrap(), "#00FF00");
    }

    #[test]
    fn test_empty_spec() {
        assert!(resolve_color(&ColorSpec::default(), &[]).is_none());
    }
}
