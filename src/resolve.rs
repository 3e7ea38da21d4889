//! Style resolution: (value, style descriptor, render context) -> visual attributes.
//!
//! [`resolve`] is a pure function. Identical inputs give identical output, so
//! callers may memoize on the inputs.

use crate::color::resolve_color;
use crate::numfmt::{self, FormatKind};
use crate::types::{
    plain_text, BorderOrigin, BorderSide, CellValue, FillSpec, HAlign, PatternType,
    RenderContext, ResolvedBorder, ResolvedBorders, ResolvedFont, StyleDescriptor, VAlign,
    VisualAttributes,
};

pub const DEFAULT_FONT_FAMILY: &str = "Calibri";
pub const DEFAULT_FONT_SIZE: f64 = 11.0;

const LIGHT_TEXT: &str = "#000000";
const DARK_TEXT: &str = "#E8EAED";
const LIGHT_GRID: &str = "#E2E2E2";
const DARK_GRID: &str = "#3C4043";
const GRIDLINE_WIDTH: f64 = 0.5;
/// Pixels per indent level at 100% zoom
const INDENT_STEP: f64 = 9.0;
/// Pattern used for date values whose style carries no date pattern
const DEFAULT_DATE_PATTERN: &str = "yyyy-mm-dd";

/// Explicit border colors that vanish against a fill and are dropped.
const NEAR_WHITE_BORDERS: [&str; 8] = [
    "#FFFFFF", "#FEFEFE", "#FDFDFD", "#FCFCFC", "#FAFAFA", "#F8F8F8", "#F5F5F5", "#F2F2F2",
];

/// Resolve one cell into renderer-ready attributes.
pub fn resolve(value: &CellValue, style: &StyleDescriptor, ctx: &RenderContext) -> VisualAttributes {
    let zoom = ctx.zoom();
    let pattern = style.format_code();
    let effective = value.effective();

    let kind = match effective {
        CellValue::Date(_) => FormatKind::Date,
        _ => pattern.map_or(FormatKind::General, numfmt::classify),
    };
    let (text, format_color) = display_text(value, pattern, ctx);

    let default_text = if ctx.uses_dark_palette() {
        DARK_TEXT
    } else {
        LIGHT_TEXT
    };
    let font_spec = style.font.as_ref();
    let text_color = format_color
        .or_else(|| {
            font_spec
                .and_then(|f| f.color.as_ref())
                .and_then(|c| resolve_color(c, &ctx.theme_colors))
        })
        .unwrap_or_else(|| default_text.to_string());

    let background = style.fill.as_ref().and_then(|f| fill_color(f, ctx));

    let font = ResolvedFont {
        family: font_spec
            .and_then(|f| f.name.clone())
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string()),
        size: font_spec.and_then(|f| f.size).unwrap_or(DEFAULT_FONT_SIZE) * zoom,
        bold: font_spec.is_some_and(|f| f.bold),
        italic: font_spec.is_some_and(|f| f.italic),
        underline: font_spec.and_then(|f| f.underline),
        strikethrough: font_spec.is_some_and(|f| f.strike),
    };

    let alignment = style.alignment.as_ref();
    let h_align = alignment
        .and_then(|a| a.horizontal)
        .filter(|h| *h != HAlign::General)
        .or_else(|| infer_alignment(effective, kind));

    VisualAttributes {
        text,
        text_color,
        borders: resolve_borders(style, background.is_some(), ctx),
        background,
        font,
        h_align,
        v_align: alignment.and_then(|a| a.vertical).unwrap_or(VAlign::Bottom),
        wrap: alignment.is_some_and(|a| a.wrap_text),
        indent: f64::from(alignment.map_or(0, |a| a.indent)) * INDENT_STEP * zoom,
        format_kind: kind,
        is_formula: style.is_formula || matches!(value, CellValue::Formula { .. }),
        is_error: style.is_error || matches!(effective, CellValue::Error(_)),
    }
}

/// Display text plus any color directive from the number format.
///
/// Priority for structured values: formula result, text, rich-text runs,
/// hyperlink label, `#`-prefixed error code, then empty.
fn display_text(
    value: &CellValue,
    pattern: Option<&str>,
    ctx: &RenderContext,
) -> (String, Option<String>) {
    match value {
        CellValue::Empty => (String::new(), None),
        CellValue::Number(n) => {
            let formatted = numfmt::format_value(*n, pattern.unwrap_or("General"), ctx.date_system);
            (formatted.text, formatted.color)
        }
        CellValue::Date(serial) => {
            let pattern = pattern
                .filter(|p| numfmt::classify(p) == FormatKind::Date)
                .unwrap_or(DEFAULT_DATE_PATTERN);
            let formatted = numfmt::format_value(*serial, pattern, ctx.date_system);
            (formatted.text, formatted.color)
        }
        CellValue::Text(s) => {
            let text = pattern
                .and_then(|p| numfmt::format_text(s, p))
                .unwrap_or_else(|| s.clone());
            (text, None)
        }
        CellValue::Bool(b) => ((if *b { "TRUE" } else { "FALSE" }).to_string(), None),
        CellValue::Formula { result, .. } => match result {
            Some(inner) => display_text(inner, pattern, ctx),
            None => (String::new(), None),
        },
        CellValue::Error(code) => (format!("#{code}"), None),
        CellValue::RichText(runs) => (plain_text(runs), None),
        CellValue::Hyperlink { label, .. } => (label.clone(), None),
    }
}

fn infer_alignment(value: &CellValue, kind: FormatKind) -> Option<HAlign> {
    match value {
        CellValue::Number(_) | CellValue::Date(_) if kind.is_numeric() => Some(HAlign::Right),
        CellValue::Number(_)
        | CellValue::Text(_)
        | CellValue::RichText(_)
        | CellValue::Hyperlink { .. } => Some(HAlign::Left),
        _ => None,
    }
}

fn fill_color(fill: &FillSpec, ctx: &RenderContext) -> Option<String> {
    match fill.pattern {
        None | Some(PatternType::None) => None,
        Some(_) => fill
            .fg_color
            .as_ref()
            .or(fill.bg_color.as_ref())
            .and_then(|c| resolve_color(c, &ctx.theme_colors)),
    }
}

fn resolve_borders(style: &StyleDescriptor, has_fill: bool, ctx: &RenderContext) -> ResolvedBorders {
    let zoom = ctx.zoom();
    let spec = style.border.as_ref();
    let gridline = (ctx.grid_lines_visible && !has_fill).then(|| ResolvedBorder {
        style: crate::types::BorderStyle::Hair,
        width: GRIDLINE_WIDTH * zoom,
        color: if ctx.uses_dark_palette() {
            DARK_GRID
        } else {
            LIGHT_GRID
        }
        .to_string(),
        origin: BorderOrigin::Gridline,
    });

    let side = |side: Option<&BorderSide>| -> Option<ResolvedBorder> {
        explicit_border(side, has_fill, zoom, ctx).or_else(|| gridline.clone())
    };

    ResolvedBorders {
        top: side(spec.and_then(|b| b.top.as_ref())),
        right: side(spec.and_then(|b| b.right.as_ref())),
        bottom: side(spec.and_then(|b| b.bottom.as_ref())),
        left: side(spec.and_then(|b| b.left.as_ref())),
    }
}

fn explicit_border(
    side: Option<&BorderSide>,
    has_fill: bool,
    zoom: f64,
    ctx: &RenderContext,
) -> Option<ResolvedBorder> {
    let side = side?;
    if side.style.width() <= 0.0 {
        return None;
    }
    let color = side
        .color
        .as_ref()
        .and_then(|c| resolve_color(c, &ctx.theme_colors))
        .unwrap_or_else(|| LIGHT_TEXT.to_string());
    if has_fill && NEAR_WHITE_BORDERS.contains(&color.as_str()) {
        return None;
    }
    Some(ResolvedBorder {
        style: side.style,
        width: side.style.width() * zoom,
        color,
        origin: BorderOrigin::Explicit,
    })
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
    use crate::types::{AlignmentSpec, BorderSpec, BorderStyle, ColorSpec, FontSpec, RichTextRun};

    fn styled(num_fmt: &str) -> StyleDescriptor {
        StyleDescriptor {
            num_fmt: Some(num_fmt.to_string()),
            ..StyleDescriptor::default()
        }
    }

    fn solid_fill(hex: &str) -> Option<FillSpec> {
        Some(FillSpec {
            pattern: Some(PatternType::Solid),
            fg_color: Some(ColorSpec::rgb(hex)),
            bg_color: None,
        })
    }

    #[test]
    fn test_display_priority() {
        let ctx = RenderContext::default();
        let style = StyleDescriptor::default();
        let formula = CellValue::Formula {
            formula: Some("A1*2".into()),
            result: Some(Box::new(CellValue::Text("ok".into()))),
        };
        assert_eq!(resolve(&formula, &style, &ctx).text, "ok");

        let runs = CellValue::RichText(vec![
            RichTextRun {
                text: "Hello ".into(),
                font: None,
            },
            RichTextRun {
                text: "World".into(),
                font: None,
            },
        ]);
        assert_eq!(resolve(&runs, &style, &ctx).text, "Hello World");
        assert_eq!(
            resolve(&CellValue::Error("DIV/0!".into()), &style, &ctx).text,
            "#DIV/0!"
        );
        assert_eq!(resolve(&CellValue::Bool(true), &style, &ctx).text, "TRUE");
        assert_eq!(resolve(&CellValue::Empty, &style, &ctx).text, "");
    }

    #[test]
    fn test_format_color_overrides_font_color() {
        let ctx = RenderContext::default();
        let mut style = styled("0;[Red]-0");
        style.font = Some(FontSpec {
            color: Some(ColorSpec::rgb("0000FF")),
            ..FontSpec::default()
        });
        let attrs = resolve(&CellValue::Number(-3.0), &style, &ctx);
        assert_eq!(attrs.text, "-3");
        assert_eq!(attrs.text_color, "#FF0000");
        let attrs = resolve(&CellValue::Number(3.0), &style, &ctx);
        assert_eq!(attrs.text_color, "#0000FF");
    }

    #[test]
    fn test_inferred_alignment() {
        let ctx = RenderContext::default();
        let none = StyleDescriptor::default();
        assert_eq!(
            resolve(&CellValue::Number(1.0), &none, &ctx).h_align,
            Some(HAlign::Right)
        );
        assert_eq!(
            resolve(&CellValue::Text("x".into()), &none, &ctx).h_align,
            Some(HAlign::Left)
        );
        assert_eq!(resolve(&CellValue::Bool(false), &none, &ctx).h_align, None);

        let explicit = StyleDescriptor {
            alignment: Some(AlignmentSpec {
                horizontal: Some(HAlign::Center),
                ..AlignmentSpec::default()
            }),
            ..StyleDescriptor::default()
        };
        assert_eq!(
            resolve(&CellValue::Number(1.0), &explicit, &ctx).h_align,
            Some(HAlign::Center)
        );
    }

    #[test]
    fn test_text_format_on_number_is_left_aligned() {
        let ctx = RenderContext::default();
        let attrs = resolve(&CellValue::Number(42.0), &styled("@"), &ctx);
        assert_eq!(attrs.text, "42");
        assert_eq!(attrs.format_kind, FormatKind::Text);
        assert_eq!(attrs.h_align, Some(HAlign::Left));
    }

    #[test]
    fn test_gridlines_omitted_under_fill() {
        let ctx = RenderContext::default();
        let plain = resolve(&CellValue::Empty, &StyleDescriptor::default(), &ctx);
        assert_eq!(plain.borders.top.unwrap().origin, BorderOrigin::Gridline);

        let filled = StyleDescriptor {
            fill: solid_fill("FFFF00"),
            ..StyleDescriptor::default()
        };
        let attrs = resolve(&CellValue::Empty, &filled, &ctx);
        assert_eq!(attrs.background.as_deref(), Some("#FFFF00"));
        assert!(attrs.borders.top.is_none());
    }

    #[test]
    fn test_gridlines_off_globally() {
        let ctx = RenderContext {
            grid_lines_visible: false,
            ..RenderContext::default()
        };
        let attrs = resolve(&CellValue::Empty, &StyleDescriptor::default(), &ctx);
        assert_eq!(attrs.borders, ResolvedBorders::default());
    }

    #[test]
    fn test_near_white_border_dropped_on_fill() {
        let ctx = RenderContext::default();
        let white = Some(BorderSide {
            style: BorderStyle::Thin,
            color: Some(ColorSpec::rgb("FFFEFEFE")),
        });
        let black = Some(BorderSide {
            style: BorderStyle::Medium,
            color: Some(ColorSpec::rgb("000000")),
        });
        let style = StyleDescriptor {
            fill: solid_fill("C6EFCE"),
            border: Some(BorderSpec {
                top: white.clone(),
                bottom: black,
                ..BorderSpec::default()
            }),
            ..StyleDescriptor::default()
        };
        let attrs = resolve(&CellValue::Empty, &style, &ctx);
        assert!(attrs.borders.top.is_none());
        let bottom = attrs.borders.bottom.unwrap();
        assert_eq!(bottom.origin, BorderOrigin::Explicit);
        assert_eq!(bottom.width, 2.0);

        // Without a fill the near-white border is kept
        let unfilled = StyleDescriptor {
            border: Some(BorderSpec {
                top: white,
                ..BorderSpec::default()
            }),
            ..StyleDescriptor::default()
        };
        let attrs = resolve(&CellValue::Empty, &unfilled, &ctx);
        assert_eq!(attrs.borders.top.unwrap().color, "#FEFEFE");
    }

    #[test]
    fn test_zoom_scales_font_and_borders() {
        let ctx = RenderContext {
            zoom_factor: 2.0,
            ..RenderContext::default()
        };
        let style = StyleDescriptor {
            alignment: Some(AlignmentSpec {
                indent: 1,
                ..AlignmentSpec::default()
            }),
            ..StyleDescriptor::default()
        };
        let attrs = resolve(&CellValue::Empty, &style, &ctx);
        assert_eq!(attrs.font.size, 22.0);
        assert_eq!(attrs.indent, 18.0);
        assert_eq!(attrs.borders.left.unwrap().width, 1.0);
    }

    #[test]
    fn test_dark_mode_palette_and_print_override() {
        let dark = RenderContext {
            dark_mode: true,
            ..RenderContext::default()
        };
        let attrs = resolve(&CellValue::Text("x".into()), &StyleDescriptor::default(), &dark);
        assert_eq!(attrs.text_color, DARK_TEXT);
        assert_eq!(attrs.borders.top.unwrap().color, DARK_GRID);

        let print = RenderContext {
            print_mode: true,
            ..dark
        };
        let attrs = resolve(&CellValue::Text("x".into()), &StyleDescriptor::default(), &print);
        assert_eq!(attrs.text_color, LIGHT_TEXT);
    }

    #[test]
    fn test_date_value_without_pattern() {
        let ctx = RenderContext::default();
        let attrs = resolve(&CellValue::Date(44927.0), &StyleDescriptor::default(), &ctx);
        assert_eq!(attrs.text, "2023-01-01");
        assert_eq!(attrs.format_kind, FormatKind::Date);
        assert_eq!(attrs.h_align, Some(HAlign::Right));
    }

    #[test]
    fn test_builtin_format_id() {
        let ctx = RenderContext::default();
        let style = StyleDescriptor {
            num_fmt_id: Some(10),
            ..StyleDescriptor::default()
        };
        assert_eq!(resolve(&CellValue::Number(0.5), &style, &ctx).text, "50.00%");
    }

    #[test]
    fn test_resolution_is_pure() {
        let ctx = RenderContext::default();
        let style = styled("$#,##0.00");
        let a = resolve(&CellValue::Number(1234.5), &style, &ctx);
        let b = resolve(&CellValue::Number(1234.5), &style, &ctx);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
