//! Number format and style resolution scenarios
//!
//! End-to-end checks of the formatting engine through the public API:
//! `numfmt` directly, and `resolve` for what the renderer actually receives.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]

use chrono::{Datelike, NaiveDate};
use serde_json::json;
use sheetview::numfmt::{classify, date_to_serial, format_number, serial_to_parts, FormatKind};
use sheetview::{
    resolve, CellValue, DateSystem, HAlign, RenderContext, StyleDescriptor,
};
use test_case::test_case;

const D1900: DateSystem = DateSystem::Excel1900;

fn style(code: &str) -> StyleDescriptor {
    StyleDescriptor {
        num_fmt: Some(code.to_string()),
        ..StyleDescriptor::default()
    }
}

// ============================================================================
// Numbers
// ============================================================================

#[test_case(1234.5, "$#,##0.00", "$1,234.50" ; "currency")]
#[test_case(0.1234, "0.00%", "12.34%" ; "percentage")]
#[test_case(1_234_567.0, "#,##0", "1,234,567" ; "grouped integer")]
#[test_case(-3.14159, "0.00", "-3.14" ; "negative fixed")]
#[test_case(-1234.0, "#,##0;(#,##0)", "(1,234)" ; "negative section")]
#[test_case(0.0, "#,##0;(#,##0);\"-\"", "-" ; "zero section")]
#[test_case(1_500_000.0, "0.0,,\" M\"", "1.5 M" ; "thousands scaling")]
#[test_case(1_234_567.0, "0.00E+00", "1.23E+06" ; "scientific")]
#[test_case(1234.5, "General", "1,234.5" ; "general")]
#[test_case(7.0, "\"Qty: \"0", "Qty: 7" ; "quoted prefix")]
#[test_case(150.0, "[>=100]\"big\";[<100]\"small\"", "big" ; "condition literal high")]
#[test_case(5.0, "[>=100]\"big\";[<100]\"small\"", "small" ; "condition literal low")]
#[test_case(5.0, "\"N/A\"", "N/A" ; "literal only")]
#[test_case(-5.0, "0;\"neg\";0", "neg" ; "literal negative section")]
#[test_case(0.0, "0;-0;;@", "" ; "empty zero section")]
#[test_case(1e16, "General", "1E+16" ; "general exponential")]
fn test_number_formats(value: f64, code: &str, expected: &str) {
    assert_eq!(format_number(value, code, D1900), expected);
}

#[test_case("$#,##0.00", FormatKind::Currency)]
#[test_case("0.00%", FormatKind::Percentage)]
#[test_case("0.00E+00", FormatKind::Scientific)]
#[test_case("yyyy-mm-dd", FormatKind::Date)]
#[test_case("@", FormatKind::Text)]
#[test_case("General", FormatKind::General)]
#[test_case("0.00", FormatKind::FixedDecimal)]
#[test_case("_(* #,##0_)", FormatKind::Accounting)]
fn test_classification(code: &str, expected: FormatKind) {
    assert_eq!(classify(code), expected);
}

// ============================================================================
// Dates
// ============================================================================

#[test_case(44927.0, "yyyy-mm-dd", "2023-01-01" ; "iso date")]
#[test_case(44927.0, "mmm d, yyyy", "Jan 1, 2023" ; "abbreviated month")]
#[test_case(44927.0, "dddd", "Sunday" ; "weekday")]
#[test_case(44927.75, "yyyy-mm-dd hh:mm", "2023-01-01 18:00" ; "date and time")]
#[test_case(1.0, "yyyy-mm-dd", "1900-01-01" ; "first serial")]
fn test_date_formats(serial: f64, code: &str, expected: &str) {
    assert_eq!(format_number(serial, code, D1900), expected);
}

#[test]
fn test_1904_system_shifts_epoch() {
    assert_eq!(
        format_number(0.0, "yyyy-mm-dd", DateSystem::Excel1904),
        "1904-01-01"
    );
    assert_eq!(
        format_number(43_465.0, "yyyy-mm-dd", DateSystem::Excel1904),
        "2023-01-01"
    );
}

#[test]
fn test_date_round_trip() {
    for system in [DateSystem::Excel1900, DateSystem::Excel1904] {
        for (y, m, d) in [(1900, 3, 1), (1999, 12, 31), (2000, 2, 29), (2023, 1, 1), (2099, 7, 15)] {
            let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
            let Some(serial) = date_to_serial(date, system) else {
                continue;
            };
            let parts = serial_to_parts(serial, system).unwrap();
            assert_eq!(
                (parts.year, parts.month, parts.day),
                (date.year(), date.month(), date.day()),
                "{system:?} {date}"
            );
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_resolved_currency_is_right_aligned() {
    let attrs = resolve(
        &CellValue::Number(1234.5),
        &style("$#,##0.00"),
        &RenderContext::default(),
    );
    assert_eq!(attrs.text, "$1,234.50");
    assert_eq!(attrs.format_kind, FormatKind::Currency);
    assert_eq!(attrs.h_align, Some(HAlign::Right));
}

#[test]
fn test_resolved_date_uses_workbook_system() {
    let value = CellValue::from_raw(&json!({ "date": 0.0 }));
    let ctx = RenderContext {
        date_system: DateSystem::Excel1904,
        ..RenderContext::default()
    };
    assert_eq!(resolve(&value, &style("yyyy-mm-dd"), &ctx).text, "1904-01-01");
}

#[test]
fn test_resolution_is_pure() {
    let value = CellValue::Number(-0.5);
    let style = style("0.0%;[Red]-0.0%");
    let ctx = RenderContext {
        dark_mode: true,
        zoom_factor: 1.25,
        ..RenderContext::default()
    };
    let first = resolve(&value, &style, &ctx);
    let second = resolve(&value, &style, &ctx);
    assert_eq!(first, second);
    assert_eq!(first.text, "-50.0%");
    assert_eq!(first.text_color, "#FF0000");
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
