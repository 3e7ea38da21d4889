use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{RichTextRun, StyleDescriptor};

/// 1-based spreadsheet address. Row 1 / column 1 is cell A1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// A cell value, resolved once when a batch is ingested.
///
/// The worker sends values as arbitrary JSON; [`CellValue::from_raw`] turns
/// them into this closed set so the renderer never inspects raw shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// Date as a serial in the workbook's date system.
    Date(f64),
    Formula {
        #[serde(skip_serializing_if = "Option::is_none")]
        formula: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Box<CellValue>>,
    },
    /// Error code without the leading `#`, e.g. `DIV/0!`.
    Error(String),
    RichText(Vec<RichTextRun>),
    Hyperlink {
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

impl CellValue {
    /// Convert a raw worker JSON value.
    ///
    /// Scalars map directly. Objects are inspected in a fixed priority order:
    /// `result`, `text`, `richText`, `hyperlink`, `error`, then `date`.
    /// Anything unrecognised becomes [`CellValue::Empty`].
    pub fn from_raw(raw: &Value) -> Self {
        match raw {
            Value::Null => Self::Empty,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Self::Empty, Self::Number),
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) => Self::Empty,
            Value::Object(map) => {
                let formula = map.get("formula").and_then(Value::as_str);
                let result = map.get("result").filter(|r| !r.is_null());
                if formula.is_some() || result.is_some() {
                    return Self::Formula {
                        formula: formula.map(str::to_string),
                        result: result.map(|r| Box::new(Self::from_raw(r))),
                    };
                }
                if let Some(text) = map.get("text").and_then(Value::as_str) {
                    return match map.get("hyperlink").and_then(hyperlink_target) {
                        Some(target) => Self::Hyperlink {
                            label: text.to_string(),
                            target: Some(target),
                        },
                        None => Self::Text(text.to_string()),
                    };
                }
                if let Some(runs) = map.get("richText").and_then(Value::as_array) {
                    return Self::RichText(
                        runs.iter()
                            .filter_map(|run| serde_json::from_value(run.clone()).ok())
                            .collect(),
                    );
                }
                if let Some(link) = map.get("hyperlink") {
                    let target = hyperlink_target(link);
                    let label = link
                        .get("label")
                        .or_else(|| link.get("text"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| target.clone())
                        .unwrap_or_default();
                    return Self::Hyperlink { label, target };
                }
                if let Some(code) = map.get("error").and_then(Value::as_str) {
                    return Self::Error(code.trim_start_matches('#').to_string());
                }
                if let Some(serial) = map.get("date").and_then(Value::as_f64) {
                    return Self::Date(serial);
                }
                Self::Empty
            }
        }
    }

    /// The numeric payload used for number formatting, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) | Self::Date(n) => Some(*n),
            Self::Formula {
                result: Some(inner),
                ..
            } => inner.as_number(),
            _ => None,
        }
    }

    /// Innermost value after unwrapping formula results.
    pub fn effective(&self) -> &Self {
        match self {
            Self::Formula {
                result: Some(inner),
                ..
            } => inner.effective(),
            other => other,
        }
    }

    /// True when nothing would be displayed, including a formula without a result.
    pub fn is_empty(&self) -> bool {
        matches!(
            self.effective(),
            Self::Empty | Self::Formula { result: None, .. }
        )
    }
}

fn hyperlink_target(link: &Value) -> Option<String> {
    match link {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("target")
            .or_else(|| map.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// A cell as sent by the worker, before ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCell {
    pub row: u32,
    pub col: u32,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleDescriptor>,
}

/// An ingested cell held by the cell store.
#[derive(Debug, Clone)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
    pub style: Arc<StyleDescriptor>,
}

impl Cell {
    pub fn from_raw(raw: RawCell) -> Self {
        Self {
            row: raw.row,
            col: raw.col,
            value: CellValue::from_raw(&raw.value),
            style: Arc::new(raw.style.unwrap_or_default()),
        }
    }

    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.row, self.col)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(CellValue::from_raw(&json!(null)), CellValue::Empty);
        assert_eq!(CellValue::from_raw(&json!(1.5)), CellValue::Number(1.5));
        assert_eq!(CellValue::from_raw(&json!("hi")), CellValue::Text("hi".into()));
        assert_eq!(CellValue::from_raw(&json!(true)), CellValue::Bool(true));
    }

    #[test]
    fn test_result_wins_over_text() {
        let v = CellValue::from_raw(&json!({"formula": "A1*2", "result": 4, "text": "ignored"}));
        assert_eq!(
            v,
            CellValue::Formula {
                formula: Some("A1*2".into()),
                result: Some(Box::new(CellValue::Number(4.0))),
            }
        );
        assert_eq!(v.as_number(), Some(4.0));
    }

    #[test]
    fn test_text_with_hyperlink() {
        let v = CellValue::from_raw(&json!({"text": "Docs", "hyperlink": "https://example.com"}));
        assert_eq!(
            v,
            CellValue::Hyperlink {
                label: "Docs".into(),
                target: Some("https://example.com".into()),
            }
        );
    }

    #[test]
    fn test_bare_hyperlink_uses_target_as_label() {
        let v = CellValue::from_raw(&json!({"hyperlink": "https://example.com"}));
        assert_eq!(
            v,
            CellValue::Hyperlink {
                label: "https://example.com".into(),
                target: Some("https://example.com".into()),
            }
        );
    }

    #[test]
    fn test_rich_text_and_error() {
        let v = CellValue::from_raw(&json!({"richText": [{"text": "a"}, {"text": "b"}]}));
        let CellValue::RichText(runs) = v else {
            panic!("expected rich text");
        };
        assert_eq!(runs.len(), 2);

        let e = CellValue::from_raw(&json!({"error": "#N/A"}));
        assert_eq!(e, CellValue::Error("N/A".into()));
    }

    #[test]
    fn test_unknown_object_is_empty() {
        assert_eq!(CellValue::from_raw(&json!({"foo": 1})), CellValue::Empty);
        assert!(CellValue::from_raw(&json!({"result": null})).is_empty());
    }

    #[test]
    fn test_null_result_falls_through_to_text() {
        let v = CellValue::from_raw(&json!({"result": null, "text": "fallback"}));
        assert_eq!(v, CellValue::Text("fallback".into()));

        let pending = CellValue::from_raw(&json!({"formula": "SUM(A:A)", "result": null}));
        assert_eq!(
            pending,
            CellValue::Formula {
                formula: Some("SUM(A:A)".into()),
                result: None,
            }
        );
        assert!(pending.is_empty());
    }
}
