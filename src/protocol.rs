//! Worker message protocol.
//!
//! Requests are `{ type, data, id }`. Successful responses echo the request
//! type with a `data` payload; failures carry `{ type: "ERROR", error: { message } }`.
//! Every message is plain JSON so a worker can live on another thread, in a web
//! worker, or behind a process boundary.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::Viewport;

/// Operations a worker understands.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    LoadWorkbook,
    ProcessSheet,
    GetCellRange,
    SearchInSheet,
}

impl RequestKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadWorkbook => "LOAD_WORKBOOK",
            Self::ProcessSheet => "PROCESS_SHEET",
            Self::GetCellRange => "GET_CELL_RANGE",
            Self::SearchInSheet => "SEARCH_IN_SHEET",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkerRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default)]
    pub data: Value,
    pub id: u64,
}

/// Error body carried by an `ERROR` response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkerErrorBody {
    pub message: String,
}

/// A worker reply, correlated to its request by `id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub enum WorkerResponse {
    Success {
        kind: RequestKind,
        data: Value,
        id: u64,
    },
    Error {
        error: WorkerErrorBody,
        id: u64,
    },
}

const ERROR_TYPE: &str = "ERROR";

/// Flat wire form shared by both response shapes.
#[derive(Serialize, Deserialize)]
struct WireResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WorkerErrorBody>,
    id: u64,
}

impl TryFrom<WireResponse> for WorkerResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, String> {
        if wire.kind == ERROR_TYPE {
            let error = wire.error.unwrap_or_else(|| WorkerErrorBody {
                message: "Unknown worker error".to_string(),
            });
            return Ok(WorkerResponse::Error { error, id: wire.id });
        }
        let kind = serde_json::from_value(Value::String(wire.kind.clone()))
            .map_err(|_| format!("unknown response type `{}`", wire.kind))?;
        Ok(WorkerResponse::Success {
            kind,
            data: wire.data,
            id: wire.id,
        })
    }
}

impl From<WorkerResponse> for WireResponse {
    fn from(resp: WorkerResponse) -> Self {
        match resp {
            WorkerResponse::Success { kind, data, id } => Self {
                kind: kind.as_str().to_string(),
                data,
                error: None,
                id,
            },
            WorkerResponse::Error { error, id } => Self {
                kind: ERROR_TYPE.to_string(),
                data: Value::Null,
                error: Some(error),
                id,
            },
        }
    }
}

impl WorkerResponse {
    pub fn success(kind: RequestKind, id: u64, data: Value) -> Self {
        Self::Success { kind, data, id }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self::Error {
            error: WorkerErrorBody {
                message: message.into(),
            },
            id,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

/// Everything a worker can send back: replies and unsolicited faults.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Response(WorkerResponse),
    /// The worker died or hit an unrecoverable error. Not tied to a request.
    Fault(String),
}

/// `LOAD_WORKBOOK` payload: the raw document, base64 on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoadWorkbookPayload {
    #[serde(serialize_with = "encode_bytes", deserialize_with = "decode_bytes")]
    pub bytes: Vec<u8>,
}

fn encode_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn decode_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSheetPayload {
    pub sheet_index: usize,
    pub viewport: Viewport,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CellRangePayload {
    pub sheet_index: usize,
    pub range: Viewport,
}

/// Search flags.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub match_case: bool,
    /// Match only cells whose whole display text equals the query
    pub whole_cell: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub sheet_index: usize,
    pub query: String,
    #[serde(default)]
    pub options: SearchOptions,
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
    fn test_request_wire_shape() {
        let req = WorkerRequest {
            kind: RequestKind::ProcessSheet,
            data: json!({"sheetIndex": 0}),
            id: 7,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"type": "PROCESS_SHEET", "data": {"sheetIndex": 0}, "id": 7})
        );
    }

    #[test]
    fn test_error_response_shape() {
        let resp: WorkerResponse = serde_json::from_value(json!({
            "type": "ERROR",
            "error": {"message": "Unsupported file"},
            "id": 3
        }))
        .unwrap();
        assert_eq!(resp, WorkerResponse::error(3, "Unsupported file"));
    }

    #[test]
    fn test_success_response_shape() {
        let resp: WorkerResponse = serde_json::from_value(json!({
            "type": "SEARCH_IN_SHEET",
            "data": [{"row": 1, "col": 2}],
            "id": 9
        }))
        .unwrap();
        assert_eq!(resp.id(), 9);
        assert!(matches!(
            resp,
            WorkerResponse::Success {
                kind: RequestKind::SearchInSheet,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_response_type_rejected() {
        let parsed: Result<WorkerResponse, _> =
            serde_json::from_value(json!({"type": "PING", "id": 1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_error_response_serializes_flat() {
        let value = serde_json::to_value(WorkerResponse::error(4, "boom")).unwrap();
        assert_eq!(
            value,
            json!({"type": "ERROR", "error": {"message": "boom"}, "id": 4})
        );
    }

    #[test]
    fn test_document_bytes_are_base64() {
        let payload = LoadWorkbookPayload {
            bytes: b"PK\x03\x04".to_vec(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"bytes": "UEsDBA=="}));
        let back: LoadWorkbookPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_search_options_default() {
        let payload: SearchPayload =
            serde_json::from_value(json!({"sheetIndex": 1, "query": "x"})).unwrap();
        assert_eq!(payload.options, SearchOptions::default());
    }
}
