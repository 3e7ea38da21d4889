//! Structured error types for sheetview.
//!
//! Every fallible operation in the crate returns [`ViewerError`]. The variants
//! follow the failure stages of a viewing session: network download, worker
//! transport, worker-side parsing, and search.

/// All errors that can occur while loading and viewing a workbook.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// Download failed. `status` is the transport status code when one exists.
    #[error("Network error{}: {message}", status_suffix(.status))]
    Network {
        status: Option<u16>,
        message: String,
    },

    /// The document exceeds the configured maximum payload size.
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// The worker could not be started, or the session was closed.
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// No response arrived within the timeout window.
    #[error("Worker timed out after {timeout_ms}ms waiting for {request}")]
    WorkerTimeout { request: String, timeout_ms: u64 },

    /// The worker crashed; every in-flight call is rejected with this.
    #[error("Worker fault: {0}")]
    WorkerFault(String),

    /// The worker rejected the document or a request, message surfaced verbatim.
    #[error("{0}")]
    Parse(String),

    /// Search inside a sheet failed.
    #[error("Search failed: {0}")]
    SearchFailure(String),

    /// The operation was superseded or torn down. Never shown to users.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid cell reference.
    #[error("Invalid cell reference: {0}")]
    CellRef(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON encoding or decoding error on the worker protocol.
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ViewerError>;

impl ViewerError {
    /// Whether the failure is transient and worth retrying.
    ///
    /// Network errors are retryable unless the status is 4xx-class. Worker
    /// timeouts are retryable at the policy layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { status, .. } => !status.is_some_and(|s| (400..500).contains(&s)),
            Self::WorkerTimeout { .. } => true,
            _ => false,
        }
    }

    /// Whether this is an explicit cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable kind, used in diagnostics reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NetworkError",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::WorkerUnavailable(_) => "WorkerUnavailable",
            Self::WorkerTimeout { .. } => "WorkerTimeout",
            Self::WorkerFault(_) => "WorkerFault",
            Self::Parse(_) => "ParseError",
            Self::SearchFailure(_) => "SearchFailure",
            Self::Cancelled => "Cancelled",
            Self::CellRef(_) => "CellRef",
            Self::Config(_) => "Config",
            Self::Json(_) => "Json",
            Self::Io(_) => "Io",
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl From<ViewerError> for wasm_bindgen::JsValue {
    fn from(e: ViewerError) -> Self {
        wasm_bindgen::JsValue::from_str(&e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_network_retryability() {
        let server = ViewerError::Network {
            status: Some(503),
            message: "unavailable".into(),
        };
        let missing = ViewerError::Network {
            status: Some(404),
            message: "not found".into(),
        };
        let offline = ViewerError::Network {
            status: None,
            message: "connection reset".into(),
        };
        assert!(server.is_retryable());
        assert!(!missing.is_retryable());
        assert!(offline.is_retryable());
    }

    #[test]
    fn test_fatal_errors_not_retryable() {
        assert!(!ViewerError::PayloadTooLarge { size: 10, limit: 5 }.is_retryable());
        assert!(!ViewerError::WorkerFault("boom".into()).is_retryable());
        assert!(!ViewerError::Parse("bad zip".into()).is_retryable());
        assert!(ViewerError::WorkerTimeout {
            request: "LOAD_WORKBOOK".into(),
            timeout_ms: 30_000
        }
        .is_retryable());
    }

    #[test]
    fn test_display_includes_status() {
        let err = ViewerError::Network {
            status: Some(500),
            message: "oops".into(),
        };
        assert_eq!(err.to_string(), "Network error (500): oops");
        let err = ViewerError::Network {
            status: None,
            message: "offline".into(),
        };
        assert_eq!(err.to_string(), "Network error: offline");
    }

    #[test]
    fn test_parse_error_is_verbatim() {
        let err = ViewerError::Parse("Unsupported file format".into());
        assert_eq!(err.to_string(), "Unsupported file format");
        assert_eq!(err.kind(), "ParseError");
    }
}
