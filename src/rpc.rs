//! Request/response correlation with the document worker.
//!
//! Every outbound request gets a strictly increasing id and a pending entry.
//! A background dispatch task routes worker responses to their entries, so
//! completion order does not need to match issue order. Each entry is settled
//! exactly once: by its response, its timeout, a worker fault, or `close()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Result, ViewerError};
use crate::protocol::{
    CellRangePayload, LoadWorkbookPayload, ProcessSheetPayload, RequestKind, SearchOptions,
    SearchPayload, WorkerEvent, WorkerRequest, WorkerResponse,
};
use crate::types::{CellAddress, RawCell, SheetBatch, Viewport, WorkbookSummary};

/// Default time to wait for a worker response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel pair connecting a client to a running worker.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl WorkerEndpoint {
    /// Create an endpoint plus the worker-side halves of its channels.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<WorkerRequest>,
        mpsc::UnboundedSender<WorkerEvent>,
    ) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        (
            Self {
                requests: req_tx,
                events: evt_rx,
            },
            req_rx,
            evt_tx,
        )
    }
}

struct PendingRequest {
    kind: RequestKind,
    reply: oneshot::Sender<Result<Value>>,
    deadline: Instant,
}

/// Why the client stopped accepting calls.
#[derive(Debug, Clone)]
enum Shutdown {
    Closed,
    Fault(String),
}

impl Shutdown {
    fn to_error(&self) -> ViewerError {
        match self {
            Self::Closed => ViewerError::WorkerUnavailable("worker client closed".to_string()),
            Self::Fault(msg) => ViewerError::WorkerUnavailable(format!("worker faulted: {msg}")),
        }
    }
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    shutdown: Option<Shutdown>,
}

/// State shared between the client handles and the dispatch task.
#[derive(Default)]
struct Shared {
    table: Mutex<PendingTable>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one response to its pending entry.
    fn settle(&self, response: WorkerResponse) {
        let id = response.id();
        let Some(entry) = self.table().entries.remove(&id) else {
            tracing::debug!(id, "Ignoring response for unknown or expired request");
            return;
        };

        let result = match response {
            WorkerResponse::Success { data, .. } => Ok(data),
            WorkerResponse::Error { error, .. } => Err(match entry.kind {
                RequestKind::SearchInSheet => ViewerError::SearchFailure(error.message),
                _ => ViewerError::Parse(error.message),
            }),
        };
        tracing::trace!(
            id,
            kind = %entry.kind,
            remaining_ms = u64::try_from(
                entry
                    .deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis()
            )
            .unwrap_or(u64::MAX),
            "Settled worker request"
        );
        // The caller may have gone away; nothing to deliver to then.
        let _ = entry.reply.send(result);
    }

    /// Reject every pending entry once and refuse further calls.
    fn shut_down(&self, reason: Shutdown) {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut table = self.table();
            if table.shutdown.is_none() {
                table.shutdown = Some(reason.clone());
            }
            table.entries.drain().collect()
        };

        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), reason = ?reason, "Rejecting pending worker requests");
        }
        for (_, entry) in drained {
            let error = match &reason {
                Shutdown::Fault(msg) => ViewerError::WorkerFault(msg.clone()),
                Shutdown::Closed => reason.to_error(),
            };
            let _ = entry.reply.send(Err(error));
        }
    }
}

/// Removes a pending entry if its call future is dropped before settling.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.table().entries.remove(&self.id);
    }
}

struct Inner {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    requests: Mutex<Option<mpsc::UnboundedSender<WorkerRequest>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

/// Handle to a worker. Cheap to clone; clones share the same pending table.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("timeout", &self.inner.timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RpcClient {
    /// Start routing events from `endpoint`. Must be called inside a tokio runtime.
    pub fn open(endpoint: WorkerEndpoint, timeout: Duration) -> Self {
        let shared = Arc::new(Shared::default());
        let dispatch = tokio::spawn(dispatch(Arc::clone(&shared), endpoint.events));
        Self {
            inner: Arc::new(Inner {
                shared,
                next_id: AtomicU64::new(1),
                requests: Mutex::new(Some(endpoint.requests)),
                dispatch: Mutex::new(Some(dispatch)),
                timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.shared.table().entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.table().shutdown.is_some()
    }

    /// Send one request and wait for its correlated response.
    pub async fn call<P: Serialize>(&self, kind: RequestKind, payload: &P) -> Result<Value> {
        let data = serde_json::to_value(payload)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.inner.timeout;
        let (reply, rx) = oneshot::channel();

        {
            let mut table = self.inner.shared.table();
            if let Some(shutdown) = &table.shutdown {
                return Err(shutdown.to_error());
            }
            table.entries.insert(
                id,
                PendingRequest {
                    kind,
                    reply,
                    deadline,
                },
            );
        }
        let _guard = PendingGuard {
            shared: &self.inner.shared,
            id,
        };

        let sent = self
            .inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(WorkerRequest { kind, data, id }).is_ok());
        if !sent {
            return Err(ViewerError::WorkerUnavailable(
                "worker is not accepting requests".to_string(),
            ));
        }
        tracing::debug!(id, kind = %kind, "Sent worker request");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ViewerError::WorkerUnavailable(
                "worker dropped the request".to_string(),
            )),
            Err(_) => {
                tracing::warn!(id, kind = %kind, "Worker request timed out");
                Err(ViewerError::WorkerTimeout {
                    request: kind.to_string(),
                    timeout_ms: u64::try_from(self.inner.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    async fn call_typed<P: Serialize, T: DeserializeOwned>(
        &self,
        kind: RequestKind,
        payload: &P,
    ) -> Result<T> {
        let value = self.call(kind, payload).await?;
        serde_json::from_value(value)
            .map_err(|e| ViewerError::Parse(format!("Malformed {kind} response: {e}")))
    }

    /// Hand the document to the worker and get its sheet list.
    pub async fn load_workbook(&self, bytes: Vec<u8>) -> Result<WorkbookSummary> {
        self.call_typed(RequestKind::LoadWorkbook, &LoadWorkbookPayload { bytes })
            .await
    }

    /// Load one viewport's worth of a sheet.
    pub async fn process_sheet(&self, sheet_index: usize, viewport: Viewport) -> Result<SheetBatch> {
        let mut batch: SheetBatch = self
            .call_typed(
                RequestKind::ProcessSheet,
                &ProcessSheetPayload {
                    sheet_index,
                    viewport,
                },
            )
            .await?;
        batch.viewport.get_or_insert(viewport);
        Ok(batch)
    }

    pub async fn get_cell_range(&self, sheet_index: usize, range: Viewport) -> Result<Vec<RawCell>> {
        self.call_typed(
            RequestKind::GetCellRange,
            &CellRangePayload { sheet_index, range },
        )
        .await
    }

    pub async fn search(
        &self,
        sheet_index: usize,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<CellAddress>> {
        self.call_typed(
            RequestKind::SearchInSheet,
            &SearchPayload {
                sheet_index,
                query: query.to_string(),
                options,
            },
        )
        .await
    }

    /// Reject pending calls, stop the dispatch task and release the worker.
    ///
    /// Later calls fail with [`ViewerError::WorkerUnavailable`].
    pub fn close(&self) {
        self.inner.shared.shut_down(Shutdown::Closed);
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = self
            .inner
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        tracing::debug!("Worker client closed");
    }
}

async fn dispatch(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Response(response) => shared.settle(response),
            WorkerEvent::Fault(message) => {
                tracing::error!(%message, "Worker fault");
                shared.shut_down(Shutdown::Fault(message));
                return;
            }
        }
    }
    shared.shut_down(Shutdown::Fault("worker channel closed".to_string()));
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

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, DEFAULT_TIMEOUT);

        let echo = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(req) = requests.recv().await {
                seen.push(req.id);
                let _ = events.send(WorkerEvent::Response(WorkerResponse::success(
                    req.kind,
                    req.id,
                    json!(null),
                )));
                if seen.len() == 3 {
                    break;
                }
            }
            seen
        });

        let payload = json!({});
        for _ in 0..3 {
            client.call(RequestKind::GetCellRange, &payload).await.unwrap();
        }
        let seen = echo.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_error_response_maps_by_kind() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, DEFAULT_TIMEOUT);

        tokio::spawn(async move {
            while let Some(req) = requests.recv().await {
                let _ = events.send(WorkerEvent::Response(WorkerResponse::error(req.id, "nope")));
            }
        });

        let payload = json!({});
        let err = client.call(RequestKind::LoadWorkbook, &payload).await.unwrap_err();
        assert!(matches!(err, ViewerError::Parse(ref m) if m == "nope"));
        let err = client
            .search(0, "x", SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::SearchFailure(_)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let (endpoint, _requests, _events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, DEFAULT_TIMEOUT);
        client.close();
        assert!(client.is_closed());
        let payload = json!({});
        let err = client.call(RequestKind::LoadWorkbook, &payload).await.unwrap_err();
        assert!(matches!(err, ViewerError::WorkerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_dropped_call_removes_entry() {
        let (endpoint, _requests, _events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, DEFAULT_TIMEOUT);
        let payload = json!({});
        let call = client.call(RequestKind::ProcessSheet, &payload);
        let res = tokio::time::timeout(Duration::from_millis(10), call).await;
        assert!(res.is_err());
        assert_eq!(client.pending_count(), 0);
    }
}
