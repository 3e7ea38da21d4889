//! Worker RPC correlation tests
//!
//! Drive an `RpcClient` against a hand-rolled worker on raw channels so the
//! order, timing and failure of every response is under test control.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]

use std::time::Duration;

use serde_json::json;
use sheetview::error::ViewerError;
use sheetview::protocol::{RequestKind, WorkerEvent, WorkerRequest, WorkerResponse};
use sheetview::rpc::{RpcClient, WorkerEndpoint};
use tokio::sync::mpsc;

fn reply(events: &mpsc::UnboundedSender<WorkerEvent>, req: &WorkerRequest) {
    events
        .send(WorkerEvent::Response(WorkerResponse::success(
            req.kind,
            req.id,
            json!({ "echo": req.data }),
        )))
        .unwrap();
}

// ============================================================================
// Routing
// ============================================================================

mod routing {
    use super::*;

    #[tokio::test]
    async fn test_reverse_order_responses_reach_their_callers() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, Duration::from_secs(5));

        let worker = tokio::spawn(async move {
            let first = requests.recv().await.unwrap();
            let second = requests.recv().await.unwrap();
            reply(&events, &second);
            reply(&events, &first);
            (requests, events)
        });

        let (first, second) = (json!("a"), json!("b"));
        let (a, b) = tokio::join!(
            client.call(RequestKind::GetCellRange, &first),
            client.call(RequestKind::GetCellRange, &second),
        );
        assert_eq!(a.unwrap(), json!({ "echo": "a" }));
        assert_eq!(b.unwrap(), json!({ "echo": "b" }));
        assert_eq!(client.pending_count(), 0);
        drop(worker.await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, Duration::from_secs(5));

        tokio::spawn(async move {
            while let Some(req) = requests.recv().await {
                events
                    .send(WorkerEvent::Response(WorkerResponse::success(
                        req.kind,
                        req.id + 1000,
                        json!(null),
                    )))
                    .unwrap();
                reply(&events, &req);
            }
        });

        let payload = json!(7);
        let value = client
            .call(RequestKind::ProcessSheet, &payload)
            .await
            .unwrap();
        assert_eq!(value, json!({ "echo": 7 }));
    }
}

// ============================================================================
// Timeouts
// ============================================================================

mod timeouts {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_discarded() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, Duration::from_millis(100));

        let (held_tx, mut held_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(req) = requests.recv().await {
                held_tx.send(req).unwrap();
            }
        });

        let payload = json!({});
        let err = client
            .call(RequestKind::LoadWorkbook, &payload)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ViewerError::WorkerTimeout {
                timeout_ms: 100,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(client.pending_count(), 0);

        // The answer arrives after the caller gave up.
        let late = held_rx.recv().await.unwrap();
        reply(&events, &late);
        tokio::task::yield_now().await;
        assert_eq!(client.pending_count(), 0);
        assert!(!client.is_closed());

        let next = tokio::spawn({
            let client = client.clone();
            async move {
                let payload = json!("next");
                client.call(RequestKind::GetCellRange, &payload).await
            }
        });
        let req = held_rx.recv().await.unwrap();
        reply(&events, &req);
        assert_eq!(next.await.unwrap().unwrap(), json!({ "echo": "next" }));
    }
}

// ============================================================================
// Faults and shutdown
// ============================================================================

mod faults {
    use super::*;

    #[tokio::test]
    async fn test_fault_rejects_every_pending_call_once() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, Duration::from_secs(5));

        tokio::spawn(async move {
            let _first = requests.recv().await.unwrap();
            let _second = requests.recv().await.unwrap();
            events
                .send(WorkerEvent::Fault("out of memory".to_string()))
                .unwrap();
            requests
        });

        let (one, two, three) = (json!(1), json!(2), json!(3));
        let (a, b) = tokio::join!(
            client.call(RequestKind::ProcessSheet, &one),
            client.call(RequestKind::ProcessSheet, &two),
        );
        for result in [a, b] {
            assert!(matches!(result, Err(ViewerError::WorkerFault(ref m)) if m == "out of memory"));
        }
        assert_eq!(client.pending_count(), 0);
        assert!(client.is_closed());

        let err = client
            .call(RequestKind::ProcessSheet, &three)
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::WorkerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_later_calls() {
        let (endpoint, mut requests, _events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, Duration::from_secs(5));

        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                let payload = json!({});
                client.call(RequestKind::LoadWorkbook, &payload).await
            }
        });
        assert!(requests.recv().await.is_some());

        client.close();
        assert!(matches!(
            pending.await.unwrap(),
            Err(ViewerError::WorkerUnavailable(_))
        ));
        assert!(requests.recv().await.is_none());
        let payload = json!({});
        assert!(matches!(
            client.call(RequestKind::LoadWorkbook, &payload).await,
            Err(ViewerError::WorkerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_worker_disconnect_is_a_fault() {
        let (endpoint, mut requests, events) = WorkerEndpoint::pair();
        let client = RpcClient::open(endpoint, Duration::from_secs(5));

        tokio::spawn(async move {
            let _req = requests.recv().await;
            drop(events);
            requests
        });

        let payload = json!({});
        let err = client
            .call(RequestKind::SearchInSheet, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::WorkerFault(_)));
    }
}
