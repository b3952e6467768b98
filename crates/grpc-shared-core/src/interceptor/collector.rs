// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::context::{Context, METADATA_TOKEN, METADATA_USER};
use crate::error::Failure;

use super::{CallParameters, CallResult, Interceptor, Next};

/// What the collector knows about the call in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSnapshot {
    pub service: String,
    pub action: String,
    pub headers: BTreeMap<String, String>,
    pub values: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl RequestSnapshot {
    fn capture(service: &str, action: &str, params: &CallParameters, send_default_pii: bool) -> Self {
        let mut headers = params
            .context
            .response_headers()
            .map(|headers| headers.snapshot())
            .unwrap_or_default();
        let mut values = params.context.clone();
        let mut payload = None;
        if send_default_pii {
            payload = Some(format!("{:?}", params.message));
        } else {
            headers.remove(METADATA_USER);
            headers.remove(METADATA_TOKEN);
            let mut metadata = values.metadata();
            metadata.remove(METADATA_USER);
            metadata.remove(METADATA_TOKEN);
            values = values.with_metadata(metadata);
        }
        Self {
            service: service.to_string(),
            action: action.to_string(),
            headers,
            values,
            payload,
        }
    }
}

tokio::task_local! {
    /// Snapshots of the calls this task is serving, keyed by collector id.
    static IN_FLIGHT: HashMap<u64, RequestSnapshot>;
}

static NEXT_COLLECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Observes the call for diagnostics. The snapshot is scoped to the call's
/// own task: it is visible from inside the call only, and gone once the
/// call returns, fails or is dropped. Failed calls are logged with it.
#[derive(Debug)]
pub struct RequestCollector {
    id: u64,
    send_default_pii: bool,
}

impl Default for RequestCollector {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RequestCollector {
    pub fn new(send_default_pii: bool) -> Self {
        Self {
            id: NEXT_COLLECTOR_ID.fetch_add(1, Ordering::Relaxed),
            send_default_pii,
        }
    }

    /// Snapshot of the call currently running on this task, if this
    /// collector is observing one.
    pub fn snapshot(&self) -> Option<RequestSnapshot> {
        IN_FLIGHT
            .try_with(|in_flight| in_flight.get(&self.id).cloned())
            .ok()
            .flatten()
    }

    fn populate(snapshot: &RequestSnapshot, failure: &Failure) {
        let request = serde_json::to_string(snapshot).unwrap_or_default();
        tracing::debug!(
            target: "grpc_shared::request",
            service = %snapshot.service,
            action = %snapshot.action,
            error = %failure,
            request = %request,
            "request failed"
        );
    }
}

#[tonic::async_trait]
impl Interceptor for RequestCollector {
    fn name(&self) -> &'static str {
        "request_collector"
    }

    async fn process(
        &self,
        service: &str,
        action: &str,
        params: CallParameters,
        next: Next<'_>,
    ) -> CallResult {
        let snapshot = RequestSnapshot::capture(service, action, &params, self.send_default_pii);
        let mut in_flight = IN_FLIGHT.try_with(Clone::clone).unwrap_or_default();
        in_flight.insert(self.id, snapshot.clone());
        let result = IN_FLIGHT
            .scope(in_flight, next.run(service, action, params))
            .await;
        if let Err(failure) = &result {
            Self::populate(&snapshot, failure);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::Barrier;

    use crate::interceptor::{CallCore, InterceptorChain};

    fn params() -> CallParameters {
        let context = Context::new()
            .with_token(Some("secret"))
            .add_breadcrumb("gateway");
        CallParameters::new(context, Box::new(String::from("card=4111")))
    }

    #[test]
    fn pii_is_stripped_by_default() {
        let snapshot = RequestSnapshot::capture("Billing", "Charge", &params(), false);
        assert_eq!(snapshot.values.token(), None);
        assert_eq!(snapshot.values.breadcrumbs(), ["gateway".to_string()]);
        assert!(snapshot.payload.is_none());
    }

    #[test]
    fn pii_is_kept_when_enabled() {
        let snapshot = RequestSnapshot::capture("Billing", "Charge", &params(), true);
        assert_eq!(snapshot.values.token(), Some("secret"));
        assert!(snapshot.payload.unwrap().contains("card=4111"));
    }

    /// Records the action of the snapshot the collector exposes while the
    /// call runs. Both calls meet at the barrier so they overlap.
    struct SnapshotReader {
        collector: Arc<RequestCollector>,
        barrier: Arc<Barrier>,
        seen: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    #[tonic::async_trait]
    impl CallCore for SnapshotReader {
        async fn call(&self, _service: &str, action: &str, params: CallParameters) -> CallResult {
            self.barrier.wait().await;
            let seen = self.collector.snapshot().map(|s| s.action);
            self.seen.lock().push((action.to_string(), seen));
            self.barrier.wait().await;
            Ok(params.message)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_calls_each_see_their_own_snapshot() {
        let collector = Arc::new(RequestCollector::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = InterceptorChain::new(Arc::new(SnapshotReader {
            collector: collector.clone(),
            barrier: Arc::new(Barrier::new(2)),
            seen: seen.clone(),
        }));
        chain.push_arc(collector.clone());
        let chain = Arc::new(chain);

        let calls: Vec<_> = ["A", "B"]
            .into_iter()
            .map(|action| {
                let chain = chain.clone();
                tokio::spawn(async move { chain.call("svc", action, params()).await.is_ok() })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap());
        }

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("A".to_string(), Some("A".to_string())),
                ("B".to_string(), Some("B".to_string())),
            ]
        );
        assert!(collector.snapshot().is_none());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Rejecting;

    #[tonic::async_trait]
    impl CallCore for Rejecting {
        async fn call(&self, _service: &str, _action: &str, _params: CallParameters) -> CallResult {
            Err(Failure::from(tonic::Status::failed_precondition("card declined")))
        }
    }

    fn failing_chain(collector: Arc<RequestCollector>) -> InterceptorChain {
        let mut chain = InterceptorChain::new(Arc::new(Rejecting));
        chain.push_arc(collector);
        chain
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_call_is_logged_without_credentials() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let collector = Arc::new(RequestCollector::new(false));
        let err = failing_chain(collector.clone())
            .call("Billing", "Charge", params())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition as i32);
        assert!(collector.snapshot().is_none());

        let logged = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logged.contains("request failed"));
        assert!(logged.contains("Charge"));
        assert!(logged.contains("card declined"));
        assert!(logged.contains("gateway"));
        assert!(!logged.contains("secret"));
        assert!(!logged.contains("card=4111"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_call_carries_payload_when_pii_is_enabled() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        failing_chain(Arc::new(RequestCollector::new(true)))
            .call("Billing", "Charge", params())
            .await
            .unwrap_err();

        let logged = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logged.contains("secret"));
        assert!(logged.contains("card=4111"));
    }
}
