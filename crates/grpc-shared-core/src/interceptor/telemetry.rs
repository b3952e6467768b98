// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::propagation::Injector;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::context::TelemetryCarrier;
use crate::error::BoxError;
use crate::report::Reporter;

use super::{CallParameters, CallResult, Interceptor, Next};

/// Extracts the propagation fields of a span for downstream services.
pub trait Propagator: Send + Sync + 'static {
    fn inject(&self, span: &tracing::Span) -> Result<TelemetryCarrier, BoxError>;
}

/// Injects the span's OpenTelemetry context through the process-wide text
/// map propagator. Spans without an OpenTelemetry layer behind them, or a
/// process that never installed a propagator, inject nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelPropagator;

impl Propagator for OtelPropagator {
    fn inject(&self, span: &tracing::Span) -> Result<TelemetryCarrier, BoxError> {
        let context = span.context();
        let mut carrier = TelemetryCarrier::new();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&context, &mut CarrierInjector(&mut carrier));
        });
        Ok(carrier)
    }
}

struct CarrierInjector<'a>(&'a mut TelemetryCarrier);

impl Injector for CarrierInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// Installs the W3C trace-context propagator (`traceparent`, `tracestate`)
/// as the process-wide text map propagator.
pub fn install_trace_context_propagator() {
    global::set_text_map_propagator(TraceContextPropagator::new());
}

/// Runs the rest of the chain inside a span named after the action.
pub struct TelemetryInterceptor {
    propagator: Arc<dyn Propagator>,
    reporter: Arc<dyn Reporter>,
}

impl TelemetryInterceptor {
    pub fn new(propagator: Arc<dyn Propagator>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            propagator,
            reporter,
        }
    }
}

#[tonic::async_trait]
impl Interceptor for TelemetryInterceptor {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    async fn process(
        &self,
        service: &str,
        action: &str,
        mut params: CallParameters,
        next: Next<'_>,
    ) -> CallResult {
        let span = tracing::info_span!(
            target: "grpc_shared::chain",
            "grpc_request",
            otel.name = %format!("GRPC request {action}"),
            otel.kind = "producer",
            controller = %service,
            action = %action,
        );
        match self.propagator.inject(&span) {
            Ok(carrier) => params.context = params.context.with_telemetry(&carrier),
            Err(err) => self.reporter.report(&*err),
        }
        next.run(service, action, params).instrument(span).await
    }
}
