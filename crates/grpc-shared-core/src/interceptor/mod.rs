// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ordered middleware around the handler call.
//!
//! Each [`Interceptor`] gets the call parameters and the rest of the chain
//! as [`Next`]; it continues by running `next` and short-circuits by
//! returning without it. The context and auth context travel inside
//! [`CallParameters`], so whatever an interceptor sets is visible to every
//! link below it and to nothing outside the call.

use std::fmt;
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::context::Context;
use crate::error::Failure;
use crate::identity::ServiceRepository;
use crate::mapper::WireMessage;
use crate::report::Reporter;
use crate::transport::TransportContext;

mod collector;
mod context;
mod guard;
mod service;
mod telemetry;
mod token;

pub use collector::{RequestCollector, RequestSnapshot};
pub use context::ContextInterceptor;
pub use guard::GuardInterceptor;
pub use service::ServiceExtractorInterceptor;
pub use telemetry::{
    install_trace_context_propagator, OtelPropagator, Propagator, TelemetryInterceptor,
};
pub use token::TokenExtractorInterceptor;

pub type CallResult = Result<Box<dyn WireMessage>, Failure>;

pub struct CallParameters {
    /// Raw inbound values; absent for calls that did not come off the wire.
    pub transport: Option<TransportContext>,
    pub context: Context,
    /// Set by the guard.
    pub auth: Option<AuthContext>,
    pub message: Box<dyn WireMessage>,
}

impl CallParameters {
    pub fn new(context: Context, message: Box<dyn WireMessage>) -> Self {
        Self {
            transport: None,
            context,
            auth: None,
            message,
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportContext) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl fmt::Debug for CallParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallParameters")
            .field("context", &self.context)
            .field("auth", &self.auth)
            .field("message", &self.message.message_name())
            .finish_non_exhaustive()
    }
}

#[tonic::async_trait]
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        service: &str,
        action: &str,
        params: CallParameters,
        next: Next<'_>,
    ) -> CallResult;
}

/// Innermost link: the real handler invocation.
#[tonic::async_trait]
pub trait CallCore: Send + Sync + 'static {
    async fn call(&self, service: &str, action: &str, params: CallParameters) -> CallResult;
}

/// Remainder of the chain below the current interceptor.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    core: &'a dyn CallCore,
}

impl<'a> Next<'a> {
    pub async fn run(self, service: &str, action: &str, params: CallParameters) -> CallResult {
        match self.rest.split_first() {
            Some((head, rest)) => {
                tracing::trace!(target: "grpc_shared::chain", interceptor = head.name(), action, "enter");
                head.process(
                    service,
                    action,
                    params,
                    Next {
                        rest,
                        core: self.core,
                    },
                )
                .await
            }
            None => self.core.call(service, action, params).await,
        }
    }
}

/// Collaborators of the standard chain.
pub struct StandardInterceptors {
    pub services: Arc<dyn ServiceRepository>,
    pub reporter: Arc<dyn Reporter>,
    pub collector: Arc<RequestCollector>,
    pub propagator: Arc<dyn Propagator>,
}

pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    core: Arc<dyn CallCore>,
}

impl InterceptorChain {
    pub fn new(core: Arc<dyn CallCore>) -> Self {
        Self {
            interceptors: Vec::new(),
            core,
        }
    }

    /// The fixed production order: context, guard, token extractor,
    /// service extractor, telemetry, request collector.
    pub fn standard(core: Arc<dyn CallCore>, parts: StandardInterceptors) -> Self {
        let collector: Arc<dyn Interceptor> = parts.collector;
        let mut chain = Self::new(core)
            .with(ContextInterceptor)
            .with(GuardInterceptor)
            .with(TokenExtractorInterceptor::new(parts.reporter.clone()))
            .with(ServiceExtractorInterceptor::new(parts.services))
            .with(TelemetryInterceptor::new(parts.propagator, parts.reporter));
        chain.push_arc(collector);
        chain
    }

    /// Appends as the new innermost interceptor.
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn push_arc(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub async fn call(&self, service: &str, action: &str, params: CallParameters) -> CallResult {
        Next {
            rest: &self.interceptors,
            core: self.core.as_ref(),
        }
        .run(service, action, params)
        .await
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tonic::Status;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[tonic::async_trait]
    impl Interceptor for Record {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(
            &self,
            service: &str,
            action: &str,
            params: CallParameters,
            next: Next<'_>,
        ) -> CallResult {
            self.log.lock().push(format!("{}>", self.name));
            let result = next.run(service, action, params).await;
            self.log.lock().push(format!("<{}", self.name));
            result
        }
    }

    struct Reject;

    #[tonic::async_trait]
    impl Interceptor for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        async fn process(
            &self,
            _service: &str,
            _action: &str,
            _params: CallParameters,
            _next: Next<'_>,
        ) -> CallResult {
            Err(Failure::from(Status::permission_denied("stop")))
        }
    }

    struct Echo(Arc<Mutex<Vec<String>>>);

    #[tonic::async_trait]
    impl CallCore for Echo {
        async fn call(&self, _service: &str, action: &str, params: CallParameters) -> CallResult {
            self.0.lock().push(format!("core:{action}"));
            Ok(params.message)
        }
    }

    fn params() -> CallParameters {
        CallParameters::new(Context::new(), Box::new(String::from("ping")))
    }

    #[tokio::test]
    async fn interceptors_nest_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(Arc::new(Echo(log.clone())))
            .with(Record {
                name: "a",
                log: log.clone(),
            })
            .with(Record {
                name: "b",
                log: log.clone(),
            });
        let out = chain.call("svc", "Ping", params()).await.unwrap();
        assert_eq!(out.as_any().downcast_ref::<String>().map(String::as_str), Some("ping"));
        assert_eq!(*log.lock(), vec!["a>", "b>", "core:Ping", "<b", "<a"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(Arc::new(Echo(log.clone())))
            .with(Record {
                name: "a",
                log: log.clone(),
            })
            .with(Reject);
        let err = chain.call("svc", "Ping", params()).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied as i32);
        assert_eq!(*log.lock(), vec!["a>", "<a"]);
    }

    #[test]
    fn standard_order_is_fixed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::standard(
            Arc::new(Echo(log)),
            StandardInterceptors {
                services: Arc::new(crate::identity::NullServiceRepository),
                reporter: Arc::new(crate::report::TracingReporter),
                collector: Arc::new(RequestCollector::new(false)),
                propagator: Arc::new(OtelPropagator),
            },
        );
        assert_eq!(
            chain.names(),
            vec![
                "context",
                "guard",
                "token_extractor",
                "service_extractor",
                "telemetry",
                "request_collector"
            ]
        );
    }
}
