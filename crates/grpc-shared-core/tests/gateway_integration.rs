// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use grpc_shared_core::identity::StaticServiceRepository;
use grpc_shared_core::{
    AuthContext, AuthError, AuthService, CallResult, Context, ExceptionMapper, Failure, Gateway,
    InterceptorChain, OtelPropagator, RequestCollector, ResponseError, RpcService, Service,
    ServiceDescriptor, ServiceDispatcher, ServiceRegistry, StandardInterceptors, TracingReporter,
    WireMessage,
};
use grpc_shared_protocol::{decode_status_details, unpack_any, ErrorInfo};
use prost::Message;
use thiserror::Error;
use tonic::{Code, Request};

#[derive(Clone, PartialEq, prost::Message)]
struct EchoRequest {
    #[prost(string, tag = "1")]
    text: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct EchoReply {
    #[prost(string, tag = "1")]
    text: String,
    #[prost(string, tag = "2")]
    origin: String,
    #[prost(string, tag = "3")]
    token: String,
}

#[derive(Debug, Error)]
#[error("echo rejected")]
struct EchoRejected;

struct Echo;

#[tonic::async_trait]
impl RpcService for Echo {
    async fn call(
        &self,
        action: &str,
        context: &Context,
        auth: Option<&AuthContext>,
        message: Box<dyn WireMessage>,
    ) -> CallResult {
        let request = message
            .into_any()
            .downcast::<EchoRequest>()
            .map_err(|_| Failure::from(tonic::Status::invalid_argument("unexpected message")))?;
        if let Some(headers) = context.response_headers() {
            headers.set("x-handled-by", format!("echo/{action}"));
        }
        let auth = AuthService::new(auth);
        match request.text.as_str() {
            "fail" => Err(Failure::with_code(EchoRejected, Code::FailedPrecondition as i32)),
            "secure" => {
                let user = auth.user_or_unauthenticated().map_err(Failure::from)?;
                Ok(Box::new(EchoReply {
                    text: user.id.clone(),
                    ..EchoReply::default()
                }))
            }
            _ => Ok(Box::new(EchoReply {
                text: request.text,
                origin: context.initial_breadcrumb().to_string(),
                token: auth.token().unwrap_or_default().to_string(),
            })),
        }
    }
}

struct Fixture {
    gateway: Gateway,
    collector: Arc<RequestCollector>,
    errors: Arc<ExceptionMapper>,
}

fn fixture() -> Fixture {
    let services = Arc::new(StaticServiceRepository::new(Service::new("echo", "1.0.0")));
    let registry = ServiceRegistry::discover([ServiceDescriptor::new(
        "EchoServer",
        vec!["ServiceInterface", "echo.v1.Echo"],
        || Ok(Arc::new(Echo) as Arc<dyn RpcService>),
    )])
    .unwrap();
    let collector = Arc::new(RequestCollector::new(false));
    let chain = InterceptorChain::standard(
        Arc::new(ServiceDispatcher::new(Arc::new(registry))),
        StandardInterceptors {
            services: services.clone(),
            reporter: Arc::new(TracingReporter),
            collector: collector.clone(),
            propagator: Arc::new(OtelPropagator),
        },
    );
    let errors = Arc::new(ExceptionMapper::new(services));
    Fixture {
        gateway: Gateway::new(Arc::new(chain), errors.clone()),
        collector,
        errors,
    }
}

fn request(text: &str, metadata: &[(&'static str, &'static str)]) -> Request<EchoRequest> {
    let mut request = Request::new(EchoRequest {
        text: text.to_string(),
    });
    for (key, value) in metadata {
        request
            .metadata_mut()
            .append(*key, value.parse().unwrap());
    }
    request
}

#[tokio::test]
async fn successful_call_carries_context_and_response_headers() {
    let fixture = fixture();
    let response = fixture
        .gateway
        .handle::<_, EchoReply>(
            "echo.v1.Echo",
            "Say",
            request("hi", &[("token", "t-1"), ("breadcrumbs", "edge")]),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .metadata()
            .get("x-handled-by")
            .and_then(|v| v.to_str().ok()),
        Some("echo/Say")
    );
    let reply = response.into_inner();
    assert_eq!(reply.text, "hi");
    assert_eq!(reply.origin, "edge");
    assert_eq!(reply.token, "t-1");
    assert!(fixture.collector.snapshot().is_none());
}

#[tokio::test]
async fn application_failure_becomes_structured_status() {
    let fixture = fixture();
    let status = fixture
        .gateway
        .handle::<_, EchoReply>("echo.v1.Echo", "Say", request("fail", &[]))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(status.message(), "echo rejected");
    assert_eq!(
        status
            .metadata()
            .get("x-handled-by")
            .and_then(|v| v.to_str().ok()),
        Some("echo/Say")
    );
    let rpc = decode_status_details(status.details()).unwrap();
    let info: ErrorInfo = unpack_any(&rpc.details[0]).unwrap();
    assert_eq!(info.r#type, "echo_rejected");
    assert_eq!(info.service.unwrap().name, "echo");

    let failure = fixture.errors.from_status(&status);
    let err = failure.downcast_ref::<ResponseError>().unwrap();
    assert_eq!(err.code, Code::FailedPrecondition as i32);
}

#[tokio::test]
async fn missing_user_is_unauthenticated() {
    let fixture = fixture();
    let status = fixture
        .gateway
        .handle::<_, EchoReply>("echo.v1.Echo", "Say", request("secure", &[("token", "t-1")]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), AuthError::UserNotFound.to_string());
}

#[tokio::test]
async fn unknown_service_is_unimplemented() {
    let fixture = fixture();
    let status = fixture
        .gateway
        .handle::<_, EchoReply>("echo.v1.Missing", "Say", request("hi", &[]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
}

#[tokio::test]
async fn oversized_request_is_rejected_before_the_chain() {
    let fixture = fixture();
    let gateway = fixture.gateway.with_max_message_bytes(8);
    let status = gateway
        .handle::<_, EchoReply>("echo.v1.Echo", "Say", request("well past eight bytes", &[]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);

    let body = EchoRequest {
        text: "well past eight bytes".to_string(),
    }
    .encode_to_vec();
    let status = gateway
        .handle_encoded::<EchoRequest, EchoReply>(
            "echo.v1.Echo",
            "Say",
            &tonic::metadata::MetadataMap::new(),
            &body,
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);
}
