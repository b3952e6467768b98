// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! grpc-shared-core
//!
//! Request-processing core shared by gRPC services:
//! - an immutable per-call [`Context`] threaded through an ordered
//!   [`InterceptorChain`]
//! - a [`MapperRegistry`] converting between application commands and wire
//!   messages
//! - an [`ExceptionMapper`] translating application failures to structured
//!   `tonic::Status` responses and back
//! - a [`ServiceRegistry`] of handler implementations and the [`Gateway`]
//!   that binds all of it to tonic.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod identity;
pub mod interceptor;
pub mod mapper;
pub mod registry;
pub mod report;
pub mod transport;

pub use crate::auth::{AuthContext, AuthError, AuthService, AuthenticatedUser, Token};
pub use crate::config::{ConfigError, CoreConfig};
pub use crate::context::{Context, ContextValue, Metadata, ResponseHeaders};
pub use crate::dispatch::{CommandBridge, CommandBus, ServiceDispatcher};
pub use crate::error::{error_type_key, BoxError, Failure, MapperError};
pub use crate::exception::{ConnectionError, ErrorMapper, ExceptionMapper, ResponseError, WireError};
pub use crate::identity::{
    EnvironmentServiceRepository, NullServiceRepository, Service, ServiceRepository,
    StaticServiceRepository,
};
pub use crate::interceptor::{
    install_trace_context_propagator, CallCore, CallParameters, CallResult, Interceptor,
    InterceptorChain, Next, OtelPropagator, Propagator, RequestCollector, RequestSnapshot,
    StandardInterceptors,
};
pub use crate::mapper::{JsonMapper, Mapper, MapperRegistry, Object, WireMessage};
pub use crate::registry::{RegistryError, RpcService, ServiceDescriptor, ServiceRegistry};
pub use crate::report::{Reporter, TracingReporter};
pub use crate::transport::{
    decode_with_max_size, forward_context, metadata_to_map, Gateway, TransportContext,
};
