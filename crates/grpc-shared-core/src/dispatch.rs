// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::error::Failure;
use crate::interceptor::{CallCore, CallParameters, CallResult};
use crate::mapper::{MapperRegistry, Object, WireMessage};
use crate::registry::ServiceRegistry;

/// Application command bus: takes a command object, returns its result.
#[tonic::async_trait]
pub trait CommandBus: Send + Sync + 'static {
    async fn dispatch(&self, command: Object) -> Result<Object, Failure>;
}

/// Server-side glue shared by every service implementation: wire message
/// to command, command through the bus, result back to a wire message.
#[derive(Clone)]
pub struct CommandBridge {
    mapper: Arc<MapperRegistry>,
    bus: Arc<dyn CommandBus>,
}

impl CommandBridge {
    pub fn new(mapper: Arc<MapperRegistry>, bus: Arc<dyn CommandBus>) -> Self {
        Self { mapper, bus }
    }

    pub async fn call_action(&self, action: &str, message: Box<dyn WireMessage>) -> CallResult {
        let command = self.mapper.from_wire_message(message)?;
        tracing::debug!(target: "grpc_shared::dispatch", action, "command dispatched");
        let result = self.bus.dispatch(command).await?;
        Ok(self.mapper.to_wire_message(&*result)?)
    }
}

/// Innermost link of the production chain: routes the call to the service
/// registered for the service id.
#[derive(Debug, Clone)]
pub struct ServiceDispatcher {
    services: Arc<ServiceRegistry>,
}

impl ServiceDispatcher {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

#[tonic::async_trait]
impl CallCore for ServiceDispatcher {
    async fn call(&self, service: &str, action: &str, params: CallParameters) -> CallResult {
        let handler = self.services.get(service)?;
        handler
            .call(action, &params.context, params.auth.as_ref(), params.message)
            .await
    }
}
