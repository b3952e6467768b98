// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Handler implementations indexed by the RPC service interfaces they serve.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tonic::Code;

use crate::auth::AuthContext;
use crate::context::Context;
use crate::error::{BoxError, Failure};
use crate::interceptor::CallResult;
use crate::mapper::WireMessage;

/// Common marker every service interface extends; never indexed itself.
pub const SERVICE_MARKER: &str = "ServiceInterface";

#[tonic::async_trait]
pub trait RpcService: Send + Sync + 'static {
    async fn call(
        &self,
        action: &str,
        context: &Context,
        auth: Option<&AuthContext>,
        message: Box<dyn WireMessage>,
    ) -> CallResult;
}

type ServiceFactory = Box<dyn FnOnce() -> Result<Arc<dyn RpcService>, BoxError> + Send>;

/// One discovered implementation, as produced by generated or hand-written
/// registration code.
pub struct ServiceDescriptor {
    pub implementation: &'static str,
    pub interfaces: Vec<&'static str>,
    /// Client stubs implement the interfaces too but never serve them.
    pub client_only: bool,
    factory: ServiceFactory,
}

impl ServiceDescriptor {
    pub fn new<F>(implementation: &'static str, interfaces: Vec<&'static str>, factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn RpcService>, BoxError> + Send + 'static,
    {
        Self {
            implementation,
            interfaces,
            client_only: false,
            factory: Box::new(factory),
        }
    }

    #[must_use]
    pub fn client_only(mut self) -> Self {
        self.client_only = true;
        self
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("implementation", &self.implementation)
            .field("interfaces", &self.interfaces)
            .field("client_only", &self.client_only)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("interface {interface} already served by {existing}, rejected {implementation}")]
    DuplicateInterface {
        interface: String,
        existing: &'static str,
        implementation: &'static str,
    },
    #[error("no service registered for {0}")]
    ServiceNotFound(String),
}

impl From<RegistryError> for Failure {
    fn from(err: RegistryError) -> Self {
        let code = match err {
            RegistryError::ServiceNotFound(_) => Code::Unimplemented,
            RegistryError::DuplicateInterface { .. } => Code::Internal,
        };
        Failure::with_code(err, code as i32)
    }
}

static GLOBAL: OnceLock<Arc<ServiceRegistry>> = OnceLock::new();

#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, (&'static str, Arc<dyn RpcService>)>,
}

impl ServiceRegistry {
    /// A registry that resolves nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn discover(
        descriptors: impl IntoIterator<Item = ServiceDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        tracing::info!(target: "grpc_shared::registry", services = registry.len(), "service discovery complete");
        Ok(registry)
    }

    /// Instantiates the implementation and indexes it under every interface
    /// it serves. Client stubs and implementations whose constructor fails
    /// are skipped.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<(), RegistryError> {
        if descriptor.client_only {
            tracing::debug!(target: "grpc_shared::registry", implementation = descriptor.implementation, "client stub skipped");
            return Ok(());
        }
        let interfaces: Vec<&'static str> = descriptor
            .interfaces
            .iter()
            .copied()
            .filter(|interface| *interface != SERVICE_MARKER)
            .collect();
        for interface in &interfaces {
            if let Some((existing, _)) = self.services.get(*interface) {
                tracing::warn!(
                    target: "grpc_shared::registry",
                    interface,
                    existing,
                    implementation = descriptor.implementation,
                    "duplicate service interface rejected"
                );
                return Err(RegistryError::DuplicateInterface {
                    interface: (*interface).to_string(),
                    existing: *existing,
                    implementation: descriptor.implementation,
                });
            }
        }
        let service = match (descriptor.factory)() {
            Ok(service) => service,
            Err(err) => {
                tracing::warn!(
                    target: "grpc_shared::registry",
                    implementation = descriptor.implementation,
                    error = %err,
                    "service could not be instantiated; skipped"
                );
                return Ok(());
            }
        };
        for interface in interfaces {
            self.services.insert(
                interface.to_string(),
                (descriptor.implementation, Arc::clone(&service)),
            );
        }
        Ok(())
    }

    pub fn get(&self, interface: &str) -> Result<Arc<dyn RpcService>, RegistryError> {
        self.services
            .get(interface)
            .map(|(_, service)| Arc::clone(service))
            .ok_or_else(|| RegistryError::ServiceNotFound(interface.to_string()))
    }

    pub fn interfaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn install_global(registry: Arc<Self>) -> Result<(), Arc<Self>> {
        GLOBAL.set(registry)
    }

    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("interfaces", &self.interfaces())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[tonic::async_trait]
    impl RpcService for Noop {
        async fn call(
            &self,
            _action: &str,
            _context: &Context,
            _auth: Option<&AuthContext>,
            message: Box<dyn WireMessage>,
        ) -> CallResult {
            Ok(message)
        }
    }

    fn noop(implementation: &'static str, interfaces: Vec<&'static str>) -> ServiceDescriptor {
        ServiceDescriptor::new(implementation, interfaces, || {
            Ok(Arc::new(Noop) as Arc<dyn RpcService>)
        })
    }

    #[test]
    fn indexes_every_interface_except_the_marker() {
        let registry = ServiceRegistry::discover([noop(
            "BillingServer",
            vec![SERVICE_MARKER, "billing.v1.Invoices", "billing.v1.Refunds"],
        )])
        .unwrap();
        assert_eq!(registry.interfaces(), vec!["billing.v1.Invoices", "billing.v1.Refunds"]);
        assert!(registry.get(SERVICE_MARKER).is_err());
    }

    #[test]
    fn skips_client_stubs_and_failed_constructors() {
        let broken = ServiceDescriptor::new("Broken", vec!["billing.v1.Ledger"], || {
            Err("missing dependency".into())
        });
        let registry = ServiceRegistry::discover([
            noop("InvoicesClient", vec!["billing.v1.Invoices"]).client_only(),
            broken,
        ])
        .unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_interface_is_rejected() {
        let err = ServiceRegistry::discover([
            noop("A", vec!["billing.v1.Invoices"]),
            noop("B", vec!["billing.v1.Invoices"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateInterface {
                interface: "billing.v1.Invoices".to_string(),
                existing: "A",
                implementation: "B",
            }
        );
    }

    #[test]
    fn missing_service_maps_to_unimplemented() {
        let err = ServiceRegistry::empty().get("billing.v1.Invoices").err().unwrap();
        let failure = Failure::from(err);
        assert_eq!(failure.code(), Code::Unimplemented as i32);
    }
}
