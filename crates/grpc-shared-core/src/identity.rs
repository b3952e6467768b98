// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use grpc_shared_protocol::ServiceInfo;
use serde::{Deserialize, Serialize};

pub const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
pub const ENV_SERVICE_VERSION: &str = "OTEL_SERVICE_VERSION";

/// Identity of the running service, stamped into breadcrumbs and generic
/// error payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub version: String,
}

impl Service {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl From<&Service> for ServiceInfo {
    fn from(service: &Service) -> Self {
        ServiceInfo {
            name: service.name.clone(),
            version: service.version.clone(),
        }
    }
}

pub trait ServiceRepository: Send + Sync {
    fn service(&self) -> Service;
}

/// Reads the identity from `OTEL_SERVICE_NAME` / `OTEL_SERVICE_VERSION` on
/// every lookup; unset variables yield empty strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentServiceRepository;

impl ServiceRepository for EnvironmentServiceRepository {
    fn service(&self) -> Service {
        Service {
            name: std::env::var(ENV_SERVICE_NAME).unwrap_or_default(),
            version: std::env::var(ENV_SERVICE_VERSION).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticServiceRepository {
    service: Service,
}

impl StaticServiceRepository {
    pub fn new(service: Service) -> Self {
        Self { service }
    }
}

impl ServiceRepository for StaticServiceRepository {
    fn service(&self) -> Service {
        self.service.clone()
    }
}

/// For processes that have no identity of their own, e.g. CLI tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullServiceRepository;

impl ServiceRepository for NullServiceRepository {
    fn service(&self) -> Service {
        Service::default()
    }
}
