// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Application failure <-> wire status translation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use grpc_shared_protocol::{
    decode_status_details, encode_status_details, pack_any, unpack_any, Any, ErrorInfo,
    RpcStatus, ServiceInfo, STATUS_DETAILS_METADATA_KEY,
};
use parking_lot::RwLock;
use thiserror::Error;
use tonic::{Code, Status};

use crate::error::{error_type_key, Failure, MapperError};
use crate::identity::ServiceRepository;
use crate::transport::metadata_to_map;

/// Type key given to payloads describing an erased cause.
pub const CAUSE_TYPE_KEY: &str = "error";

/// Wire-level error: numeric code, message and packed detail payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    pub details: Vec<Any>,
}

impl WireError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Any) -> Self {
        self.details.push(detail);
        self
    }

    /// First detail decoded as an [`ErrorInfo`], if there is one.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.details.first().and_then(|any| unpack_any(any).ok())
    }

    /// Zero and out-of-range codes go out as `Unknown`; the original number
    /// stays in the details blob.
    pub fn into_status(self) -> Status {
        let code = match Code::from_i32(self.code) {
            Code::Ok => Code::Unknown,
            code => code,
        };
        if self.details.is_empty() {
            return Status::new(code, self.message);
        }
        let details = encode_status_details(&RpcStatus {
            code: self.code,
            message: self.message.clone(),
            details: self.details,
        });
        Status::with_details(code, self.message, details)
    }
}

/// Per-error-type translator, registered under an error-type key.
pub trait ErrorMapper: Send + Sync + 'static {
    fn to_wire_error(&self, failure: &Failure) -> WireError;
    fn from_wire_error(&self, info: &ErrorInfo) -> Failure;
}

/// Remote service could not be reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("connection failed: {message}")]
pub struct ConnectionError {
    pub message: String,
    pub code: i32,
    pub metadata: BTreeMap<String, String>,
}

/// Remote failure with no local mapper to rebuild it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ResponseError {
    pub message: String,
    pub code: i32,
    pub metadata: BTreeMap<String, String>,
}

type ErrorMapperFactory = Box<dyn Fn() -> Arc<dyn ErrorMapper> + Send + Sync>;

static GLOBAL: OnceLock<Arc<ExceptionMapper>> = OnceLock::new();

pub struct ExceptionMapper {
    factories: HashMap<String, ErrorMapperFactory>,
    resolved: RwLock<HashMap<String, Arc<dyn ErrorMapper>>>,
    services: Arc<dyn ServiceRepository>,
}

impl ExceptionMapper {
    pub fn new(services: Arc<dyn ServiceRepository>) -> Self {
        Self {
            factories: HashMap::new(),
            resolved: RwLock::new(HashMap::new()),
            services,
        }
    }

    /// Registers a mapper constructor for an error-type key. The constructor
    /// runs on first use; a second registration for the same key is rejected.
    pub fn register<M, F>(&mut self, type_key: impl Into<String>, factory: F) -> Result<(), MapperError>
    where
        M: ErrorMapper,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let type_key = type_key.into();
        if self.factories.contains_key(&type_key) {
            tracing::warn!(target: "grpc_shared::exception", type_key = %type_key, "duplicate error mapper registration rejected");
            return Err(MapperError::DuplicateRegistration(type_key));
        }
        tracing::debug!(target: "grpc_shared::exception", type_key = %type_key, "error mapper registered");
        self.factories.insert(
            type_key,
            Box::new(move || Arc::new(factory()) as Arc<dyn ErrorMapper>),
        );
        Ok(())
    }

    /// Registers under the key derived from `E`'s type name.
    pub fn register_for<E, M, F>(&mut self, factory: F) -> Result<(), MapperError>
    where
        E: 'static,
        M: ErrorMapper,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.register(error_type_key(std::any::type_name::<E>()), factory)
    }

    pub fn has_mapper(&self, type_key: &str) -> bool {
        self.factories.contains_key(type_key)
    }

    /// Outbound direction. A mapper registered for the failure's type key
    /// decides everything. Otherwise the details carry a generic payload for
    /// the failure, then one payload per cause in `Error::source` order:
    /// the cause raised nearest to the failure comes first, the root cause
    /// last.
    pub fn to_wire_error(&self, failure: &Failure) -> WireError {
        if let Some(mapper) = self.resolve(failure.type_key()) {
            return mapper.to_wire_error(failure);
        }
        let service = ServiceInfo::from(&self.services.service());
        let mut wire = WireError::new(failure.code(), failure.message()).with_detail(pack_any(
            &ErrorInfo {
                r#type: failure.type_key().to_string(),
                message: failure.message(),
                code: failure.code(),
                service: Some(service.clone()),
            },
        ));
        for cause in failure.causes() {
            wire = wire.with_detail(pack_any(&ErrorInfo {
                r#type: CAUSE_TYPE_KEY.to_string(),
                message: cause.to_string(),
                code: 0,
                service: Some(service.clone()),
            }));
        }
        wire
    }

    /// Inbound direction for a status returned by a downstream call.
    pub fn from_status(&self, status: &Status) -> Failure {
        let Some(details) = status_details(status) else {
            let metadata = metadata_to_map(status.metadata());
            let message = status.message().to_string();
            let code = status.code() as i32;
            return match status.code() {
                Code::Unavailable => Failure::with_code(
                    ConnectionError {
                        message,
                        code,
                        metadata,
                    },
                    code,
                ),
                _ => Failure::with_code(
                    ResponseError {
                        message,
                        code,
                        metadata,
                    },
                    code,
                ),
            };
        };
        let info = decode_status_details(&details)
            .ok()
            .and_then(|rpc| rpc.details.first().and_then(|any| unpack_any::<ErrorInfo>(any).ok()));
        match info {
            Some(info) if self.has_mapper(&info.r#type) => self.from_error_info(&info),
            Some(_) | None => {
                tracing::debug!(
                    target: "grpc_shared::exception",
                    code = status.code() as i32,
                    "no error mapper for status details"
                );
                let code = status.code() as i32;
                Failure::with_code(
                    ResponseError {
                        message: status.message().to_string(),
                        code,
                        metadata: metadata_to_map(status.metadata()),
                    },
                    code,
                )
            }
        }
    }

    pub fn from_error_info(&self, info: &ErrorInfo) -> Failure {
        match self.resolve(&info.r#type) {
            Some(mapper) => mapper.from_wire_error(info),
            None => Failure::with_code(
                ResponseError {
                    message: info.message.clone(),
                    code: info.code,
                    metadata: BTreeMap::new(),
                },
                info.code,
            ),
        }
    }

    fn resolve(&self, type_key: &str) -> Option<Arc<dyn ErrorMapper>> {
        if let Some(mapper) = self.resolved.read().get(type_key) {
            return Some(Arc::clone(mapper));
        }
        let factory = self.factories.get(type_key)?;
        let mut resolved = self.resolved.write();
        let mapper = resolved
            .entry(type_key.to_string())
            .or_insert_with(|| factory());
        Some(Arc::clone(mapper))
    }

    pub fn install_global(mapper: Arc<Self>) -> Result<(), Arc<Self>> {
        GLOBAL.set(mapper)
    }

    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }
}

impl fmt::Debug for ExceptionMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("ExceptionMapper")
            .field("registered", &keys)
            .finish()
    }
}

fn status_details(status: &Status) -> Option<Vec<u8>> {
    if !status.details().is_empty() {
        return Some(status.details().to_vec());
    }
    status
        .metadata()
        .get_bin(STATUS_DETAILS_METADATA_KEY)
        .and_then(|value| value.to_bytes().ok())
        .map(|bytes| bytes.to_vec())
        .filter(|bytes| !bytes.is_empty())
}
