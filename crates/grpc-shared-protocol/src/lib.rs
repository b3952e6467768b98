// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! grpc-shared-protocol
//!
//! Wire DTOs that every grpc-shared service agrees on. The structured error
//! payload travels inside a `google.rpc.Status` blob under the
//! [`STATUS_DETAILS_METADATA_KEY`] trailer, packed as `google.protobuf.Any`.
//!
//! The messages are declared with `prost` derives directly so the crate has
//! no protoc step. Field tags are part of the wire contract.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trailer carrying the binary-encoded `google.rpc.Status`.
pub const STATUS_DETAILS_METADATA_KEY: &str = "grpc-status-details-bin";

pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected payload type {actual}, expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },
    #[error("malformed payload: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Fully qualified protobuf name of a wire DTO.
pub trait TypeUrl {
    const FULL_NAME: &'static str;

    fn type_url() -> String {
        format!("{TYPE_URL_PREFIX}{}", Self::FULL_NAME)
    }
}

#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
}

impl TypeUrl for ServiceInfo {
    const FULL_NAME: &'static str = "shared.common.v1.Service";
}

/// Structured error payload. `type` is the normalized error-type key, not
/// the name of the type that raised it.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[prost(string, tag = "1")]
    #[serde(rename = "type")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(int32, tag = "3")]
    pub code: i32,
    #[prost(message, optional, tag = "4")]
    pub service: Option<ServiceInfo>,
}

impl TypeUrl for ErrorInfo {
    const FULL_NAME: &'static str = "shared.common.v1.Exception";
}

/// `google.protobuf.Any`.
#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// `google.rpc.Status`.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

pub fn pack_any<M>(message: &M) -> Any
where
    M: Message + TypeUrl,
{
    Any {
        type_url: M::type_url(),
        value: message.encode_to_vec(),
    }
}

pub fn unpack_any<M>(any: &Any) -> Result<M, ProtocolError>
where
    M: Message + Default + TypeUrl,
{
    if any.full_name() != M::FULL_NAME {
        return Err(ProtocolError::TypeMismatch {
            expected: M::FULL_NAME,
            actual: any.type_url.clone(),
        });
    }
    Ok(M::decode(any.value.as_slice())?)
}

impl Any {
    /// Name after the last `/` of the type URL.
    pub fn full_name(&self) -> &str {
        self.type_url
            .rsplit_once('/')
            .map_or(self.type_url.as_str(), |(_, name)| name)
    }
}

#[must_use]
pub fn encode_status_details(status: &RpcStatus) -> Bytes {
    Bytes::from(status.encode_to_vec())
}

pub fn decode_status_details(bytes: &[u8]) -> Result<RpcStatus, ProtocolError> {
    Ok(RpcStatus::decode(bytes)?)
}
