// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! tonic boundary: inbound metadata in, `Status` out.

use std::collections::BTreeMap;
use std::sync::Arc;

use prost::Message;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, KeyAndValueRef, MetadataMap};
use tonic::{Request, Response, Status};

use crate::config::{CoreConfig, DEFAULT_MAX_MESSAGE_BYTES};
use crate::context::{Context, ContextValue, Metadata, ResponseHeaders, RESPONSE_HEADERS_KEY};
use crate::exception::ExceptionMapper;
use crate::interceptor::{CallParameters, InterceptorChain};

/// Raw inbound value set plus the response-header sink for one call.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    values: Metadata,
    response_headers: ResponseHeaders,
}

impl TransportContext {
    /// Binary (`-bin`) entries and values that are not visible ASCII are
    /// dropped.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let mut values = Metadata::new();
        for entry in metadata.iter() {
            if let KeyAndValueRef::Ascii(key, value) = entry {
                if let Ok(value) = value.to_str() {
                    values
                        .entry(key.as_str().to_string())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }
        Self {
            values,
            response_headers: ResponseHeaders::default(),
        }
    }

    pub fn values(&self) -> &Metadata {
        &self.values
    }

    pub fn response_headers(&self) -> &ResponseHeaders {
        &self.response_headers
    }

    pub fn to_context(&self) -> Context {
        let values = self
            .values
            .iter()
            .map(|(key, list)| (key.clone(), ContextValue::List(list.clone())))
            .chain(std::iter::once((
                RESPONSE_HEADERS_KEY.to_string(),
                ContextValue::Headers(self.response_headers.clone()),
            )));
        Context::from_values(values)
    }
}

/// Writes the context's metadata namespace onto an outgoing request so the
/// downstream service sees breadcrumbs, token, user and telemetry. Returns
/// the number of values written.
pub fn forward_context(context: &Context, metadata: &mut MetadataMap) -> usize {
    let mut written = 0;
    for (key, values) in context.metadata() {
        let Ok(name) = AsciiMetadataKey::from_bytes(key.as_bytes()) else {
            tracing::warn!(target: "grpc_shared::transport", key = %key, "metadata key not forwardable");
            continue;
        };
        for value in values {
            match AsciiMetadataValue::try_from(value.as_str()) {
                Ok(value) => {
                    metadata.append(name.clone(), value);
                    written += 1;
                }
                Err(_) => {
                    tracing::warn!(target: "grpc_shared::transport", key = %key, "metadata value not forwardable");
                }
            }
        }
    }
    written
}

pub fn decode_with_max_size<T: Message + Default>(
    bytes: &[u8],
    max_bytes: usize,
) -> Result<T, Status> {
    if bytes.len() > max_bytes {
        return Err(Status::resource_exhausted("request too large"));
    }
    T::decode(bytes).map_err(|_| Status::invalid_argument("invalid protobuf payload"))
}

fn apply_headers(headers: &ResponseHeaders, metadata: &mut MetadataMap) {
    for (key, value) in headers.snapshot() {
        match (
            AsciiMetadataKey::from_bytes(key.as_bytes()),
            AsciiMetadataValue::try_from(value.as_str()),
        ) {
            (Ok(key), Ok(value)) => {
                metadata.insert(key, value);
            }
            _ => {
                tracing::warn!(target: "grpc_shared::transport", key = %key, "response header dropped");
            }
        }
    }
}

/// Binds the interceptor chain and the exception mapper to tonic handlers.
#[derive(Debug, Clone)]
pub struct Gateway {
    chain: Arc<InterceptorChain>,
    errors: Arc<ExceptionMapper>,
    max_message_bytes: usize,
}

impl Gateway {
    pub fn new(chain: Arc<InterceptorChain>, errors: Arc<ExceptionMapper>) -> Self {
        Self {
            chain,
            errors,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn from_config(
        chain: Arc<InterceptorChain>,
        errors: Arc<ExceptionMapper>,
        config: &CoreConfig,
    ) -> Self {
        Self::new(chain, errors).with_max_message_bytes(config.max_message_bytes)
    }

    #[must_use]
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Entry point for generated service impls.
    pub async fn handle<I, O>(
        &self,
        service: &str,
        action: &str,
        request: Request<I>,
    ) -> Result<Response<O>, Status>
    where
        I: Message + 'static,
        O: Message + 'static,
    {
        if request.get_ref().encoded_len() > self.max_message_bytes {
            return Err(Status::resource_exhausted("request too large"));
        }
        let transport = TransportContext::from_metadata(request.metadata());
        self.dispatch(service, action, transport, request.into_inner())
            .await
    }

    /// Like [`Gateway::handle`] for a still-encoded request body.
    pub async fn handle_encoded<I, O>(
        &self,
        service: &str,
        action: &str,
        metadata: &MetadataMap,
        body: &[u8],
    ) -> Result<Response<O>, Status>
    where
        I: Message + Default + 'static,
        O: Message + 'static,
    {
        let message: I = decode_with_max_size(body, self.max_message_bytes)?;
        let transport = TransportContext::from_metadata(metadata);
        self.dispatch(service, action, transport, message).await
    }

    async fn dispatch<I, O>(
        &self,
        service: &str,
        action: &str,
        transport: TransportContext,
        message: I,
    ) -> Result<Response<O>, Status>
    where
        I: Message + 'static,
        O: Message + 'static,
    {
        let headers = transport.response_headers().clone();
        let params = CallParameters::new(Context::new(), Box::new(message)).with_transport(transport);
        match self.chain.call(service, action, params).await {
            Ok(output) => {
                let name = output.message_name();
                let output = output.into_any().downcast::<O>().map_err(|_| {
                    tracing::error!(
                        target: "grpc_shared::transport",
                        service,
                        action,
                        returned = name,
                        "handler returned an unexpected message type"
                    );
                    Status::internal("internal error")
                })?;
                let mut response = Response::new(*output);
                apply_headers(&headers, response.metadata_mut());
                Ok(response)
            }
            Err(failure) => {
                tracing::info!(
                    target: "grpc_shared::transport",
                    service,
                    action,
                    code = failure.code(),
                    type_key = failure.type_key(),
                    "call failed"
                );
                let mut status = self.errors.to_wire_error(&failure).into_status();
                apply_headers(&headers, status.metadata_mut());
                Err(status)
            }
        }
    }
}

/// ASCII view of a metadata map, e.g. for logging a downstream response.
pub fn metadata_to_map(metadata: &MetadataMap) -> BTreeMap<String, String> {
    metadata
        .iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => value
                .to_str()
                .ok()
                .map(|value| (key.as_str().to_string(), value.to_string())),
            KeyAndValueRef::Binary(..) => None,
        })
        .collect()
}
