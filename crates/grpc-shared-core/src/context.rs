// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Immutable per-call context.
//!
//! Values live in one map. Protocol-reserved keys stay at the top level;
//! everything else is metadata and sits under [`METADATA_KEY`] as a map of
//! key to value list, the same shape gRPC metadata has on the wire. Every
//! domain helper (breadcrumbs, telemetry, service, user, token, external
//! flag) is expressed through [`Context::with_value`] and
//! [`Context::value`] on that metadata map.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::auth::AuthenticatedUser;
use crate::identity::Service;

pub type Metadata = BTreeMap<String, Vec<String>>;
pub type TelemetryCarrier = BTreeMap<String, String>;

pub const METADATA_KEY: &str = "metadata";
pub const OPTIONS_KEY: &str = "options";
pub const RESPONSE_HEADERS_KEY: &str = "response-headers";

/// Keys routed to the top level on construction. Keys starting with
/// [`SYSTEM_KEY_SIGIL`] (HTTP/2 pseudo headers) are treated the same way.
pub const SYSTEM_KEYS: [&str; 4] = [
    "grpc-accept-encoding",
    "content-type",
    "user-agent",
    RESPONSE_HEADERS_KEY,
];
pub const SYSTEM_KEY_SIGIL: char = ':';

pub const METADATA_USER: &str = "user";
pub const METADATA_TOKEN: &str = "token";
pub const METADATA_EXTERNAL_REQUEST: &str = "external";
pub const METADATA_BREADCRUMBS: &str = "breadcrumbs";
pub const METADATA_TELEMETRY: &str = "telemetry";
pub const METADATA_SERVICE: &str = "service";

pub fn is_system_key(key: &str) -> bool {
    key.starts_with(SYSTEM_KEY_SIGIL) || SYSTEM_KEYS.contains(&key)
}

/// Shared sink for response headers. Clones point at the same sink.
#[derive(Clone, Default)]
pub struct ResponseHeaders {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ResponseHeaders {
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl PartialEq for ResponseHeaders {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.snapshot() == other.snapshot()
    }
}

impl fmt::Debug for ResponseHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResponseHeaders")
            .field(&self.snapshot())
            .finish()
    }
}

impl Serialize for ResponseHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    Text(String),
    List(Vec<String>),
    Map(Metadata),
    Headers(ResponseHeaders),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(list) => Some(list.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&ResponseHeaders> {
        match self {
            Self::Headers(headers) => Some(headers),
            _ => None,
        }
    }

    fn into_list(self) -> Result<Vec<String>, Self> {
        match self {
            Self::Text(text) => Ok(vec![text]),
            Self::List(list) => Ok(list),
            other => Err(other),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Metadata> for ContextValue {
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

impl From<ResponseHeaders> for ContextValue {
    fn from(value: ResponseHeaders) -> Self {
        Self::Headers(value)
    }
}

/// Per-call context. Every `with_*` method returns a new context over a
/// copied value map; the receiver is never modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context {
    values: BTreeMap<String, ContextValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a raw transport value set into system keys and metadata.
    /// Values that cannot be expressed as a value list stay at the top level.
    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ContextValue>,
    {
        let mut top = BTreeMap::new();
        let mut metadata = Metadata::new();
        for (key, value) in values {
            let key = key.into();
            let value = value.into();
            if is_system_key(&key) {
                top.insert(key, value);
                continue;
            }
            match value.into_list() {
                Ok(list) => {
                    metadata.insert(key, list);
                }
                Err(value) => {
                    top.insert(key, value);
                }
            }
        }
        top.insert(METADATA_KEY.to_string(), ContextValue::Map(metadata));
        Self { values: top }
    }

    #[must_use]
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        let mut values = self.values.clone();
        values.insert(key.into(), value.into());
        Self { values }
    }

    pub fn value(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn value_or(&self, key: &str, default: ContextValue) -> ContextValue {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn values(&self) -> &BTreeMap<String, ContextValue> {
        &self.values
    }

    pub fn response_headers(&self) -> Option<&ResponseHeaders> {
        self.value(RESPONSE_HEADERS_KEY)
            .and_then(ContextValue::as_headers)
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata_ref().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn with_metadata(&self, metadata: Metadata) -> Self {
        self.with_value(METADATA_KEY, ContextValue::Map(metadata))
    }

    pub fn options(&self) -> Metadata {
        self.value(OPTIONS_KEY)
            .and_then(ContextValue::as_map)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn with_options(&self, options: Metadata) -> Self {
        self.with_value(OPTIONS_KEY, ContextValue::Map(options))
    }

    #[must_use]
    pub fn add_breadcrumb(&self, service: impl Into<String>) -> Self {
        let mut metadata = self.metadata();
        metadata
            .entry(METADATA_BREADCRUMBS.to_string())
            .or_default()
            .push(service.into());
        self.with_metadata(metadata)
    }

    pub fn breadcrumbs(&self) -> &[String] {
        self.metadata_entry(METADATA_BREADCRUMBS).unwrap_or(&[])
    }

    /// The hop the call originated from, or `""` when no breadcrumb exists.
    pub fn initial_breadcrumb(&self) -> &str {
        self.breadcrumbs().first().map_or("", String::as_str)
    }

    #[must_use]
    pub fn with_telemetry(&self, carrier: &TelemetryCarrier) -> Self {
        let encoded = serde_json::Value::Object(
            carrier
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
        .to_string();
        self.with_metadata_entry(METADATA_TELEMETRY, vec![encoded])
    }

    pub fn telemetry(&self) -> TelemetryCarrier {
        self.metadata_first(METADATA_TELEMETRY)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Stamps the service identity and appends it as a breadcrumb.
    #[must_use]
    pub fn with_service(&self, service: &Service) -> Self {
        let encoded = serde_json::json!([service.name, service.version]).to_string();
        self.with_metadata_entry(METADATA_SERVICE, vec![encoded])
            .add_breadcrumb(service.name.clone())
    }

    pub fn service(&self) -> Service {
        self.metadata_first(METADATA_SERVICE)
            .and_then(|raw| serde_json::from_str::<(String, String)>(raw).ok())
            .map(|(name, version)| Service { name, version })
            .unwrap_or_default()
    }

    pub fn with_user(&self, user: &AuthenticatedUser) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_string(user)?;
        Ok(self.with_metadata_entry(
            METADATA_USER,
            vec![AuthenticatedUser::KIND.to_string(), encoded],
        ))
    }

    pub fn user(&self) -> Option<AuthenticatedUser> {
        let encoded = self.metadata_entry(METADATA_USER)?.get(1)?;
        match serde_json::from_str(encoded) {
            Ok(user) => Some(user),
            Err(err) => {
                tracing::debug!(target: "grpc_shared::context", error = %err, "ignoring undecodable user metadata");
                None
            }
        }
    }

    pub fn has_user(&self) -> bool {
        self.metadata_first(METADATA_USER).is_some()
    }

    /// `None` leaves the context as it is.
    #[must_use]
    pub fn with_token(&self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.with_metadata_entry(METADATA_TOKEN, vec![token.to_string()]),
            None => self.clone(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.metadata_first(METADATA_TOKEN)
    }

    #[must_use]
    pub fn mark_as_external(&self) -> Self {
        self.with_metadata_entry(METADATA_EXTERNAL_REQUEST, vec!["1".to_string()])
    }

    /// Internal unless the external flag holds a truthy value. A context
    /// without metadata is internal.
    pub fn is_internal_request(&self) -> bool {
        let Some(metadata) = self.metadata_ref() else {
            return true;
        };
        match metadata.get(METADATA_EXTERNAL_REQUEST) {
            Some(values) => !values.first().is_some_and(|v| is_truthy(v)),
            None => true,
        }
    }

    pub fn is_external_request(&self) -> bool {
        !self.is_internal_request()
    }

    fn metadata_ref(&self) -> Option<&Metadata> {
        self.value(METADATA_KEY).and_then(ContextValue::as_map)
    }

    fn metadata_entry(&self, key: &str) -> Option<&[String]> {
        self.metadata_ref()?.get(key).map(Vec::as_slice)
    }

    fn metadata_first(&self, key: &str) -> Option<&str> {
        self.metadata_entry(key)?.first().map(String::as_str)
    }

    fn with_metadata_entry(&self, key: &str, values: Vec<String>) -> Self {
        let mut metadata = self.metadata();
        metadata.insert(key.to_string(), values);
        self.with_metadata(metadata)
    }
}

fn is_truthy(value: &str) -> bool {
    !(value.is_empty() || value == "0")
}
