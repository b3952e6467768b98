// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;
use tonic::{Code, Status};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum MapperError {
    #[error("mapper not found for {0}")]
    NotFound(String),

    #[error("mapper already registered for {0}")]
    DuplicateRegistration(String),

    #[error("mapper for {expected} received a value of another type")]
    TypeMismatch { expected: &'static str },

    #[error("mapping {type_name} failed: {source}")]
    Mapping {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },
}

/// An application failure on its way through the chain.
///
/// The normalized error-type key is captured from the concrete error type at
/// construction, so it survives type erasure.
#[derive(Debug)]
pub struct Failure {
    type_key: String,
    code: i32,
    error: BoxError,
}

impl Failure {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::with_code(error, 0)
    }

    pub fn with_code<E>(error: E, code: i32) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            type_key: error_type_key(std::any::type_name::<E>()),
            code,
            error: Box::new(error),
        }
    }

    /// Builds a failure whose key was decided elsewhere, e.g. by a per-type
    /// error mapper reconstructing a remote error.
    pub fn from_parts(type_key: impl Into<String>, code: i32, error: BoxError) -> Self {
        Self {
            type_key: type_key.into(),
            code,
            error,
        }
    }

    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.error.as_ref()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.error.is::<E>()
    }

    /// Source chain of the wrapped error, nearest cause first.
    pub fn causes(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        std::iter::successors(self.error.source(), |err| (*err).source())
    }

    pub fn into_inner(self) -> BoxError {
        self.error
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl From<MapperError> for Failure {
    fn from(err: MapperError) -> Self {
        let code = match err {
            MapperError::Mapping { .. } => Code::InvalidArgument,
            _ => Code::Internal,
        };
        Self::with_code(err, code as i32)
    }
}

impl From<Status> for Failure {
    fn from(status: Status) -> Self {
        let code = status.code() as i32;
        Self::with_code(status, code)
    }
}

/// Normalized error-type key: the short type name, snake-cased.
///
/// Every uppercase letter except a leading one gets an underscore prefix,
/// so `HTTPError` becomes `h_t_t_p_error`. Path segments and generic
/// arguments are dropped first.
pub fn error_type_key(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let short = base.rsplit("::").next().unwrap_or(base);
    let mut out = String::with_capacity(short.len() + 4);
    for (idx, ch) in short.chars().enumerate() {
        if ch.is_ascii_uppercase() && idx > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Error)]
    #[error("balance too low")]
    struct InsufficientFunds;

    #[derive(Debug, Error)]
    #[error("ledger write failed")]
    struct LedgerWrite {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn key_is_snake_cased_short_name() {
        assert_eq!(error_type_key("billing::errors::InsufficientFunds"), "insufficient_funds");
        assert_eq!(error_type_key("HTTPError"), "h_t_t_p_error");
        assert_eq!(error_type_key("a::Wrapper<b::Inner>"), "wrapper");
        assert_eq!(error_type_key("plain"), "plain");
    }

    #[test]
    fn failure_captures_concrete_type() {
        let failure = Failure::with_code(InsufficientFunds, 9);
        assert_eq!(failure.type_key(), "insufficient_funds");
        assert_eq!(failure.code(), 9);
        assert_eq!(failure.message(), "balance too low");
        assert!(failure.downcast_ref::<InsufficientFunds>().is_some());
    }

    #[test]
    fn causes_walk_the_source_chain() {
        let failure = Failure::new(LedgerWrite {
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        });
        let causes: Vec<String> = failure.causes().map(|c| c.to_string()).collect();
        assert_eq!(causes, vec!["disk full".to_string()]);
    }

    #[test]
    fn status_conversion_keeps_code() {
        let failure = Failure::from(Status::permission_denied("nope"));
        assert_eq!(failure.code(), Code::PermissionDenied as i32);
        assert_eq!(failure.type_key(), "status");
    }

    proptest! {
        #[test]
        fn key_never_contains_uppercase_or_path(segments in prop::collection::vec("[A-Za-z][A-Za-z0-9]{0,8}", 1..4)) {
            let name = segments.join("::");
            let key = error_type_key(&name);
            prop_assert!(!key.contains("::"));
            prop_assert!(!key.chars().any(|c| c.is_ascii_uppercase()));
        }
    }
}
