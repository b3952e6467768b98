// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::{Code, Status};

use crate::error::Failure;

pub const TRANSPORT_GRPC: &str = "grpc";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// The actor a token resolved to upstream. Only `id` is interpreted here;
/// everything else rides along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl AuthenticatedUser {
    pub const KIND: &'static str = "authenticated_user";

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Auth state visible to everything below the guard for one call.
///
/// The actor is only exposed once a token started the context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthContext {
    actor: Option<AuthenticatedUser>,
    token: Option<Token>,
    transport: Option<String>,
}

impl AuthContext {
    pub fn new(actor: Option<AuthenticatedUser>) -> Self {
        Self {
            actor,
            token: None,
            transport: None,
        }
    }

    pub fn start(&mut self, token: Token, transport: impl Into<String>) {
        self.token = Some(token);
        self.transport = Some(transport.into());
    }

    pub fn is_started(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn actor(&self) -> Option<&AuthenticatedUser> {
        self.token.as_ref().and(self.actor.as_ref())
    }

    pub fn transport(&self) -> Option<&str> {
        self.transport.as_deref()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("user_not_found")]
    UserNotFound,
    #[error("token_is_missing")]
    TokenMissing,
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        Status::unauthenticated(err.to_string())
    }
}

impl From<AuthError> for Failure {
    fn from(err: AuthError) -> Self {
        Failure::with_code(err, Code::Unauthenticated as i32)
    }
}

/// Handler-facing view of the call's auth context.
#[derive(Debug, Clone, Copy)]
pub struct AuthService<'a> {
    auth: Option<&'a AuthContext>,
}

impl<'a> AuthService<'a> {
    pub fn new(auth: Option<&'a AuthContext>) -> Self {
        Self { auth }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    pub fn user(&self) -> Option<&'a AuthenticatedUser> {
        self.auth.and_then(AuthContext::actor)
    }

    pub fn user_or_unauthenticated(&self) -> Result<&'a AuthenticatedUser, AuthError> {
        self.user().ok_or(AuthError::UserNotFound)
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    pub fn token(&self) -> Option<&'a str> {
        self.auth.and_then(AuthContext::token).map(Token::id)
    }

    pub fn token_or_unauthenticated(&self) -> Result<&'a str, AuthError> {
        self.token().ok_or(AuthError::TokenMissing)
    }
}
