// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::report::Reporter;

use super::{CallParameters, CallResult, Interceptor, Next};

/// Writes the token and actor of the call's auth context back into the
/// context, so nested calls forward them. Without an auth context the call
/// passes through untouched; a user that cannot be encoded is reported and
/// left out.
pub struct TokenExtractorInterceptor {
    reporter: Arc<dyn Reporter>,
}

impl TokenExtractorInterceptor {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self { reporter }
    }
}

#[tonic::async_trait]
impl Interceptor for TokenExtractorInterceptor {
    fn name(&self) -> &'static str {
        "token_extractor"
    }

    async fn process(
        &self,
        service: &str,
        action: &str,
        mut params: CallParameters,
        next: Next<'_>,
    ) -> CallResult {
        if let Some(auth) = params.auth.as_ref() {
            let mut context = params.context.clone();
            if let Some(token) = auth.token() {
                context = context.with_token(Some(token.id()));
            }
            if let Some(user) = auth.actor() {
                match context.with_user(user) {
                    Ok(with_user) => context = with_user,
                    Err(err) => self.reporter.report(&err),
                }
            }
            params.context = context;
        }
        next.run(service, action, params).await
    }
}
