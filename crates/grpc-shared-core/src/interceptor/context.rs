// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{CallParameters, CallResult, Interceptor, Next};

/// Builds the typed [`Context`](crate::Context) from the transport values.
/// Calls without a transport context keep the context they were given.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInterceptor;

#[tonic::async_trait]
impl Interceptor for ContextInterceptor {
    fn name(&self) -> &'static str {
        "context"
    }

    async fn process(
        &self,
        service: &str,
        action: &str,
        mut params: CallParameters,
        next: Next<'_>,
    ) -> CallResult {
        if let Some(transport) = params.transport.as_ref() {
            params.context = transport.to_context();
        }
        next.run(service, action, params).await
    }
}
