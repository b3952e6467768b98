// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::auth::{AuthContext, Token, TRANSPORT_GRPC};

use super::{CallParameters, CallResult, Interceptor, Next};

/// Establishes the call's [`AuthContext`] from the token and the
/// pre-resolved user carried in the context metadata.
///
/// The guard does not reject anything itself; handlers decide through
/// [`AuthService`](crate::AuthService).
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardInterceptor;

#[tonic::async_trait]
impl Interceptor for GuardInterceptor {
    fn name(&self) -> &'static str {
        "guard"
    }

    async fn process(
        &self,
        service: &str,
        action: &str,
        mut params: CallParameters,
        next: Next<'_>,
    ) -> CallResult {
        let mut auth = AuthContext::new(params.context.user());
        if let Some(token) = params.context.token() {
            auth.start(Token::new(token), TRANSPORT_GRPC);
        }
        tracing::debug!(
            target: "grpc_shared::chain",
            action,
            has_token = auth.is_started(),
            has_actor = auth.actor().is_some(),
            "auth context established"
        );
        params.auth = Some(auth);
        next.run(service, action, params).await
    }
}
