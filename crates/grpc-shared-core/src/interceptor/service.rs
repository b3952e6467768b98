// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::identity::ServiceRepository;

use super::{CallParameters, CallResult, Interceptor, Next};

/// Stamps this service's identity into the context and appends its name to
/// the breadcrumbs.
pub struct ServiceExtractorInterceptor {
    services: Arc<dyn ServiceRepository>,
}

impl ServiceExtractorInterceptor {
    pub fn new(services: Arc<dyn ServiceRepository>) -> Self {
        Self { services }
    }
}

#[tonic::async_trait]
impl Interceptor for ServiceExtractorInterceptor {
    fn name(&self) -> &'static str {
        "service_extractor"
    }

    async fn process(
        &self,
        service: &str,
        action: &str,
        mut params: CallParameters,
        next: Next<'_>,
    ) -> CallResult {
        params.context = params.context.with_service(&self.services.service());
        next.run(service, action, params).await
    }
}
