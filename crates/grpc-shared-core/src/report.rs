// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::error::Error as StdError;

/// Sink for failures that were handled locally but are still worth knowing
/// about. Fire-and-forget.
pub trait Reporter: Send + Sync {
    fn report(&self, error: &(dyn StdError + 'static));
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, error: &(dyn StdError + 'static)) {
        let causes: Vec<String> = std::iter::successors(error.source(), |err| (*err).source())
            .map(ToString::to_string)
            .collect();
        tracing::warn!(
            target: "grpc_shared::report",
            error = %error,
            causes = ?causes,
            "handled failure reported"
        );
    }
}
