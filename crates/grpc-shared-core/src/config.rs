// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::identity::{Service, ENV_SERVICE_NAME, ENV_SERVICE_VERSION};

pub const ENV_SEND_DEFAULT_PII: &str = "GRPC_SHARED_SEND_DEFAULT_PII";
pub const ENV_MAX_MESSAGE_BYTES: &str = "GRPC_SHARED_MAX_MESSAGE_BYTES";

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub service: Service,
    /// Lets the request collector include payloads and credentials in its
    /// diagnostic events.
    pub send_default_pii: bool,
    pub max_message_bytes: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            service: Service::default(),
            send_default_pii: false,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let send_default_pii = match lookup(ENV_SEND_DEFAULT_PII) {
            Some(raw) => parse_flag(ENV_SEND_DEFAULT_PII, &raw)?,
            None => defaults.send_default_pii,
        };
        let max_message_bytes = match lookup(ENV_MAX_MESSAGE_BYTES) {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::Invalid {
                    key: ENV_MAX_MESSAGE_BYTES,
                    value: raw,
                })?,
            None => defaults.max_message_bytes,
        };
        Ok(Self {
            service: Service {
                name: lookup(ENV_SERVICE_NAME).unwrap_or_default(),
                version: lookup(ENV_SERVICE_VERSION).unwrap_or_default(),
            },
            send_default_pii,
            max_message_bytes,
        })
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}
