// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use grpc_shared_core::{error_type_key, CoreConfig};
use grpc_shared_protocol::{
    decode_status_details, encode_status_details, pack_any, unpack_any, ErrorInfo, RpcStatus,
    ServiceInfo, STATUS_DETAILS_METADATA_KEY,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grpc-sharedctl", about = "Inspect grpc-shared wire errors")]
struct Cli {
    /// tracing filter directive, e.g. `debug` or `grpc_shared=trace`.
    #[arg(long, global = true, default_value = "warn")]
    log: String,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a base64 `grpc-status-details-bin` value.
    DecodeStatus {
        #[arg(long)]
        details_b64: String,
    },
    /// Build a `grpc-status-details-bin` value carrying one error payload.
    EncodeError {
        #[arg(long = "type")]
        type_key: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value_t = 2)]
        code: i32,
        #[arg(long)]
        service_name: Option<String>,
        #[arg(long, default_value = "")]
        service_version: String,
    },
    /// Print the error-type key derived from a type name.
    ErrorKey { type_name: String },
    /// Print the core configuration resolved from the environment.
    Config,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .with_writer(std::io::stderr)
        .init();

    let out = match cli.cmd {
        Command::DecodeStatus { details_b64 } => decode_status(&details_b64),
        Command::EncodeError {
            type_key,
            message,
            code,
            service_name,
            service_version,
        } => Ok(encode_error(
            type_key,
            message,
            code,
            service_name.map(|name| ServiceInfo {
                name,
                version: service_version,
            }),
        )),
        Command::ErrorKey { type_name } => Ok(json!({
            "type_name": type_name,
            "key": error_type_key(&type_name),
        })),
        Command::Config => show_config(),
    };
    match out {
        Ok(v) => println!("{}", v),
        Err(msg) => {
            println!("{}", json!({"error": msg}));
            std::process::exit(1);
        }
    }
}

fn decode_status(details_b64: &str) -> Result<serde_json::Value, String> {
    let bytes = STANDARD
        .decode(details_b64.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    let status = decode_status_details(&bytes).map_err(|e| e.to_string())?;
    tracing::debug!(code = status.code, details = status.details.len(), "status decoded");
    let details: Vec<serde_json::Value> = status
        .details
        .iter()
        .map(|any| match unpack_any::<ErrorInfo>(any) {
            Ok(info) => json!({"type_url": any.type_url, "error": info}),
            Err(err) => json!({
                "type_url": any.type_url,
                "undecoded": STANDARD.encode(&any.value),
                "reason": err.to_string(),
            }),
        })
        .collect();
    Ok(json!({
        "code": status.code,
        "message": status.message,
        "details": details,
    }))
}

fn encode_error(
    type_key: String,
    message: String,
    code: i32,
    service: Option<ServiceInfo>,
) -> serde_json::Value {
    let info = ErrorInfo {
        r#type: type_key,
        message: message.clone(),
        code,
        service,
    };
    let status = RpcStatus {
        code,
        message,
        details: vec![pack_any(&info)],
    };
    json!({
        "metadata_key": STATUS_DETAILS_METADATA_KEY,
        "value_b64": STANDARD.encode(encode_status_details(&status)),
    })
}

fn show_config() -> Result<serde_json::Value, String> {
    let config = CoreConfig::from_env().map_err(|e| e.to_string())?;
    Ok(json!({
        "service": config.service,
        "send_default_pii": config.send_default_pii,
        "max_message_bytes": config.max_message_bytes,
    }))
}
