// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

#![no_main]

use std::sync::Arc;

use grpc_shared_core::{decode_with_max_size, ExceptionMapper, NullServiceRepository};
use grpc_shared_protocol::{decode_status_details, RpcStatus};
use libfuzzer_sys::fuzz_target;
use prost::Message;
use tonic::{Code, Status};

fuzz_target!(|data: &[u8]| {
    let max = data.len().saturating_sub(1);
    let _ = decode_with_max_size::<RpcStatus>(data, max);

    if let Ok(status) = decode_status_details(data) {
        let encoded = status.encode_to_vec();
        let _ = decode_with_max_size::<RpcStatus>(&encoded, encoded.len());
    }

    let mapper = ExceptionMapper::new(Arc::new(NullServiceRepository));
    let code = data.first().map_or(Code::Unknown, |b| Code::from_i32(i32::from(*b % 17)));
    let failure = mapper.from_status(&Status::with_details(code, "fuzz", data.to_vec().into()));
    assert_eq!(failure.code(), code as i32);
});
