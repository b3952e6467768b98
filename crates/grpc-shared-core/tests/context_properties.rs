// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use grpc_shared_core::context::{is_system_key, METADATA_KEY};
use grpc_shared_core::{AuthenticatedUser, Context, ContextValue, Service};
use proptest::prelude::*;

fn key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}"
}

proptest! {
    #[test]
    fn with_value_leaves_the_receiver_untouched(k in key(), v in ".{0,24}", seed in ".{0,8}") {
        let original = Context::new().with_value("seed", seed.as_str());
        let before = original.clone();
        let updated = original.with_value(k.clone(), v.as_str());

        prop_assert_eq!(updated.value(&k).and_then(ContextValue::as_text), Some(v.as_str()));
        prop_assert_eq!(&original, &before);
        if k != "seed" {
            prop_assert!(original.value(&k).is_none());
        }
    }

    #[test]
    fn breadcrumbs_are_append_only(hops in prop::collection::vec("[a-z]{1,10}", 1..8)) {
        let mut context = Context::new();
        for (idx, hop) in hops.iter().enumerate() {
            let next = context.add_breadcrumb(hop.clone());
            prop_assert_eq!(next.breadcrumbs().len(), context.breadcrumbs().len() + 1);
            prop_assert_eq!(next.breadcrumbs().len(), idx + 1);
            prop_assert_eq!(next.initial_breadcrumb(), hops[0].as_str());
            context = next;
        }
        prop_assert_eq!(context.breadcrumbs(), hops.as_slice());
    }

    #[test]
    fn transport_values_split_by_namespace(keys in prop::collection::btree_set(key(), 0..6)) {
        let context = Context::from_values(
            keys.iter().map(|k| (k.clone(), vec!["v".to_string()])),
        );
        let metadata = context.metadata();
        for k in &keys {
            if is_system_key(k) {
                prop_assert!(context.value(k).is_some());
                prop_assert!(!metadata.contains_key(k));
            } else {
                prop_assert!(metadata.contains_key(k));
            }
        }
    }
}

#[test]
fn fresh_context_is_internal_until_marked() {
    let context = Context::new();
    assert!(context.is_internal_request());
    assert!(context.value(METADATA_KEY).is_none());

    let external = context.mark_as_external();
    assert!(external.is_external_request());
    assert!(context.is_internal_request());
}

#[test]
fn external_flag_must_be_truthy() {
    let mut metadata = grpc_shared_core::Metadata::new();
    metadata.insert("external".to_string(), vec!["0".to_string()]);
    assert!(Context::new().with_metadata(metadata.clone()).is_internal_request());

    metadata.insert("external".to_string(), vec!["".to_string()]);
    assert!(Context::new().with_metadata(metadata).is_internal_request());
}

#[test]
fn identity_user_and_token_survive_the_metadata_namespace() {
    let user = AuthenticatedUser::new("u-42").with_attribute("role", serde_json::json!("admin"));
    let context = Context::new()
        .with_service(&Service::new("orders", "1.0.0"))
        .with_user(&user)
        .unwrap()
        .with_token(Some("tok"))
        .with_token(None);

    assert_eq!(context.service(), Service::new("orders", "1.0.0"));
    assert_eq!(context.initial_breadcrumb(), "orders");
    assert!(context.has_user());
    assert_eq!(context.user(), Some(user));
    assert_eq!(context.token(), Some("tok"));
}
