use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use revtrace_providers::{Normalizer, RawDelivery, create, hmac_sha256_hex};
use revtrace_types::Source;

const SECRET: &str = "whsec_stripe_test";

fn stripe_delivery(timestamp: i64, secret: &str) -> RawDelivery {
    let body = json!({
        "id": "evt_sig",
        "type": "customer.created",
        "created": timestamp,
        "data": {"object": {"object": "customer", "id": "cus_A"}}
    })
    .to_string();

    let signature = hmac_sha256_hex(secret, &format!("{}.{}", timestamp, body)).unwrap();
    let mut headers = HashMap::new();
    headers.insert(
        "Stripe-Signature".to_string(),
        format!("t={},v1={}", timestamp, signature),
    );
    RawDelivery::new(headers, body)
}

#[test]
fn stripe_valid_signature_passes() {
    let normalizer = create(Source::Stripe);
    let raw = stripe_delivery(Utc::now().timestamp(), SECRET);
    assert!(normalizer.verify_signature(&raw, SECRET).is_ok());
}

#[test]
fn stripe_wrong_secret_fails() {
    let normalizer = create(Source::Stripe);
    let raw = stripe_delivery(Utc::now().timestamp(), "whsec_other");
    assert!(normalizer.verify_signature(&raw, SECRET).is_err());
}

#[test]
fn stripe_stale_timestamp_is_a_replay() {
    let normalizer = create(Source::Stripe);
    let raw = stripe_delivery(Utc::now().timestamp() - 600, SECRET);
    let err = normalizer.verify_signature(&raw, SECRET).unwrap_err();
    assert!(err.to_string().contains("replay window"), "{}", err);
}

#[test]
fn stripe_future_timestamp_is_rejected_too() {
    let normalizer = create(Source::Stripe);
    let raw = stripe_delivery(Utc::now().timestamp() + 600, SECRET);
    assert!(normalizer.verify_signature(&raw, SECRET).is_err());
}

#[test]
fn stripe_missing_header_fails() {
    let normalizer = create(Source::Stripe);
    let mut raw = stripe_delivery(Utc::now().timestamp(), SECRET);
    raw.headers.clear();
    assert!(normalizer.verify_signature(&raw, SECRET).is_err());
}

#[test]
fn header_lookup_is_case_insensitive() {
    let normalizer = create(Source::Stripe);
    let raw = stripe_delivery(Utc::now().timestamp(), SECRET);
    // Fixture inserts "Stripe-Signature"; the normalizer reads it lowercase
    assert!(raw.header("stripe-signature").is_some());
    assert!(normalizer.verify_signature(&raw, SECRET).is_ok());
}
