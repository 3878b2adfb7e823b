//! Signed sample payloads for every provider, built at call time so
//! timestamp-sensitive signature checks see fresh values.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::Utc;
use serde_json::{Value, json};

use revtrace_providers::hmac_sha256_hex;

pub const STRIPE_SECRET: &str = "whsec_testworld";
pub const RECURLY_SECRET: &str = "recurly-testworld";
pub const GOOGLE_PUSH_TOKEN: &str = "google-push-testworld";
pub const APPLE_SECRET: &str = "apple-unused";

// --- Stripe ---

pub fn stripe_subscription_object(sub_id: &str, customer: &str, product: &str, amount: i64) -> Value {
    json!({
        "object": "subscription",
        "id": sub_id,
        "customer": customer,
        "status": "active",
        "cancel_at_period_end": false,
        "current_period_start": Utc::now().timestamp() - 86_400,
        "current_period_end": Utc::now().timestamp() + 29 * 86_400,
        "items": {"data": [{"price": {
            "id": format!("price_{}", product),
            "unit_amount": amount,
            "currency": "usd",
            "product": product,
            "recurring": {"interval": "month", "interval_count": 1}
        }}]}
    })
}

pub fn stripe_event(event_id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {"object": object}
    })
}

pub fn stripe_charge_refunded(
    event_id: &str,
    customer: &str,
    sub_id: &str,
    product: &str,
    amount: i64,
) -> Value {
    stripe_event(
        event_id,
        "charge.refunded",
        json!({
            "object": "charge",
            "id": format!("ch_{}", event_id),
            "customer": customer,
            "amount": amount,
            "amount_refunded": amount,
            "currency": "usd",
            "invoice": {"id": format!("in_{}", event_id), "subscription": sub_id,
                         "lines": {"data": [{"price": {"id": format!("price_{}", product),
                                                        "product": product}}]}},
            "billing_details": {"email": "buyer@example.com"}
        }),
    )
}

/// Signature headers for a Stripe body, valid now
pub fn sign_stripe(body: &str) -> HashMap<String, String> {
    sign_stripe_at(body, Utc::now().timestamp())
}

pub fn sign_stripe_at(body: &str, timestamp: i64) -> HashMap<String, String> {
    let signature = hmac_sha256_hex(STRIPE_SECRET, &format!("{}.{}", timestamp, body))
        .unwrap_or_default();
    let mut headers = HashMap::new();
    headers.insert(
        "Stripe-Signature".to_string(),
        format!("t={},v1={}", timestamp, signature),
    );
    headers
}

// --- Recurly ---

pub fn recurly_notification(
    id: &str,
    event_type: &str,
    account_code: &str,
    email: &str,
    plan: &str,
    amount: i64,
) -> Value {
    json!({
        "id": id,
        "event_type": event_type,
        "occurred_at": Utc::now().to_rfc3339(),
        "account": {"account_code": account_code, "email": email},
        "subscription": {
            "uuid": format!("uuid_{}", account_code),
            "plan": {"code": plan, "name": plan, "interval_unit": "month", "interval_length": 1},
            "unit_amount_in_cents": amount,
            "currency": "usd",
            "current_period_started_at": Utc::now().to_rfc3339(),
            "current_period_ends_at": (Utc::now() + chrono::Duration::days(30)).to_rfc3339()
        }
    })
}

pub fn sign_recurly(body: &str) -> HashMap<String, String> {
    sign_recurly_at(body, Utc::now().timestamp_millis())
}

pub fn sign_recurly_at(body: &str, timestamp_ms: i64) -> HashMap<String, String> {
    let signature = hmac_sha256_hex(RECURLY_SECRET, &format!("{}.{}", timestamp_ms, body))
        .unwrap_or_default();
    let mut headers = HashMap::new();
    headers.insert(
        "recurly-signature".to_string(),
        format!("{},{}", timestamp_ms, signature),
    );
    headers
}

// --- Google Play ---

pub fn google_rtdn(
    message_id: &str,
    notification_type: i32,
    purchase_token: &str,
    subscription_id: &str,
) -> (HashMap<String, String>, String) {
    let inner = json!({
        "version": "1.0",
        "packageName": "com.example.app",
        "eventTimeMillis": Utc::now().timestamp_millis().to_string(),
        "subscriptionNotification": {
            "version": "1.0",
            "notificationType": notification_type,
            "purchaseToken": purchase_token,
            "subscriptionId": subscription_id
        }
    });
    let body = json!({
        "message": {
            "data": STANDARD.encode(inner.to_string()),
            "messageId": message_id,
            "publishTime": Utc::now().to_rfc3339()
        },
        "subscription": "projects/example/subscriptions/play-rtdn"
    })
    .to_string();

    let mut headers = HashMap::new();
    headers.insert(
        "Authorization".to_string(),
        format!("Bearer {}", GOOGLE_PUSH_TOKEN),
    );
    (headers, body)
}

// --- Apple App Store ---

fn jws(payload: Value) -> String {
    let header = json!({"alg": "ES256", "x5c": ["leaf", "intermediate", "root"]});
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        URL_SAFE_NO_PAD.encode(b"signature")
    )
}

pub fn apple_notification(
    notification_uuid: &str,
    notification_type: &str,
    subtype: Option<&str>,
    original_transaction_id: &str,
    product_id: &str,
) -> (HashMap<String, String>, String) {
    let transaction = jws(json!({
        "originalTransactionId": original_transaction_id,
        "transactionId": format!("tx_{}", notification_uuid),
        "productId": product_id,
        "purchaseDate": Utc::now().timestamp_millis() - 86_400_000i64,
        "expiresDate": Utc::now().timestamp_millis() + 29 * 86_400_000i64,
        "price": 9990,
        "currency": "usd",
        "appAccountToken": format!("token_{}", original_transaction_id)
    }));

    let mut payload = json!({
        "notificationType": notification_type,
        "notificationUUID": notification_uuid,
        "signedDate": Utc::now().timestamp_millis(),
        "data": {
            "bundleId": "com.example.app",
            "environment": "Production",
            "signedTransactionInfo": transaction
        }
    });
    if let Some(subtype) = subtype {
        payload["subtype"] = json!(subtype);
    }

    let body = json!({"signedPayload": jws(payload)}).to_string();
    (HashMap::new(), body)
}
