use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use revtrace_providers::{Normalizer, RawDelivery, create};
use revtrace_types::{EventStatus, EventType, IdType, Source};

fn delivery(body: serde_json::Value) -> RawDelivery {
    RawDelivery::new(HashMap::new(), body.to_string())
}

fn subscription_object() -> serde_json::Value {
    json!({
        "object": "subscription",
        "id": "sub_100",
        "customer": "cus_A",
        "status": "active",
        "cancel_at_period_end": false,
        "current_period_start": 1700000000,
        "current_period_end": 1702592000,
        "items": {"data": [{"price": {
            "id": "price_pro_monthly",
            "unit_amount": 999,
            "currency": "usd",
            "product": "prod_pro",
            "nickname": "Pro Monthly",
            "recurring": {"interval": "month", "interval_count": 1}
        }}]}
    })
}

#[test]
fn subscription_created_maps_to_purchase() {
    let normalizer = create(Source::Stripe);
    let org = Uuid::new_v4();
    let raw = delivery(json!({
        "id": "evt_1",
        "type": "customer.subscription.created",
        "created": 1700000000,
        "data": {"object": subscription_object()}
    }));

    let events = normalizer.normalize(org, &raw).unwrap();
    assert_eq!(events.len(), 1);
    let ev = &events[0];
    assert_eq!(ev.event_type, EventType::Purchase);
    assert_eq!(ev.status, EventStatus::Success);
    assert_eq!(ev.source, Source::Stripe);
    assert_eq!(ev.idempotency_key, "stripe:evt_1");
    assert_eq!(ev.source_event_type.as_deref(), Some("customer.subscription.created"));
    assert_eq!(ev.amount_cents, Some(999));
    assert_eq!(ev.currency.as_deref(), Some("USD"));
    assert_eq!(ev.product_id.as_deref(), Some("prod_pro"));
    assert_eq!(ev.plan_tier.as_deref(), Some("Pro Monthly"));
    assert_eq!(ev.billing_interval.as_deref(), Some("month"));
    assert_eq!(ev.external_subscription_id.as_deref(), Some("sub_100"));
    assert!(ev.period_end.is_some());
}

#[test]
fn invoice_paid_maps_to_renewal_with_invoice_money_priority() {
    let normalizer = create(Source::Stripe);
    let raw = delivery(json!({
        "id": "evt_2",
        "type": "invoice.paid",
        "created": 1700000000,
        "data": {"object": {
            "object": "invoice",
            "id": "in_1",
            "customer": "cus_A",
            "customer_email": "buyer@example.com",
            "subscription": "sub_100",
            "amount_paid": 1099,
            "currency": "usd",
            "lines": {"data": [{
                "price": {"id": "price_pro_monthly", "unit_amount": 999, "currency": "usd",
                           "product": "prod_pro",
                           "recurring": {"interval": "month", "interval_count": 1}},
                "period": {"start": 1700000000, "end": 1702592000}
            }]}
        }}
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    let ev = &events[0];
    assert_eq!(ev.event_type, EventType::Renewal);
    // Invoice amount beats the subscription line price
    assert_eq!(ev.amount_cents, Some(1099));
    assert_eq!(ev.external_subscription_id.as_deref(), Some("sub_100"));
    assert_eq!(ev.product_id.as_deref(), Some("prod_pro"));
}

#[test]
fn payment_failed_maps_to_billing_retry() {
    let normalizer = create(Source::Stripe);
    let raw = delivery(json!({
        "id": "evt_3",
        "type": "invoice.payment_failed",
        "created": 1700000000,
        "data": {"object": {"object": "invoice", "id": "in_2", "customer": "cus_A",
                             "subscription": "sub_100", "amount_due": 999, "currency": "usd"}}
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::BillingRetry);
    assert_eq!(events[0].status, EventStatus::Failed);
}

#[test]
fn charge_refunded_maps_to_refund_via_expanded_invoice() {
    let normalizer = create(Source::Stripe);
    let raw = delivery(json!({
        "id": "evt_r1",
        "type": "charge.refunded",
        "created": 1700000000,
        "data": {"object": {
            "object": "charge",
            "id": "ch_1",
            "customer": "cus_A",
            "amount": 999,
            "amount_refunded": 999,
            "currency": "usd",
            "invoice": {"id": "in_1", "subscription": "sub_100",
                         "lines": {"data": [{"price": {"id": "price_pro_monthly", "product": "prod_pro"}}]}},
            "billing_details": {"email": "buyer@example.com"}
        }}
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    let ev = &events[0];
    assert_eq!(ev.event_type, EventType::Refund);
    assert_eq!(ev.status, EventStatus::Refunded);
    assert_eq!(ev.amount_cents, Some(999));
    assert_eq!(ev.external_subscription_id.as_deref(), Some("sub_100"));
    assert_eq!(ev.product_id.as_deref(), Some("prod_pro"));
    assert_eq!(ev.idempotency_key, "stripe:evt_r1");
}

#[test]
fn composite_update_fans_out_cancellation_and_downgrade() {
    let normalizer = create(Source::Stripe);
    let mut object = subscription_object();
    object["cancel_at_period_end"] = json!(true);
    object["items"]["data"][0]["price"] = json!({
        "id": "price_basic_monthly",
        "unit_amount": 499,
        "currency": "usd",
        "product": "prod_basic",
        "recurring": {"interval": "month", "interval_count": 1}
    });

    let raw = delivery(json!({
        "id": "evt_4",
        "type": "customer.subscription.updated",
        "created": 1700000000,
        "data": {
            "object": object,
            "previous_attributes": {
                "cancel_at_period_end": false,
                "items": {"data": [{"price": {"id": "price_pro_monthly", "unit_amount": 999}}]}
            }
        }
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 2);

    let cancel = events.iter().find(|e| e.event_type == EventType::Cancellation).unwrap();
    assert_eq!(cancel.idempotency_key, "stripe:evt_4:cancel");

    let downgrade = events.iter().find(|e| e.event_type == EventType::Downgrade).unwrap();
    assert_eq!(downgrade.idempotency_key, "stripe:evt_4:plan_change");
}

#[test]
fn same_price_id_amount_change_is_price_change_upgrade() {
    let normalizer = create(Source::Stripe);
    let mut object = subscription_object();
    object["items"]["data"][0]["price"]["unit_amount"] = json!(1299);

    let raw = delivery(json!({
        "id": "evt_5",
        "type": "customer.subscription.updated",
        "created": 1700000000,
        "data": {
            "object": object,
            "previous_attributes": {
                "items": {"data": [{"price": {"id": "price_pro_monthly", "unit_amount": 999}}]}
            }
        }
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Upgrade);
    assert_eq!(events[0].idempotency_key, "stripe:evt_5:price_change");
}

#[test]
fn trialing_to_active_is_trial_conversion() {
    let normalizer = create(Source::Stripe);
    let raw = delivery(json!({
        "id": "evt_6",
        "type": "customer.subscription.updated",
        "created": 1700000000,
        "data": {
            "object": subscription_object(),
            "previous_attributes": {"status": "trialing"}
        }
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::TrialConversion);
    assert_eq!(events[0].idempotency_key, "stripe:evt_6");
}

#[test]
fn pause_collection_transitions_map_to_pause_and_resume() {
    let normalizer = create(Source::Stripe);
    let mut paused = subscription_object();
    paused["pause_collection"] = json!({"behavior": "void"});

    let raw = delivery(json!({
        "id": "evt_7",
        "type": "customer.subscription.updated",
        "created": 1700000000,
        "data": {"object": paused, "previous_attributes": {"pause_collection": null}}
    }));
    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Pause);

    let raw = delivery(json!({
        "id": "evt_8",
        "type": "customer.subscription.updated",
        "created": 1700000000,
        "data": {
            "object": subscription_object(),
            "previous_attributes": {"pause_collection": {"behavior": "void"}}
        }
    }));
    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Resume);
}

#[test]
fn unmapped_event_types_produce_no_events() {
    let normalizer = create(Source::Stripe);
    let raw = delivery(json!({
        "id": "evt_9",
        "type": "customer.created",
        "created": 1700000000,
        "data": {"object": {"object": "customer", "id": "cus_A"}}
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert!(events.is_empty());

    // Still describable for the raw log
    let descriptor = normalizer.describe(&raw).unwrap();
    assert_eq!(descriptor.external_event_id.as_deref(), Some("evt_9"));
    assert_eq!(descriptor.source_event_type.as_deref(), Some("customer.created"));
}

#[test]
fn malformed_payload_is_a_parse_error() {
    let normalizer = create(Source::Stripe);
    let raw = RawDelivery::new(HashMap::new(), "{not json");
    assert!(normalizer.normalize(Uuid::new_v4(), &raw).is_err());
}

#[test]
fn identity_hints_cover_customer_subscription_and_email() {
    let normalizer = create(Source::Stripe);
    let raw = delivery(json!({
        "id": "evt_10",
        "type": "invoice.paid",
        "created": 1700000000,
        "data": {"object": {
            "object": "invoice", "id": "in_3", "customer": "cus_A",
            "customer_email": "Buyer@Example.com", "subscription": "sub_100",
            "amount_paid": 999, "currency": "usd"
        }}
    }));

    let hints = normalizer.extract_identity_hints(&raw).unwrap();
    assert!(hints.iter().any(|h| h.id_type == IdType::CustomerId && h.external_id == "cus_A"));
    assert!(hints.iter().any(|h| h.id_type == IdType::SubscriptionId && h.external_id == "sub_100"));
    let email = hints.iter().find(|h| h.id_type == IdType::Email).unwrap();
    assert_eq!(email.external_id, "Buyer@Example.com");
    assert_eq!(email.lookup_key(), "buyer@example.com");
}

#[test]
fn events_inherit_the_envelope_timestamp() {
    let normalizer = create(Source::Stripe);
    let created = Utc::now().timestamp() - 60;
    let raw = delivery(json!({
        "id": "evt_11",
        "type": "customer.subscription.created",
        "created": created,
        "data": {"object": subscription_object()}
    }));

    let events = normalizer.normalize(Uuid::new_v4(), &raw).unwrap();
    assert_eq!(events[0].event_time.timestamp(), created);
}
