use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use revtrace_types::{
    CanonicalEvent, EventStatus, EventType, IdType, IdentityHint, Source,
    derive_billing_interval,
};

use crate::builder::{EventBuilder, FanoutSuffix};
use crate::enrich::pick_money;
use crate::stripe::models::{
    StripeCharge, StripeDispute, StripeEvent, StripeInvoice, StripePrice, StripeSubscription,
};
use crate::{Error, Result};

pub(crate) fn unix_ts(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Parse(format!("timestamp out of range: {}", secs)))
}

/// Translate one Stripe envelope into canonical events.
/// Unhandled event types map to nothing; that is not an error.
pub(crate) fn map_event(
    org_id: Uuid,
    event: &StripeEvent,
    raw_json: &Value,
) -> Result<Vec<CanonicalEvent>> {
    let builder = EventBuilder::new(
        org_id,
        Source::Stripe,
        &event.id,
        &event.event_type,
        unix_ts(event.created)?,
        raw_json.clone(),
    );

    match event.event_type.as_str() {
        "customer.subscription.created" => {
            let sub: StripeSubscription = serde_json::from_value(event.data.object.clone())?;
            let mut ev = builder.event(EventType::Purchase, EventStatus::Success, None);
            apply_subscription(&mut ev, &sub)?;
            Ok(vec![ev])
        }
        "customer.subscription.deleted" => {
            let sub: StripeSubscription = serde_json::from_value(event.data.object.clone())?;
            let mut ev = builder.event(EventType::Expiration, EventStatus::Success, None);
            apply_subscription(&mut ev, &sub)?;
            Ok(vec![ev])
        }
        "customer.subscription.updated" => {
            let sub: StripeSubscription = serde_json::from_value(event.data.object.clone())?;
            map_subscription_update(&builder, &sub, event.data.previous_attributes.as_ref())
        }
        "invoice.paid" | "invoice.payment_succeeded" => {
            let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone())?;
            let mut ev = builder.event(EventType::Renewal, EventStatus::Success, None);
            apply_invoice(&mut ev, &invoice)?;
            Ok(vec![ev])
        }
        "invoice.payment_failed" => {
            let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone())?;
            let mut ev = builder.event(EventType::BillingRetry, EventStatus::Failed, None);
            apply_invoice(&mut ev, &invoice)?;
            Ok(vec![ev])
        }
        "charge.refunded" => {
            let charge: StripeCharge = serde_json::from_value(event.data.object.clone())?;
            let mut ev = builder.event(EventType::Refund, EventStatus::Refunded, None);
            let (amount, currency) = pick_money(
                charge
                    .amount_refunded
                    .or(charge.amount)
                    .zip(charge.currency.clone()),
                None,
                None,
            );
            ev.amount_cents = amount;
            ev.currency = currency;
            ev.external_subscription_id = charge.subscription_id();
            ev.product_id = charge.product_id();
            Ok(vec![ev])
        }
        "charge.dispute.created" => {
            let dispute: StripeDispute = serde_json::from_value(event.data.object.clone())?;
            let mut ev = builder.event(EventType::Chargeback, EventStatus::Failed, None);
            let (amount, currency) =
                pick_money(dispute.amount.zip(dispute.currency.clone()), None, None);
            ev.amount_cents = amount;
            ev.currency = currency;
            Ok(vec![ev])
        }
        _ => Ok(Vec::new()),
    }
}

/// The composite mapping: one `customer.subscription.updated` fans out into
/// discrete canonical events, diffed against `previous_attributes`
fn map_subscription_update(
    builder: &EventBuilder,
    sub: &StripeSubscription,
    previous: Option<&Value>,
) -> Result<Vec<CanonicalEvent>> {
    let mut events = Vec::new();
    let Some(prev) = previous else {
        return Ok(events);
    };

    let prev_cancel = prev.get("cancel_at_period_end").and_then(Value::as_bool);
    if prev_cancel == Some(false) && sub.cancel_at_period_end {
        let mut ev = builder.event(
            EventType::Cancellation,
            EventStatus::Success,
            Some(FanoutSuffix::Cancel),
        );
        apply_subscription(&mut ev, sub)?;
        events.push(ev);
    }

    let prev_status = prev.get("status").and_then(Value::as_str);
    let cur_status = sub.status.as_deref();
    match (prev_status, cur_status) {
        (Some("trialing"), Some("active")) => {
            let mut ev = builder.event(EventType::TrialConversion, EventStatus::Success, None);
            apply_subscription(&mut ev, sub)?;
            events.push(ev);
        }
        (Some(prev), Some("past_due")) if prev != "past_due" => {
            let mut ev = builder.event(EventType::BillingRetry, EventStatus::Failed, None);
            apply_subscription(&mut ev, sub)?;
            events.push(ev);
        }
        _ => {}
    }

    if let Some(prev_pause) = prev.get("pause_collection") {
        let was_paused = !prev_pause.is_null();
        let is_paused = sub
            .pause_collection
            .as_ref()
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if !was_paused && is_paused {
            let mut ev = builder.event(EventType::Pause, EventStatus::Success, None);
            apply_subscription(&mut ev, sub)?;
            events.push(ev);
        } else if was_paused && !is_paused {
            let mut ev = builder.event(EventType::Resume, EventStatus::Success, None);
            apply_subscription(&mut ev, sub)?;
            events.push(ev);
        }
    }

    if let Some((event_type, suffix)) = price_delta(prev, sub.price()) {
        let mut ev = builder.event(event_type, EventStatus::Success, Some(suffix));
        apply_subscription(&mut ev, sub)?;
        events.push(ev);
    }

    Ok(events)
}

/// Upgrade/downgrade detection: same price id with a new amount is a price
/// change; a different price id with a different amount is a plan change.
/// Equal amounts mean neither.
fn price_delta(prev: &Value, current: Option<&StripePrice>) -> Option<(EventType, FanoutSuffix)> {
    let current = current?;
    let current_amount = current.unit_amount?;

    let prev_price = prev
        .pointer("/items/data/0/price")
        .or_else(|| prev.get("plan"))?;
    let prev_id = prev_price.get("id").and_then(Value::as_str)?;
    let prev_amount = prev_price
        .get("unit_amount")
        .or_else(|| prev_price.get("amount"))
        .and_then(Value::as_i64)?;

    if prev_amount == current_amount {
        return None;
    }

    let suffix = if prev_id == current.id {
        FanoutSuffix::PriceChange
    } else {
        FanoutSuffix::PlanChange
    };

    let event_type = if current_amount > prev_amount {
        EventType::Upgrade
    } else {
        EventType::Downgrade
    };

    Some((event_type, suffix))
}

fn apply_subscription(ev: &mut CanonicalEvent, sub: &StripeSubscription) -> Result<()> {
    ev.external_subscription_id = Some(sub.id.clone());

    if let Some(price) = sub.price() {
        let (amount, currency) =
            pick_money(None, None, price.unit_amount.zip(price.currency.clone()));
        ev.amount_cents = amount;
        ev.currency = currency;
        ev.product_id = price.product.clone();
        ev.plan_tier = price.nickname.clone().or_else(|| Some(price.id.clone()));
        if let Some(recurring) = &price.recurring {
            ev.billing_interval = Some(derive_billing_interval(
                recurring.interval_count,
                &recurring.interval,
            ));
        }
    }

    if let Some(start) = sub.current_period_start {
        ev.period_start = Some(unix_ts(start)?);
    }
    if let Some(end) = sub.current_period_end {
        ev.period_end = Some(unix_ts(end)?);
    }
    if let Some(trial) = sub.trial_start {
        ev.trial_started_at = Some(unix_ts(trial)?);
    }
    Ok(())
}

fn apply_invoice(ev: &mut CanonicalEvent, invoice: &StripeInvoice) -> Result<()> {
    let invoice_money = invoice
        .amount_paid
        .or(invoice.amount_due)
        .zip(invoice.currency.clone());
    let subscription_money = invoice
        .line_price()
        .and_then(|price| price.unit_amount.zip(price.currency.clone()));

    let (amount, currency) = pick_money(None, invoice_money, subscription_money);
    ev.amount_cents = amount;
    ev.currency = currency;
    ev.external_subscription_id = invoice.subscription.clone();

    if let Some(price) = invoice.line_price() {
        ev.product_id = price.product.clone();
        ev.plan_tier = price.nickname.clone().or_else(|| Some(price.id.clone()));
        if let Some(recurring) = &price.recurring {
            ev.billing_interval = Some(derive_billing_interval(
                recurring.interval_count,
                &recurring.interval,
            ));
        }
    }

    if let Some(period) = invoice.line_period() {
        if let Some(start) = period.start {
            ev.period_start = Some(unix_ts(start)?);
        }
        if let Some(end) = period.end {
            ev.period_end = Some(unix_ts(end)?);
        }
    }
    Ok(())
}

/// Identity hints from whichever object the envelope carries
pub(crate) fn extract_hints(event: &StripeEvent) -> Vec<IdentityHint> {
    let object = &event.data.object;
    let mut hints = Vec::new();

    if let Some(customer) = object.get("customer").and_then(Value::as_str) {
        hints.push(IdentityHint::new(
            Source::Stripe,
            IdType::CustomerId,
            customer,
        ));
    }

    // Subscription objects: the object id itself is the subscription
    if object.get("object").and_then(Value::as_str) == Some("subscription")
        && let Some(id) = object.get("id").and_then(Value::as_str)
    {
        hints.push(IdentityHint::new(Source::Stripe, IdType::SubscriptionId, id));
    }
    if let Some(sub) = object.get("subscription").and_then(Value::as_str) {
        hints.push(IdentityHint::new(Source::Stripe, IdType::SubscriptionId, sub));
    }

    if let Some(email) = object.get("customer_email").and_then(Value::as_str) {
        hints.push(IdentityHint::new(Source::Stripe, IdType::Email, email));
    }
    if let Some(email) = object
        .pointer("/billing_details/email")
        .and_then(Value::as_str)
    {
        hints.push(IdentityHint::new(Source::Stripe, IdType::Email, email));
    }

    hints
}
