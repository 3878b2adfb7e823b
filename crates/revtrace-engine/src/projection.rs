use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{CanonicalEvent, Entitlement, EntitlementState, EventType};

use crate::Result;

/// What one projection step decided
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionOutcome {
    /// Entitlement row created or updated
    Applied(Entitlement),
    /// Event carries no user; nothing to project
    NoUser,
    /// Event names neither a product nor a subscription proxy
    NoProduct,
    /// Event type not meaningful for this entitlement's current state.
    /// The event stays stored; the entitlement is untouched.
    Conflict {
        current: Option<EntitlementState>,
        event_type: EventType,
    },
}

/// Pure transition function over the condensed state table. `None` means
/// the transition is undefined for the current state (a projection conflict).
///
/// Cancellation is special-cased by the caller: in access-granting states it
/// keeps the state and raises the will-cancel flag instead.
pub fn next_state(
    current: Option<EntitlementState>,
    event_type: EventType,
    is_trial_purchase: bool,
) -> Option<EntitlementState> {
    use EntitlementState::*;
    use EventType::*;

    let purchase_target = if is_trial_purchase { Trial } else { Active };

    match current {
        None => match event_type {
            Purchase => Some(purchase_target),
            TrialConversion | Renewal => Some(Active),
            _ => None,
        },
        Some(state) => match (state, event_type) {
            // Purchases restart anything, including closed states; a paused
            // entitlement absorbs them without waking up
            (_, Purchase) => Some(if state == Paused { Paused } else { purchase_target }),
            (Expired | Canceled | Revoked | Refunded, Renewal | TrialConversion) => Some(Active),
            (Expired | Canceled | Revoked | Refunded, _) => None,

            (Paused, TrialConversion) => Some(Paused),
            (_, TrialConversion) => Some(Active),
            (_, Renewal) => Some(Active),

            (Active | Trial, Cancellation) => Some(state), // will-cancel flag, state held
            (EntitlementState::BillingRetry | GracePeriod | PastDue | OnHold | Paused, Cancellation) => Some(Canceled),

            (_, Expiration) => Some(Expired),
            (_, Refund) => Some(Refunded),
            (_, Chargeback) => Some(Revoked),

            (_, EventType::BillingRetry) => Some(EntitlementState::BillingRetry),

            // Plan moves carry new pricing/period data but hold the state
            (_, Upgrade | Downgrade) => Some(state),

            (Paused, Pause) => None,
            (_, Pause) => Some(Paused),

            (Paused, Resume) => Some(Active),
            (_, Resume) => None,
        },
    }
}

/// Fold one canonical event into its `(user, source, product)` entitlement.
/// The external subscription id stands in for the product when the provider
/// never names one.
pub fn project_event(conn: &Connection, event: &CanonicalEvent) -> Result<ProjectionOutcome> {
    let Some(user_id) = event.user_id else {
        return Ok(ProjectionOutcome::NoUser);
    };
    let Some(product_key) = event
        .product_id
        .clone()
        .or_else(|| event.external_subscription_id.clone())
    else {
        return Ok(ProjectionOutcome::NoProduct);
    };

    let existing = queries::entitlements::get(conn, event.org_id, user_id, event.source, &product_key)?;
    let current_state = existing.as_ref().map(|e| e.state);

    let is_trial_purchase = event.trial_started_at.is_some();
    let Some(new_state) = next_state(current_state, event.event_type, is_trial_purchase) else {
        tracing::warn!(
            org = %event.org_id,
            user = %user_id,
            product = %product_key,
            current = ?current_state,
            event_type = %event.event_type,
            "projection conflict; entitlement unchanged"
        );
        return Ok(ProjectionOutcome::Conflict {
            current: current_state,
            event_type: event.event_type,
        });
    };

    let will_cancel = match event.event_type {
        EventType::Cancellation => true,
        EventType::Purchase | EventType::Renewal | EventType::Resume | EventType::TrialConversion => {
            false
        }
        _ => existing.as_ref().map(|e| e.will_cancel).unwrap_or(false),
    };

    let entitlement = Entitlement {
        id: existing.as_ref().map(|e| e.id).unwrap_or_else(Uuid::new_v4),
        org_id: event.org_id,
        user_id,
        source: event.source,
        product_id: product_key,
        state: new_state,
        will_cancel,
        // Periods are overwritten by the event's bounds when present
        current_period_start: event
            .period_start
            .or(existing.as_ref().and_then(|e| e.current_period_start)),
        current_period_end: event
            .period_end
            .or(existing.as_ref().and_then(|e| e.current_period_end)),
        external_subscription_id: event
            .external_subscription_id
            .clone()
            .or(existing.as_ref().and_then(|e| e.external_subscription_id.clone())),
        last_event_id: event.id,
        updated_at: Utc::now(),
    };

    queries::entitlements::upsert(conn, &entitlement)?;
    Ok(ProjectionOutcome::Applied(entitlement))
}

/// Replay a `(user, source, product)` event stream from scratch. Used by the
/// monotonic-projection check: the result must match what incremental
/// projection produced, up to `updated_at`.
pub fn replay_projection(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    source: revtrace_types::Source,
    product_key: &str,
) -> Result<Option<(EntitlementState, bool)>> {
    let events = queries::events::list_for_projection(conn, org_id, user_id, source, product_key)?;

    let mut state: Option<EntitlementState> = None;
    let mut will_cancel = false;
    for event in &events {
        let is_trial = event.trial_started_at.is_some();
        if let Some(next) = next_state(state, event.event_type, is_trial) {
            state = Some(next);
            will_cancel = match event.event_type {
                EventType::Cancellation => true,
                EventType::Purchase
                | EventType::Renewal
                | EventType::Resume
                | EventType::TrialConversion => false,
                _ => will_cancel,
            };
        }
    }
    Ok(state.map(|s| (s, will_cancel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntitlementState::*;
    use EventType::*;

    #[test]
    fn absent_entitlement_only_starts_on_purchase_like_events() {
        assert_eq!(next_state(None, Purchase, false), Some(Active));
        assert_eq!(next_state(None, Purchase, true), Some(Trial));
        assert_eq!(next_state(None, Renewal, false), Some(Active));
        assert_eq!(next_state(None, TrialConversion, false), Some(Active));
        assert_eq!(next_state(None, Cancellation, false), None);
        assert_eq!(next_state(None, Refund, false), None);
        assert_eq!(next_state(None, Pause, false), None);
    }

    #[test]
    fn active_transitions() {
        assert_eq!(next_state(Some(Active), Renewal, false), Some(Active));
        assert_eq!(next_state(Some(Active), Cancellation, false), Some(Active));
        assert_eq!(next_state(Some(Active), Expiration, false), Some(Expired));
        assert_eq!(next_state(Some(Active), Refund, false), Some(Refunded));
        assert_eq!(next_state(Some(Active), Chargeback, false), Some(Revoked));
        assert_eq!(next_state(Some(Active), EventType::BillingRetry, false), Some(EntitlementState::BillingRetry));
        assert_eq!(next_state(Some(Active), Pause, false), Some(Paused));
        assert_eq!(next_state(Some(Active), Resume, false), None);
        assert_eq!(next_state(Some(Active), Upgrade, false), Some(Active));
        assert_eq!(next_state(Some(Active), Downgrade, false), Some(Active));
    }

    #[test]
    fn trial_transitions() {
        assert_eq!(next_state(Some(Trial), TrialConversion, false), Some(Active));
        assert_eq!(next_state(Some(Trial), Renewal, false), Some(Active));
        assert_eq!(next_state(Some(Trial), Cancellation, false), Some(Trial));
        assert_eq!(next_state(Some(Trial), Expiration, false), Some(Expired));
    }

    #[test]
    fn billing_retry_transitions() {
        assert_eq!(next_state(Some(BillingRetry), Renewal, false), Some(Active));
        assert_eq!(next_state(Some(BillingRetry), Cancellation, false), Some(Canceled));
        assert_eq!(next_state(Some(BillingRetry), Purchase, false), Some(Active));
        assert_eq!(next_state(Some(BillingRetry), Pause, false), Some(Paused));
    }

    #[test]
    fn paused_transitions() {
        assert_eq!(next_state(Some(Paused), Resume, false), Some(Active));
        assert_eq!(next_state(Some(Paused), Renewal, false), Some(Active));
        assert_eq!(next_state(Some(Paused), Cancellation, false), Some(Canceled));
        assert_eq!(next_state(Some(Paused), Purchase, false), Some(Paused));
        assert_eq!(next_state(Some(Paused), TrialConversion, false), Some(Paused));
        assert_eq!(next_state(Some(Paused), Pause, false), None);
    }

    #[test]
    fn closed_states_resurrect_on_purchase_like_events() {
        for closed in [Expired, Canceled, Revoked, Refunded] {
            assert_eq!(next_state(Some(closed), Purchase, false), Some(Active));
            assert_eq!(next_state(Some(closed), Renewal, false), Some(Active));
            assert_eq!(next_state(Some(closed), TrialConversion, false), Some(Active));
            assert_eq!(next_state(Some(closed), Cancellation, false), None);
            assert_eq!(next_state(Some(closed), Refund, false), None);
        }
    }
}
