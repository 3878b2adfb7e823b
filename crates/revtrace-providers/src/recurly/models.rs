use serde::Deserialize;

/// Recurly webhook notification (JSON form of the classic notification
/// vocabulary: `new_subscription`, `renewed_subscription`, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct RecurlyNotification {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub account: Option<RecurlyAccount>,
    #[serde(default)]
    pub subscription: Option<RecurlySubscription>,
    #[serde(default)]
    pub transaction: Option<RecurlyTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurlyAccount {
    #[serde(default)]
    pub account_code: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurlySubscription {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub plan: Option<RecurlyPlan>,
    #[serde(default)]
    pub unit_amount_in_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub current_period_started_at: Option<String>,
    #[serde(default)]
    pub current_period_ends_at: Option<String>,
    #[serde(default)]
    pub trial_started_at: Option<String>,
    /// Populated on `updated_subscription` when the plan or price moved
    #[serde(default)]
    pub previous_plan_code: Option<String>,
    #[serde(default)]
    pub previous_unit_amount_in_cents: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurlyPlan {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub interval_unit: Option<String>,
    #[serde(default)]
    pub interval_length: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurlyTransaction {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub amount_in_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}
