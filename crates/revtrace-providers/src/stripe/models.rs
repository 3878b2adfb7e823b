use serde::Deserialize;
use serde_json::Value;

/// Envelope every Stripe webhook shares
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
    /// Present on `*.updated` events; the composite-diff input
    #[serde(default)]
    pub previous_attributes: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub trial_start: Option<i64>,
    #[serde(default)]
    pub pause_collection: Option<Value>,
    #[serde(default)]
    pub items: Option<StripeList<StripeSubscriptionItem>>,
}

impl StripeSubscription {
    pub fn price(&self) -> Option<&StripePrice> {
        self.items
            .as_ref()?
            .data
            .first()?
            .price
            .as_ref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    #[serde(default)]
    pub price: Option<StripePrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub recurring: Option<StripeRecurring>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRecurring {
    pub interval: String,
    #[serde(default = "default_interval_count")]
    pub interval_count: i64,
}

fn default_interval_count() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub amount_due: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub lines: Option<StripeList<StripeInvoiceLine>>,
}

impl StripeInvoice {
    pub fn line_price(&self) -> Option<&StripePrice> {
        self.lines.as_ref()?.data.first()?.price.as_ref()
    }

    pub fn line_period(&self) -> Option<&StripePeriod> {
        self.lines.as_ref()?.data.first()?.period.as_ref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoiceLine {
    #[serde(default)]
    pub price: Option<StripePrice>,
    #[serde(default)]
    pub period: Option<StripePeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePeriod {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

/// Charge as delivered by `charge.refunded`. `invoice` is a bare id in
/// standard deliveries but an embedded object when the integration expands
/// it; the embedded form is what lets a refund reach its subscription
/// without an API call.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_refunded: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub invoice: Option<Value>,
    #[serde(default)]
    pub billing_details: Option<StripeBillingDetails>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl StripeCharge {
    /// Subscription id reachable from the charge, via the expanded invoice
    /// object or charge metadata
    pub fn subscription_id(&self) -> Option<String> {
        if let Some(invoice) = &self.invoice
            && let Some(sub) = invoice.get("subscription").and_then(Value::as_str)
        {
            return Some(sub.to_string());
        }
        self.metadata
            .as_ref()?
            .get("subscription_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Product id, only reachable through the expanded invoice line
    pub fn product_id(&self) -> Option<String> {
        let invoice = self.invoice.as_ref()?;
        invoice
            .pointer("/lines/data/0/price/product")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeBillingDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeDispute {
    pub id: String,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}
