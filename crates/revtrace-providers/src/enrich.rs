// Shared financial enrichment applied by every mapper
//
// When a payload carries several money fields the most specific one wins:
// transaction > invoice > subscription. Currency codes are normalized to
// uppercase before they reach the canonical store.

/// One money observation from a payload layer
pub type Money = (i64, String);

pub fn pick_money(
    transaction: Option<Money>,
    invoice: Option<Money>,
    subscription: Option<Money>,
) -> (Option<i64>, Option<String>) {
    match transaction.or(invoice).or(subscription) {
        Some((amount, currency)) => (Some(amount), Some(currency.to_uppercase())),
        None => (None, None),
    }
}
