mod data_freshness;
mod duplicate_billing;
mod paid_no_access;
mod renewal_anomaly;
mod unrevoked_refund;
mod webhook_gap;

pub use data_freshness::DataFreshness;
pub use duplicate_billing::DuplicateBilling;
pub use paid_no_access::PaidNoAccess;
pub use renewal_anomaly::RenewalAnomaly;
pub use unrevoked_refund::UnrevokedRefund;
pub use webhook_gap::WebhookDeliveryGap;

use crate::detector::Detector;

/// The full catalogue, in per-event evaluation order
pub fn all() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(UnrevokedRefund),
        Box::new(DuplicateBilling),
        Box::new(WebhookDeliveryGap),
        Box::new(RenewalAnomaly),
        Box::new(DataFreshness),
        Box::new(PaidNoAccess),
    ]
}
