use serde::Deserialize;

/// Pub/Sub push envelope wrapping a Real-time Developer Notification
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// base64-encoded DeveloperNotification JSON
    pub data: String,
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperNotification {
    #[serde(default)]
    pub package_name: Option<String>,
    /// Millis since epoch, as a decimal string on the wire
    #[serde(default)]
    pub event_time_millis: Option<String>,
    #[serde(default)]
    pub subscription_notification: Option<SubscriptionNotification>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionNotification {
    pub notification_type: i32,
    #[serde(default)]
    pub purchase_token: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

/// Names for the integer notification codes, recorded as the native type
pub fn notification_type_name(code: i32) -> &'static str {
    match code {
        1 => "SUBSCRIPTION_RECOVERED",
        2 => "SUBSCRIPTION_RENEWED",
        3 => "SUBSCRIPTION_CANCELED",
        4 => "SUBSCRIPTION_PURCHASED",
        5 => "SUBSCRIPTION_ON_HOLD",
        6 => "SUBSCRIPTION_IN_GRACE_PERIOD",
        7 => "SUBSCRIPTION_RESTARTED",
        9 => "SUBSCRIPTION_DEFERRED",
        10 => "SUBSCRIPTION_PAUSED",
        11 => "SUBSCRIPTION_PAUSE_SCHEDULE_CHANGED",
        12 => "SUBSCRIPTION_REVOKED",
        13 => "SUBSCRIPTION_EXPIRED",
        _ => "SUBSCRIPTION_UNKNOWN",
    }
}
