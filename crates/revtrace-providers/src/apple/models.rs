use serde::Deserialize;

/// Wire envelope: the whole notification is one JWS token
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleEnvelope {
    pub signed_payload: String,
}

/// Decoded payload of the outer JWS (App Store Server Notifications V2)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleNotification {
    pub notification_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(rename = "notificationUUID")]
    pub notification_uuid: String,
    /// Milliseconds since epoch
    #[serde(default)]
    pub signed_date: Option<i64>,
    #[serde(default)]
    pub data: Option<AppleData>,
}

impl AppleNotification {
    /// Native type string recorded on the raw log: `TYPE` or `TYPE.SUBTYPE`
    pub fn type_label(&self) -> String {
        match &self.subtype {
            Some(subtype) => format!("{}.{}", self.notification_type, subtype),
            None => self.notification_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleData {
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    /// Inner JWS carrying the transaction
    #[serde(default)]
    pub signed_transaction_info: Option<String>,
}

/// Decoded payload of the inner transaction JWS
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleTransaction {
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    /// Milliseconds since epoch
    #[serde(default)]
    pub purchase_date: Option<i64>,
    #[serde(default)]
    pub expires_date: Option<i64>,
    /// Milliunits of the currency (9990 = 9.99)
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub app_account_token: Option<String>,
}

impl AppleTransaction {
    /// Apple prices arrive in milliunits; the canonical store keeps cents
    pub fn price_cents(&self) -> Option<i64> {
        self.price.map(|milli| milli / 10)
    }
}
