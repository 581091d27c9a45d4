use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

/// Backend subscription status lifecycle: created as pending (no purchase
/// token yet) or active, terminal state cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

/// POST /create-subscription
#[derive(Debug, Clone, Serialize, Validate)]
pub struct CreateSubscriptionRequest {
    #[validate(length(min = 1))]
    pub plan_id: String,
    #[validate(length(min = 1))]
    pub google_play_purchase_token: String,
    #[validate(length(min = 1))]
    pub google_play_product_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionResponse {
    pub success: bool,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub error: Option<String>,
}

/// POST /verify-google-play-purchase
#[derive(Debug, Clone, Serialize, Validate)]
pub struct VerifyPurchaseRequest {
    #[validate(length(min = 1))]
    pub purchase_token: String,
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(length(min = 1))]
    pub subscription_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPurchaseResponse {
    pub success: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub subscription: Option<VerifiedSubscription>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedSubscription {
    pub id: String,
    #[serde(default)]
    pub plan_name: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_billing_cycle_start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_billing_cycle_end: Option<OffsetDateTime>,
}

/// POST /cancel-subscription
#[derive(Debug, Clone, Serialize, Validate)]
pub struct CancelSubscriptionRequest {
    #[validate(length(min = 1))]
    pub subscription_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelSubscriptionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// POST /change-subscription-plan
#[derive(Debug, Clone, Serialize, Validate)]
pub struct ChangePlanRequest {
    #[validate(length(min = 1))]
    pub subscription_id: String,
    #[validate(length(min = 1))]
    pub new_plan_id: String,
    #[validate(length(min = 1))]
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePlanResponse {
    pub success: bool,
    #[serde(default)]
    pub new_subscription_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
