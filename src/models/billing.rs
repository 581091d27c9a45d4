use serde::{Deserialize, Serialize};

/// Machine-readable codes surfaced through [`BillingResult::code`].
///
/// Vendor error codes (e.g. `E_USER_CANCELLED`) pass through untouched, so
/// the code field stays a plain string rather than a closed enum.
pub mod codes {
    pub const NOT_INITIALIZED: &str = "NOT_INITIALIZED";
    pub const CONNECTION_IN_PROGRESS: &str = "CONNECTION_IN_PROGRESS";
    pub const FEATURE_NOT_SUPPORTED: &str = "FEATURE_NOT_SUPPORTED";
    pub const PRODUCT_NOT_FOUND: &str = "PRODUCT_NOT_FOUND";
    pub const NO_OFFER_TOKEN: &str = "NO_OFFER_TOKEN";
    pub const INVALID_OFFER_TOKEN: &str = "INVALID_OFFER_TOKEN";
    pub const INSTALL_SOURCE_NOT_PLAY: &str = "INSTALL_SOURCE_NOT_PLAY";
    pub const ITEM_UNAVAILABLE: &str = "ITEM_UNAVAILABLE";
    pub const PLATFORM_ERROR: &str = "PLATFORM_ERROR";
    pub const INIT_ERROR: &str = "INIT_ERROR";
    pub const FETCH_ERROR: &str = "FETCH_ERROR";
    pub const PURCHASE_ERROR: &str = "PURCHASE_ERROR";
}

/// Uniform outcome envelope for every gateway operation. Callers branch on
/// `success` first and only then inspect the detail fields.
#[derive(Debug, Clone)]
pub struct BillingResult<T = ()> {
    pub success: bool,
    pub code: Option<String>,
    pub message: Option<String>,
    /// Numeric Play Billing response code when available
    pub response_code: Option<i32>,
    /// Low-level debug message from the billing client when available
    pub debug_message: Option<String>,
    pub data: Option<T>,
}

impl<T> BillingResult<T> {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: None,
            message: Some(message.into()),
            response_code: None,
            debug_message: None,
            data: None,
        }
    }

    pub fn ok_with(data: T, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(message)
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code.into()),
            message: Some(message.into()),
            response_code: None,
            debug_message: None,
            data: None,
        }
    }

    /// Non-error "call me again" outcome for an init() that is already connecting.
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self::failure(codes::CONNECTION_IN_PROGRESS, message)
    }
}

/// Normalized vendor error object carried by failure events and listener
/// callbacks. Augmented as it moves through the gateway, never restructured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseFailure {
    pub code: Option<String>,
    pub message: String,
    pub response_code: Option<i32>,
    pub debug_message: Option<String>,
}

impl std::fmt::Display for PurchaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for PurchaseFailure {}

impl PurchaseFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            response_code: None,
            debug_message: None,
        }
    }
}

/// Store product as returned by the platform catalog fetch. Immutable once
/// fetched; the gateway replaces its cache wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub display_price: String,
    pub currency: String,
    /// Android subscription offers; empty on platforms without offer tokens.
    #[serde(default)]
    pub offers: Vec<SubscriptionOffer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOffer {
    pub offer_token: String,
    pub base_plan_id: String,
    #[serde(default)]
    pub pricing_phases: Vec<PricingPhase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPhase {
    pub price_amount_micros: String,
    pub price_currency_code: String,
    pub formatted_price: String,
}

/// Ephemeral purchase event record. Lives for one reconciliation attempt;
/// never persisted locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub product_id: String,
    #[serde(default)]
    pub purchase_token: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub is_acknowledged: bool,
}

/// Settled purchase outcome fanned out to gateway subscribers.
#[derive(Debug, Clone)]
pub enum PurchaseEvent {
    Completed(Purchase),
    Failed(PurchaseFailure),
}

/// Plan/product association for the purchase currently in flight. Single
/// slot: set by the caller right before purchase(), cleared after the
/// reconciler has synced the result with the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPurchaseContext {
    pub plan_id: String,
    pub product_id: String,
}

/// Snapshot of gateway state for support diagnostics screens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingDiagnostics {
    pub initialized: bool,
    pub subscriptions_supported: bool,
    pub installer_package: Option<String>,
    pub installer_is_play_store: bool,
    pub products_count: usize,
}
