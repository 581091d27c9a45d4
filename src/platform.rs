//! Seam for the native billing SDK. The host application provides the real
//! bridge; tests provide in-memory fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::billing::{Product, Purchase, PurchaseFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformOs {
    Android,
    Ios,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingFeature {
    Subscriptions,
}

impl BillingFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscriptions => "subscriptions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Subs,
    InApp,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subs => "subs",
            Self::InApp => "inapp",
        }
    }
}

/// Purchase-initiation parameters. Android subscriptions must name the
/// base-plan offer token; iOS purchases go by SKU alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseParams {
    Android {
        skus: Vec<String>,
        subscription_offers: Vec<SubscriptionOfferSpec>,
    },
    Ios {
        sku: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOfferSpec {
    pub sku: String,
    pub offer_token: String,
}

/// Raw push event from the billing service. At most one update-or-error is
/// delivered per initiated purchase; that guarantee is the platform's, not
/// ours.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    PurchaseUpdated(Purchase),
    PurchaseError(PurchaseFailure),
}

#[async_trait]
pub trait PlatformBilling: Send + Sync {
    fn os(&self) -> PlatformOs;

    async fn connect(&self) -> Result<bool, PurchaseFailure>;

    async fn is_feature_supported(&self, feature: BillingFeature)
        -> Result<bool, PurchaseFailure>;

    async fn fetch_products(
        &self,
        skus: &[String],
        kind: ProductKind,
    ) -> Result<Vec<Product>, PurchaseFailure>;

    /// Launches the purchase UI flow. Resolves on acceptance of the request;
    /// settlement arrives later through the event stream.
    async fn request_purchase(&self, params: PurchaseParams) -> Result<(), PurchaseFailure>;

    async fn acknowledge_purchase(&self, purchase_token: &str) -> Result<(), PurchaseFailure>;

    async fn finish_transaction(&self, purchase: &Purchase) -> Result<(), PurchaseFailure>;

    async fn get_available_purchases(&self) -> Result<Vec<Purchase>, PurchaseFailure>;

    async fn end_connection(&self) -> Result<(), PurchaseFailure>;

    /// Hands over the push-style purchase event stream. `None` when the
    /// stream was already taken since the last connect; the bridge re-arms
    /// it on reconnection.
    fn take_purchase_events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>>;
}
