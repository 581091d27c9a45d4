// Service modules
pub mod billing_gateway;
pub mod installer;
pub mod reconciler;
pub mod subscription_api;

pub use billing_gateway::BillingGateway;
pub use installer::{InstallerLookup, InstallerVerifier};
pub use reconciler::PurchaseReconciler;
pub use subscription_api::{SubscriptionApi, SubscriptionBackend};
