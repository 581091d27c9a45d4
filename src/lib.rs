// Library exports for host applications and tests
pub mod config;
pub mod error;
pub mod models;
pub mod platform;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, Result};
pub use models::billing::{BillingResult, PurchaseEvent};
pub use platform::PlatformBilling;
pub use services::{BillingGateway, InstallerVerifier, PurchaseReconciler, SubscriptionApi};
