use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::{
    models::billing::{PendingPurchaseContext, Purchase, PurchaseEvent, PurchaseFailure},
    platform::PlatformBilling,
    services::subscription_api::SubscriptionBackend,
};

/// Reaction logic over the gateway's purchase events: maps each settled
/// purchase onto backend create/verify calls and handles the already-owned
/// conflict through the restore path.
///
/// Holds the single pending-context slot and the last surfaced user-facing
/// error; both are read by the presentation layer.
pub struct PurchaseReconciler {
    platform: Arc<dyn PlatformBilling>,
    backend: Arc<dyn SubscriptionBackend>,
    pending_context: Mutex<Option<PendingPurchaseContext>>,
    last_error: Mutex<Option<String>>,
}

impl PurchaseReconciler {
    pub fn new(platform: Arc<dyn PlatformBilling>, backend: Arc<dyn SubscriptionBackend>) -> Self {
        Self {
            platform,
            backend,
            pending_context: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Associate the next purchase with a backend plan. Called by the UI
    /// right before purchase(). One slot only: a second purchase attempt
    /// before the first resolves overwrites the context and misattributes
    /// the eventual result (known limitation).
    pub fn set_pending_context(&self, context: PendingPurchaseContext) {
        let mut slot = self.pending_context.lock().unwrap();
        if let Some(previous) = slot.replace(context) {
            warn!(
                previous_plan = %previous.plan_id,
                previous_product = %previous.product_id,
                "Overwriting unresolved pending purchase context"
            );
        }
    }

    pub fn pending_context(&self) -> Option<PendingPurchaseContext> {
        self.pending_context.lock().unwrap().clone()
    }

    /// Last user-facing error surfaced by reconciliation, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }

    fn set_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(message.into());
    }

    /// Drive the reconciler from a gateway subscription until the stream
    /// closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PurchaseEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PurchaseEvent::Completed(purchase) => self.on_purchase_completed(purchase).await,
                PurchaseEvent::Failed(failure) => self.on_purchase_failed(failure).await,
            }
        }
    }

    #[instrument(skip(self, purchase), fields(product_id = %purchase.product_id))]
    pub async fn on_purchase_completed(&self, purchase: Purchase) {
        let Some(context) = self.pending_context() else {
            // Nothing to reconcile against
            warn!("No pending purchase context when handling purchase success");
            return;
        };

        let Some(token) = purchase.purchase_token.clone() else {
            error!("Missing purchase token when syncing purchase");
            return;
        };
        let product_id = if purchase.product_id.is_empty() {
            context.product_id.clone()
        } else {
            purchase.product_id.clone()
        };
        if product_id.is_empty() {
            error!("Missing product id when syncing purchase");
            return;
        }

        self.sync_with_backend(
            &context,
            &token,
            &product_id,
            "Purchase completed, but failed to sync subscription. Please refresh your \
             subscription or contact support.",
            "Failed to activate subscription. Please contact support.",
        )
        .await;
    }

    #[instrument(skip(self, failure), fields(code = ?failure.code))]
    pub async fn on_purchase_failed(&self, failure: PurchaseFailure) {
        error!(message = %failure.message, "Purchase failed");

        if !is_already_owned(&failure) {
            self.set_error(if failure.message.is_empty() {
                "Purchase failed".to_string()
            } else {
                failure.message.clone()
            });
            return;
        }

        info!("Item already owned; attempting to restore subscription from previous purchases");

        let Some(context) = self.pending_context() else {
            warn!("No pending purchase context available for restore; cannot sync subscription");
            self.set_error(restore_error_message(&failure));
            return;
        };

        let purchases = match self.platform.get_available_purchases().await {
            Ok(purchases) => purchases,
            Err(error) => {
                error!(%error, "Error fetching available purchases during restore");
                self.set_error(restore_error_message(&failure));
                return;
            }
        };

        let Some(matching) = purchases
            .into_iter()
            .find(|p| p.product_id == context.product_id)
        else {
            warn!(
                product_id = %context.product_id,
                "No matching purchase found during restore"
            );
            self.set_error(restore_error_message(&failure));
            return;
        };

        let Some(token) = matching.purchase_token.clone() else {
            error!("Missing purchase token when restoring");
            self.set_error("You already own this subscription, but we could not restore it.");
            return;
        };
        let product_id = if matching.product_id.is_empty() {
            context.product_id.clone()
        } else {
            matching.product_id.clone()
        };

        info!(product_id = %product_id, "Restoring subscription from existing purchase");

        let restored = self
            .sync_with_backend(
                &context,
                &token,
                &product_id,
                &restore_error_message(&failure),
                "Failed to restore subscription. Please contact support.",
            )
            .await;

        if restored {
            // Conflict resolved; drop any previously surfaced error
            self.clear_error();
        }
    }

    /// Create-then-verify against the backend. Create failure is terminal
    /// for this purchase; verify failure is logged only, since the
    /// subscription already exists (availability over strict consistency).
    /// Returns true once the subscription was created.
    async fn sync_with_backend(
        &self,
        context: &PendingPurchaseContext,
        token: &str,
        product_id: &str,
        transport_error_message: &str,
        create_fallback_message: &str,
    ) -> bool {
        info!(
            plan_id = %context.plan_id,
            product_id,
            "Syncing purchase with backend"
        );

        let create = match self
            .backend
            .create_subscription(&context.plan_id, token, product_id)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                error!(%error, "Error syncing purchase with backend");
                self.set_error(transport_error_message);
                return false;
            }
        };

        let subscription_id = match (create.success, create.subscription_id) {
            (true, Some(id)) => id,
            _ => {
                error!(error = ?create.error, "Failed to create subscription from purchase");
                self.set_error(
                    create
                        .error
                        .unwrap_or_else(|| create_fallback_message.to_string()),
                );
                return false;
            }
        };

        info!(subscription_id = %subscription_id, "Subscription created");

        match self
            .backend
            .verify_purchase(token, product_id, &subscription_id)
            .await
        {
            Ok(verify) if verify.success && verify.verified => {
                info!("Purchase verified in backend");
            }
            Ok(verify) => {
                // Non-fatal: the user already proceeds as subscribed
                error!(error = ?verify.error, "Failed to verify purchase with backend");
            }
            Err(error) => {
                error!(%error, "Error verifying purchase with backend");
            }
        }

        // Context is cleared once the subscription exists, regardless of the
        // verify outcome
        *self.pending_context.lock().unwrap() = None;
        true
    }
}

fn is_already_owned(failure: &PurchaseFailure) -> bool {
    let code = failure.code.as_deref().unwrap_or("");
    if code == "already-owned" || code == "E_ALREADY_OWNED" {
        return true;
    }

    let message = failure.message.to_lowercase();
    message.contains("already own") || message.contains("already subscribed")
}

fn restore_error_message(failure: &PurchaseFailure) -> String {
    if failure.message.is_empty() {
        "You already own this subscription in Google Play, but we could not restore it."
            .to_string()
    } else {
        failure.message.clone()
    }
}
