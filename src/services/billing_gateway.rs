use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::{
    config::BillingConfig,
    models::billing::{
        codes, BillingDiagnostics, BillingResult, Product, Purchase, PurchaseEvent,
        PurchaseFailure,
    },
    platform::{
        BillingFeature, PlatformBilling, PlatformEvent, PlatformOs, ProductKind, PurchaseParams,
        SubscriptionOfferSpec,
    },
    services::installer::InstallerVerifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

struct GatewayState {
    connection: ConnectionState,
    subscriptions_supported: bool,
    products: Vec<Product>,
    installer_package: Option<String>,
    installer_is_play_store: bool,
}

type Subscribers = Mutex<Vec<mpsc::UnboundedSender<PurchaseEvent>>>;

/// Owns the connection lifecycle to the platform billing service. Every
/// public operation returns the uniform [`BillingResult`] envelope; nothing
/// here panics or returns `Err` to the caller.
///
/// Purchase settlement is decoupled from initiation: `purchase()` resolves
/// when the billing flow is accepted, and the outcome arrives later through
/// the event stream handed out by [`BillingGateway::subscribe`].
pub struct BillingGateway {
    platform: Arc<dyn PlatformBilling>,
    verifier: InstallerVerifier,
    config: BillingConfig,
    state: Mutex<GatewayState>,
    subscribers: Arc<Subscribers>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl BillingGateway {
    pub fn new(
        platform: Arc<dyn PlatformBilling>,
        verifier: InstallerVerifier,
        config: BillingConfig,
    ) -> Self {
        Self {
            platform,
            verifier,
            config,
            state: Mutex::new(GatewayState {
                connection: ConnectionState::Disconnected,
                subscriptions_supported: false,
                products: Vec::new(),
                installer_package: None,
                installer_is_play_store: true,
            }),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            listener_task: Mutex::new(None),
        }
    }

    /// Initialize the billing connection. Idempotent once ready; while a
    /// connection attempt is in flight it returns a non-blocking
    /// `CONNECTION_IN_PROGRESS` result and the caller re-invokes later.
    #[instrument(skip(self))]
    pub async fn init(&self) -> BillingResult {
        {
            let mut state = self.state.lock().unwrap();
            match state.connection {
                ConnectionState::Ready => {
                    info!("Billing already initialized");
                    return BillingResult::ok("Already initialized");
                }
                ConnectionState::Connecting => {
                    info!("Billing connection in progress");
                    return BillingResult::in_progress("Connection in progress");
                }
                ConnectionState::Disconnected => state.connection = ConnectionState::Connecting,
            }
        }

        // Installer source is advisory; recorded for diagnostics and the
        // strict gate in purchase()
        let installer = self.verifier.check().await;
        if self.platform.os() == PlatformOs::Android && !installer.ok {
            warn!(
                installer = ?installer.installer,
                "App not installed from Google Play; this build is intended for Play Store distribution"
            );
        }
        {
            let mut state = self.state.lock().unwrap();
            state.installer_package = installer.installer.clone();
            state.installer_is_play_store = installer.ok;
        }

        if let Err(failure) = self.connect_with_retry().await {
            self.set_disconnected();
            error!(
                code = ?failure.code,
                response_code = ?failure.response_code,
                message = %failure.message,
                "Failed to initialize billing"
            );
            return self.failure_result(failure, codes::INIT_ERROR);
        }

        let supported = match self
            .platform
            .is_feature_supported(BillingFeature::Subscriptions)
            .await
        {
            Ok(supported) => supported,
            Err(failure) => {
                // A flaky support query must not brick purchases
                warn!(%failure, "Feature support query failed; assuming subscriptions are supported");
                true
            }
        };

        if !supported {
            error!("Subscriptions not supported on this device/build");
            let mut state = self.state.lock().unwrap();
            state.connection = ConnectionState::Disconnected;
            state.subscriptions_supported = false;
            return BillingResult::failure(
                codes::FEATURE_NOT_SUPPORTED,
                "Subscriptions are not supported. Ensure the app is installed from the Play Store.",
            );
        }

        self.register_listener();

        {
            let mut state = self.state.lock().unwrap();
            state.connection = ConnectionState::Ready;
            state.subscriptions_supported = true;
        }

        info!(
            installer = ?installer.installer,
            installer_is_play_store = installer.ok,
            "Billing initialized"
        );
        BillingResult::ok("Billing initialized")
    }

    /// Bounded connect loop: retries only the service-disconnected failure
    /// class, with a fixed delay between attempts.
    async fn connect_with_retry(&self) -> Result<(), PurchaseFailure> {
        let max_retries = self.config.connection_max_retries;
        let delay = Duration::from_millis(self.config.connection_retry_delay_ms);
        let mut attempt: u32 = 0;

        loop {
            match self.platform.connect().await {
                Ok(_) => return Ok(()),
                Err(failure) if is_service_disconnected(&failure) && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries, "Billing service disconnected; retrying connection"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    /// Registers the single event-forwarding task. Re-registration aborts
    /// the previous task first, so at most one registration exists.
    fn register_listener(&self) {
        if let Some(task) = self.listener_task.lock().unwrap().take() {
            task.abort();
        }

        let Some(mut events) = self.platform.take_purchase_events() else {
            warn!("Platform purchase event stream unavailable; listeners not registered");
            return;
        };

        let platform = Arc::clone(&self.platform);
        let subscribers = Arc::clone(&self.subscribers);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PlatformEvent::PurchaseUpdated(purchase) => {
                        process_purchase_update(platform.as_ref(), &subscribers, purchase).await;
                    }
                    PlatformEvent::PurchaseError(failure) => {
                        error!(
                            code = ?failure.code,
                            message = %failure.message,
                            "Purchase error event"
                        );
                        // Forwarded as-is; classification happens downstream
                        fan_out(&subscribers, PurchaseEvent::Failed(failure));
                    }
                }
            }
        });

        *self.listener_task.lock().unwrap() = Some(task);
    }

    /// Fetch the configured subscription catalog. Lazily initializes the
    /// connection. An empty result set is a misconfiguration upstream and is
    /// reported as `ITEM_UNAVAILABLE`, never as a valid empty state.
    #[instrument(skip(self))]
    pub async fn get_products(&self) -> BillingResult<Vec<Product>> {
        if !self.is_ready() {
            let init_result = self.init().await;
            if !init_result.success {
                return BillingResult {
                    success: false,
                    code: init_result.code,
                    message: init_result.message,
                    response_code: init_result.response_code,
                    debug_message: init_result.debug_message,
                    data: None,
                };
            }
        }

        if !self.subscriptions_supported() {
            error!("Cannot fetch products: subscriptions not supported");
            return BillingResult::failure(
                codes::FEATURE_NOT_SUPPORTED,
                "Subscriptions are not supported on this device. Install from the Play Store.",
            );
        }

        let skus = self.config.subscription_skus.clone();
        info!(?skus, "Fetching subscription products");

        match self.platform.fetch_products(&skus, ProductKind::Subs).await {
            Ok(products) if products.is_empty() => {
                error!("Zero products returned from the store catalog");
                BillingResult::failure(
                    codes::ITEM_UNAVAILABLE,
                    "Products not available in your region. Ensure products are ACTIVE in the \
                     Play Console, base plans have prices for your country, and the app is \
                     installed from the Play Store.",
                )
            }
            Ok(products) => {
                for product in &products {
                    info!(
                        product_id = %product.id,
                        title = %product.title,
                        price = %product.display_price,
                        offers = product.offers.len(),
                        "Product fetched"
                    );
                    if product.offers.is_empty() {
                        error!(
                            product_id = %product.id,
                            "No offer details; purchase will fail until the base plan is active"
                        );
                    }
                }

                // Replace the cache wholesale so readers never see a partial list
                self.state.lock().unwrap().products = products.clone();

                let count = products.len();
                BillingResult::ok_with(products, format!("Found {} products", count))
            }
            Err(failure) => {
                error!(
                    code = ?failure.code,
                    response_code = ?failure.response_code,
                    message = %failure.message,
                    "Error fetching products"
                );
                self.failure_result(failure, codes::FETCH_ERROR)
            }
        }
    }

    /// Initiate a subscription purchase. Returns success as soon as the
    /// billing flow is accepted; the outcome arrives via the event stream.
    #[instrument(skip(self))]
    pub async fn purchase(&self, product_id: &str) -> BillingResult {
        let (ready, supported, installer_ok) = {
            let state = self.state.lock().unwrap();
            (
                state.connection == ConnectionState::Ready,
                state.subscriptions_supported,
                state.installer_is_play_store,
            )
        };

        if !ready {
            return BillingResult::failure(codes::NOT_INITIALIZED, "Billing not initialized");
        }
        if !supported {
            error!("Cannot purchase: subscriptions not supported");
            return BillingResult::failure(
                codes::FEATURE_NOT_SUPPORTED,
                "Subscriptions not supported. Install from the Play Store.",
            );
        }

        if self.platform.os() == PlatformOs::Android && !installer_ok {
            warn!("App not installed from Google Play; this build is intended for Play Store distribution");
            if self.config.strict_installer_check {
                return BillingResult::failure(
                    codes::INSTALL_SOURCE_NOT_PLAY,
                    "To use Google Play Billing, install this app from the Google Play Store.",
                );
            }
        }

        // Cache miss never triggers a refetch: staleness is surfaced
        let product = {
            let state = self.state.lock().unwrap();
            let found = state.products.iter().find(|p| p.id == product_id).cloned();
            if found.is_none() {
                let available: Vec<&str> =
                    state.products.iter().map(|p| p.id.as_str()).collect();
                error!(product_id, ?available, "Product not found in cached products");
            }
            found
        };
        let Some(product) = product else {
            return BillingResult::failure(
                codes::PRODUCT_NOT_FOUND,
                "Product not found. Please refresh and try again.",
            );
        };

        let params = match self.platform.os() {
            PlatformOs::Android => {
                if product.offers.is_empty() {
                    error!(product_id, "No subscription offer details");
                    return BillingResult::failure(
                        codes::NO_OFFER_TOKEN,
                        "Base plan/offer not active or not available in this region. Check the \
                         Play Console base plan configuration.",
                    );
                }

                // A richer UI could let the user pick; take the first offer
                let offer = &product.offers[0];
                if offer.offer_token.is_empty() {
                    error!(product_id, "Offer token is empty");
                    return BillingResult::failure(
                        codes::INVALID_OFFER_TOKEN,
                        "Offer token missing. Ensure the base plan is ACTIVE and has a valid \
                         offer token in the Play Console.",
                    );
                }

                info!(
                    product_id,
                    base_plan_id = %offer.base_plan_id,
                    "Selected subscription offer"
                );

                PurchaseParams::Android {
                    skus: vec![product_id.to_string()],
                    subscription_offers: vec![SubscriptionOfferSpec {
                        sku: product_id.to_string(),
                        offer_token: offer.offer_token.clone(),
                    }],
                }
            }
            PlatformOs::Ios => PurchaseParams::Ios {
                sku: product_id.to_string(),
            },
        };

        match self.platform.request_purchase(params).await {
            Ok(()) => {
                info!(product_id, "Purchase flow initiated; awaiting purchase events");
                BillingResult::ok("Purchase flow initiated")
            }
            Err(failure) => {
                error!(
                    code = ?failure.code,
                    response_code = ?failure.response_code,
                    debug_message = ?failure.debug_message,
                    "Purchase initiation failed"
                );

                let friendly = friendly_error_message(&failure);
                // Support diagnostics never show a bare unlabeled failure
                let message = match failure.response_code {
                    Some(rc) => {
                        format!("[CODE {} {}] {}", rc, response_code_label(Some(rc)), friendly)
                    }
                    None => format!(
                        "[{}] {}",
                        failure.code.as_deref().unwrap_or(codes::PURCHASE_ERROR),
                        friendly
                    ),
                };

                BillingResult {
                    success: false,
                    code: failure
                        .code
                        .clone()
                        .or(Some(codes::PURCHASE_ERROR.to_string())),
                    message: Some(message),
                    response_code: failure.response_code,
                    debug_message: failure.debug_message,
                    data: None,
                }
            }
        }
    }

    /// Subscribe to settled purchase outcomes. Dropping the receiver
    /// unsubscribes; closed subscribers are pruned on the next fan-out.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PurchaseEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Tear down listeners and close the platform connection. Safe to call
    /// multiple times.
    pub async fn disconnect(&self) {
        if let Some(task) = self.listener_task.lock().unwrap().take() {
            task.abort();
        }

        if let Err(failure) = self.platform.end_connection().await {
            error!(%failure, "Error disconnecting billing");
        }

        self.set_disconnected();
        info!("Billing disconnected");
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().unwrap().connection == ConnectionState::Ready
    }

    pub fn subscriptions_supported(&self) -> bool {
        self.state.lock().unwrap().subscriptions_supported
    }

    pub fn cached_products(&self) -> Vec<Product> {
        self.state.lock().unwrap().products.clone()
    }

    pub fn diagnostics(&self) -> BillingDiagnostics {
        let state = self.state.lock().unwrap();
        BillingDiagnostics {
            initialized: state.connection == ConnectionState::Ready,
            subscriptions_supported: state.subscriptions_supported,
            installer_package: state.installer_package.clone(),
            installer_is_play_store: state.installer_is_play_store,
            products_count: state.products.len(),
        }
    }

    fn set_disconnected(&self) {
        self.state.lock().unwrap().connection = ConnectionState::Disconnected;
    }

    fn failure_result<T>(&self, failure: PurchaseFailure, fallback_code: &str) -> BillingResult<T> {
        BillingResult {
            success: false,
            code: failure
                .code
                .clone()
                .or_else(|| failure.response_code.map(|rc| rc.to_string()))
                .or(Some(fallback_code.to_string())),
            message: Some(friendly_error_message(&failure)),
            response_code: failure.response_code,
            debug_message: failure.debug_message,
            data: None,
        }
    }
}

/// Acknowledge (once) and finish a settled purchase.
async fn settle_purchase(
    platform: &dyn PlatformBilling,
    purchase: &Purchase,
) -> Result<(), PurchaseFailure> {
    if platform.os() == PlatformOs::Android {
        if purchase.is_acknowledged {
            info!("Purchase already acknowledged, skipping");
        } else {
            match &purchase.purchase_token {
                Some(token) => {
                    platform.acknowledge_purchase(token).await?;
                    info!("Purchase acknowledged");
                }
                None => error!("No purchase token available for acknowledgement"),
            }
        }
    }

    platform.finish_transaction(purchase).await?;
    Ok(())
}

async fn process_purchase_update(
    platform: &dyn PlatformBilling,
    subscribers: &Subscribers,
    purchase: Purchase,
) {
    info!(
        product_id = %purchase.product_id,
        transaction_id = ?purchase.transaction_id,
        acknowledged = purchase.is_acknowledged,
        "Purchase updated"
    );

    if purchase.transaction_id.is_none() {
        // Malformed provider event; no callback fires
        warn!(
            product_id = %purchase.product_id,
            "Purchase update received without a transaction id; dropping"
        );
        return;
    }

    match settle_purchase(platform, &purchase).await {
        Ok(()) => {
            info!("Transaction finished");
            fan_out(subscribers, PurchaseEvent::Completed(purchase));
        }
        Err(failure) => {
            error!(
                code = ?failure.code,
                message = %failure.message,
                "Error processing purchase"
            );
            fan_out(subscribers, PurchaseEvent::Failed(failure));
        }
    }
}

fn fan_out(subscribers: &Subscribers, event: PurchaseEvent) {
    let mut subs = subscribers.lock().unwrap();
    subs.retain(|tx| tx.send(event.clone()).is_ok());
}

fn is_service_disconnected(failure: &PurchaseFailure) -> bool {
    matches!(
        failure.code.as_deref(),
        Some("E_SERVICE_DISCONNECTED" | "SERVICE_DISCONNECTED")
    ) || failure.response_code == Some(-1)
        || failure.message.contains("SERVICE_DISCONNECTED")
}

/// Play Billing responseCode labels, per the vendor error reference.
fn response_code_label(response_code: Option<i32>) -> &'static str {
    match response_code {
        Some(0) => "OK",
        Some(1) => "USER_CANCELED",
        Some(2) => "SERVICE_UNAVAILABLE",
        Some(3) => "BILLING_UNAVAILABLE",
        Some(4) => "ITEM_UNAVAILABLE",
        Some(5) => "DEVELOPER_ERROR",
        Some(6) => "ERROR",
        Some(7) => "ITEM_ALREADY_OWNED",
        Some(8) => "ITEM_NOT_OWNED",
        _ => "UNKNOWN",
    }
}

/// Static code→message table with substring fallback on the raw message.
fn friendly_error_message(failure: &PurchaseFailure) -> String {
    let mapped = match failure.code.as_deref().unwrap_or("") {
        "E_USER_CANCELLED" => Some("Purchase was cancelled"),
        "E_ITEM_UNAVAILABLE" => Some(
            "This subscription is not available. Ensure the app is installed from the Play \
             Store, products are active in the Play Console, and base plans have prices for \
             your region.",
        ),
        "E_NETWORK_ERROR" => Some("Network error. Please check your internet connection"),
        "E_SERVICE_ERROR" => Some(
            "Google Play services error. Ensure the app is installed from the Play Store, \
             Google Play services is updated, and you have a valid Google account.",
        ),
        "E_ALREADY_OWNED" => Some("You already own this subscription"),
        "E_DEVELOPER_ERROR" => Some("Configuration error. Contact support"),
        "E_BILLING_UNAVAILABLE" => {
            Some("Google Play Billing is unavailable. App must be installed from the Play Store")
        }
        "E_FEATURE_NOT_SUPPORTED" => Some("Subscriptions not supported on this device"),
        _ => None,
    };

    if let Some(mapped) = mapped {
        return mapped.to_string();
    }

    if failure.message.contains("BILLING_UNAVAILABLE") {
        return "Google Play Billing unavailable. Install from the Play Store".to_string();
    }
    if failure.message.contains("ITEM_UNAVAILABLE") {
        return "Product not available. Check the Play Console configuration".to_string();
    }
    if failure.message.contains("SERVICE_DISCONNECTED") {
        return "Billing service disconnected. Please try again".to_string();
    }

    if failure.message.is_empty() {
        "An error occurred. Please try again".to_string()
    } else {
        failure.message.clone()
    }
}
