use std::sync::Arc;
use std::time::Duration;

use playbill::config::BillingConfig;
use playbill::models::billing::{codes, PurchaseFailure, PurchaseEvent};
use playbill::platform::{PlatformEvent, PlatformOs, PurchaseParams, SubscriptionOfferSpec};
use playbill::BillingGateway;

use crate::support::{
    gateway_with, init_tracing, product_with_offer, purchase, sideload_verifier, MockPlatform,
};

fn service_disconnected() -> PurchaseFailure {
    PurchaseFailure::new("E_SERVICE_DISCONNECTED", "Billing service disconnected")
}

#[tokio::test]
async fn init_is_idempotent_once_ready() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));

    let first = gateway.init().await;
    let second = gateway.init().await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(second.message.as_deref(), Some("Already initialized"));
    // One connection, one listener registration
    assert_eq!(platform.connect_calls(), 1);
    assert_eq!(platform.take_event_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn init_retries_service_disconnected_until_success() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    platform.queue_connect_failure(service_disconnected());
    platform.queue_connect_failure(service_disconnected());
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.init().await;

    assert!(result.success);
    assert_eq!(platform.connect_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn init_while_connecting_returns_in_progress() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    // One disconnect makes the first init suspend in its retry delay
    platform.queue_connect_failure(service_disconnected());
    let gateway = gateway_with(Arc::clone(&platform));

    let (first, second) = futures::future::join(gateway.init(), gateway.init()).await;

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(
        second.code.as_deref(),
        Some(codes::CONNECTION_IN_PROGRESS)
    );
}

#[tokio::test(start_paused = true)]
async fn init_gives_up_after_bounded_retries() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    for _ in 0..10 {
        platform.queue_connect_failure(service_disconnected());
    }
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.init().await;

    assert!(!result.success);
    // Initial attempt plus three bounded retries
    assert_eq!(platform.connect_calls(), 4);
    assert!(!gateway.is_ready());
}

#[tokio::test]
async fn init_does_not_retry_other_failures() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    platform.queue_connect_failure(PurchaseFailure::new(
        "E_BILLING_UNAVAILABLE",
        "Billing unavailable",
    ));
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.init().await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("E_BILLING_UNAVAILABLE"));
    assert_eq!(platform.connect_calls(), 1);
}

#[tokio::test]
async fn init_fails_fast_when_subscriptions_unsupported() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    *platform.feature_result.lock().unwrap() = Some(Ok(false));
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.init().await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::FEATURE_NOT_SUPPORTED));
    // No listeners registered when nothing can be sold
    assert_eq!(platform.take_event_calls(), 0);
    assert!(!gateway.is_ready());
}

#[tokio::test]
async fn feature_query_failure_is_assumed_supported() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    *platform.feature_result.lock().unwrap() =
        Some(Err(PurchaseFailure::new("E_UNKNOWN", "query failed")));
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.init().await;

    assert!(result.success);
    assert!(gateway.subscriptions_supported());
}

#[tokio::test]
async fn get_products_lazily_initializes() {
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly")],
    ));
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.get_products().await;

    assert!(result.success);
    assert_eq!(platform.connect_calls(), 1);
    assert_eq!(result.data.as_ref().map(Vec::len), Some(1));
    assert_eq!(gateway.cached_products().len(), 1);
}

#[tokio::test]
async fn empty_catalog_is_item_unavailable_not_success() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.get_products().await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::ITEM_UNAVAILABLE));
    assert!(result.data.is_none());
}

#[tokio::test]
async fn purchase_requires_initialization() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::NOT_INITIALIZED));
    assert!(platform.purchase_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn purchase_issues_first_offer_token_and_resolves_immediately() {
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly")],
    ));
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    // Resolves at initiation, before any purchase event arrives
    assert!(result.success);
    let requests = platform.purchase_requests.lock().unwrap();
    assert_eq!(
        *requests,
        vec![PurchaseParams::Android {
            skus: vec!["muscleai.pro.monthly".to_string()],
            subscription_offers: vec![SubscriptionOfferSpec {
                sku: "muscleai.pro.monthly".to_string(),
                offer_token: "tok123".to_string(),
            }],
        }]
    );
}

#[tokio::test]
async fn purchase_on_ios_goes_by_sku() {
    let mut product = product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly");
    product.offers.clear();
    let platform = Arc::new(MockPlatform::with_catalog(PlatformOs::Ios, vec![product]));
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(result.success);
    let requests = platform.purchase_requests.lock().unwrap();
    assert_eq!(
        *requests,
        vec![PurchaseParams::Ios {
            sku: "muscleai.pro.monthly".to_string(),
        }]
    );
}

#[tokio::test]
async fn purchase_cache_miss_is_surfaced_without_refetch() {
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.basic.monthly", "tok1", "basic-monthly")],
    ));
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.get_products().await;
    let fetches_before = *platform.fetch_calls.lock().unwrap();

    let result = gateway.purchase("muscleai.vip.monthly").await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::PRODUCT_NOT_FOUND));
    assert_eq!(*platform.fetch_calls.lock().unwrap(), fetches_before);
}

#[tokio::test]
async fn purchase_without_offers_is_a_configuration_error() {
    let mut product = product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly");
    product.offers.clear();
    let platform = Arc::new(MockPlatform::with_catalog(PlatformOs::Android, vec![product]));
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::NO_OFFER_TOKEN));
}

#[tokio::test]
async fn purchase_with_blank_offer_token_is_distinct() {
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.pro.monthly", "", "pro-monthly")],
    ));
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::INVALID_OFFER_TOKEN));
}

#[tokio::test]
async fn strict_installer_switch_blocks_sideloaded_purchases() {
    init_tracing();
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly")],
    ));
    let config = BillingConfig {
        strict_installer_check: true,
        ..BillingConfig::default()
    };
    let gateway = BillingGateway::new(
        Arc::clone(&platform) as Arc<dyn playbill::PlatformBilling>,
        sideload_verifier(PlatformOs::Android),
        config,
    );
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(codes::INSTALL_SOURCE_NOT_PLAY));
    assert!(platform.purchase_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sideloaded_install_is_advisory_by_default() {
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly")],
    ));
    let gateway = BillingGateway::new(
        Arc::clone(&platform) as Arc<dyn playbill::PlatformBilling>,
        sideload_verifier(PlatformOs::Android),
        BillingConfig::default(),
    );
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(result.success);
    assert!(!gateway.diagnostics().installer_is_play_store);
}

#[tokio::test]
async fn purchase_initiation_failure_is_labeled_for_support() {
    let platform = Arc::new(MockPlatform::with_catalog(
        PlatformOs::Android,
        vec![product_with_offer("muscleai.pro.monthly", "tok123", "pro-monthly")],
    ));
    *platform.purchase_failure.lock().unwrap() = Some(PurchaseFailure {
        code: Some("E_UNKNOWN".to_string()),
        message: "launch failed".to_string(),
        response_code: Some(7),
        debug_message: Some("billing client said no".to_string()),
    });
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.get_products().await;

    let result = gateway.purchase("muscleai.pro.monthly").await;

    assert!(!result.success);
    assert_eq!(result.response_code, Some(7));
    let message = result.message.unwrap();
    assert!(
        message.starts_with("[CODE 7 ITEM_ALREADY_OWNED]"),
        "unexpected message: {message}"
    );
}

#[tokio::test]
async fn settled_purchase_is_acknowledged_once_and_fanned_out() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));
    let mut events = gateway.subscribe();
    gateway.init().await;

    platform.push_event(PlatformEvent::PurchaseUpdated(purchase(
        "muscleai.pro.monthly",
        Some("tok123"),
        Some("txn-1"),
    )));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no purchase event")
        .expect("event stream closed");

    match event {
        PurchaseEvent::Completed(purchase) => {
            assert_eq!(purchase.product_id, "muscleai.pro.monthly");
            assert_eq!(purchase.purchase_token.as_deref(), Some("tok123"));
        }
        PurchaseEvent::Failed(failure) => panic!("unexpected failure: {failure}"),
    }

    assert_eq!(
        *platform.acknowledged.lock().unwrap(),
        vec!["tok123".to_string()]
    );
    assert_eq!(platform.finished.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn already_acknowledged_purchase_is_not_acknowledged_again() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));
    let mut events = gateway.subscribe();
    gateway.init().await;

    let mut settled = purchase("muscleai.pro.monthly", Some("tok123"), Some("txn-1"));
    settled.is_acknowledged = true;
    platform.push_event(PlatformEvent::PurchaseUpdated(settled));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no purchase event")
        .expect("event stream closed");

    assert!(matches!(event, PurchaseEvent::Completed(_)));
    assert!(platform.acknowledged.lock().unwrap().is_empty());
    assert_eq!(platform.finished.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn purchase_update_without_transaction_id_is_dropped() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));
    let mut events = gateway.subscribe();
    gateway.init().await;

    // Malformed event first, then a valid one; only the valid one surfaces
    platform.push_event(PlatformEvent::PurchaseUpdated(purchase(
        "muscleai.pro.monthly",
        Some("tok-malformed"),
        None,
    )));
    platform.push_event(PlatformEvent::PurchaseUpdated(purchase(
        "muscleai.vip.monthly",
        Some("tok-valid"),
        Some("txn-2"),
    )));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no purchase event")
        .expect("event stream closed");

    match event {
        PurchaseEvent::Completed(purchase) => {
            assert_eq!(purchase.product_id, "muscleai.vip.monthly");
        }
        PurchaseEvent::Failed(failure) => panic!("unexpected failure: {failure}"),
    }

    // The malformed event never reached acknowledge/finish
    assert_eq!(
        *platform.acknowledged.lock().unwrap(),
        vec!["tok-valid".to_string()]
    );
    assert_eq!(platform.finished.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn purchase_error_events_are_forwarded() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));
    let mut events = gateway.subscribe();
    gateway.init().await;

    platform.push_event(PlatformEvent::PurchaseError(PurchaseFailure::new(
        "E_USER_CANCELLED",
        "Purchase was cancelled",
    )));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no purchase event")
        .expect("event stream closed");

    match event {
        PurchaseEvent::Failed(failure) => {
            assert_eq!(failure.code.as_deref(), Some("E_USER_CANCELLED"));
        }
        PurchaseEvent::Completed(_) => panic!("expected a failure event"),
    }
}

#[tokio::test]
async fn disconnect_resets_state_and_is_repeatable() {
    let platform = Arc::new(MockPlatform::new(PlatformOs::Android));
    let gateway = gateway_with(Arc::clone(&platform));
    gateway.init().await;
    assert!(gateway.is_ready());

    gateway.disconnect().await;
    gateway.disconnect().await;

    assert!(!gateway.is_ready());
    assert_eq!(*platform.end_connection_calls.lock().unwrap(), 2);
}
