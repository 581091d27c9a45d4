use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::BackendConfig,
    error::{ApiError, Result},
    models::subscription::{
        CancelSubscriptionRequest, CancelSubscriptionResponse, ChangePlanRequest,
        ChangePlanResponse, CreateSubscriptionRequest, CreateSubscriptionResponse,
        VerifyPurchaseRequest, VerifyPurchaseResponse,
    },
};

/// Remote subscription ledger operations. Each call is a stateless
/// request/response; a well-formed `{success: false, error}` body is a domain
/// outcome, not an `Err`.
#[async_trait]
pub trait SubscriptionBackend: Send + Sync {
    async fn create_subscription(
        &self,
        plan_id: &str,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<CreateSubscriptionResponse>;

    async fn verify_purchase(
        &self,
        purchase_token: &str,
        product_id: &str,
        subscription_id: &str,
    ) -> Result<VerifyPurchaseResponse>;

    async fn cancel_subscription(&self, subscription_id: &str)
        -> Result<CancelSubscriptionResponse>;

    async fn change_subscription_plan(
        &self,
        subscription_id: &str,
        new_plan_id: &str,
        user_id: &str,
    ) -> Result<ChangePlanResponse>;
}

/// HTTP implementation against the subscription backend's edge functions.
pub struct SubscriptionApi {
    config: BackendConfig,
    http_client: reqwest::Client,
}

impl SubscriptionApi {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            config: config.clone(),
            http_client,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request_id = Uuid::new_v4();
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);

        info!(request_id = %request_id, %url, "→ Backend request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.bearer_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The backend answers 4xx with a {success:false, error} envelope;
            // decode it so the caller sees the error message, not the status.
            warn!(request_id = %request_id, %status, "Backend returned non-success status");
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "failed to decode backend response from {}: {}",
                path, e
            ))
        })
    }
}

#[async_trait]
impl SubscriptionBackend for SubscriptionApi {
    #[instrument(skip(self, purchase_token))]
    async fn create_subscription(
        &self,
        plan_id: &str,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<CreateSubscriptionResponse> {
        let request = CreateSubscriptionRequest {
            plan_id: plan_id.to_string(),
            google_play_purchase_token: purchase_token.to_string(),
            google_play_product_id: product_id.to_string(),
        };
        request
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

        self.post_json("create-subscription", &request).await
    }

    #[instrument(skip(self, purchase_token))]
    async fn verify_purchase(
        &self,
        purchase_token: &str,
        product_id: &str,
        subscription_id: &str,
    ) -> Result<VerifyPurchaseResponse> {
        let request = VerifyPurchaseRequest {
            purchase_token: purchase_token.to_string(),
            product_id: product_id.to_string(),
            subscription_id: subscription_id.to_string(),
        };
        request
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

        self.post_json("verify-google-play-purchase", &request).await
    }

    #[instrument(skip(self))]
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<CancelSubscriptionResponse> {
        let request = CancelSubscriptionRequest {
            subscription_id: subscription_id.to_string(),
        };
        request
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

        self.post_json("cancel-subscription", &request).await
    }

    #[instrument(skip(self))]
    async fn change_subscription_plan(
        &self,
        subscription_id: &str,
        new_plan_id: &str,
        user_id: &str,
    ) -> Result<ChangePlanResponse> {
        let request = ChangePlanRequest {
            subscription_id: subscription_id.to_string(),
            new_plan_id: new_plan_id.to_string(),
            user_id: user_id.to_string(),
        };
        request
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

        self.post_json("change-subscription-plan", &request).await
    }
}
