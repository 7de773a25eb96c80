//! Razorpay payment gateway client.
//!
//! Implements Razorpay's Orders API for payment initiation and the two
//! signature contracts used for payment confirmation: the checkout
//! signature over `order_id|payment_id` and the webhook signature over the
//! raw request body.

use crate::config::RazorpayConfig;
use anyhow::{anyhow, Result};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::utils::signature::verify_hmac_sha256;

/// Razorpay client for interacting with the Razorpay API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

/// Request to create a Razorpay order.
#[derive(Debug, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in smallest currency unit (paise for INR).
    pub amount: u64,
    /// Currency code (e.g., "INR").
    pub currency: String,
    /// Receipt ID for tracking (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

/// Response from Razorpay order creation.
#[derive(Debug, Deserialize)]
pub struct RazorpayOrder {
    /// Razorpay order ID.
    pub id: String,
    /// Amount in smallest currency unit.
    pub amount: u64,
    /// Currency code.
    pub currency: String,
    /// Receipt ID.
    pub receipt: Option<String>,
    /// Order status.
    pub status: String,
}

/// Razorpay API error response.
#[derive(Debug, Deserialize)]
pub struct RazorpayError {
    pub error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayErrorDetail {
    pub code: String,
    pub description: String,
}

/// Checkout signature parameters, as posted back by the client after a
/// completed Razorpay checkout.
#[derive(Debug)]
pub struct PaymentVerification {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

/// Razorpay webhook envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<WebhookPaymentEntity>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPaymentEntity {
    pub entity: PaymentEntity,
}

/// Razorpay payment entity carried in webhook payloads.
#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    /// Amount in smallest currency unit (paise).
    pub amount: u64,
    pub currency: String,
    pub status: String,
    pub order_id: Option<String>,
    pub method: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
}

/// Convert a rupee amount to paise for the gateway.
pub fn to_paise(amount: Decimal) -> Result<u64> {
    (amount * Decimal::from(100))
        .round()
        .to_u64()
        .ok_or_else(|| anyhow!("Amount {} not representable in paise", amount))
}

/// Convert a gateway paise amount back to rupees.
pub fn from_paise(paise: u64) -> Decimal {
    Decimal::from(paise) / Decimal::from(100)
}

impl RazorpayClient {
    /// Create a new Razorpay client.
    pub fn new(config: RazorpayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Razorpay is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    /// The public key id, needed by the frontend checkout widget.
    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    /// Create a new order in Razorpay.
    ///
    /// # Arguments
    /// * `amount` - Amount in smallest currency unit (paise for INR)
    /// * `currency` - Currency code (e.g., "INR")
    /// * `receipt` - Optional receipt ID for tracking
    pub async fn create_order(
        &self,
        amount: u64,
        currency: &str,
        receipt: Option<String>,
    ) -> Result<RazorpayOrder> {
        if !self.is_configured() {
            return Err(anyhow!("Razorpay credentials not configured"));
        }

        let request = CreateOrderRequest {
            amount,
            currency: currency.to_string(),
            receipt,
        };

        let url = format!("{}/orders", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "Razorpay create_order response");

        if status.is_success() {
            let order: RazorpayOrder = serde_json::from_str(&body)?;
            tracing::info!(
                razorpay_order_id = %order.id,
                amount = order.amount,
                currency = %order.currency,
                "Razorpay order created"
            );
            Ok(order)
        } else {
            let error: RazorpayError =
                serde_json::from_str(&body).unwrap_or_else(|_| RazorpayError {
                    error: RazorpayErrorDetail {
                        code: "UNKNOWN".to_string(),
                        description: body.clone(),
                    },
                });
            tracing::error!(
                code = %error.error.code,
                description = %error.error.description,
                "Razorpay order creation failed"
            );
            Err(anyhow!(
                "Razorpay error: {} - {}",
                error.error.code,
                error.error.description
            ))
        }
    }

    /// Verify the checkout signature posted back by the client.
    ///
    /// The signature is computed as:
    /// `HMAC-SHA256(order_id + "|" + payment_id, key_secret)`
    pub fn verify_payment_signature(&self, verification: &PaymentVerification) -> Result<bool> {
        let secret = self.config.key_secret.expose_secret();
        if secret.is_empty() {
            tracing::error!("Razorpay key secret not configured; rejecting verification");
            return Ok(false);
        }

        let payload = format!(
            "{}|{}",
            verification.razorpay_order_id, verification.razorpay_payment_id
        );

        let is_valid = verify_hmac_sha256(
            secret,
            payload.as_bytes(),
            &verification.razorpay_signature,
        )?;

        if is_valid {
            tracing::info!(
                razorpay_order_id = %verification.razorpay_order_id,
                razorpay_payment_id = %verification.razorpay_payment_id,
                "Payment signature verified"
            );
        } else {
            tracing::warn!(
                razorpay_order_id = %verification.razorpay_order_id,
                razorpay_payment_id = %verification.razorpay_payment_id,
                "Payment signature verification failed"
            );
        }

        Ok(is_valid)
    }

    /// Verify the webhook signature over the raw request body.
    ///
    /// `raw_body` must be the exact bytes received on the wire. Verifying a
    /// re-serialized body is a correctness bug: the gateway signed its own
    /// byte representation, and whitespace or key order can differ.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> Result<bool> {
        let secret = self.config.webhook_secret.expose_secret();
        if secret.is_empty() {
            tracing::error!("Webhook secret not configured; rejecting webhook");
            return Ok(false);
        }

        let is_valid = verify_hmac_sha256(secret, raw_body, signature)?;

        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Parse a webhook event from the request body.
    pub fn parse_webhook_event(&self, body: &str) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_str(body)?;
        Ok(event)
    }
}
