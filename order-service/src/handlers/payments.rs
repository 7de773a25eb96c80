//! Payment verification and webhook handlers.
//!
//! Two entry points feed the same order state machine: the synchronous
//! client-redirect confirmation and the asynchronous gateway webhook.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;

use crate::{
    services::order_flow::VerifyOutcome,
    services::razorpay::PaymentVerification,
    AppState,
};

pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

/// Checkout confirmation posted by the client after the Razorpay widget
/// completes.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
}

fn verify_response(
    status: StatusCode,
    success: bool,
    message: &str,
) -> (StatusCode, Json<VerifyPaymentResponse>) {
    (
        status,
        Json(VerifyPaymentResponse {
            success,
            message: message.to_string(),
        }),
    )
}

/// Verify a payment after checkout completion.
///
/// The signature covers `order_id|payment_id`. This path records the
/// payment id and moves the order to PROCESSING; fulfillment waits for the
/// capture webhook.
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<(StatusCode, Json<VerifyPaymentResponse>), AppError> {
    tracing::info!(
        razorpay_order_id = %payload.razorpay_order_id,
        razorpay_payment_id = %payload.razorpay_payment_id,
        "Verifying Razorpay payment"
    );

    let verification = PaymentVerification {
        razorpay_order_id: payload.razorpay_order_id,
        razorpay_payment_id: payload.razorpay_payment_id,
        razorpay_signature: payload.razorpay_signature,
    };

    let is_valid = state
        .razorpay
        .verify_payment_signature(&verification)
        .map_err(|e| {
            tracing::error!(error = %e, "Signature verification error");
            AppError::InternalError(anyhow::anyhow!("Signature verification failed"))
        })?;

    if !is_valid {
        return Ok(verify_response(
            StatusCode::BAD_REQUEST,
            false,
            "Invalid signature",
        ));
    }

    match state
        .order_flow
        .apply_checkout_verification(&verification)
        .await?
    {
        VerifyOutcome::Verified => Ok(verify_response(StatusCode::OK, true, "Payment verified")),
        VerifyOutcome::AlreadyProcessed => {
            Ok(verify_response(StatusCode::OK, true, "Already processed"))
        }
        VerifyOutcome::Cancelled => Ok(verify_response(
            StatusCode::CONFLICT,
            false,
            "Order is cancelled",
        )),
        VerifyOutcome::UnknownOrder => Ok(verify_response(
            StatusCode::NOT_FOUND,
            false,
            "Order not found",
        )),
    }
}

/// Razorpay webhook endpoint.
///
/// The signature is verified over the raw request body exactly as received;
/// the JSON is parsed only afterwards. All benign dispositions (processed,
/// duplicate, unknown order) acknowledge with 200 so the gateway stops
/// retrying; 400 is reserved for signature failures.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing X-Razorpay-Signature header");
            AppError::BadRequest(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid = state
        .razorpay
        .verify_webhook_signature(body.as_bytes(), signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event = state.razorpay.parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    tracing::info!(event = %event.event, "Processing Razorpay webhook");

    let outcome = state
        .order_flow
        .handle_gateway_event(&event, signature)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "status": outcome.acknowledgment() })),
    ))
}
