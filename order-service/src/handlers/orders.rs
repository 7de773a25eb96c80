//! Checkout and order retrieval handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    middleware::UserContext,
    models::{NewOrder, NewOrderItem, OrderStatus},
    services::razorpay::to_paise,
    AppState,
};

/// Request to place an order from a priced set of items.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub address_id: Uuid,
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    pub items: Vec<CreateOrderItem>,
    pub voucher_code: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Response after checkout: the local order plus what the frontend needs to
/// launch the Razorpay checkout widget.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub razorpay_order_id: String,
    /// Amount in the smallest currency unit (paise), as the widget expects.
    pub amount: u64,
    pub currency: String,
    pub total: Decimal,
    pub discount: Decimal,
    pub delivery_charge: Decimal,
    pub final_total: Decimal,
    pub status: OrderStatus,
    /// Razorpay key id for frontend initialization.
    pub razorpay_key_id: String,
}

/// Place an order.
///
/// Creates the local order in PENDING state and the matching Razorpay order
/// for the payable amount. Stock is only checked for availability here; the
/// decrement happens when the payment is captured.
pub async fn create_order(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        user_id = %user.user_id,
        items = payload.items.len(),
        "Creating order"
    );

    if !state.razorpay.is_configured() {
        return Err(AppError::InternalError(anyhow::anyhow!(
            "Razorpay is not configured for this environment"
        )));
    }

    let mut total = Decimal::ZERO;
    for item in &payload.items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Quantity must be at least 1 for product {}",
                item.product_id
            )));
        }
        let product = state
            .repository
            .get_product(item.product_id)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Product {} does not exist", item.product_id))
            })?;
        if product.stock < item.quantity {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Product {} unavailable or out of stock",
                item.product_id
            )));
        }
        total += product.price * Decimal::from(item.quantity);
    }

    let mut discount = Decimal::ZERO;
    let mut voucher_id = None;
    if let Some(code) = payload.voucher_code.as_deref() {
        let voucher = state
            .repository
            .find_voucher(code)
            .await?
            .filter(|v| v.is_usable(Utc::now()))
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid or expired voucher")))?;
        discount = (total * voucher.discount_percent) / Decimal::from(100);
        voucher_id = Some(voucher.id);
    }

    // The delivery charge is part of the amount collected by the gateway.
    let delivery_charge = state.config.checkout.delivery_charge;
    let final_total = total - discount + delivery_charge;
    let amount = to_paise(final_total).map_err(AppError::InternalError)?;

    let razorpay_order = state
        .razorpay
        .create_order(
            amount,
            &state.config.checkout.currency,
            Some(format!("order_rcpt_{}", Uuid::new_v4())),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create Razorpay order");
            AppError::BadGateway(format!("Failed to create payment order: {}", e))
        })?;

    let order = state
        .repository
        .create_order(&NewOrder {
            user_id: user.user_id,
            address_id: payload.address_id,
            voucher_id,
            total,
            discount,
            delivery_charge,
            final_total,
            razorpay_order_id: razorpay_order.id.clone(),
            items: payload
                .items
                .iter()
                .map(|i| NewOrderItem {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect(),
        })
        .await?;

    tracing::info!(
        order_id = %order.id,
        razorpay_order_id = %razorpay_order.id,
        final_total = %order.final_total,
        "Order created and registered with gateway"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            razorpay_order_id: razorpay_order.id,
            amount,
            currency: razorpay_order.currency,
            total: order.total,
            discount: order.discount,
            delivery_charge: order.delivery_charge,
            final_total: order.final_total,
            status: order.status,
            razorpay_key_id: state.razorpay.key_id().to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub address_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub total: Decimal,
    pub discount: Decimal,
    pub delivery_charge: Decimal,
    pub final_total: Decimal,
    pub status: OrderStatus,
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub items: Vec<OrderItemResponse>,
}

/// Get one of the caller's orders, with line items.
pub async fn get_order(
    State(state): State<AppState>,
    user: UserContext,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .repository
        .find_order(order_id)
        .await?
        .filter(|o| o.user_id == user.user_id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;

    let items = state.repository.get_order_items(order.id).await?;

    Ok(Json(OrderResponse {
        id: order.id,
        address_id: order.address_id,
        voucher_id: order.voucher_id,
        total: order.total,
        discount: order.discount,
        delivery_charge: order.delivery_charge,
        final_total: order.final_total,
        status: order.status,
        razorpay_order_id: order.razorpay_order_id,
        razorpay_payment_id: order.razorpay_payment_id,
        created_at: order.created_utc.to_rfc3339(),
        updated_at: order.updated_utc.to_rfc3339(),
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect(),
    }))
}
