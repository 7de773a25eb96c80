use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle states.
///
/// Transitions only move forward: PENDING and PROCESSING can advance on
/// gateway events, CANCELLED is terminal for this service (reopening a
/// cancelled order is an admin operation elsewhere).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

/// Status of a single gateway payment event, as recorded in the ledger.
///
/// AUTHORIZED means funds are reserved but not collected; only CAPTURED
/// triggers fulfillment.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Authorized,
    Captured,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub total: Decimal,
    pub discount: Decimal,
    pub delivery_charge: Decimal,
    pub final_total: Decimal,
    pub status: OrderStatus,
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

/// One row per accepted gateway event. Rows are never updated or deleted.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub razorpay_payment_id: String,
    pub razorpay_order_id: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Voucher {
    pub id: Uuid,
    pub code: String,
    pub discount_percent: Decimal,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
}

impl Voucher {
    /// A voucher is usable when it is active and has not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Checkout input for a new order, priced and ready to persist.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub total: Decimal,
    pub discount: Decimal,
    pub delivery_charge: Decimal,
    pub final_total: Decimal,
    pub razorpay_order_id: String,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A gateway payment event to append to the ledger.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub razorpay_payment_id: String,
    pub razorpay_order_id: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
}
