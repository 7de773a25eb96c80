//! Persistent store for orders, payments, products, and carts.
//!
//! All multi-statement units of work run inside a single transaction. The
//! capture path in particular commits the gating mutations (payment ledger
//! row, order status) and the fulfillment side effects (stock decrement,
//! cart clear) atomically, so a failure anywhere leaves the idempotency
//! check open for the gateway's retry.

use crate::models::{
    CartItem, NewOrder, NewPayment, Order, OrderItem, OrderStatus, Payment, PaymentStatus,
    Product, Voucher,
};
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, address_id, voucher_id, total, discount, \
     delivery_charge, final_total, status, razorpay_order_id, razorpay_payment_id, \
     razorpay_signature, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str = "id, razorpay_payment_id, razorpay_order_id, order_id, amount, \
     status, method, email, contact, created_utc";

const INSERT_PAYMENT: &str = "INSERT INTO payments \
     (id, razorpay_payment_id, razorpay_order_id, order_id, amount, status, method, email, contact) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

/// Result of appending a payment event to the ledger.
///
/// `Duplicate` is the insert-or-fail detection signal: the unique index on
/// (razorpay_payment_id, status) rejected a redelivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentInsert {
    Inserted,
    Duplicate,
}

/// Result of the transactional capture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Payment recorded, order moved to PROCESSING, stock and cart updated.
    Fulfilled,
    /// This exact capture event was already recorded (redelivery or a
    /// concurrent delivery that won the race).
    AlreadyProcessed,
    /// A different captured payment already fulfilled this order; the new
    /// ledger row is kept for audit but nothing else moves.
    AlreadyFulfilled,
    /// The order left the capturable states between lookup and commit.
    NotCapturable(OrderStatus),
    /// A line item could not be decremented without going negative.
    InsufficientStock(Uuid),
}

#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    pub async fn find_order_by_razorpay_order_id(
        &self,
        razorpay_order_id: &str,
    ) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE razorpay_order_id = $1"
        ))
        .bind(razorpay_order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    pub async fn get_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, AppError> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, quantity FROM order_items WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Create an order in PENDING state together with its line items.
    ///
    /// The gateway order id is recorded at insert time and is never updated
    /// afterwards, which keeps the set-once invariant out of application
    /// code entirely.
    #[instrument(skip(self, order), fields(user_id = %order.user_id))]
    pub async fn create_order(&self, order: &NewOrder) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;

        let order_id = Uuid::new_v4();
        let created = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders \
             (id, user_id, address_id, voucher_id, total, discount, delivery_charge, \
              final_total, status, razorpay_order_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(order.user_id)
        .bind(order.address_id)
        .bind(order.voucher_id)
        .bind(order.total)
        .bind(order.discount)
        .bind(order.delivery_charge)
        .bind(order.final_total)
        .bind(&order.razorpay_order_id)
        .fetch_one(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(order_id = %created.id, final_total = %created.final_total, "Order created");

        Ok(created)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, name, price, stock, created_utc FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    pub async fn find_voucher(&self, code: &str) -> Result<Option<Voucher>, AppError> {
        let voucher = sqlx::query_as::<_, Voucher>(
            "SELECT id, code, discount_percent, is_active, expires_at FROM vouchers \
             WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(voucher)
    }

    pub async fn get_cart(&self, user_id: Uuid) -> Result<Vec<CartItem>, AppError> {
        let items = sqlx::query_as::<_, CartItem>(
            "SELECT id, user_id, product_id, quantity FROM cart_items WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Look up a specific ledger entry, the read side of the idempotency
    /// guard.
    pub async fn find_payment(
        &self,
        razorpay_payment_id: &str,
        status: PaymentStatus,
    ) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE razorpay_payment_id = $1 AND status = $2"
        ))
        .bind(razorpay_payment_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    pub async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY created_utc"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Append a ledger row with no order mutation (authorizations and
    /// late-capture audit rows).
    #[instrument(skip(self, payment), fields(razorpay_payment_id = %payment.razorpay_payment_id, status = ?payment.status))]
    pub async fn append_payment(&self, payment: &NewPayment) -> Result<PaymentInsert, AppError> {
        let result = sqlx::query(INSERT_PAYMENT)
            .bind(Uuid::new_v4())
            .bind(&payment.razorpay_payment_id)
            .bind(&payment.razorpay_order_id)
            .bind(payment.order_id)
            .bind(payment.amount)
            .bind(payment.status)
            .bind(&payment.method)
            .bind(&payment.email)
            .bind(&payment.contact)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(PaymentInsert::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(PaymentInsert::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record a failed payment and cancel the order, as one unit.
    #[instrument(skip(self, payment), fields(razorpay_payment_id = %payment.razorpay_payment_id, order_id = %payment.order_id))]
    pub async fn record_failure(&self, payment: &NewPayment) -> Result<PaymentInsert, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(INSERT_PAYMENT)
            .bind(Uuid::new_v4())
            .bind(&payment.razorpay_payment_id)
            .bind(&payment.razorpay_order_id)
            .bind(payment.order_id)
            .bind(payment.amount)
            .bind(PaymentStatus::Failed)
            .bind(&payment.method)
            .bind(&payment.email)
            .bind(&payment.contact)
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                return Ok(PaymentInsert::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            "UPDATE orders SET status = 'CANCELLED', updated_utc = now() \
             WHERE id = $1 AND status <> 'CANCELLED'",
        )
        .bind(payment.order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PaymentInsert::Inserted)
    }

    /// The synchronous verification transition: PENDING -> PROCESSING,
    /// recording the payment id and signature. Compare-and-set on status so
    /// a concurrent webhook capture or cancellation wins cleanly.
    ///
    /// Returns the number of rows moved (0 or 1).
    #[instrument(skip(self, razorpay_signature))]
    pub async fn mark_checkout_verified(
        &self,
        razorpay_order_id: &str,
        razorpay_payment_id: &str,
        razorpay_signature: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE orders \
             SET status = 'PROCESSING', razorpay_payment_id = $2, razorpay_signature = $3, \
                 updated_utc = now() \
             WHERE razorpay_order_id = $1 AND status = 'PENDING'",
        )
        .bind(razorpay_order_id)
        .bind(razorpay_payment_id)
        .bind(razorpay_signature)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Apply a captured payment to an order: the gating mutations and the
    /// fulfillment side effects, in one transaction.
    ///
    /// Sequencing inside the transaction:
    /// 1. append the CAPTURED ledger row - a unique violation here means a
    ///    duplicate or concurrent delivery and ends the unit as
    ///    `AlreadyProcessed`;
    /// 2. check no other captured payment has fulfilled this order;
    /// 3. compare-and-set the order into PROCESSING, recording payment id
    ///    and signature;
    /// 4. decrement stock per line item and clear the user's cart.
    ///
    /// Any failure rolls the whole unit back, so stock is decremented at
    /// most once per order no matter how often the gateway redelivers.
    #[instrument(skip(self, order, payment, webhook_signature), fields(order_id = %order.id, razorpay_payment_id = %payment.razorpay_payment_id))]
    pub async fn capture_order(
        &self,
        order: &Order,
        payment: &NewPayment,
        webhook_signature: &str,
    ) -> Result<CaptureOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(INSERT_PAYMENT)
            .bind(Uuid::new_v4())
            .bind(&payment.razorpay_payment_id)
            .bind(&payment.razorpay_order_id)
            .bind(payment.order_id)
            .bind(payment.amount)
            .bind(PaymentStatus::Captured)
            .bind(&payment.method)
            .bind(&payment.email)
            .bind(&payment.contact)
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                return Ok(CaptureOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(e.into()),
        }

        let already_fulfilled: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments \
             WHERE order_id = $1 AND status = 'CAPTURED' AND razorpay_payment_id <> $2)",
        )
        .bind(order.id)
        .bind(&payment.razorpay_payment_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_fulfilled {
            // Keep the new ledger row for the audit trail; the order and the
            // inventory have already been settled by the earlier capture.
            tx.commit().await?;
            return Ok(CaptureOutcome::AlreadyFulfilled);
        }

        let updated = sqlx::query(
            "UPDATE orders \
             SET status = 'PROCESSING', razorpay_payment_id = $2, razorpay_signature = $3, \
                 updated_utc = now() \
             WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(order.id)
        .bind(&payment.razorpay_payment_id)
        .bind(webhook_signature)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(CaptureOutcome::NotCapturable(order.status));
        }

        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, quantity FROM order_items WHERE order_id = $1",
        )
        .bind(order.id)
        .fetch_all(&mut *tx)
        .await?;

        for item in &items {
            let decremented = sqlx::query(
                "UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2",
            )
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;

            if decremented.rows_affected() == 0 {
                tx.rollback().await.ok();
                return Ok(CaptureOutcome::InsufficientStock(item.product_id));
            }
        }

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(order.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            items = items.len(),
            "Order captured and fulfilled"
        );

        Ok(CaptureOutcome::Fulfilled)
    }
}
