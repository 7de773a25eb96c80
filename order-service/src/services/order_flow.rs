//! Order/payment state reconciliation.
//!
//! One webhook delivery (or one synchronous verification call) applies one
//! gateway event to one order. `plan_transition` is the transition table;
//! `OrderFlowService` executes the planned action against the store. Both
//! webhook and synchronous entry points go through the same table, so the
//! two paths cannot disagree on what a state allows.

use anyhow::anyhow;
use service_core::error::AppError;

use crate::models::{NewPayment, OrderStatus, PaymentStatus};
use crate::services::razorpay::{from_paise, PaymentVerification, WebhookEvent};
use crate::services::repository::{CaptureOutcome, OrderRepository, PaymentInsert};

/// Gateway events this service consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    Authorized,
    Captured,
    Failed,
}

impl PaymentEvent {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "payment.authorized" => Some(Self::Authorized),
            "payment.captured" => Some(Self::Captured),
            "payment.failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn ledger_status(self) -> PaymentStatus {
        match self {
            Self::Authorized => PaymentStatus::Authorized,
            Self::Captured => PaymentStatus::Captured,
            Self::Failed => PaymentStatus::Failed,
        }
    }
}

/// What a gateway event may do to an order in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Append an AUTHORIZED ledger row; the order does not move. Funds are
    /// only reserved at this point, so no fulfillment.
    RecordAuthorization,
    /// Run the transactional capture unit: ledger row, PROCESSING,
    /// stock decrement, cart clear.
    Fulfill,
    /// Append a CAPTURED ledger row for the audit trail only; the order is
    /// past the capturable states and does not move.
    RecordCaptureOnly,
    /// Append a FAILED ledger row and cancel the order.
    Cancel,
}

/// The transition table. Pure, so it is testable without a store.
///
/// Transitions are forward-only: a capture arriving for an order that is
/// already CANCELLED (or shipped out) never reopens it, it is recorded as
/// an anomaly instead.
pub fn plan_transition(status: OrderStatus, event: PaymentEvent) -> Action {
    match event {
        PaymentEvent::Authorized => Action::RecordAuthorization,
        PaymentEvent::Failed => Action::Cancel,
        PaymentEvent::Captured => match status {
            OrderStatus::Pending | OrderStatus::Processing => Action::Fulfill,
            OrderStatus::Paid
            | OrderStatus::Shipped
            | OrderStatus::Delivered
            | OrderStatus::Cancelled => Action::RecordCaptureOnly,
        },
    }
}

/// How a webhook delivery was disposed of. Everything here acknowledges
/// with 2xx; the gateway only retries on non-2xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    AlreadyProcessed,
    UnknownOrder,
    Ignored,
}

impl WebhookOutcome {
    pub fn acknowledgment(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "ok",
            WebhookOutcome::AlreadyProcessed => "already processed",
            WebhookOutcome::UnknownOrder | WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Result of the synchronous checkout verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyProcessed,
    Cancelled,
    UnknownOrder,
}

#[derive(Clone)]
pub struct OrderFlowService {
    repository: OrderRepository,
}

impl OrderFlowService {
    pub fn new(repository: OrderRepository) -> Self {
        Self { repository }
    }

    /// Apply one signature-verified webhook event.
    ///
    /// The caller has already verified `raw_signature` against the raw
    /// request body; it is passed through so a capture can record it on the
    /// order for audit.
    pub async fn handle_gateway_event(
        &self,
        event: &WebhookEvent,
        raw_signature: &str,
    ) -> Result<WebhookOutcome, AppError> {
        let Some(kind) = PaymentEvent::from_event_name(&event.event) else {
            tracing::debug!(event = %event.event, "Unhandled webhook event type");
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(entity) = event.payload.payment.as_ref().map(|p| &p.entity) else {
            tracing::warn!(event = %event.event, "Webhook event without a payment entity");
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(razorpay_order_id) = entity.order_id.as_deref() else {
            tracing::debug!(
                razorpay_payment_id = %entity.id,
                "Payment event without an order reference"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        // Unknown gateway order ids are acknowledged without effect: the
        // order may belong to an unrelated integration on the same account.
        let Some(order) = self
            .repository
            .find_order_by_razorpay_order_id(razorpay_order_id)
            .await?
        else {
            tracing::info!(
                razorpay_order_id = %razorpay_order_id,
                "Webhook for unknown order acknowledged as no-op"
            );
            return Ok(WebhookOutcome::UnknownOrder);
        };

        let payment = NewPayment {
            razorpay_payment_id: entity.id.clone(),
            razorpay_order_id: razorpay_order_id.to_string(),
            order_id: order.id,
            amount: from_paise(entity.amount),
            status: kind.ledger_status(),
            method: entity.method.clone(),
            email: entity.email.clone(),
            contact: entity.contact.clone(),
        };

        match plan_transition(order.status, kind) {
            Action::RecordAuthorization => {
                match self.repository.append_payment(&payment).await? {
                    PaymentInsert::Inserted => {
                        tracing::info!(
                            order_id = %order.id,
                            razorpay_payment_id = %payment.razorpay_payment_id,
                            "Authorization recorded"
                        );
                        Ok(WebhookOutcome::Processed)
                    }
                    PaymentInsert::Duplicate => Ok(WebhookOutcome::AlreadyProcessed),
                }
            }
            Action::Fulfill => {
                // Read-side idempotency guard. The unique index on the
                // ledger backstops the race where two deliveries both pass
                // this check.
                if self
                    .repository
                    .find_payment(&payment.razorpay_payment_id, PaymentStatus::Captured)
                    .await?
                    .is_some()
                {
                    tracing::info!(
                        razorpay_payment_id = %payment.razorpay_payment_id,
                        "Duplicate capture delivery acknowledged"
                    );
                    return Ok(WebhookOutcome::AlreadyProcessed);
                }

                match self
                    .repository
                    .capture_order(&order, &payment, raw_signature)
                    .await?
                {
                    CaptureOutcome::Fulfilled => {
                        tracing::info!(
                            order_id = %order.id,
                            razorpay_payment_id = %payment.razorpay_payment_id,
                            "Payment captured, order fulfilled"
                        );
                        Ok(WebhookOutcome::Processed)
                    }
                    CaptureOutcome::AlreadyProcessed => Ok(WebhookOutcome::AlreadyProcessed),
                    CaptureOutcome::AlreadyFulfilled => {
                        tracing::warn!(
                            order_id = %order.id,
                            razorpay_payment_id = %payment.razorpay_payment_id,
                            "Second captured payment for an already fulfilled order"
                        );
                        Ok(WebhookOutcome::AlreadyProcessed)
                    }
                    CaptureOutcome::NotCapturable(_) => {
                        // The order left the capturable states between our
                        // lookup and the update. Keep the event in the
                        // ledger and acknowledge.
                        tracing::warn!(
                            order_id = %order.id,
                            razorpay_payment_id = %payment.razorpay_payment_id,
                            "Capture raced with a concurrent transition; recorded for audit"
                        );
                        self.repository.append_payment(&payment).await?;
                        Ok(WebhookOutcome::Processed)
                    }
                    CaptureOutcome::InsufficientStock(product_id) => {
                        Err(AppError::Conflict(anyhow!(
                            "Insufficient stock for product {} while fulfilling order {}",
                            product_id,
                            order.id
                        )))
                    }
                }
            }
            Action::RecordCaptureOnly => {
                tracing::warn!(
                    order_id = %order.id,
                    status = ?order.status,
                    razorpay_payment_id = %payment.razorpay_payment_id,
                    "Capture for an order that is no longer capturable; ledger row appended, status unchanged"
                );
                match self.repository.append_payment(&payment).await? {
                    PaymentInsert::Inserted => Ok(WebhookOutcome::Processed),
                    PaymentInsert::Duplicate => Ok(WebhookOutcome::AlreadyProcessed),
                }
            }
            Action::Cancel => match self.repository.record_failure(&payment).await? {
                PaymentInsert::Inserted => {
                    tracing::info!(
                        order_id = %order.id,
                        razorpay_payment_id = %payment.razorpay_payment_id,
                        "Payment failed, order cancelled"
                    );
                    Ok(WebhookOutcome::Processed)
                }
                PaymentInsert::Duplicate => Ok(WebhookOutcome::AlreadyProcessed),
            },
        }
    }

    /// Apply the synchronous client-redirect confirmation.
    ///
    /// The caller has already verified the checkout signature over
    /// `order_id|payment_id`. This is the lighter transition: it records
    /// the payment id and moves PENDING to PROCESSING, but fulfillment
    /// waits for the gateway's capture webhook.
    pub async fn apply_checkout_verification(
        &self,
        verification: &PaymentVerification,
    ) -> Result<VerifyOutcome, AppError> {
        let Some(order) = self
            .repository
            .find_order_by_razorpay_order_id(&verification.razorpay_order_id)
            .await?
        else {
            return Ok(VerifyOutcome::UnknownOrder);
        };

        match order.status {
            OrderStatus::Pending => {
                let moved = self
                    .repository
                    .mark_checkout_verified(
                        &verification.razorpay_order_id,
                        &verification.razorpay_payment_id,
                        &verification.razorpay_signature,
                    )
                    .await?;

                if moved == 0 {
                    // Lost a race with a webhook capture or a cancellation.
                    Ok(VerifyOutcome::AlreadyProcessed)
                } else {
                    tracing::info!(
                        order_id = %order.id,
                        razorpay_payment_id = %verification.razorpay_payment_id,
                        "Checkout verified"
                    );
                    Ok(VerifyOutcome::Verified)
                }
            }
            OrderStatus::Processing
            | OrderStatus::Paid
            | OrderStatus::Shipped
            | OrderStatus::Delivered => Ok(VerifyOutcome::AlreadyProcessed),
            OrderStatus::Cancelled => Ok(VerifyOutcome::Cancelled),
        }
    }
}
