//! Common test utilities for order-service integration tests.

use chrono::{Duration as ChronoDuration, Utc};
use order_service::config::{CheckoutConfig, Config, DatabaseConfig, RazorpayConfig, ServerConfig};
use order_service::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::utils::signature::hmac_sha256_hex;
use sqlx::postgres::PgPool;
use std::str::FromStr;
use std::sync::Once;
use uuid::Uuid;

pub const TEST_KEY_SECRET: &str = "test_key_secret";
pub const TEST_WEBHOOK_SECRET: &str = "test_webhook_secret";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,order_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub pool: PgPool,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_gateway("https://api.razorpay.com/v1").await
    }

    /// Spawn with the gateway API pointed at a mock server.
    pub async fn spawn_with_gateway(api_base_url: &str) -> Self {
        init_tracing();

        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must be set to run integration tests");

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: 4,
                min_connections: 1,
            },
            razorpay: RazorpayConfig {
                key_id: "rzp_test_key".to_string(),
                key_secret: Secret::new(TEST_KEY_SECRET.to_string()),
                webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
                api_base_url: api_base_url.to_string(),
            },
            checkout: CheckoutConfig {
                delivery_charge: Decimal::from_str("50.00").unwrap(),
                currency: "INR".to_string(),
            },
            service_name: "order-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let pool = app.db().pool().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint.
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            port,
            pool,
            client,
        }
    }

    // -------------------------------------------------------------------
    // Seeding helpers
    // -------------------------------------------------------------------

    pub async fn seed_product(&self, price: &str, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO products (id, name, price, stock) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(format!("product-{id}"))
            .bind(Decimal::from_str(price).unwrap())
            .bind(stock)
            .execute(&self.pool)
            .await
            .expect("Failed to seed product");
        id
    }

    pub async fn seed_voucher(&self, code: &str, discount_percent: &str, is_active: bool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO vouchers (id, code, discount_percent, is_active, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(code)
        .bind(Decimal::from_str(discount_percent).unwrap())
        .bind(is_active)
        .bind(Utc::now() + ChronoDuration::days(30))
        .execute(&self.pool)
        .await
        .expect("Failed to seed voucher");
        id
    }

    /// Seed an order in the given status with line items, as checkout would
    /// have left it.
    pub async fn seed_order(
        &self,
        user_id: Uuid,
        razorpay_order_id: &str,
        status: &str,
        final_total: &str,
        items: &[(Uuid, i32)],
    ) -> Uuid {
        let id = Uuid::new_v4();
        let total = Decimal::from_str(final_total).unwrap();
        sqlx::query(
            "INSERT INTO orders \
             (id, user_id, address_id, total, discount, delivery_charge, final_total, status, \
              razorpay_order_id) \
             VALUES ($1, $2, $3, $4, 0, 0, $4, $5, $6)",
        )
        .bind(id)
        .bind(user_id)
        .bind(Uuid::new_v4())
        .bind(total)
        .bind(status)
        .bind(razorpay_order_id)
        .execute(&self.pool)
        .await
        .expect("Failed to seed order");

        for (product_id, quantity) in items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(product_id)
            .bind(quantity)
            .execute(&self.pool)
            .await
            .expect("Failed to seed order item");
        }

        id
    }

    pub async fn seed_cart_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        sqlx::query(
            "INSERT INTO cart_items (id, user_id, product_id, quantity) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .expect("Failed to seed cart item");
    }

    // -------------------------------------------------------------------
    // Assertion helpers
    // -------------------------------------------------------------------

    pub async fn order_status(&self, order_id: Uuid) -> String {
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to fetch order status")
    }

    pub async fn order_payment_id(&self, order_id: Uuid) -> Option<String> {
        sqlx::query_scalar("SELECT razorpay_payment_id FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to fetch order payment id")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to fetch product stock")
    }

    pub async fn payment_count(&self, razorpay_payment_id: &str, status: &str) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE razorpay_payment_id = $1 AND status = $2",
        )
        .bind(razorpay_payment_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to count payments")
    }

    pub async fn cart_count(&self, user_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count cart items")
    }

    pub async fn order_count_for_user(&self, user_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count orders")
    }

    // -------------------------------------------------------------------
    // Request helpers
    // -------------------------------------------------------------------

    pub fn webhook_signature(&self, body: &str) -> String {
        hmac_sha256_hex(TEST_WEBHOOK_SECRET, body.as_bytes()).unwrap()
    }

    pub fn checkout_signature(&self, razorpay_order_id: &str, razorpay_payment_id: &str) -> String {
        let payload = format!("{razorpay_order_id}|{razorpay_payment_id}");
        hmac_sha256_hex(TEST_KEY_SECRET, payload.as_bytes()).unwrap()
    }

    pub async fn post_webhook(&self, body: &str, signature: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/razorpay", self.address))
            .header("X-Razorpay-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to send webhook")
    }

    pub async fn post_verify(
        &self,
        razorpay_order_id: &str,
        razorpay_payment_id: &str,
        razorpay_signature: &str,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/payments/verify", self.address))
            .json(&serde_json::json!({
                "razorpay_order_id": razorpay_order_id,
                "razorpay_payment_id": razorpay_payment_id,
                "razorpay_signature": razorpay_signature,
            }))
            .send()
            .await
            .expect("Failed to send verify request")
    }
}

/// Build a Razorpay-shaped webhook body for a payment event.
pub fn payment_event_body(
    event: &str,
    razorpay_payment_id: &str,
    razorpay_order_id: &str,
    amount_paise: u64,
) -> String {
    let status = match event {
        "payment.failed" => "failed",
        "payment.authorized" => "authorized",
        _ => "captured",
    };
    serde_json::json!({
        "entity": "event",
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": razorpay_payment_id,
                    "entity": "payment",
                    "amount": amount_paise,
                    "currency": "INR",
                    "status": status,
                    "order_id": razorpay_order_id,
                    "method": "card",
                    "email": "shopper@example.com",
                    "contact": "+919900112233"
                }
            }
        }
    })
    .to_string()
}

/// A unique razorpay-style id, so tests never collide on the ledger's
/// unique index.
pub fn unique_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
