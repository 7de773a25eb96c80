use anyhow::Result;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub razorpay: RazorpayConfig,
    pub checkout: CheckoutConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CheckoutConfig {
    /// Flat delivery charge added to every order. Included in the amount
    /// sent to the payment gateway.
    pub delivery_charge: Decimal,
    pub currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("ORDER_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("ORDER_SERVICE_PORT")
            .unwrap_or_else(|_| "3004".to_string())
            .parse()?;

        let db_url = env::var("ORDER_DATABASE_URL").expect("ORDER_DATABASE_URL must be set");
        let max_connections = env::var("ORDER_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("ORDER_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let key_id = env::var("RAZORPAY_KEY_ID").unwrap_or_default();
        let key_secret = env::var("RAZORPAY_KEY_SECRET").unwrap_or_default();
        let webhook_secret = env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default();
        let api_base_url = env::var("RAZORPAY_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string());

        let delivery_charge = Decimal::from_str(
            &env::var("CHECKOUT_DELIVERY_CHARGE").unwrap_or_else(|_| "50.00".to_string()),
        )?;
        let currency = env::var("CHECKOUT_CURRENCY").unwrap_or_else(|_| "INR".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            razorpay: RazorpayConfig {
                key_id,
                key_secret: Secret::new(key_secret),
                webhook_secret: Secret::new(webhook_secret),
                api_base_url,
            },
            checkout: CheckoutConfig {
                delivery_charge,
                currency,
            },
            service_name: "order-service".to_string(),
        })
    }
}
