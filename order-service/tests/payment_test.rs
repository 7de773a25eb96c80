mod common;

use common::{payment_event_body, unique_id, TestApp};
use uuid::Uuid;

#[tokio::test]
async fn verify_moves_pending_order_to_processing() {
    let app = TestApp::spawn().await;

    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("100.00", 10).await;
    let rzp_order_id = unique_id("order");
    let rzp_payment_id = unique_id("pay");
    let order_id = app
        .seed_order(user_id, &rzp_order_id, "PENDING", "100.00", &[(product_id, 1)])
        .await;

    let signature = app.checkout_signature(&rzp_order_id, &rzp_payment_id);
    let response = app
        .post_verify(&rzp_order_id, &rzp_payment_id, &signature)
        .await;

    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Payment verified");

    assert_eq!(app.order_status(order_id).await, "PROCESSING");
    assert_eq!(
        app.order_payment_id(order_id).await.as_deref(),
        Some(rzp_payment_id.as_str())
    );

    // Verification is the lighter transition: no fulfillment yet.
    assert_eq!(app.product_stock(product_id).await, 10);
}

#[tokio::test]
async fn verify_rejects_invalid_signature() {
    let app = TestApp::spawn().await;

    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("100.00", 10).await;
    let rzp_order_id = unique_id("order");
    let order_id = app
        .seed_order(user_id, &rzp_order_id, "PENDING", "100.00", &[(product_id, 1)])
        .await;

    let response = app
        .post_verify(&rzp_order_id, &unique_id("pay"), "forged_signature")
        .await;

    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Invalid signature");

    assert_eq!(app.order_status(order_id).await, "PENDING");
}

#[tokio::test]
async fn verify_is_idempotent() {
    let app = TestApp::spawn().await;

    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("100.00", 10).await;
    let rzp_order_id = unique_id("order");
    let rzp_payment_id = unique_id("pay");
    let order_id = app
        .seed_order(user_id, &rzp_order_id, "PENDING", "100.00", &[(product_id, 1)])
        .await;

    let signature = app.checkout_signature(&rzp_order_id, &rzp_payment_id);

    let first = app
        .post_verify(&rzp_order_id, &rzp_payment_id, &signature)
        .await;
    assert_eq!(first.status(), 200);

    let second = app
        .post_verify(&rzp_order_id, &rzp_payment_id, &signature)
        .await;
    assert_eq!(second.status(), 200);
    let json: serde_json::Value = second.json().await.unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Already processed");

    assert_eq!(app.order_status(order_id).await, "PROCESSING");
}

#[tokio::test]
async fn verify_unknown_order_returns_not_found() {
    let app = TestApp::spawn().await;

    let rzp_order_id = unique_id("order_foreign");
    let rzp_payment_id = unique_id("pay");
    let signature = app.checkout_signature(&rzp_order_id, &rzp_payment_id);

    let response = app
        .post_verify(&rzp_order_id, &rzp_payment_id, &signature)
        .await;

    assert_eq!(response.status(), 404);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn verify_cancelled_order_is_rejected() {
    let app = TestApp::spawn().await;

    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("100.00", 10).await;
    let rzp_order_id = unique_id("order");
    let rzp_payment_id = unique_id("pay");
    let order_id = app
        .seed_order(user_id, &rzp_order_id, "CANCELLED", "100.00", &[(product_id, 1)])
        .await;

    let signature = app.checkout_signature(&rzp_order_id, &rzp_payment_id);
    let response = app
        .post_verify(&rzp_order_id, &rzp_payment_id, &signature)
        .await;

    assert_eq!(response.status(), 409);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["success"], false);

    assert_eq!(app.order_status(order_id).await, "CANCELLED");
}

#[tokio::test]
async fn capture_webhook_after_verify_still_fulfills() {
    let app = TestApp::spawn().await;

    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("100.00", 10).await;
    let rzp_order_id = unique_id("order");
    let rzp_payment_id = unique_id("pay");
    let order_id = app
        .seed_order(user_id, &rzp_order_id, "PENDING", "200.00", &[(product_id, 2)])
        .await;
    app.seed_cart_item(user_id, product_id, 2).await;

    // Client-side confirmation first: PENDING -> PROCESSING, no effects.
    let signature = app.checkout_signature(&rzp_order_id, &rzp_payment_id);
    let response = app
        .post_verify(&rzp_order_id, &rzp_payment_id, &signature)
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(app.product_stock(product_id).await, 10);

    // Then the async capture arrives and must run fulfillment exactly once.
    let body = payment_event_body("payment.captured", &rzp_payment_id, &rzp_order_id, 20000);
    let response = app.post_webhook(&body, &app.webhook_signature(&body)).await;
    assert_eq!(response.status(), 200);

    assert_eq!(app.order_status(order_id).await, "PROCESSING");
    assert_eq!(app.product_stock(product_id).await, 8);
    assert_eq!(app.cart_count(user_id).await, 0);
    assert_eq!(app.payment_count(&rzp_payment_id, "CAPTURED").await, 1);
}
