//! Integration tests for order placement, coupons, and points.
//!
//! The full router runs in-process over the in-memory store.

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use mercato_api::ledger::Discount;
use mercato_core::{Money, ProductId, UserId};
use mercato_integration_tests::TestApp;
use serde_json::json;

fn money(amount: i64) -> Money {
    Money::new(amount).expect("Non-negative amount")
}

/// A user holding `points`. Zero leaves the account untouched.
async fn funded_user(app: &TestApp, login: &str, points: i64) -> UserId {
    let user_id = app.store.insert_user(login).expect("Valid login id");
    if points == 0 {
        return user_id;
    }
    let (status, _) = app
        .post(
            "/api/v1/points/charge",
            json!({"userId": user_id, "amount": points}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    user_id
}

async fn balance(app: &TestApp, user_id: UserId) -> i64 {
    let (status, body) = app.get(&format!("/api/v1/points/{user_id}")).await;
    assert_eq!(status, StatusCode::OK);
    body["balance"].as_i64().expect("Balance is a number")
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));

    let (status, _) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Placement
// ============================================================================

#[tokio::test]
async fn test_place_order_debits_stock_and_points() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 5000).await;
    let product = app.store.insert_product("teapot", money(1000), 5);

    let (status, order) = app
        .post(
            "/api/v1/orders",
            json!({"userId": user_id, "items": [{"productId": product, "quantity": 2}]}),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["totalAmount"], 2000);
    assert_eq!(order["discountAmount"], 0);
    assert_eq!(order["chargedAmount"], 2000);
    assert_eq!(order["lines"][0]["unitPrice"], 1000);
    assert_eq!(app.store.stock_level(product), Some(3));
    assert_eq!(balance(&app, user_id).await, 3000);

    let order_id = order["id"].as_i64().expect("Order id");
    let (status, fetched) = app.get(&format!("/api/v1/orders/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, order);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_nothing_applied() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 50_000).await;
    let plenty = app.store.insert_product("cup", money(100), 10);
    let scarce = app.store.insert_product("kettle", money(3000), 1);

    let (status, body) = app
        .post(
            "/api/v1/orders",
            json!({
                "userId": user_id,
                "items": [
                    {"productId": plenty, "quantity": 3},
                    {"productId": scarce, "quantity": 2}
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(app.store.stock_level(plenty), Some(10));
    assert_eq!(app.store.stock_level(scarce), Some(1));
    assert_eq!(balance(&app, user_id).await, 50_000);
}

#[tokio::test]
async fn test_insufficient_points_restores_stock() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 500).await;
    let product = app.store.insert_product("teapot", money(1000), 5);

    let (status, _) = app
        .post(
            "/api/v1/orders",
            json!({"userId": user_id, "items": [{"productId": product, "quantity": 1}]}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.stock_level(product), Some(5));
    assert_eq!(balance(&app, user_id).await, 500);
}

#[tokio::test]
async fn test_unknown_references_are_not_found() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 500).await;

    let (status, body) = app
        .post(
            "/api/v1/orders",
            json!({"userId": user_id, "items": [{"productId": ProductId::new(404), "quantity": 1}]}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = app.get("/api/v1/orders/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get("/api/v1/points/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_order_rejected() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 500).await;

    let (status, _) = app
        .post("/api/v1/orders", json!({"userId": user_id, "items": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Coupons
// ============================================================================

#[tokio::test]
async fn test_coupon_discounts_once() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 10_000).await;
    let product = app.store.insert_product("teapot", money(1000), 10);
    let coupon = app.store.insert_coupon(
        user_id,
        Discount::FixedAmount {
            amount: money(500),
        },
        None,
        Utc::now() + Duration::days(1),
    );
    let order = json!({
        "userId": user_id,
        "items": [{"productId": product, "quantity": 2}],
        "couponId": coupon
    });

    let (status, placed) = app.post("/api/v1/orders", order.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(placed["discountAmount"], 500);
    assert_eq!(placed["chargedAmount"], 1500);
    assert_eq!(placed["couponId"], json!(coupon));

    let (status, body) = app.post("/api/v1/orders", order).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some_and(|m| m.contains("coupon")));
    assert_eq!(app.store.stock_level(product), Some(8));
    assert_eq!(balance(&app, user_id).await, 8500);
}

#[tokio::test]
async fn test_discount_preview_does_not_redeem() {
    let app = TestApp::new();
    let user_id = funded_user(&app, "buyer01", 0).await;
    let coupon = app.store.insert_coupon(
        user_id,
        Discount::Percentage {
            percent: 10,
            max_amount: Some(money(500)),
        },
        Some(money(1000)),
        Utc::now() + Duration::days(1),
    );

    for _ in 0..2 {
        let (status, body) = app
            .get(&format!(
                "/api/v1/coupons/{coupon}/discount?userId={user_id}&orderAmount=10000"
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["discountAmount"], 500);
    }

    let (status, _) = app
        .get(&format!(
            "/api/v1/coupons/{coupon}/discount?userId={user_id}&orderAmount=999"
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_coupon_rejected() {
    let app = TestApp::new();
    let owner = funded_user(&app, "owner01", 0).await;
    let other = funded_user(&app, "other01", 10_000).await;
    let product = app.store.insert_product("teapot", money(1000), 10);
    let coupon = app.store.insert_coupon(
        owner,
        Discount::FixedAmount {
            amount: money(100),
        },
        None,
        Utc::now() + Duration::days(1),
    );

    let (status, _) = app
        .post(
            "/api/v1/orders",
            json!({"userId": other, "items": [{"productId": product, "quantity": 1}], "couponId": coupon}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.stock_level(product), Some(10));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_oversell() {
    let app = std::sync::Arc::new(TestApp::new());
    let product = app.store.insert_product("limited", money(100), 5);

    let mut users = Vec::new();
    for i in 0..12 {
        users.push(funded_user(&app, &format!("buyer{i:02}"), 1000).await);
    }

    let handles: Vec<_> = users
        .into_iter()
        .map(|user_id| {
            let app = std::sync::Arc::clone(&app);
            tokio::spawn(async move {
                app.post(
                    "/api/v1/orders",
                    json!({"userId": user_id, "items": [{"productId": product, "quantity": 1}]}),
                )
                .await
                .0
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("Order task panicked") {
            StatusCode::CREATED => created += 1,
            StatusCode::BAD_REQUEST => {}
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(created, 5);
    assert_eq!(app.store.stock_level(product), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_charges_are_all_applied() {
    let app = std::sync::Arc::new(TestApp::new());
    let user_id = funded_user(&app, "buyer01", 0).await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let app = std::sync::Arc::clone(&app);
            tokio::spawn(async move {
                app.post(
                    "/api/v1/points/charge",
                    json!({"userId": user_id, "amount": 10}),
                )
                .await
                .0
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.expect("Charge task panicked"), StatusCode::OK);
    }

    let (_, body) = app.get(&format!("/api/v1/points/{user_id}")).await;
    assert_eq!(body["balance"], 200);
    assert_eq!(body["version"], 20);
}
