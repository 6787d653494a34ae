use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};
use stockwise_auth::{JwtClaims, Role};
use stockwise_core::{TenantId, UserId};
use stockwise_infra::AppConfig;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Same router as prod, in-memory ledger, ephemeral port.
        let config = AppConfig {
            jwt_secret: Some(jwt_secret.to_string()),
            ..AppConfig::default()
        };
        let app = stockwise_api::app::build_app(config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        tenant_id,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn widget(sku: &str, stock: i64, reorder_level: i64) -> Value {
    json!({
        "name": "Widget",
        "category": "Hardware",
        "brand": "Acme",
        "variants": [{
            "sku": sku,
            "name": "Blue",
            "buying_price": "4.00",
            "selling_price": "10.00",
            "stock": stock,
            "reorder_level": reorder_level,
        }]
    })
}

fn order(sku: &str, quantity: i64) -> Value {
    json!({
        "customer_name": "Ada",
        "shipping_address": "1 Main St",
        "items": [{ "sku": sku, "quantity": quantity, "unit_price": "10.00" }]
    })
}

async fn create_product(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    body: Value,
) -> Value {
    let res = client
        .post(server.url("/products"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn variant_stock(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    product_id: &str,
) -> i64 {
    let product: Value = client
        .get(server.url(&format!("/products/{product_id}")))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    product["variants"][0]["stock"].as_i64().unwrap()
}

#[tokio::test]
async fn health_is_public_and_everything_else_requires_a_token() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(server.url("/products")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let foreign = mint_jwt("other-secret", TenantId::new(), vec![]);
    let res = client
        .get(server.url("/products"))
        .bearer_auth(&foreign)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_echoes_the_token_context() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let tenant_id = TenantId::new();
    let token = mint_jwt(secret, tenant_id, vec![Role::new("clerk")]);

    let body: Value = client
        .get(server.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["tenant_id"], tenant_id.to_string());
    assert_eq!(body["roles"], json!(["clerk"]));
}

#[tokio::test]
async fn order_deducts_stock_and_oversell_is_rejected_with_details() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(secret, TenantId::new(), vec![]);

    let product = create_product(&client, &server, &token, widget("W-1", 5, 1)).await;
    let product_id = product["id"].as_str().unwrap().to_string();

    let res = client
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&order("W-1", 3))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let placed: Value = res.json().await.unwrap();
    assert_eq!(placed["status"], "PENDING");
    assert_eq!(variant_stock(&client, &server, &token, &product_id).await, 2);

    let res = client
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&order("W-1", 3))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["sku"], "W-1");
    assert_eq!(body["available"], 2);
    assert_eq!(body["requested"], 3);
    assert_eq!(variant_stock(&client, &server, &token, &product_id).await, 2);

    let order_id = placed["id"].as_str().unwrap();
    let res = client
        .post(server.url(&format!("/orders/{order_id}/cancel")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: Value = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "CANCELLED");
    assert_eq!(variant_stock(&client, &server, &token, &product_id).await, 5);

    // Second cancel is a state error and restores nothing.
    let res = client
        .post(server.url(&format!("/orders/{order_id}/cancel")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(variant_stock(&client, &server, &token, &product_id).await, 5);

    let reconcile: Value = client
        .get(server.url("/products/reconcile/W-1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reconcile["consistent"], true);
}

#[tokio::test]
async fn off_table_status_change_is_flagged() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(secret, TenantId::new(), vec![]);

    create_product(&client, &server, &token, widget("W-1", 5, 1)).await;
    let placed: Value = client
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&order("W-1", 1))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_id = placed["id"].as_str().unwrap();

    let res = client
        .patch(server.url(&format!("/orders/{order_id}/status")))
        .bearer_auth(&token)
        .json(&json!({ "status": "DELIVERED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "DELIVERED");
    assert_eq!(body["transition_flagged"], true);

    let res = client
        .patch(server.url(&format!("/orders/{order_id}/status")))
        .bearer_auth(&token)
        .json(&json!({ "status": "LOST" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn open_purchase_order_covers_low_stock_and_receipt_is_capped() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(secret, TenantId::new(), vec![]);

    let product = create_product(&client, &server, &token, widget("W-1", 2, 5)).await;
    let product_id = product["id"].as_str().unwrap().to_string();

    let alerts: Value = client
        .get(server.url("/products/low-stock"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts.as_array().unwrap().len(), 1);
    assert_eq!(alerts[0]["sku"], "W-1");
    assert_eq!(alerts[0]["pending_stock"], 0);

    let res = client
        .post(server.url("/purchase-orders"))
        .bearer_auth(&token)
        .json(&json!({
            "vendor_id": stockwise_core::AggregateId::new().to_string(),
            "items": [{ "sku": "W-1", "quantity": 10, "unit_cost": "4.00" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let po: Value = res.json().await.unwrap();
    assert_eq!(po["status"], "DRAFT");
    let po_id = po["id"].as_str().unwrap();

    let res = client
        .put(server.url(&format!("/purchase-orders/{po_id}/status")))
        .bearer_auth(&token)
        .json(&json!({ "status": "SENT" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // 2 on hand plus 10 incoming covers the reorder level of 5.
    let alerts: Value = client
        .get(server.url("/products/low-stock"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(alerts.as_array().unwrap().is_empty());

    let res = client
        .post(server.url(&format!("/purchase-orders/{po_id}/receive")))
        .bearer_auth(&token)
        .json(&json!({ "items": [{ "sku": "W-1", "quantity": 15 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let received: Value = res.json().await.unwrap();
    assert_eq!(received["status"], "RECEIVED");
    assert_eq!(received["items"][0]["received_quantity"], 10);
    assert_eq!(variant_stock(&client, &server, &token, &product_id).await, 12);

    let alerts: Value = client
        .get(server.url("/products/low-stock"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(alerts.as_array().unwrap().is_empty());

    let movements: Value = client
        .get(server.url("/products/movements?sku=W-1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // Opening balance plus the receipt.
    assert_eq!(movements.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn tenants_cannot_see_each_others_records() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token_a = mint_jwt(secret, TenantId::new(), vec![]);
    let token_b = mint_jwt(secret, TenantId::new(), vec![]);

    let product = create_product(&client, &server, &token_a, widget("W-1", 5, 1)).await;
    let product_id = product["id"].as_str().unwrap();

    let res = client
        .get(server.url(&format!("/products/{product_id}")))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let listed: Value = client
        .get(server.url("/products"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.as_array().unwrap().is_empty());

    // Same SKU is free in another tenant; B cannot sell A's stock.
    let res = client
        .post(server.url("/orders"))
        .bearer_auth(&token_b)
        .json(&order("W-1", 1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    create_product(&client, &server, &token_b, widget("W-1", 1, 1)).await;
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(secret, TenantId::new(), vec![]);

    let res = client
        .post(server.url("/products"))
        .bearer_auth(&token)
        .json(&widget("W-1", -1, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .get(server.url("/products/not-an-id"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    create_product(&client, &server, &token, widget("W-1", 1, 1)).await;
    let res = client
        .post(server.url("/products"))
        .bearer_auth(&token)
        .json(&widget("W-1", 1, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn out_of_range_amounts_are_a_bad_request() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(secret, TenantId::new(), vec![]);

    let product = create_product(&client, &server, &token, widget("W-1", 5, 1)).await;
    let product_id = product["id"].as_str().unwrap();

    let res = client
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({
            "customer_name": "Ada",
            "shipping_address": "1 Main St",
            "items": [{
                "sku": "W-1",
                "quantity": 2,
                "unit_price": "79228162514264337593543950335",
            }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(variant_stock(&client, &server, &token, product_id).await, 5);

    let full = create_product(&client, &server, &token, widget("W-2", i64::MAX, 1)).await;
    let res = client
        .post(server.url("/products/stock-adjustment"))
        .bearer_auth(&token)
        .json(&json!({ "sku": "W-2", "quantity": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(
        variant_stock(&client, &server, &token, full["id"].as_str().unwrap()).await,
        i64::MAX
    );
}

#[tokio::test]
async fn stream_delivers_order_created_to_the_tenant() {
    let secret = "test-secret";
    let server = TestServer::spawn(secret).await;
    let client = reqwest::Client::new();
    let token = mint_jwt(secret, TenantId::new(), vec![]);

    create_product(&client, &server, &token, widget("W-1", 5, 1)).await;

    let mut stream = client
        .get(server.url("/stream"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let res = client
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&order("W-1", 1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let mut seen = String::new();
    let read = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while let Some(chunk) = stream.chunk().await.unwrap() {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains("order-created") {
                return;
            }
        }
    })
    .await;

    assert!(read.is_ok(), "no order-created event within timeout: {seen}");
    assert!(seen.contains("W-1"));
}
