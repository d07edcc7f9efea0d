//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::{Backends, Components, Config};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{CartLine, CartSnapshot, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::gateway::sign;
use saga::{CartKey, InMemoryCartReader};
use serde_json::{Value, json};
use tower::ServiceExt;

const INTERNAL_KEY: &str = "internal-secret";
const ADMIN_KEY: &str = "admin-secret";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: Router,
    carts: Arc<InMemoryCartReader>,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::from_lookup(|name| match name {
            "INTERNAL_SERVICE_KEY" => Some(INTERNAL_KEY.to_string()),
            "CATALOG_ADMIN_KEY" => Some(ADMIN_KEY.to_string()),
            _ => None,
        })
        .unwrap();

        let carts = Arc::new(InMemoryCartReader::new());
        let backends = Backends {
            carts: carts.clone(),
            ..Backends::in_memory()
        };
        let components = Components::build(&config, backends).unwrap();
        let router = api::create_app(components.state, get_metrics_handle());

        Self { router, carts }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    async fn seed_stock(&self, product: &str, available: i64) {
        let (status, _) = self
            .send(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v1/admin/products/{product}/stock"))
                    .header("X-ADMIN-KEY", ADMIN_KEY)
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "available": available }).to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn put_cart(&self, user: &str, lines: Vec<CartLine>) {
        self.carts
            .put(
                CartKey::User(UserId::new(user).unwrap()),
                CartSnapshot::new(lines),
            )
            .await;
    }

    async fn prepare(&self, user: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/v1/orders/prepare")
                .header("X-USER-ID", user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn initiate(&self, order_id: &str, key: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/v1/payments/initiate")
                .header("X-ORDER-ID", order_id)
                .header("Idempotency-Key", key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn webhook(&self, body: &str, signature: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/v1/payments/webhook/razorpay")
                .header("X-Razorpay-Signature", signature)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn internal_post(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("X-INTERNAL-KEY", INTERNAL_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn internal_get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("X-INTERNAL-KEY", INTERNAL_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn stock(&self, product: &str) -> Value {
        let (status, body) = self
            .send(
                Request::builder()
                    .uri(format!("/v1/admin/products/{product}/stock"))
                    .header("X-ADMIN-KEY", ADMIN_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    /// Prepares a one-unit order of P for `u1` and returns its id.
    async fn prepared_order(&self) -> String {
        self.seed_stock("P", 2).await;
        self.put_cart("u1", vec![CartLine::new("P", 1, 50_000)]).await;
        let (status, body) = self.prepare("u1").await;
        assert_eq!(status, StatusCode::CREATED);
        body["order_id"].as_str().unwrap().to_string()
    }
}

fn capture_event(gateway_order_id: &str) -> String {
    json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {"id": "pay_1", "order_id": gateway_order_id}}}
    })
    .to_string()
}

fn signature(body: &str) -> String {
    sign(INTERNAL_KEY.as_bytes(), body.as_bytes())
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn test_full_checkout_flow() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;

        let stock = app.stock("P").await;
        assert_eq!(stock["available"], 1);
        assert_eq!(stock["reserved"], 1);

        let (status, payment) = app.initiate(&order_id, "K1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payment["status"], "initiated");
        assert_eq!(payment["amount_cents"], 50_000);
        assert_eq!(payment["currency"], "INR");
        let gateway_order_id = payment["gateway_order_id"].as_str().unwrap().to_string();

        let event = capture_event(&gateway_order_id);
        let (status, outcome) = app.webhook(&event, &signature(&event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["outcome"], "captured");
        assert_eq!(outcome["order_marked_paid"], true);

        let (status, order) = app
            .send(
                Request::builder()
                    .uri(format!("/v1/orders/{order_id}"))
                    .header("X-USER-ID", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "paid");
        assert_eq!(order["total_amount_cents"], 50_000);

        let stock = app.stock("P").await;
        assert_eq!(stock["available"], 1);
        assert_eq!(stock["reserved"], 0);

        let payment_id = payment["payment_id"].as_str().unwrap();
        let (status, stored) = app.internal_get(&format!("/v1/payments/{payment_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["status"], "captured");

        let (status, redelivery) = app.webhook(&event, &signature(&event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(redelivery["outcome"], "already_captured");
    }

    #[tokio::test]
    async fn test_prepare_requires_identity() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/v1/orders/prepare")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("X-USER-ID"));
    }

    #[tokio::test]
    async fn test_prepare_empty_cart_is_bad_request() {
        let app = TestApp::new();
        let (status, _) = app.prepare("u1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_prepare_without_stock_conflicts() {
        let app = TestApp::new();
        app.seed_stock("P", 1).await;
        app.put_cart("u1", vec![CartLine::new("P", 2, 100)]).await;

        let (status, _) = app.prepare("u1").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let stock = app.stock("P").await;
        assert_eq!(stock["available"], 1);
        assert_eq!(stock["reserved"], 0);
    }

    #[tokio::test]
    async fn test_initiate_lists_missing_headers() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/v1/payments/initiate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "missing required headers: X-ORDER-ID, Idempotency-Key"
        );
    }

    #[tokio::test]
    async fn test_initiate_replay_returns_same_payment() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;

        let (_, first) = app.initiate(&order_id, "K1").await;
        let (status, second) = app.initiate(&order_id, "K1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["payment_id"], second["payment_id"]);
        assert_eq!(first["gateway_order_id"], second["gateway_order_id"]);
        assert_eq!(second["replayed"], true);
    }

    #[tokio::test]
    async fn test_initiate_unknown_order_is_not_found() {
        let app = TestApp::new();
        let (status, _) = app
            .initiate("8f14e45f-ceea-467f-a0e6-1c2b3d4e5f60", "K1")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_with_bad_signature_is_unauthorized() {
        let app = TestApp::new();
        let event = capture_event("order_x");
        let (status, _) = app.webhook(&event, "00ff").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_ignores_other_events() {
        let app = TestApp::new();
        let event = json!({"event": "order.paid", "payload": {}}).to_string();
        let (status, body) = app.webhook(&event, &signature(&event)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "ignored");
    }
}

mod orders {
    use super::*;

    #[tokio::test]
    async fn test_internal_endpoints_require_key() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;

        let (status, _) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/orders/{order_id}/release"))
                    .header("X-INTERNAL-KEY", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_release_then_release_again() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;

        let (status, body) = app.internal_post(&format!("/v1/orders/{order_id}/release")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "applied");

        let (status, body) = app.internal_post(&format!("/v1/orders/{order_id}/release")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "unchanged");

        let stock = app.stock("P").await;
        assert_eq!(stock["available"], 2);
    }

    #[tokio::test]
    async fn test_paid_then_refund() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;

        let (status, body) = app.internal_post(&format!("/v1/orders/{order_id}/paid")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "applied");

        let (_, body) = app.internal_post(&format!("/v1/orders/{order_id}/refund")).await;
        assert_eq!(body["result"], "applied");

        let (_, order) = app.internal_get(&format!("/v1/orders/{order_id}")).await;
        assert_eq!(order["status"], "refunded");
        assert_eq!(app.stock("P").await["available"], 2);
    }

    #[tokio::test]
    async fn test_paid_after_cancel_conflicts() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;
        app.internal_post(&format!("/v1/orders/{order_id}/release")).await;

        let (status, _) = app.internal_post(&format!("/v1/orders/{order_id}/paid")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_paid_on_unknown_order_is_not_found() {
        let app = TestApp::new();
        let (status, _) = app
            .internal_post("/v1/orders/8f14e45f-ceea-467f-a0e6-1c2b3d4e5f60/paid")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_order_hidden_from_other_users() {
        let app = TestApp::new();
        let order_id = app.prepared_order().await;

        let (status, _) = app
            .send(
                Request::builder()
                    .uri(format!("/v1/orders/{order_id}"))
                    .header("X-USER-ID", "someone-else")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .send(
                Request::builder()
                    .uri(format!("/v1/orders/{order_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_order_id_is_bad_request() {
        let app = TestApp::new();
        let (status, _) = app.internal_get("/v1/orders/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_my_orders() {
        let app = TestApp::new();
        app.prepared_order().await;
        app.prepare("u1").await;

        let (status, body) = app
            .send(
                Request::builder()
                    .uri("/v1/orders")
                    .header("X-USER-ID", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = app
            .send(Request::builder().uri("/v1/orders").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_listing_filters_and_paginates() {
        let app = TestApp::new();
        let first = app.prepared_order().await;
        app.prepare("u1").await;
        app.internal_post(&format!("/v1/orders/{first}/release")).await;

        let (status, page) = app.internal_get("/v1/admin/orders?status=cancelled").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert_eq!(page["orders"][0]["id"], first.as_str());

        let (_, page) = app.internal_get("/v1/admin/orders?limit=1&page=2").await;
        assert_eq!(page["total"], 2);
        assert_eq!(page["limit"], 1);
        assert_eq!(page["orders"].as_array().unwrap().len(), 1);

        let (status, _) = app.internal_get("/v1/admin/orders?status=shipped").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

mod inventory {
    use super::*;

    async fn post_op(app: &TestApp, product: &str, op: &str, quantity: i64, key: &str) -> StatusCode {
        let (status, _) = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/admin/products/{product}/{op}"))
                    .header("X-ADMIN-KEY", key)
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "quantity": quantity }).to_string()))
                    .unwrap(),
            )
            .await;
        status
    }

    #[tokio::test]
    async fn test_ledger_operations() {
        let app = TestApp::new();
        app.seed_stock("P", 5).await;

        assert_eq!(post_op(&app, "P", "reserve", 3, ADMIN_KEY).await, StatusCode::OK);
        assert_eq!(post_op(&app, "P", "deduct", 1, ADMIN_KEY).await, StatusCode::OK);
        assert_eq!(post_op(&app, "P", "release", 2, ADMIN_KEY).await, StatusCode::OK);
        assert_eq!(post_op(&app, "P", "restock", 1, ADMIN_KEY).await, StatusCode::OK);

        let stock = app.stock("P").await;
        assert_eq!(stock["available"], 5);
        assert_eq!(stock["reserved"], 0);
    }

    #[tokio::test]
    async fn test_ledger_errors_map_to_status_codes() {
        let app = TestApp::new();
        app.seed_stock("P", 1).await;

        assert_eq!(post_op(&app, "P", "reserve", 2, ADMIN_KEY).await, StatusCode::CONFLICT);
        assert_eq!(post_op(&app, "P", "release", 1, ADMIN_KEY).await, StatusCode::CONFLICT);
        assert_eq!(post_op(&app, "nope", "reserve", 1, ADMIN_KEY).await, StatusCode::NOT_FOUND);
        assert_eq!(post_op(&app, "P", "reserve", 0, ADMIN_KEY).await, StatusCode::BAD_REQUEST);
        assert_eq!(post_op(&app, "P", "teleport", 1, ADMIN_KEY).await, StatusCode::NOT_FOUND);
        assert_eq!(post_op(&app, "P", "reserve", 1, "wrong").await, StatusCode::UNAUTHORIZED);
    }
}
