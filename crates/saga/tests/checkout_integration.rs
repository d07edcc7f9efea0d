//! End-to-end checkout scenarios over the in-memory stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{
    CartLine, CartSnapshot, HoldState, Order, OrderError, OrderStatus, PaymentStatus, ProductId,
    SessionId, UserId,
};
use saga::{
    CartKey, CheckoutError, DrainerConfig, InMemoryCartReader, InMemoryGateway, OrderService,
    OrdersApi, OutboxDrainer, PaymentService, PaymentSweeper, SweeperConfig, Transition, Viewer,
    WebhookOutcome,
};
use storage::{
    InMemoryInventoryLedger, InMemoryOrderStore, InMemoryPaymentStore, InventoryLedger,
    OutboxStore, TaskStatus,
};

const SECRET: &[u8] = b"whsec_test";

type Orders = OrderService<InMemoryOrderStore, InMemoryCartReader, InMemoryInventoryLedger>;

/// Orders API that fails `mark_paid` a configurable number of times.
struct FlakyOrders {
    inner: Orders,
    failures_left: AtomicU32,
}

#[async_trait]
impl OrdersApi for FlakyOrders {
    async fn get_order(&self, order_id: OrderId) -> saga::Result<Order> {
        OrdersApi::get_order(&self.inner, order_id).await
    }

    async fn mark_paid(&self, order_id: OrderId) -> saga::Result<Transition> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(CheckoutError::Upstream("orders service unavailable".into()));
        }
        OrdersApi::mark_paid(&self.inner, order_id).await
    }

    async fn release(&self, order_id: OrderId) -> saga::Result<Transition> {
        OrdersApi::release(&self.inner, order_id).await
    }
}

struct TestHarness {
    orders: Orders,
    api: Arc<FlakyOrders>,
    payments: PaymentService<InMemoryPaymentStore, InMemoryPaymentStore, InMemoryGateway, FlakyOrders>,
    payment_store: Arc<InMemoryPaymentStore>,
    carts: Arc<InMemoryCartReader>,
    ledger: Arc<InMemoryInventoryLedger>,
    gateway: Arc<InMemoryGateway>,
}

impl TestHarness {
    fn new() -> Self {
        let order_store = Arc::new(InMemoryOrderStore::new());
        let carts = Arc::new(InMemoryCartReader::new());
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        let payment_store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(InMemoryGateway::new(SECRET));

        let orders = OrderService::new(
            order_store,
            Arc::clone(&carts),
            Arc::clone(&ledger),
            Default::default(),
        );
        let api = Arc::new(FlakyOrders {
            inner: orders.clone(),
            failures_left: AtomicU32::new(0),
        });
        let payments = PaymentService::new(
            Arc::clone(&payment_store),
            Arc::clone(&payment_store),
            Arc::clone(&gateway),
            Arc::clone(&api),
            Duration::ZERO,
        );

        Self {
            orders,
            api,
            payments,
            payment_store,
            carts,
            ledger,
            gateway,
        }
    }

    fn fail_mark_paid(&self, times: u32) {
        self.api.failures_left.store(times, Ordering::SeqCst);
    }

    async fn stock(&self, product: &str, available: i64) {
        self.ledger
            .set_available(&ProductId::new(product), available)
            .await
            .unwrap();
    }

    async fn levels(&self, product: &str) -> (i64, i64) {
        let level = self.ledger.stock(&ProductId::new(product)).await.unwrap();
        (level.available, level.reserved)
    }

    async fn cart(&self, user: &str, lines: Vec<CartLine>) {
        self.carts
            .put(CartKey::User(user_id(user)), CartSnapshot::new(lines))
            .await;
    }

    async fn prepare(&self, user: &str) -> saga::Result<saga::PreparedOrder> {
        self.orders.prepare_order(Some(user_id(user)), None).await
    }

    async fn order(&self, order_id: OrderId) -> Order {
        self.orders
            .get_order(order_id, &Viewer::Internal)
            .await
            .unwrap()
    }

    fn sweeper(&self) -> PaymentSweeper<InMemoryPaymentStore, FlakyOrders> {
        PaymentSweeper::new(
            Arc::clone(&self.payment_store),
            Arc::clone(&self.api),
            SweeperConfig {
                payment_timeout: Duration::ZERO,
                ..SweeperConfig::default()
            },
        )
    }

    fn drainer(&self, max_attempts: u32) -> OutboxDrainer<InMemoryPaymentStore, FlakyOrders> {
        OutboxDrainer::new(
            Arc::clone(&self.payment_store),
            Arc::clone(&self.api),
            DrainerConfig {
                max_attempts,
                retry_delay: Duration::ZERO,
                lease: Duration::ZERO,
                ..DrainerConfig::default()
            },
        )
    }

    async fn capture(&self, gateway_order_id: &str) -> saga::Result<WebhookOutcome> {
        let body = capture_body(gateway_order_id, "pay_test_1");
        let signature = self.gateway.sign(&body);
        self.payments.handle_webhook(&body, Some(&signature)).await
    }
}

fn user_id(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn capture_body(gateway_order_id: &str, payment_id: &str) -> Vec<u8> {
    serde_json::json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": gateway_order_id,
                    "status": "captured"
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

/// Stock P (price 50000, 2 available) and a one-unit cart for user `u1`.
async fn single_product_setup() -> TestHarness {
    let h = TestHarness::new();
    h.stock("P", 2).await;
    h.cart("u1", vec![CartLine::new("P", 1, 50_000)]).await;
    h
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_prepare_initiate_capture_marks_order_paid() {
        let h = single_product_setup().await;

        let prepared = h.prepare("u1").await.unwrap();
        assert_eq!(prepared.status, OrderStatus::PendingPayment);
        assert_eq!(prepared.amount.minor(), 50_000);
        assert_eq!(prepared.currency.as_str(), "INR");
        assert_eq!(h.levels("P").await, (1, 1));

        let initiated = h
            .payments
            .initiate(prepared.order_id, "K1", Some(user_id("u1")))
            .await
            .unwrap();
        assert_eq!(initiated.status, PaymentStatus::Initiated);
        assert_eq!(initiated.amount.minor(), 50_000);
        assert_eq!(initiated.gateway, "local");
        assert!(!initiated.replayed);

        let outcome = h.capture(&initiated.gateway_order_id).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Captured {
                payment_id: initiated.payment_id,
                order_id: prepared.order_id,
                order_marked_paid: true,
            }
        );

        let payment = h.payments.get_payment(initiated.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Captured);
        assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_test_1"));

        let order = h.order(prepared.order_id).await;
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.items()[0].hold, HoldState::Deducted);
        assert_eq!(h.levels("P").await, (1, 0));

        let tasks = h.payment_store.tasks_for_order(prepared.order_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_sweeper_releases_abandoned_payment() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h
            .payments
            .initiate(prepared.order_id, "K1", None)
            .await
            .unwrap();

        let report = h.sweeper().sweep_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, 0);

        let order = h.order(prepared.order_id).await;
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.items()[0].hold, HoldState::Released);
        assert_eq!(h.levels("P").await, (2, 0));

        let payment = h.payments.get_payment(initiated.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);

        let again = h.sweeper().sweep_once().await.unwrap();
        assert_eq!(again.examined, 0);
    }

    #[tokio::test]
    async fn test_sweeper_does_not_release_an_order_with_a_captured_payment() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let first = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        let second = h.payments.initiate(prepared.order_id, "K2", None).await.unwrap();
        h.capture(&first.gateway_order_id).await.unwrap();

        let report = h.sweeper().sweep_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.skipped_release, 1);
        assert_eq!(report.failed, 1);

        assert_eq!(h.order(prepared.order_id).await.status(), OrderStatus::Paid);
        let abandoned = h.payments.get_payment(second.payment_id).await.unwrap();
        assert_eq!(abandoned.status, PaymentStatus::Failed);
        assert_eq!(h.levels("P").await, (1, 0));
    }

    #[tokio::test]
    async fn test_refund_after_payment_restocks() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        h.capture(&initiated.gateway_order_id).await.unwrap();

        let result = h.orders.refund(prepared.order_id).await.unwrap();
        assert_eq!(result, Transition::Applied);
        assert_eq!(h.order(prepared.order_id).await.status(), OrderStatus::Refunded);
        assert_eq!(h.levels("P").await, (2, 0));

        let again = h.orders.refund(prepared.order_id).await.unwrap();
        assert_eq!(again, Transition::Unchanged);
        assert_eq!(h.levels("P").await, (2, 0));
    }
}

mod prepare {
    use super::*;

    #[tokio::test]
    async fn test_total_is_sum_of_subtotals_with_one_reservation_per_line() {
        let h = TestHarness::new();
        h.stock("A", 10).await;
        h.stock("B", 10).await;
        h.cart(
            "u1",
            vec![CartLine::new("A", 2, 1_000), CartLine::new("B", 3, 2_500)],
        )
        .await;

        let prepared = h.prepare("u1").await.unwrap();
        assert_eq!(prepared.amount.minor(), 2 * 1_000 + 3 * 2_500);
        assert_eq!(h.levels("A").await, (8, 2));
        assert_eq!(h.levels("B").await, (7, 3));

        let order = h.order(prepared.order_id).await;
        assert!(order.items().iter().all(|i| i.hold == HoldState::Reserved));
    }

    #[tokio::test]
    async fn test_partial_reservation_failure_releases_and_cancels() {
        let h = TestHarness::new();
        h.stock("A", 5).await;
        h.stock("B", 1).await;
        h.cart(
            "u1",
            vec![CartLine::new("A", 2, 1_000), CartLine::new("B", 3, 1_000)],
        )
        .await;

        let err = h.prepare("u1").await.unwrap_err();
        assert!(matches!(err, CheckoutError::StockConflict { ref product_id } if product_id.as_str() == "B"));
        assert!(err.is_conflict());

        assert_eq!(h.levels("A").await, (5, 0));
        assert_eq!(h.levels("B").await, (1, 0));

        let orders = h.orders.list_for_user(&user_id("u1")).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status(), OrderStatus::Cancelled);
        assert!(orders[0].items().iter().all(|i| i.hold == HoldState::Released));
    }

    #[tokio::test]
    async fn test_unknown_product_cancels_order() {
        let h = TestHarness::new();
        h.cart("u1", vec![CartLine::new("missing", 1, 100)]).await;

        let err = h.prepare("u1").await.unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownProduct(_)));

        let orders = h.orders.list_for_user(&user_id("u1")).await.unwrap();
        assert_eq!(orders[0].status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let h = TestHarness::new();
        let err = h.prepare("nobody").await.unwrap_err();
        assert!(matches!(err, CheckoutError::Order(OrderError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_rejected() {
        let h = TestHarness::new();
        h.stock("A", 5).await;
        h.cart("u1", vec![CartLine::new("A", 0, 100)]).await;

        let err = h.prepare("u1").await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Order(OrderError::InvalidQuantity { .. })
        ));
        assert_eq!(h.levels("A").await, (5, 0));
    }

    #[tokio::test]
    async fn test_identity_is_required() {
        let h = TestHarness::new();
        let err = h.orders.prepare_order(None, None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_session_cart_is_used_when_user_cart_is_empty() {
        let h = TestHarness::new();
        h.stock("A", 5).await;
        let session = SessionId::new("s1").unwrap();
        h.carts
            .put(
                CartKey::Session(session.clone()),
                CartSnapshot::new(vec![CartLine::new("A", 1, 700)]),
            )
            .await;

        let prepared = h
            .orders
            .prepare_order(Some(user_id("u1")), Some(session))
            .await
            .unwrap();
        assert_eq!(prepared.amount.minor(), 700);

        let order = h.order(prepared.order_id).await;
        assert_eq!(order.user_id(), Some(&user_id("u1")));
    }

    #[tokio::test]
    async fn test_concurrent_prepares_never_oversell() {
        let h = Arc::new(TestHarness::new());
        h.stock("A", 3).await;
        for i in 0..10 {
            h.cart(&format!("u{i}"), vec![CartLine::new("A", 1, 100)]).await;
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let h = Arc::clone(&h);
            handles.push(tokio::spawn(async move { h.prepare(&format!("u{i}")).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(h.levels("A").await, (0, 3));
    }
}

mod visibility {
    use super::*;

    #[tokio::test]
    async fn test_order_visible_to_owner_and_internal_only() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let id = prepared.order_id;

        assert!(h.orders.get_order(id, &Viewer::Internal).await.is_ok());
        assert!(h.orders.get_order(id, &Viewer::User(user_id("u1"))).await.is_ok());
        assert!(matches!(
            h.orders.get_order(id, &Viewer::User(user_id("u2"))).await,
            Err(CheckoutError::OrderNotFound(_))
        ));
        assert!(matches!(
            h.orders.get_order(id, &Viewer::Anonymous).await,
            Err(CheckoutError::OrderNotFound(_))
        ));
    }
}

mod initiate {
    use super::*;

    #[tokio::test]
    async fn test_replayed_key_returns_first_attempt() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();

        let first = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        let second = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.payment_id, second.payment_id);
        assert_eq!(first.gateway_order_id, second.gateway_order_id);
        assert_eq!(h.gateway.orders_created(), 1);
        assert_eq!(h.payment_store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn test_key_reused_for_another_order_conflicts() {
        let h = single_product_setup().await;
        let first = h.prepare("u1").await.unwrap();
        let second = h.prepare("u1").await.unwrap();

        h.payments.initiate(first.order_id, "K1", None).await.unwrap();
        let err = h
            .payments
            .initiate(second.order_id, "K1", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::IdempotencyConflict { existing_order, .. } if existing_order == first.order_id
        ));
    }

    #[tokio::test]
    async fn test_gateway_failure_then_retry_reuses_payment() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();

        h.gateway.set_fail(true);
        let err = h
            .payments
            .initiate(prepared.order_id, "K1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Gateway(_)));

        h.gateway.set_fail(false);
        let retried = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        assert!(retried.replayed);
        assert_eq!(h.payment_store.payment_count().await, 1);
        assert_eq!(h.gateway.orders_created(), 1);
    }

    #[tokio::test]
    async fn test_unpayable_order_is_rejected() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        h.orders.release(prepared.order_id).await.unwrap();

        let err = h
            .payments
            .initiate(prepared.order_id, "K1", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::NotPayable { status: OrderStatus::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn test_other_users_order_is_not_found() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();

        let err = h
            .payments
            .initiate(prepared.order_id, "K1", Some(user_id("u2")))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let h = TestHarness::new();
        let err = h
            .payments
            .initiate(OrderId::new(), "K1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_blank_key_is_rejected() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let err = h
            .payments
            .initiate(prepared.order_id, "  ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Payment(_)));
    }
}

mod webhook {
    use super::*;

    #[tokio::test]
    async fn test_redelivery_captures_once() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();

        h.capture(&initiated.gateway_order_id).await.unwrap();
        let again = h.capture(&initiated.gateway_order_id).await.unwrap();

        assert_eq!(
            again,
            WebhookOutcome::AlreadyCaptured {
                payment_id: initiated.payment_id
            }
        );
        let tasks = h.payment_store.tasks_for_order(prepared.order_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(h.levels("P").await, (1, 0));
    }

    #[tokio::test]
    async fn test_bad_or_missing_signature_is_rejected() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        let body = capture_body(&initiated.gateway_order_id, "pay_1");

        let forged = h.payments.handle_webhook(&body, Some("deadbeef")).await;
        assert!(matches!(forged, Err(CheckoutError::InvalidSignature)));

        let unsigned = h.payments.handle_webhook(&body, None).await;
        assert!(matches!(unsigned, Err(CheckoutError::InvalidSignature)));

        let payment = h.payments.get_payment(initiated.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Initiated);
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let h = TestHarness::new();
        let body = br#"{"event":"payment.authorized","payload":{}}"#;
        let signature = h.gateway.sign(body);

        let outcome = h.payments.handle_webhook(body, Some(&signature)).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event: "payment.authorized".into()
            }
        );
    }

    #[tokio::test]
    async fn test_capture_event_without_success_is_ignored() {
        let h = TestHarness::new();
        let body = serde_json::json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1", "order_id": "order_1", "status": "failed"}}}
        })
        .to_string();
        let signature = h.gateway.sign(body.as_bytes());

        let outcome = h
            .payments
            .handle_webhook(body.as_bytes(), Some(&signature))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_signed_garbage_is_malformed() {
        let h = TestHarness::new();
        let body = b"not json";
        let signature = h.gateway.sign(body);

        let err = h.payments.handle_webhook(body, Some(&signature)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::MalformedWebhook(_)));
    }

    #[tokio::test]
    async fn test_unknown_gateway_order_is_acknowledged() {
        let h = TestHarness::new();
        let outcome = h.capture("order_unknown").await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::UnknownGatewayOrder {
                gateway_order_id: "order_unknown".into()
            }
        );
    }

    #[tokio::test]
    async fn test_second_capture_for_order_is_acknowledged() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let first = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        let second = h.payments.initiate(prepared.order_id, "K2", None).await.unwrap();

        h.capture(&first.gateway_order_id).await.unwrap();
        let outcome = h.capture(&second.gateway_order_id).await.unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::DuplicateOrderCapture {
                payment_id: second.payment_id,
                order_id: prepared.order_id,
            }
        );
        let captured = h.payments.get_payment(second.payment_id).await.unwrap();
        assert_eq!(captured.status, PaymentStatus::Initiated);
    }
}

mod outbox {
    use super::*;

    #[tokio::test]
    async fn test_failed_inline_mark_paid_is_completed_by_drainer() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();

        h.fail_mark_paid(1);
        let outcome = h.capture(&initiated.gateway_order_id).await.unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::Captured { order_marked_paid: false, .. }
        ));
        assert_eq!(
            h.order(prepared.order_id).await.status(),
            OrderStatus::PendingPayment
        );

        let tasks = h.payment_store.tasks_for_order(prepared.order_id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert!(tasks[0].last_error.is_some());

        let report = h.drainer(10).drain_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);

        assert_eq!(h.order(prepared.order_id).await.status(), OrderStatus::Paid);
        assert_eq!(h.levels("P").await, (1, 0));
        let task = h.payment_store.get_task(tasks[0].id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_task_is_dead_lettered_after_max_attempts() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();

        h.fail_mark_paid(10);
        h.capture(&initiated.gateway_order_id).await.unwrap();

        let drainer = h.drainer(2);
        let first = drainer.drain_once().await.unwrap();
        assert_eq!(first.retried, 1);

        let second = drainer.drain_once().await.unwrap();
        assert_eq!(second.dead, 1);

        let third = drainer.drain_once().await.unwrap();
        assert_eq!(third.claimed, 0);

        let tasks = h.payment_store.tasks_for_order(prepared.order_id).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Dead);
        assert_eq!(tasks[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_capture_after_cancellation_is_dead_lettered_immediately() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        h.orders.release(prepared.order_id).await.unwrap();

        let outcome = h.capture(&initiated.gateway_order_id).await.unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::Captured { order_marked_paid: false, .. }
        ));

        let report = h.drainer(10).drain_once().await.unwrap();
        assert_eq!(report.dead, 1);
        assert_eq!(
            h.order(prepared.order_id).await.status(),
            OrderStatus::Cancelled
        );
        assert_eq!(h.levels("P").await, (2, 0));
    }

    #[tokio::test]
    async fn test_drainer_stops_on_shutdown() {
        let h = TestHarness::new();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(h.drainer(3).run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

mod compensation {
    use super::*;

    #[tokio::test]
    async fn test_release_is_noop_outside_pending_payment() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();
        let initiated = h.payments.initiate(prepared.order_id, "K1", None).await.unwrap();
        h.capture(&initiated.gateway_order_id).await.unwrap();

        let result = h.orders.release(prepared.order_id).await.unwrap();
        assert_eq!(result, Transition::Unchanged);
        assert_eq!(h.order(prepared.order_id).await.status(), OrderStatus::Paid);
        assert_eq!(h.levels("P").await, (1, 0));
    }

    #[tokio::test]
    async fn test_refund_is_noop_outside_paid() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();

        let result = h.orders.refund(prepared.order_id).await.unwrap();
        assert_eq!(result, Transition::Unchanged);
        assert_eq!(h.levels("P").await, (1, 1));
    }

    #[tokio::test]
    async fn test_release_twice_returns_stock_once() {
        let h = single_product_setup().await;
        let prepared = h.prepare("u1").await.unwrap();

        assert_eq!(h.orders.release(prepared.order_id).await.unwrap(), Transition::Applied);
        assert_eq!(h.orders.release(prepared.order_id).await.unwrap(), Transition::Unchanged);
        assert_eq!(h.levels("P").await, (2, 0));
    }

    #[tokio::test]
    async fn test_release_of_missing_order_is_noop() {
        let h = TestHarness::new();
        let result = h.orders.release(OrderId::new()).await.unwrap();
        assert_eq!(result, Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent_and_refuses_cancelled() {
        let h = single_product_setup().await;
        let paid = h.prepare("u1").await.unwrap();
        assert_eq!(h.orders.mark_paid(paid.order_id).await.unwrap(), Transition::Applied);
        assert_eq!(h.orders.mark_paid(paid.order_id).await.unwrap(), Transition::Unchanged);

        let cancelled = h.prepare("u1").await.unwrap();
        h.orders.release(cancelled.order_id).await.unwrap();
        let err = h.orders.mark_paid(cancelled.order_id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_racing_mark_paid_and_release_keep_stock_consistent() {
        for _ in 0..20 {
            let h = Arc::new(single_product_setup().await);
            let prepared = h.prepare("u1").await.unwrap();
            let id = prepared.order_id;

            let paying = {
                let h = Arc::clone(&h);
                tokio::spawn(async move { h.orders.mark_paid(id).await })
            };
            let releasing = {
                let h = Arc::clone(&h);
                tokio::spawn(async move { h.orders.release(id).await })
            };
            let _ = paying.await.unwrap();
            let _ = releasing.await.unwrap();

            let order = h.order(id).await;
            let levels = h.levels("P").await;
            match order.status() {
                OrderStatus::Paid => assert_eq!(levels, (1, 0)),
                OrderStatus::Cancelled => assert_eq!(levels, (2, 0)),
                other => panic!("unexpected status {other}"),
            }
        }
    }
}
