//! Shared application state and service wiring.

use std::sync::Arc;

use saga::{
    CartReader, HttpCartClient, HttpInventoryClient, HttpOrdersClient, InMemoryCartReader,
    InMemoryGateway, OrderService, OrdersApi, OutboxDrainer, PaymentGateway, PaymentService,
    PaymentSweeper, RazorpayGateway,
};
use sqlx::PgPool;
use storage::{
    InMemoryInventoryLedger, InMemoryOrderStore, InMemoryPaymentStore, InventoryLedger,
    OrderStore, OutboxStore, PaymentStore, PgInventoryLedger, PgOrderStore, PgPaymentStore,
};

use crate::config::Config;
use crate::error::StartupError;

/// Order service over trait objects, so one binary can mix local and remote backends.
pub type Orders = OrderService<dyn OrderStore, dyn CartReader, dyn InventoryLedger>;

pub type Payments =
    PaymentService<dyn PaymentStore, dyn OutboxStore, dyn PaymentGateway, dyn OrdersApi>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orders: Orders,
    pub payments: Payments,
    /// Ledger served by the inventory admin endpoints.
    pub ledger: Arc<dyn InventoryLedger>,
    pub internal_key: String,
    pub admin_key: String,
}

/// Storage backends the services are built on.
pub struct Backends {
    pub orders: Arc<dyn OrderStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub ledger: Arc<dyn InventoryLedger>,
    /// Used when `CART_SVC_BASE` is unset.
    pub carts: Arc<dyn CartReader>,
}

impl Backends {
    pub fn in_memory() -> Self {
        let payments = Arc::new(InMemoryPaymentStore::new());
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            payments: payments.clone(),
            outbox: payments,
            ledger: Arc::new(InMemoryInventoryLedger::new()),
            carts: Arc::new(InMemoryCartReader::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let payments = Arc::new(PgPaymentStore::new(pool.clone()));
        Self {
            orders: Arc::new(PgOrderStore::new(pool.clone())),
            payments: payments.clone(),
            outbox: payments,
            ledger: Arc::new(PgInventoryLedger::new(pool)),
            carts: Arc::new(InMemoryCartReader::new()),
        }
    }
}

/// Everything the binary runs: the HTTP state and the two background loops.
pub struct Components {
    pub state: Arc<AppState>,
    pub sweeper: PaymentSweeper<dyn PaymentStore, dyn OrdersApi>,
    pub drainer: OutboxDrainer<dyn OutboxStore, dyn OrdersApi>,
}

impl Components {
    /// Wires the services, replacing local backends with HTTP clients
    /// wherever a collaborator base URL is configured.
    pub fn build(config: &Config, backends: Backends) -> Result<Self, StartupError> {
        let carts: Arc<dyn CartReader> = match &config.cart_base_url {
            Some(url) => Arc::new(HttpCartClient::new(url.clone(), &config.http)?),
            None => backends.carts,
        };

        let ledger: Arc<dyn InventoryLedger> = match &config.catalog_base_url {
            Some(url) => Arc::new(HttpInventoryClient::new(
                url.clone(),
                config.admin_key.clone(),
                &config.http,
            )?),
            None => backends.ledger,
        };

        let gateway: Arc<dyn PaymentGateway> = match &config.razorpay {
            Some(razorpay) => Arc::new(RazorpayGateway::new(razorpay.clone(), &config.http)?),
            None => {
                tracing::warn!("Razorpay keys not set, using the local gateway");
                Arc::new(InMemoryGateway::new(config.internal_key.as_bytes()))
            }
        };

        let orders: Orders = OrderService::new(
            backends.orders,
            carts,
            Arc::clone(&ledger),
            config.default_currency.clone(),
        );

        let orders_api: Arc<dyn OrdersApi> = match &config.orders_base_url {
            Some(url) => Arc::new(HttpOrdersClient::new(
                url.clone(),
                config.internal_key.clone(),
                &config.http,
            )?),
            None => Arc::new(orders.clone()),
        };

        let payments: Payments = PaymentService::new(
            Arc::clone(&backends.payments),
            Arc::clone(&backends.outbox),
            gateway,
            Arc::clone(&orders_api),
            config.drainer.retry_delay,
        );

        let sweeper = PaymentSweeper::new(
            backends.payments,
            Arc::clone(&orders_api),
            config.sweeper.clone(),
        );
        let drainer = OutboxDrainer::new(backends.outbox, orders_api, config.drainer.clone());

        let state = Arc::new(AppState {
            orders,
            payments,
            ledger,
            internal_key: config.internal_key.clone(),
            admin_key: config.admin_key.clone(),
        });

        Ok(Self {
            state,
            sweeper,
            drainer,
        })
    }
}
