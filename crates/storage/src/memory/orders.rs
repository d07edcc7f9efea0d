use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{HoldState, Order, OrderStatus, UserId};
use tokio::sync::RwLock;

use crate::{OrderFilter, OrderPage, OrderStore, Result, StoreError};

/// In-memory order store.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(StoreError::DuplicateOrder(order.id()));
        }
        orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn transition(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        Ok(order.transition(from, to, Utc::now())?)
    }

    async fn settle_paid(&self, id: OrderId) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        Ok(order.settle_paid(Utc::now())?)
    }

    async fn claim_item_hold(
        &self,
        id: OrderId,
        line: u32,
        from: HoldState,
        to: HoldState,
        status: OrderStatus,
    ) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        if order.status() != status {
            return Ok(false);
        }
        Ok(order.set_hold(line, from, to, Utc::now())?)
    }

    async fn set_item_hold(
        &self,
        id: OrderId,
        line: u32,
        from: HoldState,
        to: HoldState,
    ) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        Ok(order.set_hold(line, from, to, Utc::now())?)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut owned: Vec<Order> = orders
            .values()
            .filter(|o| o.is_owned_by(user_id))
            .cloned()
            .collect();
        newest_first(&mut owned);
        Ok(owned)
    }

    async fn list(&self, filter: OrderFilter) -> Result<OrderPage> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|o| filter.status.is_none_or(|status| o.status() == status))
            .cloned()
            .collect();
        newest_first(&mut matching);

        let total = matching.len() as u64;
        let orders = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page: filter.page,
            limit: filter.limit,
        })
    }
}
