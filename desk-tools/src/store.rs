//! Order and user data collaborators.
//!
//! Every mutation is atomic with respect to the read that justifies it: the
//! in-memory backend holds the map entry lock for the whole check-and-write.

use crate::error::{Result, ToolError};
use crate::model::{Order, OrderStatus, UserIdentity};
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Look up an order. With `owner` set, orders owned by anyone else are
    /// reported as absent.
    async fn find_order(&self, order_id: &str, owner: Option<&str>) -> Result<Option<Order>>;

    async fn list_orders(&self, owner: &str) -> Result<Vec<Order>>;

    async fn append_verification_code(&self, order_id: &str, code: &str) -> Result<()>;

    /// Remove one occurrence of `code`. Returns false when it was not outstanding.
    async fn consume_verification_code(&self, order_id: &str, code: &str) -> Result<bool>;

    /// Cancel `order_id` for `owner` by spending one outstanding `code`.
    ///
    /// The status gate, the code removal and the status write happen as one
    /// step, so two valid codes cannot both cancel the same order. Nothing is
    /// consumed unless the order ends up cancelled.
    async fn cancel_with_code(&self, order_id: &str, owner: &str, code: &str)
    -> Result<CancelOutcome>;

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CancelOutcome {
    /// Absent, or owned by someone else.
    NotFound,
    /// The order's status does not allow cancellation.
    Blocked(OrderStatus),
    /// `code` is not outstanding for this order.
    BadCode,
    Cancelled { total: f64 },
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserIdentity>>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
    users: DashMap<String, UserIdentity>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(users: Vec<UserIdentity>, orders: Vec<Order>) -> Self {
        let store = Self::new();
        for user in users {
            store.users.insert(user.id.clone(), user);
        }
        for order in orders {
            store.orders.insert(order.order_id.clone(), order);
        }
        store
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

fn missing(order_id: &str) -> ToolError {
    ToolError::Store(format!("order {order_id} does not exist"))
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_order(&self, order_id: &str, owner: Option<&str>) -> Result<Option<Order>> {
        let Some(order) = self.orders.get(order_id) else {
            return Ok(None);
        };
        if owner.is_some_and(|owner| owner != order.user_id) {
            return Ok(None);
        }
        Ok(Some(order.clone()))
    }

    async fn list_orders(&self, owner: &str) -> Result<Vec<Order>> {
        let mut out: Vec<Order> = self
            .orders
            .iter()
            .filter(|e| e.value().user_id == owner)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(out)
    }

    async fn append_verification_code(&self, order_id: &str, code: &str) -> Result<()> {
        let mut order = self.orders.get_mut(order_id).ok_or_else(|| missing(order_id))?;
        order.verification_codes.push(code.to_string());
        Ok(())
    }

    async fn consume_verification_code(&self, order_id: &str, code: &str) -> Result<bool> {
        let mut order = self.orders.get_mut(order_id).ok_or_else(|| missing(order_id))?;
        let Some(idx) = order.verification_codes.iter().position(|c| c == code) else {
            return Ok(false);
        };
        order.verification_codes.remove(idx);
        Ok(true)
    }

    async fn cancel_with_code(
        &self,
        order_id: &str,
        owner: &str,
        code: &str,
    ) -> Result<CancelOutcome> {
        let Some(mut order) = self.orders.get_mut(order_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if order.user_id != owner {
            return Ok(CancelOutcome::NotFound);
        }
        if !order.status.is_cancellable() {
            return Ok(CancelOutcome::Blocked(order.status));
        }
        let Some(idx) = order.verification_codes.iter().position(|c| c == code) else {
            return Ok(CancelOutcome::BadCode);
        };
        order.verification_codes.remove(idx);
        order.status = OrderStatus::Cancelled;
        Ok(CancelOutcome::Cancelled { total: order.total })
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        let mut order = self.orders.get_mut(order_id).ok_or_else(|| missing(order_id))?;
        order.status = status;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryOrderStore {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserIdentity>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }
}
