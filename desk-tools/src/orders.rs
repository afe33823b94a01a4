//! Order tools exposed to the support agent.
//!
//! Every handler scopes lookups to the acting user. An order owned by someone
//! else is indistinguishable from a missing one, and an anonymous caller owns
//! nothing.

use crate::error::{FailureKind, Result, ToolError};
use crate::model::{Order, OrderStatus, UserIdentity};
use crate::notify::Notifier;
use crate::store::{CancelOutcome, OrderStore};
use crate::traits::{ApprovalContext, ContactInfo, Tool, ToolOutcome, ToolSpec, require_string};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use std::sync::Arc;

pub const GET_ORDER_STATUS: &str = "get_order_status";
pub const LIST_ORDERS: &str = "list_orders";
pub const GENERATE_CANCELLATION_CODE: &str = "generate_cancellation_code";
pub const CANCEL_ORDER_WITH_VERIFICATION: &str = "cancel_order_with_verification";

pub fn order_tools(store: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetOrderStatusTool::new(store.clone())),
        Arc::new(ListOrdersTool::new(store.clone())),
        Arc::new(GenerateCancellationCodeTool::new(store.clone(), notifier)),
        Arc::new(CancelOrderWithVerificationTool::new(store)),
    ]
}

async fn owned_order(
    store: &dyn OrderStore,
    order_id: &str,
    actor: Option<&UserIdentity>,
) -> Result<Option<Order>> {
    let Some(actor) = actor else {
        tracing::debug!(order_id, "order lookup without an acting user");
        return Ok(None);
    };
    store.find_order(order_id, Some(&actor.id)).await
}

/// Status gate shared by code generation and cancellation.
fn cancellation_blocked(order: &Order) -> Option<ToolOutcome> {
    (!order.status.is_cancellable()).then(|| blocked_by_status(order.status))
}

fn blocked_by_status(status: OrderStatus) -> ToolOutcome {
    match status {
        OrderStatus::Cancelled => ToolOutcome::failure(
            FailureKind::InvalidState,
            "This order has already been cancelled and cannot be cancelled again",
        ),
        status => ToolOutcome::failure(
            FailureKind::InvalidState,
            format!(
                "This order cannot be cancelled because its status is '{status}'. Only orders with status 'processing' or 'shipped' can be cancelled"
            ),
        ),
    }
}

fn order_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "order_id": { "type": "string", "description": description }
        },
        "required": ["order_id"],
        "additionalProperties": false
    })
}

/// Read the `verification_code` argument. Models sometimes send the code as
/// a bare number, which drops leading zeros, so integers are padded back to
/// six digits.
fn require_verification_code(args: &Value) -> Result<String> {
    match args.get("verification_code") {
        Some(Value::Number(n)) => match n.as_u64().filter(|n| *n < 1_000_000) {
            Some(n) => Ok(format!("{n:06}")),
            None => Err(ToolError::InvalidArguments(format!(
                "verification_code must be a 6-digit code, got {n}"
            ))),
        },
        _ => require_string(args, "verification_code"),
    }
}

fn new_verification_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

pub struct GetOrderStatusTool {
    store: Arc<dyn OrderStore>,
}

impl GetOrderStatusTool {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetOrderStatusTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_ORDER_STATUS.to_string(),
            description: "Get order status by order ID".to_string(),
            parameters_schema: order_id_schema("Order ID (ORD-XXX)"),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn execute(&self, arguments: Value, actor: Option<&UserIdentity>) -> Result<ToolOutcome> {
        let order_id = require_string(&arguments, "order_id")?;
        let Some(order) = owned_order(self.store.as_ref(), &order_id, actor).await? else {
            return Ok(ToolOutcome::not_found());
        };
        Ok(ToolOutcome::Success(json!({ "order": order.public_view() })))
    }
}

pub struct ListOrdersTool {
    store: Arc<dyn OrderStore>,
}

impl ListOrdersTool {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListOrdersTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: LIST_ORDERS.to_string(),
            description: "List the current customer's orders".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn execute(&self, _arguments: Value, actor: Option<&UserIdentity>) -> Result<ToolOutcome> {
        let orders = match actor {
            Some(actor) => self.store.list_orders(&actor.id).await?,
            None => Vec::new(),
        };
        let summaries: Vec<Value> = orders.iter().map(Order::summary_view).collect();
        Ok(ToolOutcome::Success(json!({
            "count": summaries.len(),
            "orders": summaries,
        })))
    }
}

pub struct GenerateCancellationCodeTool {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
}

impl GenerateCancellationCodeTool {
    pub fn new(store: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}

#[async_trait]
impl Tool for GenerateCancellationCodeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GENERATE_CANCELLATION_CODE.to_string(),
            description: "Generate verification code for cancellation. Use this first when the customer asks to cancel an order.".to_string(),
            parameters_schema: order_id_schema("Order ID (ORD-XXX)"),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: Value, actor: Option<&UserIdentity>) -> Result<ToolOutcome> {
        let order_id = require_string(&arguments, "order_id")?;
        let Some(order) = owned_order(self.store.as_ref(), &order_id, actor).await? else {
            return Ok(ToolOutcome::not_found());
        };
        if let Some(blocked) = cancellation_blocked(&order) {
            return Ok(blocked);
        }

        let code = new_verification_code();
        self.store.append_verification_code(&order.order_id, &code).await?;

        let contact = ContactInfo {
            email: actor.map(|a| a.email.clone()).filter(|e| !e.trim().is_empty()),
            name: actor
                .map(|a| a.name.clone())
                .or_else(|| Some(order.customer_name.clone())),
        };
        let email_sent = match contact.email.as_deref() {
            Some(email) => {
                let name = contact.name.as_deref().unwrap_or_default();
                self.notifier
                    .send_verification_email(&order.order_id, &code, email, name)
                    .await
            }
            None => false,
        };
        if !email_sent {
            tracing::warn!(
                order_id = %order.order_id,
                backend = self.notifier.backend(),
                "verification email was not delivered"
            );
        }

        tracing::info!(order_id = %order.order_id, email_sent, "verification code issued");
        Ok(ToolOutcome::ApprovalRequired {
            payload: json!({
                "message": "Verification code generated",
                "order_id": order.order_id,
                "customer": order.customer_name,
                "email_sent": email_sent,
            }),
            approval: ApprovalContext {
                order_id: order.order_id,
                code,
                contact,
            },
        })
    }
}

pub struct CancelOrderWithVerificationTool {
    store: Arc<dyn OrderStore>,
}

impl CancelOrderWithVerificationTool {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CancelOrderWithVerificationTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: CANCEL_ORDER_WITH_VERIFICATION.to_string(),
            description: "Cancel order with verification code".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "order_id": { "type": "string", "description": "Order ID (ORD-XXX)" },
                    "verification_code": {
                        "type": "string",
                        "description": "The 6-digit verification code provided by the customer"
                    }
                },
                "required": ["order_id", "verification_code"],
                "additionalProperties": false
            }),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: Value, actor: Option<&UserIdentity>) -> Result<ToolOutcome> {
        let order_id = require_string(&arguments, "order_id")?;
        let code = require_verification_code(&arguments)?;
        let Some(actor) = actor else {
            tracing::debug!(order_id = %order_id, "cancellation without an acting user");
            return Ok(ToolOutcome::not_found());
        };

        match self.store.cancel_with_code(&order_id, &actor.id, &code).await? {
            CancelOutcome::NotFound => Ok(ToolOutcome::not_found()),
            CancelOutcome::Blocked(status) => Ok(blocked_by_status(status)),
            CancelOutcome::BadCode => {
                tracing::info!(order_id = %order_id, "verification code rejected");
                Ok(ToolOutcome::failure(
                    FailureKind::InvalidCredential,
                    "Invalid verification code",
                ))
            }
            CancelOutcome::Cancelled { total } => {
                tracing::info!(order_id = %order_id, refund_amount = total, "order cancelled");
                Ok(ToolOutcome::Success(json!({
                    "message": format!("Order {order_id} cancelled successfully"),
                    "order_id": order_id,
                    "refund_amount": total,
                })))
            }
        }
    }
}
