//! Order tools for the support agent.
//!
//! Tools are invoked by the agent loop on behalf of an acting user. Handlers
//! enforce ownership themselves; the registry only routes and validates.

mod error;
mod model;
mod notify;
mod orders;
mod registry;
pub mod seed;
mod sqlite;
mod store;
mod traits;

pub use error::{FailureKind, Result, ToolError};
pub use model::{Order, OrderStatus, UserIdentity};
pub use notify::{GmailNotifier, LogNotifier, Notifier};
pub use orders::{
    CANCEL_ORDER_WITH_VERIFICATION, CancelOrderWithVerificationTool, GENERATE_CANCELLATION_CODE,
    GET_ORDER_STATUS, GenerateCancellationCodeTool, GetOrderStatusTool, LIST_ORDERS,
    ListOrdersTool, order_tools,
};
pub use registry::ToolRegistry;
pub use sqlite::SqliteOrderStore;
pub use store::{CancelOutcome, InMemoryOrderStore, OrderStore, UserDirectory};
pub use traits::{ApprovalContext, ContactInfo, Tool, ToolOutcome, ToolSpec, to_llm_tool_def};
