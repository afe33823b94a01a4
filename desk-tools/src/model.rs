use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of the person a session or tool call acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const CANCELLABLE: [OrderStatus; 2] = [OrderStatus::Processing, OrderStatus::Shipped];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_cancellable(self) -> bool {
        Self::CANCELLABLE.contains(&self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub customer_name: String,
    pub status: OrderStatus,
    pub items: Vec<String>,
    pub total: f64,
    pub date: NaiveDate,
    /// Outstanding single-use cancellation codes. May hold duplicates.
    #[serde(default)]
    pub verification_codes: Vec<String>,
}

impl Order {
    /// The view handed to the model. Verification codes never leave the store.
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.order_id,
            "customer": self.customer_name,
            "status": self.status,
            "items": self.items,
            "total": self.total,
            "date": self.date.format("%Y-%m-%d").to_string(),
        })
    }

    pub fn summary_view(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.order_id,
            "status": self.status,
            "total": self.total,
            "date": self.date.format("%Y-%m-%d").to_string(),
        })
    }
}
