//! Demo users and orders for local runs and tests.

use crate::model::{Order, OrderStatus, UserIdentity};
use chrono::NaiveDate;

pub fn demo_users() -> Vec<UserIdentity> {
    vec![
        UserIdentity {
            id: "u-1001".to_string(),
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        },
        UserIdentity {
            id: "u-1002".to_string(),
            name: "Grace Hopper".to_string(),
            email: "grace@example.com".to_string(),
        },
    ]
}

pub fn demo_orders() -> Vec<Order> {
    let rows: [(&str, &str, &str, OrderStatus, &[&str], f64, u32); 8] = [
        ("ORD-001", "u-1001", "Ada Lovelace", OrderStatus::Processing, &["Laptop"], 1299.99, 15),
        ("ORD-002", "u-1001", "Ada Lovelace", OrderStatus::Shipped, &["Mouse"], 49.99, 16),
        ("ORD-003", "u-1001", "Ada Lovelace", OrderStatus::Delivered, &["Keyboard"], 89.99, 17),
        ("ORD-004", "u-1001", "Ada Lovelace", OrderStatus::Processing, &["Monitor"], 499.99, 18),
        ("ORD-005", "u-1002", "Grace Hopper", OrderStatus::Processing, &["Tablet"], 399.99, 19),
        ("ORD-006", "u-1002", "Grace Hopper", OrderStatus::Shipped, &["USB-C Hub"], 79.99, 20),
        ("ORD-007", "u-1002", "Grace Hopper", OrderStatus::Delivered, &["Headphones"], 199.99, 21),
        ("ORD-008", "u-1002", "Grace Hopper", OrderStatus::Processing, &["Webcam"], 149.99, 22),
    ];

    rows.into_iter()
        .map(|(order_id, user_id, customer, status, items, total, day)| Order {
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            customer_name: customer.to_string(),
            status,
            items: items.iter().map(|s| s.to_string()).collect(),
            total,
            date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap_or_default(),
            verification_codes: Vec::new(),
        })
        .collect()
}
