//! SQLite-backed order and user store.
//!
//! Each operation opens its own connection on the blocking pool; writes that
//! depend on a read run inside one transaction or a single statement.

use crate::error::{Result, ToolError};
use crate::model::{Order, OrderStatus, UserIdentity};
use crate::store::{CancelOutcome, OrderStore, UserDirectory};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    customer_name TEXT NOT NULL,
    status TEXT NOT NULL,
    items_json TEXT NOT NULL,
    total REAL NOT NULL,
    order_date TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS orders_user_id ON orders(user_id);
CREATE TABLE IF NOT EXISTS verification_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS verification_codes_order ON verification_codes(order_id, code);
"#;

#[derive(Clone)]
pub struct SqliteOrderStore {
    path: PathBuf,
}

impl SqliteOrderStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Store(format!("create {}: {e}", parent.display())))?;
        }
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        tracing::info!(path = %store.path.display(), "sqlite order store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace all users and orders with the given data.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn seed(&self, users: Vec<UserIdentity>, orders: Vec<Order>) -> Result<()> {
        let (user_count, order_count) = (users.len(), orders.len());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM verification_codes", [])?;
            tx.execute("DELETE FROM orders", [])?;
            tx.execute("DELETE FROM users", [])?;
            for user in &users {
                tx.execute(
                    "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)",
                    params![user.id, user.name, user.email],
                )?;
            }
            for order in &orders {
                let items_json = serde_json::to_string(&order.items)
                    .map_err(|e| ToolError::Store(e.to_string()))?;
                tx.execute(
                    r#"
INSERT INTO orders (order_id, user_id, customer_name, status, items_json, total, order_date)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
                    params![
                        order.order_id,
                        order.user_id,
                        order.customer_name,
                        order.status.as_str(),
                        items_json,
                        order.total,
                        order.date.format("%Y-%m-%d").to_string(),
                    ],
                )?;
                for code in &order.verification_codes {
                    tx.execute(
                        "INSERT INTO verification_codes (order_id, code) VALUES (?1, ?2)",
                        params![order.order_id, code],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        tracing::info!(user_count, order_count, "sqlite order store seeded");
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_db(&path)?;
            f(&mut conn)
        })
        .await?
    }
}

fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| ToolError::Store(format!("open order db {}: {e}", path.display())))?;
    conn.busy_timeout(Duration::from_millis(2000))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

fn load_codes(conn: &Connection, order_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT code FROM verification_codes WHERE order_id = ?1 ORDER BY id",
    )?;
    let codes = stmt
        .query_map(params![order_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(codes)
}

struct OrderRow {
    order_id: String,
    user_id: String,
    customer_name: String,
    status: String,
    items_json: String,
    total: f64,
    order_date: String,
}

impl OrderRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            order_id: row.get(0)?,
            user_id: row.get(1)?,
            customer_name: row.get(2)?,
            status: row.get(3)?,
            items_json: row.get(4)?,
            total: row.get(5)?,
            order_date: row.get(6)?,
        })
    }

    fn into_order(self, verification_codes: Vec<String>) -> Result<Order> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(ToolError::Store)?;
        let items: Vec<String> = serde_json::from_str(&self.items_json).map_err(|e| {
            ToolError::Store(format!("order {} has invalid items: {e}", self.order_id))
        })?;
        let date = NaiveDate::parse_from_str(&self.order_date, "%Y-%m-%d").map_err(|e| {
            ToolError::Store(format!("order {} has invalid date: {e}", self.order_id))
        })?;
        Ok(Order {
            order_id: self.order_id,
            user_id: self.user_id,
            customer_name: self.customer_name,
            status,
            items,
            total: self.total,
            date,
            verification_codes,
        })
    }
}

const CONSUME_ONE_CODE: &str = r#"
DELETE FROM verification_codes
 WHERE id = (
    SELECT id FROM verification_codes
     WHERE order_id = ?1 AND code = ?2
     ORDER BY id
     LIMIT 1
 )
"#;

const ORDER_COLUMNS: &str =
    "order_id, user_id, customer_name, status, items_json, total, order_date";

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn find_order(&self, order_id: &str, owner: Option<&str>) -> Result<Option<Order>> {
        let order_id = order_id.to_string();
        let owner = owner.map(str::to_string);
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?1 AND (?2 IS NULL OR user_id = ?2)"
                    ),
                    params![order_id, owner],
                    OrderRow::from_row,
                )
                .optional()?;
            let Some(row) = row else {
                return Ok(None);
            };
            let codes = load_codes(conn, &order_id)?;
            row.into_order(codes).map(Some)
        })
        .await
    }

    async fn list_orders(&self, owner: &str) -> Result<Vec<Order>> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let rows = {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY order_id"
                ))?;
                stmt.query_map(params![owner], OrderRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            rows.into_iter()
                .map(|row| {
                    let codes = load_codes(conn, &row.order_id)?;
                    row.into_order(codes)
                })
                .collect()
        })
        .await
    }

    async fn append_verification_code(&self, order_id: &str, code: &str) -> Result<()> {
        let order_id = order_id.to_string();
        let code = code.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                r#"
INSERT INTO verification_codes (order_id, code)
SELECT order_id, ?2 FROM orders WHERE order_id = ?1
"#,
                params![order_id, code],
            )?;
            if inserted == 0 {
                return Err(ToolError::Store(format!("order {order_id} does not exist")));
            }
            Ok(())
        })
        .await
    }

    async fn consume_verification_code(&self, order_id: &str, code: &str) -> Result<bool> {
        let order_id = order_id.to_string();
        let code = code.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(CONSUME_ONE_CODE, params![order_id, code])?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn cancel_with_code(
        &self,
        order_id: &str,
        owner: &str,
        code: &str,
    ) -> Result<CancelOutcome> {
        let order_id = order_id.to_string();
        let owner = owner.to_string();
        let code = code.to_string();
        self.with_conn(move |conn| {
            // Take the write lock up front so the status read below cannot go
            // stale before the update.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let row = tx
                .query_row(
                    "SELECT status, total FROM orders WHERE order_id = ?1 AND user_id = ?2",
                    params![order_id, owner],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
                )
                .optional()?;
            let Some((status, total)) = row else {
                return Ok(CancelOutcome::NotFound);
            };
            let status = status.parse::<OrderStatus>().map_err(ToolError::Store)?;
            if !status.is_cancellable() {
                return Ok(CancelOutcome::Blocked(status));
            }

            let deleted = tx.execute(CONSUME_ONE_CODE, params![order_id, code])?;
            if deleted == 0 {
                return Ok(CancelOutcome::BadCode);
            }

            let updated = tx.execute(
                r#"
UPDATE orders
   SET status = ?2, updated_at = CURRENT_TIMESTAMP
 WHERE order_id = ?1 AND status IN (?3, ?4)
"#,
                params![
                    order_id,
                    OrderStatus::Cancelled.as_str(),
                    OrderStatus::Processing.as_str(),
                    OrderStatus::Shipped.as_str(),
                ],
            )?;
            if updated == 0 {
                // Dropping the transaction rolls the code deletion back.
                return Ok(CancelOutcome::Blocked(status));
            }
            tx.commit()?;
            Ok(CancelOutcome::Cancelled { total })
        })
        .await
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        let order_id = order_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE orders SET status = ?2, updated_at = CURRENT_TIMESTAMP WHERE order_id = ?1",
                params![order_id, status.as_str()],
            )?;
            if updated == 0 {
                return Err(ToolError::Store(format!("order {order_id} does not exist")));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for SqliteOrderStore {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserIdentity>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, name, email FROM users WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok(UserIdentity {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            email: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;

    async fn seeded() -> (tempfile::TempDir, SqliteOrderStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteOrderStore::open(tmp.path().join("data").join("orders.db"))
            .await
            .unwrap();
        store
            .seed(seed::demo_users(), seed::demo_orders())
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn seeded_orders_round_trip() {
        let (_tmp, store) = seeded().await;
        let order = store.find_order("ORD-002", None).await.unwrap().expect("order");
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.items, vec!["Mouse".to_string()]);
        assert_eq!(order.date.format("%Y-%m-%d").to_string(), "2024-02-16");
        assert!(order.verification_codes.is_empty());
    }

    #[tokio::test]
    async fn owner_filter_fails_closed() {
        let (_tmp, store) = seeded().await;
        assert!(store.find_order("ORD-005", Some("u-1001")).await.unwrap().is_none());
        assert!(store.find_order("ORD-005", Some("u-1002")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn codes_are_consumed_once() {
        let (_tmp, store) = seeded().await;
        store.append_verification_code("ORD-001", "123456").await.unwrap();

        assert!(!store.consume_verification_code("ORD-001", "000000").await.unwrap());
        assert!(store.consume_verification_code("ORD-001", "123456").await.unwrap());
        assert!(!store.consume_verification_code("ORD-001", "123456").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_spends_the_code_once() {
        let (_tmp, store) = seeded().await;
        store.append_verification_code("ORD-002", "123456").await.unwrap();
        let order = store.find_order("ORD-002", None).await.unwrap().unwrap();
        assert_eq!(order.verification_codes, vec!["123456".to_string()]);

        assert_eq!(
            store.cancel_with_code("ORD-002", "u-1001", "000000").await.unwrap(),
            CancelOutcome::BadCode
        );
        assert_eq!(
            store.cancel_with_code("ORD-002", "u-1002", "123456").await.unwrap(),
            CancelOutcome::NotFound
        );
        assert_eq!(
            store.cancel_with_code("ORD-002", "u-1001", "123456").await.unwrap(),
            CancelOutcome::Cancelled { total: 49.99 }
        );

        let order = store.find_order("ORD-002", None).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.verification_codes.is_empty());
    }

    #[tokio::test]
    async fn blocked_cancel_keeps_the_code() {
        let (_tmp, store) = seeded().await;
        store.append_verification_code("ORD-003", "123456").await.unwrap();
        assert_eq!(
            store.cancel_with_code("ORD-003", "u-1001", "123456").await.unwrap(),
            CancelOutcome::Blocked(OrderStatus::Delivered)
        );
        let order = store.find_order("ORD-003", None).await.unwrap().unwrap();
        assert_eq!(order.verification_codes, vec!["123456".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_cancels_with_two_codes_refund_once() {
        let (_tmp, store) = seeded().await;
        store.append_verification_code("ORD-001", "111111").await.unwrap();
        store.append_verification_code("ORD-001", "222222").await.unwrap();

        let (a, b) = tokio::join!(
            store.cancel_with_code("ORD-001", "u-1001", "111111"),
            store.cancel_with_code("ORD-001", "u-1001", "222222"),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let cancelled = outcomes
            .iter()
            .filter(|o| matches!(o, CancelOutcome::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 1, "{outcomes:?}");
        assert!(outcomes.contains(&CancelOutcome::Blocked(OrderStatus::Cancelled)));

        let order = store.find_order("ORD-001", None).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.verification_codes.len(), 1);
    }

    #[tokio::test]
    async fn append_to_missing_order_fails() {
        let (_tmp, store) = seeded().await;
        let err = store
            .append_verification_code("ORD-404", "123456")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn status_updates_persist_across_handles() {
        let (_tmp, store) = seeded().await;
        store.set_status("ORD-004", OrderStatus::Cancelled).await.unwrap();

        let reopened = SqliteOrderStore::open(store.path().to_path_buf()).await.unwrap();
        let order = reopened.find_order("ORD-004", None).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(reopened.list_orders("u-1001").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn resolves_seeded_users() {
        let (_tmp, store) = seeded().await;
        let user = store.resolve_user("u-1002").await.unwrap().expect("user");
        assert_eq!(user.name, "Grace Hopper");
        assert!(store.resolve_user("u-9999").await.unwrap().is_none());
    }
}
