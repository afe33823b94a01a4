//! Direct tool access for clients that drive the order tools themselves.
//!
//! Tools run as the acting user under the same ownership rules the agent
//! gets. Resources are read-only order views scoped the same way: another
//! user's orders are reported as missing.

use super::ApiError;
use crate::error::DeskError;
use crate::http_auth::ActingUser;
use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Extension, Json};
use desk_tools::Order;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const ORDERS_URI: &str = "orders://";
const ORDER_URI: &str = "order://";

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    tool_name: String,
    #[serde(default)]
    params: Map<String, Value>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/mcp/tools", get(list_tools))
        .route("/api/mcp/tools/execute", post(execute_tool))
        .route("/api/mcp/resources", get(list_resources))
        .route("/api/mcp/resources/{*uri}", get(get_resource))
        .route("/api/mcp/health", get(get_health))
}

fn resource_catalog() -> Value {
    json!([
        {
            "uri": "orders://{user_id}",
            "name": "User Orders",
            "description": "All orders for a specific user",
            "mime_type": "application/json"
        },
        {
            "uri": "order://{order_id}",
            "name": "Order Details",
            "description": "Detailed information about a specific order",
            "mime_type": "application/json"
        }
    ])
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_tools(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let tools: Vec<Value> = state
        .tools
        .definitions()
        .iter()
        .map(|def| {
            json!({
                "name": def.name,
                "description": def.description,
                "input_schema": def.parameters,
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

/// Run one tool by name. Structured failures come back with a 200 and
/// `success: false`; only an unknown tool or a broken store is an HTTP error.
#[tracing::instrument(level = "info", skip_all)]
async fn execute_tool(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = req.tool_name.trim();
    if state.tools.get(name).is_none() {
        tracing::warn!(tool = name, "direct call to unknown tool");
        return Err(ApiError::NotFound(format!("Tool {name} not found")));
    }

    let arguments = Value::Object(req.params).to_string();
    let outcome = state
        .tools
        .execute(name, &arguments, actor.identity())
        .await
        .map_err(DeskError::from)?;
    tracing::info!(
        tool = name,
        user_id = actor.identity().map(|u| u.id.as_str()).unwrap_or("anonymous"),
        success = outcome.is_success(),
        failure_kind = ?outcome.failure_kind(),
        "tool executed directly"
    );
    Ok(Json(json!({
        "success": outcome.is_success(),
        "result": outcome.to_result_json(),
    })))
}

async fn list_resources() -> Json<Value> {
    Json(json!({ "resources": resource_catalog() }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_resource(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
    Path(uri): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let not_found = || ApiError::NotFound(format!("Resource not found: {uri}"));
    let Some(actor) = actor.identity() else {
        return Err(not_found());
    };

    let data = if let Some(user_id) = uri.strip_prefix(ORDERS_URI) {
        if user_id != actor.id {
            return Err(not_found());
        }
        let orders = state
            .orders
            .list_orders(&actor.id)
            .await
            .map_err(DeskError::from)?;
        let orders: Vec<Value> = orders.iter().map(Order::summary_view).collect();
        json!({ "user_id": actor.id, "orders": orders })
    } else if let Some(order_id) = uri.strip_prefix(ORDER_URI) {
        state
            .orders
            .find_order(order_id, Some(&actor.id))
            .await
            .map_err(DeskError::from)?
            .ok_or_else(not_found)?
            .public_view()
    } else {
        return Err(not_found());
    };
    Ok(Json(json!({ "success": true, "data": data })))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let tools = state.tools.definitions().len();
    let resources = resource_catalog().as_array().map_or(0, Vec::len);
    let pending = state.desk.pending_approvals();
    Json(json!({
        "status": "ok",
        "message": format!(
            "MCP server is running with {tools} tools, {resources} resources, and {pending} pending approvals"
        ),
    }))
}

#[cfg(test)]
mod tests {
    use crate::server::{test_app, test_state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use desk_tools::OrderStatus;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => req.body(Body::empty()).expect("request"),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&body).expect("json")
    }

    #[tokio::test]
    async fn lists_the_order_tools_with_schemas() {
        let response = test_app(test_state(vec![]))
            .oneshot(request("GET", "/api/mcp/tools", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let tools = body["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 4);
        let cancel = tools
            .iter()
            .find(|t| t["name"] == "cancel_order_with_verification")
            .expect("cancel tool");
        assert_eq!(
            cancel["input_schema"]["required"],
            json!(["order_id", "verification_code"])
        );
    }

    #[tokio::test]
    async fn executes_a_tool_as_the_acting_user() {
        let app = test_app(test_state(vec![]));
        let call = json!({ "tool_name": "get_order_status", "params": { "order_id": "ORD-001" } });

        let response = app
            .clone()
            .oneshot(request("POST", "/api/mcp/tools/execute", Some("u-1001"), Some(call.clone())))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["order"]["status"], "processing");

        let response = app
            .oneshot(request("POST", "/api/mcp/tools/execute", Some("u-1002"), Some(call)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["result"]["error"], "Order not found");
    }

    #[tokio::test]
    async fn direct_cancellation_spends_an_issued_code() {
        let state = test_state(vec![]);
        state
            .orders
            .append_verification_code("ORD-002", "654321")
            .await
            .unwrap();
        let response = test_app(state.clone())
            .oneshot(request(
                "POST",
                "/api/mcp/tools/execute",
                Some("u-1001"),
                Some(json!({
                    "tool_name": "cancel_order_with_verification",
                    "params": { "order_id": "ORD-002", "verification_code": "654321" }
                })),
            ))
            .await
            .expect("response");
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["refund_amount"], 49.99);

        let order = state.orders.find_order("ORD-002", None).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn unknown_tool_is_404() {
        let response = test_app(test_state(vec![]))
            .oneshot(request(
                "POST",
                "/api/mcp/tools/execute",
                Some("u-1001"),
                Some(json!({ "tool_name": "refund_everything" })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "error", "error": "Tool refund_everything not found" })
        );
    }

    #[tokio::test]
    async fn resources_are_scoped_to_the_caller() {
        let app = test_app(test_state(vec![]));

        let response = app
            .clone()
            .oneshot(request("GET", "/api/mcp/resources/orders://u-1001", Some("u-1001"), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["user_id"], "u-1001");
        assert_eq!(body["data"]["orders"].as_array().map(Vec::len), Some(4));

        let response = app
            .clone()
            .oneshot(request("GET", "/api/mcp/resources/order://ORD-005", Some("u-1002"), None))
            .await
            .expect("response");
        let body = json_body(response).await;
        assert_eq!(body["data"]["customer"], "Grace Hopper");
        assert!(body["data"].get("verification_codes").is_none());

        for (uri, user) in [
            ("/api/mcp/resources/orders://u-1002", Some("u-1001")),
            ("/api/mcp/resources/order://ORD-005", Some("u-1001")),
            ("/api/mcp/resources/order://ORD-005", None),
            ("/api/mcp/resources/invoice://1", Some("u-1001")),
        ] {
            let response = app
                .clone()
                .oneshot(request("GET", uri, user, None))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn health_counts_tools_resources_and_pending_approvals() {
        let app = test_app(test_state(vec![]));
        let response = app
            .clone()
            .oneshot(request("GET", "/api/mcp/resources", None, None))
            .await
            .expect("response");
        let body = json_body(response).await;
        assert_eq!(body["resources"][0]["uri"], "orders://{user_id}");

        let response = app
            .oneshot(request("GET", "/api/mcp/health", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "status": "ok",
                "message": "MCP server is running with 4 tools, 2 resources, and 0 pending approvals"
            })
        );
    }
}
