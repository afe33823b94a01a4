//! Support desk server.
//!
//! Builds the collaborators named in config, wires them into a
//! `SupportDesk` and mounts the HTTP routes on top.

use crate::agent::SupportAgent;
use crate::config::{DeskConfig, NotifyBackend, StoreBackend};
use crate::desk::SupportDesk;
use crate::events::EventChannel;
use crate::http_auth;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use desk_llm::{ChatModel, LlmClient};
use desk_tools::{
    GmailNotifier, InMemoryOrderStore, LogNotifier, Notifier, OrderStore, SqliteOrderStore,
    ToolRegistry, UserDirectory, order_tools, seed,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub desk: Arc<SupportDesk>,
    pub events: Arc<EventChannel>,
    pub tools: Arc<ToolRegistry>,
    pub orders: Arc<dyn OrderStore>,
    pub model: String,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = DeskConfig::load(config_path).await?;
    if cfg.api_key().is_none() {
        tracing::warn!("no LLM api key configured (keys.openrouter_api_key or OPENROUTER_API_KEY)");
    }
    let registry = build_registry(Arc::new(InMemoryOrderStore::new()), Arc::new(LogNotifier))?;
    tracing::info!(
        model = %cfg.general.model,
        llm_base_url = %cfg.general.llm_base_url,
        api_key_configured = cfg.api_key().is_some(),
        port = cfg.server.port,
        store_backend = ?cfg.store.backend,
        sqlite_path = %cfg.store.sqlite_path().display(),
        notify_backend = ?cfg.notify.backend,
        max_iterations = cfg.agent.max_iterations,
        keepalive_seconds = cfg.agent.keepalive_seconds,
        tools = ?registry.names(),
        "config ok"
    );
    Ok(())
}

/// Write the demo users and orders into the SQLite store, replacing what is
/// there.
pub async fn seed_store(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = DeskConfig::load(config_path).await?;
    let store = SqliteOrderStore::open(cfg.store.sqlite_path()).await?;
    let (users, orders) = (seed::demo_users(), seed::demo_orders());
    let (user_count, order_count) = (users.len(), orders.len());
    store.seed(users, orders).await?;
    tracing::info!(
        path = %store.path().display(),
        user_count,
        order_count,
        "demo data seeded"
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = DeskConfig::load(config_path).await?;
    let started_at = Instant::now();
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    tracing::info!(
        bind_addr = %addr,
        model = %cfg.general.model,
        llm_base_url = %cfg.general.llm_base_url,
        store_backend = ?cfg.store.backend,
        notify_backend = ?cfg.notify.backend,
        cors_origins = ?cfg.server.cors_origins,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        max_iterations = cfg.agent.max_iterations,
        keepalive_seconds = cfg.agent.keepalive_seconds,
        max_buffered_events = cfg.agent.max_buffered_events,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let (orders, users) = build_store(&cfg).await?;
    let notifier = build_notifier(&cfg)?;
    let registry = Arc::new(build_registry(orders.clone(), notifier)?);

    let api_key = cfg.api_key().ok_or_else(|| {
        anyhow::anyhow!("an LLM api key is required (keys.openrouter_api_key or OPENROUTER_API_KEY)")
    })?;
    let llm = LlmClient::new(&api_key, &cfg.general.model, Some(cfg.general.llm_base_url.as_str()))?;
    tracing::info!(model = %llm.model(), base_url = %llm.base_url(), "llm client ready");

    let events = Arc::new(EventChannel::new(cfg.agent.max_buffered_events));
    let agent = Arc::new(SupportAgent::new(
        Arc::new(llm),
        registry.clone(),
        events.clone(),
        cfg.general.system_prompt.clone(),
        cfg.agent.max_iterations,
    ));
    let desk = Arc::new(SupportDesk::new(
        agent,
        events.clone(),
        users,
        Duration::from_secs(cfg.agent.keepalive_seconds),
    ));
    let state = Arc::new(AppState {
        desk,
        events,
        tools: registry,
        orders,
        model: cfg.general.model.clone(),
        started_at,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<axum::body::Body>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<axum::body::Body>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(|response: &Response, latency: Duration, _span: &tracing::Span| {
            tracing::info!(
                status = response.status().as_u16(),
                latency_ms = latency.as_millis() as u64,
                "http request completed"
            );
        })
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = router(state)
        .layer(build_cors(&cfg.server.cors_origins))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let shutdown = CancellationToken::new();
    tracing::info!(%addr, "supportdesk serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

/// Routes plus the middleware every route relies on.
fn router(state: Arc<AppState>) -> Router {
    routes::router()
        .layer(axum::middleware::from_fn(http_auth::resolve_acting_user))
        .layer(Extension(state))
}

async fn build_store(
    cfg: &DeskConfig,
) -> Result<(Arc<dyn OrderStore>, Arc<dyn UserDirectory>)> {
    match cfg.store.backend {
        StoreBackend::Memory => {
            let store = if cfg.store.seed_demo_data {
                InMemoryOrderStore::with_data(seed::demo_users(), seed::demo_orders())
            } else {
                InMemoryOrderStore::new()
            };
            tracing::info!(order_count = store.order_count(), "in-memory order store ready");
            let store = Arc::new(store);
            let orders: Arc<dyn OrderStore> = store.clone();
            let users: Arc<dyn UserDirectory> = store;
            Ok((orders, users))
        }
        StoreBackend::Sqlite => {
            let path = cfg.store.sqlite_path();
            let fresh = !tokio::fs::try_exists(&path).await.unwrap_or(false);
            let store = SqliteOrderStore::open(path).await?;
            // Existing databases keep their data across restarts.
            if fresh && cfg.store.seed_demo_data {
                store.seed(seed::demo_users(), seed::demo_orders()).await?;
                tracing::info!(path = %store.path().display(), "seeded new sqlite store with demo data");
            }
            tracing::info!(path = %store.path().display(), fresh, "sqlite order store ready");
            let store = Arc::new(store);
            let orders: Arc<dyn OrderStore> = store.clone();
            let users: Arc<dyn UserDirectory> = store;
            Ok((orders, users))
        }
    }
}

fn build_notifier(cfg: &DeskConfig) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match cfg.notify.backend {
        NotifyBackend::Log => Arc::new(LogNotifier),
        NotifyBackend::Gmail => Arc::new(GmailNotifier::new(&cfg.notify.gmail_access_token)?),
    };
    tracing::info!(backend = notifier.backend(), "notifier ready");
    Ok(notifier)
}

fn build_registry(orders: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Result<ToolRegistry> {
    let registry = ToolRegistry::new(order_tools(orders, notifier))
        .map_err(|e| anyhow::anyhow!("tool registry preflight failed: {e}"))?;
    tracing::info!(tools = ?registry.names(), "tool registry ready");
    Ok(registry)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            http_auth::USER_ID_HEADER,
        ]);
    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "ignoring invalid cors origin");
                None
            }
        })
        .collect();
    cors.allow_origin(parsed)
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}

/// State over the demo store, a log notifier and a scripted model.
#[cfg(test)]
pub(crate) fn test_state(
    script: Vec<desk_llm::Result<desk_llm::ChatResponse>>,
) -> Arc<AppState> {
    use crate::test_support::{ScriptedModel, desk_tools_fixture};

    let events = Arc::new(EventChannel::unbounded());
    let (store, registry) = desk_tools_fixture();
    let model = ScriptedModel::new(script);
    let model_name = model.model().to_string();
    let agent = Arc::new(SupportAgent::new(
        Arc::new(model),
        registry.clone(),
        events.clone(),
        "BASE",
        8,
    ));
    let desk = Arc::new(SupportDesk::new(
        agent,
        events.clone(),
        store.clone(),
        Duration::from_secs(30),
    ));
    Arc::new(AppState {
        desk,
        events,
        tools: registry,
        orders: store,
        model: model_name,
        started_at: Instant::now(),
    })
}

#[cfg(test)]
pub(crate) fn test_app(state: Arc<AppState>) -> Router {
    router(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_skips_invalid_origins() {
        // Builds without panicking; invalid entries are dropped with a warning.
        let _ = build_cors(&["http://localhost:3000".to_string(), "bad\norigin".to_string()]);
        let _ = build_cors(&[]);
    }

    #[test]
    fn request_id_defaults_to_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id_from_headers(&headers), "missing");
        headers.insert("x-request-id", "abc".parse().unwrap());
        assert_eq!(request_id_from_headers(&headers), "abc");
    }

    #[tokio::test]
    async fn memory_store_is_seeded_when_configured() {
        let mut cfg = DeskConfig::default();
        cfg.store.seed_demo_data = true;
        let (orders, users) = build_store(&cfg).await.unwrap();
        assert!(orders.find_order("ORD-001", None).await.unwrap().is_some());
        assert!(users.resolve_user("u-1001").await.unwrap().is_some());

        cfg.store.seed_demo_data = false;
        let (orders, _) = build_store(&cfg).await.unwrap();
        assert!(orders.find_order("ORD-001", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_store_seeds_only_a_new_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DeskConfig::default();
        cfg.store.backend = StoreBackend::Sqlite;
        cfg.store.sqlite_path = Some(dir.path().join("orders.db").display().to_string());

        let (orders, _) = build_store(&cfg).await.unwrap();
        orders
            .set_status("ORD-001", desk_tools::OrderStatus::Cancelled)
            .await
            .unwrap();

        let (orders, _) = build_store(&cfg).await.unwrap();
        let order = orders.find_order("ORD-001", None).await.unwrap().unwrap();
        assert_eq!(order.status, desk_tools::OrderStatus::Cancelled);
    }

    #[test]
    fn registry_exposes_the_four_order_tools() {
        let registry =
            build_registry(Arc::new(InMemoryOrderStore::new()), Arc::new(LogNotifier)).unwrap();
        assert_eq!(registry.names().len(), 4);
    }
}
