//! Support desk configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a customer support agent for an online store. You help customers check on their orders and cancel orders when they ask.

You can look up the status of an order, list the customer's orders, and cancel an order after the customer confirms with a verification code.

CANCELLATION PROCESS:
1. When a customer asks to cancel an order, call generate_cancellation_code with the order ID.
2. A 6-digit verification code is emailed to the customer and they are asked to enter it.
3. Once the customer has entered the code, call cancel_order_with_verification with the order ID and that code.
4. Tell the customer whether the cancellation succeeded and, if it did, the refund amount.

GUARDRAILS:
- Only discuss orders that belong to the current customer.
- Never guess or invent a verification code, and never reveal one.
- Only orders with status 'processing' or 'shipped' can be cancelled.
- If a tool reports an error, explain it plainly and suggest what the customer can do next.
- Keep answers short and friendly."#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeskConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
}

fn default_model() -> String {
    "x-ai/grok-code-fast-1".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_llm_base_url() -> String {
    desk_llm::DEFAULT_BASE_URL.to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            llm_base_url: default_llm_base_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openrouter_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_origins: default_cors_origins(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// LLM calls allowed in a single run before it is reported as failed.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
    /// Per-session event buffer bound. 0 keeps every event.
    #[serde(default)]
    pub max_buffered_events: usize,
}

fn default_max_iterations() -> usize {
    8
}

fn default_keepalive_seconds() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            keepalive_seconds: default_keepalive_seconds(),
            max_buffered_events: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default = "default_seed_demo_data")]
    pub seed_demo_data: bool,
}

fn default_seed_demo_data() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: None,
            seed_demo_data: default_seed_demo_data(),
        }
    }
}

impl StoreConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        match self.sqlite_path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => expand_home(p),
            _ => default_data_dir().join("orders.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyBackend {
    #[default]
    Log,
    Gmail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub backend: NotifyBackend,
    #[serde(default)]
    pub gmail_access_token: String,
}

impl DeskConfig {
    /// Load from `path` (or the default location). A missing file yields the
    /// defaults; a malformed one is an error.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("SUPPORTDESK_MODEL") {
            self.general.model = v;
        }
        if let Some(v) = var("OPENROUTER_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.keys.openrouter_api_key = Some(v);
        }
        if let Some(v) = var("SUPPORTDESK_PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring invalid SUPPORTDESK_PORT"),
            }
        }
        if let Some(v) = var("SUPPORTDESK_STORE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                other => tracing::warn!(value = other, "ignoring unknown SUPPORTDESK_STORE"),
            }
        }
        if let Some(v) = var("SUPPORTDESK_SQLITE_PATH") {
            self.store.sqlite_path = Some(v);
        }
        if let Some(v) = var("GMAIL_ACCESS_TOKEN") {
            self.notify.gmail_access_token = v;
            self.notify.backend = NotifyBackend::Gmail;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.general.llm_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("general.llm_base_url is required"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.agent.max_iterations == 0 {
            return Err(anyhow::anyhow!("agent.max_iterations must be > 0"));
        }
        if self.agent.keepalive_seconds == 0 {
            return Err(anyhow::anyhow!("agent.keepalive_seconds must be > 0"));
        }
        if self.store.backend == StoreBackend::Sqlite
            && self
                .store
                .sqlite_path
                .as_deref()
                .is_some_and(|p| p.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "store.sqlite_path must not be empty when store.backend = \"sqlite\""
            ));
        }
        if self.notify.backend == NotifyBackend::Gmail
            && self.notify.gmail_access_token.trim().is_empty()
        {
            return Err(anyhow::anyhow!(
                "notify.gmail_access_token is required when notify.backend = \"gmail\""
            ));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Option<String> {
        self.keys
            .openrouter_api_key
            .clone()
            .filter(|s| !s.trim().is_empty())
    }
}

pub fn default_config_path() -> PathBuf {
    home_dir().join(".supportdesk").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    home_dir().join(".supportdesk").join("data")
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => Path::new(path).to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gets_every_default() {
        let cfg = DeskConfig::from_toml("").unwrap();
        assert_eq!(cfg.general.model, "x-ai/grok-code-fast-1");
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.agent.max_iterations, 8);
        assert_eq!(cfg.agent.keepalive_seconds, 30);
        assert_eq!(cfg.agent.max_buffered_events, 0);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert!(cfg.store.seed_demo_data);
        assert_eq!(cfg.notify.backend, NotifyBackend::Log);
        assert!(cfg.general.system_prompt.contains("CANCELLATION PROCESS"));
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_partial_sections() {
        let cfg = DeskConfig::from_toml(
            r#"
[server]
port = 9001

[agent]
max_iterations = 3
max_buffered_events = 64

[store]
backend = "sqlite"
sqlite_path = "/tmp/orders.db"
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9001);
        assert_eq!(cfg.server.http_timeout_seconds, 30);
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.keepalive_seconds, 30);
        assert_eq!(cfg.agent.max_buffered_events, 64);
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.store.sqlite_path(), PathBuf::from("/tmp/orders.db"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_blanks() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SUPPORTDESK_MODEL", "openai/gpt-4o-mini"),
            ("OPENAI_API_KEY", "sk-fallback"),
            ("SUPPORTDESK_PORT", "not-a-port"),
            ("SUPPORTDESK_STORE", "sqlite"),
            ("GMAIL_ACCESS_TOKEN", "  "),
        ]);
        let mut cfg = DeskConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.general.model, "openai/gpt-4o-mini");
        assert_eq!(cfg.api_key().as_deref(), Some("sk-fallback"));
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.notify.backend, NotifyBackend::Log);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = DeskConfig::default();
        cfg.agent.max_iterations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = DeskConfig::default();
        cfg.notify.backend = NotifyBackend::Gmail;
        assert!(cfg.validate().is_err());
        cfg.notify.gmail_access_token = "token".to_string();
        cfg.validate().unwrap();
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = DeskConfig::load(Some(tmp.path().join("absent.toml")))
            .await
            .unwrap();
        assert!(cfg.general.llm_base_url.starts_with("https://"));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "[server\nport = ").await.unwrap();
        let err = DeskConfig::load(Some(path)).await.unwrap_err();
        assert!(err.to_string().contains("parse config"));
    }
}
