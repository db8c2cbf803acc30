use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Protocol constants — wire behavior clients depend on
pub const DEFAULT_PORT: u16 = 18620;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per frame
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30; // client ping cadence
pub const PRESENCE_OFFLINE_AFTER_SECS: u64 = 90; // no pings for this long => offline
pub const TYPING_TTL_SECS: u64 = 3; // typing flag expiry
pub const TYPING_REBROADCAST_SECS: u64 = 1; // typing rebroadcast throttle
pub const ROOM_QUEUE_BOUND: usize = 1000; // per-room broadcast queue depth
pub const ROOM_QUEUE_PAUSE_MS: u64 = 5_000; // sender pause bound before close
pub const AI_STREAM_CHUNK_BYTES: usize = 2 * 1024; // max ai_stream chunk size

/// The assistant trigger token, matched case-insensitively and word-bounded.
pub const ASSISTANT_TRIGGER: &str = "@mathia";

/// Idempotency keys for message sends are remembered this long.
pub const IDEMPOTENCY_TTL_SECS: u64 = 600;

/// Top-level config (mathia.toml + MATHIA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathiaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
}

impl Default for MathiaConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            keystore: KeystoreConfig::default(),
            llm: LlmConfig::default(),
            limits: LimitsConfig::default(),
            connectors: ConnectorsConfig::default(),
            webhooks: WebhooksConfig::default(),
            uploads: UploadsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Envelope-encryption key material. The master key is required in
/// production; legacy keys allow decryption across rotations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeystoreConfig {
    /// Base64-encoded 256-bit master key. Env: MATHIA_KEYSTORE_MASTER_KEY.
    pub master_key: Option<String>,
    /// Base64-encoded previous master keys, newest first.
    #[serde(default)]
    pub legacy_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub primary: Option<LlmProviderConfig>,
    pub secondary: Option<LlmProviderConfig>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// "anthropic" or "openai" (covers OpenAI-compatible endpoints).
    pub kind: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Throttling and backpressure tunables. Serde defaults carry the
/// documented values so a bare config file gets the contract behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-(user, room) message sends per window.
    #[serde(default = "default_messages_per_window")]
    pub messages_per_window: u32,
    #[serde(default = "default_message_window_secs")]
    pub message_window_secs: u64,
    /// Per-(user, connector) operations per window.
    #[serde(default = "default_connector_ops_per_window")]
    pub connector_ops_per_window: u32,
    #[serde(default = "default_connector_window_secs")]
    pub connector_window_secs: u64,
    /// Outbound messaging (email/whatsapp) per user per day.
    #[serde(default = "default_messaging_daily_quota")]
    pub messaging_daily_quota: u32,
    /// Per-connector execute deadline.
    #[serde(default = "default_connector_deadline_secs")]
    pub connector_deadline_secs: u64,
    /// Default connector result cache TTL.
    #[serde(default = "default_connector_ttl_secs")]
    pub connector_cache_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_window: default_messages_per_window(),
            message_window_secs: default_message_window_secs(),
            connector_ops_per_window: default_connector_ops_per_window(),
            connector_window_secs: default_connector_window_secs(),
            messaging_daily_quota: default_messaging_daily_quota(),
            connector_deadline_secs: default_connector_deadline_secs(),
            connector_cache_ttl_secs: default_connector_ttl_secs(),
        }
    }
}

/// Upstream endpoints for connector adapters. Each entry is optional — a
/// connector without its upstream configured reports upstream_failure and
/// falls back where a fallback is declared.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectorsConfig {
    pub travel_base_url: Option<String>,
    pub calendar_base_url: Option<String>,
    pub whatsapp_base_url: Option<String>,
    pub whatsapp_token: Option<String>,
    pub mail_base_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub weather_base_url: Option<String>,
    pub currency_base_url: Option<String>,
    pub gif_base_url: Option<String>,
    pub gif_api_key: Option<String>,
    pub websearch_base_url: Option<String>,
    pub moderation_base_url: Option<String>,
}

/// Configuration for a single webhook ingress provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookProviderConfig {
    /// Identifier used in the route, e.g. "twilio" → POST /webhooks/twilio/.
    pub name: String,
    /// HMAC-SHA256 signing secret.
    pub secret: String,
    /// Header carrying the hex digest (default: X-Signature-256).
    pub signature_header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub providers: Vec<WebhookProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    #[serde(default = "default_upload_root")]
    pub root: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            root: default_upload_root(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mathia/mathia.db", home)
}
fn default_upload_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mathia/uploads", home)
}
fn default_messages_per_window() -> u32 {
    30
}
fn default_message_window_secs() -> u64 {
    60
}
fn default_connector_ops_per_window() -> u32 {
    100
}
fn default_connector_window_secs() -> u64 {
    3600
}
fn default_messaging_daily_quota() -> u32 {
    50
}
fn default_connector_deadline_secs() -> u64 {
    15
}
fn default_connector_ttl_secs() -> u64 {
    3600
}

impl MathiaConfig {
    /// Load config from a TOML file with MATHIA_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.mathia/mathia.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MathiaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MATHIA_").split("_"))
            .extract()
            .map_err(|e| crate::error::MathiaError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mathia/mathia.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_documented_values() {
        let cfg = MathiaConfig::default();
        assert_eq!(cfg.limits.messages_per_window, 30);
        assert_eq!(cfg.limits.message_window_secs, 60);
        assert_eq!(cfg.limits.connector_ops_per_window, 100);
        assert_eq!(cfg.limits.connector_window_secs, 3600);
        assert_eq!(cfg.limits.connector_deadline_secs, 15);
        assert_eq!(cfg.limits.connector_cache_ttl_secs, 3600);
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
    }
}
