use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::warn;

pub const ENV_PREFIX: &str = "OPENCLAW_DASH_";
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_DASH_GATEWAY_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub ws_url: String,
    /// Base url of the gateway's HTTP side; `/health` is appended for status checks.
    pub http_url: String,
    /// Sent as the `Origin` header on the upstream socket. Empty disables it.
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Environment variable holding the token (preferred over storing secrets on disk).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    pub client_id: String,
    pub client_version: String,
    pub client_mode: String,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    pub max_receive_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:18789".to_string(),
            http_url: "http://127.0.0.1:18789".to_string(),
            origin: "http://localhost:8765".to_string(),
            token: None,
            token_env: None,
            client_id: "cli".to_string(),
            client_version: "2.0.0".to_string(),
            client_mode: "cli".to_string(),
            connect_timeout_ms: 3_000,
            handshake_timeout_ms: 5_000,
            receive_timeout_ms: 60_000,
            max_receive_attempts: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Defaults to `<openclaw_dir>/logs/cache-trace.jsonl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<PathBuf>,
    pub cache_ttl_secs: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            trace_file: None,
            cache_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openclaw_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub gateway: GatewayConfig,
    pub usage: UsageConfig,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            openclaw_dir: None,
            host: "127.0.0.1".to_string(),
            port: 8765,
            log_level: None,
            gateway: GatewayConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl DashConfig {
    pub fn openclaw_dir(&self) -> PathBuf {
        match &self.openclaw_dir {
            Some(dir) => expand_tilde(dir),
            None => home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".openclaw"),
        }
    }

    pub fn trace_file(&self) -> PathBuf {
        match &self.usage.trace_file {
            Some(path) => expand_tilde(path),
            None => self.openclaw_dir().join("logs").join("cache-trace.jsonl"),
        }
    }

    pub fn usage_ttl(&self) -> Duration {
        Duration::from_secs(self.usage.cache_ttl_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| non_empty(lookup(&format!("{ENV_PREFIX}{name}")));
        if let Some(dir) = var("OPENCLAW_DIR") {
            self.openclaw_dir = Some(PathBuf::from(dir));
        }
        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(p) => self.port = p,
                Err(_) => warn!("ignoring invalid {ENV_PREFIX}PORT value {:?}", port),
            }
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        if let Some(url) = var("GATEWAY_URL") {
            self.gateway.http_url = url;
        }
        if let Some(url) = var("GATEWAY_WS_URL") {
            self.gateway.ws_url = url;
        }
    }

    /// Gateway token and a label for where it came from.
    pub fn resolve_gateway_token(&self) -> (Option<String>, String) {
        self.resolve_gateway_token_from(|key| env::var(key).ok())
    }

    fn resolve_gateway_token_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> (Option<String>, String) {
        if let Some(token) = non_empty(self.gateway.token.clone()) {
            return (Some(token), "inline".to_string());
        }
        if let Some(env_name) = self.gateway.token_env.as_deref()
            && let Some(v) = non_empty(lookup(env_name))
        {
            return (Some(v), format!("env:{env_name}"));
        }
        if let Some(v) = non_empty(lookup(GATEWAY_TOKEN_ENV)) {
            return (Some(v), format!("env:{GATEWAY_TOKEN_ENV}"));
        }
        let openclaw_json = self.openclaw_dir().join("openclaw.json");
        if let Some(token) = read_openclaw_token(&openclaw_json) {
            return (Some(token), openclaw_json.display().to_string());
        }
        (None, "none".to_string())
    }
}

/// `gateway.auth.token` from the platform's own settings file.
fn read_openclaw_token(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let v: JsonValue = serde_json::from_slice(&bytes).ok()?;
    let token = v.get("gateway")?.get("auth")?.get("token")?.as_str()?;
    non_empty(Some(token.to_string()))
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Home of clawdash's own files (config, logs).
pub fn dash_home_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clawdash")
}

fn config_toml_path() -> PathBuf {
    dash_home_dir().join("config.toml")
}

fn config_toml_backup_path() -> PathBuf {
    dash_home_dir().join("config.toml.bak")
}

pub fn config_file_path() -> PathBuf {
    config_toml_path()
}

const CONFIG_TOML_TEMPLATE: &str = r#"# clawdash configuration
#
# Every key is optional. Environment variables prefixed with OPENCLAW_DASH_ override the file
# (OPENCLAW_DIR, HOST, PORT, LOG_LEVEL, GATEWAY_URL, GATEWAY_WS_URL, GATEWAY_TOKEN).

# Where OpenClaw keeps its state. The usage log is read from <openclaw_dir>/logs/cache-trace.jsonl.
# openclaw_dir = "~/.openclaw"

host = "127.0.0.1"
port = 8765
# log_level = "info"

[gateway]
ws_url = "ws://127.0.0.1:18789"
http_url = "http://127.0.0.1:18789"
origin = "http://localhost:8765"
# Token lookup order: token, token_env, OPENCLAW_DASH_GATEWAY_TOKEN, <openclaw_dir>/openclaw.json.
# token_env = "OPENCLAW_GATEWAY_TOKEN"
connect_timeout_ms = 3000
handshake_timeout_ms = 5000
receive_timeout_ms = 60000
max_receive_attempts = 200

[usage]
# trace_file = "~/.openclaw/logs/cache-trace.jsonl"
cache_ttl_secs = 60
"#;

pub async fn init_config_toml(force: bool) -> Result<PathBuf> {
    let dir = dash_home_dir();
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("create {}", dir.display()))?;
    let path = config_toml_path();
    let backup_path = config_toml_backup_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config.toml already exists at {:?}; use --force to overwrite",
            path
        );
    }

    if path.exists()
        && let Err(err) = fs::copy(&path, &backup_path).await
    {
        warn!("failed to backup {:?} to {:?}: {}", path, backup_path, err);
    }

    let tmp_path = dir.join("config.toml.tmp");
    fs::write(&tmp_path, CONFIG_TOML_TEMPLATE.as_bytes()).await?;
    fs::rename(&tmp_path, &path).await?;
    Ok(path)
}

pub fn parse_config_toml(text: &str) -> Result<DashConfig> {
    toml::from_str::<DashConfig>(text).context("parse config.toml")
}

/// File (if any) plus environment overrides.
pub async fn load_config() -> Result<DashConfig> {
    let path = config_toml_path();
    let mut cfg = if path.exists() {
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        parse_config_toml(&text).with_context(|| format!("in {}", path.display()))?
    } else {
        DashConfig::default()
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}

/// Masks all but the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}
