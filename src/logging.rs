use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::dash_home_dir;

fn env_bool(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

pub fn log_dir() -> PathBuf {
    dash_home_dir().join("logs")
}

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Level from the config file; `RUST_LOG` and `OPENCLAW_DASH_LOG_LEVEL` take precedence.
    pub config_level: Option<String>,
    pub log_to_file: bool,
}

impl LoggingOptions {
    pub fn from_env(config_level: Option<String>) -> Self {
        Self {
            config_level,
            log_to_file: env_bool("OPENCLAW_DASH_LOG_FILE").unwrap_or(false),
        }
    }
}

fn filter_directive(opt: &LoggingOptions) -> String {
    std::env::var("OPENCLAW_DASH_LOG_LEVEL")
        .ok()
        .or_else(|| opt.config_level.clone())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Installs the global subscriber. Keep the returned guard alive for file logging to flush.
pub fn init_tracing(opt: &LoggingOptions) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(opt)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if opt.log_to_file {
        let dir = log_dir();
        if fs::create_dir_all(&dir).is_ok() {
            let appender = tracing_appender::rolling::daily(&dir, "clawdash.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr.and(file_writer))
                .init();
            return Some(guard);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChatLogOptions {
    enabled: bool,
    max_bytes: u64,
    max_files: usize,
}

impl Default for ChatLogOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

fn chat_log_options() -> ChatLogOptions {
    static OPT: OnceLock<ChatLogOptions> = OnceLock::new();
    *OPT.get_or_init(|| {
        let defaults = ChatLogOptions::default();
        ChatLogOptions {
            enabled: env_bool("OPENCLAW_DASH_CHAT_LOG").unwrap_or(defaults.enabled),
            max_bytes: env_parse::<u64>("OPENCLAW_DASH_CHAT_LOG_MAX_BYTES")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_bytes),
            max_files: env_parse::<usize>("OPENCLAW_DASH_CHAT_LOG_MAX_FILES")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_files),
        }
    })
}

fn chat_log_path() -> PathBuf {
    log_dir().join("chat.jsonl")
}

fn log_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    OneShot,
    Stream,
    Interactive,
    Cli,
}

/// One finished chat exchange. Message text is never logged.
#[derive(Debug, Clone, Serialize)]
pub struct ChatLogEntry {
    pub timestamp_ms: u64,
    pub mode: ChatMode,
    pub session_key: String,
    /// `ok` or an error code such as `gateway_unavailable`.
    pub outcome: String,
    pub duration_ms: u64,
    pub response_chars: usize,
}

impl ChatLogEntry {
    pub fn new(
        mode: ChatMode,
        session_key: &str,
        outcome: &str,
        duration_ms: u64,
        response_chars: usize,
    ) -> Self {
        Self {
            timestamp_ms: now_ms(),
            mode,
            session_key: session_key.to_string(),
            outcome: outcome.to_string(),
            duration_ms,
            response_chars,
        }
    }
}

fn rotate_and_prune_if_needed(path: &Path, opt: ChatLogOptions) {
    if opt.max_bytes == 0 {
        return;
    }
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    if meta.len() < opt.max_bytes {
        return;
    }

    let prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chat");
    let rotated_path = path.with_file_name(format!("{prefix}.{}.jsonl", now_ms()));
    let _ = fs::rename(path, &rotated_path);

    let Some(dir) = path.parent() else {
        return;
    };
    let Ok(rd) = fs::read_dir(dir) else {
        return;
    };
    let mut rotated: Vec<PathBuf> = rd
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|s| s.starts_with(&format!("{prefix}.")) && s.ends_with(".jsonl"))
                .unwrap_or(false)
        })
        .collect();
    if rotated.len() <= opt.max_files {
        return;
    }
    rotated.sort();
    let remove_count = rotated.len().saturating_sub(opt.max_files);
    for p in rotated.into_iter().take(remove_count) {
        let _ = fs::remove_file(p);
    }
}

fn append_entry(path: &Path, entry: &ChatLogEntry, opt: ChatLogOptions) {
    if !opt.enabled {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let Ok(line) = serde_json::to_string(entry) else {
        return;
    };
    let _guard = match log_lock().lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    };
    rotate_and_prune_if_needed(path, opt);
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

/// Appends to `~/.clawdash/logs/chat.jsonl`; failures are ignored.
pub fn log_chat_exchange(entry: &ChatLogEntry) {
    append_entry(&chat_log_path(), entry, chat_log_options());
}
