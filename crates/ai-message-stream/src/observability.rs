use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "ai-message-stream.logs.jsonl";

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn logging_enabled() -> bool {
    std::env::var("AI_STREAM_OBSERVABILITY_ENABLED")
        .ok()
        .and_then(|value| parse_flag(&value))
        .unwrap_or(true)
}

fn env_filter() -> EnvFilter {
    std::env::var("AI_STREAM_LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file)
}

/// Installs a global `tracing` subscriber once per process.
///
/// Environment variables:
/// - `AI_STREAM_OBSERVABILITY_ENABLED`: set to `false`/`0`/`off` to skip installation.
/// - `AI_STREAM_LOG_LEVEL`: filter directive, falls back to `RUST_LOG`, then `info`.
/// - `AI_STREAM_JSON_LOG_PATH`: when set, logs are written as JSONL to this file
///   instead of compact console output on stdout.
///
/// Calling this is optional; the library only emits `tracing` events.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !logging_enabled() {
            return;
        }
        let filter = env_filter();
        match std::env::var("AI_STREAM_JSON_LOG_PATH") {
            Ok(raw) if !raw.trim().is_empty() => {
                let (dir, file) = split_log_path(Path::new(raw.trim()));
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file));
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            _ => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
