use crate::connection::ConnectionConfig;
use crate::runtime::RuntimeOptions;
use clap::Parser;
use presence_core::frame::DEFAULT_MAX_FRAME_BYTES;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3000/ws";
const DEFAULT_DB_PATH: &str = ".presence/host.db";
const DEFAULT_LOG_DIR: &str = ".presence/logs";

#[derive(Parser, Debug, Default)]
#[command(name = "presence-agent")]
pub struct Args {
    /// Presence server WebSocket endpoint (ws:// or wss://).
    #[arg(long, default_value = "")]
    pub endpoint: String,
    /// SQLite file holding the session and notification settings.
    #[arg(long, default_value = "")]
    pub db_path: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value_t = 1_000)]
    pub reconnect_initial_ms: u64,
    #[arg(long, default_value_t = 30_000)]
    pub reconnect_max_ms: u64,
    #[arg(long, default_value_t = 64)]
    pub subscriber_queue: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    /// Skip publishing the tab set each time the socket opens.
    #[arg(long, default_value_t = false)]
    pub no_publish_on_open: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("reconnect delays must be positive and initial <= max ({initial_ms}ms > {max_ms}ms)")]
    InvalidBackoff { initial_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub endpoint: Url,
    pub db_path: PathBuf,
    pub log_dir: String,
    pub debug: bool,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub subscriber_queue: usize,
    pub max_frame_bytes: usize,
    pub publish_on_open: bool,
}

impl RuntimeConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let endpoint = parse_endpoint(&resolve_endpoint(&args.endpoint))?;
        if args.reconnect_initial_ms == 0 || args.reconnect_initial_ms > args.reconnect_max_ms {
            return Err(ConfigError::InvalidBackoff {
                initial_ms: args.reconnect_initial_ms,
                max_ms: args.reconnect_max_ms,
            });
        }
        Ok(Self {
            endpoint,
            db_path: PathBuf::from(resolve_db_path(&args.db_path)),
            log_dir: resolve_log_dir(&args.log_dir),
            debug: args.debug || env_true("PRESENCE_DEBUG"),
            reconnect_initial: Duration::from_millis(args.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(args.reconnect_max_ms),
            subscriber_queue: args.subscriber_queue.max(1),
            max_frame_bytes: args.max_frame_bytes,
            publish_on_open: !args.no_publish_on_open,
        })
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            connection: ConnectionConfig {
                endpoint: self.endpoint.clone(),
                reconnect_initial: self.reconnect_initial,
                reconnect_max: self.reconnect_max,
                max_frame_bytes: self.max_frame_bytes,
                subscriber_queue: self.subscriber_queue,
            },
            publish_on_open: self.publish_on_open,
        }
    }
}

pub fn load_config() -> Result<RuntimeConfig, ConfigError> {
    RuntimeConfig::from_args(Args::parse())
}

pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_with_env(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn resolve_endpoint(endpoint_flag: &str) -> String {
    resolve_with_env(endpoint_flag, "PRESENCE_ENDPOINT", DEFAULT_ENDPOINT)
}

fn resolve_db_path(db_path_flag: &str) -> String {
    resolve_with_env(db_path_flag, "PRESENCE_DB_PATH", DEFAULT_DB_PATH)
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    resolve_with_env(log_dir_flag, "PRESENCE_LOG_DIR", DEFAULT_LOG_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(endpoint: &str) -> Args {
        Args {
            endpoint: endpoint.to_string(),
            db_path: "/tmp/presence-test.db".to_string(),
            log_dir: "/tmp/presence-logs".to_string(),
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
            subscriber_queue: 64,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            ..Default::default()
        }
    }

    #[test]
    fn flags_take_precedence_and_fold_into_runtime_options() {
        let config =
            RuntimeConfig::from_args(args("wss://presence.example/ws")).expect("valid config");
        assert_eq!(config.endpoint.as_str(), "wss://presence.example/ws");
        assert_eq!(config.db_path, PathBuf::from("/tmp/presence-test.db"));
        assert!(config.publish_on_open);

        let options = config.runtime_options();
        assert_eq!(options.connection.reconnect_initial, Duration::from_secs(1));
        assert_eq!(options.connection.reconnect_max, Duration::from_secs(30));
    }

    #[test]
    fn non_websocket_endpoint_is_rejected() {
        assert!(matches!(
            RuntimeConfig::from_args(args("https://presence.example")),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let mut bad = args("ws://127.0.0.1:1/ws");
        bad.reconnect_initial_ms = 60_000;
        assert!(matches!(
            RuntimeConfig::from_args(bad),
            Err(ConfigError::InvalidBackoff { .. })
        ));
    }

    #[test]
    fn blank_flag_falls_back_to_default() {
        assert_eq!(
            resolve_with_env("  ", "PRESENCE_TEST_UNSET_KEY", "fallback"),
            "fallback"
        );
        assert_eq!(
            resolve_with_env("flag", "PRESENCE_TEST_UNSET_KEY", "fallback"),
            "flag"
        );
    }
}
