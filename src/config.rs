//! Configuration Module
//!
//! Loads node and persistence configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::persistence::{AsyncConfig, ReaperConfig, StoreConfig, StoreKind};

/// Node configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name this node answers to in a peer group
    pub node_name: String,
    /// Maximum number of entries held in memory
    pub max_entries: usize,
    /// Default lifespan in seconds for entries written without a TTL (0 = none)
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Persistence tier configuration
    pub store: StoreConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NODE_NAME` - Node name (default: node-1)
    /// - `MAX_ENTRIES` - Maximum in-memory entries (default: 1000)
    /// - `DEFAULT_TTL` - Default lifespan in seconds, 0 for none (default: 0)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `STORE_KIND` - Comma separated list of `memory`, `file` or `none` (default: none)
    /// - `STORE_LOCATION` - Directory for file stores (default: ./data)
    /// - `STORE_NAME` - Registry name for in-memory stores (default: unnamed)
    /// - `PASSIVATION`, `PRELOAD`, `SHARED`, `PURGE_ON_STARTUP`,
    ///   `PURGE_SYNCHRONOUSLY`, `FETCH_PERSISTENT_STATE` - flags (default: false)
    /// - `ASYNC_STORE` - Enable write-behind (default: false)
    /// - `ASYNC_QUEUE_SIZE`, `ASYNC_THREADS`, `ASYNC_FLUSH_TIMEOUT_MS`,
    ///   `ASYNC_SHUTDOWN_TIMEOUT_MS` - write-behind tuning
    /// - `REAPER_INTERVAL_MS` - Expiration reaper interval, 0 disables (default: 5000)
    pub fn from_env() -> Self {
        let defaults = AsyncConfig::default();
        let async_store = env_flag("ASYNC_STORE", false).then(|| AsyncConfig {
            queue_size: env_or("ASYNC_QUEUE_SIZE", defaults.queue_size),
            thread_pool_size: env_or("ASYNC_THREADS", defaults.thread_pool_size),
            flush_lock_timeout: env_ms("ASYNC_FLUSH_TIMEOUT_MS", defaults.flush_lock_timeout),
            shutdown_timeout: env_ms("ASYNC_SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
        });

        let reaper_interval = env_ms("REAPER_INTERVAL_MS", Duration::from_secs(5));
        let store = StoreConfig {
            stores: parse_store_kinds(
                &env::var("STORE_KIND").unwrap_or_default(),
                env::var("STORE_LOCATION").unwrap_or_else(|_| "./data".to_string()),
                env::var("STORE_NAME").ok(),
            ),
            shared: env_flag("SHARED", false),
            passivation: env_flag("PASSIVATION", false),
            preload: env_flag("PRELOAD", false),
            purge_on_startup: env_flag("PURGE_ON_STARTUP", false),
            purge_synchronously: env_flag("PURGE_SYNCHRONOUSLY", false),
            fetch_persistent_state: env_flag("FETCH_PERSISTENT_STATE", false),
            async_store,
            singleton: None,
            reaper: ReaperConfig {
                enabled: !reaper_interval.is_zero(),
                wake_up_interval: Some(reaper_interval),
            },
        };

        Self {
            node_name: env::var("NODE_NAME").unwrap_or_else(|_| "node-1".to_string()),
            max_entries: env_or("MAX_ENTRIES", 1000),
            default_ttl: env_or("DEFAULT_TTL", 0),
            server_port: env_or("SERVER_PORT", 3000),
            store,
        }
    }

    /// Lifespan given to entries written without an explicit TTL.
    pub fn default_lifespan(&self) -> Option<Duration> {
        (self.default_ttl > 0).then(|| Duration::from_secs(self.default_ttl))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "node-1".to_string(),
            max_entries: 1000,
            default_ttl: 0,
            server_port: 3000,
            store: StoreConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_ms(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_flag(&v))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Turns a `STORE_KIND` list into base stores; unknown names are skipped.
fn parse_store_kinds(list: &str, location: String, name: Option<String>) -> Vec<StoreKind> {
    list.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter_map(|kind| match kind.as_str() {
            "memory" | "in-memory" => Some(StoreKind::InMemory { name: name.clone() }),
            "file" => Some(StoreKind::File {
                location: PathBuf::from(&location),
            }),
            "" | "none" => None,
            unknown => {
                warn!("Ignoring unknown STORE_KIND '{}' (expected memory or file)", unknown);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.default_ttl, 0);
        assert_eq!(config.server_port, 3000);
        assert!(config.default_lifespan().is_none());
        assert!(!config.store.is_enabled());
    }

    #[test]
    fn test_default_lifespan() {
        let config = Config {
            default_ttl: 60,
            ..Config::default()
        };
        assert_eq!(config.default_lifespan(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_parse_store_kinds() {
        assert!(parse_store_kinds("", "./data".into(), None).is_empty());
        assert!(parse_store_kinds("none", "./data".into(), None).is_empty());

        // unknown names are skipped, the rest still parse
        let kinds = parse_store_kinds("memory, flie, file", "/tmp/x".into(), Some("n".into()));
        assert_eq!(
            kinds,
            vec![
                StoreKind::InMemory {
                    name: Some("n".to_string())
                },
                StoreKind::File {
                    location: PathBuf::from("/tmp/x")
                },
            ]
        );
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unknown_store_kind_is_logged() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let kinds = tracing::subscriber::with_default(subscriber, || {
            parse_store_kinds("flie", "./data".into(), None)
        });

        assert!(kinds.is_empty());
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("flie"));
    }
}
