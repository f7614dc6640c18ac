//! Runtime configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::orm::Context as QueryContext;

/// Output format for the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL; DATABASE_PATH wins over DATABASE_URL
    pub database_url: String,

    /// Pool size
    pub max_connections: u32,

    /// How long to keep retrying the initial connection
    pub connect_timeout: Duration,

    /// Deadline applied to every operation run under [`Config::context`]
    pub query_timeout: Option<Duration>,

    /// `EnvFilter` directives used when RUST_LOG is unset
    pub log_filter: String,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/inventory.db".to_string(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            query_timeout: None,
            log_filter: "inventory_graph=info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|v| v.trim().parse::<T>().with_context(|| format!("Invalid {name}: {v:?}")))
        .transpose()
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let database_url = match lookup("DATABASE_PATH").or_else(|| lookup("DATABASE_URL")) {
            Some(url) if url.starts_with("sqlite:") => url,
            Some(path) => format!("sqlite://{path}"),
            None => defaults.database_url,
        };

        let max_connections = parse::<u32>("DATABASE_MAX_CONNECTIONS", lookup("DATABASE_MAX_CONNECTIONS"))?
            .unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        let connect_timeout = parse::<u64>(
            "DATABASE_CONNECT_TIMEOUT_SECS",
            lookup("DATABASE_CONNECT_TIMEOUT_SECS"),
        )?
        .map(Duration::from_secs)
        .unwrap_or(defaults.connect_timeout);

        let query_timeout = parse::<u64>("QUERY_TIMEOUT_MS", lookup("QUERY_TIMEOUT_MS"))?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => defaults.log_format,
            Some(f) if f == "json" => LogFormat::Json,
            Some(f) if f == "pretty" => LogFormat::Pretty,
            Some(other) => bail!("Invalid LOG_FORMAT: {other:?} (expected json or pretty)"),
        };

        Ok(Self {
            database_url,
            max_connections,
            connect_timeout,
            query_timeout,
            log_filter: lookup("LOG_FILTER").unwrap_or(defaults.log_filter),
            log_format,
        })
    }

    /// A fresh operation context carrying the configured query timeout
    pub fn context(&self) -> QueryContext {
        let ctx = QueryContext::background();
        match self.query_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, "sqlite://./data/inventory.db");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.query_timeout, None);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_database_path_preferred() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_PATH", "/tmp/inv.db"),
            ("DATABASE_URL", "sqlite://other.db"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite:///tmp/inv.db");
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        assert!(Config::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "lots")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
    }

    #[tokio::test]
    async fn test_context_carries_timeout() {
        let config = Config::from_lookup(lookup(&[("QUERY_TIMEOUT_MS", "250")])).unwrap();
        assert!(config.context().deadline().is_some());
        assert!(Config::default().context().deadline().is_none());
    }
}
