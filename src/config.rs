use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read once from `ROOMLEDGER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin_token: String,
    pub metrics_port: Option<u16>,
    pub max_connections: usize,
    /// `None` disables the periodic audit.
    pub audit_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let audit_secs: u64 = parsed(&lookup, "ROOMLEDGER_AUDIT_INTERVAL_SECS").unwrap_or(300);
        Self {
            bind: lookup("ROOMLEDGER_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "ROOMLEDGER_PORT").unwrap_or(8080),
            data_dir: lookup("ROOMLEDGER_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            admin_token: lookup("ROOMLEDGER_ADMIN_TOKEN").unwrap_or_else(|| "roomledger".into()),
            metrics_port: parsed(&lookup, "ROOMLEDGER_METRICS_PORT"),
            max_connections: parsed(&lookup, "ROOMLEDGER_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(256),
            audit_interval: (audit_secs > 0).then(|| Duration::from_secs(audit_secs)),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
