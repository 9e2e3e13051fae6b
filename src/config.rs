use anyhow::Context;
use std::net::SocketAddr;

const DEFAULT_DATABASE_URL: &str = "sqlite://tracker.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Pending background analysis jobs before new ones are dropped.
    pub queue_capacity: usize,
}

impl Config {
    /// Reads `TRACKER_*` variables from the process environment.
    /// `.env` is loaded by `main` before this is called.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("TRACKER_DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_raw = lookup("TRACKER_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw
            .parse()
            .with_context(|| format!("invalid TRACKER_BIND_ADDR: {}", bind_raw))?;

        let queue_capacity = match lookup("TRACKER_QUEUE_CAPACITY") {
            Some(raw) => {
                let capacity: usize = raw
                    .parse()
                    .with_context(|| format!("invalid TRACKER_QUEUE_CAPACITY: {}", raw))?;
                if capacity == 0 {
                    anyhow::bail!("TRACKER_QUEUE_CAPACITY must be at least 1");
                }
                capacity
            }
            None => DEFAULT_QUEUE_CAPACITY,
        };

        Ok(Config {
            database_url,
            bind_addr,
            queue_capacity,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
