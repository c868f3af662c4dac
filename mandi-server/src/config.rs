use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::time::Duration;

/// Configurazione del server, letta dalle variabili d'ambiente (eventualmente da un file `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    /// DATABASE_URL: percorso del file SQLite o URL "sqlite:..."
    pub database_url: String,
    /// BIND_ADDR
    pub bind_addr: SocketAddr,
    /// RUST_LOG, usato come filtro per tracing-subscriber
    pub rust_log: String,
    /// PERSIST_TIMEOUT_MS: limite per ogni singola chiamata di persistenza
    pub persist_timeout: Duration,
    /// DB_MAX_CONNECTIONS
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // il file .env è opzionale
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Come `from_env` ma con una sorgente di variabili arbitraria (usato nei test).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL", "mandi.db");
        let bind = get("BIND_ADDR", "127.0.0.1:3000");
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("parse BIND_ADDR {:?}", bind))?;
        let rust_log = get("RUST_LOG", "info");

        let timeout_ms: u64 = get("PERSIST_TIMEOUT_MS", "5000")
            .parse()
            .context("parse PERSIST_TIMEOUT_MS")?;
        if timeout_ms == 0 {
            bail!("PERSIST_TIMEOUT_MS must be greater than zero");
        }

        let db_max_connections: u32 = get("DB_MAX_CONNECTIONS", "5")
            .parse()
            .context("parse DB_MAX_CONNECTIONS")?;
        if db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than zero");
        }

        Ok(Config {
            database_url,
            bind_addr,
            rust_log,
            persist_timeout: Duration::from_millis(timeout_ms),
            db_max_connections,
        })
    }
}
