use anyhow::Context;
use axum::http::StatusCode;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod controllers;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod membership;
pub mod routes;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use directory::{GroupDirectory, NewGroup, SqliteGroupDirectory};
pub use error::{ChatError, ChatResult};
pub use gateway::{Gateway, Inbox, Session};
pub use hub::BroadcastHub;
pub use membership::{RoomMembership, SessionId};
pub use store::{MessageStore, NewMessage, SqliteMessageStore};

const MEMORY_URL: &str = "sqlite::memory:";

/// Stato condiviso tra gli handler HTTP e le sessioni WebSocket.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn GroupDirectory>,
    /// Unico punto di ingresso per join/leave/send; possiede membership e hub.
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Costruisce store, directory, membership manager e hub sopra lo stesso pool.
    /// Va chiamato una sola volta all'avvio del processo.
    pub fn new(pool: SqlitePool, persist_timeout: Duration) -> Self {
        let store: Arc<dyn MessageStore> =
            Arc::new(SqliteMessageStore::new(pool.clone(), persist_timeout));
        let directory: Arc<dyn GroupDirectory> =
            Arc::new(SqliteGroupDirectory::new(pool.clone(), persist_timeout));
        let membership = Arc::new(RoomMembership::new());
        let hub = Arc::new(BroadcastHub::new(membership.clone()));
        let gateway = Arc::new(Gateway::new(store.clone(), directory.clone(), membership, hub));
        AppState { pool, store, directory, gateway }
    }
}

// Dato un percorso di file, restituisce un URL SQLite valido. Crea le directory genitrici se non esistono.
pub fn sqlite_url_for_path(p: &Path) -> anyhow::Result<String> {
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dirs for {:?}", parent))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&abs)
        .with_context(|| format!("create/open sqlite file {:?}", abs))?;
    let s = abs.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        Ok(format!("sqlite://{}", s))
    } else {
        Ok(format!("sqlite:///{}", s))
    }
}

/// Crea un DB URL SQLite a partire dal valore di DATABASE_URL (già letto da `Config`).
/// Un valore che è già un URL "sqlite:..." (incluso "sqlite::memory:") viene passato così com'è,
/// un percorso semplice viene risolto e creato su disco.
pub fn build_sqlite_url(raw: &str) -> anyhow::Result<String> {
    if raw.starts_with("sqlite:") {
        return Ok(raw.to_string());
    }
    sqlite_url_for_path(&PathBuf::from(raw))
}

// Connect to the database and return a connection pool.
// Un database in memoria esiste solo finché vive la sua connessione: in quel caso il pool
// ne tiene una sola e non la ricicla mai.
pub async fn connect_pool(db_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parse sqlite url {}", db_url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool_options = if db_url == MEMORY_URL {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .with_context(|| format!("connect to sqlite via {}", db_url))?;
    Ok(pool)
}

// Esegue le migrazioni del database. Crea tabelle e indici se non esistono.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id                TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            description       TEXT NOT NULL,
            location          TEXT NOT NULL,
            crop              TEXT NOT NULL,
            farming_style     TEXT NOT NULL DEFAULT 'Conventional',
            members_count     INTEGER NOT NULL DEFAULT 0,
            icon              TEXT NOT NULL DEFAULT 'groups',
            last_message      TEXT,
            last_message_time TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );"#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_groups_last_message_time
            ON groups (last_message_time);"#,
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            group_id    TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            sender_name TEXT NOT NULL,
            text        TEXT NOT NULL,
            type        TEXT NOT NULL DEFAULT 'text' CHECK (type IN ('text', 'image', 'voice')),
            created_at  TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        );"#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_group_created
            ON messages (group_id, created_at, seq);"#,
    ];
    // applica ogni statement di migrazione
    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| format!("apply migration: {}", s.trim().lines().next().unwrap_or_default()))?;
    }
    Ok(())
}

/// Controlla lo stato di salute del database tentando di acquisire una connessione dal pool.
pub async fn health_with_pool(pool: &SqlitePool) -> StatusCode {
    match pool.acquire().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
