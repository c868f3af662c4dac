//! Message Store: log append-only dei messaggi, per gruppo. È l'unica fonte di verità per la history.

use async_trait::async_trait;
use mandi_core::{now_timestamp, Message, MessageType};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{bounded, ChatError, ChatResult};

/// Dati di un messaggio non ancora persistito.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub kind: MessageType,
}

impl NewMessage {
    /// Controlla i campi obbligatori. Restituisce l'elenco dei campi vuoti.
    pub fn validate(&self) -> ChatResult<()> {
        let mut missing = Vec::new();
        if self.group_id.trim().is_empty() {
            missing.push("groupId");
        }
        if self.text.is_empty() {
            missing.push("text");
        }
        if self.sender_id.trim().is_empty() {
            missing.push("senderId");
        }
        if self.sender_name.trim().is_empty() {
            missing.push("senderName");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ChatError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appende un messaggio al log del suo gruppo. Quando ritorna, il messaggio è già durevole
    /// e visibile a `list_by_group`.
    async fn append(&self, msg: NewMessage) -> ChatResult<Message>;

    /// Tutti i messaggi del gruppo in ordine di creazione. Vuoto (non errore) se il gruppo
    /// non esiste o non ha messaggi.
    async fn list_by_group(&self, group_id: &str) -> ChatResult<Vec<Message>>;
}

pub struct SqliteMessageStore {
    pool: SqlitePool,
    timeout: Duration,
    /// Ultimo id assegnato. Tenuto per tutto l'insert: l'ordine degli id è l'ordine di scrittura.
    last_id: Mutex<Option<Uuid>>,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        SqliteMessageStore { pool, timeout, last_id: Mutex::new(None) }
    }
}

/// Id v7 (ordinabile per tempo), sempre maggiore del precedente anche nello stesso millisecondo.
fn next_message_id(last: Option<Uuid>) -> Uuid {
    let candidate = Uuid::now_v7();
    match last {
        Some(prev) if candidate <= prev => Uuid::from_u128(prev.as_u128() + 1),
        _ => candidate,
    }
}

fn message_from_row(row: &SqliteRow) -> ChatResult<Message> {
    let kind: String = row.try_get("type")?;
    Ok(Message {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        text: row.try_get("text")?,
        kind: kind.parse().map_err(ChatError::Persistence)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, msg: NewMessage) -> ChatResult<Message> {
        msg.validate()?;

        let mut last_id = self.last_id.lock().await;
        let uuid = next_message_id(*last_id);
        *last_id = Some(uuid);
        let id = uuid.to_string();
        let now = now_timestamp();
        // Un solo statement: l'insert avviene solo se il gruppo esiste, e created_at non scende mai
        // sotto l'ultimo messaggio del gruppo (l'orologio può tornare indietro).
        let row = bounded(
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO messages (id, group_id, sender_id, sender_name, text, type, created_at)
                SELECT ?, ?, ?, ?, ?, ?,
                       MAX(?, COALESCE((SELECT MAX(created_at) FROM messages WHERE group_id = ?), ''))
                WHERE EXISTS (SELECT 1 FROM groups WHERE id = ?)
                RETURNING created_at
                "#,
            )
            .bind(&id)
            .bind(&msg.group_id)
            .bind(&msg.sender_id)
            .bind(&msg.sender_name)
            .bind(&msg.text)
            .bind(msg.kind.as_str())
            .bind(&now)
            .bind(&msg.group_id)
            .bind(&msg.group_id)
            .fetch_optional(&self.pool),
        )
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Err(ChatError::not_found(format!("group {} not found", msg.group_id))),
        };
        let created_at: String = row.try_get("created_at")?;
        tracing::debug!(group_id = %msg.group_id, message_id = %id, "message appended");

        Ok(Message {
            id,
            group_id: msg.group_id,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            text: msg.text,
            kind: msg.kind,
            created_at,
        })
    }

    async fn list_by_group(&self, group_id: &str) -> ChatResult<Vec<Message>> {
        let rows = bounded(
            self.timeout,
            sqlx::query(
                r#"
                SELECT id, group_id, sender_id, sender_name, text, type, created_at
                FROM messages
                WHERE group_id = ?
                ORDER BY created_at ASC, seq ASC
                "#,
            )
            .bind(group_id)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}
