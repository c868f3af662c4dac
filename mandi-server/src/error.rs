use axum::{http::StatusCode, response::IntoResponse, Json};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Errori del core di messaggistica.
///
/// Nessuno viene ritentato internamente: `Persistence` può essere ritentato dal chiamante
/// rifacendo l'intero send (l'append non è idempotente).
#[derive(Error, Debug)]
pub enum ChatError {
    /// Campo obbligatorio mancante o malformato.
    #[error("validation error: {0}")]
    Validation(String),

    /// Il gruppo referenziato non esiste.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage non disponibile, query fallita o scaduta.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Operazione su una sessione già disconnessa.
    #[error("session closed")]
    SessionClosed,
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ChatError::NotFound(msg.into())
    }

    /// Codice stabile esposto sul wire.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation_error",
            ChatError::NotFound(_) => "not_found",
            ChatError::Persistence(_) => "persistence_failure",
            ChatError::SessionClosed => "session_closed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::SessionClosed => StatusCode::CONFLICT,
        }
    }

    /// Errore condiviso (`mandi_core::Error`) da mandare al client.
    pub fn to_wire(&self) -> mandi_core::Error {
        mandi_core::Error::new(self.code(), self.to_string())
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Persistence(e.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        if let ChatError::Persistence(ref msg) = self {
            tracing::error!("persistence failure: {}", msg);
        }
        (self.status(), Json(self.to_wire())).into_response()
    }
}

/// Esegue una chiamata di persistenza con un limite di tempo finito.
/// La scadenza diventa `Persistence`, come un errore del database.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> ChatResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(ChatError::from),
        Err(_) => Err(ChatError::Persistence(format!(
            "persistence call timed out after {} ms",
            limit.as_millis()
        ))),
    }
}
