//! Room Membership Manager: associazione live sessione ↔ gruppo, solo in memoria.
//!
//! Due indici: `sessions` (sessione → gruppi) e `rooms` (gruppo → sessioni). Ogni mutazione
//! tiene il lock della voce in `sessions` mentre aggiorna `rooms`, quindi le operazioni sulla
//! stessa sessione sono serializzate e sessioni diverse procedono in parallelo.
//! Ordine dei lock: sempre `sessions` prima di `rooms`.

use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// Handle opaco di una connessione live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct RoomMembership {
    sessions: DashMap<SessionId, HashSet<String>>,
    rooms: DashMap<String, HashSet<SessionId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una sessione appena connessa, senza gruppi.
    pub fn connect(&self, session: SessionId) {
        self.sessions.entry(session).or_default();
    }

    /// Idempotente. Restituisce true se la sessione non era già membro.
    /// Fallisce con `SessionClosed` se la sessione non è (più) connessa.
    pub fn join(&self, session: SessionId, group_id: &str) -> ChatResult<bool> {
        let mut groups = self.sessions.get_mut(&session).ok_or(ChatError::SessionClosed)?;
        if !groups.insert(group_id.to_string()) {
            return Ok(false);
        }
        self.rooms.entry(group_id.to_string()).or_default().insert(session);
        Ok(true)
    }

    /// Idempotente. Restituisce true se la sessione era membro.
    pub fn leave(&self, session: SessionId, group_id: &str) -> bool {
        let Some(mut groups) = self.sessions.get_mut(&session) else {
            return false;
        };
        if !groups.remove(group_id) {
            return false;
        }
        self.remove_from_room(session, group_id);
        true
    }

    /// Rimuove la sessione da tutti i suoi gruppi. Restituisce i gruppi lasciati
    /// (vuoto se la sessione era già stata rimossa).
    pub fn drop_session(&self, session: SessionId) -> Vec<String> {
        let Some((_, groups)) = self.sessions.remove(&session) else {
            return Vec::new();
        };
        for g in &groups {
            self.remove_from_room(session, g);
        }
        groups.into_iter().collect()
    }

    /// Membri live del gruppo; insieme vuoto se nessuno.
    pub fn members_of(&self, group_id: &str) -> HashSet<SessionId> {
        self.rooms
            .get(group_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, session: SessionId, group_id: &str) -> bool {
        self.sessions
            .get(&session)
            .map(|groups| groups.contains(group_id))
            .unwrap_or(false)
    }

    pub fn is_connected(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn remove_from_room(&self, session: SessionId, group_id: &str) {
        let now_empty = match self.rooms.get_mut(group_id) {
            Some(mut members) => {
                members.remove(&session);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(group_id, |_, members| members.is_empty());
        }
    }
}
