//! Broadcast Hub: fan-out di un messaggio già persistito verso le sessioni membri del suo gruppo.
//!
//! Ogni sessione ha la sua coda (`UnboundedSender`), quindi `publish` non aspetta mai una sessione
//! lenta e l'ordine per sessione è l'ordine delle chiamate a `publish`.

use dashmap::DashMap;
use mandi_core::Message;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::membership::{RoomMembership, SessionId};

pub struct BroadcastHub {
    membership: Arc<RoomMembership>,
    /// Map of session -> sender used to forward messages to that connection.
    outlets: DashMap<SessionId, UnboundedSender<Arc<Message>>>,
}

impl BroadcastHub {
    pub fn new(membership: Arc<RoomMembership>) -> Self {
        BroadcastHub { membership, outlets: DashMap::new() }
    }

    /// Apre la coda di consegna della sessione. Un secondo attach sostituisce la coda precedente.
    pub fn attach(&self, session: SessionId) -> UnboundedReceiver<Arc<Message>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outlets.insert(session, tx);
        rx
    }

    /// Chiude la coda: il receiver finisce di svuotarla e poi restituisce `None`.
    pub fn detach(&self, session: SessionId) {
        self.outlets.remove(&session);
    }

    /// Accoda il messaggio per ogni membro corrente del gruppo.
    /// Restituisce il numero di sessioni a cui è stato accodato.
    pub fn publish(&self, message: Message) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;
        for session in self.membership.members_of(&message.group_id) {
            let Some(outlet) = self.outlets.get(&session) else {
                tracing::debug!(session = %session, "member without outlet, skipped");
                continue;
            };
            if outlet.send(message.clone()).is_err() {
                // receiver già chiuso: la sessione sta terminando, gli altri non ne risentono
                tracing::debug!(session = %session, message_id = %message.id, "dead outlet, skipped");
                continue;
            }
            delivered += 1;
        }
        tracing::debug!(
            group_id = %message.group_id,
            message_id = %message.id,
            delivered,
            "message published"
        );
        delivered
    }
}
