//! mandi-core: tipi condivisi tra client e server (gruppi, messaggi, DTO HTTP, envelope WS, errori).
//! Niente I/O: solo modelli serializzabili e piccole utility.

pub mod models;
pub mod protocol;
pub mod error;
pub mod utils;

// Re-export utili per ridurre i percorsi nei crate client/server
pub use error::Error;
pub use models::{group::Group, group::GroupIcon, message::Message, message::MessageType};
pub use protocol::ws::{Ack, AckStatus, GroupRef, SendMessage, WsMessage};
pub use protocol::http::{CreateGroupRequest, GroupFilter, SendMessageRequest};
pub use utils::{format_timestamp, is_valid_id, new_client_msg_id, new_id, now_timestamp};
