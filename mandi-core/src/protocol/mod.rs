pub mod ws;
pub mod http;

// Re-export comodi
pub use ws::{Ack, AckStatus, GroupRef, SendMessage, WsMessage};
pub use http::{CreateGroupRequest, GroupFilter, SendMessageRequest};
