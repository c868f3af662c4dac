pub mod group;
pub mod message;

// Re-export per comodità
pub use group::{Group, GroupIcon};
pub use message::{Message, MessageType};
