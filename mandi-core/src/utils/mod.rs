pub mod ids;
pub mod time;

pub use ids::{is_valid_id, new_client_msg_id, new_id};
pub use self::time::{format_timestamp, now_timestamp};
