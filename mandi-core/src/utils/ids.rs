use uuid::Uuid;

/// Genera un nuovo id (UUIDv4) per i gruppi. Gli id dei messaggi li assegna lo store.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Genera un nuovo clientMsgId unico (UUIDv4) come stringa, lato client.
pub fn new_client_msg_id() -> String {
    Uuid::new_v4().to_string()
}

/// true se `id` ha la forma di un id generato dal server.
pub fn is_valid_id(id: &str) -> bool {
    Uuid::try_parse(id).is_ok()
}
