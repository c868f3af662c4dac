/* This file defines how data "travel" through the push channel (web socket).
    WsMessage is the envelope enum { type, payload }:
    JoinGroup / LeaveGroup -> membership changes requested by the client, no direct answer
    SendMessage -> message from client, answered with an Ack
    ReceiveMessage -> message pushed by the server to every member of the group
    Ack -> answer to a SendMessage
    Error -> errors not related to a SendMessage (bad frame, join on a closed session...)
*/
use serde::{Deserialize, Serialize};

use crate::{error::Error, models::{Message, MessageType}};

/// Messaggio WS con envelope { type, payload }.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    /// Client → Server: entra nella room del gruppo.
    #[serde(rename = "join_group")]
    JoinGroup(GroupRef),
    /// Client → Server: esce dalla room del gruppo.
    #[serde(rename = "leave_group")]
    LeaveGroup(GroupRef),
    /// Client → Server: richiesta di inviare un messaggio.
    #[serde(rename = "send_message")]
    SendMessage(SendMessage),
    /// Server → Client: nuovo messaggio in un gruppo di cui la sessione è membro.
    #[serde(rename = "receive_message")]
    ReceiveMessage(Message),
    /// Server → Client: riscontro ad un SendMessage.
    #[serde(rename = "ack")]
    Ack(Ack),
    /// Server → Client: errore fuori banda.
    #[serde(rename = "error")]
    Error(Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: String,
}

/// Payload per l'intento di invio messaggio (C→S).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub client_msg_id: String,
    pub group_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageType>,
}

/// Stato dell'acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

/// Risposta del server ad un SendMessage (S→C).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// clientMsgId del comando a cui rispondiamo.
    pub in_reply_to: String,
    pub status: AckStatus,
    /// Presente se status = ok
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Presente se status = ok
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Presente se status = error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl Ack {
    pub fn ok(in_reply_to: String, message: &Message) -> Self {
        Ack {
            in_reply_to,
            status: AckStatus::Ok,
            message_id: Some(message.id.clone()),
            created_at: Some(message.created_at.clone()),
            group_id: Some(message.group_id.clone()),
            error: None,
        }
    }

    pub fn error(in_reply_to: String, error: Error) -> Self {
        Ack {
            in_reply_to,
            status: AckStatus::Error,
            message_id: None,
            created_at: None,
            group_id: None,
            error: Some(error),
        }
    }
}

impl From<SendMessage> for crate::protocol::http::SendMessageRequest {
    fn from(sm: SendMessage) -> Self {
        crate::protocol::http::SendMessageRequest {
            group_id: sm.group_id,
            text: sm.text,
            sender_id: sm.sender_id,
            sender_name: sm.sender_name,
            kind: sm.kind,
        }
    }
}
