use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::{extract::{Extension, Path, Query, WebSocketUpgrade}, http::StatusCode, response::IntoResponse, Json};
use futures_util::{Sink, SinkExt, StreamExt};
use mandi_core::{
    is_valid_id, Ack, CreateGroupRequest, Group, GroupFilter, SendMessageRequest, WsMessage,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::directory::NewGroup;
use crate::error::{ChatError, ChatResult};
use crate::gateway::Inbox;
use crate::AppState;

/// Handler per GET /api/community/groups?location=&crop=&farmingStyle=
pub async fn list_groups(
    Extension(state): Extension<Arc<AppState>>,
    Query(filter): Query<GroupFilter>,
) -> ChatResult<Json<Vec<Group>>> {
    let groups = state.directory.list(&filter).await?;
    Ok(Json(groups))
}

/// Handler per POST /api/community/groups
pub async fn create_group(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> ChatResult<(StatusCode, Json<Group>)> {
    let Json(req) = payload.map_err(|e| ChatError::validation(e.body_text()))?;
    let group = state.directory.create(NewGroup::from(req)).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Handler per GET /api/community/messages/:group_id
/// Un gruppo inesistente restituisce semplicemente una lista vuota.
pub async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
) -> ChatResult<Json<Vec<mandi_core::Message>>> {
    let messages = state.store.list_by_group(&group_id).await?;
    Ok(Json(messages))
}

/// Handler per POST /api/community/message
pub async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ChatResult<(StatusCode, Json<mandi_core::Message>)> {
    // un body non valido (json rotto, type sconosciuto) è un errore di validazione, non un 422
    let Json(req) = payload.map_err(|e| ChatError::validation(e.body_text()))?;
    // controllo di forma sul groupId: i campi mancanti li segnala il gateway
    if !req.group_id.is_empty() && !is_valid_id(&req.group_id) {
        return Err(ChatError::validation("Invalid groupId format"));
    }
    let message = state.gateway.send(req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Handler per /ws (push channel)
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Scrive sul socket i push del hub e le risposte dirette, finché la sessione è aperta.
/// A inbox chiusa le risposte già accodate vengono comunque inviate.
async fn forward_frames<S>(mut inbox: Inbox, mut replies_rx: mpsc::UnboundedReceiver<WsMessage>, mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    loop {
        let frame = tokio::select! {
            pushed = inbox.recv() => match pushed {
                Some(m) => WsMessage::ReceiveMessage((*m).clone()),
                None => {
                    while let Ok(r) = replies_rx.try_recv() {
                        if send_frame(&mut sink, &r).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            },
            reply = replies_rx.recv() => match reply {
                Some(r) => r,
                None => break,
            },
        };
        if send_frame(&mut sink, &frame).await.is_err() {
            break;
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &WsMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(t) => t,
        Err(e) => {
            // frame perso, la connessione resta su
            tracing::warn!("cannot serialize ws frame: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (session, inbox) = state.gateway.connect();
    let session_id = session.id();
    tracing::info!(session = %session_id, "websocket session opened");

    // Split socket into sink/stream
    /* socket.split() divide l'oggetto WebSocket in due metà indipendenti:
        sender (un Sink) usato per inviare messaggi verso il client,
        receiver (uno Stream) usato per ricevere messaggi dal client. */
    let (sender, mut receiver) = socket.split();

    // Risposte dirette a questa connessione (ack, errori), separate dai push del hub.
    let (replies, mut replies_rx) = mpsc::unbounded_channel::<WsMessage>();

    // Task: forward push e risposte -> websocket
    let forward_task = tokio::spawn(forward_frames(inbox, replies_rx, sender));

    // Task: read incoming commands
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let parsed = match serde_json::from_str::<WsMessage>(&text) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(session = %session_id, "malformed ws frame: {}", e);
                let _ = replies.send(WsMessage::Error(
                    ChatError::validation(format!("malformed frame: {}", e)).to_wire(),
                ));
                continue;
            }
        };
        match parsed {
            WsMessage::JoinGroup(g) => {
                if let Err(e) = session.join(&g.group_id) {
                    let _ = replies.send(WsMessage::Error(e.to_wire()));
                }
            }
            WsMessage::LeaveGroup(g) => {
                if let Err(e) = session.leave(&g.group_id) {
                    let _ = replies.send(WsMessage::Error(e.to_wire()));
                }
            }
            WsMessage::SendMessage(sm) => {
                let in_reply_to = sm.client_msg_id.clone();
                let ack = match session.send(sm.into()).await {
                    Ok(m) => Ack::ok(in_reply_to, &m),
                    Err(e) => Ack::error(in_reply_to, e.to_wire()),
                };
                let _ = replies.send(WsMessage::Ack(ack));
            }
            _ => {
                let _ = replies.send(WsMessage::Error(
                    ChatError::validation("unexpected message type from client").to_wire(),
                ));
            }
        }
    }

    // cleanup: la disconnessione chiude anche l'inbox, quindi il forward task termina
    session.disconnect();
    drop(replies);
    let _ = forward_task.await;
    tracing::info!(session = %session_id, "websocket session closed");
}
