use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use alumnet_types::api::Identity;
use alumnet_types::events::{ClientAction, ClientFrame, ServerEvent};
use alumnet_types::ids::Target;
use alumnet_types::models::PresenceStatus;

use crate::auth::REJECT_CLOSE_CODE;
use crate::chat::{ChatError, ChatResult, ChatService, Draft};
use crate::presence::status_event;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// What the initiating connection gets back for one action.
enum Reply {
    Ack(serde_json::Value),
    Pong,
    /// Fire-and-forget actions (typing) answer nothing on success.
    Silent,
}

fn ack<T: Serialize>(value: T) -> ChatResult<Reply> {
    let value = serde_json::to_value(value).map_err(anyhow::Error::from)?;
    Ok(Reply::Ack(value))
}

fn target(receiver_id: Option<uuid::Uuid>, group_id: Option<uuid::Uuid>) -> ChatResult<Target> {
    Target::from_parts(receiver_id, group_id)
        .ok_or_else(|| ChatError::validation("exactly one of receiver_id or group_id is required"))
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("Failed to encode {} event: {}", event.kind(), e);
            None
        }
    }
}

/// Close an unauthenticated socket with the rejection code. No state has
/// been touched at this point.
pub async fn reject_connection(mut socket: WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: REJECT_CLOSE_CODE,
        reason: reason.into(),
    };
    if socket.send(Message::Close(Some(frame))).await.is_err() {
        debug!("Rejected socket closed before the close frame was sent");
    }
}

/// Run one authenticated socket until either side goes away.
pub async fn handle_connection(socket: WebSocket, service: ChatService, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let user_id = identity.user_id;

    let mirror = {
        let service = service.clone();
        let identity = identity.clone();
        tokio::task::spawn_blocking(move || service.register_identity(&identity)).await
    };
    if !matches!(mirror, Ok(Ok(()))) {
        error!("{} ({}) could not be registered, closing", identity.username, user_id);
        return;
    }

    let dispatcher = service.dispatcher().clone();

    // Subscribe before registering so no presence change after the snapshot
    // below is missed.
    let mut broadcast_rx = dispatcher.subscribe();
    let registration = dispatcher.register(user_id, &identity.username);
    let conn_id = registration.conn_id;
    let mut user_rx = registration.rx;
    let reply_tx = registration.reply;

    info!(
        "{} ({}) connected to gateway ({} connections)",
        identity.username,
        user_id,
        dispatcher.connection_count(user_id)
    );

    let mut greeting = vec![ServerEvent::Ready {
        user_id,
        username: identity.username.clone(),
    }];
    for (uid, username, at) in dispatcher.online_users() {
        if uid != user_id {
            greeting.push(status_event(uid, &username, PresenceStatus::Online, at));
        }
    }
    for event in &greeting {
        let Some(msg) = encode(event) else { continue };
        if sender.send(msg).await.is_err() {
            dispatcher.unregister(user_id, conn_id);
            return;
        }
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let event = tokio::select! {
                result = broadcast_rx.recv() => match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} messages", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                result = user_rx.recv() => match result {
                    Some(event) => event,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let Some(msg) = encode(&event) else { continue };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let recv_service = service.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = handle_frame(&recv_service, &recv_identity, &text).await {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let went_offline = dispatcher.unregister(user_id, conn_id);
    info!(
        "{} ({}) disconnected from gateway{}",
        identity.username,
        user_id,
        if went_offline { ", now offline" } else { "" }
    );
}

/// Handle one text frame from `identity` and build the reply for the
/// initiating connection, if any. Every frame refreshes last-activity.
pub async fn handle_frame(
    service: &ChatService,
    identity: &Identity,
    text: &str,
) -> Option<ServerEvent> {
    service.dispatcher().touch(identity.user_id);

    let ClientFrame { request_id, action } = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "{} ({}) bad frame: {} -- raw: {}",
                identity.username,
                identity.user_id,
                e,
                text.chars().take(200).collect::<String>()
            );
            let err = ChatError::validation(format!("malformed frame: {}", e));
            return Some(err.to_event(None, None));
        }
    };
    let name = action.name();

    // Store work is synchronous; keep it off the async workers.
    let result = {
        let service = service.clone();
        let identity = identity.clone();
        tokio::task::spawn_blocking(move || dispatch(&service, &identity, action)).await
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => Err(ChatError::Store(anyhow::anyhow!("{} task failed: {}", name, e))),
    };

    match outcome {
        Ok(Reply::Ack(data)) => Some(ServerEvent::Ack {
            request_id,
            action: name.to_string(),
            data,
        }),
        Ok(Reply::Pong) => Some(ServerEvent::Pong { at: Utc::now() }),
        Ok(Reply::Silent) => None,
        Err(e) => {
            match &e {
                ChatError::Store(inner) => {
                    error!("{} by {} failed: {:#}", name, identity.username, inner)
                }
                other => debug!("{} by {} rejected: {}", name, identity.username, other),
            }
            Some(e.to_event(request_id, Some(name)))
        }
    }
}

fn dispatch(service: &ChatService, identity: &Identity, action: ClientAction) -> ChatResult<Reply> {
    match action {
        ClientAction::SendMessage {
            receiver_id,
            group_id,
            content,
            reply_to,
            attachment_ids,
        } => {
            let draft = Draft {
                target: target(receiver_id, group_id)?,
                content,
                reply_to,
                attachment_ids,
            };
            ack(service.send_message(identity, draft)?)
        }

        ClientAction::BumpMessage {
            message_id,
            receiver_id,
            group_id,
        } => {
            let explicit = match (receiver_id, group_id) {
                (None, None) => None,
                (r, g) => Some(target(r, g)?),
            };
            ack(service.bump_message(identity, message_id, explicit)?)
        }

        ClientAction::ForwardMessage {
            message_id,
            receiver_id,
            group_id,
        } => ack(service.forward_message(identity, message_id, target(receiver_id, group_id)?)?),

        ClientAction::AddReaction {
            message_id,
            reaction_type,
        } => ack(service.add_reaction(identity, message_id, reaction_type)?),

        ClientAction::RemoveReaction { message_id } => {
            ack(service.remove_reaction(identity, message_id)?)
        }

        ClientAction::EditMessage {
            message_id,
            content,
        } => ack(service.edit_message(identity, message_id, &content)?),

        ClientAction::DeleteMessage { message_id } => {
            ack(service.delete_message(identity, message_id)?)
        }

        ClientAction::PinMessage { message_id } => ack(service.toggle_pin(identity, message_id)?),

        ClientAction::MarkAsRead {
            partner_id,
            group_id,
            message_id,
        } => {
            let marked = match (partner_id, group_id, message_id) {
                (Some(partner), None, None) => {
                    service.mark_conversation_read(identity, Target::Direct(partner))?
                }
                (None, Some(group), None) => {
                    service.mark_conversation_read(identity, Target::Group(group))?
                }
                (None, None, Some(message)) => {
                    u64::from(service.mark_message_read(identity, message)?)
                }
                _ => {
                    return Err(ChatError::validation(
                        "exactly one of partner_id, group_id or message_id is required",
                    ));
                }
            };
            ack(json!({ "marked": marked }))
        }

        ClientAction::Typing {
            receiver_id,
            group_id,
        } => {
            service.typing(identity, target(receiver_id, group_id)?, true)?;
            Ok(Reply::Silent)
        }

        ClientAction::StopTyping {
            receiver_id,
            group_id,
        } => {
            service.typing(identity, target(receiver_id, group_id)?, false)?;
            Ok(Reply::Silent)
        }

        ClientAction::Ping => Ok(Reply::Pong),
    }
}
