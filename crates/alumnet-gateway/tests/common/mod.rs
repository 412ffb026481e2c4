#![allow(dead_code)]

use std::sync::Arc;

use uuid::Uuid;

use alumnet_db::Database;
use alumnet_gateway::cache::CacheConfig;
use alumnet_gateway::chat::{Draft, SendOutcome};
use alumnet_gateway::dispatcher::Registration;
use alumnet_gateway::{ChatService, Dispatcher};
use alumnet_types::api::Identity;
use alumnet_types::events::ServerEvent;
use alumnet_types::ids::Target;
use alumnet_types::models::MessagePayload;

/// A service over an in-memory store. Badge updates need a runtime; in
/// plain `#[test]` functions they are dropped, which keeps event streams
/// deterministic.
pub fn service() -> ChatService {
    let db = Arc::new(Database::open_in_memory().unwrap());
    ChatService::with_defaults(db, Dispatcher::new(), CacheConfig::default())
}

pub fn user(service: &ChatService, username: &str) -> Identity {
    let identity = Identity::new(Uuid::new_v4(), username);
    service.register_identity(&identity).unwrap();
    identity
}

pub fn connect(service: &ChatService, identity: &Identity) -> Registration {
    service
        .dispatcher()
        .register(identity.user_id, &identity.username)
}

/// Everything queued for one connection so far.
pub fn drain(conn: &mut Registration) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = conn.rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::kind).collect()
}

pub fn send(service: &ChatService, from: &Identity, target: Target, content: &str) -> SendOutcome {
    service
        .send_message(from, Draft::text(target, content))
        .unwrap()
}

pub fn delivered(outcome: SendOutcome) -> MessagePayload {
    match outcome {
        SendOutcome::Delivered { message } => message,
        other => panic!("expected a delivered message, got {:?}", other),
    }
}

/// Walk two users through request and acceptance so they can message freely.
pub fn open_conversation(service: &ChatService, a: &Identity, b: &Identity) -> MessagePayload {
    let request = match send(service, a, Target::Direct(b.user_id), "hi there") {
        SendOutcome::RequestPending { request, .. } => request,
        other => panic!("expected a request, got {:?}", other),
    };
    service.accept_request(b, request.id).unwrap()
}
