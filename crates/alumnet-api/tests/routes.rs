/// HTTP routes driven through the router with `oneshot`.
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use alumnet_api::{ApiState, router};
use alumnet_db::Database;
use alumnet_gateway::auth::JwtAuthenticator;
use alumnet_gateway::cache::CacheConfig;
use alumnet_gateway::chat::{Draft, SendOutcome};
use alumnet_gateway::{ChatError, ChatService, Dispatcher};
use alumnet_types::api::{Claims, Identity};
use alumnet_types::ids::{ConversationKey, Target};

const SECRET: &str = "route-test-secret";

struct Harness {
    chat: ChatService,
    app: Router,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let chat = ChatService::with_defaults(db, Dispatcher::new(), CacheConfig::default());
    let state = ApiState {
        chat: chat.clone(),
        auth: Arc::new(JwtAuthenticator::new(SECRET)),
    };
    Harness {
        chat,
        app: router(state),
    }
}

fn user(h: &Harness, username: &str) -> (Identity, String) {
    let identity = Identity::new(Uuid::new_v4(), username);
    h.chat.register_identity(&identity).unwrap();
    let claims = Claims {
        sub: identity.user_id,
        username: username.to_string(),
        name: None,
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    (identity, token)
}

async fn call(h: &Harness, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let resp = h.app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn requests_without_a_valid_token_are_unauthorized() {
    let h = harness();

    let (status, body) = call(&h, "GET", "/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = call(&h, "GET", "/conversations", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn a_request_can_be_accepted_and_read_over_http() {
    let h = harness();
    let (ann, _) = user(&h, "ann");
    let (bob, bob_token) = user(&h, "bob");
    let bob_token = Some(bob_token.as_str());

    let outcome = h
        .chat
        .send_message(&ann, Draft::text(Target::Direct(bob.user_id), "remember me?"))
        .unwrap();
    assert!(matches!(outcome, SendOutcome::RequestPending { .. }));

    let (status, gate) = call(&h, "GET", &format!("/users/{}/gate", ann.user_id), bob_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gate["state"], "pending");

    let (status, pending) = call(&h, "GET", "/requests", bob_token, None).await;
    assert_eq!(status, StatusCode::OK);
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    let request_id = pending[0]["id"].as_str().unwrap().to_string();

    let uri = format!("/requests/{}/accept", request_id);
    let (status, message) = call(&h, "POST", &uri, bob_token, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["content"], "remember me?");
    let (status, body) = call(&h, "POST", &uri, bob_token, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let key = ConversationKey::direct(ann.user_id, bob.user_id);
    let (_, conversations) = call(&h, "GET", "/conversations", bob_token, None).await;
    assert_eq!(conversations[0]["conversation"], key.to_string());
    assert_eq!(conversations[0]["unread_count"], 1);

    let (status, page) = call(&h, "GET", &format!("/conversations/{}/messages?limit=10", key), bob_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page.as_array().unwrap().len(), 1);

    let (_, read) = call(&h, "POST", &format!("/conversations/{}/read", key), bob_token, None).await;
    assert_eq!(read["marked"], 1);
    let (_, unread) = call(&h, "GET", "/unread", bob_token, None).await;
    assert_eq!(unread["total"], 0);
}

#[tokio::test]
async fn outsiders_get_forbidden_and_bad_keys_get_bad_request() {
    let h = harness();
    let (ann, _) = user(&h, "ann");
    let (bob, _) = user(&h, "bob");
    let (_, eve_token) = user(&h, "eve");
    let eve_token = Some(eve_token.as_str());

    let key = ConversationKey::direct(ann.user_id, bob.user_id);
    let (status, body) = call(&h, "GET", &format!("/conversations/{}/messages", key), eve_token, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "permission_denied");

    let (status, body) = call(&h, "GET", "/conversations/dm:nope/messages", eve_token, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = call(&h, "GET", &format!("/messages/{}/reactions", Uuid::new_v4()), eve_token, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn group_management_over_http() {
    let h = harness();
    let (ann, ann_token) = user(&h, "ann");
    let (bob, bob_token) = user(&h, "bob");
    let (cy, _) = user(&h, "cy");
    let ann_token = Some(ann_token.as_str());
    let bob_token = Some(bob_token.as_str());

    let (status, group) = call(
        &h,
        "POST",
        "/groups",
        ann_token,
        Some(json!({ "name": "Class of 2010", "member_ids": [bob.user_id] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = group["id"].as_str().unwrap().to_string();
    assert_eq!(group["members"].as_array().unwrap().len(), 2);

    let members_uri = format!("/groups/{}/members", group_id);
    let (status, _) = call(&h, "POST", &members_uri, bob_token, Some(json!({ "user_id": cy.user_id }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, group) = call(&h, "POST", &members_uri, ann_token, Some(json!({ "user_id": cy.user_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["members"].as_array().unwrap().len(), 3);

    let (status, _) = call(&h, "DELETE", &format!("/groups/{}/admins/{}", group_id, ann.user_id), ann_token, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, changed) = call(&h, "PUT", &format!("/groups/{}/admins/{}", group_id, bob.user_id), ann_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(changed["changed"], true);

    let (status, _) = call(&h, "DELETE", &format!("/groups/{}/members/{}", group_id, cy.user_id), bob_token, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, outcome) = call(&h, "POST", &format!("/groups/{}/leave", group_id), ann_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "left");

    let (status, _) = call(&h, "GET", &format!("/groups/{}", group_id), ann_token, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn blocks_made_over_http_stop_sends() {
    let h = harness();
    let (ann, _) = user(&h, "ann");
    let (bob, bob_token) = user(&h, "bob");
    let bob_token = Some(bob_token.as_str());

    let (status, body) = call(&h, "PUT", &format!("/blocks/{}", ann.user_id), bob_token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    let (_, blocked) = call(&h, "GET", "/blocks", bob_token, None).await;
    assert_eq!(blocked, json!([ann.user_id]));

    let refused = h
        .chat
        .send_message(&ann, Draft::text(Target::Direct(bob.user_id), "hello?"));
    assert!(matches!(refused, Err(ChatError::Blocked(_))));

    let (_, body) = call(&h, "DELETE", &format!("/blocks/{}", ann.user_id), bob_token, None).await;
    assert_eq!(body["changed"], true);
    let (_, blocked) = call(&h, "GET", "/blocks", bob_token, None).await;
    assert_eq!(blocked, json!([]));
}
