/// Conversation gate: requests between strangers, acceptance, decline and
/// blocks in either direction.
mod common;

use alumnet_gateway::chat::{ChatError, Draft, GateState, SendOutcome};
use alumnet_types::api::Identity;
use alumnet_types::events::{BlockReason, ServerEvent};
use alumnet_types::ids::{ConversationKey, Target};
use alumnet_types::models::RequestStatus;
use uuid::Uuid;

use common::*;

#[test]
fn repeated_sends_while_pending_create_one_request() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let mut bob_conn = connect(&svc, &bob);

    let first = send(&svc, &ann, Target::Direct(bob.user_id), "hello");
    let second = send(&svc, &ann, Target::Direct(bob.user_id), "hello again");
    // the other side trying to start the same conversation joins the request
    let third = send(&svc, &bob, Target::Direct(ann.user_id), "hey");

    let ids: Vec<_> = [first, second, third]
        .into_iter()
        .map(|outcome| match outcome {
            SendOutcome::RequestPending { request, created } => (request.id, created),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert!(ids[0].1);
    assert!(ids.iter().all(|(id, _)| *id == ids[0].0));
    assert!(!ids[1].1 && !ids[2].1);

    assert_eq!(svc.pending_requests(&bob).unwrap().len(), 1);
    assert_eq!(svc.conversation_state(ann.user_id, bob.user_id).unwrap(), GateState::Pending);

    let events = drain(&mut bob_conn);
    assert_eq!(kinds(&events), vec!["message_request"]);
    match &events[0] {
        ServerEvent::MessageRequest { request, status } => {
            assert_eq!(*status, RequestStatus::Pending);
            assert_eq!(request.content, "hello");
            assert_eq!(request.sender_username, "ann");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn accepting_materializes_the_original_content_once() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let mut ann_conn = connect(&svc, &ann);

    let request = match send(&svc, &ann, Target::Direct(bob.user_id), "can we talk?") {
        SendOutcome::RequestPending { request, .. } => request,
        other => panic!("unexpected {:?}", other),
    };

    // only the receiver may answer
    assert!(matches!(
        svc.accept_request(&ann, request.id),
        Err(ChatError::Permission(_))
    ));

    let first = svc.accept_request(&bob, request.id).unwrap();
    assert_eq!(first.content, "can we talk?");
    assert_eq!(first.sender_id, ann.user_id);
    assert_eq!(first.receiver_id, Some(bob.user_id));

    assert!(matches!(
        svc.accept_request(&bob, request.id),
        Err(ChatError::Conflict(_))
    ));

    let key = ConversationKey::direct(ann.user_id, bob.user_id);
    let history = svc.list_messages(&bob, key, None, 50).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first.id);
    assert_eq!(svc.conversation_state(bob.user_id, ann.user_id).unwrap(), GateState::Open);
    assert!(svc.pending_requests(&bob).unwrap().is_empty());

    let events = drain(&mut ann_conn);
    assert_eq!(kinds(&events), vec!["message_request", "chat_message"]);
    assert!(matches!(
        &events[0],
        ServerEvent::MessageRequest { status: RequestStatus::Accepted, .. }
    ));

    // open now: the next send goes straight through
    let next = delivered(send(&svc, &ann, Target::Direct(bob.user_id), "thanks"));
    assert_eq!(next.conversation, key);
}

#[test]
fn declining_leaves_no_residual_state() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let mut ann_conn = connect(&svc, &ann);

    let request = match send(&svc, &ann, Target::Direct(bob.user_id), "hi") {
        SendOutcome::RequestPending { request, .. } => request,
        other => panic!("unexpected {:?}", other),
    };
    let declined = svc.decline_request(&bob, request.id).unwrap();
    assert_eq!(declined.id, request.id);

    assert_eq!(svc.conversation_state(ann.user_id, bob.user_id).unwrap(), GateState::None);
    assert!(svc.pending_requests(&bob).unwrap().is_empty());
    assert!(matches!(
        svc.decline_request(&bob, request.id),
        Err(ChatError::NotFound(_))
    ));
    let key = ConversationKey::direct(ann.user_id, bob.user_id);
    assert!(svc.list_messages(&ann, key, None, 50).unwrap().is_empty());

    let events = drain(&mut ann_conn);
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::MessageRequest { status: RequestStatus::Declined, .. }]
    ));

    // a fresh request is possible again
    assert!(matches!(
        send(&svc, &ann, Target::Direct(bob.user_id), "second try"),
        SendOutcome::RequestPending { created: true, .. }
    ));
}

#[test]
fn blocks_stop_sends_even_in_open_conversations() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    open_conversation(&svc, &ann, &bob);

    assert!(svc.block_user(&bob, ann.user_id).unwrap());
    assert!(!svc.block_user(&bob, ann.user_id).unwrap());

    let from_ann = svc.send_message(&ann, Draft::text(Target::Direct(bob.user_id), "hello?"));
    assert!(matches!(from_ann, Err(ChatError::Blocked(BlockReason::BlockedByThem))));
    let from_bob = svc.send_message(&bob, Draft::text(Target::Direct(ann.user_id), "bye"));
    assert!(matches!(from_bob, Err(ChatError::Blocked(BlockReason::YouBlocked))));

    // history survives the block
    let key = ConversationKey::direct(ann.user_id, bob.user_id);
    assert_eq!(svc.list_messages(&ann, key, None, 50).unwrap().len(), 1);
    assert_eq!(svc.blocked_users(&bob).unwrap(), vec![ann.user_id]);

    assert!(svc.unblock_user(&bob, ann.user_id).unwrap());
    delivered(send(&svc, &ann, Target::Direct(bob.user_id), "we good?"));
}

#[test]
fn blocked_strangers_cannot_even_request() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    svc.block_user(&ann, bob.user_id).unwrap();

    let err = svc
        .send_message(&bob, Draft::text(Target::Direct(ann.user_id), "hi"))
        .unwrap_err();
    assert_eq!(err.reason(), Some(BlockReason::BlockedByThem));
    assert!(svc.pending_requests(&ann).unwrap().is_empty());

    assert!(matches!(
        svc.block_user(&ann, ann.user_id),
        Err(ChatError::Validation(_))
    ));
}

#[test]
fn unknown_users_cannot_be_messaged_or_blocked() {
    let svc = service();
    let ann = user(&svc, "ann");
    let ghost = Uuid::new_v4();

    let sent = svc.send_message(&ann, Draft::text(Target::Direct(ghost), "hi"));
    assert!(matches!(sent, Err(ChatError::NotFound("user"))));
    assert_eq!(svc.conversation_state(ann.user_id, ghost).unwrap(), GateState::None);

    assert!(matches!(svc.block_user(&ann, ghost), Err(ChatError::NotFound("user"))));
    assert!(svc.blocked_users(&ann).unwrap().is_empty());

    // the pending slot for the pair stays free once the user shows up
    let late = Identity::new(ghost, "late");
    svc.register_identity(&late).unwrap();
    match send(&svc, &ann, Target::Direct(ghost), "hi again") {
        SendOutcome::RequestPending { created, .. } => assert!(created),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn attachments_wait_until_the_request_is_accepted() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    svc.db()
        .register_attachment(&alumnet_db::models::AttachmentRow {
            id: "blob-1".into(),
            uploader_id: ann.user_id,
            filename: "cv.pdf".into(),
            content_type: "application/pdf".into(),
            size_bytes: 2048,
            url: None,
        })
        .unwrap();

    let draft = Draft {
        target: Target::Direct(bob.user_id),
        content: "my cv".into(),
        reply_to: None,
        attachment_ids: vec!["blob-1".into()],
    };
    assert!(matches!(
        svc.send_message(&ann, draft),
        Err(ChatError::Validation(_))
    ));
    assert!(svc.pending_requests(&bob).unwrap().is_empty());
}
