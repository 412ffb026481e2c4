/// Group membership, admin roles, system messages and mentions.
mod common;

use alumnet_db::queries::{groups, mentions};
use alumnet_gateway::chat::{ChatError, LeaveOutcome};
use alumnet_types::events::ServerEvent;
use alumnet_types::ids::{ConversationKey, Target};
use alumnet_types::models::MessageKind;

use common::*;

#[test]
fn creating_a_group_announces_it_with_a_system_message() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let mut ann_conn = connect(&svc, &ann);
    let mut bob_conn = connect(&svc, &bob);

    let group = svc
        .create_group(&ann, "  Class of 2010  ", None, &[bob.user_id, bob.user_id, ann.user_id])
        .unwrap();
    assert_eq!(group.name, "Class of 2010");
    assert_eq!(group.created_by, ann.user_id);
    assert_eq!(group.members.len(), 2);
    assert_eq!(group.admin_ids(), vec![ann.user_id]);

    let events = drain(&mut bob_conn);
    assert_eq!(kinds(&events), vec!["group_created", "chat_message"]);
    match &events[1] {
        ServerEvent::ChatMessage { message } => {
            assert_eq!(message.kind, MessageKind::System);
            assert_eq!(message.sender_id, ann.user_id);
            assert_eq!(message.group_id, Some(group.id));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(drain(&mut ann_conn).is_empty());

    assert!(matches!(
        svc.create_group(&ann, "", None, &[]),
        Err(ChatError::Validation(_))
    ));
}

#[test]
fn only_admins_add_and_duplicates_conflict() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let dee = user(&svc, "dee");
    let group = svc.create_group(&ann, "Alumni", None, &[bob.user_id]).unwrap();
    let mut bob_conn = connect(&svc, &bob);
    let mut dee_conn = connect(&svc, &dee);

    assert!(matches!(
        svc.add_member(&bob, group.id, dee.user_id),
        Err(ChatError::Permission(_))
    ));

    let snapshot = svc.add_member(&ann, group.id, dee.user_id).unwrap();
    assert_eq!(snapshot.members.len(), 3);

    let dee_events = drain(&mut dee_conn);
    assert_eq!(kinds(&dee_events), vec!["group_added_notification", "chat_message"]);
    match &dee_events[0] {
        ServerEvent::GroupAddedNotification { group: seen, added_by } => {
            assert_eq!(seen, &snapshot);
            assert_eq!(*added_by, ann.user_id);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        kinds(&drain(&mut bob_conn)),
        vec!["group_member_added", "chat_message"]
    );

    assert!(matches!(
        svc.add_member(&ann, group.id, dee.user_id),
        Err(ChatError::Conflict(_))
    ));
}

#[test]
fn removing_an_admin_clears_membership_and_role() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let cy = user(&svc, "cy");
    let group = svc
        .create_group(&ann, "Alumni", None, &[bob.user_id, cy.user_id])
        .unwrap();
    assert!(svc.set_admin(&ann, group.id, bob.user_id, true).unwrap());
    let mut bob_conn = connect(&svc, &bob);
    let mut cy_conn = connect(&svc, &cy);

    svc.remove_member(&ann, group.id, bob.user_id).unwrap();

    let membership = svc
        .db()
        .with_conn(|c| groups::membership(c, group.id, bob.user_id))
        .unwrap();
    assert_eq!(membership, None);
    let snapshot = svc.group_snapshot(&ann, group.id).unwrap();
    assert_eq!(snapshot.admin_ids(), vec![ann.user_id]);

    assert!(matches!(
        drain(&mut bob_conn).as_slice(),
        [ServerEvent::GroupRemoved { removed_by: Some(by), .. }] if *by == ann.user_id
    ));
    assert_eq!(
        kinds(&drain(&mut cy_conn)),
        vec!["group_member_left", "chat_message"]
    );

    // the removed member loses access at once
    assert!(matches!(
        svc.list_messages(&bob, ConversationKey::Group(group.id), None, 50),
        Err(ChatError::Permission(_))
    ));
    assert!(matches!(
        svc.remove_member(&ann, group.id, bob.user_id),
        Err(ChatError::NotFound("member"))
    ));
    assert!(matches!(
        svc.remove_member(&ann, group.id, ann.user_id),
        Err(ChatError::Validation(_))
    ));
}

#[test]
fn last_admin_leaving_promotes_the_oldest_member() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let cy = user(&svc, "cy");
    let group = svc
        .create_group(&ann, "Alumni", None, &[bob.user_id, cy.user_id])
        .unwrap();
    let mut cy_conn = connect(&svc, &cy);

    let outcome = svc.leave_group(&ann, group.id).unwrap();
    assert_eq!(
        outcome,
        LeaveOutcome::Left {
            promoted: Some(bob.user_id)
        }
    );
    let snapshot = svc.group_snapshot(&bob, group.id).unwrap();
    assert_eq!(snapshot.admin_ids(), vec![bob.user_id]);

    assert_eq!(
        kinds(&drain(&mut cy_conn)),
        vec!["group_member_left", "chat_message", "group_admin_changed"]
    );
}

#[test]
fn last_member_leaving_deletes_the_group() {
    let svc = service();
    let ann = user(&svc, "ann");
    let group = svc.create_group(&ann, "Just me", None, &[]).unwrap();

    assert_eq!(svc.leave_group(&ann, group.id).unwrap(), LeaveOutcome::GroupDeleted);
    assert!(matches!(
        svc.group_snapshot(&ann, group.id),
        Err(ChatError::NotFound("group"))
    ));
    assert!(svc.list_conversations(&ann).unwrap().is_empty());
}

#[test]
fn the_last_admin_cannot_be_demoted() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let group = svc.create_group(&ann, "Alumni", None, &[bob.user_id]).unwrap();

    assert!(matches!(
        svc.set_admin(&ann, group.id, ann.user_id, false),
        Err(ChatError::Conflict(_))
    ));
    assert!(matches!(
        svc.set_admin(&bob, group.id, bob.user_id, true),
        Err(ChatError::Permission(_))
    ));

    let mut bob_conn = connect(&svc, &bob);
    assert!(svc.set_admin(&ann, group.id, bob.user_id, true).unwrap());
    assert!(!svc.set_admin(&ann, group.id, bob.user_id, true).unwrap());
    assert!(svc.set_admin(&ann, group.id, ann.user_id, false).unwrap());
    assert_eq!(kinds(&drain(&mut bob_conn)), vec!["group_admin_changed"]);
}

#[test]
fn mentions_only_resolve_to_current_members() {
    let svc = service();
    let ann = user(&svc, "ann");
    let bob = user(&svc, "bob");
    let eve = user(&svc, "eve");
    let group = svc.create_group(&ann, "Alumni", None, &[bob.user_id]).unwrap();
    let mut bob_conn = connect(&svc, &bob);
    let mut eve_conn = connect(&svc, &eve);

    let hello = delivered(send(&svc, &ann, Target::Group(group.id), "hello @Bob and @bob"));
    let mentioned = svc
        .db()
        .with_conn(|c| mentions::mentions_for(c, hello.id))
        .unwrap();
    assert_eq!(mentioned, vec![bob.user_id]);

    let events = drain(&mut bob_conn);
    assert_eq!(kinds(&events), vec!["chat_message", "mention_notification"]);
    match &events[1] {
        ServerEvent::MentionNotification {
            group_name,
            mentioned_by,
            ..
        } => {
            assert_eq!(group_name, "Alumni");
            assert_eq!(*mentioned_by, ann.user_id);
        }
        other => panic!("unexpected {:?}", other),
    }

    let stray = delivered(send(&svc, &ann, Target::Group(group.id), "ping @eve @ann"));
    let mentioned = svc
        .db()
        .with_conn(|c| mentions::mentions_for(c, stray.id))
        .unwrap();
    assert!(mentioned.is_empty());
    assert!(drain(&mut eve_conn).is_empty());
}
