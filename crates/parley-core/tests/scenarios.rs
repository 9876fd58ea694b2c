//! End-to-end chat scenarios against an in-memory store and a manual clock.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use parley_core::{ChatService, ChatSettings, ErrorKind, ManualClock};
use parley_shared::{ChangeTopic, DeleteMode, UserId};
use parley_store::{Conversation, Database, ProfileSync};

struct World {
    chat: ChatService,
    clock: Arc<ManualClock>,
}

impl World {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        let chat = ChatService::new(
            Database::open_in_memory().unwrap(),
            clock.clone(),
            ChatSettings::default(),
        )
        .unwrap();
        Self { chat, clock }
    }

    fn user(&self, name: &str) -> UserId {
        let id = UserId::parse(name).unwrap();
        self.chat
            .sync_user(
                &id,
                ProfileSync {
                    email: format!("{name}@example.com"),
                    display_name: Some(name.to_string()),
                    avatar_url: None,
                },
            )
            .unwrap();
        id
    }

    fn wait_ms(&self, ms: i64) {
        self.clock.advance(Duration::milliseconds(ms));
    }
}

#[test]
fn direct_conversation_is_shared_by_both_sides() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");

    let one = w.chat.get_or_create_direct(&a, &b).unwrap();
    let two = w.chat.get_or_create_direct(&b, &a).unwrap();
    assert_eq!(one, two);
    assert_eq!(w.chat.list_conversations(&a).unwrap().len(), 1);
}

#[test]
fn unread_follows_read_marker() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();

    for text in ["one", "two", "three"] {
        w.chat.send(&a, conv, text, None).unwrap();
    }
    assert_eq!(w.chat.list_conversations(&b).unwrap()[0].unread_count, 3);
    assert_eq!(w.chat.list_conversations(&a).unwrap()[0].unread_count, 0);

    w.chat.mark_as_read(&b, conv).unwrap();
    assert_eq!(w.chat.list_conversations(&b).unwrap()[0].unread_count, 0);
}

#[test]
fn sent_message_is_listed_with_generated_id() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();

    let id = w.chat.send(&a, conv, "hello ben", None).unwrap();
    let messages = w.chat.list_messages(&b, conv).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, id);
    assert_eq!(messages[0].content, "hello ben");
    assert_eq!(messages[0].sender_id, a);
}

#[test]
fn hiding_twice_records_one_viewer() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();
    let id = w.chat.send(&a, conv, "embarrassing", None).unwrap();

    w.chat.delete_message(&b, id, DeleteMode::ForMe).unwrap();
    w.chat.delete_message(&b, id, DeleteMode::ForMe).unwrap();

    let seen_by_a = w.chat.list_messages(&a, conv).unwrap();
    assert_eq!(seen_by_a[0].deleted_for.len(), 1);
    assert!(seen_by_a[0].deleted_for.contains(&b));
}

#[test]
fn third_reaction_evicts_the_first() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();
    let id = w.chat.send(&a, conv, "news!", None).unwrap();

    for emoji in ["😀", "😮", "❤️"] {
        w.chat.react(&b, id, emoji).unwrap();
        let message = &w.chat.list_messages(&b, conv).unwrap()[0];
        assert!(message.reactions.iter().filter(|r| r.user_id == b).count() <= 2);
    }
    let message = &w.chat.list_messages(&b, conv).unwrap()[0];
    let emoji: Vec<&str> = message.reactions.iter().map(|r| r.emoji.as_str()).collect();
    assert_eq!(emoji, vec!["😮", "❤️"]);
}

#[test]
fn tombstone_cannot_be_edited_by_anyone() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();
    let id = w.chat.send(&a, conv, "draft", None).unwrap();
    w.chat.delete_message(&a, id, DeleteMode::ForEveryone).unwrap();

    assert_eq!(
        w.chat.edit(&a, id, "new").unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        w.chat.edit(&b, id, "new").unwrap_err().kind(),
        ErrorKind::InvalidState
    );
}

#[test]
fn block_then_unblock() {
    let w = World::new();
    let x = w.user("xena");
    let y = w.user("yuri");
    let conv = w.chat.get_or_create_direct(&x, &y).unwrap();

    w.chat.toggle_block(&x, &y).unwrap();
    assert_eq!(
        w.chat.send(&y, conv, "hey", None).unwrap_err().kind(),
        ErrorKind::BlockedRelationship
    );

    w.chat.toggle_block(&x, &y).unwrap();
    w.chat.send(&y, conv, "hey", None).unwrap();
}

#[test]
fn kicked_member_reads_history_but_cannot_send() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let c = w.user("cat");
    let group = w
        .chat
        .create_group(&a, "trip", vec![b.clone(), c.clone()])
        .unwrap();

    w.chat.send(&b, group, "before", None).unwrap();
    w.wait_ms(10);
    w.chat.kick_member(&a, group, &b).unwrap();
    w.wait_ms(10);
    w.chat.send(&c, group, "after", None).unwrap();

    let history = w.chat.list_messages(&b, group).unwrap();
    let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["before"]);

    assert_eq!(
        w.chat.send(&b, group, "let me in", None).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );

    let summary = &w.chat.list_conversations(&b).unwrap()[0];
    match &summary.conversation {
        Conversation::Group(g) => {
            assert!(g.is_past_member(&b));
            assert!(!g.is_member(&b));
        }
        Conversation::Direct(_) => panic!("expected group"),
    }
    assert_eq!(summary.unread_count, 0);
}

#[test]
fn leaving_with_history_deletion_hides_group() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let group = w.chat.create_group(&a, "book club", vec![b.clone()]).unwrap();

    w.chat.leave_group(&a, group, true).unwrap();

    assert!(w.chat.list_conversations(&a).unwrap().is_empty());
    let summary = &w.chat.list_conversations(&b).unwrap()[0];
    match &summary.conversation {
        Conversation::Group(g) => {
            assert!(!g.is_member(&a));
            assert!(g.deleted_by.contains(&a));
            assert_eq!(g.admin_id, b);
        }
        Conversation::Direct(_) => panic!("expected group"),
    }
    assert_eq!(
        w.chat.list_messages(&a, group).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
}

#[test]
fn typing_lapses_after_window() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();

    w.chat.start_typing(&a, conv).unwrap();
    w.wait_ms(2_000);
    assert!(w.chat.active_typers(&b, conv).unwrap().contains(&a));

    w.wait_ms(1_000);
    assert!(w.chat.active_typers(&b, conv).unwrap().is_empty());
}

#[test]
fn subscribers_only_hear_their_conversations() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let c = w.user("cat");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();

    let mut rx = w.chat.subscribe();
    w.chat.send(&a, conv, "psst", None).unwrap();

    let mut saw_messages = false;
    while let Ok(event) = rx.try_recv() {
        if let ChangeTopic::Messages { conversation_id } = &event.topic {
            assert_eq!(*conversation_id, conv);
            assert!(event.audience.includes(&b));
            assert!(!event.audience.includes(&c));
            saw_messages = true;
        }
    }
    assert!(saw_messages);
}

#[test]
fn failed_mutation_publishes_nothing() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let conv = w.chat.get_or_create_direct(&a, &b).unwrap();
    w.chat.toggle_block(&b, &a).unwrap();

    let mut rx = w.chat.subscribe();
    assert!(w.chat.send(&a, conv, "hello?", None).is_err());
    assert!(rx.try_recv().is_err());
    assert!(w.chat.list_messages(&a, conv).unwrap().is_empty());
}

#[test]
fn reopened_store_keeps_timestamps_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.db");
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

    let (a, b, conv, first) = {
        let clock = Arc::new(ManualClock::new(start));
        let chat = ChatService::new(
            Database::open_at(&path).unwrap(),
            clock,
            ChatSettings::default(),
        )
        .unwrap();
        let a = UserId::parse("ana").unwrap();
        let b = UserId::parse("ben").unwrap();
        for id in [&a, &b] {
            chat.sync_user(id, ProfileSync::default()).unwrap();
        }
        let conv = chat.get_or_create_direct(&a, &b).unwrap();
        let first = chat.send(&a, conv, "first", None).unwrap();
        (a, b, conv, first)
    };

    // Wall clock went backwards between runs.
    let clock = Arc::new(ManualClock::new(start - Duration::hours(1)));
    let chat = ChatService::new(
        Database::open_at(&path).unwrap(),
        clock,
        ChatSettings::default(),
    )
    .unwrap();
    chat.send(&b, conv, "second", None).unwrap();

    let messages = chat.list_messages(&a, conv).unwrap();
    assert_eq!(messages[0].id, first);
    assert!(messages[1].created_at > messages[0].created_at);
}

#[test]
fn read_marker_newer_than_any_message_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.db");
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

    let (a, b, conv) = {
        let clock = Arc::new(ManualClock::new(start));
        let chat = ChatService::new(
            Database::open_at(&path).unwrap(),
            clock.clone(),
            ChatSettings::default(),
        )
        .unwrap();
        let a = UserId::parse("ana").unwrap();
        let b = UserId::parse("ben").unwrap();
        for id in [&a, &b] {
            chat.sync_user(id, ProfileSync::default()).unwrap();
        }
        let conv = chat.get_or_create_direct(&a, &b).unwrap();
        chat.send(&a, conv, "first", None).unwrap();

        clock.advance(Duration::minutes(30));
        chat.mark_as_read(&b, conv).unwrap();
        (a, b, conv)
    };

    // Restarted with the wall clock between the message and the read marker.
    let clock = Arc::new(ManualClock::new(start + Duration::minutes(20)));
    let chat = ChatService::new(
        Database::open_at(&path).unwrap(),
        clock,
        ChatSettings::default(),
    )
    .unwrap();
    assert_eq!(chat.list_conversations(&b).unwrap()[0].unread_count, 0);

    chat.send(&a, conv, "second", None).unwrap();
    assert_eq!(chat.list_conversations(&b).unwrap()[0].unread_count, 1);
}

#[test]
fn member_added_later_counts_unread_from_group_creation() {
    let w = World::new();
    let a = w.user("ana");
    let b = w.user("ben");
    let c = w.user("cy");

    let group = w.chat.create_group(&a, "trip", vec![b.clone()]).unwrap();
    w.wait_ms(10);
    w.chat.send(&a, group, "plan", None).unwrap();
    w.wait_ms(10);
    w.chat.send(&a, group, "tickets", None).unwrap();

    // Ben never opened the group; Cy joins after both messages.
    assert_eq!(w.chat.list_conversations(&b).unwrap()[0].unread_count, 2);
    assert_eq!(w.chat.add_members(&a, group, vec![c.clone()]).unwrap(), vec![c.clone()]);

    let summary = &w.chat.list_conversations(&c).unwrap()[0];
    assert_eq!(summary.conversation.id(), group);
    assert_eq!(summary.unread_count, 2);

    w.chat.mark_as_read(&c, group).unwrap();
    assert_eq!(w.chat.list_conversations(&c).unwrap()[0].unread_count, 0);
}
