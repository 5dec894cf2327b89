use std::sync::Arc;
use std::thread;

use murmur_core::{ConnectionId, MessageRouter, Room, RouterError, SessionState};
use murmur_protocol::{ChatEvent, EventType, InboundEvent};
use tokio::sync::broadcast::{error::TryRecvError, Receiver};

fn setup() -> (MessageRouter, Arc<Room>, Receiver<Arc<ChatEvent>>) {
    let room = Arc::new(Room::new());
    let listener = room.subscribe();
    let router = MessageRouter::new(room.clone());
    (router, room, listener)
}

fn next(rx: &mut Receiver<Arc<ChatEvent>>) -> ChatEvent {
    (*rx.try_recv().expect("an event should have been broadcast")).clone()
}

#[test]
fn join_chat_disconnect_broadcasts_in_order() {
    let (router, _room, mut rx) = setup();
    let a = ConnectionId::new("A");
    router.on_connect(&a);

    router.on_message(&a, InboundEvent::join("alice")).unwrap();
    let joined = next(&mut rx);
    assert_eq!(joined.username, "alice");
    assert_eq!(joined.message, "alice joined the chat");
    assert_eq!(joined.kind, EventType::Join);
    assert!(!joined.timestamp.is_empty());

    router.on_message(&a, InboundEvent::chat("alice", "hi")).unwrap();
    let chat = next(&mut rx);
    assert_eq!(chat.username, "alice");
    assert_eq!(chat.message, "hi");
    assert_eq!(chat.kind, EventType::Chat);
    assert!(chat.timestamp >= joined.timestamp);

    router.on_disconnect(&a).unwrap();
    let left = next(&mut rx);
    assert_eq!(left.username, "alice");
    assert_eq!(left.message, "alice left the chat");
    assert_eq!(left.kind, EventType::Leave);
    assert!(left.timestamp >= chat.timestamp);

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(router.participants().is_empty());
}

#[test]
fn chat_before_join_is_not_broadcast() {
    let (router, _room, mut rx) = setup();
    let b = ConnectionId::new("B");
    router.on_connect(&b);

    let err = router
        .on_message(&b, InboundEvent::chat("bob", "hello?"))
        .unwrap_err();
    assert!(matches!(
        err,
        RouterError::Protocol(_) | RouterError::NotBound(_)
    ));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn same_name_on_two_connections() {
    let (router, _room, mut rx) = setup();
    let a = ConnectionId::new("A");
    let b = ConnectionId::new("B");
    router.on_connect(&a);
    router.on_connect(&b);

    router.on_message(&a, InboundEvent::join("bob")).unwrap();
    router.on_message(&b, InboundEvent::join("bob")).unwrap();

    assert_eq!(next(&mut rx).message, "bob joined the chat");
    assert_eq!(next(&mut rx).message, "bob joined the chat");
    assert_eq!(router.participants(), vec!["bob", "bob"]);

    // One leaving does not affect the other.
    router.on_disconnect(&a).unwrap();
    assert_eq!(next(&mut rx).kind, EventType::Leave);
    assert_eq!(router.state(&b), Some(SessionState::Joined));
    router.on_message(&b, InboundEvent::chat("bob", "still here")).unwrap();
    assert_eq!(next(&mut rx).message, "still here");
}

#[test]
fn duplicate_join_does_not_double_bind() {
    let (router, _room, mut rx) = setup();
    let a = ConnectionId::new("A");
    router.on_connect(&a);

    router.on_message(&a, InboundEvent::join("alice")).unwrap();
    assert!(matches!(
        router.on_message(&a, InboundEvent::join("alice")),
        Err(RouterError::DuplicateBind(_))
    ));

    next(&mut rx);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(router.stats().participants, 1);
}

#[test]
fn errors_leave_router_serviceable() {
    let (router, _room, mut rx) = setup();
    let bad = ConnectionId::new("bad");
    let good = ConnectionId::new("good");
    router.on_connect(&bad);
    router.on_connect(&good);

    assert!(router.on_raw(&bad, b"garbage").is_err());
    assert!(router.on_raw(&bad, br#"{"type":"CHAT","message":"x"}"#).is_err());
    assert!(router.on_raw(&bad, br#"{"type":"JOIN","username":""}"#).is_err());

    router
        .on_raw(&good, br#"{"username":"gina","type":"JOIN"}"#)
        .unwrap();
    assert_eq!(next(&mut rx).username, "gina");
}

#[test]
fn late_subscriber_gets_no_history() {
    let (router, room, _rx) = setup();
    let a = ConnectionId::new("A");
    router.on_connect(&a);
    router.on_message(&a, InboundEvent::join("alice")).unwrap();

    let mut late = room.subscribe();
    assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

    router.on_message(&a, InboundEvent::chat("alice", "now")).unwrap();
    assert_eq!(next(&mut late).message, "now");
}

#[test]
fn concurrent_connections_keep_registry_consistent() {
    let room = Arc::new(Room::with_capacity(4096));
    let mut listener = room.subscribe();
    let router = Arc::new(MessageRouter::new(room.clone()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                for i in 0..50 {
                    let id = ConnectionId::new(format!("t{t}-c{i}"));
                    router.on_connect(&id);
                    router
                        .on_message(&id, InboundEvent::join(format!("user{t}")))
                        .unwrap();
                    router
                        .on_message(&id, InboundEvent::chat(format!("user{t}"), "hi"))
                        .unwrap();
                    router.on_disconnect(&id).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = router.stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.participants, 0);
    assert_eq!(stats.events_published, 8 * 50 * 3);

    // Every connection published, and the shared stream never steps back in time.
    let mut timestamps = Vec::new();
    while let Ok(event) = listener.try_recv() {
        timestamps.push(event.timestamp.clone());
    }
    assert_eq!(timestamps.len(), 8 * 50 * 3);
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
}
