//! Room scenarios against an in-process coordinator.
//!
//! Sessions connect through `LocalConnector`, so every frame goes through
//! the same routing code as the WebSocket server, minus the sockets.

use std::sync::Arc;

use codecollab_sync::{
    Coordinator, LocalConnector, Notice, Session, SessionConfig, SessionError, SessionEvent,
    SessionHandle, SyncPolicy,
};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

struct Member {
    handle: SessionHandle,
    events: Receiver<SessionEvent>,
    task: JoinHandle<Result<(), SessionError>>,
}

/// Open a session, optionally seed its document, and start driving it.
async fn join(coordinator: &Arc<Coordinator>, config: SessionConfig, code: Option<&str>) -> Member {
    let mut session = Session::new(config, LocalConnector::new(Arc::clone(coordinator)));
    let events = session.take_event_rx().unwrap();
    session.open().await.unwrap();
    if let Some(code) = code {
        session.update_code(code);
    }
    let handle = session.handle();
    let task = tokio::spawn(async move { session.run().await });
    Member {
        handle,
        events,
        task,
    }
}

fn config(room: &str, name: &str) -> SessionConfig {
    SessionConfig::new("local", room, name)
}

/// Wait for the first event matching `pred`, discarding the rest.
async fn wait_for(
    events: &mut Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("Event stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

/// Wait until the displayed member list has `names`, in order.
async fn wait_for_members(events: &mut Receiver<SessionEvent>, names: &[&str]) {
    wait_for(events, |e| match e {
        SessionEvent::MembersChanged(members) => {
            members.iter().map(|p| p.display_name.as_str()).eq(names.iter().copied())
        }
        _ => false,
    })
    .await;
}

/// Everything that arrives within `window`.
async fn collect(events: &mut Receiver<SessionEvent>, window: Duration) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = timeout(window, events.recv()).await {
        out.push(event);
    }
    out
}

fn synced(events: &[SessionEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::DocumentSynced(code) => Some(code.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_late_joiner_receives_document() {
    let coordinator = Arc::new(Coordinator::new());

    let mut alice = join(&coordinator, config("R1", "alice"), Some("fn main() {}")).await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    let mut bob = join(&coordinator, config("R1", "bob"), None).await;
    wait_for_members(&mut alice.events, &["alice", "bob"]).await;
    let notice = wait_for(&mut alice.events, |e| matches!(e, SessionEvent::Notice(_))).await;
    assert_eq!(
        notice,
        SessionEvent::Notice(Notice::UserJoined { name: "bob".into() })
    );

    let event = wait_for(&mut bob.events, |e| {
        matches!(e, SessionEvent::DocumentSynced(_))
    })
    .await;
    assert_eq!(event, SessionEvent::DocumentSynced("fn main() {}".into()));
}

#[tokio::test]
async fn test_newcomer_sees_no_notice_for_itself() {
    let coordinator = Arc::new(Coordinator::new());
    let mut alice = join(&coordinator, config("R1", "alice"), None).await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    let mut bob = join(&coordinator, config("R1", "bob"), None).await;
    let events = collect(&mut bob.events, Duration::from_millis(150)).await;

    assert!(events.contains(&SessionEvent::MembersChanged(
        coordinator.members(&"R1".into()).await
    )));
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Notice(_))));
    // Nobody had a document, so nothing was synced.
    assert!(synced(&events).is_empty());
}

#[tokio::test]
async fn test_first_member_gets_no_sync() {
    let coordinator = Arc::new(Coordinator::new());
    let mut alice = join(&coordinator, config("R1", "alice"), None).await;

    let events = collect(&mut alice.events, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 1, "only the member list: {events:?}");
    assert!(synced(&events).is_empty());
}

#[tokio::test]
async fn test_leave_is_announced_by_identity() {
    let coordinator = Arc::new(Coordinator::new());
    let mut first = join(&coordinator, config("R1", "sam"), None).await;
    wait_for_members(&mut first.events, &["sam"]).await;
    let second = join(&coordinator, config("R1", "sam"), None).await;
    wait_for_members(&mut first.events, &["sam", "sam"]).await;
    let mut observer = join(&coordinator, config("R1", "olga"), None).await;
    wait_for_members(&mut observer.events, &["sam", "sam", "olga"]).await;

    let leaving_id = coordinator.members(&"R1".into()).await[1].connection_id.clone();
    second.handle.leave().unwrap();
    second.task.await.unwrap().unwrap();

    let notice = wait_for(&mut observer.events, |e| matches!(e, SessionEvent::Notice(_))).await;
    assert_eq!(
        notice,
        SessionEvent::Notice(Notice::UserLeft { name: "sam".into() })
    );
    let members = match wait_for(&mut observer.events, |e| {
        matches!(e, SessionEvent::MembersChanged(_))
    })
    .await
    {
        SessionEvent::MembersChanged(members) => members,
        other => panic!("Expected MembersChanged, got {other:?}"),
    };
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|p| p.connection_id != leaving_id));
    assert_eq!(members[0].display_name, "sam");
}

#[tokio::test]
async fn test_every_holder_syncs_by_default() {
    let coordinator = Arc::new(Coordinator::new());
    let mut alice = join(&coordinator, config("R1", "alice"), Some("v1")).await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    let mut carol = join(&coordinator, config("R1", "carol"), None).await;
    wait_for(&mut carol.events, |e| matches!(e, SessionEvent::DocumentSynced(_))).await;

    let mut dave = join(&coordinator, config("R1", "dave"), None).await;
    let events = collect(&mut dave.events, Duration::from_millis(200)).await;
    assert_eq!(synced(&events), vec!["v1", "v1"]);
}

#[tokio::test]
async fn test_earliest_member_policy_sends_one_sync() {
    let coordinator = Arc::new(Coordinator::new());
    let policy = SyncPolicy::EarliestMember;

    let mut alice = join(
        &coordinator,
        config("R1", "alice").with_sync_policy(policy),
        Some("v1"),
    )
    .await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    let mut carol = join(&coordinator, config("R1", "carol").with_sync_policy(policy), None).await;
    wait_for(&mut carol.events, |e| matches!(e, SessionEvent::DocumentSynced(_))).await;

    let mut dave = join(&coordinator, config("R1", "dave").with_sync_policy(policy), None).await;
    let events = collect(&mut dave.events, Duration::from_millis(200)).await;
    assert_eq!(synced(&events), vec!["v1"]);
}

#[tokio::test]
async fn test_back_to_back_joins_both_get_document() {
    let coordinator = Arc::new(Coordinator::new());
    let policy = SyncPolicy::EarliestMember;

    let mut alice = join(
        &coordinator,
        config("R1", "alice").with_sync_policy(policy),
        Some("v1"),
    )
    .await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    // Dave joins without waiting for bob to be synced.
    let mut bob = join(&coordinator, config("R1", "bob").with_sync_policy(policy), None).await;
    let mut dave = join(&coordinator, config("R1", "dave").with_sync_policy(policy), None).await;

    let bob_events = collect(&mut bob.events, Duration::from_millis(200)).await;
    let dave_events = collect(&mut dave.events, Duration::from_millis(200)).await;
    assert_eq!(synced(&bob_events), vec!["v1"]);
    assert_eq!(synced(&dave_events), vec!["v1"]);
}

#[tokio::test]
async fn test_live_edits_reach_other_members() {
    let coordinator = Arc::new(Coordinator::new());
    let mut alice = join(&coordinator, config("R1", "alice"), None).await;
    wait_for_members(&mut alice.events, &["alice"]).await;
    let mut bob = join(&coordinator, config("R1", "bob"), None).await;
    wait_for_members(&mut bob.events, &["alice", "bob"]).await;
    wait_for_members(&mut alice.events, &["alice", "bob"]).await;

    alice.handle.code_changed("let answer = 42;").unwrap();

    let event = wait_for(&mut bob.events, |e| matches!(e, SessionEvent::RemoteEdit(_))).await;
    assert_eq!(event, SessionEvent::RemoteEdit("let answer = 42;".into()));
    let own = collect(&mut alice.events, Duration::from_millis(100)).await;
    assert!(!own.iter().any(|e| matches!(e, SessionEvent::RemoteEdit(_))));
}

#[tokio::test]
async fn test_rooms_do_not_leak() {
    let coordinator = Arc::new(Coordinator::new());
    let mut alice = join(&coordinator, config("R1", "alice"), Some("secret")).await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    let mut eve = join(&coordinator, config("R2", "eve"), None).await;
    let events = collect(&mut eve.events, Duration::from_millis(150)).await;
    assert!(synced(&events).is_empty());
    let alice_events = collect(&mut alice.events, Duration::from_millis(50)).await;
    assert!(alice_events.is_empty(), "{alice_events:?}");
}

#[tokio::test]
async fn test_rejoin_gets_fresh_identity() {
    let coordinator = Arc::new(Coordinator::new());
    let mut alice = join(&coordinator, config("R1", "alice"), None).await;
    wait_for_members(&mut alice.events, &["alice"]).await;

    let bob = join(&coordinator, config("R1", "bob"), None).await;
    wait_for_members(&mut alice.events, &["alice", "bob"]).await;
    let first_id = coordinator.members(&"R1".into()).await[1].connection_id.clone();
    bob.handle.leave().unwrap();
    bob.task.await.unwrap().unwrap();
    wait_for_members(&mut alice.events, &["alice"]).await;

    let _bob_again = join(&coordinator, config("R1", "bob"), None).await;
    wait_for_members(&mut alice.events, &["alice", "bob"]).await;
    let second_id = coordinator.members(&"R1".into()).await[1].connection_id.clone();
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn test_empty_room_is_removed() {
    let coordinator = Arc::new(Coordinator::new());
    let alice = join(&coordinator, config("R1", "alice"), None).await;
    alice.handle.leave().unwrap();
    alice.task.await.unwrap().unwrap();

    timeout(Duration::from_secs(1), async {
        while coordinator.room_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("room should be dropped once empty");
}
