//! The single shared room: session registry, handshake, relay, and fan-out.
//!
//! All registry mutation and every fan-out happens under one mutex, so any two
//! broadcasts reach every common recipient in the same order and a newcomer's
//! `init` snapshot agrees exactly with the `join`/`leave` events around it.
//! Sends under the lock are non-blocking queue pushes; socket writes happen in
//! each connection's writer task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use plaza_core::{ClientMessage, Position, ServerMessage, SessionId, UserSnapshot, SPAWN_POINT};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::session::{Session, SessionState};
use crate::websocket::connection::ClientConnection;

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the event.
    pub delivered: usize,
    /// Recipients whose send failed (full or closed queue).
    pub failed: usize,
}

impl BroadcastReport {
    /// Total recipients attempted.
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed
    }
}

/// What [`Room::handle_message`] did with an inbound payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Stamped with the sender's id and fanned out to everyone else.
    Relayed(BroadcastReport),
    /// The payload was not a valid client message and was dropped.
    Malformed {
        /// Short classification of the decode failure.
        reason: &'static str,
    },
    /// The sender is no longer registered; nothing was sent.
    UnknownSession,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    next_seq: u64,
}

impl Registry {
    /// Snapshots of every registered session, in join order.
    fn ordered(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.joined_seq());
        sessions
    }

    /// Enqueue `payload` for every session except `exclude`.
    fn fan_out(&self, payload: &Arc<str>, event_type: &str, exclude: Option<&SessionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (id, session) in &self.sessions {
            if exclude == Some(id) {
                continue;
            }
            match session.connection().send(Arc::clone(payload)) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(session_id = %id, event_type, %error, "failed to send event to client");
                }
            }
        }
        report
    }
}

/// The shared room coordinator.
pub struct Room {
    registry: Mutex<Registry>,
    spawn: Position,
}

impl Room {
    /// Create an empty room spawning newcomers at the canvas center.
    pub fn new() -> Self {
        Self::with_spawn(SPAWN_POINT)
    }

    /// Create an empty room with a custom spawn point.
    pub fn with_spawn(spawn: Position) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            spawn,
        }
    }

    /// Admit a new participant whose outbound queue is `tx`.
    ///
    /// Assigns a fresh id, sends `init` to the newcomer only (listing everyone
    /// already present), registers it, then announces `join` to the others.
    /// The three steps are atomic with respect to every other room operation.
    pub fn connect(&self, tx: mpsc::Sender<Arc<str>>) -> Arc<ClientConnection> {
        let connection = Arc::new(ClientConnection::new(SessionId::new(), tx));
        let id = connection.id.clone();
        let spawn = self.spawn;

        let mut registry = self.registry.lock();

        let users: Vec<UserSnapshot> = registry.ordered().iter().map(|s| s.snapshot()).collect();
        let peers = users.len();
        let init = ServerMessage::Init {
            user_id: id.clone(),
            x: spawn.x,
            y: spawn.y,
            users,
        };
        match init.encode() {
            Ok(json) => {
                if let Err(error) = connection.send(Arc::from(json)) {
                    warn!(session_id = %id, %error, "failed to send init to client");
                }
            }
            Err(error) => warn!(session_id = %id, %error, "failed to serialize init"),
        }

        let seq = registry.next_seq;
        registry.next_seq += 1;
        let _ = registry
            .sessions
            .insert(id.clone(), Session::new(Arc::clone(&connection), spawn, seq));
        let _ = connection.transition(SessionState::Active);

        let join = ServerMessage::Join {
            user_id: id.clone(),
            x: spawn.x,
            y: spawn.y,
        };
        let report = Self::broadcast_locked(&registry, &join, Some(&id));
        drop(registry);

        info!(session_id = %id, peers, notified = report.delivered, "session joined");
        connection
    }

    /// Decode an inbound payload from `sender` and relay it to everyone else.
    ///
    /// Client-supplied identity fields are discarded; the relayed event always
    /// carries `sender`. A `move` also updates the sender's tracked position.
    pub fn handle_message(&self, sender: &SessionId, raw: &str) -> Dispatch {
        let message = match ClientMessage::decode(raw) {
            Ok(message) => message,
            Err(error) => {
                debug!(session_id = %sender, error_kind = error.error_kind(), %error, "dropping malformed message");
                return Dispatch::Malformed {
                    reason: error.error_kind(),
                };
            }
        };

        let mut registry = self.registry.lock();
        let Some(session) = registry.sessions.get_mut(sender) else {
            debug!(session_id = %sender, event_type = message.event_type(), "message from unknown session ignored");
            return Dispatch::UnknownSession;
        };
        if let ClientMessage::Move { x, y } = &message {
            session.set_position(Position::new(*x, *y));
        }

        let event = message.stamp(sender.clone());
        let report = Self::broadcast_locked(&registry, &event, Some(sender));
        debug!(
            session_id = %sender,
            event_type = event.event_type(),
            recipients = report.recipients(),
            failed = report.failed,
            "relayed event"
        );
        Dispatch::Relayed(report)
    }

    /// Remove `id` and announce `leave` to everyone remaining.
    ///
    /// Returns `false` (and sends nothing) if `id` was not registered, so
    /// calling this twice for the same session emits exactly one `leave`.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        let mut registry = self.registry.lock();
        let Some(session) = registry.sessions.remove(id) else {
            return false;
        };
        let _ = session.connection().transition(SessionState::Closed);

        let leave = ServerMessage::Leave { user_id: id.clone() };
        let report = Self::broadcast_locked(&registry, &leave, None);
        let remaining = registry.sessions.len();
        drop(registry);

        info!(
            session_id = %id,
            remaining,
            notified = report.delivered,
            dropped_messages = session.connection().drop_count(),
            "session left"
        );
        true
    }

    /// Send `event` to every registered session except `exclude`.
    ///
    /// A failing recipient is logged and skipped; the rest still receive it.
    pub fn broadcast(&self, event: &ServerMessage, exclude: Option<&SessionId>) -> BroadcastReport {
        let registry = self.registry.lock();
        Self::broadcast_locked(&registry, event, exclude)
    }

    fn broadcast_locked(
        registry: &Registry,
        event: &ServerMessage,
        exclude: Option<&SessionId>,
    ) -> BroadcastReport {
        let json = match event.encode() {
            Ok(json) => json,
            Err(error) => {
                warn!(event_type = event.event_type(), %error, "failed to serialize event");
                return BroadcastReport::default();
            }
        };
        registry.fan_out(&Arc::from(json), event.event_type(), exclude)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.registry.lock().sessions.len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().sessions.is_empty()
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.registry.lock().sessions.contains_key(id)
    }

    /// Last known position of `id`.
    pub fn position(&self, id: &SessionId) -> Option<Position> {
        self.registry.lock().sessions.get(id).map(Session::position)
    }

    /// Registered ids in join order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.registry
            .lock()
            .ordered()
            .into_iter()
            .map(|s| s.id().clone())
            .collect()
    }

    /// Everyone present, in join order.
    pub fn snapshot(&self) -> Vec<UserSnapshot> {
        self.registry
            .lock()
            .ordered()
            .into_iter()
            .map(Session::snapshot)
            .collect()
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use plaza_core::logging::capture_logs;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn join(room: &Room) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        join_with_capacity(room, 32)
    }

    fn join_with_capacity(room: &Room, capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (room.connect(tx), rx)
    }

    fn next(rx: &mut mpsc::Receiver<Arc<str>>) -> ServerMessage {
        let raw = rx.try_recv().expect("expected a queued event");
        ServerMessage::decode(&raw).expect("server emitted invalid JSON")
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(ServerMessage::decode(&raw).unwrap());
        }
        out
    }

    #[test]
    fn first_connect_gets_empty_init() {
        let room = Room::new();
        let (a, mut rx) = join(&room);

        assert_eq!(
            next(&mut rx),
            ServerMessage::Init {
                user_id: a.id.clone(),
                x: 400.0,
                y: 300.0,
                users: vec![],
            }
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(a.state(), SessionState::Active);
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn three_connects_see_consistent_membership() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (b, mut rx_b) = join(&room);
        let (c, mut rx_c) = join(&room);

        let a_events = drain(&mut rx_a);
        assert_eq!(a_events.len(), 3);
        assert_matches!(&a_events[0], ServerMessage::Init { users, .. } if users.is_empty());
        assert_eq!(a_events[1], ServerMessage::Join { user_id: b.id.clone(), x: 400.0, y: 300.0 });
        assert_eq!(a_events[2], ServerMessage::Join { user_id: c.id.clone(), x: 400.0, y: 300.0 });

        let b_events = drain(&mut rx_b);
        assert_eq!(b_events.len(), 2);
        assert_matches!(&b_events[0], ServerMessage::Init { user_id, users, .. } => {
            assert_eq!(user_id, &b.id);
            assert_eq!(users.iter().map(|u| &u.id).collect::<Vec<_>>(), vec![&a.id]);
        });
        assert_eq!(b_events[1].event_type(), "join");
        assert_eq!(b_events[1].user_id(), &c.id);

        let c_events = drain(&mut rx_c);
        assert_eq!(c_events.len(), 1);
        assert_matches!(&c_events[0], ServerMessage::Init { users, .. } => {
            assert_eq!(users.iter().map(|u| &u.id).collect::<Vec<_>>(), vec![&a.id, &b.id]);
        });

        assert_eq!(room.session_ids(), vec![a.id.clone(), b.id.clone(), c.id.clone()]);
    }

    #[test]
    fn move_is_stamped_and_not_echoed() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (b, mut rx_b) = join(&room);
        let _ = drain(&mut rx_a);
        let _ = drain(&mut rx_b);

        let dispatch = room.handle_message(&a.id, r#"{"type":"move","x":10,"y":20,"userId":"spoofed"}"#);
        assert_eq!(dispatch, Dispatch::Relayed(BroadcastReport { delivered: 1, failed: 0 }));

        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Move { user_id: a.id.clone(), x: 10.0, y: 20.0 }
        );
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(room.position(&a.id), Some(Position::new(10.0, 20.0)));
    }

    #[test]
    fn moves_only_update_the_sender_position() {
        let room = Room::new();
        let (a, _rx_a) = join(&room);
        let (b, _rx_b) = join(&room);

        let _ = room.handle_message(&a.id, r#"{"type":"move","x":10,"y":20}"#);
        assert_eq!(room.position(&a.id), Some(Position::new(10.0, 20.0)));
        assert_eq!(room.position(&b.id), Some(Position::new(400.0, 300.0)));

        let _ = room.handle_message(&b.id, r#"{"type":"move","x":55,"y":66}"#);
        assert_eq!(room.position(&a.id), Some(Position::new(10.0, 20.0)));
        assert_eq!(room.position(&b.id), Some(Position::new(55.0, 66.0)));

        let _ = room.handle_message(&a.id, r#"{"type":"move","x":11,"y":21}"#);
        let _ = room.handle_message(&b.id, r#"{"type":"move","x":77,"y":88}"#);
        assert_eq!(room.position(&a.id), Some(Position::new(11.0, 21.0)));
        assert_eq!(room.position(&b.id), Some(Position::new(77.0, 88.0)));

        // A chat never moves anyone.
        let _ = room.handle_message(&b.id, r#"{"type":"chat","message":"here"}"#);
        assert_eq!(room.position(&a.id), Some(Position::new(11.0, 21.0)));
        assert_eq!(room.position(&b.id), Some(Position::new(77.0, 88.0)));
    }

    #[test]
    fn chat_is_relayed_to_everyone_else() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (_b, mut rx_b) = join(&room);
        let (_c, mut rx_c) = join(&room);
        let _ = (drain(&mut rx_a), drain(&mut rx_b), drain(&mut rx_c));

        let dispatch = room.handle_message(&a.id, r#"{"type":"chat","message":"hi"}"#);
        assert_matches!(dispatch, Dispatch::Relayed(report) if report.delivered == 2);

        let expected = ServerMessage::Chat { user_id: a.id.clone(), message: "hi".into() };
        assert_eq!(next(&mut rx_b), expected);
        assert_eq!(next(&mut rx_c), expected);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn late_joiner_sees_tracked_positions() {
        let room = Room::new();
        let (a, _rx_a) = join(&room);
        let _ = room.handle_message(&a.id, r#"{"type":"move","x":55.5,"y":12}"#);

        let (_b, mut rx_b) = join(&room);
        assert_matches!(next(&mut rx_b), ServerMessage::Init { users, .. } => {
            assert_eq!(users, vec![UserSnapshot { id: a.id.clone(), x: 55.5, y: 12.0 }]);
        });
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let room = Room::new();
        let (a, _rx_a) = join(&room);
        let (_b, mut rx_b) = join(&room);
        let _ = drain(&mut rx_b);

        let cases = [
            ("not json", "invalid_json"),
            ("[1,2]", "not_an_object"),
            (r#"{"x":1}"#, "missing_type"),
            (r#"{"type":"teleport"}"#, "unknown_type"),
            (r#"{"type":"move","x":"far"}"#, "invalid_fields"),
        ];
        for (raw, reason) in cases {
            assert_eq!(room.handle_message(&a.id, raw), Dispatch::Malformed { reason }, "{raw}");
        }
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(room.position(&a.id), Some(SPAWN_POINT));
    }

    #[test]
    fn leave_reaches_remaining_and_stale_id_is_ignored() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (b, mut rx_b) = join(&room);
        let (c, mut rx_c) = join(&room);
        let _ = (drain(&mut rx_a), drain(&mut rx_b), drain(&mut rx_c));

        assert!(room.disconnect(&b.id));
        assert_eq!(b.state(), SessionState::Closed);
        assert_eq!(next(&mut rx_a), ServerMessage::Leave { user_id: b.id.clone() });
        assert_eq!(next(&mut rx_c), ServerMessage::Leave { user_id: b.id.clone() });
        assert!(drain(&mut rx_b).is_empty());

        assert_eq!(
            room.handle_message(&b.id, r#"{"type":"move","x":1,"y":1}"#),
            Dispatch::UnknownSession
        );
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_c).is_empty());
        assert_eq!(room.session_ids(), vec![a.id.clone(), c.id.clone()]);
    }

    #[test]
    fn double_disconnect_emits_one_leave() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (b, _rx_b) = join(&room);
        let _ = drain(&mut rx_a);

        assert!(room.disconnect(&b.id));
        assert!(!room.disconnect(&b.id));
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(room.contains(&a.id));
        assert!(!room.contains(&b.id));
    }

    #[test]
    fn poisoned_recipient_does_not_block_others() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (b, rx_b) = join(&room);
        let (_c, mut rx_c) = join(&room);
        let _ = (drain(&mut rx_a), drain(&mut rx_c));
        drop(rx_b);

        let (logs, _guard) = capture_logs();
        let dispatch = room.handle_message(&a.id, r#"{"type":"chat","message":"still here?"}"#);

        assert_eq!(dispatch, Dispatch::Relayed(BroadcastReport { delivered: 1, failed: 1 }));
        assert_eq!(next(&mut rx_c).event_type(), "chat");
        assert!(room.contains(&b.id));
        assert!(b.drop_count() >= 1);
        assert!(logs.has_event(tracing::Level::WARN, "failed to send event to client"));
    }

    #[test]
    fn full_queue_counts_as_failure() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        // Capacity 1 is taken by init, so the next event overflows.
        let (b, _rx_b) = join_with_capacity(&room, 1);
        let _ = drain(&mut rx_a);

        let report = room.broadcast(&ServerMessage::Leave { user_id: SessionId::from("ghost") }, None);
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(b.drop_count(), 1);
        assert!(room.contains(&a.id));
    }

    #[test]
    fn broadcast_respects_exclude() {
        let room = Room::new();
        let (a, mut rx_a) = join(&room);
        let (b, mut rx_b) = join(&room);
        let _ = (drain(&mut rx_a), drain(&mut rx_b));

        let event = ServerMessage::Chat { user_id: a.id.clone(), message: "x".into() };
        assert_eq!(room.broadcast(&event, Some(&a.id)).delivered, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![event.clone()]);

        assert_eq!(room.broadcast(&event, None).delivered, 2);
        let _ = b;
    }

    #[test]
    fn broadcast_to_empty_room() {
        let room = Room::default();
        let report = room.broadcast(&ServerMessage::Leave { user_id: SessionId::from("x") }, None);
        assert_eq!(report, BroadcastReport::default());
        assert!(room.is_empty());
    }

    #[test]
    fn custom_spawn_point() {
        let room = Room::with_spawn(Position::new(0.0, 0.0));
        let (a, mut rx) = join(&room);
        assert_matches!(next(&mut rx), ServerMessage::Init { x, y, .. } if x == 0.0 && y == 0.0);
        assert_eq!(room.position(&a.id), Some(Position::new(0.0, 0.0)));
    }

    #[test]
    fn ids_are_unique() {
        let room = Room::new();
        let mut receivers = Vec::new();
        let mut ids = HashSet::new();
        for _ in 0..200 {
            let (conn, rx) = join_with_capacity(&room, 1);
            receivers.push(rx);
            assert!(ids.insert(conn.id.clone()));
        }
        assert_eq!(room.len(), 200);
    }

    #[test]
    fn snapshot_is_in_join_order() {
        let room = Room::new();
        let (a, _ra) = join(&room);
        let (b, _rb) = join(&room);
        let (c, _rc) = join(&room);
        assert!(room.disconnect(&b.id));
        let ids: Vec<_> = room.snapshot().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![a.id.clone(), c.id.clone()]);
    }

    #[test]
    fn concurrent_connects_agree_on_membership() {
        let room = Arc::new(Room::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let room = Arc::clone(&room);
                std::thread::spawn(move || {
                    let (tx, rx) = mpsc::channel(64);
                    (room.connect(tx), rx)
                })
            })
            .collect();
        let mut joined: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Every pair is mutually aware: each session either listed the other in
        // its init or received the other's join, never both and never neither.
        for i in 0..joined.len() {
            let id = joined[i].0.id.clone();
            let events = drain(&mut joined[i].1);
            let mut known: Vec<SessionId> = Vec::new();
            for event in events {
                match event {
                    ServerMessage::Init { users, .. } => known.extend(users.into_iter().map(|u| u.id)),
                    ServerMessage::Join { user_id, .. } => known.push(user_id),
                    other => panic!("unexpected event {other:?}"),
                }
            }
            let unique: HashSet<_> = known.iter().cloned().collect();
            assert_eq!(unique.len(), known.len());
            assert_eq!(known.len(), joined.len() - 1);
            assert!(!unique.contains(&id));
        }
    }

    proptest! {
        #[test]
        fn registry_size_tracks_connects_minus_disconnects(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let room = Room::new();
            let mut live: Vec<(Arc<ClientConnection>, mpsc::Receiver<Arc<str>>)> = Vec::new();
            for connect in ops {
                if connect || live.is_empty() {
                    live.push(join_with_capacity(&room, 256));
                } else {
                    let (conn, _rx) = live.remove(0);
                    prop_assert!(room.disconnect(&conn.id));
                }
                prop_assert_eq!(room.len(), live.len());
            }
            let expected: Vec<SessionId> = live.iter().map(|(c, _)| c.id.clone()).collect();
            prop_assert_eq!(room.session_ids(), expected);
        }
    }
}
