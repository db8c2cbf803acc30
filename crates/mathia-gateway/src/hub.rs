//! The chat hub: per-room transport registry, ordered broadcast, presence,
//! and typing indicators.
//!
//! Every live room owns one bounded frame queue drained by a single task,
//! so consumers see frames in enqueue order. Across rooms nothing is
//! ordered. Typing frames are dropped when a queue is full; message frames
//! make the producer wait, bounded by `ROOM_QUEUE_PAUSE_MS` — a producer
//! that waits longer has its transport closed by the caller.

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mathia_core::config::{
    PRESENCE_OFFLINE_AFTER_SECS, ROOM_QUEUE_BOUND, ROOM_QUEUE_PAUSE_MS, TYPING_REBROADCAST_SECS,
    TYPING_TTL_SECS,
};
use mathia_core::types::{RoomId, UserId};
use mathia_protocol::{PresenceEntry, PresenceStatus, ServerFrame};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("broadcast queue paused longer than {ROOM_QUEUE_PAUSE_MS}ms")]
    Paused,
}

struct Presence {
    sessions: u32,
    last_seen: String,
    online: bool,
}

struct Typing {
    flag_expires: Instant,
    last_broadcast: Instant,
}

/// Cheap-to-clone handle on one room's live state. Cloned out of the map
/// so no map lock is held across awaits.
#[derive(Clone)]
struct RoomState {
    queue_tx: mpsc::Sender<ServerFrame>,
    transports: Arc<DashMap<(UserId, String), mpsc::Sender<String>>>,
    presence: Arc<DashMap<UserId, Presence>>,
    typing: Arc<DashMap<UserId, Typing>>,
}

#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<RoomId, RoomState>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport. A duplicate `(user, session)` replaces the
    /// prior transport cleanly. Returns the presence snapshot to send to
    /// the joining client.
    pub fn join(
        &self,
        room: &RoomId,
        user: &UserId,
        session: &str,
        tx: mpsc::Sender<String>,
    ) -> ServerFrame {
        let state = self.room_state(room);
        state
            .transports
            .insert((user.clone(), session.to_string()), tx);

        let now = Utc::now().to_rfc3339();
        let came_online = {
            let mut entry = state.presence.entry(user.clone()).or_insert(Presence {
                sessions: 0,
                last_seen: now.clone(),
                online: false,
            });
            entry.sessions += 1;
            entry.last_seen = now;
            let came_online = !entry.online;
            entry.online = true;
            came_online
        };

        if came_online {
            self.enqueue_droppable(
                &state,
                ServerFrame::Presence {
                    user: user.clone(),
                    status: PresenceStatus::Online,
                    last_seen: None,
                },
            );
        }
        info!(room_id = %room, user_id = %user, session, "transport joined");

        self.snapshot(&state)
    }

    /// Deregister a transport. Emits an offline presence delta when the
    /// user's last session leaves.
    pub fn leave(&self, room: &RoomId, user: &UserId, session: &str) {
        let Some(state) = self.rooms.get(room) else {
            return;
        };
        state
            .transports
            .remove(&(user.clone(), session.to_string()));

        let went_offline = {
            let Some(mut entry) = state.presence.get_mut(user) else {
                return;
            };
            entry.sessions = entry.sessions.saturating_sub(1);
            entry.last_seen = Utc::now().to_rfc3339();
            if entry.sessions == 0 && entry.online {
                entry.online = false;
                true
            } else {
                false
            }
        };

        if went_offline {
            let last_seen = state.presence.get(user).map(|p| p.last_seen.clone());
            self.enqueue_droppable(
                &state,
                ServerFrame::Presence {
                    user: user.clone(),
                    status: PresenceStatus::Offline,
                    last_seen,
                },
            );
        }
        info!(room_id = %room, user_id = %user, session, "transport left");
    }

    /// Fan a frame out to the room in enqueue order. Message frames wait
    /// for queue capacity up to the pause bound; droppable frames are
    /// dropped when the queue is full.
    pub async fn broadcast(&self, room: &RoomId, frame: ServerFrame) -> Result<(), HubError> {
        let state = self.room_state(room);
        if frame.is_droppable() {
            self.enqueue_droppable(&state, frame);
            return Ok(());
        }
        state
            .queue_tx
            .send_timeout(frame, Duration::from_millis(ROOM_QUEUE_PAUSE_MS))
            .await
            .map_err(|_| HubError::Paused)
    }

    /// Deliver a frame to one user's transports in a room (private system
    /// messages, fetch replies).
    pub fn send_to(&self, room: &RoomId, user: &UserId, frame: &ServerFrame) {
        let Some(state) = self.rooms.get(room) else {
            return;
        };
        let json = frame.to_json();
        for entry in state.transports.iter() {
            if &entry.key().0 == user {
                let _ = entry.value().try_send(json.clone());
            }
        }
    }

    /// Record a typing event. The per-(room, user) flag lives 3 s; the
    /// rebroadcast is throttled to once per second.
    pub fn typing(&self, room: &RoomId, from: &UserId) {
        let state = self.room_state(room);
        let now = Instant::now();
        let should_broadcast = match state.typing.get_mut(from) {
            Some(mut t) => {
                t.flag_expires = now + Duration::from_secs(TYPING_TTL_SECS);
                if now.duration_since(t.last_broadcast)
                    >= Duration::from_secs(TYPING_REBROADCAST_SECS)
                {
                    t.last_broadcast = now;
                    true
                } else {
                    false
                }
            }
            None => {
                state.typing.insert(
                    from.clone(),
                    Typing {
                        flag_expires: now + Duration::from_secs(TYPING_TTL_SECS),
                        last_broadcast: now,
                    },
                );
                true
            }
        };

        if should_broadcast {
            self.enqueue_droppable(
                &state,
                ServerFrame::Typing {
                    from: from.clone(),
                    chatid: room.clone(),
                },
            );
        }
    }

    /// Users whose typing flag has not expired.
    pub fn typing_users(&self, room: &RoomId) -> Vec<UserId> {
        let Some(state) = self.rooms.get(room) else {
            return Vec::new();
        };
        let now = Instant::now();
        state
            .typing
            .iter()
            .filter(|t| t.flag_expires > now)
            .map(|t| t.key().clone())
            .collect()
    }

    /// Refresh a user's liveness from a heartbeat ping.
    pub fn touch(&self, room: &RoomId, user: &UserId) {
        if let Some(state) = self.rooms.get(room) {
            if let Some(mut p) = state.presence.get_mut(user) {
                p.last_seen = Utc::now().to_rfc3339();
            }
        }
    }

    /// Mark users offline whose last heartbeat is beyond the liveness
    /// horizon. Called from a periodic sweeper task.
    pub fn sweep_presence(&self) {
        let horizon =
            Utc::now() - chrono::Duration::seconds(PRESENCE_OFFLINE_AFTER_SECS as i64);
        let horizon_str = horizon.to_rfc3339();

        for room in self.rooms.iter() {
            let mut stale = Vec::new();
            for mut p in room.presence.iter_mut() {
                if p.online && p.last_seen < horizon_str {
                    p.online = false;
                    stale.push((p.key().clone(), p.last_seen.clone()));
                }
            }
            for (user, last_seen) in stale {
                debug!(user_id = %user, "presence expired without heartbeat");
                self.enqueue_droppable(
                    &room,
                    ServerFrame::Presence {
                        user,
                        status: PresenceStatus::Offline,
                        last_seen: Some(last_seen),
                    },
                );
            }
        }
    }

    fn snapshot(&self, state: &RoomState) -> ServerFrame {
        let mut online = Vec::new();
        let mut presence = Vec::new();
        for p in state.presence.iter() {
            if p.online {
                online.push(p.key().clone());
            }
            presence.push(PresenceEntry {
                user: p.key().clone(),
                status: if p.online {
                    PresenceStatus::Online
                } else {
                    PresenceStatus::Offline
                },
                last_seen: Some(p.last_seen.clone()),
            });
        }
        ServerFrame::PresenceSnapshot { online, presence }
    }

    fn enqueue_droppable(&self, state: &RoomState, frame: ServerFrame) {
        if state.queue_tx.try_send(frame).is_err() {
            debug!("room queue full, droppable frame discarded");
        }
    }

    fn room_state(&self, room: &RoomId) -> RoomState {
        if let Some(state) = self.rooms.get(room) {
            return state.clone();
        }
        self.rooms
            .entry(room.clone())
            .or_insert_with(|| spawn_room(room.clone()))
            .clone()
    }
}

/// Create a room's state and its drainer task. The drainer serializes each
/// frame once and forwards it to every transport; a transport whose buffer
/// is full is closed (removed), which ends its WS writer.
fn spawn_room(room: RoomId) -> RoomState {
    let (queue_tx, mut queue_rx) = mpsc::channel::<ServerFrame>(ROOM_QUEUE_BOUND);
    let transports: Arc<DashMap<(UserId, String), mpsc::Sender<String>>> =
        Arc::new(DashMap::new());

    let drain_transports = transports.clone();
    tokio::spawn(async move {
        while let Some(frame) = queue_rx.recv().await {
            let json = frame.to_json();
            let mut dead = Vec::new();
            for entry in drain_transports.iter() {
                if entry.value().try_send(json.clone()).is_err() {
                    dead.push(entry.key().clone());
                }
            }
            for key in dead {
                warn!(room_id = %room, user_id = %key.0, "slow consumer dropped");
                drain_transports.remove(&key);
            }
        }
    });

    RoomState {
        queue_tx,
        transports,
        presence: Arc::new(DashMap::new()),
        typing: Arc::new(DashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_core::types::MessageFlags;
    use mathia_protocol::MessageView;

    fn message_frame(body: &str) -> ServerFrame {
        ServerFrame::NewMessage {
            message: MessageView {
                id: body.into(),
                chatid: "room-1".into(),
                sender: "alice".into(),
                body: body.to_string(),
                ts: Utc::now().to_rfc3339(),
                parent_id: None,
                flags: MessageFlags::default(),
            },
        }
    }

    #[tokio::test]
    async fn broadcasts_preserve_order() {
        let hub = RoomHub::new();
        let room: RoomId = "room-1".into();
        let (tx, mut rx) = mpsc::channel(64);
        hub.join(&room, &"bob".into(), "s1", tx);

        for i in 0..5 {
            hub.broadcast(&room, message_frame(&format!("m{i}")))
                .await
                .unwrap();
        }

        let mut bodies = Vec::new();
        // first frame may be the presence delta — filter to messages
        for _ in 0..6 {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(json)) => {
                    if json.contains("new_message") {
                        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
                        bodies.push(v["message"]["body"].as_str().unwrap().to_string());
                    }
                }
                _ => break,
            }
        }
        assert_eq!(bodies, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn duplicate_session_replaces_transport() {
        let hub = RoomHub::new();
        let room: RoomId = "room-1".into();
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);
        hub.join(&room, &"bob".into(), "s1", tx1);
        hub.join(&room, &"bob".into(), "s1", tx2);

        hub.broadcast(&room, message_frame("hello")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // only the replacement transport receives the frame
        assert!(rx2.try_recv().is_ok());
        // rx1's sender was dropped on replacement
        let mut saw_message = false;
        while let Ok(json) = rx1.try_recv() {
            saw_message |= json.contains("new_message");
        }
        assert!(!saw_message);
    }

    #[tokio::test]
    async fn snapshot_reflects_joins() {
        let hub = RoomHub::new();
        let room: RoomId = "room-1".into();
        let (tx, _rx) = mpsc::channel(64);
        hub.join(&room, &"alice".into(), "s1", tx);

        let (tx2, _rx2) = mpsc::channel(64);
        let snapshot = hub.join(&room, &"bob".into(), "s2", tx2);
        match snapshot {
            ServerFrame::PresenceSnapshot { online, .. } => {
                assert_eq!(online.len(), 2);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_session_leaving_goes_offline() {
        let hub = RoomHub::new();
        let room: RoomId = "room-1".into();
        let user: UserId = "alice".into();
        let (tx1, _r1) = mpsc::channel(64);
        let (tx2, _r2) = mpsc::channel(64);
        hub.join(&room, &user, "s1", tx1);
        hub.join(&room, &user, "s2", tx2);

        hub.leave(&room, &user, "s1");
        // still online via s2
        let (tx3, _r3) = mpsc::channel(64);
        match hub.join(&room, &"bob".into(), "s3", tx3) {
            ServerFrame::PresenceSnapshot { online, .. } => {
                assert!(online.contains(&user));
            }
            _ => unreachable!(),
        }

        hub.leave(&room, &user, "s2");
        let (tx4, _r4) = mpsc::channel(64);
        match hub.join(&room, &"carol".into(), "s4", tx4) {
            ServerFrame::PresenceSnapshot { online, .. } => {
                assert!(!online.contains(&user));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn typing_rebroadcast_is_throttled() {
        let hub = RoomHub::new();
        let room: RoomId = "room-1".into();
        let (tx, mut rx) = mpsc::channel(64);
        hub.join(&room, &"bob".into(), "s1", tx);

        for _ in 0..10 {
            hub.typing(&room, &"alice".into());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut typing_frames = 0;
        while let Ok(json) = rx.try_recv() {
            if json.contains(r#""command":"typing""#) {
                typing_frames += 1;
            }
        }
        // ten events inside one second collapse to one broadcast
        assert_eq!(typing_frames, 1);
        assert_eq!(hub.typing_users(&room), vec![UserId::from("alice")]);
    }
}
