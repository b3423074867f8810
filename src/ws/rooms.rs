//! Match rooms: which sockets watch which match

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::engine::MatchBroadcaster;

use super::protocol::ServerMsg;

const ROOM_CAPACITY: usize = 64;

struct Membership {
    user_id: Uuid,
    match_id: Uuid,
    forwarder: JoinHandle<()>,
}

/// What a connection was subscribed to when it left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: Uuid,
    pub match_id: Uuid,
    /// The user still has another socket in the same room
    pub user_still_present: bool,
    /// Nobody is left in the room
    pub room_empty: bool,
}

/// One broadcast channel per match; each connection is in at most one room
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<Uuid, broadcast::Sender<ServerMsg>>,
    members: DashMap<Uuid, Membership>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a connection in a match room, leaving its previous room first.
    /// Room traffic is forwarded into `outbox`.
    pub fn join(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        match_id: Uuid,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Option<Departure> {
        if self.match_of(connection_id) == Some(match_id) {
            return None;
        }
        let previous = self.leave(connection_id);

        // The room entry stays locked until the membership is recorded, so a
        // concurrent leave cannot drop the sender this connection subscribes to.
        let room = self
            .rooms
            .entry(match_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0);
        let mut rx = room.subscribe();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if outbox.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.members.insert(
            connection_id,
            Membership {
                user_id,
                match_id,
                forwarder,
            },
        );
        drop(room);
        debug!(match_id = %match_id, user_id = %user_id, "Joined room");
        previous
    }

    /// Take a connection out of its room
    pub fn leave(&self, connection_id: Uuid) -> Option<Departure> {
        let (_, membership) = self.members.remove(&connection_id)?;
        membership.forwarder.abort();

        let Membership {
            user_id, match_id, ..
        } = membership;
        let user_still_present = self
            .members
            .iter()
            .any(|m| m.match_id == match_id && m.user_id == user_id);
        let room_empty = self
            .rooms
            .remove_if(&match_id, |_, _| self.room_size(match_id) == 0)
            .is_some();
        debug!(match_id = %match_id, user_id = %user_id, room_empty, "Left room");

        Some(Departure {
            user_id,
            match_id,
            user_still_present,
            room_empty,
        })
    }

    pub fn match_of(&self, connection_id: Uuid) -> Option<Uuid> {
        self.members.get(&connection_id).map(|m| m.match_id)
    }

    pub fn room_size(&self, match_id: Uuid) -> usize {
        self.members.iter().filter(|m| m.match_id == match_id).count()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl MatchBroadcaster for RoomHub {
    fn broadcast(&self, match_id: Uuid, msg: ServerMsg) {
        if let Some(room) = self.rooms.get(&match_id) {
            // Send only fails when every receiver is gone.
            if room.send(msg).is_err() {
                trace!(match_id = %match_id, "Broadcast to empty room");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn next(rx: &mut mpsc::Receiver<ServerMsg>) -> ServerMsg {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbox closed")
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_of_the_room() {
        let hub = RoomHub::new();
        let (match_id, other_match) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, mut rx3) = mpsc::channel(8);

        hub.join(Uuid::new_v4(), Uuid::new_v4(), match_id, tx1);
        hub.join(Uuid::new_v4(), Uuid::new_v4(), match_id, tx2);
        hub.join(Uuid::new_v4(), Uuid::new_v4(), other_match, tx3);

        hub.broadcast(match_id, ServerMsg::error("ping"));
        assert_eq!(next(&mut rx1).await, ServerMsg::error("ping"));
        assert_eq!(next(&mut rx2).await, ServerMsg::error("ping"));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_reports_presence_and_empties_room() {
        let hub = RoomHub::new();
        let match_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx, _rx) = mpsc::channel(8);

        hub.join(first, user, match_id, tx.clone());
        hub.join(second, user, match_id, tx);
        assert_eq!(hub.room_size(match_id), 2);

        let departure = hub.leave(first).unwrap();
        assert!(departure.user_still_present);
        assert!(!departure.room_empty);

        let departure = hub.leave(second).unwrap();
        assert!(!departure.user_still_present);
        assert!(departure.room_empty);
        assert_eq!(hub.room_count(), 0);
        assert!(hub.leave(second).is_none());
    }

    #[tokio::test]
    async fn joining_another_room_leaves_the_first() {
        let hub = RoomHub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);

        assert!(hub.join(conn, Uuid::new_v4(), a, tx.clone()).is_none());
        assert!(hub.join(conn, Uuid::new_v4(), a, tx.clone()).is_none());
        let departure = hub.join(conn, Uuid::new_v4(), b, tx).unwrap();
        assert_eq!(departure.match_id, a);
        assert!(departure.room_empty);
        assert_eq!(hub.match_of(conn), Some(b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejoin_racing_the_last_leave_still_receives_frames() {
        let hub = Arc::new(RoomHub::new());
        let user = Uuid::new_v4();

        for _ in 0..200 {
            let match_id = Uuid::new_v4();
            let (old_conn, new_conn) = (Uuid::new_v4(), Uuid::new_v4());
            let (old_tx, _old_rx) = mpsc::channel(8);
            let (new_tx, mut new_rx) = mpsc::channel(8);
            hub.join(old_conn, user, match_id, old_tx);

            let leaving = {
                let hub = hub.clone();
                tokio::spawn(async move { hub.leave(old_conn) })
            };
            let joining = {
                let hub = hub.clone();
                tokio::spawn(async move { hub.join(new_conn, user, match_id, new_tx) })
            };
            assert!(leaving.await.unwrap().is_some());
            joining.await.unwrap();

            assert_eq!(hub.room_size(match_id), 1);
            hub.broadcast(match_id, ServerMsg::error("after rejoin"));
            assert_eq!(next(&mut new_rx).await, ServerMsg::error("after rejoin"));
            hub.leave(new_conn);
        }
        assert_eq!(hub.room_count(), 0);
    }
}
