//! Admission control, join/leave bookkeeping, and the per-tick delta
//! batcher: the six intermediate sets that accumulate during intake and are
//! reconciled into broadcast batches in a fixed step order, then cleared.

use crate::stats::Stats;
use crate::world::{ItemKind, Player, World};
use bytes::Bytes;
use protocol::{
    BombExploded, BombSpawned, ItemSpawned, MessageKind, PlayerEntry, PlayerHello, Timestamp,
    encode_batch, encode_single,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

const MAX_PLAYERS: usize = 2000;
const MAX_PLAYERS_PER_REMOTE: u32 = 10;

/// Outbound channel to one connection's writer task. Send failures (the
/// writer already exited) are treated the same as any other disconnect: the
/// send is simply dropped, and the next `unregister` call cleans the player
/// up once the reader observes the closed connection.
pub type Outbound = mpsc::Sender<Bytes>;

struct Connection {
    outbound: Outbound,
    remote: Option<String>,
    kick: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Owns every player record and connection handle, plus the six per-tick
/// intermediate sets. Accessed only from the tick-scheduler task.
#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<u32, Player>,
    connections: HashMap<u32, Connection>,
    remote_counts: HashMap<String, u32>,
    next_id: u32,

    joined_ids: HashSet<u32>,
    left_ids: HashSet<u32>,
    ping_ids: HashMap<u32, u32>,
    pending_throws: Vec<u32>,
}

impl PlayerRegistry {
    /// Admits a new player if under both the global and per-remote caps.
    /// On success the id is recorded in `joined_ids` for this tick.
    pub fn register(&mut self, remote: Option<String>, outbound: Outbound) -> Option<u32> {
        self.register_with_kick(remote, outbound, None)
    }

    /// Same as `register`, but also records a one-shot the registry can fire
    /// to force the connection task to drop early (used when `dispatch`
    /// reports a bogus message for this player).
    pub fn register_with_kick(
        &mut self,
        remote: Option<String>,
        outbound: Outbound,
        kick: Option<tokio::sync::oneshot::Sender<()>>,
    ) -> Option<u32> {
        if self.players.len() >= MAX_PLAYERS {
            return None;
        }
        if let Some(addr) = &remote {
            let count = self.remote_counts.get(addr).copied().unwrap_or(0);
            if count >= MAX_PLAYERS_PER_REMOTE {
                return None;
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        if let Some(addr) = &remote {
            *self.remote_counts.entry(addr.clone()).or_insert(0) += 1;
        }

        let player = Player::new(id, 0.0, 0.0, 0.0, (id % 256) as u8);
        self.players.insert(id, player);
        self.connections.insert(
            id,
            Connection {
                outbound,
                remote,
                kick,
            },
        );
        self.joined_ids.insert(id);
        Some(id)
    }

    /// Removes a player's record. If it was still pending in `joined_ids`
    /// for this tick, it is dropped silently (join-then-leave in the same
    /// tick is never observed by other players) rather than also appearing
    /// in `left_ids`.
    pub fn unregister(&mut self, id: u32) {
        if let Some(conn) = self.connections.remove(&id) {
            if let Some(addr) = conn.remote {
                if let Some(count) = self.remote_counts.get_mut(&addr) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.remote_counts.remove(&addr);
                    }
                }
            }
        }
        self.players.remove(&id);

        if !self.joined_ids.remove(&id) {
            self.left_ids.insert(id);
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// The moving bits a freshly dispatched `AmmaMoving` should toggle from —
    /// the pending value if one is already queued for this tick, else the
    /// last committed value.
    pub fn pending_moving(&self, id: u32) -> u8 {
        self.players.get(&id).map(|p| p.new_moving).unwrap_or(0)
    }

    pub fn set_pending_moving(&mut self, id: u32, new_moving: u8) {
        if let Some(player) = self.players.get_mut(&id) {
            player.new_moving = new_moving;
        }
    }

    pub fn schedule_throw(&mut self, id: u32) {
        if self.players.contains_key(&id) {
            self.pending_throws.push(id);
        }
    }

    pub fn record_ping(&mut self, id: u32, timestamp: u32) {
        self.ping_ids.insert(id, timestamp);
    }

    /// Fires the connection's kick signal, if it registered one, without
    /// otherwise touching its state — the connection task's own read loop
    /// still drives the eventual `unregister` through a `Disconnected` event.
    pub fn kick(&mut self, id: u32) {
        if let Some(conn) = self.connections.get_mut(&id) {
            if let Some(kick) = conn.kick.take() {
                let _ = kick.send(());
            }
        }
    }

    fn send_to(&self, stats: &mut Stats, id: u32, bytes: Bytes) {
        if let Some(conn) = self.connections.get(&id) {
            if conn.outbound.try_send(bytes.clone()).is_ok() {
                stats.record_sent(bytes.len());
            }
        }
    }

    fn broadcast_to<'a>(
        &'a self,
        stats: &mut Stats,
        recipients: impl Iterator<Item = &'a u32>,
        bytes: Bytes,
    ) {
        for id in recipients {
            self.send_to(stats, *id, bytes.clone());
        }
    }

    fn item_spawned_entries(world: &World) -> Vec<ItemSpawned> {
        world
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.alive)
            .map(|(index, item)| ItemSpawned {
                kind: match item.kind {
                    ItemKind::Key => 0,
                    ItemKind::Bomb => 1,
                },
                index: index as u32,
                x: item.x,
                y: item.y,
            })
            .collect()
    }

    fn player_entry(player: &Player) -> PlayerEntry {
        PlayerEntry {
            id: player.id,
            x: player.x,
            y: player.y,
            dir: player.dir,
            hue: player.hue,
            moving: player.moving,
        }
    }

    /// Runs one tick's reconciliation in the fixed order: joined, left,
    /// moving, thrown bombs, world simulation, pings. Clears every
    /// intermediate set at the end regardless of how much work happened.
    pub fn run_tick(&mut self, world: &mut World, stats: &mut Stats, dt: f32) {
        self.process_joined(world, stats);
        self.process_left(stats);
        self.process_moving(stats);
        self.process_thrown(world, stats);
        self.process_simulation(world, stats, dt);
        self.process_pings(stats);

        self.joined_ids.clear();
        self.left_ids.clear();
        self.ping_ids.clear();
        self.pending_throws.clear();
    }

    fn process_joined(&mut self, world: &World, stats: &mut Stats) {
        let joined: Vec<u32> = self
            .joined_ids
            .iter()
            .copied()
            .filter(|id| self.players.contains_key(id))
            .collect();

        for &id in &joined {
            let player = &self.players[&id];
            let hello = encode_single(
                MessageKind::Hello,
                &PlayerHello {
                    id: player.id,
                    x: player.x,
                    y: player.y,
                    dir: player.dir,
                    hue: player.hue,
                },
            );
            self.send_to(stats, id, hello);

            let all_players: Vec<PlayerEntry> =
                self.players.values().map(Self::player_entry).collect();
            self.send_to(stats, id, encode_batch(MessageKind::PlayerJoined, &all_players));

            let items = Self::item_spawned_entries(world);
            self.send_to(stats, id, encode_batch(MessageKind::ItemSpawned, &items));
        }

        if !joined.is_empty() {
            let entries: Vec<PlayerEntry> = joined
                .iter()
                .map(|id| Self::player_entry(&self.players[id]))
                .collect();
            let batch = encode_batch(MessageKind::PlayerJoined, &entries);
            let recipients: Vec<u32> = self
                .players
                .keys()
                .copied()
                .filter(|id| !self.joined_ids.contains(id))
                .collect();
            self.broadcast_to(stats, recipients.iter(), batch);
        }
    }

    fn process_left(&mut self, stats: &mut Stats) {
        if self.left_ids.is_empty() {
            return;
        }
        let entries: Vec<u32> = self.left_ids.iter().copied().collect();
        let batch = encode_batch(MessageKind::PlayerLeft, &entries);
        let recipients: Vec<u32> = self.players.keys().copied().collect();
        self.broadcast_to(stats, recipients.iter(), batch);
    }

    fn process_moving(&mut self, stats: &mut Stats) {
        let mut entries = Vec::new();
        for player in self.players.values_mut() {
            if player.new_moving != player.moving {
                player.moving = player.new_moving;
                entries.push(Self::player_entry(player));
            }
        }
        if entries.is_empty() {
            return;
        }
        let batch = encode_batch(MessageKind::PlayerMoving, &entries);
        let recipients: Vec<u32> = self.players.keys().copied().collect();
        self.broadcast_to(stats, recipients.iter(), batch);
    }

    fn process_thrown(&mut self, world: &mut World, stats: &mut Stats) {
        if self.pending_throws.is_empty() {
            return;
        }
        let mut entries = Vec::new();
        for &id in &self.pending_throws {
            let Some(player) = self.players.get(&id) else {
                continue;
            };
            let Some(index) = world.bombs.throw(player.x, player.y, player.dir) else {
                continue;
            };
            let bomb = world.bombs.get(index);
            entries.push(BombSpawned {
                index: index as u32,
                x: bomb.x,
                y: bomb.y,
                z: bomb.z,
                dx: bomb.dx,
                dy: bomb.dy,
                dz: bomb.dz,
                lifetime: bomb.lifetime,
            });
        }
        if entries.is_empty() {
            return;
        }
        let batch = encode_batch(MessageKind::BombSpawned, &entries);
        let recipients: Vec<u32> = self.players.keys().copied().collect();
        self.broadcast_to(stats, recipients.iter(), batch);
    }

    fn process_simulation(&mut self, world: &mut World, stats: &mut Stats, dt: f32) {
        let (collected, exploded) = world.integrate(&mut self.players, dt);
        let recipients: Vec<u32> = self.players.keys().copied().collect();

        if !collected.is_empty() {
            let batch = encode_batch(MessageKind::ItemCollected, &collected);
            self.broadcast_to(stats, recipients.iter(), batch);
        }

        if !exploded.is_empty() {
            let entries: Vec<BombExploded> = exploded
                .iter()
                .map(|&index| {
                    let bomb = world.bombs.get(index as usize);
                    BombExploded {
                        index,
                        x: bomb.x,
                        y: bomb.y,
                        z: bomb.z,
                    }
                })
                .collect();
            let batch = encode_batch(MessageKind::BombExploded, &entries);
            self.broadcast_to(stats, recipients.iter(), batch);
        }
    }

    fn process_pings(&mut self, stats: &mut Stats) {
        let pings: Vec<(u32, u32)> = self
            .ping_ids
            .iter()
            .filter(|(id, _)| self.players.contains_key(id))
            .map(|(&id, &ts)| (id, ts))
            .collect();
        for (id, ts) in pings {
            let pong = encode_single(MessageKind::Pong, &Timestamp(ts));
            self.send_to(stats, id, pong);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Scene;

    fn channel() -> (Outbound, mpsc::Receiver<Bytes>) {
        mpsc::channel(32)
    }

    fn empty_world() -> World {
        World::new(Scene::new([[false; 7]; 7]), Vec::new())
    }

    #[test]
    fn admission_respects_global_cap() {
        let mut registry = PlayerRegistry::default();
        for _ in 0..MAX_PLAYERS {
            let (tx, _rx) = channel();
            assert!(registry.register(None, tx).is_some());
        }
        let (tx, _rx) = channel();
        assert!(registry.register(None, tx).is_none());
    }

    #[test]
    fn admission_respects_per_remote_cap() {
        let mut registry = PlayerRegistry::default();
        for _ in 0..MAX_PLAYERS_PER_REMOTE {
            let (tx, _rx) = channel();
            assert!(registry.register(Some("1.2.3.4".into()), tx).is_some());
        }
        let (tx, _rx) = channel();
        assert!(registry.register(Some("1.2.3.4".into()), tx).is_none());
        // A different remote is unaffected.
        let (tx2, _rx2) = channel();
        assert!(registry.register(Some("5.6.7.8".into()), tx2).is_some());
    }

    #[test]
    fn join_then_leave_same_tick_is_silent() {
        let mut registry = PlayerRegistry::default();
        let (tx, _rx) = channel();
        let id = registry.register(None, tx).unwrap();
        registry.unregister(id);
        assert!(registry.joined_ids.is_empty());
        assert!(registry.left_ids.is_empty());
    }

    #[test]
    fn leave_after_join_tick_is_observed() {
        let mut registry = PlayerRegistry::default();
        let (tx, _rx) = channel();
        let id = registry.register(None, tx).unwrap();
        let mut world = empty_world();
        let mut stats = Stats::default();
        registry.run_tick(&mut world, &mut stats, 1.0 / 60.0);
        registry.unregister(id);
        assert!(registry.left_ids.contains(&id));
    }

    #[tokio::test]
    async fn single_join_sends_hello_and_snapshots() {
        let mut registry = PlayerRegistry::default();
        let (tx, mut rx) = channel();
        registry.register(None, tx).unwrap();
        let mut world = World::new(
            Scene::new([[false; 7]; 7]),
            vec![crate::world::Item {
                kind: ItemKind::Bomb,
                x: 1.5,
                y: 3.5,
                alive: true,
            }],
        );
        let mut stats = Stats::default();
        registry.run_tick(&mut world, &mut stats, 1.0 / 60.0);

        let hello = rx.try_recv().unwrap();
        assert_eq!(hello[4], MessageKind::Hello as u8);
        let joined_snapshot = rx.try_recv().unwrap();
        assert_eq!(joined_snapshot[4], MessageKind::PlayerJoined as u8);
        let items_snapshot = rx.try_recv().unwrap();
        assert_eq!(items_snapshot[4], MessageKind::ItemSpawned as u8);
        // Lone joiner: no further broadcast since no other player excludes it.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_tick_produces_no_broadcasts() {
        let mut registry = PlayerRegistry::default();
        let (tx, _rx) = channel();
        let id = registry.register(None, tx).unwrap();
        let mut world = empty_world();
        let mut stats = Stats::default();
        registry.run_tick(&mut world, &mut stats, 1.0 / 60.0); // drains the join broadcast
        registry.unregister(id);

        let (tx2, mut rx2) = channel();
        let id2 = registry.register(None, tx2).unwrap();
        registry.run_tick(&mut world, &mut stats, 1.0 / 60.0);
        while rx2.try_recv().is_ok() {}

        registry.run_tick(&mut world, &mut stats, 1.0 / 60.0);
        assert!(rx2.try_recv().is_err());
        let _ = id2;
    }
}
