//! Inbound message dispatch: classifies one assembled frame's envelope and
//! folds it into the registry's pending state for the next tick.

use crate::registry::PlayerRegistry;
use crate::stats::Stats;
use protocol::{AmmaMoving, MessageKind, Timestamp, decode_single, verify_empty};

/// Dispatches one inbound application message belonging to `player_id`.
/// Returns `false` when the message is bogus, signaling the caller to
/// terminate the connection gracefully.
pub fn dispatch(
    registry: &mut PlayerRegistry,
    stats: &mut Stats,
    player_id: u32,
    current_moving: u8,
    payload: &[u8],
) -> bool {
    if let Ok(amma_moving) = decode_single::<AmmaMoving>(payload, MessageKind::AmmaMoving) {
        let bit = 1u8 << amma_moving.direction.min(3);
        let new_moving = if amma_moving.start {
            current_moving | bit
        } else {
            current_moving & !bit
        };
        registry.set_pending_moving(player_id, new_moving);
        return true;
    }

    if verify_empty(payload, MessageKind::AmmaThrowing).is_ok() {
        registry.schedule_throw(player_id);
        return true;
    }

    if let Ok(ping) = decode_single::<Timestamp>(payload, MessageKind::Ping) {
        registry.record_ping(player_id, ping.0);
        return true;
    }

    stats.record_bogus_message();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{MessageKind as Kind, encode_empty, encode_single};
    use tokio::sync::mpsc;

    fn registry_with_player() -> (PlayerRegistry, u32) {
        let mut registry = PlayerRegistry::default();
        let (tx, _rx) = mpsc::channel(8);
        let id = registry.register(None, tx).unwrap();
        (registry, id)
    }

    #[test]
    fn amma_moving_sets_bit() {
        let (mut registry, id) = registry_with_player();
        let mut stats = Stats::default();
        let msg = encode_single(Kind::AmmaMoving, &AmmaMoving { direction: 0, start: true });
        assert!(dispatch(&mut registry, &mut stats, id, 0, &msg));
    }

    #[test]
    fn amma_throwing_schedules_throw() {
        let (mut registry, id) = registry_with_player();
        let mut stats = Stats::default();
        let msg = encode_empty(Kind::AmmaThrowing);
        assert!(dispatch(&mut registry, &mut stats, id, 0, &msg));
    }

    #[test]
    fn ping_is_recorded() {
        let (mut registry, id) = registry_with_player();
        let mut stats = Stats::default();
        let msg = encode_single(Kind::Ping, &Timestamp(12345));
        assert!(dispatch(&mut registry, &mut stats, id, 0, &msg));
    }

    #[test]
    fn bogus_message_increments_counter_and_fails() {
        let (mut registry, id) = registry_with_player();
        let mut stats = Stats::default();
        let msg = encode_empty(Kind::Hello);
        assert!(!dispatch(&mut registry, &mut stats, id, 0, &msg));
    }
}
