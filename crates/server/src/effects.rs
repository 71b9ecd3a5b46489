//! Deferred, tick-scheduled effects.
//!
//! Gameplay never holds timers; anything that happens "in N seconds" is
//! queued here with an absolute tick deadline and drained at the start of
//! the tick it falls due. Resolution re-validates its target, so an effect
//! whose entity died in the meantime is a silent no-op.

use redzone_core::{EntityId, GameTick};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A deferred gameplay event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Effect {
    /// A thrown projectile's fuse expires.
    DetonateProjectile(EntityId),
    /// A corpse decal despawns.
    RemoveDeadBody(EntityId),
    /// A melee swing's wind-up elapses and the strike lands.
    MeleeStrike {
        /// Swinging player.
        attacker: EntityId,
        /// Melee definition id.
        weapon: u16,
    },
}

/// Min-heap of pending effects ordered by deadline.
///
/// The sequence number breaks deadline ties in submission order, keeping
/// resolution deterministic.
#[derive(Debug, Default)]
pub struct EffectQueue {
    heap: BinaryHeap<Reverse<(GameTick, u64, Effect)>>,
    next_seq: u64,
}

impl EffectQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `effect` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: GameTick, effect: Effect) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq, effect)));
    }

    /// Pop the next effect due at or before `now`, if any.
    pub fn pop_due(&mut self, now: GameTick) -> Option<Effect> {
        match self.heap.peek() {
            Some(Reverse((deadline, _, _))) if *deadline <= now => {
                self.heap.pop().map(|Reverse((_, _, e))| e)
            }
            _ => None,
        }
    }

    /// Number of pending effects.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_fire_in_deadline_then_submission_order() {
        let mut q = EffectQueue::new();
        q.schedule(GameTick(10), Effect::RemoveDeadBody(EntityId(1)));
        q.schedule(GameTick(5), Effect::DetonateProjectile(EntityId(2)));
        q.schedule(GameTick(5), Effect::DetonateProjectile(EntityId(3)));

        assert!(q.pop_due(GameTick(4)).is_none());
        assert_eq!(
            q.pop_due(GameTick(10)),
            Some(Effect::DetonateProjectile(EntityId(2)))
        );
        assert_eq!(
            q.pop_due(GameTick(10)),
            Some(Effect::DetonateProjectile(EntityId(3)))
        );
        assert_eq!(
            q.pop_due(GameTick(10)),
            Some(Effect::RemoveDeadBody(EntityId(1)))
        );
        assert!(q.is_empty());
    }
}
