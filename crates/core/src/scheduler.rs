//! Cycle-driven timer scheduling.
//!
//! The scheduler owns the board's cycle counter and a table of one-shot
//! timers. Parts register a timer for a [`TimerTarget`] and get back an
//! opaque [`TimerHandle`]; the handle goes stale as soon as the timer fires
//! or is cancelled, so cancelling an old handle can never hit a newer timer
//! that reused the slot.
//!
//! Delays given in microseconds are converted to cycles with the board clock
//! (16 MHz by default: 1 µs = 16 cycles).

use crate::CLOCK_HZ;

/// Identifies a part on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartId(pub usize);

/// Which of a part's timers is being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Momentary button release
    AutoRelease,
}

/// Receiver of a timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTarget {
    pub part: PartId,
    pub kind: TimerKind,
}

/// Opaque token for a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    slot: u32,
    generation: u32,
}

/// A timer that came due. Hand it back to [`Scheduler::finish`] once the
/// callback has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTimer {
    pub handle: TimerHandle,
    pub target: TimerTarget,
    /// Cycle the timer was due at
    pub when: u64,
}

/// Capability of parts that receive timer callbacks.
pub trait TimerClient {
    /// Called at the due cycle. Return 0 to stop, or a cycle delta to run
    /// again that many cycles later.
    fn on_timer(&mut self, ctx: &mut crate::SimContext, kind: TimerKind, when: u64) -> u64;
}

struct Entry {
    when: u64,
    /// Registration order, breaks ties between timers due on the same cycle
    seq: u64,
    target: TimerTarget,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
    /// Popped and waiting for `finish`; not reusable yet
    firing: bool,
}

pub struct Scheduler {
    /// Current cycle
    now: u64,
    clock_hz: u32,
    slots: Vec<Slot>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(clock_hz: u32) -> Self {
        Scheduler {
            now: 0,
            clock_hz: if clock_hz == 0 { CLOCK_HZ } else { clock_hz },
            slots: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn now(&self) -> u64 { self.now }

    pub fn clock_hz(&self) -> u32 { self.clock_hz }

    /// Move the clock forward. Never moves backwards.
    pub fn advance_to(&mut self, cycle: u64) {
        if cycle > self.now { self.now = cycle; }
    }

    /// Saturates at `u64::MAX`.
    pub fn usec_to_cycles(&self, usec: u64) -> u64 {
        let cycles = usec as u128 * self.clock_hz as u128 / 1_000_000;
        u64::try_from(cycles).unwrap_or(u64::MAX)
    }

    pub fn cycles_to_usec(&self, cycles: u64) -> u64 {
        (cycles as u128 * 1_000_000 / self.clock_hz as u128) as u64
    }

    /// Schedule `target` to fire `delta` cycles from now.
    pub fn register_cycles(&mut self, target: TimerTarget, delta: u64) -> TimerHandle {
        let entry = Entry { when: self.now.saturating_add(delta), seq: self.next_seq, target };
        self.next_seq += 1;
        let free = self.slots.iter().position(|s| s.entry.is_none() && !s.firing);
        let slot = match free {
            Some(i) => {
                self.slots[i].entry = Some(entry);
                i
            }
            None => {
                self.slots.push(Slot { generation: 0, entry: Some(entry), firing: false });
                self.slots.len() - 1
            }
        };
        TimerHandle { slot: slot as u32, generation: self.slots[slot].generation }
    }

    /// Schedule `target` to fire `usec` simulated microseconds from now.
    pub fn register_usec(&mut self, target: TimerTarget, usec: u32) -> TimerHandle {
        let delta = self.usec_to_cycles(usec as u64);
        self.register_cycles(target, delta)
    }

    /// Remove a pending timer. Stale handles are ignored.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.is_pending(handle) {
            self.retire(handle.slot as usize);
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.slots.get(handle.slot as usize)
            .map_or(false, |s| s.generation == handle.generation && s.entry.is_some())
    }

    /// Cycle at which a pending timer is due.
    pub fn due_at(&self, handle: TimerHandle) -> Option<u64> {
        if !self.is_pending(handle) { return None; }
        self.slots[handle.slot as usize].entry.as_ref().map(|e| e.when)
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Cycle of the earliest pending timer.
    pub fn next_due(&self) -> Option<u64> {
        self.slots.iter().filter_map(|s| s.entry.as_ref()).map(|e| e.when).min()
    }

    /// Take the earliest timer due at or before `limit`. The timer is no
    /// longer pending; its slot stays reserved until [`Scheduler::finish`].
    pub fn pop_due(&mut self, limit: u64) -> Option<DueTimer> {
        let (slot, when, target) = self.slots.iter().enumerate()
            .filter_map(|(i, s)| s.entry.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| e.when <= limit)
            .min_by_key(|(_, e)| (e.when, e.seq))
            .map(|(i, e)| (i, e.when, e.target))?;
        let s = &mut self.slots[slot];
        s.entry = None;
        s.firing = true;
        let handle = TimerHandle { slot: slot as u32, generation: s.generation };
        Some(DueTimer { handle, target, when })
    }

    /// Complete a fired timer. A non-zero `again` re-arms it `again` cycles
    /// after its due cycle under the same handle; zero invalidates the handle.
    pub fn finish(&mut self, due: DueTimer, again: u64) {
        let Some(s) = self.slots.get_mut(due.handle.slot as usize) else { return };
        if !s.firing || s.generation != due.handle.generation { return; }
        s.firing = false;
        if again > 0 {
            s.entry = Some(Entry { when: due.when.saturating_add(again), seq: self.next_seq, target: due.target });
            self.next_seq += 1;
        } else {
            s.generation = s.generation.wrapping_add(1);
        }
    }

    fn retire(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.entry = None;
        s.generation = s.generation.wrapping_add(1);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(CLOCK_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(part: usize) -> TimerTarget {
        TimerTarget { part: PartId(part), kind: TimerKind::AutoRelease }
    }

    #[test]
    fn test_usec_conversion() {
        let s = Scheduler::new(16_000_000);
        assert_eq!(s.usec_to_cycles(500), 8000);
        assert_eq!(s.cycles_to_usec(8000), 500);
        let s = Scheduler::new(1_000_000);
        assert_eq!(s.usec_to_cycles(500), 500);
    }

    #[test]
    fn test_zero_clock_falls_back() {
        let s = Scheduler::new(0);
        assert_eq!(s.clock_hz(), CLOCK_HZ);
    }

    #[test]
    fn test_pop_due_order() {
        let mut s = Scheduler::new(16_000_000);
        s.register_cycles(target(1), 100);
        s.register_cycles(target(2), 50);
        s.register_cycles(target(3), 50);
        assert_eq!(s.pending(), 3);
        assert_eq!(s.next_due(), Some(50));
        assert_eq!(s.pop_due(49), None);
        let mut order = Vec::new();
        while let Some(due) = s.pop_due(100) {
            order.push((due.target.part, due.when));
            s.finish(due, 0);
        }
        assert_eq!(order, vec![(PartId(2), 50), (PartId(3), 50), (PartId(1), 100)]);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_finish_rearms_same_handle() {
        let mut s = Scheduler::new(16_000_000);
        let h = s.register_cycles(target(0), 10);
        let due = s.pop_due(10).unwrap();
        assert_eq!(due.handle, h);
        assert!(!s.is_pending(h));
        s.finish(due, 25);
        assert!(s.is_pending(h));
        assert_eq!(s.due_at(h), Some(35));
        let due = s.pop_due(u64::MAX).unwrap();
        s.finish(due, 0);
        assert!(!s.is_pending(h));
        // Finishing twice does nothing
        s.finish(due, 5);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_firing_slot_not_reused() {
        let mut s = Scheduler::new(16_000_000);
        s.register_cycles(target(0), 10);
        let due = s.pop_due(10).unwrap();
        let other = s.register_cycles(target(1), 10);
        assert_ne!(other, due.handle);
        s.finish(due, 0);
        assert!(s.is_pending(other));
    }

    #[test]
    fn test_cancel() {
        let mut s = Scheduler::new(16_000_000);
        let h = s.register_usec(target(0), 500);
        assert!(s.is_pending(h));
        assert_eq!(s.due_at(h), Some(8000));
        s.cancel(h);
        assert!(!s.is_pending(h));
        assert_eq!(s.pop_due(u64::MAX), None);
        // Cancelling twice is harmless
        s.cancel(h);
    }

    #[test]
    fn test_stale_handle_does_not_cancel_reused_slot() {
        let mut s = Scheduler::new(16_000_000);
        let old = s.register_cycles(target(0), 10);
        let due = s.pop_due(10).unwrap();
        s.finish(due, 0);
        let new = s.register_cycles(target(1), 20);
        assert!(!s.is_pending(old));
        s.cancel(old);
        assert!(s.is_pending(new));
        assert_eq!(s.pending(), 1);
    }

    #[test]
    fn test_register_relative_to_now() {
        let mut s = Scheduler::new(16_000_000);
        s.advance_to(1000);
        let h = s.register_cycles(target(0), 16);
        assert_eq!(s.due_at(h), Some(1016));
        s.advance_to(10);
        assert_eq!(s.now(), 1000);
    }

    #[test]
    fn test_huge_delays_saturate() {
        let mut s = Scheduler::new(16_000_000);
        assert_eq!(s.usec_to_cycles(u64::MAX), u64::MAX);
        assert_eq!(s.usec_to_cycles(1_200_000_000_000), 19_200_000_000_000);
        assert_eq!(s.cycles_to_usec(u64::MAX), u64::MAX / 16);
        s.advance_to(100);
        let h = s.register_cycles(target(0), u64::MAX);
        assert_eq!(s.due_at(h), Some(u64::MAX));
        let due = s.pop_due(u64::MAX).unwrap();
        s.finish(due, 10);
        assert_eq!(s.due_at(h), Some(u64::MAX));
    }
}
