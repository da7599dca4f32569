//! Trivial timeouts. A timeout schedules one of a fixed set of engine
//! callbacks at an absolute deadline on the 1/24 µs clock; the queue
//! is drained by the timer callback of the multiplexer. A timeout
//! fires at most once per arming and it is fine to rearm it from its
//! own callback: it will fire again at a later timer callback, never
//! within the same drain.

/// The reified timeout callbacks. The engine dispatches on these
/// after each drain; there are no function pointers to keep the
/// single-owner aggregate simple.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimoKind {
    /// Release pending throttled input events.
    NormFlush,
    /// Purge idle terminated mixer states.
    MixoutPurge,
    /// End the sounding metronome click.
    MetroClickOff,
}

#[derive(Clone, Copy, Debug)]
struct Timo {
    val: u32,
    kind: TimoKind,
}

/// Absolute-deadline queue with wrapping 32-bit time. Kept sorted at
/// insertion; the queue holds a handful of entries so a vector is
/// enough.
#[derive(Debug, Default)]
pub struct TimoQueue {
    queue: Vec<Timo>,
    /// Time reference, in 1/24 µs, wrapping.
    pub abstime: u32,
}

impl TimoQueue {
    pub fn new() -> TimoQueue {
        TimoQueue::default()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.abstime = 0;
    }

    /// Schedule `kind` in `delta` 1/24 µs. The timeout must not
    /// already be armed.
    pub fn add(&mut self, kind: TimoKind, delta: u32) {
        debug_assert!(!self.queue.iter().any(|t| t.kind == kind), "timeout already armed");
        debug_assert!(delta != 0, "zero timeout");
        let val = self.abstime.wrapping_add(delta);
        // wrapping comparison: the difference is meaningful as a
        // signed value as long as deadlines stay within 2^31
        let pos = self
            .queue
            .iter()
            .position(|t| t.val.wrapping_sub(val) as i32 > 0)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, Timo { val, kind });
    }

    /// Abort an armed timeout; aborting an expired one is a no-op.
    pub fn del(&mut self, kind: TimoKind) {
        self.queue.retain(|t| t.kind != kind);
    }

    /// Advance the time reference by `delta` and collect the expired
    /// timeouts, oldest first. The caller dispatches them; anything
    /// they rearm fires at a later update.
    pub fn update(&mut self, delta: u32) -> Vec<TimoKind> {
        self.abstime = self.abstime.wrapping_add(delta);
        let mut fired = Vec::new();
        while let Some(first) = self.queue.first() {
            if first.val.wrapping_sub(self.abstime) as i32 > 0 {
                break;
            }
            fired.push(self.queue.remove(0).kind);
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut q = TimoQueue::new();
        q.add(TimoKind::MixoutPurge, 100);
        q.add(TimoKind::NormFlush, 50);
        q.add(TimoKind::MetroClickOff, 150);
        assert_eq!(q.update(49), vec![]);
        assert_eq!(q.update(1), vec![TimoKind::NormFlush]);
        assert_eq!(
            q.update(1000),
            vec![TimoKind::MixoutPurge, TimoKind::MetroClickOff]
        );
    }

    #[test]
    fn del_disarms() {
        let mut q = TimoQueue::new();
        q.add(TimoKind::NormFlush, 10);
        q.del(TimoKind::NormFlush);
        assert_eq!(q.update(20), vec![]);
        // deleting an expired timeout is a no-op
        q.del(TimoKind::NormFlush);
    }

    #[test]
    fn wraps_around() {
        let mut q = TimoQueue::new();
        q.abstime = u32::MAX - 5;
        q.add(TimoKind::NormFlush, 10);
        assert_eq!(q.update(4), vec![]);
        assert_eq!(q.update(10), vec![TimoKind::NormFlush]);
    }
}
