//! Retransmission timers collapsed into one structure per connection
//! instead of one OS timer per in-flight segment (spec §9, "timer storm").
//!
//! The sender polls this table itself each loop iteration; cancellation
//! removes the entry it cancels, so a stale heap entry is simply a no-op
//! when it's eventually popped — idempotent by construction.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

pub struct PendingAckTable {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    // seq_no -> (send_time, currently-armed deadline). A heap entry whose
    // deadline doesn't match the live entry here is stale (superseded by a
    // re-arm, or already cancelled) and is discarded when popped.
    live: HashMap<u64, (Instant, Instant)>,
}

impl PendingAckTable {
    pub fn new() -> Self {
        PendingAckTable {
            deadlines: BinaryHeap::new(),
            live: HashMap::new(),
        }
    }

    /// Installs or refreshes the timer for `seq_no` with the given timeout.
    pub fn arm(&mut self, seq_no: u64, timeout: Duration) {
        let now = Instant::now();
        let deadline = now + timeout;
        self.live.insert(seq_no, (now, deadline));
        self.deadlines.push(Reverse((deadline, seq_no)));
    }

    /// Cancels the timer for `seq_no`. Safe to call more than once, and
    /// safe to call after the timer has already fired.
    pub fn cancel(&mut self, seq_no: u64) -> Option<Instant> {
        self.live.remove(&seq_no).map(|(sent, _)| sent)
    }

    /// Cancels every pending timer with `seq_no < floor` (used when a new
    /// cumulative ACK arrives: everything below the new base is delivered).
    pub fn cancel_before(&mut self, floor: u64) {
        self.live.retain(|&seq_no, _| seq_no >= floor);
    }

    /// Cancels every pending timer with `seq_no >= floor` (used on timeout
    /// and fast retransmit, both of which rewind the send cursor back to
    /// `floor` and will re-arm fresh timers as they retransmit).
    pub fn cancel_from(&mut self, floor: u64) {
        self.live.retain(|&seq_no, _| seq_no < floor);
    }

    /// Returns the send time recorded for `seq_no`, if its timer is still
    /// live (not cancelled, not already popped as expired).
    pub fn send_time(&self, seq_no: u64) -> Option<Instant> {
        self.live.get(&seq_no).map(|(sent, _)| *sent)
    }

    /// Pops and returns the earliest seq_no whose deadline has passed and
    /// whose timer has not been cancelled or refreshed since it fired.
    /// Call this once per sender loop iteration.
    pub fn poll_expired(&mut self) -> Option<u64> {
        let now = Instant::now();
        while let Some(&Reverse((deadline, seq_no))) = self.deadlines.peek() {
            if deadline > now {
                return None;
            }
            self.deadlines.pop();

            if let Some(&(_, armed_deadline)) = self.live.get(&seq_no) {
                if armed_deadline == deadline {
                    return Some(seq_no);
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.live.clear();
    }
}

impl Default for PendingAckTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_expiry_suppresses_poll() {
        let mut t = PendingAckTable::new();
        t.arm(10, Duration::from_millis(5));
        t.cancel(10);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(t.poll_expired(), None);
    }

    #[test]
    fn expired_timer_is_returned_once() {
        let mut t = PendingAckTable::new();
        t.arm(10, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(t.poll_expired(), Some(10));
        // cancel it the way the sender would after handling the timeout
        t.cancel(10);
        assert_eq!(t.poll_expired(), None);
    }

    #[test]
    fn cancel_before_floor_clears_acked_range() {
        let mut t = PendingAckTable::new();
        t.arm(0, Duration::from_secs(10));
        t.arm(100, Duration::from_secs(10));
        t.arm(200, Duration::from_secs(10));
        t.cancel_before(150);
        assert!(t.send_time(0).is_none());
        assert!(t.send_time(100).is_none());
        assert!(t.send_time(200).is_some());
    }
}
