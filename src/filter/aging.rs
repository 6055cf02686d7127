//! Clock aging — how entries fall out of the sliding window.
//!
//! Every live slot carries a saturating clock in `[1, clock_max]`; a put of
//! the slot's key raises it back to `clock_max`, and aging decrements it.
//! A slot whose clock reaches 0 is freed and its bytes leave the running
//! estimate, so an un-refreshed entry disappears roughly one window after
//! its last touch.  Two mutually exclusive modes:
//!
//! - **Windowed**: the facade counts references and triggers [`sweep`]
//!   every `stride = max(1, window / clock_max)` of them.  A sweep
//!   decrements every bucket once, processed bucket-by-bucket under each
//!   bucket's own stripe lock — there is no global pause.
//!
//! - **Opportunistic**: no sweep.  Every put decrements both candidate
//!   buckets before the refresh/insert scan (so the touched key is
//!   re-raised afterwards), and displacement reclaims slots at clock 1 in
//!   a full candidate bucket before picking a victim, saving a kick.
//!   Aging pressure lands exactly where write pressure does.
//!
//! [`sweep`]: ClockCuckooFilter::sweep

use super::ClockCuckooFilter;

/// Which aging mode drives clock decrements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgingMode {
    /// Reference-count-driven sweeps sized from the window.
    Windowed,
    /// Aging piggybacked on puts in the touched buckets.
    Opportunistic,
}

/// References between sweep events: one window drains a full clock.
#[inline]
pub(crate) fn stride_for(window_size: u64, clock_max: u64) -> u64 {
    (window_size / clock_max.max(1)).max(1)
}

impl ClockCuckooFilter {
    /// Decrements every live clock by one, freeing slots that reach zero.
    ///
    /// Windowed mode only; called by the facade on each stride boundary.
    pub(crate) fn sweep(&self) {
        for b in 0..self.table.num_buckets() {
            let _guard = self.table.lock(b);
            self.age_bucket_locked(b);
        }
    }

    /// Opportunistic per-put decrement of the two candidate buckets.
    pub(crate) fn age_on_put(&self, i1: usize, i2: usize) {
        {
            let _guard = self.table.lock(i1);
            self.age_bucket_locked(i1);
        }
        if i2 != i1 {
            let _guard = self.table.lock(i2);
            self.age_bucket_locked(i2);
        }
    }

    /// Decrements each live slot in `b`, freeing those that hit zero.
    /// Caller holds the bucket's lock.
    pub(crate) fn age_bucket_locked(&self, b: usize) {
        for s in 0..self.table.tags_per_bucket() {
            if self.table.read_tag(b, s) == 0 {
                continue;
            }
            let clock = self.table.read_clock(b, s);
            if clock <= 1 {
                self.free_slot_locked(b, s);
            } else {
                self.table.write_clock(b, s, clock - 1);
            }
        }
    }

    /// Frees slots at clock 1 — the next to die — so a displacement in a
    /// full bucket can use them instead of kicking.  Caller holds the lock.
    pub(crate) fn reclaim_dying_locked(&self, b: usize) {
        for s in 0..self.table.tags_per_bucket() {
            if self.table.read_tag(b, s) != 0 && self.table.read_clock(b, s) == 1 {
                self.free_slot_locked(b, s);
            }
        }
    }

    fn free_slot_locked(&self, b: usize, s: usize) {
        let bytes = self.codec.decode(self.table.read_size(b, s));
        let scope = self.table.read_scope(b, s);
        self.table.clear_slot(b, s);
        self.record_aged(scope, bytes);
    }
}

#[cfg(test)]
mod tests {
    use ahash::RandomState;

    use super::super::{FilterConfig, SizeEncoding};
    use super::*;

    fn filter(clock_bits: u32, aging: AgingMode) -> ClockCuckooFilter {
        ClockCuckooFilter::new(FilterConfig {
            num_buckets: 16,
            tags_per_bucket: 4,
            tag_bits: 16,
            size_bits: 16,
            clock_bits,
            scope_bits: 0,
            num_scopes: 0,
            lock_number: 8,
            encoding: SizeEncoding::Linear,
            max_kicks: 500,
            aging,
            hasher: RandomState::with_seeds(1, 2, 3, 4),
        })
    }

    #[test]
    fn stride_spreads_a_window_over_the_clock_range() {
        assert_eq!(stride_for(4, 1), 4);
        assert_eq!(stride_for(1_000, 7), 142);
        assert_eq!(stride_for(3, 7), 1, "stride never reaches zero");
        assert_eq!(stride_for(0, 0), 1);
    }

    #[test]
    fn clock_max_sweeps_clear_an_idle_entry() {
        let f = filter(2, AgingMode::Windowed); // clock_max = 3
        f.put(&"idle", 10, 0);
        f.sweep();
        f.sweep();
        assert_eq!(f.size_of(&"idle"), Some(10), "two sweeps must not kill clock 3");
        f.sweep();
        assert_eq!(f.size_of(&"idle"), None);
        assert_eq!(f.wss(), 0);
        assert_eq!(f.aged_out(), 1);
    }

    #[test]
    fn refresh_between_sweeps_resets_the_countdown() {
        let f = filter(2, AgingMode::Windowed);
        f.put(&"hot", 10, 0);
        for _ in 0..10 {
            f.sweep();
            f.put(&"hot", 10, 0);
        }
        assert_eq!(f.size_of(&"hot"), Some(10));
    }

    #[test]
    fn opportunistic_puts_age_the_touched_buckets() {
        // One bucket: every key shares it, so every put ages every resident.
        let f = ClockCuckooFilter::new(FilterConfig {
            num_buckets: 1,
            tags_per_bucket: 4,
            tag_bits: 16,
            size_bits: 16,
            clock_bits: 1,
            scope_bits: 0,
            num_scopes: 0,
            lock_number: 1,
            encoding: SizeEncoding::Linear,
            max_kicks: 8,
            aging: AgingMode::Opportunistic,
            hasher: RandomState::with_seeds(1, 2, 3, 4),
        });
        f.put(&"k", 4, 0);
        f.put(&"a", 1, 0); // ages k from 1 to 0 -> freed
        assert_eq!(f.size_of(&"k"), None, "untouched neighbour must age out");
        assert_eq!(f.size_of(&"a"), Some(1));
        assert_eq!(f.wss(), 1);
    }
}
