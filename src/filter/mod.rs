//! Clock-based counting cuckoo filter.
//!
//! ## Structure
//!
//! The filter maps each key to a short fingerprint (**tag**) and two
//! candidate buckets, and stores `{tag, size, clock, scope}` records in a
//! packed [`BucketTable`].  A 64-bit hash `h` of the key is split: the low
//! `log2(N)` bits give bucket `i1`, the next `TAG_BITS` bits give the tag
//! (0 is reserved for "free", so a zero tag is promoted to 1).  The
//! alternate bucket is
//!
//! ```text
//! i2 = i1 XOR (tag · 0x5bd1e995  mod N)
//! ```
//!
//! which is self-inverse within a power-of-two table, so a displaced
//! resident can always be re-routed from either bucket without consulting
//! the original key.
//!
//! ## Put path
//!
//! 1. Tag match in either candidate bucket → **refresh**: size keeps the
//!    maximum of stored and offered, clock returns to max.
//! 2. Free slot in either bucket → **insert**.
//! 3. Otherwise a bounded random-walk **displacement**: evict a random
//!    resident, re-place it in its alternate bucket, iterate up to
//!    `max_kicks` steps.  The in-flight record travels on the stack, never
//!    in a shared slot.  On exhaustion the in-flight record is **dropped**
//!    and its bytes leave the running estimate.
//!
//! ## Accounting
//!
//! The running working-set estimate is the sum of decoded sizes over all
//! live slots, maintained with `fetch_add`/`fetch_sub` on every slot
//! create, grow, and destroy.  Concurrent puts of one key can briefly
//! leave one duplicate slot per candidate bucket; [`reconcile`] clears
//! duplicates and recomputes the sums from the table.
//!
//! [`reconcile`]: ClockCuckooFilter::reconcile

pub(crate) mod aging;
pub(crate) mod bitvec;
pub(crate) mod table;

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;

use self::aging::AgingMode;
use self::table::{BucketTable, Slot, SlotLayout};

/// Multiplier mixing a tag into bucket-index space (MurmurHash2 constant).
const TAG_MIX: u64 = 0x5bd1_e995;

// ---------------------------------------------------------------------------
// Public configuration enums
// ---------------------------------------------------------------------------

/// Outcome of a single `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was not present; a free slot was filled.
    Inserted,
    /// The key was present; its size and clock were updated in place.
    Refreshed,
    /// The key was placed by displacing residents through the cuckoo walk.
    Displaced,
    /// The displacement budget was exhausted; one resident was evicted from
    /// the table and its bytes subtracted.  Graceful degradation, not an
    /// error.
    Dropped,
}

/// How the per-slot size field encodes a byte count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeEncoding {
    /// The stored value is the exact size, saturating at `2^SIZE_BITS − 1`.
    Linear,
    /// Logarithmic-stride quantization: stored value `v` denotes
    /// `v · 2^shift` bytes; a live slot with `v = 0` decodes to `2^shift`,
    /// never zero.
    Bucket { shift: u32 },
}

#[derive(Clone, Copy)]
struct SizeCodec {
    encoding: SizeEncoding,
    max_encoded: u64,
}

impl SizeCodec {
    #[inline]
    fn encode(&self, size: u64) -> u64 {
        match self.encoding {
            SizeEncoding::Linear => size.min(self.max_encoded),
            SizeEncoding::Bucket { shift } => (size >> shift).min(self.max_encoded),
        }
    }

    #[inline]
    fn decode(&self, encoded: u64) -> u64 {
        match self.encoding {
            SizeEncoding::Linear => encoded,
            SizeEncoding::Bucket { shift } => {
                if encoded == 0 {
                    1u64 << shift
                } else {
                    encoded << shift
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Construction parameters, validated by the builder.
pub(crate) struct FilterConfig {
    pub num_buckets: usize,
    pub tags_per_bucket: usize,
    pub tag_bits: u32,
    pub size_bits: u32,
    pub clock_bits: u32,
    pub scope_bits: u32,
    pub num_scopes: usize,
    pub lock_number: usize,
    pub encoding: SizeEncoding,
    pub max_kicks: u32,
    pub aging: AgingMode,
    pub hasher: RandomState,
}

pub(crate) struct ClockCuckooFilter {
    table: BucketTable,
    build_hasher: RandomState,
    bucket_mask: usize,
    /// `log2(num_buckets)` — the hash bits consumed by the bucket index.
    bucket_bits: u32,
    codec: SizeCodec,
    clock_max: u64,
    max_kicks: u32,
    aging: AgingMode,
    /// Running sum of decoded sizes over all live slots.
    wss: AtomicU64,
    /// Per-scope running sums; empty when scopes are disabled.
    scope_wss: Box<[AtomicU64]>,
    /// Slots cleared by aging since construction.
    aged_out: AtomicU64,
    /// xorshift64 state for victim selection.
    rng: AtomicU64,
}

impl ClockCuckooFilter {
    pub fn new(cfg: FilterConfig) -> Self {
        let layout = SlotLayout {
            tag_bits: cfg.tag_bits,
            size_bits: cfg.size_bits,
            clock_bits: cfg.clock_bits,
            scope_bits: cfg.scope_bits,
            tags_per_bucket: cfg.tags_per_bucket,
        };
        let table = BucketTable::new(cfg.num_buckets, cfg.lock_number, layout);
        let codec = SizeCodec {
            encoding: cfg.encoding,
            max_encoded: layout.size_mask(),
        };
        let scope_wss = (0..cfg.num_scopes)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let seed = cfg.hasher.hash_one(0x9E37_79B9_7F4A_7C15u64) | 1;

        log::debug!(
            "ccf: {} buckets x {} slots, slot {} bits (tag {} / size {} / clock {} / scope {}), {:?}",
            cfg.num_buckets,
            cfg.tags_per_bucket,
            layout.slot_bits(),
            cfg.tag_bits,
            cfg.size_bits,
            cfg.clock_bits,
            cfg.scope_bits,
            cfg.encoding,
        );

        ClockCuckooFilter {
            table,
            build_hasher: cfg.hasher,
            bucket_mask: cfg.num_buckets - 1,
            bucket_bits: cfg.num_buckets.trailing_zeros(),
            codec,
            clock_max: layout.clock_max(),
            max_kicks: cfg.max_kicks,
            aging: cfg.aging,
            wss: AtomicU64::new(0),
            scope_wss,
            aged_out: AtomicU64::new(0),
            rng: AtomicU64::new(seed),
        }
    }

    // -----------------------------------------------------------------------
    // Hashing
    // -----------------------------------------------------------------------

    /// Splits the key hash into `(tag, i1, i2)`.
    fn index<K: Hash + ?Sized>(&self, key: &K) -> (u64, usize, usize) {
        let h = self.build_hasher.hash_one(key);
        let i1 = (h as usize) & self.bucket_mask;
        let mut tag = (h >> self.bucket_bits) & self.table.layout().tag_mask();
        if tag == 0 {
            tag = 1; // 0 marks a free slot
        }
        (tag, i1, self.alt_bucket(i1, tag))
    }

    /// The other candidate bucket for `tag`.  Self-inverse:
    /// `alt_bucket(alt_bucket(b, t), t) == b`.
    #[inline]
    pub(crate) fn alt_bucket(&self, b: usize, tag: u64) -> usize {
        b ^ (tag.wrapping_mul(TAG_MIX) as usize & self.bucket_mask)
    }

    /// Racy xorshift64 step; collisions between threads only perturb the
    /// stream, which is fine for victim selection.
    #[inline]
    fn next_rand(&self) -> u64 {
        let mut x = self.rng.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng.store(x, Ordering::Relaxed);
        x
    }

    // -----------------------------------------------------------------------
    // Put
    // -----------------------------------------------------------------------

    pub fn put<K: Hash + ?Sized>(&self, key: &K, size: u64, scope: u64) -> PutOutcome {
        let (tag, i1, i2) = self.index(key);
        if self.aging == AgingMode::Opportunistic {
            self.age_on_put(i1, i2);
        }
        let encoded = self.codec.encode(size);

        if let Some(outcome) = self.try_put_in(i1, tag, encoded, scope) {
            return outcome;
        }
        if i2 != i1 {
            if let Some(outcome) = self.try_put_in(i2, tag, encoded, scope) {
                return outcome;
            }
        }

        self.displace(
            Slot {
                tag,
                size: encoded,
                clock: self.clock_max,
                scope,
            },
            i1,
            i2,
        )
    }

    /// Refresh-or-insert within one bucket.  `None` means the bucket had
    /// neither the tag nor a free slot.
    fn try_put_in(&self, b: usize, tag: u64, encoded: u64, scope: u64) -> Option<PutOutcome> {
        let _guard = self.table.lock(b);
        if let Some(s) = self.find_tag(b, tag) {
            self.refresh_slot(b, s, encoded);
            return Some(PutOutcome::Refreshed);
        }
        if let Some(s) = self.find_free(b) {
            self.table.write_slot(
                b,
                s,
                Slot {
                    tag,
                    size: encoded,
                    clock: self.clock_max,
                    scope,
                },
            );
            self.add_bytes(scope, self.codec.decode(encoded));
            return Some(PutOutcome::Inserted);
        }
        None
    }

    /// Tag match: the stored size keeps the maximum of old and offered, the
    /// clock returns to max.  The scope set at first insertion is kept.
    fn refresh_slot(&self, b: usize, s: usize, encoded: u64) {
        let old = self.table.read_size(b, s);
        if encoded > old {
            self.table.write_size(b, s, encoded);
            let grown = self.codec.decode(encoded) - self.codec.decode(old);
            if grown > 0 {
                self.add_bytes(self.table.read_scope(b, s), grown);
            }
        }
        self.table.write_clock(b, s, self.clock_max);
    }

    /// Bounded random-walk displacement.  The in-flight record is carried on
    /// the stack; its bytes enter the running sum when it is first written
    /// into the table and leave it only if the walk exhausts its budget.
    fn displace(&self, new: Slot, i1: usize, i2: usize) -> PutOutcome {
        let mut fly = new;
        let mut placed = false;
        let mut b = if self.next_rand() & 1 == 0 { i1 } else { i2 };

        for _ in 0..self.max_kicks {
            // Peek a victim under the single bucket lock.
            let (victim_ix, victim_tag) = {
                let _guard = self.table.lock(b);
                if self.aging == AgingMode::Opportunistic {
                    self.reclaim_dying_locked(b);
                }
                if let Some(s) = self.find_free(b) {
                    self.write_in_flight(b, s, fly, &mut placed);
                    return PutOutcome::Displaced;
                }
                let s = self.next_rand() as usize % self.table.tags_per_bucket();
                (s, self.table.read_tag(b, s))
            };

            let alt = self.alt_bucket(b, victim_tag);
            let _guards = self.table.lock_pair(b, alt);

            // The bucket was briefly unlocked while ordering the pair; start
            // this step over if the victim moved underneath us.
            let victim = self.table.read_slot(b, victim_ix);
            if victim.tag != victim_tag {
                continue;
            }

            self.write_in_flight(b, victim_ix, fly, &mut placed);
            if self.aging == AgingMode::Opportunistic {
                self.reclaim_dying_locked(alt);
            }
            if let Some(s) = self.find_free(alt) {
                // The victim stays counted; it merely changes buckets.
                self.table.write_slot(alt, s, victim);
                return PutOutcome::Displaced;
            }
            fly = victim;
            b = alt;
        }

        // Budget exhausted.  When `placed` the in-flight record is a
        // displaced resident whose bytes are still in the running sum; when
        // not, it is the new entry and was never counted.
        if placed {
            self.sub_bytes(fly.scope, self.codec.decode(fly.size));
        }
        PutOutcome::Dropped
    }

    fn write_in_flight(&self, b: usize, s: usize, slot: Slot, placed: &mut bool) {
        self.table.write_slot(b, s, slot);
        if !*placed {
            self.add_bytes(slot.scope, self.codec.decode(slot.size));
            *placed = true;
        }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Decoded size of the matching slot, or `None` if the key is absent.
    pub fn size_of<K: Hash + ?Sized>(&self, key: &K) -> Option<u64> {
        let (tag, i1, i2) = self.index(key);
        if let Some(size) = self.size_in(i1, tag) {
            return Some(size);
        }
        if i2 != i1 {
            if let Some(size) = self.size_in(i2, tag) {
                return Some(size);
            }
        }
        None
    }

    fn size_in(&self, b: usize, tag: u64) -> Option<u64> {
        let _guard = self.table.lock(b);
        self.find_tag(b, tag)
            .map(|s| self.codec.decode(self.table.read_size(b, s)))
    }

    /// Current working-set estimate in bytes.
    #[inline]
    pub fn wss(&self) -> u64 {
        self.wss.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn wss_of_scope(&self, scope: usize) -> u64 {
        self.scope_wss[scope].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn aged_out(&self) -> u64 {
        self.aged_out.load(Ordering::Relaxed)
    }

    /// Number of live slots.  O(table); takes each bucket lock in turn.
    pub fn entry_count(&self) -> usize {
        let mut live = 0;
        for b in 0..self.table.num_buckets() {
            let _guard = self.table.lock(b);
            for s in 0..self.table.tags_per_bucket() {
                if self.table.read_tag(b, s) != 0 {
                    live += 1;
                }
            }
        }
        live
    }

    #[inline]
    fn find_tag(&self, b: usize, tag: u64) -> Option<usize> {
        (0..self.table.tags_per_bucket()).find(|&s| self.table.read_tag(b, s) == tag)
    }

    #[inline]
    fn find_free(&self, b: usize) -> Option<usize> {
        self.find_tag(b, 0)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Clears duplicate slots and recomputes the running sums from the
    /// table.  Returns the recomputed total.
    ///
    /// Concurrent puts racing with the final store are absorbed into the
    /// bounded drift that the next reconciliation corrects.
    pub fn reconcile(&self) -> u64 {
        // Pass 1: a key whose concurrent puts landed in both candidate
        // buckets has one slot per bucket with the same tag.  Keep the
        // fresher copy.
        for b in 0..self.table.num_buckets() {
            for s in 0..self.table.tags_per_bucket() {
                let tag = {
                    let _guard = self.table.lock(b);
                    self.table.read_tag(b, s)
                };
                if tag == 0 {
                    continue;
                }
                let alt = self.alt_bucket(b, tag);
                if alt <= b {
                    // The pair is visited from its lower bucket index.
                    continue;
                }
                let _guards = self.table.lock_pair(b, alt);
                if self.table.read_tag(b, s) != tag {
                    continue;
                }
                if let Some(s2) = self.find_tag(alt, tag) {
                    let (cb, cs) = if self.table.read_clock(alt, s2) <= self.table.read_clock(b, s)
                    {
                        (alt, s2)
                    } else {
                        (b, s)
                    };
                    self.table.clear_slot(cb, cs);
                }
            }
        }

        // Pass 2: recompute the sums bucket by bucket, clearing any
        // in-bucket duplicate left behind by displacement.
        let mut total = 0u64;
        let mut per_scope = vec![0u64; self.scope_wss.len()];
        for b in 0..self.table.num_buckets() {
            let _guard = self.table.lock(b);
            for s in 0..self.table.tags_per_bucket() {
                let slot = self.table.read_slot(b, s);
                if slot.tag == 0 {
                    continue;
                }
                if (0..s).any(|p| self.table.read_tag(b, p) == slot.tag) {
                    self.table.clear_slot(b, s);
                    continue;
                }
                let bytes = self.codec.decode(slot.size);
                total += bytes;
                if !per_scope.is_empty() {
                    per_scope[slot.scope as usize] += bytes;
                }
            }
        }

        let before = self.wss.swap(total, Ordering::Relaxed);
        for (scope, sum) in per_scope.into_iter().enumerate() {
            self.scope_wss[scope].store(sum, Ordering::Relaxed);
        }
        if before != total {
            log::trace!("ccf reconcile: wss {} -> {}", before, total);
        }
        total
    }

    // -----------------------------------------------------------------------
    // Byte accounting
    // -----------------------------------------------------------------------

    #[inline]
    fn add_bytes(&self, scope: u64, bytes: u64) {
        self.wss.fetch_add(bytes, Ordering::Relaxed);
        if !self.scope_wss.is_empty() {
            self.scope_wss[scope as usize].fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[inline]
    fn sub_bytes(&self, scope: u64, bytes: u64) {
        self.wss.fetch_sub(bytes, Ordering::Relaxed);
        if !self.scope_wss.is_empty() {
            self.scope_wss[scope as usize].fetch_sub(bytes, Ordering::Relaxed);
        }
    }

    // Used by `aging.rs`, which shares these internals.
    #[inline]
    fn record_aged(&self, scope: u64, bytes: u64) {
        self.sub_bytes(scope, bytes);
        self.aged_out.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(num_buckets: usize, clock_bits: u32, encoding: SizeEncoding) -> ClockCuckooFilter {
        ClockCuckooFilter::new(FilterConfig {
            num_buckets,
            tags_per_bucket: 4,
            tag_bits: 16,
            size_bits: 16,
            clock_bits,
            scope_bits: 0,
            num_scopes: 0,
            lock_number: 8,
            encoding,
            max_kicks: 500,
            aging: AgingMode::Windowed,
            hasher: RandomState::with_seeds(1, 2, 3, 4),
        })
    }

    #[test]
    fn alt_bucket_is_self_inverse() {
        let f = filter(1 << 10, 2, SizeEncoding::Linear);
        for key in 0..5_000u64 {
            let (tag, i1, i2) = f.index(&key);
            assert_ne!(tag, 0, "tag 0 is reserved for free slots");
            assert_eq!(f.alt_bucket(i2, tag), i1, "reciprocity broken for key {}", key);
        }
    }

    #[test]
    fn insert_then_lookup() {
        let f = filter(64, 2, SizeEncoding::Linear);
        assert_eq!(f.put(&"a", 5, 0), PutOutcome::Inserted);
        assert_eq!(f.size_of(&"a"), Some(5));
        assert_eq!(f.size_of(&"missing"), None);
        assert_eq!(f.wss(), 5);
    }

    #[test]
    fn refresh_keeps_maximum_size() {
        let f = filter(64, 2, SizeEncoding::Linear);
        f.put(&"a", 5, 0);
        assert_eq!(f.put(&"a", 7, 0), PutOutcome::Refreshed);
        assert_eq!(f.size_of(&"a"), Some(7));
        assert_eq!(f.wss(), 7);

        // A smaller re-observation never shrinks a live slot.
        f.put(&"a", 3, 0);
        assert_eq!(f.size_of(&"a"), Some(7));
        assert_eq!(f.wss(), 7);
    }

    #[test]
    fn linear_sizes_saturate_at_field_width() {
        let f = filter(64, 2, SizeEncoding::Linear);
        f.put(&"big", 1 << 30, 0);
        assert_eq!(f.size_of(&"big"), Some((1 << 16) - 1));
    }

    #[test]
    fn bucket_encoding_quantizes_and_never_decodes_zero() {
        let f = filter(64, 2, SizeEncoding::Bucket { shift: 2 });
        f.put(&"a", 5, 0); // 5 >> 2 = 1 -> 4 bytes
        assert_eq!(f.size_of(&"a"), Some(4));
        f.put(&"b", 3, 0); // 3 >> 2 = 0 -> still 4 bytes, never 0
        assert_eq!(f.size_of(&"b"), Some(4));
        assert_eq!(f.wss(), 8);
    }

    #[test]
    fn overload_returns_dropped_and_keeps_sum_bounded() {
        // 2 buckets x 4 slots = 8 slot capacity, tiny kick budget.
        let f = ClockCuckooFilter::new(FilterConfig {
            num_buckets: 2,
            tags_per_bucket: 4,
            tag_bits: 16,
            size_bits: 16,
            clock_bits: 3,
            scope_bits: 0,
            num_scopes: 0,
            lock_number: 2,
            encoding: SizeEncoding::Linear,
            max_kicks: 8,
            aging: AgingMode::Windowed,
            hasher: RandomState::with_seeds(1, 2, 3, 4),
        });
        let mut dropped = 0;
        for key in 0..64u64 {
            if f.put(&key, 1, 0) == PutOutcome::Dropped {
                dropped += 1;
            }
        }
        assert!(dropped > 0, "64 puts into 8 slots must drop");
        assert!(f.wss() <= 8, "wss {} exceeds slot capacity", f.wss());
        assert_eq!(f.wss(), f.entry_count() as u64);
    }

    #[test]
    fn reconcile_matches_incremental_sum() {
        let f = filter(256, 2, SizeEncoding::Linear);
        for key in 0..100u64 {
            f.put(&key, key + 1, 0);
        }
        let before = f.wss();
        let total = f.reconcile();
        assert_eq!(total, before, "no drift without races or duplicates");
        assert_eq!(f.wss(), total);
    }
}
