//! Uniform random sampling of an unbounded stream (Vitter's Algorithm R).
//!
//! A [`Reservoir`] keeps a fixed number of samples that are, at any point after
//! `n >= capacity` updates, a uniformly random subset of all `n` values seen.
//! It is used to summarize write latencies without retaining the stream.
//!
//! # Concurrency
//!
//! The counter and every slot are independent atomics, so concurrent `update`
//! calls never tear a sample or lose a count. Readers see each slot as of some
//! prefix of the updates; a slot claimed by an in-progress update may still
//! hold its previous value. Slots that have been claimed but not yet written
//! are skipped, so a snapshot never contains a value outside the stream.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::Serialize;

/// Bit pattern of a slot that has never been written
const EMPTY: u64 = u64::MAX;

/// Fixed-capacity uniform sample of `f64` values
#[derive(Debug)]
pub struct Reservoir {
    /// Number of updates observed so far
    count: AtomicU64,
    /// Number of fill-phase slots whose value has been stored
    filled: AtomicU64,
    /// Sample slots holding `f64` bit patterns
    slots: Box<[AtomicU64]>,
}

impl Reservoir {
    /// Default capacity: 99.9% confidence with a 5% margin of error, assuming
    /// a normal distribution.
    pub const DEFAULT_CAPACITY: usize = 1028;

    /// Create a reservoir holding at most `capacity` samples.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Reservoir capacity must be > 0");
        let slots = (0..capacity).map(|_| AtomicU64::new(EMPTY)).collect();
        Self {
            count: AtomicU64::new(0),
            filled: AtomicU64::new(0),
            slots,
        }
    }

    /// Maximum number of samples retained
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total number of updates observed
    pub fn observed(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Number of samples currently held: `min(capacity, observed)` once
    /// every in-progress update has stored its value
    pub fn size(&self) -> usize {
        let filled = self.filled.load(Ordering::Acquire);
        filled.min(self.slots.len() as u64) as usize
    }

    /// Offer a value to the reservoir.
    ///
    /// The first `capacity` values fill the slots in order. The `c`-th value
    /// after that replaces a uniformly chosen slot with probability
    /// `capacity / c`, otherwise it is discarded.
    pub fn update(&self, value: f64) {
        let c = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        let capacity = self.slots.len() as u64;

        let slot = if c <= capacity {
            Some(c - 1)
        } else {
            let r = rand::thread_rng().gen_range(0..c);
            (r < capacity).then_some(r)
        };

        let Some(slot) = slot else {
            return;
        };

        let mut bits = value.to_bits();
        if bits == EMPTY {
            bits = f64::NAN.to_bits();
        }
        self.slots[slot as usize].store(bits, Ordering::Release);
        if c <= capacity {
            self.filled.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Snapshot of the samples written so far
    pub fn values(&self) -> Vec<f64> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|&bits| bits != EMPTY)
            .map(f64::from_bits)
            .collect()
    }

    /// Summary statistics over the current samples, `None` while empty
    pub fn stats(&self) -> Option<SampleStats> {
        SampleStats::from_values(&self.values())
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Min/max/mean over a reservoir snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl SampleStats {
    /// Compute statistics over `values`, `None` when empty
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let (min, max, sum) = values.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
        );

        Some(Self {
            min,
            max,
            mean: sum / values.len() as f64,
            count: values.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fills_in_order_until_capacity() {
        let reservoir = Reservoir::new(3);
        assert_eq!(reservoir.size(), 0);
        assert!(reservoir.values().is_empty());

        reservoir.update(1.0);
        reservoir.update(2.0);
        assert_eq!(reservoir.size(), 2);
        assert_eq!(reservoir.values(), vec![1.0, 2.0]);

        reservoir.update(3.0);
        assert_eq!(reservoir.values(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_size_is_min_of_capacity_and_updates() {
        let reservoir = Reservoir::new(3);
        for n in 1..=1000u64 {
            reservoir.update(n as f64);
            assert_eq!(reservoir.size() as u64, n.min(3));
        }
        assert_eq!(reservoir.observed(), 1000);
    }

    #[test]
    fn test_samples_come_from_the_stream() {
        let reservoir = Reservoir::new(10);
        for n in 1..=500 {
            reservoir.update(n as f64);
        }

        let values = reservoir.values();
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|v| (1.0..=500.0).contains(v)));
    }

    /// Each of 1000 values should survive in a 3-slot reservoir with
    /// probability 3/1000. Checked per decile (tight) and per value (loose).
    #[test]
    fn test_inclusion_probability_is_uniform() {
        const TRIALS: usize = 30_000;
        const STREAM: usize = 1000;

        let mut hits = vec![0u32; STREAM];
        for _ in 0..TRIALS {
            let reservoir = Reservoir::new(3);
            for n in 0..STREAM {
                reservoir.update(n as f64);
            }
            for v in reservoir.values() {
                hits[v as usize] += 1;
            }
        }

        // 3 samples per trial, spread over 1000 values
        let expected_per_value = (TRIALS * 3) as f64 / STREAM as f64;
        for (value, &count) in hits.iter().enumerate() {
            let count = count as f64;
            assert!(
                count > expected_per_value * 0.3 && count < expected_per_value * 1.8,
                "value {value} sampled {count} times, expected about {expected_per_value}"
            );
        }

        let expected_per_decile = expected_per_value * 100.0;
        for (decile, chunk) in hits.chunks(100).enumerate() {
            let count: u32 = chunk.iter().sum();
            let deviation = (count as f64 - expected_per_decile).abs() / expected_per_decile;
            assert!(
                deviation < 0.05,
                "decile {decile} sampled {count} times, expected about {expected_per_decile}"
            );
        }
    }

    #[test]
    fn test_concurrent_updates_keep_count() {
        let reservoir = Arc::new(Reservoir::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reservoir = Arc::clone(&reservoir);
                thread::spawn(move || {
                    for i in 0..10_000 {
                        reservoir.update((t * 10_000 + i) as f64);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(reservoir.observed(), 80_000);
        assert_eq!(reservoir.size(), 64);
        assert!(reservoir.values().iter().all(|v| (0.0..80_000.0).contains(v)));
    }

    #[test]
    fn test_stats() {
        assert!(Reservoir::new(4).stats().is_none());

        let reservoir = Reservoir::new(4);
        for v in [4.0, 1.0, 7.0] {
            reservoir.update(v);
        }

        let stats = reservoir.stats().unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 7.0);
        assert_eq!(stats.mean, 4.0);
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn test_claimed_slot_is_hidden_until_written() {
        let reservoir = Reservoir::new(4);
        reservoir.update(5.0);

        // A second update has claimed slot 1 but not stored its value yet
        reservoir.count.fetch_add(1, Ordering::AcqRel);

        assert_eq!(reservoir.observed(), 2);
        assert_eq!(reservoir.size(), 1);
        assert_eq!(reservoir.values(), vec![5.0]);
        assert_eq!(reservoir.stats().unwrap().min, 5.0);
    }

    #[test]
    fn test_unwritten_slots_never_read_as_zero() {
        let reservoir = Reservoir::new(8);
        reservoir.count.fetch_add(3, Ordering::AcqRel);
        reservoir.update(2.5);

        // Slot 3 was written before slots 0..3
        assert_eq!(reservoir.values(), vec![2.5]);
        assert!(reservoir.stats().is_some_and(|stats| stats.min == 2.5));
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = Reservoir::new(0);
    }
}
