// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partitioning test targets into balanced shards.
//!
//! Balancing is weighted by per-test timing from a previous run's report;
//! targets the previous run never saw get a fixed default weight so first
//! runs and incremental runs compose the same way. Both entry points are
//! deterministic: identical inputs always produce identical shards.

use crate::{config::MatrixArgs, errors::NoTestsFound};
use drover_junit::Report;
use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    time::Duration,
};

/// The assumed duration, in seconds, of a test with no recorded timing.
pub const DEFAULT_TEST_TIME: f64 = 10.0;

/// Last-known elapsed time per test target, flattened out of a report.
///
/// Lookup misses resolve to [`DEFAULT_TEST_TIME`].
#[derive(Clone, Debug, Default)]
pub struct TimingIndex {
    times: HashMap<String, f64>,
}

impl TimingIndex {
    /// Creates an empty index. Every lookup resolves to the default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from a report, keyed by test identifier
    /// (`classname/name`). Cases without a recorded time are skipped.
    pub fn from_report(report: &Report) -> Self {
        let mut times = HashMap::new();
        for suite in &report.suites {
            for case in &suite.test_cases {
                if let Some(time) = case.time {
                    times.insert(case.id(), time);
                }
            }
        }
        Self { times }
    }

    /// Resolves a target's duration in seconds, defaulting on a miss.
    pub fn resolve(&self, target: &str) -> f64 {
        self.times.get(target).copied().unwrap_or(DEFAULT_TEST_TIME)
    }

    /// The number of targets with recorded timing.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns true if no timing is recorded at all.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// A partition of test targets scheduled to run as one remote job.
#[derive(Clone, Debug, PartialEq)]
pub struct Shard {
    /// The targets assigned to this shard, in assignment order.
    pub targets: Vec<String>,

    /// The sum of the assigned targets' resolved durations, in seconds.
    pub time: f64,
}

impl Shard {
    fn new() -> Self {
        Self {
            targets: vec![],
            time: 0.0,
        }
    }
}

/// A ceiling on how many shards a run may use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShardLimit {
    /// No ceiling: use as many shards as the time budget calls for.
    Unlimited,

    /// At most this many shards.
    Max(usize),
}

impl ShardLimit {
    /// Interprets a configured count: zero or negative means unlimited.
    pub fn from_count(count: i64) -> Self {
        if count > 0 {
            ShardLimit::Max(count as usize)
        } else {
            ShardLimit::Unlimited
        }
    }
}

/// Partitions `targets` into exactly `shard_count` balanced shards.
///
/// Targets are weighted via `timing`, sorted by duration descending (ties
/// keep input order), and assigned greedily to the shard with the smallest
/// running total, ties going to the lowest shard index. This is the
/// longest-processing-time-first heuristic; it runs in O(n log n).
///
/// If `shard_count >= targets.len()`, every target gets its own shard and
/// exactly `targets.len()` shards are returned; empty shards are never
/// fabricated. An empty target list is an error.
pub fn shards_by_count(
    targets: &[String],
    timing: &TimingIndex,
    shard_count: usize,
) -> Result<Vec<Shard>, NoTestsFound> {
    if targets.is_empty() {
        return Err(NoTestsFound);
    }
    let shard_count = shard_count.max(1);

    if shard_count >= targets.len() {
        return Ok(targets
            .iter()
            .map(|target| {
                let mut shard = Shard::new();
                shard.time = timing.resolve(target);
                shard.targets.push(target.clone());
                shard
            })
            .collect());
    }

    let mut weighted: Vec<(usize, f64)> = targets
        .iter()
        .enumerate()
        .map(|(index, target)| (index, timing.resolve(target)))
        .collect();
    // Stable sort: equal durations keep their input order.
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut shards = vec![Shard::new(); shard_count];
    let mut heap: BinaryHeap<Reverse<ShardSlot>> = (0..shard_count)
        .map(|index| Reverse(ShardSlot { time: 0.0, index }))
        .collect();

    for (target_index, duration) in weighted {
        let Reverse(mut slot) = heap.pop().expect("heap holds one slot per shard");
        let shard = &mut shards[slot.index];
        shard.targets.push(targets[target_index].clone());
        shard.time += duration;
        slot.time += duration;
        heap.push(Reverse(slot));
    }

    Ok(shards)
}

/// Computes how many shards are needed so that no shard exceeds `budget`,
/// clamped to `limit`.
///
/// First-fit-decreasing bin packing: scan targets in descending-duration
/// order, place each into the first open bin with enough remaining
/// capacity, open a new bin when none fits. A target longer than the budget
/// gets a bin of its own.
///
/// Unlike [`shards_by_count`], an empty target list is not an error here:
/// it needs zero shards.
pub fn shard_count_by_time(
    targets: &[String],
    timing: &TimingIndex,
    limit: ShardLimit,
    budget: Duration,
) -> usize {
    if targets.is_empty() {
        return 0;
    }

    let mut durations: Vec<f64> = targets.iter().map(|target| timing.resolve(target)).collect();
    durations.sort_by(|a, b| b.total_cmp(a));

    let capacity = budget.as_secs_f64();
    let mut remaining: Vec<f64> = vec![];
    for duration in durations {
        match remaining.iter_mut().find(|rem| **rem >= duration) {
            Some(rem) => *rem -= duration,
            None => remaining.push(capacity - duration),
        }
    }

    match limit {
        ShardLimit::Unlimited => remaining.len(),
        ShardLimit::Max(max) => remaining.len().min(max),
    }
}

/// Determines the shard count for a run from its configuration: the time
/// budget when one is set (at least one shard), the configured count
/// otherwise.
pub fn effective_shard_count(
    args: &impl MatrixArgs,
    targets: &[String],
    timing: &TimingIndex,
) -> usize {
    match args.shard_time() {
        Some(budget) => shard_count_by_time(targets, timing, args.test_shards(), budget).max(1),
        None => match args.test_shards() {
            ShardLimit::Max(count) => count,
            ShardLimit::Unlimited => targets.len().max(1),
        },
    }
}

/// Prepends the always-run targets to every shard, dropping duplicates the
/// balancer already placed there, and recomputes each shard's total time.
pub fn prepend_always_run(
    mut shards: Vec<Shard>,
    always_run: &[String],
    timing: &TimingIndex,
) -> Vec<Shard> {
    if always_run.is_empty() {
        return shards;
    }
    for shard in &mut shards {
        let mut targets = Vec::with_capacity(always_run.len() + shard.targets.len());
        targets.extend(always_run.iter().cloned());
        targets.extend(
            shard
                .targets
                .drain(..)
                .filter(|target| !always_run.contains(target)),
        );
        shard.time = targets.iter().map(|target| timing.resolve(target)).sum();
        shard.targets = targets;
    }
    shards
}

/// A shard's running total plus its index, ordered so that the heap yields
/// the least-loaded shard, ties broken by lowest index. The tie-break is a
/// fixed rule: it decides which shard receives which test.
#[derive(Debug)]
struct ShardSlot {
    time: f64,
    index: usize,
}

impl Ord for ShardSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for ShardSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ShardSlot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ShardSlot {}
