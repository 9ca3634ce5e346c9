//! Aggregation of profiled region measurements.

use std::{cell::Cell, collections::HashMap};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Accumulated measurements for a single profiled region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub struct ProfileResult {
    /// Total elapsed cycles across all hits, including nested regions.
    pub total_elapsed: u64,
    /// Cycles spent in nested regions.
    pub children_elapsed: u64,
    /// Elapsed cycles for the most recent hit, including nested regions.
    pub root_elapsed: u64,
    /// Number of completed hits.
    pub hit_count: u64,
    /// Total number of bytes processed by the region.
    pub bytes_processed: u64,
}

impl ProfileResult {
    /// Returns the number of cycles spent in the region itself, excluding nested regions.
    pub fn exclusive(&self) -> u64 {
        self.total_elapsed.saturating_sub(self.children_elapsed)
    }

    /// Checks whether any nested region has been measured inside this one.
    pub fn has_children(&self) -> bool {
        self.children_elapsed != 0
    }
}

/// Mapping from region labels to their [`ProfileResult`]s together with the stack of currently active
/// labels.
///
/// The label stack must be popped in the exact reverse order of pushes; otherwise, attribution
/// of nested time to parent regions is corrupted. [`RegionGuard`](crate::RegionGuard)s maintain this
/// discipline automatically.
#[derive(Debug, Default)]
pub struct ResultsStore {
    indices: HashMap<String, usize>,
    results: Vec<(String, ProfileResult)>,
    active: Vec<usize>,
    total_sampled: Cell<Option<u64>>,
}

impl ResultsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&mut self, label: &str) -> usize {
        if let Some(&idx) = self.indices.get(label) {
            return idx;
        }
        let idx = self.results.len();
        self.results.push((label.to_owned(), ProfileResult::default()));
        self.indices.insert(label.to_owned(), idx);
        idx
    }

    fn invalidate(&mut self) {
        *self.total_sampled.get_mut() = None;
    }

    /// Returns the result for `label`, creating a zeroed one if necessary.
    pub fn get_or_create(&mut self, label: &str) -> &mut ProfileResult {
        self.invalidate();
        let idx = self.index(label);
        &mut self.results[idx].1
    }

    /// Returns the result for `label` if it was ever referenced.
    pub fn get(&self, label: &str) -> Option<&ProfileResult> {
        let idx = *self.indices.get(label)?;
        Some(&self.results[idx].1)
    }

    /// Pushes `label` onto the stack of active regions, creating its result if necessary.
    pub fn push_active(&mut self, label: &str) {
        let idx = self.index(label);
        self.active.push(idx);
    }

    /// Pops the innermost active region and returns its label.
    pub fn pop_active(&mut self) -> Option<&str> {
        let idx = self.active.pop()?;
        Some(&self.results[idx].0)
    }

    /// Returns the number of currently active regions.
    pub fn active_depth(&self) -> usize {
        self.active.len()
    }

    /// Returns the result of the region enclosing the innermost active region, i.e. the second entry
    /// from the top of the label stack. Returns `None` if fewer than two regions are active.
    pub fn parent_of_current(&mut self) -> Option<&mut ProfileResult> {
        let parent_pos = self.active.len().checked_sub(2)?;
        let idx = self.active[parent_pos];
        self.invalidate();
        Some(&mut self.results[idx].1)
    }

    /// Returns the total number of sampled cycles, i.e. the sum of exclusive durations of all regions.
    ///
    /// The value is cached until the next mutation of the store.
    pub fn total_sampled_time(&self) -> u64 {
        if let Some(total) = self.total_sampled.get() {
            return total;
        }
        let total = self.results.iter().map(|(_, res)| res.exclusive()).sum();
        self.total_sampled.set(Some(total));
        total
    }

    /// Iterates over all results in the order their labels were first referenced.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &ProfileResult)> + '_ {
        self.results.iter().map(|(label, res)| (label.as_str(), res))
    }

    /// Returns the number of distinct labels.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Checks whether the store has no results.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Starts measuring a region: accounts `bytes` and pushes the label.
    pub(crate) fn open(&mut self, label: &str, bytes: u64) {
        self.get_or_create(label).bytes_processed += bytes;
        self.push_active(label);
    }

    /// Records a measurement for the innermost active region, charges it to the enclosing region
    /// and pops the label. Does nothing if no region is active.
    pub(crate) fn close(&mut self, elapsed: u64) {
        let Some(&idx) = self.active.last() else {
            return;
        };
        self.invalidate();
        let result = &mut self.results[idx].1;
        result.total_elapsed += elapsed;
        result.root_elapsed = elapsed;
        result.hit_count += 1;
        if let Some(parent) = self.parent_of_current() {
            parent.children_elapsed += elapsed;
        }
        self.pop_active();
    }

    /// Creates a snapshot of the store for reporting. This does not modify accumulated results.
    pub fn snapshot(&self, cpu_frequency: u64) -> ProfileReport {
        ProfileReport {
            cpu_frequency,
            total_sampled: self.total_sampled_time(),
            regions: self
                .iter()
                .map(|(label, result)| RegionReport {
                    label: label.to_owned(),
                    result: *result,
                })
                .collect(),
        }
    }
}

/// Snapshot of all profiled regions passed to [`Reporter`](crate::reporter::Reporter)s.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub struct ProfileReport {
    /// Calibrated CPU frequency in Hz; 0 if unknown.
    pub cpu_frequency: u64,
    /// Sum of exclusive durations of all regions.
    pub total_sampled: u64,
    /// Per-region results in the order of first reference.
    pub regions: Vec<RegionReport>,
}

/// Results for a single region within a [`ProfileReport`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub struct RegionReport {
    /// Region label.
    pub label: String,
    /// Accumulated results.
    pub result: ProfileResult,
}

/// Megabytes processed and throughput in gigabytes per second (both in binary units).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Processed data in MiB.
    pub megabytes: f64,
    /// Throughput in GiB/s.
    pub gigabytes_per_second: f64,
}

impl ProfileReport {
    /// Returns the share of `cycles` in the total sampled time, in percent. Returns 0 if nothing was sampled.
    #[allow(clippy::cast_precision_loss)] // fine for reporting
    pub fn percent_of_total(&self, cycles: u64) -> f64 {
        if self.total_sampled == 0 {
            0.0
        } else {
            cycles as f64 * 100.0 / self.total_sampled as f64
        }
    }

    /// Computes the throughput of a region. Returns `None` if no bytes were recorded, or the CPU frequency
    /// is unknown, or no time has elapsed.
    #[allow(clippy::cast_precision_loss)] // fine for reporting
    pub fn throughput(&self, result: &ProfileResult) -> Option<Throughput> {
        const MEGABYTE: f64 = 1_024.0 * 1_024.0;
        const GIGABYTE: f64 = MEGABYTE * 1_024.0;

        if result.bytes_processed == 0 || result.total_elapsed == 0 {
            return None;
        }
        let seconds = crate::cycles_to_seconds(result.total_elapsed, self.cpu_frequency)?;
        let bytes = result.bytes_processed as f64;
        Some(Throughput {
            megabytes: bytes / MEGABYTE,
            gigabytes_per_second: bytes / seconds / GIGABYTE,
        })
    }
}
