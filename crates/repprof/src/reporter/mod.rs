//! Reporting of profiling and repetition testing results.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "serde")]
pub use self::json::{ExportError, ExportedResults, JsonExporter};
pub use self::{
    printer::{PrintingReporter, Verbosity},
    seq::SeqReporter,
};
pub use crate::store::{ProfileReport, RegionReport, Throughput};
use crate::{TestParameters, TestResult, TesterState};

#[cfg(feature = "serde")]
mod json;
mod printer;
mod seq;

/// Reporter of profiling and repetition testing events. Allows extending or replacing the human-readable
/// output.
///
/// All methods have no-op default implementations.
#[allow(unused_variables)]
pub trait Reporter: fmt::Debug {
    /// Reports debug information, e.g. the calibrated CPU frequency.
    fn debug(&mut self, info: &dyn fmt::Display) {
        // do nothing
    }

    /// Reports a warning.
    fn warning(&mut self, warning: &dyn fmt::Display) {
        // do nothing
    }

    /// Reports an error, e.g. a misuse of a [`RepetitionTester`](crate::RepetitionTester).
    fn error(&mut self, error: &dyn fmt::Display) {
        // do nothing
    }

    /// Signals that a harness has started repetition testing with the specified parameters.
    fn start_repetitions(&mut self, params: &TestParameters) {
        // do nothing
    }

    /// Reports a snapshot of profiled regions.
    fn report_profile(&mut self, report: &ProfileReport) {
        // do nothing
    }

    /// Reports results of a repetition tester.
    fn report_repetitions(&mut self, report: &RepetitionReport) {
        // do nothing
    }

    /// Signals to the reporter that processing has completed.
    fn ok(self: Box<Self>) {
        // do nothing
    }
}

/// Results of a [`RepetitionTester`](crate::RepetitionTester) passed to [`Reporter`]s.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub struct RepetitionReport {
    /// Test name.
    pub name: String,
    /// Calibrated CPU frequency in Hz; 0 if unknown.
    pub cpu_frequency: u64,
    /// Tester state at the time of the report.
    pub state: TesterState,
    /// Error that has terminated testing, if any.
    pub error: Option<String>,
    /// Accumulated statistics.
    pub result: TestResult,
}

impl RepetitionReport {
    /// Returns `min`, `max` and `avg` rows, or `None` if no repetition has completed.
    #[allow(clippy::cast_precision_loss)] // fine for reporting
    pub fn rows(&self) -> Option<[RepetitionRow; 3]> {
        let result = &self.result;
        if result.completed == 0 {
            return None;
        }
        let completed = result.completed as f64;
        // Every completed repetition processes the same number of bytes, so the average is used for all rows.
        let bytes = result.total_bytes as f64 / completed;

        let row = |label, cycles: f64, page_faults: f64| {
            RepetitionRow::new(label, self.cpu_frequency, cycles, bytes, page_faults)
        };
        Some([
            row("min", result.min_cycles as f64, result.min_page_faults as f64),
            row("max", result.max_cycles as f64, result.max_page_faults as f64),
            row(
                "avg",
                result.total_cycles as f64 / completed,
                result.total_page_faults as f64 / completed,
            ),
        ])
    }
}

/// Single row (`min`, `max` or `avg`) of a [`RepetitionReport`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub struct RepetitionRow {
    /// Row label.
    pub label: &'static str,
    /// Elapsed cycles.
    pub cycles: f64,
    /// Elapsed time; `None` if the CPU frequency is unknown.
    pub seconds: Option<f64>,
    /// Bandwidth in GiB/s; `None` if no bytes were processed or elapsed time is unknown.
    pub gigabytes_per_second: Option<f64>,
    /// Page faults.
    pub page_faults: f64,
    /// Processed KiB per page fault; `None` if there were no page faults.
    pub kilobytes_per_fault: Option<f64>,
}

impl RepetitionRow {
    const KILOBYTE: f64 = 1_024.0;
    const GIGABYTE: f64 = 1_024.0 * 1_024.0 * 1_024.0;

    #[allow(clippy::cast_precision_loss)] // fine for reporting
    fn new(
        label: &'static str,
        cpu_frequency: u64,
        cycles: f64,
        bytes: f64,
        page_faults: f64,
    ) -> Self {
        let seconds = (cpu_frequency > 0).then(|| cycles / cpu_frequency as f64);
        let gigabytes_per_second = seconds
            .filter(|&secs| secs > 0.0 && bytes > 0.0)
            .map(|secs| bytes / secs / Self::GIGABYTE);
        let kilobytes_per_fault =
            (page_faults > 0.0 && bytes > 0.0).then(|| bytes / (page_faults * Self::KILOBYTE));
        Self {
            label,
            cycles,
            seconds,
            gigabytes_per_second,
            page_faults,
            kilobytes_per_fault,
        }
    }
}
