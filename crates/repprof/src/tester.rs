//! Repetition tester.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    reporter::{RepetitionReport, Reporter},
    timer::duration_to_cycles,
    Clock, OsClock, Session,
};

/// Configuration of a [`RepetitionTester`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TestParameters {
    /// Number of bytes that every repetition is expected to process.
    pub expected_bytes: u64,
    /// Human-readable test name.
    pub name: String,
    /// Testing stops once no new minimum has been found for this long.
    pub convergence_window: Duration,
}

impl TestParameters {
    /// Default convergence window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(2);

    /// Creates parameters with the default convergence window.
    pub fn new(name: impl Into<String>, expected_bytes: u64) -> Self {
        Self {
            expected_bytes,
            name: name.into(),
            convergence_window: Self::DEFAULT_WINDOW,
        }
    }

    /// Sets the convergence window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.convergence_window = window;
        self
    }
}

/// Statistics accumulated across repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub struct TestResult {
    /// Number of started repetitions.
    pub started: u64,
    /// Number of completed repetitions.
    pub completed: u64,
    /// Minimum cycles spent in a repetition; `u64::MAX` if no repetition has completed.
    pub min_cycles: u64,
    /// Maximum cycles spent in a repetition.
    pub max_cycles: u64,
    /// Total cycles spent in all repetitions.
    pub total_cycles: u64,
    /// Bytes processed by the fastest repetition.
    pub min_bytes: u64,
    /// Bytes processed by the slowest repetition.
    pub max_bytes: u64,
    /// Total bytes processed by all repetitions.
    pub total_bytes: u64,
    /// Page faults incurred by the fastest repetition.
    pub min_page_faults: u64,
    /// Page faults incurred by the slowest repetition.
    pub max_page_faults: u64,
    /// Total page faults incurred by all repetitions.
    pub total_page_faults: u64,
}

impl Default for TestResult {
    fn default() -> Self {
        Self {
            started: 0,
            completed: 0,
            min_cycles: u64::MAX,
            max_cycles: 0,
            total_cycles: 0,
            min_bytes: 0,
            max_bytes: 0,
            total_bytes: 0,
            min_page_faults: 0,
            max_page_faults: 0,
            total_page_faults: 0,
        }
    }
}

/// Scratch data for the repetition in progress.
#[derive(Debug, Clone, Copy, Default)]
struct CurrentTestStats {
    bytes_processed: u64,
    start_page_faults: u64,
    start_cycles: u64,
}

/// State of a [`RepetitionTester`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TesterState {
    /// Repetitions are being executed.
    Executing,
    /// No new minimum has been found within the convergence window. Terminal.
    Finished,
    /// The tester was used incorrectly; results should not be trusted. Terminal.
    Error,
}

/// Error transitioning a [`RepetitionTester`] to the [`TesterState::Error`] state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TesterError {
    /// Starts and ends of repetitions are unbalanced.
    #[error("unbalanced test starts and ends: {started} started, {completed} completed")]
    Unbalanced {
        /// Number of started repetitions.
        started: u64,
        /// Number of completed repetitions.
        completed: u64,
    },
    /// A repetition processed a different number of bytes than expected.
    #[error("processed bytes mismatch: expected {expected}, got {actual}")]
    ByteMismatch {
        /// Expected number of bytes.
        expected: u64,
        /// Actually processed number of bytes.
        actual: u64,
    },
    /// Custom error pushed by the caller.
    #[error("{0}")]
    Custom(String),
}

impl From<String> for TesterError {
    fn from(message: String) -> Self {
        Self::Custom(message)
    }
}

impl From<&str> for TesterError {
    fn from(message: &str) -> Self {
        Self::Custom(message.to_owned())
    }
}

/// Repeatedly measures a workload until no new minimum duration is found within the convergence window.
///
/// The driving loop is owned by the caller:
///
/// ```
/// # use repprof::{ManualClock, Session, TestParameters, TesterState};
/// let session = Session::bare(ManualClock::new(1_000)).with_cpu_frequency(1_000);
/// let params = TestParameters::new("copy", 1_024);
/// let mut tester = session.repetition_tester(params);
/// let mut buffer = vec![0_u8; 1_024];
/// while tester.is_testing() {
///     buffer.fill(1); // setup is not measured
///     tester.begin_test();
///     session.clock().advance_cycles(100); // workload
///     tester.end_test(buffer.len() as u64);
/// }
/// assert_eq!(tester.state(), TesterState::Finished);
/// assert_eq!(tester.result().min_cycles, 100);
/// ```
///
/// Errors (unbalanced begin / end calls, processed bytes mismatch) do not panic; they are logged
/// via reporters and transition the tester to the terminal [`TesterState::Error`] state. It is the
/// caller's responsibility to check [`Self::state()`] before trusting the results.
#[derive(Debug)]
pub struct RepetitionTester<'a, C: Clock = OsClock> {
    session: &'a Session<C>,
    params: TestParameters,
    result: TestResult,
    current: CurrentTestStats,
    cycles_since_min_updated: u64,
    state: TesterState,
    error: Option<TesterError>,
}

impl<'a, C: Clock> RepetitionTester<'a, C> {
    pub(crate) fn new(session: &'a Session<C>, params: TestParameters) -> Self {
        let current = CurrentTestStats {
            bytes_processed: params.expected_bytes,
            ..CurrentTestStats::default()
        };
        Self {
            session,
            params,
            result: TestResult::default(),
            current,
            cycles_since_min_updated: 0,
            state: TesterState::Executing,
            error: None,
        }
    }

    /// Returns test parameters.
    pub fn params(&self) -> &TestParameters {
        &self.params
    }

    /// Returns the current state.
    pub fn state(&self) -> TesterState {
        self.state
    }

    /// Returns the error that has terminated testing, if any.
    pub fn error(&self) -> Option<&TesterError> {
        self.error.as_ref()
    }

    /// Returns statistics accumulated so far.
    pub fn result(&self) -> &TestResult {
        &self.result
    }

    /// Starts a repetition.
    pub fn begin_test(&mut self) {
        self.result.started += 1;
        let clock = self.session.clock();
        self.current = CurrentTestStats {
            bytes_processed: 0,
            start_page_faults: clock.page_faults(),
            start_cycles: clock.read_cycle_counter(),
        };
    }

    /// Ends a repetition that has processed `bytes_processed` bytes.
    pub fn end_test(&mut self, bytes_processed: u64) {
        let clock = self.session.clock();
        let end_cycles = clock.read_cycle_counter();
        let end_page_faults = clock.page_faults();
        let cycles = end_cycles.saturating_sub(self.current.start_cycles);
        let page_faults = end_page_faults.saturating_sub(self.current.start_page_faults);

        self.current.bytes_processed = bytes_processed;
        let result = &mut self.result;
        result.completed += 1;
        result.total_cycles += cycles;
        result.total_bytes += bytes_processed;
        result.total_page_faults += page_faults;
        self.cycles_since_min_updated += cycles;

        if cycles < result.min_cycles {
            result.min_cycles = cycles;
            result.min_bytes = bytes_processed;
            result.min_page_faults = page_faults;
            self.cycles_since_min_updated = 0;
            self.session.reporter().debug(&format_args!(
                "{}: new minimum found ({cycles} cycles)",
                self.params.name
            ));
        }
        if cycles > result.max_cycles {
            result.max_cycles = cycles;
            result.max_bytes = bytes_processed;
            result.max_page_faults = page_faults;
        }
    }

    /// Checks whether the caller should run another repetition. Validates that the previous repetition
    /// was well-formed, and checks whether testing has converged.
    pub fn is_testing(&mut self) -> bool {
        if self.state != TesterState::Executing {
            return false;
        }

        let TestResult {
            started, completed, ..
        } = self.result;
        if started != completed {
            self.push_error(TesterError::Unbalanced { started, completed });
        } else if self.current.bytes_processed != self.params.expected_bytes {
            self.push_error(TesterError::ByteMismatch {
                expected: self.params.expected_bytes,
                actual: self.current.bytes_processed,
            });
        } else if completed > 0 {
            self.check_convergence();
        }
        self.state == TesterState::Executing
    }

    fn check_convergence(&mut self) {
        let cpu_frequency = self.session.cpu_frequency();
        if cpu_frequency == 0 {
            // Cannot convert cycles to time; a single repetition is all we can offer.
            self.session.reporter().warning(&format_args!(
                "{}: CPU frequency is unknown; stopping after a single repetition",
                self.params.name
            ));
            self.state = TesterState::Finished;
            return;
        }

        let window_cycles = duration_to_cycles(self.params.convergence_window, cpu_frequency);
        if u128::from(self.cycles_since_min_updated) >= window_cycles {
            self.state = TesterState::Finished;
        }
    }

    /// Terminates testing with an error. The error is logged via the session reporters.
    pub fn push_error(&mut self, error: impl Into<TesterError>) {
        let error = error.into();
        self.session
            .reporter()
            .error(&format_args!("{}: {error}", self.params.name));
        self.state = TesterState::Error;
        self.error.get_or_insert(error);
    }

    /// Runs repetitions of `workload` until testing ends. The workload receives the buffer length
    /// and the buffer, and must process all of its bytes.
    pub fn run_workload<F>(&mut self, buffer: &mut [u8], mut workload: F)
    where
        F: FnMut(u64, &mut [u8]),
    {
        let len = buffer.len() as u64;
        while self.is_testing() {
            self.begin_test();
            workload(len, buffer);
            self.end_test(len);
        }
    }

    /// Same as [`Self::run_workload()`], but with the buffer produced by `setup` before each repetition.
    /// Setup and dropping the buffer are not measured.
    pub fn run_with_setup<B, S, F>(&mut self, mut setup: S, mut workload: F)
    where
        B: AsMut<[u8]>,
        S: FnMut() -> B,
        F: FnMut(u64, &mut [u8]),
    {
        while self.is_testing() {
            let mut buffer = setup();
            let buffer = buffer.as_mut();
            let len = buffer.len() as u64;
            self.begin_test();
            workload(len, buffer);
            self.end_test(len);
        }
    }

    /// Creates a report of the results accumulated so far.
    pub fn repetition_report(&self) -> RepetitionReport {
        RepetitionReport {
            name: self.params.name.clone(),
            cpu_frequency: self.session.cpu_frequency(),
            state: self.state,
            error: self.error.as_ref().map(ToString::to_string),
            result: self.result,
        }
    }

    /// Reports the results accumulated so far to the session reporters. Does not modify the results.
    pub fn report(&self) {
        let report = self.repetition_report();
        self.session.reporter().report_repetitions(&report);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, fmt, rc::Rc};

    use assert_matches::assert_matches;

    use super::*;
    use crate::ManualClock;

    #[derive(Debug, Default)]
    struct Events(Rc<RefCell<Vec<String>>>);

    impl Reporter for Events {
        fn debug(&mut self, info: &dyn fmt::Display) {
            self.0.borrow_mut().push(format!("debug: {info}"));
        }

        fn warning(&mut self, warning: &dyn fmt::Display) {
            self.0.borrow_mut().push(format!("warning: {warning}"));
        }

        fn error(&mut self, error: &dyn fmt::Display) {
            self.0.borrow_mut().push(format!("error: {error}"));
        }

        fn report_repetitions(&mut self, report: &RepetitionReport) {
            let state = report.state;
            let completed = report.result.completed;
            self.0
                .borrow_mut()
                .push(format!("repetitions: {} {state:?} {completed}", report.name));
        }
    }

    fn session(cpu_frequency: u64) -> Session<ManualClock> {
        Session::bare(ManualClock::new(1_000)).with_cpu_frequency(cpu_frequency)
    }

    fn run(tester: &mut RepetitionTester<'_, ManualClock>, cycles: u64, bytes: u64) {
        tester.begin_test();
        tester.session.clock().advance_cycles(cycles);
        tester.end_test(bytes);
    }

    #[test]
    fn accumulating_statistics() {
        let session = session(1_000_000);
        let params = TestParameters::new("test", 10);
        let mut tester = session.repetition_tester(params);
        let durations = [50, 30, 70, 30, 40];
        for (i, &cycles) in durations.iter().enumerate() {
            assert!(tester.is_testing());
            tester.begin_test();
            session.clock().add_page_faults(i as u64);
            session.clock().advance_cycles(cycles);
            tester.end_test(10);
        }
        assert!(tester.is_testing());

        let result = tester.result();
        assert_eq!(result.completed, 5);
        assert_eq!(result.started, 5);
        assert_eq!(result.min_cycles, 30);
        assert_eq!(result.max_cycles, 70);
        assert_eq!(result.total_cycles, 220);
        assert_eq!(result.total_bytes, 50);
        assert_eq!(result.min_page_faults, 1);
        assert_eq!(result.max_page_faults, 2);
        assert_eq!(result.total_page_faults, 10);
        // Only strictly smaller durations reset the counter; the second 30 doesn't.
        assert_eq!(tester.cycles_since_min_updated, 140);
    }

    #[test]
    fn converging_after_window() {
        // 400 Hz and a 1s window: 400 cycles without a new minimum finish testing.
        let session = session(400);
        let params = TestParameters::new("copy", 1_024).with_window(Duration::from_secs(1));
        let mut tester = session.repetition_tester(params);
        let mut iterations = 0;
        while tester.is_testing() {
            run(&mut tester, 100, 1_024);
            iterations += 1;
            assert!(iterations <= 10, "tester didn't converge");
        }

        assert_eq!(tester.state(), TesterState::Finished);
        assert!(tester.error().is_none());
        let result = tester.result();
        assert_eq!(result.completed, 5);
        assert_eq!(result.min_cycles, 100);
        assert_eq!(result.max_cycles, 100);
    }

    #[test]
    fn new_minimum_resets_convergence() {
        let session = session(400);
        let params = TestParameters::new("copy", 1).with_window(Duration::from_secs(1));
        let mut tester = session.repetition_tester(params);
        for cycles in [300, 200, 100] {
            assert!(tester.is_testing());
            run(&mut tester, cycles, 1);
        }
        assert!(tester.is_testing());
        run(&mut tester, 399, 1);
        assert!(tester.is_testing());
        run(&mut tester, 101, 1);
        assert!(!tester.is_testing());
        assert_eq!(tester.state(), TesterState::Finished);
        assert_eq!(tester.result().min_cycles, 100);
        assert_eq!(tester.result().max_cycles, 399);
    }

    #[test]
    fn zero_window_runs_single_repetition() {
        let session = session(1_000);
        let params = TestParameters::new("once", 8).with_window(Duration::ZERO);
        let mut tester = session.repetition_tester(params);
        let mut buffer = [0_u8; 8];
        let mut calls = 0;
        tester.run_workload(&mut buffer, |len, buf| {
            assert_eq!(len, 8);
            buf.fill(0xff);
            calls += 1;
        });
        assert_eq!(calls, 1);
        assert_eq!(buffer, [0xff; 8]);
        assert_eq!(tester.state(), TesterState::Finished);
    }

    #[test]
    fn byte_mismatch_is_an_error() {
        let session = session(1_000);
        let mut tester = session.repetition_tester(TestParameters::new("copy", 1_024));
        assert!(tester.is_testing());
        run(&mut tester, 10, 1_000);
        assert!(!tester.is_testing());
        assert_eq!(tester.state(), TesterState::Error);
        assert_matches!(
            tester.error(),
            Some(TesterError::ByteMismatch {
                expected: 1_024,
                actual: 1_000
            })
        );
        // The error state is terminal.
        run(&mut tester, 10, 1_024);
        assert!(!tester.is_testing());
    }

    #[test]
    fn unbalanced_calls_are_an_error() {
        let session = session(1_000);
        let mut tester = session.repetition_tester(TestParameters::new("copy", 16));
        assert!(tester.is_testing());
        tester.begin_test();
        tester.begin_test();
        assert!(!tester.is_testing());
        assert_eq!(tester.state(), TesterState::Error);
        assert_matches!(
            tester.error(),
            Some(TesterError::Unbalanced {
                started: 2,
                completed: 0
            })
        );
    }

    #[test]
    fn pushing_custom_error() {
        let session = session(1_000);
        let mut tester = session.repetition_tester(TestParameters::new("copy", 16));
        tester.push_error("out of memory");
        tester.push_error(String::from("ignored"));
        assert!(!tester.is_testing());
        assert_eq!(tester.error().unwrap().to_string(), "out of memory");
    }

    #[test]
    fn unknown_frequency_stops_after_single_repetition() {
        let session = session(0);
        let mut tester = session.repetition_tester(TestParameters::new("copy", 4));
        let mut buffer = [0_u8; 4];
        tester.run_workload(&mut buffer, |_, _| {});
        assert_eq!(tester.state(), TesterState::Finished);
        assert_eq!(tester.result().completed, 1);
    }

    #[test]
    fn running_with_setup() {
        let session = session(1_000);
        let params = TestParameters::new("fresh", 32).with_window(Duration::ZERO);
        let mut tester = session.repetition_tester(params);
        let mut setups = 0;
        tester.run_with_setup(
            || {
                setups += 1;
                vec![0_u8; 32]
            },
            |len, buffer| {
                assert_eq!(len, 32);
                buffer[0] = 1;
                session.clock().add_page_faults(2);
            },
        );
        assert_eq!(setups, 1);
        assert_eq!(tester.result().total_page_faults, 2);
    }

    #[test]
    fn report_does_not_mutate_results() {
        let session = session(1_000);
        let mut tester = session.repetition_tester(TestParameters::new("copy", 1));
        assert!(tester.is_testing());
        run(&mut tester, 10, 1);
        let report = tester.repetition_report();
        tester.report();
        assert_eq!(tester.repetition_report(), report);
        assert_eq!(report.state, TesterState::Executing);
        assert_eq!(report.result.completed, 1);
    }

    #[test]
    fn tester_events_are_routed_to_reporters() {
        let events = Rc::default();
        let mut session = session(1_000);
        session.add_reporter(Events(Rc::clone(&events)));
        let mut tester = session.repetition_tester(TestParameters::new("copy", 16));
        assert!(tester.is_testing());
        run(&mut tester, 50, 16);
        assert!(tester.is_testing());
        run(&mut tester, 60, 8);
        assert!(!tester.is_testing());
        tester.report();

        assert_eq!(
            *events.borrow(),
            [
                "debug: copy: new minimum found (50 cycles)",
                "error: copy: processed bytes mismatch: expected 16, got 8",
                "repetitions: copy Error 2",
            ]
        );
    }

    #[test]
    fn unknown_frequency_is_warned_about() {
        let events = Rc::default();
        let mut session = session(0);
        session.add_reporter(Events(Rc::clone(&events)));
        let mut tester = session.repetition_tester(TestParameters::new("copy", 4));
        tester.run_workload(&mut [0_u8; 4], |_, _| {});

        let events = events.borrow();
        assert_eq!(events.len(), 2, "{events:?}");
        assert_eq!(
            events[1],
            "warning: copy: CPU frequency is unknown; stopping after a single repetition"
        );
    }
}
