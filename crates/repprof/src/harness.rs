//! [`Harness`] and tightly related types.

use std::{panic, process, thread, time::Duration};

use clap::Parser;

#[cfg(feature = "serde")]
use crate::reporter::JsonExporter;
use crate::{
    options::{HarnessOptions, IdMatcher},
    reporter::{PrintingReporter, Reporter},
    OsClock, RepetitionTester, Session, TestParameters, TesterState,
};

/// Mode in which the harness is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum HarnessMode {
    /// Checking that workloads run. Each repetition test runs a single repetition. Enabled by running
    /// the executable via `cargo test`.
    Test,
    /// Running repetition tests until convergence (i.e., the main mode). Enabled by `cargo bench`.
    Bench,
    /// Listing test names. Enabled by specifying `--list` command-line arg.
    List,
}

/// Runner of repetition tests configured from command-line args.
///
/// Profiled regions can be measured using the [`session`](Self::session()); the profile is reported
/// when the harness is dropped. If any repetition test has ended in the [`TesterState::Error`] state,
/// the process exits with a non-zero code after reporting.
///
/// # Examples
///
/// See [crate docs](index.html) for the examples of usage.
#[derive(Debug)]
pub struct Harness {
    options: HarnessOptions,
    id_matcher: IdMatcher,
    session: Session<OsClock>,
    has_failures: bool,
}

/// Parses configuration options from the command-line args and environment.
impl Default for Harness {
    fn default() -> Self {
        Self::new(HarnessOptions::parse())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if thread::panicking() || self.mode() == HarnessMode::List {
            return;
        }

        if !self.session.store().is_empty() {
            self.session.report_profile();
        }
        if self.has_failures {
            self.session
                .reporter()
                .error(&"there were repetition test failures");
            self.session.finish_reporters();
            process::exit(1);
        }
    }
}

impl Harness {
    fn new(options: HarnessOptions) -> Self {
        let mut reporter = PrintingReporter::new(options.styling(), options.verbosity());
        reporter.debug(&format_args!("started with options: {options:?}"));
        let id_matcher = match options.id_matcher() {
            Ok(matcher) => matcher,
            Err(err) => {
                reporter.error(&err);
                process::exit(1);
            }
        };

        let mut session =
            Session::bare(OsClock::new()).with_sample_window(options.sample_window());
        session.add_reporter(reporter);
        if let Some(path) = &options.json {
            #[cfg(feature = "serde")]
            session.add_reporter(JsonExporter::new(path));
            #[cfg(not(feature = "serde"))]
            session.reporter().warning(&format_args!(
                "exporting to `{}` requires the `serde` crate feature; skipping",
                path.display()
            ));
        }

        Self {
            options,
            id_matcher,
            session,
            has_failures: false,
        }
    }

    /// Adds a reporter to the harness.
    #[doc(hidden)] // not stable yet
    pub fn add_reporter(&mut self, reporter: impl Reporter + 'static) -> &mut Self {
        self.session.add_reporter(reporter);
        self
    }

    /// Gets the execution mode.
    pub fn mode(&self) -> HarnessMode {
        self.options.mode()
    }

    /// Returns the session used by this harness. The session can be used to measure profiled regions.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Creates test parameters with the convergence window set by the `--window` command-line arg.
    pub fn parameters(&self, name: &str, expected_bytes: u64) -> TestParameters {
        TestParameters::new(name, expected_bytes).with_window(self.options.window)
    }

    /// Runs a repetition test for a workload processing `buffer`. The workload is provided with the buffer
    /// length and the buffer itself. The convergence window is set by the `--window` command-line arg.
    pub fn repeat(
        &mut self,
        name: &str,
        buffer: &mut [u8],
        workload: impl FnMut(u64, &mut [u8]),
    ) -> &mut Self {
        let params = self.parameters(name, buffer.len() as u64);
        self.repeat_with(params, |tester| tester.run_workload(buffer, workload))
    }

    /// Runs a repetition test with the specified parameters. `test_fn` is responsible for driving
    /// the tester until it stops testing.
    ///
    /// In the [test mode](HarnessMode::Test), the convergence window is overridden to be zero, so that
    /// only a single repetition is performed. Panics in `test_fn` are reported as test failures in this mode.
    pub fn repeat_with(
        &mut self,
        params: TestParameters,
        test_fn: impl FnOnce(&mut RepetitionTester<'_>),
    ) -> &mut Self {
        if !self.id_matcher.matches(&params.name) {
            return self;
        }

        let mode = self.mode();
        let params = match mode {
            HarnessMode::List => {
                PrintingReporter::report_list_item(&params.name);
                return self;
            }
            HarnessMode::Test => params.with_window(Duration::ZERO),
            HarnessMode::Bench => params,
        };

        self.session.reporter().start_repetitions(&params);
        let mut tester = self.session.repetition_tester(params);
        if mode == HarnessMode::Test && cfg!(panic = "unwind") {
            let wrapped = panic::AssertUnwindSafe(|| test_fn(&mut tester));
            if let Err(err) = panic::catch_unwind(wrapped) {
                tester.push_error(format!("workload panicked: {}", panic_message(&*err)));
            }
        } else {
            test_fn(&mut tester);
        }
        tester.report();

        let failed = tester.state() == TesterState::Error;
        self.has_failures |= failed;
        self
    }
}

fn panic_message(panic_data: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic_data.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic_data.downcast_ref::<String>() {
        message
    } else {
        "(unknown panic payload)"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::reporter::RepetitionReport;

    #[derive(Debug, Default)]
    struct Collector(Arc<Mutex<Vec<RepetitionReport>>>);

    impl Reporter for Collector {
        fn report_repetitions(&mut self, report: &RepetitionReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    fn harness(args: &[&str]) -> (Harness, Arc<Mutex<Vec<RepetitionReport>>>) {
        let mut all_args = vec!["bench", "--quiet", "--sample-ms", "5"];
        all_args.extend_from_slice(args);
        let options = HarnessOptions::try_parse_from(all_args).unwrap();
        let mut harness = Harness::new(options);
        let reports = Arc::default();
        harness.add_reporter(Collector(Arc::clone(&reports)));
        (harness, reports)
    }

    #[test]
    fn running_single_repetition_in_test_mode() {
        let (mut harness, reports) = harness(&[]);
        assert_eq!(harness.mode(), HarnessMode::Test);

        let mut buffer = vec![0_u8; 256];
        let mut calls = 0;
        harness.repeat("fill", &mut buffer, |len, buf| {
            assert_eq!(len, 256);
            buf.fill(1);
            calls += 1;
        });
        assert_eq!(calls, 1);
        assert!(buffer.iter().all(|&byte| byte == 1));

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "fill");
        assert_eq!(reports[0].state, TesterState::Finished);
        assert_eq!(reports[0].result.completed, 1);
    }

    #[test]
    fn filtering_tests() {
        let (mut harness, reports) = harness(&["--exact", "fill"]);
        let mut buffer = [0_u8; 16];
        harness
            .repeat("fill", &mut buffer, |_, buf| buf.fill(2))
            .repeat("fill_more", &mut buffer, |_, _| unreachable!());

        let names: Vec<_> = reports
            .lock()
            .unwrap()
            .iter()
            .map(|report| report.name.clone())
            .collect();
        assert_eq!(names, ["fill"]);
    }

    #[test]
    fn listing_tests() {
        let (mut harness, reports) = harness(&["--list"]);
        assert_eq!(harness.mode(), HarnessMode::List);
        harness.repeat("fill", &mut [0; 4], |_, _| unreachable!());
        assert!(reports.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_workload_is_a_failure() {
        let (mut harness, reports) = harness(&[]);
        let params = TestParameters::new("panicking", 1);
        harness.repeat_with(params, |_| panic!("oops"));

        {
            let reports = reports.lock().unwrap();
            assert_eq!(reports[0].state, TesterState::Error);
            let error = reports[0].error.as_deref().unwrap();
            assert_eq!(error, "workload panicked: oops");
        }
        // Prevent the process from exiting on drop.
        harness.has_failures = false;
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*payload), "(unknown panic payload)");
    }
}
