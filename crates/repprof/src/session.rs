//! [`Session`]: explicit context shared by profiled regions and repetition testers.

use std::{
    cell::{OnceCell, Ref, RefCell, RefMut},
    fmt, mem, thread,
    time::Duration,
};

use crate::{
    reporter::{PrintingReporter, Reporter, SeqReporter, Verbosity},
    store::{ProfileReport, ResultsStore},
    timer::{calibrate_cpu_frequency, DEFAULT_SAMPLE_WINDOW},
    Clock, OsClock, RegionGuard, RegionLabel, RepetitionTester, TestParameters,
};

/// Measurement context owning the clock, the calibrated CPU frequency, profiling results and reporters.
///
/// A session is intended to be used from a single thread; it is neither `Send` nor `Sync`.
/// Any number of sessions may exist in a process, each with its own results.
///
/// # Examples
///
/// ```
/// use repprof::{ManualClock, RegionLabel, Session};
///
/// let session = Session::bare(ManualClock::new(1_000)).with_cpu_frequency(1_000);
/// {
///     let _outer = session.region(RegionLabel::new("outer", 1), 0);
///     session.clock().advance_cycles(10);
///     let _inner = session.region(RegionLabel::new("inner", 2), 0);
///     session.clock().advance_cycles(30);
/// }
/// let store = session.store();
/// assert_eq!(store.get("outer:1").unwrap().exclusive(), 10);
/// assert_eq!(store.get("inner:2").unwrap().exclusive(), 30);
/// ```
pub struct Session<C: Clock = OsClock> {
    clock: C,
    sample_window: Duration,
    cpu_frequency: OnceCell<u64>,
    store: RefCell<ResultsStore>,
    pending_regions: RefCell<Vec<RegionEvent>>,
    reporter: RefCell<SeqReporter>,
}

/// Region boundary waiting to be applied to the results store.
#[derive(Debug)]
enum RegionEvent {
    Open { label: String, bytes: u64 },
    Close { elapsed: u64 },
}

impl RegionEvent {
    fn apply(self, store: &mut ResultsStore) {
        match self {
            Self::Open { label, bytes } => store.open(&label, bytes),
            Self::Close { elapsed } => store.close(elapsed),
        }
    }
}

impl<C: Clock> fmt::Debug for Session<C> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("clock", &self.clock)
            .field("sample_window", &self.sample_window)
            .field("cpu_frequency", &self.cpu_frequency.get())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Creates a session with the [`OsClock`] printing reports to stderr.
impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates a session with the [`OsClock`] printing reports to stderr.
    pub fn new() -> Self {
        Self::with_clock(OsClock::new())
    }
}

/// Finalizes reporters.
impl<C: Clock> Drop for Session<C> {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.finish_reporters();
        }
    }
}

impl<C: Clock> Session<C> {
    /// Creates a session with the specified clock printing reports to stderr.
    pub fn with_clock(clock: C) -> Self {
        let mut this = Self::bare(clock);
        this.add_reporter(PrintingReporter::stderr(Verbosity::Normal));
        this
    }

    /// Creates a session with the specified clock and no reporters.
    pub fn bare(clock: C) -> Self {
        Self {
            clock,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            cpu_frequency: OnceCell::new(),
            store: RefCell::default(),
            pending_regions: RefCell::default(),
            reporter: RefCell::default(),
        }
    }

    /// Pins the CPU frequency instead of calibrating it.
    #[must_use]
    pub fn with_cpu_frequency(mut self, cpu_frequency: u64) -> Self {
        self.cpu_frequency = OnceCell::from(cpu_frequency);
        self
    }

    /// Sets the wall-clock duration of the CPU frequency calibration. Has no effect after the frequency
    /// has been calibrated or pinned.
    #[must_use]
    pub fn with_sample_window(mut self, sample_window: Duration) -> Self {
        self.sample_window = sample_window;
        self
    }

    /// Adds a reporter to the session.
    pub fn add_reporter(&mut self, reporter: impl Reporter + 'static) -> &mut Self {
        self.reporter.get_mut().push(Box::new(reporter));
        self
    }

    /// Returns the clock used by this session.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the CPU frequency in Hz, calibrating it on the first call. Calibration busy-waits
    /// for the configured sample window (100 ms by default).
    ///
    /// Returns 0 if calibration has failed; derived timings are not reported in this case.
    pub fn cpu_frequency(&self) -> u64 {
        *self.cpu_frequency.get_or_init(|| {
            let frequency = calibrate_cpu_frequency(&self.clock, self.sample_window);
            let mut reporter = self.reporter();
            if frequency == 0 {
                reporter.warning(&"failed calibrating CPU frequency; timings will be reported in cycles only");
            } else {
                reporter.debug(&format_args!(
                    "calibrated CPU frequency: {frequency} Hz (sampled for {:?})",
                    self.sample_window
                ));
            }
            frequency
        })
    }

    /// Returns profiling results collected so far.
    ///
    /// Regions may start and end while the returned reference is alive. Such regions are recorded
    /// once the reference is dropped, and are visible to the next call.
    pub fn store(&self) -> Ref<'_, ResultsStore> {
        if let Ok(mut store) = self.store.try_borrow_mut() {
            self.flush_regions(&mut store);
        }
        self.store.borrow()
    }

    pub(crate) fn open_region(&self, label: String, bytes: u64) {
        self.push_region_event(RegionEvent::Open { label, bytes });
    }

    pub(crate) fn close_region(&self, elapsed: u64) {
        self.push_region_event(RegionEvent::Close { elapsed });
    }

    fn push_region_event(&self, event: RegionEvent) {
        self.pending_regions.borrow_mut().push(event);
        if let Ok(mut store) = self.store.try_borrow_mut() {
            self.flush_regions(&mut store);
        }
    }

    fn flush_regions(&self, store: &mut ResultsStore) {
        for event in self.pending_regions.borrow_mut().drain(..) {
            event.apply(store);
        }
    }

    pub(crate) fn reporter(&self) -> RefMut<'_, SeqReporter> {
        self.reporter.borrow_mut()
    }

    /// Starts measuring a profiled region. The region ends when the returned guard is dropped.
    ///
    /// `bytes` are added to the bytes processed by the region and are used to report its throughput.
    #[track_caller]
    pub fn region(&self, label: impl Into<RegionLabel>, bytes: u64) -> RegionGuard<'_, C> {
        RegionGuard::new(self, &label.into(), bytes)
    }

    /// Measures `action` as a profiled region. The output is wrapped in a [`black_box`](crate::black_box).
    #[track_caller]
    pub fn measure<T>(
        &self,
        label: impl Into<RegionLabel>,
        bytes: u64,
        action: impl FnOnce() -> T,
    ) -> T {
        let _guard = self.region(label, bytes);
        crate::black_box(action())
    }

    /// Creates a repetition tester with the specified parameters.
    pub fn repetition_tester(&self, params: TestParameters) -> RepetitionTester<'_, C> {
        RepetitionTester::new(self, params)
    }

    /// Snapshots the profiling results. Calibrates the CPU frequency if necessary.
    pub fn profile_report(&self) -> ProfileReport {
        let cpu_frequency = self.cpu_frequency();
        self.store().snapshot(cpu_frequency)
    }

    /// Reports profiling results to all reporters. Results are not modified, so this method may be called
    /// repeatedly.
    pub fn report_profile(&self) {
        let report = self.profile_report();
        self.reporter().report_profile(&report);
    }

    /// Finalizes all reporters. Reporters added afterwards will be finalized on drop.
    pub(crate) fn finish_reporters(&mut self) {
        mem::take(self.reporter.get_mut()).ok_all();
    }
}
