//! Wall-clock and cycle-counter sources, and CPU frequency calibration.

use std::{cell::Cell, fmt, time::Duration, time::Instant};

use crate::page_faults;

/// Default duration of the calibration window used to estimate the CPU frequency.
pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Source of time and memory-pressure readings used by the profiler and the repetition tester.
///
/// Implementations must be monotonic: neither the wall clock nor the cycle counter may go backwards,
/// and the page-fault count must never decrease. The cycle counter is not required to be synchronized
/// with the wall clock; [`calibrate_cpu_frequency()`] establishes the relation between the two.
pub trait Clock: fmt::Debug {
    /// Returns the number of wall-clock ticks per second.
    fn wall_clock_frequency(&self) -> u64;

    /// Reads the current wall-clock tick count.
    fn read_wall_clock(&self) -> u64;

    /// Reads the current value of the hardware cycle counter.
    fn read_cycle_counter(&self) -> u64;

    /// Returns the cumulative number of page faults incurred by the current process.
    ///
    /// The default implementation returns 0, i.e., page faults are not tracked.
    fn page_faults(&self) -> u64 {
        0
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn wall_clock_frequency(&self) -> u64 {
        (**self).wall_clock_frequency()
    }

    fn read_wall_clock(&self) -> u64 {
        (**self).read_wall_clock()
    }

    fn read_cycle_counter(&self) -> u64 {
        (**self).read_cycle_counter()
    }

    fn page_faults(&self) -> u64 {
        (**self).page_faults()
    }
}

/// Clock backed by the OS and the CPU.
///
/// - The wall clock is [`Instant`] with nanosecond ticks, anchored at clock creation.
/// - The cycle counter is `rdtsc` on `x86_64`, `cntvct_el0` on `aarch64`, and wall-clock nanoseconds
///   on other targets.
/// - Page faults are read via [`current_process_page_faults()`](crate::current_process_page_faults).
#[derive(Debug, Clone, Copy)]
pub struct OsClock {
    anchor: Instant,
}

impl Default for OsClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OsClock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Clock for OsClock {
    fn wall_clock_frequency(&self) -> u64 {
        1_000_000_000
    }

    #[allow(clippy::cast_possible_truncation)] // ~584 years of uptime are required to overflow
    fn read_wall_clock(&self) -> u64 {
        self.anchor.elapsed().as_nanos() as u64
    }

    #[inline]
    fn read_cycle_counter(&self) -> u64 {
        read_cycle_counter()
    }

    fn page_faults(&self) -> u64 {
        page_faults::current_process_page_faults()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(unused_unsafe)] // intrinsics are safe to call in newer Rust versions
fn read_cycle_counter() -> u64 {
    use std::arch::x86_64::{_mm_lfence, _rdtsc};

    // SAFETY: `lfence` and `rdtsc` are available on all `x86_64` CPUs.
    unsafe {
        _mm_lfence();
        let cycles = _rdtsc();
        _mm_lfence();
        cycles
    }
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn read_cycle_counter() -> u64 {
    let cycles: u64;
    // SAFETY: `cntvct_el0` is readable from user space.
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {}, cntvct_el0",
            out(reg) cycles,
            options(nostack, nomem),
        );
    }
    cycles
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn read_cycle_counter() -> u64 {
    use std::sync::OnceLock;

    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    #[allow(clippy::cast_possible_truncation)]
    let nanos = ANCHOR.get_or_init(Instant::now).elapsed().as_nanos() as u64;
    nanos
}

/// Deterministic clock advanced by the caller. Useful for testing and for simulating workloads.
///
/// The wall clock may be configured to tick on every read (see [`Self::with_wall_clock_step()`]),
/// which is required for [`calibrate_cpu_frequency()`] to terminate. Advancing the wall clock also
/// advances the cycle counter by [`Self::with_cycles_per_tick()`] cycles per tick.
#[derive(Debug, Default)]
pub struct ManualClock {
    wall_frequency: u64,
    wall_step: u64,
    cycles_per_tick: u64,
    wall: Cell<u64>,
    cycles: Cell<u64>,
    page_faults: Cell<u64>,
}

impl ManualClock {
    /// Creates a clock with the specified wall-clock frequency. All counters start at 0.
    pub fn new(wall_frequency: u64) -> Self {
        Self {
            wall_frequency,
            ..Self::default()
        }
    }

    /// Makes the wall clock advance by `step` ticks after each read.
    #[must_use]
    pub fn with_wall_clock_step(mut self, step: u64) -> Self {
        self.wall_step = step;
        self
    }

    /// Sets the number of cycles the cycle counter advances per wall-clock tick.
    #[must_use]
    pub fn with_cycles_per_tick(mut self, cycles: u64) -> Self {
        self.cycles_per_tick = cycles;
        self
    }

    /// Advances the cycle counter without touching the wall clock.
    pub fn advance_cycles(&self, cycles: u64) {
        self.cycles.set(self.cycles.get() + cycles);
    }

    /// Advances the wall clock (and the cycle counter proportionally).
    pub fn advance_wall_clock(&self, ticks: u64) {
        self.wall.set(self.wall.get() + ticks);
        self.advance_cycles(ticks * self.cycles_per_tick);
    }

    /// Increases the page-fault count.
    pub fn add_page_faults(&self, count: u64) {
        self.page_faults.set(self.page_faults.get() + count);
    }
}

impl Clock for ManualClock {
    fn wall_clock_frequency(&self) -> u64 {
        self.wall_frequency
    }

    fn read_wall_clock(&self) -> u64 {
        let value = self.wall.get();
        self.advance_wall_clock(self.wall_step);
        value
    }

    fn read_cycle_counter(&self) -> u64 {
        self.cycles.get()
    }

    fn page_faults(&self) -> u64 {
        self.page_faults.get()
    }
}

/// Estimates the cycle counter frequency (cycles per second) by busy-waiting for `sample_window`
/// of wall-clock time and comparing the elapsed cycles with the elapsed wall-clock ticks.
///
/// Returns 0 if no wall-clock time has elapsed, e.g. if the clock reports zero frequency.
/// Callers must not divide by the returned value without checking it.
pub fn calibrate_cpu_frequency<C: Clock + ?Sized>(clock: &C, sample_window: Duration) -> u64 {
    let wall_frequency = clock.wall_clock_frequency();
    let wait_ticks = u128::from(wall_frequency) * sample_window.as_nanos() / NANOS_PER_SEC;

    // Cycle reads are bracketed by the wall-clock reads.
    let wall_start = clock.read_wall_clock();
    let cycles_start = clock.read_cycle_counter();
    let mut wall_elapsed = 0_u64;
    while u128::from(wall_elapsed) < wait_ticks {
        wall_elapsed = clock.read_wall_clock().saturating_sub(wall_start);
    }
    let cycles_elapsed = clock.read_cycle_counter().saturating_sub(cycles_start);

    if wall_elapsed == 0 {
        return 0;
    }
    let frequency =
        u128::from(wall_frequency) * u128::from(cycles_elapsed) / u128::from(wall_elapsed);
    u64::try_from(frequency).unwrap_or(u64::MAX)
}

/// Converts a cycle count to seconds. Returns `None` if the frequency is unknown (0).
#[allow(clippy::cast_precision_loss)] // fine for reporting
pub fn cycles_to_seconds(cycles: u64, cpu_frequency: u64) -> Option<f64> {
    if cpu_frequency == 0 {
        None
    } else {
        Some(cycles as f64 / cpu_frequency as f64)
    }
}

/// Converts a duration to the number of cycles at the specified frequency.
pub(crate) fn duration_to_cycles(duration: Duration, cpu_frequency: u64) -> u128 {
    u128::from(cpu_frequency) * duration.as_nanos() / NANOS_PER_SEC
}
