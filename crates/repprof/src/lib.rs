//! `repprof` is a cycle-accurate scoped profiler and **rep**etition tester for micro-benchmarks.
//! It reads the CPU timestamp counter directly, calibrates it against the OS wall clock, and attributes
//! elapsed cycles to nested, labeled code regions.
//!
//! # Features
//!
//! - Scoped region profiling with exclusive (own code only) and inclusive (including nested regions)
//!   times, hit counts and throughput of processed bytes.
//! - Repetition testing: a workload is run repeatedly until no faster repetition is found within
//!   a configurable convergence window; minimum, maximum and average times are reported together
//!   with bandwidth and page-fault density.
//! - Pluggable [`Clock`]s, including a [`ManualClock`] allowing to test timing logic deterministically.
//! - Bench executables configurable via command-line args, with optional JSON export of results.
//!
//! # How to use
//!
//! Define a benchmark binary and include it into your crate manifest:
//!
//! ```toml
//! [[bench]]
//! name = "your_bench"
//! harness = false
//! ```
//!
//! In the bench source (`benches/your_bench.rs`), define a function with signature `fn(&mut` [`Harness`]`)`
//! and wrap it in the [`main!`] macro:
//!
//! ```
//! use repprof::Harness;
//!
//! fn benchmarks(harness: &mut Harness) {
//!     // define your repetition tests here
//! }
//!
//! repprof::main!(benchmarks);
//! ```
//!
//! Run benchmarks as usual using `cargo bench`. `cargo test --bench ...` runs each workload only once,
//! checking that it works.
//!
//! ## Configuration options
//!
//! Run `cargo bench ... -- --help` to get help on the supported configuration options. Some of the
//! common options are:
//!
//! - `--list`: lists repetition tests without running them.
//! - `--window SECS`: convergence window for repetition tests (2 seconds by default).
//! - `--json PATH`: exports results to a JSON file. Requires the `serde` crate feature.
//!
//! # Limitations
//!
//! - Measurements are single-threaded. A [`Session`] is neither `Send` nor `Sync`; use a separate session
//!   per thread if necessary.
//! - The timestamp counter is only read directly on `x86_64` and `aarch64`. On other targets, cycles
//!   are emulated with the OS monotonic clock.
//! - Page faults are only tracked on Linux and Windows.
//!
//! # Crate features
//!
//! ## `serde`
//!
//! *(Off by default)*
//!
//! Derives `serde::{Serialize, Deserialize}` for profiling and repetition testing outputs, and enables
//! [`JsonExporter`](crate::reporter::JsonExporter).
//!
//! # Examples
//!
//! ## Repetition testing
//!
//! ```
//! use repprof::{black_box, region, Harness, TestParameters};
//!
//! fn benchmarks(harness: &mut Harness) {
//!     let mut buffer = vec![0_u8; 1 << 16];
//!     // Simple workloads processing a buffer.
//!     harness.repeat("fill", &mut buffer, |_, buf| buf.fill(1));
//!     // Workloads can allocate a fresh buffer before each repetition; this is not measured.
//!     let params = TestParameters::new("fill_fresh", 1 << 16);
//!     harness.repeat_with(params, |tester| {
//!         tester.run_with_setup(|| vec![0_u8; 1 << 16], |_, buf| buf.fill(1));
//!     });
//!     // Profiled regions are reported when the harness is dropped.
//!     let session = harness.session();
//!     let _guard = region!(session, "checksum", buffer.len() as u64);
//!     black_box(buffer.iter().map(|&byte| u64::from(byte)).sum::<u64>());
//! }
//!
//! repprof::main!(benchmarks);
//! ```
//!
//! ## Driving the tester manually
//!
//! ```
//! use repprof::{Session, TestParameters, TesterState};
//! use std::time::Duration;
//!
//! let session = Session::new();
//! let mut buffer = vec![0_u8; 4_096];
//! let params = TestParameters::new("fill", 4_096).with_window(Duration::from_millis(10));
//! let mut tester = session.repetition_tester(params);
//! while tester.is_testing() {
//!     tester.begin_test();
//!     buffer.fill(1);
//!     tester.end_test(buffer.len() as u64);
//! }
//! tester.report();
//! assert_eq!(tester.state(), TesterState::Finished);
//! ```

// Documentation settings.
#![doc(html_root_url = "https://docs.rs/repprof/0.1.0")]
// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use std::hint::black_box;

pub use crate::{
    harness::{Harness, HarnessMode},
    page_faults::current_process_page_faults,
    region::{RegionGuard, RegionLabel},
    session::Session,
    store::{ProfileResult, ResultsStore},
    tester::{RepetitionTester, TestParameters, TestResult, TesterError, TesterState},
    timer::{
        calibrate_cpu_frequency, cycles_to_seconds, Clock, ManualClock, OsClock,
        DEFAULT_SAMPLE_WINDOW,
    },
};

mod harness;
mod macros;
mod options;
mod page_faults;
mod region;
pub mod reporter;
mod session;
mod store;
mod tester;
mod timer;

#[doc(hidden)] // used by macros
pub mod __private {
    pub use crate::macros::function_name;
}

/// Wraps a provided function to create the entrypoint for a benchmark executable. The function
/// must have `fn(&mut` [`Harness`]`)` signature.
///
/// # Examples
///
/// See [crate docs](index.html) for the examples of usage.
#[macro_export]
macro_rules! main {
    ($function:path) => {
        fn main() {
            $function(&mut $crate::Harness::default());
        }
    };
}

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
