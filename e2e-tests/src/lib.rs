use std::env;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use repprof::{black_box, region, Harness, HarnessMode, Session};

/// If set, adds a repetition test that processes fewer bytes than expected.
pub const FAILING_TEST_VAR: &str = "REPPROF_E2E_FAIL";

const RNG_SEED: u64 = 123;
const BUFFER_LEN: usize = 1 << 20;

fn checksum(data: &[u8]) -> u64 {
    data.iter().fold(0_u64, |acc, &byte| {
        acc.wrapping_mul(31).wrapping_add(u64::from(byte))
    })
}

fn histogram(session: &Session, data: &[u8]) -> [u32; 256] {
    let _guard = region!(session, "histogram", data.len() as u64);
    let mut counts = [0_u32; 256];
    for &byte in data {
        counts[usize::from(byte)] += 1;
    }
    counts
}

fn process(session: &Session, data: &[u8]) -> u64 {
    let _guard = region!(session);
    let sum = {
        let _guard = region!(session, "checksum", data.len() as u64);
        checksum(black_box(data))
    };
    let counts = histogram(session, data);
    let half_counts = histogram(session, black_box(&data[..data.len() / 2]));
    let diff: u64 = counts
        .iter()
        .zip(half_counts)
        .map(|(&full, half)| u64::from(full - half))
        .sum();
    sum ^ diff
}

pub fn benchmarks(harness: &mut Harness) {
    let mut rng = SmallRng::seed_from_u64(RNG_SEED);
    let mut random_bytes = vec![0_u8; BUFFER_LEN];
    rng.fill(&mut random_bytes[..]);

    let mut buffer = vec![0_u8; BUFFER_LEN];
    harness
        .repeat("fill", &mut buffer, |_, buf| buf.fill(0xff))
        .repeat("copy", &mut buffer, |_, buf| {
            buf.copy_from_slice(&random_bytes);
        });

    // Allocating a fresh buffer on each repetition incurs page faults.
    let params = harness.parameters("fill_fresh", BUFFER_LEN as u64);
    harness.repeat_with(params, |tester| {
        tester.run_with_setup(|| vec![0_u8; BUFFER_LEN], |_, buf| buf.fill(0xff));
    });

    let params = harness.parameters("checksum", BUFFER_LEN as u64);
    harness.repeat_with(params, |tester| {
        while tester.is_testing() {
            tester.begin_test();
            black_box(checksum(black_box(&random_bytes)));
            tester.end_test(BUFFER_LEN as u64);
        }
    });

    if env::var_os(FAILING_TEST_VAR).is_some() {
        let params = harness.parameters("mismatch", BUFFER_LEN as u64);
        harness.repeat_with(params, |tester| {
            while tester.is_testing() {
                tester.begin_test();
                buffer[..BUFFER_LEN / 2].fill(0);
                tester.end_test((BUFFER_LEN / 2) as u64);
            }
        });
    }

    if harness.mode() != HarnessMode::List {
        let session = harness.session();
        for _ in 0..3 {
            black_box(process(session, &random_bytes));
        }
    }
}

pub fn main() {
    benchmarks(&mut Harness::default());
}
