//! Should preferably run in the release mode to emulate real benchmark env.

use std::{collections::HashSet, fs, process::Command};

use regex::Regex;
use repprof::{reporter::ExportedResults, TesterState};
use repprof_e2e_tests::FAILING_TEST_VAR;

const EXE_PATH: &str = env!("CARGO_BIN_EXE_repprof-e2e-tests");

const EXPECTED_TEST_NAMES: &[&str] = &["fill", "copy", "fill_fresh", "checksum"];

fn command() -> Command {
    let mut command = Command::new(EXE_PATH);
    command
        .env_remove("REPPROF_WINDOW")
        .env_remove("REPPROF_JSON")
        .env_remove(FAILING_TEST_VAR)
        .env_remove("COLOR");
    command
}

fn reported_tests(stderr: &str) -> HashSet<&str> {
    stderr
        .lines()
        .filter_map(|line| line.strip_prefix("[√] ")?.split_whitespace().next())
        .collect()
}

#[test]
fn testing_workloads() {
    // Without `--bench` argument, each workload should be run once.
    let output = command().output().unwrap();
    assert!(output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(!stderr.contains('\u{1b}'), "{stderr}"); // no ANSI escape sequences since stderr is not a TTY

    for &name in EXPECTED_TEST_NAMES {
        let expected_line = format!("[√] {name} (1 repetition)");
        assert!(
            stderr.lines().any(|line| line == expected_line),
            "{stderr}"
        );
    }
    let min_rows = stderr.lines().filter(|line| line.starts_with("├ min: "));
    assert_eq!(min_rows.count(), EXPECTED_TEST_NAMES.len(), "{stderr}");

    assert!(stderr.contains("Total time: "), "{stderr}");
    let region_regex =
        Regex::new(r"^(?<name>\w+):\d+\[(?<hits>\d+)]: \d+ cycles \(\d+\.\d{2}%\)$").unwrap();
    let regions: Vec<_> = stderr
        .lines()
        .filter_map(|line| {
            let captures = region_regex.captures(line)?;
            Some((captures["name"].to_owned(), captures["hits"].to_owned()))
        })
        .collect();
    let regions: Vec<_> = regions
        .iter()
        .map(|(name, hits)| (name.as_str(), hits.as_str()))
        .collect();
    assert_eq!(
        regions,
        [("process", "3"), ("checksum", "3"), ("histogram", "6")],
        "{stderr}"
    );
    assert!(stderr.contains("└ inclusive: "), "{stderr}");
    assert!(stderr.contains("└ throughput: "), "{stderr}");
}

#[test]
fn listing_workloads() {
    let output = command().arg("--list").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let names: Vec<_> = stdout
        .lines()
        .filter_map(|line| line.strip_suffix(": repetition test"))
        .collect();
    assert_eq!(names, EXPECTED_TEST_NAMES);

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(reported_tests(&stderr).is_empty(), "{stderr}");
    assert!(!stderr.contains("Total time"), "{stderr}");
}

#[test]
fn testing_with_filter() {
    let output = command().arg("fill").output().unwrap();
    assert!(output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert_eq!(
        reported_tests(&stderr),
        HashSet::from(["fill", "fill_fresh"])
    );

    let output = command().args(["--exact", "fill"]).output().unwrap();
    assert!(output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert_eq!(reported_tests(&stderr), HashSet::from(["fill"]));
}

#[test]
fn invalid_filter() {
    let output = command().arg("(fill").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("ERROR: invalid filter"), "{stderr}");
}

#[test]
fn failing_workload() {
    let output = command()
        .args(["--exact", "mismatch"])
        .env(FAILING_TEST_VAR, "1")
        .output()
        .unwrap();
    assert!(!output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(
        stderr.contains("ERROR: mismatch: processed bytes mismatch: expected 1048576, got 524288"),
        "{stderr}"
    );
    assert!(
        stderr.contains("[x] mismatch (1 repetition): FAILED"),
        "{stderr}"
    );
    assert!(
        stderr.contains("ERROR: there were repetition test failures"),
        "{stderr}"
    );
}

#[test]
fn benchmarking_with_json_export() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let out_path = temp_dir.path().join("results.json");

    let output = command()
        .args(["--bench", "--window", "0.05", "--sample-ms", "20"])
        .env("REPPROF_JSON", &out_path)
        .output()
        .expect("failed running benches");
    assert!(output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    let tests = reported_tests(&stderr);
    assert_eq!(tests, EXPECTED_TEST_NAMES.iter().copied().collect());

    let json = fs::read_to_string(&out_path).unwrap();
    let results: ExportedResults = serde_json::from_str(&json).unwrap();
    let names: Vec<_> = results
        .repetitions
        .iter()
        .map(|report| report.name.as_str())
        .collect();
    assert_eq!(names, EXPECTED_TEST_NAMES);

    for report in &results.repetitions {
        assert_eq!(report.state, TesterState::Finished, "{report:?}");
        assert!(report.error.is_none());
        let result = &report.result;
        assert!(result.completed > 1, "{report:?}");
        assert_eq!(result.completed, result.started);
        assert_eq!(result.total_bytes, result.completed * (1 << 20));
        assert!(result.min_cycles <= result.max_cycles, "{report:?}");
        assert!(result.min_cycles * result.completed <= result.total_cycles);
    }

    let profile = results.profile.expect("no profile");
    assert!(profile.cpu_frequency > 0);
    let labels: Vec<_> = profile
        .regions
        .iter()
        .map(|region| region.label.split(':').next().unwrap())
        .collect();
    assert_eq!(labels, ["process", "checksum", "histogram"]);
    let process = &profile.regions[0].result;
    assert!(process.has_children());
    let exclusive_sum: u64 = profile
        .regions
        .iter()
        .map(|region| region.result.exclusive())
        .sum();
    assert_eq!(exclusive_sum, profile.total_sampled);
}
