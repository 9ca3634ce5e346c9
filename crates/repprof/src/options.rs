use std::{
    io::{self, IsTerminal},
    path::PathBuf,
    time::{Duration, TryFromFloatSecsError},
};

use clap::{ColorChoice, Parser};
use regex::Regex;

use crate::{harness::HarnessMode, reporter::Verbosity};

#[derive(Debug, thiserror::Error)]
pub(crate) enum OptionsError {
    #[error("invalid convergence window (must be a non-negative number of seconds): {0}")]
    Window(#[source] TryFromFloatSecsError),
    #[error("invalid filter: {0}")]
    Filter(#[source] regex::Error),
}

fn parse_window(s: &str) -> Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
    let secs: f64 = s.parse()?;
    Ok(Duration::try_from_secs_f64(secs).map_err(OptionsError::Window)?)
}

#[allow(clippy::struct_excessive_bools)] // fine for command-line args
#[derive(Debug, Clone, Parser)]
pub(crate) struct HarnessOptions {
    /// Whether to run repetition tests to convergence as opposed to running each workload once.
    #[arg(long, hide = true)]
    bench: bool,

    /// Default convergence window: testing stops once no new minimum was found for this long.
    #[arg(
        long,
        value_name = "SECS",
        env = "REPPROF_WINDOW",
        default_value = "2",
        value_parser = parse_window
    )]
    pub window: Duration,
    /// Duration of the CPU frequency calibration.
    #[arg(
        long = "sample-ms",
        value_name = "MS",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sample_millis: u64,

    /// Sets coloring of the program output.
    #[arg(long, env = "COLOR", default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,
    /// Output detailed information, e.g. the calibrated CPU frequency.
    #[arg(long)]
    pub verbose: bool,
    /// Output only outcomes of repetition tests.
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    /// Exports profiles and repetition test results to the specified JSON file. Requires the `serde` crate feature.
    #[arg(long, value_name = "PATH", env = "REPPROF_JSON")]
    pub json: Option<PathBuf>,

    /// List all repetition tests instead of running them.
    #[arg(long)]
    list: bool,
    /// Match test names exactly.
    #[arg(long)]
    exact: bool,
    /// Skip tests whose names do not match FILTER (a regular expression).
    #[arg(name = "FILTER")]
    filter: Option<String>,
}

impl HarnessOptions {
    pub fn mode(&self) -> HarnessMode {
        if self.list {
            HarnessMode::List
        } else if self.bench {
            HarnessMode::Bench
        } else {
            HarnessMode::Test
        }
    }

    pub fn styling(&self) -> bool {
        match self.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stderr().is_terminal(),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_millis)
    }

    pub fn id_matcher(&self) -> Result<IdMatcher, OptionsError> {
        Ok(match &self.filter {
            None => IdMatcher::Any,
            Some(str) if self.exact => IdMatcher::Exact(str.clone()),
            Some(re) => IdMatcher::Regex(Regex::new(re).map_err(OptionsError::Filter)?),
        })
    }
}

#[derive(Debug)]
pub(crate) enum IdMatcher {
    Any,
    Exact(String),
    Regex(Regex),
}

impl IdMatcher {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(s) => s == name,
            Self::Regex(regex) => regex.is_match(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(args: &[&str]) -> Result<HarnessOptions, clap::Error> {
        HarnessOptions::try_parse_from(["bench"].iter().chain(args))
    }

    #[test]
    fn parsing_default_options() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.mode(), HarnessMode::Test);
        assert_eq!(options.window, Duration::from_secs(2));
        assert_eq!(options.sample_window(), Duration::from_millis(100));
        assert_eq!(options.verbosity(), Verbosity::Normal);
        assert_matches!(options.id_matcher(), Ok(IdMatcher::Any));
    }

    #[test]
    fn parsing_bench_options() {
        let args = ["--bench", "--window", "0.25", "--sample-ms", "20", "-q"];
        let options = parse(&args).unwrap();
        assert_eq!(options.mode(), HarnessMode::Bench);
        assert_eq!(options.window, Duration::from_millis(250));
        assert_eq!(options.sample_window(), Duration::from_millis(20));
        assert_eq!(options.verbosity(), Verbosity::Quiet);

        let options = parse(&["--list", "--bench"]).unwrap();
        assert_eq!(options.mode(), HarnessMode::List);
    }

    #[test]
    fn invalid_options() {
        assert!(parse(&["--window", "-1"]).is_err());
        assert!(parse(&["--window", "soon"]).is_err());
        assert!(parse(&["--sample-ms", "0"]).is_err());
        assert!(parse(&["--verbose", "--quiet"]).is_err());
    }

    #[test]
    fn matching_ids() {
        let options = parse(&["copy"]).unwrap();
        let matcher = options.id_matcher().unwrap();
        assert!(matcher.matches("copy"));
        assert!(matcher.matches("copy_fresh"));
        assert!(!matcher.matches("checksum"));

        let options = parse(&["--exact", "copy"]).unwrap();
        let matcher = options.id_matcher().unwrap();
        assert!(matcher.matches("copy"));
        assert!(!matcher.matches("copy_fresh"));

        let options = parse(&["(copy"]).unwrap();
        assert_matches!(options.id_matcher(), Err(OptionsError::Filter(_)));
    }
}
