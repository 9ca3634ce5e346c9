//! Sequential reporter implementation.

use std::{fmt, mem};

use super::{ProfileReport, RepetitionReport, Reporter};
use crate::TestParameters;

/// Reporter forwarding all events to the contained reporters in the order they were added.
#[derive(Debug, Default)]
pub struct SeqReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl SeqReporter {
    /// Adds a reporter.
    pub fn push(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Returns the number of contained reporters.
    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    /// Checks whether this reporter contains no reporters.
    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Finalizes all contained reporters and removes them.
    pub fn ok_all(&mut self) {
        for reporter in mem::take(&mut self.reporters) {
            reporter.ok();
        }
    }
}

impl Reporter for SeqReporter {
    fn debug(&mut self, info: &dyn fmt::Display) {
        for reporter in &mut self.reporters {
            reporter.debug(info);
        }
    }

    fn warning(&mut self, warning: &dyn fmt::Display) {
        for reporter in &mut self.reporters {
            reporter.warning(warning);
        }
    }

    fn error(&mut self, error: &dyn fmt::Display) {
        for reporter in &mut self.reporters {
            reporter.error(error);
        }
    }

    fn start_repetitions(&mut self, params: &TestParameters) {
        for reporter in &mut self.reporters {
            reporter.start_repetitions(params);
        }
    }

    fn report_profile(&mut self, report: &ProfileReport) {
        for reporter in &mut self.reporters {
            reporter.report_profile(report);
        }
    }

    fn report_repetitions(&mut self, report: &RepetitionReport) {
        for reporter in &mut self.reporters {
            reporter.report_repetitions(report);
        }
    }

    fn ok(mut self: Box<Self>) {
        self.ok_all();
    }
}
