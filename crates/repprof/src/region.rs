//! Scoped region profiling.

use std::{borrow::Cow, fmt, panic::Location};

use crate::{Clock, OsClock, Session};

/// Label of a profiled region: a name plus a line number disambiguating call sites with the same name.
///
/// Labels are displayed as `name:line`; this string is the key results are aggregated by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionLabel {
    name: Cow<'static, str>,
    line: u32,
}

impl fmt::Display for RegionLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.name, self.line)
    }
}

/// Uses the caller location as the disambiguator.
impl<S: Into<Cow<'static, str>>> From<S> for RegionLabel {
    #[track_caller]
    fn from(name: S) -> Self {
        Self::here(name)
    }
}

impl RegionLabel {
    /// Creates a label with an explicit line number.
    pub fn new(name: impl Into<Cow<'static, str>>, line: u32) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }

    /// Creates a label using the line of the caller.
    #[track_caller]
    pub fn here(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Location::caller().line())
    }

    /// Returns the region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the line number of the region.
    pub fn line(&self) -> u32 {
        self.line
    }
}

/// Guard measuring a profiled region. Returned by [`Session::region()`].
///
/// The measurement is recorded when the guard is dropped, including early returns and panics.
/// Guards must be dropped in the reverse order of their creation, which is automatically the case
/// for guards bound to local variables.
#[must_use = "the region is measured until the guard is dropped"]
#[derive(Debug)]
pub struct RegionGuard<'a, C: Clock = OsClock> {
    session: &'a Session<C>,
    start: u64,
}

impl<'a, C: Clock> RegionGuard<'a, C> {
    pub(crate) fn new(session: &'a Session<C>, label: &RegionLabel, bytes: u64) -> Self {
        session.open_region(label.to_string(), bytes);
        let start = session.clock().read_cycle_counter();
        Self { session, start }
    }
}

impl<C: Clock> Drop for RegionGuard<'_, C> {
    fn drop(&mut self) {
        let elapsed = self
            .session
            .clock()
            .read_cycle_counter()
            .saturating_sub(self.start);
        self.session.close_region(elapsed);
    }
}
