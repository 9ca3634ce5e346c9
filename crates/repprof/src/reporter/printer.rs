//! Reporter implementation printing output to `stderr` in human-readable form.

use std::{
    fmt,
    io::{self, IsTerminal},
    ops,
};

use anes::{
    Attribute, Color, ResetAttributes, SetAttribute, SetBackgroundColor, SetForegroundColor,
};

use super::{ProfileReport, RepetitionReport, RepetitionRow, Reporter};
use crate::{store::RegionReport, TestParameters, TesterState};

#[derive(Debug, Clone, Copy)]
enum Checkmark {
    InProgress,
    Pass,
    Fail,
}

impl From<TesterState> for Checkmark {
    fn from(state: TesterState) -> Self {
        match state {
            TesterState::Executing => Self::InProgress,
            TesterState::Finished => Self::Pass,
            TesterState::Error => Self::Fail,
        }
    }
}

#[derive(Debug)]
struct Styled<'a, W: io::Write>(&'a mut LinePrinter<W>);

impl<W: io::Write> ops::Deref for Styled<'_, W> {
    type Target = LinePrinter<W>;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl<W: io::Write> ops::DerefMut for Styled<'_, W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl<W: io::Write> Drop for Styled<'_, W> {
    fn drop(&mut self) {
        if self.0.style_nesting > 0 {
            self.0.style_nesting -= 1;
            if self.0.style_nesting == 0 {
                self.0.print(format_args!("{ResetAttributes}"));
            }
        }
    }
}

#[derive(Debug)]
struct LinePrinter<W> {
    inner: W,
    styling: bool,
    style_nesting: usize,
}

impl<W: io::Write> LinePrinter<W> {
    fn borrow(&mut self) -> Styled<'_, W> {
        if self.styling {
            self.style_nesting += 1;
        }
        Styled(self)
    }

    // There's nowhere to report a failure to write to the terminal, so I/O errors are ignored.
    fn print(&mut self, args: fmt::Arguments<'_>) {
        self.inner.write_fmt(args).ok();
    }

    fn print_str(&mut self, s: &str) {
        self.inner.write_all(s.as_bytes()).ok();
    }

    fn fg(&mut self, color: Color) -> Styled<'_, W> {
        if self.styling {
            self.print(format_args!("{}", SetForegroundColor(color)));
        }
        self.borrow()
    }

    fn bg(&mut self, color: Color) -> Styled<'_, W> {
        if self.styling {
            self.print(format_args!("{}", SetBackgroundColor(color)));
        }
        self.borrow()
    }

    fn bold(&mut self) -> Styled<'_, W> {
        if self.styling {
            self.print(format_args!("{}", SetAttribute(Attribute::Bold)));
        }
        self.borrow()
    }

    fn dimmed(&mut self) -> Styled<'_, W> {
        if self.styling {
            self.print(format_args!("{}", SetAttribute(Attribute::Faint)));
        }
        self.borrow()
    }

    fn print_checkbox(&mut self, mark: Checkmark) {
        self.print_str("[");
        match mark {
            Checkmark::InProgress => self.fg(Color::Cyan).print_str("*"),
            Checkmark::Pass => self.bold().fg(Color::Green).print_str("√"),
            Checkmark::Fail => self.bold().fg(Color::Red).print_str("x"),
        }
        self.print_str("] ");
    }

    fn print_debug(&mut self, args: fmt::Arguments<'_>) {
        self.bold()
            .bg(Color::DarkMagenta)
            .fg(Color::White)
            .print_str("DEBUG:");
        self.print(format_args!(" {args}\n"));
    }

    fn print_warning(&mut self, args: fmt::Arguments<'_>) {
        self.bold()
            .bg(Color::Yellow)
            .fg(Color::White)
            .print_str(" WARN:");
        self.print(format_args!(" {args}\n"));
    }

    fn print_error(&mut self, args: fmt::Arguments<'_>) {
        self.bold()
            .bg(Color::Red)
            .fg(Color::White)
            .print_str("ERROR:");
        self.print(format_args!(" {args}\n"));
    }

    fn print_branch(&mut self, last: bool) {
        self.print_str(if last { "└ " } else { "├ " });
    }

    fn print_region(&mut self, report: &ProfileReport, region: &RegionReport) {
        let RegionReport { label, result } = region;
        self.bold().print_str(label);
        let exclusive = result.exclusive();
        let percent = report.percent_of_total(exclusive);
        self.print(format_args!(
            "[{hits}]: {exclusive} cycles ({percent:.2}%)\n",
            hits = result.hit_count
        ));

        let throughput = report.throughput(result);
        if result.has_children() {
            self.print_branch(throughput.is_none());
            let inclusive = result.root_elapsed;
            let percent = report.percent_of_total(inclusive);
            self.print(format_args!(
                "inclusive: {inclusive} cycles ({percent:.2}%)\n"
            ));
        }
        if let Some(throughput) = throughput {
            self.print_branch(true);
            self.print(format_args!(
                "throughput: {:.3} MiB at {:.3} GiB/s\n",
                throughput.megabytes, throughput.gigabytes_per_second
            ));
        }
    }

    fn print_repetition_row(&mut self, row: &RepetitionRow, last: bool, verbose: bool) {
        self.print_branch(last);
        self.print(format_args!("{}: ", row.label));
        if let Some(seconds) = row.seconds {
            self.print(format_args!("{seconds:.6}s"));
            if verbose {
                self.dimmed()
                    .print(format_args!(" ({:.0} cycles)", row.cycles));
            }
        } else {
            self.print(format_args!("{:.0} cycles", row.cycles));
        }

        if let Some(bandwidth) = row.gigabytes_per_second {
            self.print(format_args!(" {bandwidth:.3} GiB/s"));
        }
        if row.page_faults > 0.0 {
            self.print(format_args!(" PF: {:.1}", row.page_faults));
            if let Some(kilobytes) = row.kilobytes_per_fault {
                self.print(format_args!(" ({kilobytes:.2} KiB/fault)"));
            }
        }
        self.print_str("\n");
    }
}

/// Verbosity of a [`PrintingReporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Only outcomes of repetition tests, warnings and errors are printed.
    Quiet,
    /// Default verbosity.
    Normal,
    /// Debug information is printed in addition to everything else.
    Verbose,
}

/// Reporter printing human-readable output, by default to `stderr`.
#[derive(Debug)]
pub struct PrintingReporter<W = io::Stderr> {
    verbosity: Verbosity,
    printer: LinePrinter<W>,
}

impl PrintingReporter {
    /// Creates a reporter printing to `stderr`. Styling is enabled if `stderr` is a terminal.
    pub fn stderr(verbosity: Verbosity) -> Self {
        Self::new(io::stderr().is_terminal(), verbosity)
    }

    /// Creates a reporter printing to `stderr` with the specified styling.
    pub fn new(styling: bool, verbosity: Verbosity) -> Self {
        Self::with_writer(io::stderr(), styling, verbosity)
    }

    pub(crate) fn report_list_item(name: &str) {
        println!("{name}: repetition test");
    }
}

impl<W: io::Write> PrintingReporter<W> {
    /// Creates a reporter printing to the specified writer.
    pub fn with_writer(writer: W, styling: bool, verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            printer: LinePrinter {
                inner: writer,
                styling,
                style_nesting: 0,
            },
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.printer.inner
    }
}

impl<W> Reporter for PrintingReporter<W>
where
    W: io::Write + fmt::Debug,
{
    fn debug(&mut self, info: &dyn fmt::Display) {
        if self.verbosity >= Verbosity::Verbose {
            self.printer.print_debug(format_args!("{info}"));
        }
    }

    fn warning(&mut self, warning: &dyn fmt::Display) {
        self.printer.print_warning(format_args!("{warning}"));
    }

    fn error(&mut self, error: &dyn fmt::Display) {
        self.printer.print_error(format_args!("{error}"));
    }

    fn start_repetitions(&mut self, params: &TestParameters) {
        if self.verbosity < Verbosity::Verbose {
            return;
        }
        let printer = &mut self.printer;
        printer.print_checkbox(Checkmark::InProgress);
        printer.print(format_args!(
            "{}: started ({} bytes per repetition, convergence window: {:?})\n",
            params.name, params.expected_bytes, params.convergence_window
        ));
    }

    fn report_profile(&mut self, report: &ProfileReport) {
        if self.verbosity < Verbosity::Normal || report.regions.is_empty() {
            return;
        }

        let printer = &mut self.printer;
        let total_seconds = crate::cycles_to_seconds(report.total_sampled, report.cpu_frequency);
        if let Some(seconds) = total_seconds {
            printer.print(format_args!(
                "Total time: {seconds:.6}s (CPU frequency: {} Hz)\n",
                report.cpu_frequency
            ));
        } else {
            printer.print(format_args!(
                "Total time: {} cycles (CPU frequency unknown)\n",
                report.total_sampled
            ));
        }
        for region in &report.regions {
            printer.print_region(report, region);
        }
    }

    fn report_repetitions(&mut self, report: &RepetitionReport) {
        let printer = &mut self.printer;
        printer.print_checkbox(report.state.into());
        printer.print_str(&report.name);
        let completed = report.result.completed;
        printer.dimmed().print(format_args!(
            " ({completed} repetition{})",
            if completed == 1 { "" } else { "s" }
        ));
        if report.state == TesterState::Error {
            printer.print_str(": ");
            printer.bold().fg(Color::Red).print_str("FAILED");
        }
        printer.print_str("\n");

        if self.verbosity < Verbosity::Normal {
            return;
        }
        if let Some(rows) = report.rows() {
            let verbose = self.verbosity >= Verbosity::Verbose;
            for (i, row) in rows.iter().enumerate() {
                printer.print_repetition_row(row, i + 1 == rows.len(), verbose);
            }
        } else {
            printer.print_branch(true);
            printer.dimmed().print_str("no completed repetitions");
            printer.print_str("\n");
        }
    }
}
