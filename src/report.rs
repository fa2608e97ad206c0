//! Reports the outcome of a fan-out to the user, one endpoint at a time.
//!
//! As in the rest of the crate's I/O, the real [Reporter] locks stdout and stderr just before
//! writing and releases them as soon as it's done, then hands the locked writers to a testable
//! private-logic function ([_report], [_summary]). Tests call those functions directly with fake
//! writers. Holding the locks only while reporting keeps the output of different endpoints from
//! getting mangled without blocking the rest of the program from writing.

use crate::core::{Completion, EndpointResult, Outcome, Summary};
use crate::fanout::Operation;
use crate::packages::PackageState;
use async_trait::async_trait;
use std::fmt::Display;
use std::io::{self, Write};
use std::ops::DerefMut;
use tokio::task;

/// How a successful outcome should appear in a report.
pub trait Describe: Outcome {
    /// A few words on how the operation ended, e.g. `exit status 0`.
    fn describe(&self) -> String;

    /// Output captured from the remote side, if any.
    fn captured(&self) -> Option<&str> {
        None
    }
}

impl Describe for Completion {
    fn describe(&self) -> String {
        match self {
            Completion::Command(output) => match (&output.exit_status, &output.exit_signal) {
                (Some(code), _) => format!("exit status {code}"),
                (None, Some(signal)) => format!("killed by signal {signal}"),
                (None, None) => "no exit status".to_string(),
            },
            Completion::FileWritten { path, bytes } => format!("wrote {bytes} bytes to {path}"),
        }
    }

    fn captured(&self) -> Option<&str> {
        match self {
            Completion::Command(output) if !output.output.is_empty() => {
                Some(output.output.as_str())
            }
            _ => None,
        }
    }
}

impl Describe for bool {
    fn describe(&self) -> String {
        match self {
            true => "yes".to_string(),
            false => "no".to_string(),
        }
    }
}

impl Describe for PackageState {
    fn describe(&self) -> String {
        self.to_string()
    }
}

/// Prints the per-endpoint results of a fan-out to stdout/stderr to keep the user informed.
#[async_trait]
pub trait Report {
    /// Reports one endpoint's result.
    async fn report<T: Describe + Sync>(
        &mut self,
        title: &str,
        result: &EndpointResult<T>,
    ) -> io::Result<()>;

    /// Reports the tally for a whole group.
    async fn summary(&mut self, group: &str, summary: &Summary) -> io::Result<()>;
}

/// The real, production-ready [Report] implementation. Uses the real stdout/stderr.
#[derive(Clone, Debug)]
pub struct Reporter;

#[async_trait]
impl Report for Reporter {
    async fn report<T: Describe + Sync>(
        &mut self,
        title: &str,
        result: &EndpointResult<T>,
    ) -> io::Result<()> {
        // Lock stdout and stderr for sane output ordering. For this same reason, we do not use
        // Tokio's async IO, which provides no locking mechanisms.
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        task::block_in_place(move || _report(&mut stdout, &mut stderr, title, result))
    }

    async fn summary(&mut self, group: &str, summary: &Summary) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        task::block_in_place(move || _summary(&mut stdout, group, summary))
    }
}

/// Generates a one-line identifier for an [Operation], suitable for use as its title in user
/// output.
pub fn title(operation: &Operation) -> String {
    match operation {
        Operation::Command(command) => format!("command: {command}"),
        Operation::WriteFile { path, contents } => {
            format!("write_file: {path} ({} bytes)", contents.len())
        }
    }
}

/// A testable method containing the logic for reporting one endpoint's result.
///
/// Successes go to stdout. Anything else goes to stderr, along with its captured output.
pub fn _report<OT, ET, O, E, T>(
    mut stdout: O,
    mut stderr: E,
    title: &str,
    result: &EndpointResult<T>,
) -> io::Result<()>
where
    OT: Write,
    ET: Write,
    O: DerefMut<Target = OT>,
    E: DerefMut<Target = ET>,
    T: Describe,
{
    fn write_indented(
        mut writer: impl Write,
        header: impl Display,
        content: impl AsRef<str>,
    ) -> io::Result<()> {
        //                1234
        writeln!(writer, "    {header}")?;
        for line in content.as_ref().lines() {
            //                12345678
            writeln!(writer, "        {line}")?;
        }
        Ok(())
    }

    let endpoint = &result.endpoint;
    match &result.outcome {
        Ok(value) if value.succeeded() => {
            writeln!(&mut stdout, "[{endpoint}] Completed {title}: {}", value.describe())?;
            if let Some(captured) = value.captured() {
                write_indented(stdout.deref_mut(), "Captured output:", captured)?;
            }
        }
        Ok(value) => {
            writeln!(&mut stderr, "[{endpoint}] Failed    {title}: {}", value.describe())?;
            if let Some(captured) = value.captured() {
                write_indented(stderr.deref_mut(), "Captured output:", captured)?;
            }
        }
        Err(error) => {
            writeln!(&mut stderr, "[{endpoint}] Error     {title}")?;
            write_indented(stderr.deref_mut(), "Reason:", error.to_string())?;
        }
    }
    Ok(())
}

/// A testable method containing the logic for reporting a group's tally.
pub fn _summary<OT: Write, O: DerefMut<Target = OT>>(
    mut stdout: O,
    group: &str,
    summary: &Summary,
) -> io::Result<()> {
    write!(
        &mut stdout,
        "{group}: {} of {} succeeded",
        summary.succeeded, summary.total,
    )?;

    let mut details = Vec::new();
    if summary.unsuccessful > 0 {
        details.push(format!("{} unsuccessful", summary.unsuccessful));
    }
    if summary.connect_failures > 0 {
        details.push(format!("{} could not connect", summary.connect_failures));
    }
    if summary.other_errors > 0 {
        details.push(format!("{} errored", summary.other_errors));
    }
    match details.is_empty() {
        true => writeln!(&mut stdout),
        false => writeln!(&mut stdout, " ({})", details.join(", ")),
    }
}
