//! What a remote operation produced on one endpoint.

use crate::core::endpoint::Endpoint;
use crate::error::Error;
use chrono::{DateTime, Utc};

/// The combined output and exit status of a remote command that ran to completion.
///
/// A non-zero status is ordinary data here. Deciding whether it means failure is up to the
/// caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout and stderr, interleaved in the order the remote shell delivered them.
    pub output: String,

    /// The process's exit code, or `None` if it was killed by a signal.
    pub exit_status: Option<u32>,

    /// The signal that killed the process, if any.
    pub exit_signal: Option<String>,
}

impl CommandOutput {
    /// Builds the output of a process that exited with `code`.
    pub fn exited(output: impl Into<String>, code: u32) -> Self {
        CommandOutput {
            output: output.into(),
            exit_status: Some(code),
            exit_signal: None,
        }
    }

    /// Returns `true` iff the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// The successful completion of one fan-out operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// A command ran. It may still have exited non-zero.
    Command(CommandOutput),

    /// A file was written.
    FileWritten { path: String, bytes: usize },
}

/// Decides whether a completed operation counts as a success when tallying results.
pub trait Outcome {
    fn succeeded(&self) -> bool;
}

impl Outcome for Completion {
    fn succeeded(&self) -> bool {
        match self {
            Completion::Command(output) => output.success(),
            Completion::FileWritten { .. } => true,
        }
    }
}

impl Outcome for CommandOutput {
    fn succeeded(&self) -> bool {
        self.success()
    }
}

impl Outcome for bool {
    fn succeeded(&self) -> bool {
        *self
    }
}

/// One endpoint's share of a fan-out.
///
/// Created once by the task that ran against the endpoint and never changed afterward.
#[derive(Clone, Debug)]
pub struct EndpointResult<T> {
    /// `user@host:port` of the endpoint this result belongs to.
    pub endpoint: String,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Result<T, Error>,
}

/// The per-endpoint result of [Coordinator::run_parallel].
///
/// [Coordinator::run_parallel]: crate::fanout::Coordinator::run_parallel
pub type RemoteOperationResult = EndpointResult<Completion>;

impl<T> EndpointResult<T> {
    pub fn new(
        endpoint: &Endpoint,
        started_at: DateTime<Utc>,
        outcome: Result<T, Error>,
    ) -> Self {
        EndpointResult {
            endpoint: endpoint.id(),
            host: endpoint.host.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }
}

impl<T: Outcome> EndpointResult<T> {
    /// Returns `true` if the operation completed and its outcome counts as a success.
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, Ok(value) if value.succeeded())
    }
}

impl RemoteOperationResult {
    /// Returns the combined output, if this was a command that completed.
    pub fn output(&self) -> Option<&str> {
        match &self.outcome {
            Ok(Completion::Command(output)) => Some(&output.output),
            _ => None,
        }
    }

    /// Returns the exit status, if this was a command that exited normally.
    pub fn exit_status(&self) -> Option<u32> {
        match &self.outcome {
            Ok(Completion::Command(output)) => output.exit_status,
            _ => None,
        }
    }
}

/// Tallies a set of results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,

    /// Operations that completed but did not count as successes, e.g. non-zero exits.
    pub unsuccessful: usize,

    pub connect_failures: usize,

    /// Errors other than connect failures.
    pub other_errors: usize,
}

impl Summary {
    pub fn of<T: Outcome>(results: &[EndpointResult<T>]) -> Self {
        let mut summary = Summary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match &result.outcome {
                Ok(value) if value.succeeded() => summary.succeeded += 1,
                Ok(_) => summary.unsuccessful += 1,
                Err(e) if e.is_connect() => summary.connect_failures += 1,
                Err(_) => summary.other_errors += 1,
            }
        }
        summary
    }

    /// Returns the number of endpoints that did not succeed, for whatever reason.
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}
