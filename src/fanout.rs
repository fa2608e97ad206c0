//! Applies one operation to every endpoint in a group at once.
//!
//! Each endpoint gets its own Tokio task, and each task runs the full connect, operate, release
//! cycle on its own connection. The coordinator then waits on every task before returning, so no
//! result is visible until the whole group has finished. Tasks may finish in any order, but
//! results always come back in the group's order.
//!
//! One endpoint's failure never cancels or short-circuits the others. Failures are recorded in
//! that endpoint's [EndpointResult] and the caller decides what to do about them.

use crate::connection::ConnectionProvider;
use crate::core::{Completion, Endpoint, EndpointGroup, EndpointResult, RemotePath};
use crate::core::{RemoteOperationResult, Summary};
use crate::error::{Error, Result};
use crate::executor;
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// One operation to apply uniformly to every endpoint in a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Runs a shell command.
    Command(String),

    /// Writes a payload that has already been read fully into memory.
    WriteFile {
        path: RemotePath,
        contents: Arc<[u8]>,
    },
}

impl Operation {
    pub fn command(command: impl Into<String>) -> Self {
        Operation::Command(command.into())
    }

    pub fn write_file(path: RemotePath, contents: impl Into<Arc<[u8]>>) -> Self {
        Operation::WriteFile {
            path,
            contents: contents.into(),
        }
    }

    /// Reads `local` once and returns an operation that writes it to the same file name in each
    /// login user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidInput] if `local` has no file name or can't be read.
    pub fn copy_to_home(local: impl AsRef<Path>) -> Result<Self> {
        let local = local.as_ref();
        let name = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidInput(format!("{} does not name a file", local.display()))
            })?;
        Self::copy_to(local, RemotePath::Home(name.to_string()))
    }

    /// Reads `local` once and returns an operation that writes it to `path` on each endpoint.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidInput] if `local` can't be read.
    pub fn copy_to(local: impl AsRef<Path>, path: RemotePath) -> Result<Self> {
        let local = local.as_ref();
        let contents = std::fs::read(local).map_err(|e| {
            Error::InvalidInput(format!("could not read {}: {e}", local.display()))
        })?;
        Ok(Self::write_file(path, contents))
    }

    /// Returns a short name for the kind of operation, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Command(_) => "command",
            Operation::WriteFile { .. } => "write_file",
        }
    }

    /// Runs this operation against a single endpoint.
    pub async fn apply<P: ConnectionProvider>(
        &self,
        provider: &P,
        endpoint: &Endpoint,
    ) -> Result<Completion> {
        match self {
            Operation::Command(command) => executor::execute(provider, endpoint, command)
                .await
                .map(Completion::Command),
            Operation::WriteFile { path, contents } => {
                let path = executor::write_file(provider, endpoint, path, contents).await?;
                Ok(Completion::FileWritten {
                    path,
                    bytes: contents.len(),
                })
            }
        }
    }
}

/// Fans operations out across endpoint groups.
#[derive(Debug)]
pub struct Coordinator<P> {
    provider: Arc<P>,

    /// Caps how many tasks may run at once. `None` starts every task immediately.
    limit: Option<Arc<Semaphore>>,
}

impl<P> Clone for Coordinator<P> {
    fn clone(&self) -> Self {
        Coordinator {
            provider: self.provider.clone(),
            limit: self.limit.clone(),
        }
    }
}

impl<P: ConnectionProvider> Coordinator<P> {
    pub fn new(provider: P) -> Self {
        Coordinator {
            provider: Arc::new(provider),
            limit: None,
        }
    }

    /// Allows at most `max_parallel` endpoints to be worked on at once. `None` or zero removes
    /// the cap.
    pub fn with_limit(mut self, max_parallel: Option<usize>) -> Self {
        self.limit = max_parallel
            .filter(|&n| n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    /// Applies `operation` to every endpoint in `group` concurrently and returns one result per
    /// endpoint, in group order, once all of them have finished.
    pub async fn run_parallel(
        &self,
        group: &EndpointGroup,
        operation: &Operation,
    ) -> Vec<RemoteOperationResult> {
        info!(
            group = group.name(),
            endpoints = group.len(),
            operation = operation.kind(),
            "starting fan-out",
        );

        let results = self
            .run_each(group, |provider, endpoint| {
                let operation = operation.clone();
                async move { operation.apply(provider.as_ref(), &endpoint).await }
            })
            .await;

        let summary = Summary::of(&results);
        info!(
            group = group.name(),
            succeeded = summary.succeeded,
            failed = summary.failed(),
            connect_failures = summary.connect_failures,
            "fan-out finished",
        );
        results
    }

    /// Spawns `task` once per endpoint in `group` and waits for every spawned task to finish.
    ///
    /// This is the general form of [Self::run_parallel] for operations that need more than one
    /// round trip per endpoint, e.g. query-then-install. A task that panics is reported as an
    /// [Error::RemoteExecution] for its endpoint; its siblings are unaffected.
    pub async fn run_each<T, F, Fut>(
        &self,
        group: &EndpointGroup,
        task: F,
    ) -> Vec<EndpointResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<P>, Endpoint) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(group.len());
        for endpoint in group {
            let future = task(self.provider.clone(), endpoint.clone());
            let limit = self.limit.clone();
            let owned = endpoint.clone();

            let handle = tokio::spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            let error = Error::remote_execution(&owned, e);
                            return EndpointResult::new(&owned, Utc::now(), Err(error));
                        }
                    },
                    None => None,
                };
                let started_at = Utc::now();
                let outcome = future.await;
                EndpointResult::new(&owned, started_at, outcome)
            });
            handles.push((endpoint, handle));
        }

        // The barrier: nothing is returned until every task has been joined.
        let mut results = Vec::with_capacity(handles.len());
        for (endpoint, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(host = %endpoint.host, error = %e, "fan-out task did not complete");
                    let error = Error::remote_execution(endpoint, format!("task failed: {e}"));
                    EndpointResult::new(endpoint, Utc::now(), Err(error))
                }
            };
            results.push(result);
        }
        results
    }
}
