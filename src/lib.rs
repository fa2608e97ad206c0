//! Remote execution for fleet provisioning.
//!
//! fleetctl runs shell commands and writes files on groups of remote endpoints over SSH. Every
//! endpoint in a group is worked on concurrently, and the caller gets back one result per
//! endpoint once all of them have finished.
//!
//! # Files
//!
//! The inventory file maps group names to endpoint lists. The settings file picks a host-key
//! policy, connect timeouts, a parallelism cap, and the command templates used for package and
//! file checks. Both live in [config::config_dir].
//!
//! # Program flow
//!
//! 1. The caller loads an [core::Inventory] and [settings::Settings] and selects a group.
//!    Malformed configuration fails here, before any endpoint is contacted.
//!
//! 2. A [fanout::Coordinator] spawns one task per endpoint. Each task opens its own connection
//!    through a [connection::ConnectionProvider], performs one or more round trips, and closes
//!    the connection whatever the outcome.
//!
//! 3. The coordinator waits for every task and returns their results in group order. A failure
//!    on one endpoint never cancels or fails another.
//!
//! 4. The [report] module prints each result and a per-group summary.

pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod packages;
pub mod report;
pub mod settings;
#[cfg(feature = "russh")]
pub mod ssh;
pub mod template;

#[doc(inline)]
pub use error::{Error, Result};
