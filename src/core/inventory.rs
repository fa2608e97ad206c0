//! Loads the inventory: a YAML document mapping group names to endpoint lists.
//!
//! ```yaml
//! redis:
//!   - host: 10.0.0.11
//!     port: 22
//!     username: root
//!     password: s3cret
//! nginx:
//!   - host: 10.0.0.21
//!     port: "22"
//!     username: deploy
//!     password: s3cret
//! docker:
//! ```
//!
//! Group names are free-form. A group may be left empty (or null, like `docker` above) in the
//! file, but selecting an empty group for an operation is an error.

use crate::core::endpoint::{Endpoint, EndpointGroup};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Every group in an inventory file, in file order.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    /// The file this inventory was read from, if any.
    pub source: Option<PathBuf>,

    groups: IndexMap<String, Vec<Endpoint>>,
}

impl Inventory {
    /// Reads and validates an inventory file.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if the file can't be read, isn't a mapping of groups to endpoint
    /// lists, or contains a malformed endpoint.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("could not read inventory {}: {e}", path.display()))
        })?;
        let mut inventory: Inventory = yaml
            .parse()
            .map_err(|e: Error| e.within(path.display()))?;
        inventory.source = Some(path.to_path_buf());
        Ok(inventory)
    }

    /// Returns the named group.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if there is no such group or the group is empty.
    pub fn group(&self, name: &str) -> Result<EndpointGroup> {
        let endpoints = self.groups.get(name).ok_or_else(|| {
            let known: Vec<_> = self.groups.keys().map(String::as_str).collect();
            Error::config(format!(
                "no group named {name:?} in inventory (known groups: {})",
                known.join(", "),
            ))
        })?;
        EndpointGroup::new(name, endpoints.clone())
    }

    /// Returns group names in file order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Returns every group with its raw member list, including empty groups.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[Endpoint])> {
        self.groups
            .iter()
            .map(|(name, endpoints)| (name.as_str(), endpoints.as_slice()))
    }
}

impl FromStr for Inventory {
    type Err = Error;

    /// Parses and validates inventory YAML.
    fn from_str(yaml: &str) -> Result<Self> {
        // A group written as `docker:` with nothing under it decodes as null.
        let raw: Option<IndexMap<String, Option<Vec<Endpoint>>>> = serde_yaml::from_str(yaml)?;

        let groups: IndexMap<_, _> = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoints)| (name, endpoints.unwrap_or_default()))
            .collect();

        for (name, endpoints) in &groups {
            for endpoint in endpoints {
                endpoint
                    .validate()
                    .map_err(|e| e.within(format_args!("group {name:?}")))?;
            }
        }

        Ok(Inventory {
            source: None,
            groups,
        })
    }
}
