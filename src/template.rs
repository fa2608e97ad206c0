//! Named shell-command templates for the operations the crate knows how to express, e.g. "is this
//! package installed?"
//!
//! Templates use the same variable syntax as a POSIX shell: `$name` (as a whole word) or
//! `${name}`. Values are shell-quoted before they are substituted, so a template never needs
//! quotes around its placeholders. A placeholder with no matching parameter passes through to
//! the remote shell unchanged, which lets templates use shell variables like `$HOME`.

use crate::error::{Error, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A shell command with named placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        CommandTemplate(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the names of the placeholders in this template, in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = Vec::new();
        for captures in placeholder_regex().captures_iter(&self.0) {
            let name = placeholder_name(&captures).to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Substitutes each parameter into the template.
    ///
    /// Every value is quoted with [shlex] first. Substitution is a single pass over the template,
    /// so a value that happens to contain `$name` is never itself expanded.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidInput] if a value can't be quoted, e.g. because it contains a NUL
    /// byte.
    pub fn render(&self, params: &[(&str, &str)]) -> Result<String> {
        let mut quoted = HashMap::with_capacity(params.len());
        for (var, value) in params {
            let value = shlex::try_quote(value).map_err(|e| {
                Error::InvalidInput(format!("cannot quote value for ${var}: {e}"))
            })?;
            let _ = quoted.insert(*var, value.into_owned());
        }

        let rendered = placeholder_regex().replace_all(&self.0, |captures: &Captures| {
            match quoted.get(placeholder_name(captures)) {
                Some(value) => value.clone(),
                None => captures[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }

    /// Checks that every name in `required` appears as a placeholder.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] naming the first missing placeholder.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        let placeholders = self.placeholders();
        for name in required {
            if !placeholders.iter().any(|p| p == name) {
                return Err(Error::config(format!(
                    "template {:?} does not use ${{{name}}}",
                    self.0,
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandTemplate {
    fn from(template: &str) -> Self {
        CommandTemplate::new(template)
    }
}

/// Matches `${name}` (capture 1) and `$name` (capture 2). Names follow shell rules, so `$1` and
/// `$?` are never placeholders.
fn placeholder_regex() -> &'static Regex {
    static COMPUTED: OnceLock<Regex> = OnceLock::new();

    COMPUTED.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("placeholder pattern should compile")
    })
}

fn placeholder_name<'t>(captures: &Captures<'t>) -> &'t str {
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map_or("", |m| m.as_str())
}

/// The operation-to-template table.
///
/// Any entry left out of the settings file keeps its default.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Templates {
    /// Exits 0 iff `${package}` is installed.
    pub package_query: CommandTemplate,

    /// Installs `${package}`, exiting 0 on success.
    pub package_install: CommandTemplate,

    /// Exits 0 iff `${path}` is a regular file.
    pub file_exists: CommandTemplate,

    /// Exits 0 iff the login user is root.
    pub root_check: CommandTemplate,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            package_query: "rpm -qa | grep ${package}".into(),
            package_install: "yum install -y ${package}".into(),
            file_exists: "[ -f ${path} ]".into(),
            root_check: "[ `id -u` -eq 0 ]".into(),
        }
    }
}

impl Templates {
    /// Checks that each template uses the parameters its operation supplies.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] naming the template and the parameter it lacks.
    pub fn validate(&self) -> Result<()> {
        for (name, template, required) in [
            ("package_query", &self.package_query, &["package"][..]),
            ("package_install", &self.package_install, &["package"][..]),
            ("file_exists", &self.file_exists, &["path"][..]),
            ("root_check", &self.root_check, &[][..]),
        ] {
            template
                .require(required)
                .map_err(|e| Error::config(format!("templates.{name}: {e}")))?;
        }
        Ok(())
    }
}
