//! Step descriptors as they appear in layered configuration.
//!
//! A step descriptor is the declarative form of one unit of work: a tag
//! selecting the factory that will interpret it plus an ordered command
//! array. Descriptors are created once per workflow run by reading the
//! configuration for a `(language, command)` pair and are never mutated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution environment selector.
///
/// Determines which handler pair builds requests and which backend driver
/// executes them. Also half of the fingerprint key used by the Docker state
/// store (`"{language}_{env}"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    /// Steps run against the local filesystem and shell.
    #[default]
    Local,
    /// Steps run inside (or across the boundary of) a Docker container.
    Docker,
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

impl FromStr for EnvKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(Self::Local),
            "docker" => Ok(Self::Docker),
            other => Err(format!("unknown environment '{other}', expected 'local' or 'docker'")),
        }
    }
}

/// Tag selecting which request factory interprets a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Copy a file (or, when the source is a directory, a tree).
    Copy,
    /// Move a file or directory.
    Move,
    /// Create a directory, including parents.
    Mkdir,
    /// Create an empty file.
    Touch,
    /// Remove a single file.
    Remove,
    /// Remove a directory tree.
    Rmtree,
    /// Run a shell command.
    Shell,
    /// Run a raw Docker operation.
    Docker,
    /// Run an online-judge tooling command.
    Oj,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Mkdir => "mkdir",
            Self::Touch => "touch",
            Self::Remove => "remove",
            Self::Rmtree => "rmtree",
            Self::Shell => "shell",
            Self::Docker => "docker",
            Self::Oj => "oj",
        };
        write!(f, "{label}")
    }
}

/// One declarative unit of work sourced from configuration.
///
/// The `cmd` array's meaning depends on `kind`: file operations read paths
/// from it, shell/oj steps read the argv, and docker steps read a
/// subcommand plus its arguments. Arity is validated by the factory that
/// consumes the descriptor, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Selects the factory that interprets this step.
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Ordered argument array; semantics depend on `kind`.
    #[serde(default)]
    pub cmd: Vec<String>,
    /// When true, a failure of this step is recorded as a warning and
    /// execution continues.
    #[serde(default)]
    pub allow_failure: bool,
    /// When false, the step's stdout/stderr is suppressed in presentation.
    #[serde(default = "default_show_output")]
    pub show_output: bool,
}

fn default_show_output() -> bool {
    true
}

impl StepDescriptor {
    /// Shorthand used by tests and internal builders.
    pub fn new(kind: StepKind, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            cmd: cmd.into_iter().map(Into::into).collect(),
            allow_failure: false,
            show_output: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_descriptor_deserializes_from_config_json() {
        let raw = r#"{"type": "copy", "cmd": ["a.txt", "b.txt"]}"#;
        let step: StepDescriptor = serde_json::from_str(raw).expect("descriptor parses");
        assert_eq!(step.kind, StepKind::Copy);
        assert_eq!(step.cmd, vec!["a.txt", "b.txt"]);
        assert!(!step.allow_failure);
        assert!(step.show_output);
    }

    #[test]
    fn step_descriptor_reads_allow_failure_flag() {
        let raw = r#"
type: shell
cmd: ["true"]
allow_failure: true
"#;
        let step: StepDescriptor = serde_yaml::from_str(raw).expect("descriptor parses");
        assert_eq!(step.kind, StepKind::Shell);
        assert!(step.allow_failure);
    }

    #[test]
    fn env_kind_round_trips_through_display_and_from_str() {
        for env in [EnvKind::Local, EnvKind::Docker] {
            let parsed: EnvKind = env.to_string().parse().expect("parse");
            assert_eq!(parsed, env);
        }
        assert!("podman".parse::<EnvKind>().is_err());
    }
}
