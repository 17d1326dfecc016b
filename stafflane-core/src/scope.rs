//! Subscription scopes
//!
//! A subscriber holds a set of scopes. Operation events apply to `all`,
//! `project:<id>` and `agent:<id>`; queue status snapshots apply to `system`.

use crate::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid subscription scope: {0}")]
pub struct ScopeParseError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    All,
    System,
    Project(String),
    Agent(String),
}

impl Scope {
    /// Scopes an operation event is delivered to.
    pub fn for_operation(op: &Operation) -> [Scope; 3] {
        [
            Scope::All,
            Scope::Project(op.project_id.clone()),
            Scope::Agent(op.agent_id.clone()),
        ]
    }

    /// Whether an operation event matches this scope.
    pub fn matches_operation(&self, op: &Operation) -> bool {
        match self {
            Scope::All => true,
            Scope::System => false,
            Scope::Project(id) => *id == op.project_id,
            Scope::Agent(id) => *id == op.agent_id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::System => f.write_str("system"),
            Scope::Project(id) => write!(f, "project:{id}"),
            Scope::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "all" => return Ok(Scope::All),
            "system" => return Ok(Scope::System),
            _ => {}
        }
        match s.split_once(':') {
            Some(("project", id)) if !id.is_empty() => Ok(Scope::Project(id.to_string())),
            Some(("agent", id)) if !id.is_empty() => Ok(Scope::Agent(id.to_string())),
            _ => Err(ScopeParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Parse a comma separated scope list, ignoring blank entries.
pub fn parse_scopes(input: &str) -> Result<HashSet<Scope>, ScopeParseError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Scope::from_str)
        .collect()
}
