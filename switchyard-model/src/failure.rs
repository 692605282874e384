use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// What a store-facing decision resolves to when the backing store is
/// unreachable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Proceed permissively and log.
    #[default]
    Open,
    /// Reject conservatively.
    Closed,
}

impl FailureMode {
    pub fn is_open(self) -> bool {
        matches!(self, FailureMode::Open)
    }

    /// The permissive/strict answer for a yes/no decision that could not be
    /// evaluated.
    pub fn degraded_allow(self) -> bool {
        self.is_open()
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureMode::Open => "fail-open",
            FailureMode::Closed => "fail-closed",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FailureMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Ok(FailureMode::Open),
            "closed" | "close" | "fail-closed" | "fail_closed" | "fail-close" => {
                Ok(FailureMode::Closed)
            }
            other => Err(ModelError::UnknownVariant {
                kind: "failure mode",
                value: other.to_string(),
            }),
        }
    }
}
