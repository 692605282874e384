use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bucket::{SchedulerBucket, SchedulerMode};
use crate::error::ModelError;

pub type GroupId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Disabled,
}

impl GroupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Active => "active",
            GroupStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(GroupStatus::Active),
            "disabled" => Ok(GroupStatus::Disabled),
            other => Err(ModelError::UnknownVariant {
                kind: "group status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub platform: String,
    pub mode: SchedulerMode,
    pub status: GroupStatus,
}

impl Group {
    /// The bucket the router addresses for this group.
    pub fn bucket(&self) -> SchedulerBucket {
        SchedulerBucket::new(self.id, self.platform.clone(), self.mode)
    }
}
