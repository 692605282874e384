use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// How a group's accounts are combined when the router picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    Single,
    Mixed,
    Forced,
}

impl SchedulerMode {
    pub const ALL: [SchedulerMode; 3] =
        [SchedulerMode::Single, SchedulerMode::Mixed, SchedulerMode::Forced];

    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerMode::Single => "single",
            SchedulerMode::Mixed => "mixed",
            SchedulerMode::Forced => "forced",
        }
    }
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SchedulerMode::Single),
            "mixed" => Ok(SchedulerMode::Mixed),
            "forced" => Ok(SchedulerMode::Forced),
            other => Err(ModelError::UnknownVariant {
                kind: "scheduler mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Partition key of the snapshot cache: `(group, platform, mode)`.
///
/// The canonical string form is `"{group_id}:{platform}:{mode}"`. No case or
/// whitespace normalization happens in either direction, so callers must pass
/// canonical platform and mode strings. A zero or negative group ID is
/// syntactically valid here; whether it means anything is the caller's call.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SchedulerBucket {
    pub group_id: i64,
    pub platform: String,
    pub mode: String,
}

impl SchedulerBucket {
    pub fn new(
        group_id: i64,
        platform: impl Into<String>,
        mode: SchedulerMode,
    ) -> Self {
        Self {
            group_id,
            platform: platform.into(),
            mode: mode.as_str().to_string(),
        }
    }

    /// Exact inverse of the `Display` form. Returns `None` unless the input
    /// splits into exactly three colon-separated segments, the first is an
    /// integer, and the other two are non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':');
        let (Some(group), Some(platform), Some(mode), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let group_id = group.parse::<i64>().ok()?;
        if platform.is_empty() || mode.is_empty() {
            return None;
        }
        Some(Self {
            group_id,
            platform: platform.to_string(),
            mode: mode.to_string(),
        })
    }
}

impl fmt::Display for SchedulerBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.platform, self.mode)
    }
}

impl FromStr for SchedulerBucket {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ModelError::InvalidBucket(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_string_round_trips() {
        let cases = [
            SchedulerBucket::new(7, "anthropic", SchedulerMode::Single),
            SchedulerBucket::new(0, "gemini", SchedulerMode::Mixed),
            SchedulerBucket::new(-3, "openai", SchedulerMode::Forced),
            SchedulerBucket {
                group_id: i64::MAX,
                platform: "Custom Platform".into(),
                mode: "experimental".into(),
            },
        ];

        for bucket in cases {
            let raw = bucket.to_string();
            assert_eq!(SchedulerBucket::parse(&raw), Some(bucket.clone()));
            assert_eq!(raw.parse::<SchedulerBucket>(), Ok(bucket));
        }
    }

    #[test]
    fn malformed_bucket_keys_are_rejected() {
        for raw in [
            "",
            "1:2",
            "1::mode",
            "1:openai:",
            ":openai:single",
            "x:openai:single",
            "1:a:b:c",
        ] {
            assert_eq!(SchedulerBucket::parse(raw), None, "accepted {raw:?}");
            assert!(matches!(
                raw.parse::<SchedulerBucket>(),
                Err(ModelError::InvalidBucket(_))
            ));
        }
    }

    #[test]
    fn parse_does_not_normalize() {
        let bucket = SchedulerBucket::parse("5: OpenAI :Single").expect("valid");
        assert_eq!(bucket.platform, " OpenAI ");
        assert_eq!(bucket.mode, "Single");
    }

    #[test]
    fn mode_strings() {
        for mode in SchedulerMode::ALL {
            assert_eq!(mode.as_str().parse::<SchedulerMode>(), Ok(mode));
        }
        assert!("SINGLE".parse::<SchedulerMode>().is_err());
    }
}
