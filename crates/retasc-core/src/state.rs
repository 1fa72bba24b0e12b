use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rule and prerequisite outcome. Ordered so that `min` aggregates a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReleaseRuleState {
    Pending,
    InProgress,
    Completed,
}

impl ReleaseRuleState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseRuleState::Pending => "Pending",
            ReleaseRuleState::InProgress => "InProgress",
            ReleaseRuleState::Completed => "Completed",
        }
    }
}

impl fmt::Display for ReleaseRuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseRuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ReleaseRuleState::Pending),
            "InProgress" => Ok(ReleaseRuleState::InProgress),
            "Completed" => Ok(ReleaseRuleState::Completed),
            other => Err(format!("unknown rule state: {other}")),
        }
    }
}
