use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the set of features for a run was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    /// Every feature in the catalog.
    All,
    /// One or more explicitly named feature files.
    Feature,
    /// Include tags combined with `AND` / `OR`.
    TagBased,
    /// Include tags plus exclude tags. Exclusions are recorded on the
    /// execution but are not part of the runner's filter expression yet.
    ComplexTag,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::All => "ALL",
            ExecutionType::Feature => "FEATURE",
            ExecutionType::TagBased => "TAG_BASED",
            ExecutionType::ComplexTag => "COMPLEX_TAG",
        }
    }

    /// Progress points gained per `Scenario:` line seen in runner output.
    ///
    /// Narrow selections have few scenarios, so each one moves the bar more.
    pub fn scenario_progress_step(&self) -> i32 {
        match self {
            ExecutionType::All => 2,
            ExecutionType::Feature => 10,
            ExecutionType::TagBased | ExecutionType::ComplexTag => 5,
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ALL" => Ok(ExecutionType::All),
            "FEATURE" => Ok(ExecutionType::Feature),
            "TAG_BASED" => Ok(ExecutionType::TagBased),
            "COMPLEX_TAG" => Ok(ExecutionType::ComplexTag),
            other => Err(format!(
                "invalid execution type: {other} (expected ALL, FEATURE, TAG_BASED or COMPLEX_TAG)"
            )),
        }
    }
}

/// Lifecycle state of an execution.
///
/// `Pending -> Running -> {Passed, Failed, Skipped, Cancelled, Timeout}`.
/// A pending execution may also go straight to `Skipped` when the pre-check
/// finds nothing to run. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Skipped) => true,
            (Running, s) => s.is_terminal(),
            _ => false,
        }
    }

    /// Progress value carried by the final event of a run in this state.
    pub fn final_progress(&self) -> i32 {
        match self {
            ExecutionStatus::Passed | ExecutionStatus::Skipped => 100,
            _ => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Passed => "PASSED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How several tags are combined when selecting features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagLogic {
    #[default]
    And,
    Or,
}

impl TagLogic {
    /// Infix keyword understood by the cucumber tag-expression parser.
    pub fn joiner(&self) -> &'static str {
        match self {
            TagLogic::And => " and ",
            TagLogic::Or => " or ",
        }
    }
}

impl fmt::Display for TagLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagLogic::And => f.write_str("AND"),
            TagLogic::Or => f.write_str("OR"),
        }
    }
}

impl FromStr for TagLogic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "and" => Ok(TagLogic::And),
            "or" => Ok(TagLogic::Or),
            other => Err(format!(
                "invalid tag logic: {other} (expected \"and\" or \"or\")"
            )),
        }
    }
}
