//! The fixed workflow pipeline and its total ordering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One ordered step of the delivery pipeline.
///
/// The declaration order is the pipeline order; automatic progression may
/// only move a task toward later variants. Manual moves are unrestricted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Task has been captured but no work has started.
    #[default]
    Backlog,
    /// Investigate the codebase and produce a research document.
    Research,
    /// Turn research into an implementation plan.
    Planning,
    /// Execute the plan against the repository.
    Implementation,
    /// Review the implemented changes.
    Review,
    /// Address review feedback and tidy the working tree.
    Cleanup,
    /// Merge the finished work.
    Merge,
    /// Terminal stage; artifacts are cleaned up on arrival.
    Done,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::Backlog,
        Stage::Research,
        Stage::Planning,
        Stage::Implementation,
        Stage::Review,
        Stage::Cleanup,
        Stage::Merge,
        Stage::Done,
    ];

    /// Position of this stage in the fixed pipeline order.
    pub fn order_index(self) -> u8 {
        self as u8
    }

    /// Whether an execution session can be started at this stage.
    ///
    /// Backlog has nothing to execute yet and Done is terminal.
    pub fn is_actionable(self) -> bool {
        !matches!(self, Stage::Backlog | Stage::Done)
    }

    /// Wire representation (lowercase).
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Backlog => "backlog",
            Stage::Research => "research",
            Stage::Planning => "planning",
            Stage::Implementation => "implementation",
            Stage::Review => "review",
            Stage::Cleanup => "cleanup",
            Stage::Merge => "merge",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown stage '{}'", s)))
    }
}
