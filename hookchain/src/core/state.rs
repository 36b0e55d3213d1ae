//! Chain run state machine.
//!
//! `Pending → RunningStage(1) → … → RunningStage(n) → Completed`, with
//! `RunningStage(i) → Aborted` available from any stage. `Completed` and
//! `Aborted` are terminal: every transition out of them is refused.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    /// 1-based ordinal of the stage currently executing.
    RunningStage(usize),
    Completed,
    Aborted,
}

impl ChainState {
    /// `Pending → RunningStage(1)`.
    pub fn start(self) -> Result<Self, String> {
        match self {
            Self::Pending => Ok(Self::RunningStage(1)),
            other => Err(format!("cannot start chain from {other}")),
        }
    }

    /// Move past a stage that produced a validated output.
    pub fn advance(self, stage_count: usize) -> Result<Self, String> {
        match self {
            Self::RunningStage(i) if i < stage_count => Ok(Self::RunningStage(i + 1)),
            Self::RunningStage(i) if i == stage_count => Ok(Self::Completed),
            other => Err(format!(
                "cannot advance from {other} (stage count {stage_count})"
            )),
        }
    }

    /// Stop the run after a stage exhausted its attempts.
    pub fn abort(self) -> Result<Self, String> {
        match self {
            Self::RunningStage(_) => Ok(Self::Aborted),
            other => Err(format!("cannot abort from {other}")),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::RunningStage(i) => write!(f, "running stage {i}"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}
