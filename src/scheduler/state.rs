// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Task instance lifecycle

use serde::Serialize;

/// Lifecycle state of one task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Reused instances go straight from Ready to Succeeded, and a
    /// cancellation can reach an instance in any non-terminal state.
    pub fn can_become(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, Running)
                | (Ready, Succeeded)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Pending | Ready | Running, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(TaskState::Pending.can_become(TaskState::Ready));
        assert!(TaskState::Ready.can_become(TaskState::Running));
        assert!(TaskState::Running.can_become(TaskState::Failed));
        assert!(TaskState::Ready.can_become(TaskState::Succeeded));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TaskState::Succeeded, TaskState::Failed, TaskState::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_become(TaskState::Running));
            assert!(!terminal.can_become(TaskState::Cancelled));
        }
        assert!(!TaskState::Pending.can_become(TaskState::Running));
        assert!(!TaskState::Pending.can_become(TaskState::Failed));
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskState::Succeeded).unwrap(), "\"succeeded\"");
        assert_eq!(TaskState::Cancelled.to_string(), "cancelled");
    }
}
