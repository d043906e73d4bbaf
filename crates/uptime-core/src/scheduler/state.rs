use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl SchedulerState {
    pub fn can_transition_to(self, target: SchedulerState) -> bool {
        matches!(
            (self, target),
            (SchedulerState::Idle, SchedulerState::Running)
                | (SchedulerState::Running, SchedulerState::Stopping)
                | (SchedulerState::Stopping, SchedulerState::Stopped)
        )
    }

    pub fn is_running(self) -> bool {
        self == SchedulerState::Running
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_state_transitions() {
        assert!(SchedulerState::Idle.can_transition_to(SchedulerState::Running));
        assert!(SchedulerState::Running.can_transition_to(SchedulerState::Stopping));
        assert!(SchedulerState::Stopping.can_transition_to(SchedulerState::Stopped));
    }

    #[test]
    fn invalid_state_transitions() {
        assert!(!SchedulerState::Idle.can_transition_to(SchedulerState::Stopped));
        assert!(!SchedulerState::Running.can_transition_to(SchedulerState::Idle));
        assert!(!SchedulerState::Running.can_transition_to(SchedulerState::Running));
        assert!(!SchedulerState::Stopped.can_transition_to(SchedulerState::Running));
        assert!(!SchedulerState::Stopping.can_transition_to(SchedulerState::Running));
    }
}
