use serde::{Deserialize, Serialize};

/// Outcome of the last reconciliation, as surfaced to operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Applied,
    Failure,
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusState::Applied => write!(f, "applied"),
            StatusState::Failure => write!(f, "failure"),
        }
    }
}

/// Status condition written back onto ledgers and sub-namespaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(default)]
    pub state: Option<StatusState>,
    #[serde(default)]
    pub message: String,
    /// Number of reconciliations that ended in `failure`.
    #[serde(default)]
    pub failed: u32,
}

impl Condition {
    /// Record a new state; returns whether anything changed.
    pub fn set(&mut self, state: StatusState, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.state == Some(state) && self.message == message {
            return false;
        }
        if state == StatusState::Failure {
            self.failed = self.failed.saturating_add(1);
        }
        self.state = Some(state);
        self.message = message;
        true
    }

    pub fn is_applied(&self) -> bool {
        self.state == Some(StatusState::Applied)
    }
}
