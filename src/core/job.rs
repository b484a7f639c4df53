use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use strum::{Display, EnumIter, EnumString};

#[derive(
    Debug,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Display,
    EnumIter,
    EnumString,
    Hash,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Awaiting placement; no GPU assigned yet.
    Queued,
    /// Placed on a GPU but not yet confirmed running.
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const TERMINAL: &'static [JobStatus] =
        &[JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        // Queued → Pending → Running → Completed
        //              │        │
        //              │        ├──> Failed
        //              └> Failed└──> Cancelled
        matches!(
            (self, next),
            (Queued, Pending)
                | (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// Tag for a history log entry. Persisted as lowercase text.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HistoryAction {
    Queued,
    Started,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Job {
    pub id: i64,
    pub workload_type: String,
    pub command: String,
    pub status: JobStatus,
    pub assigned_gpu_id: Option<String>,
    pub agent_id: Option<i64>,
    /// External process handle on the owning agent.
    pub pid: Option<u32>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

/// Append-only history log entry. Never mutated or deleted once written.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryEvent {
    pub id: i64,
    pub job_id: i64,
    pub action: HistoryAction,
    pub details: String,
    pub timestamp: SystemTime,
}

/// A job submission as received from the outside.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JobRequest {
    pub workload_type: String,
    pub command: String,
    #[serde(default)]
    pub preferred_gpu: Option<String>,
}

#[derive(Debug)]
pub enum ScheduleError {
    /// The caller asked for a GPU the store does not know about.
    GpuNotFound(String),
    Internal(anyhow::Error),
}

impl std::error::Error for ScheduleError {}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::GpuNotFound(id) => write!(f, "GPU {} not found", id),
            ScheduleError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl From<anyhow::Error> for ScheduleError {
    fn from(e: anyhow::Error) -> Self {
        ScheduleError::Internal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let text = status.to_string();
            assert_eq!(text, text.to_lowercase());
            assert_eq!(text.parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states_are_monotone() {
        use JobStatus::*;
        for terminal in JobStatus::TERMINAL {
            for next in [Queued, Pending, Running, Completed, Failed, Cancelled] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} must not transition to {next}"
                );
            }
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));

        // A queued job is cancelled by the API reporting `not_running`,
        // never by a state transition.
        assert!(!Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn test_job_request_accepts_minimal_json() {
        let request: JobRequest =
            serde_json::from_str(r#"{"workload_type": "train", "command": "python run.py"}"#)
                .unwrap();
        assert_eq!(request.workload_type, "train");
        assert_eq!(request.preferred_gpu, None);
    }
}
