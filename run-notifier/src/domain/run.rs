//! Run status and run event snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a run as reported by the execution engine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Pending,
    PlanQueued,
    Planning,
    Planned,
    PlannedAndFinished,
    CostEstimated,
    Confirmed,
    ApplyQueued,
    Applying,
    Applied,
    Discarded,
    Errored,
    Canceled,
    ForceCanceled,
}

impl RunStatus {
    /// Get the wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Whether the run has reached a terminal state.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            Self::Applied
                | Self::PlannedAndFinished
                | Self::Discarded
                | Self::Errored
                | Self::Canceled
                | Self::ForceCanceled
        )
    }
}

/// Time at which a run entered a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTimestamp {
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
}

/// Immutable snapshot of a run state transition that has already been
/// committed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub workspace_id: String,
    pub status: RunStatus,
    /// Status history, oldest first.
    #[serde(default)]
    pub status_timestamps: Vec<StatusTimestamp>,
}

impl RunEvent {
    pub fn new(
        run_id: impl Into<String>,
        workspace_id: impl Into<String>,
        status: RunStatus,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workspace_id: workspace_id.into(),
            status,
            status_timestamps: Vec::new(),
        }
    }

    /// Append a status history entry.
    pub fn with_timestamp(mut self, status: RunStatus, timestamp: DateTime<Utc>) -> Self {
        self.status_timestamps.push(StatusTimestamp { status, timestamp });
        self
    }

    /// When the run was created: the `pending` entry, else the oldest entry.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_for(RunStatus::Pending)
            .or_else(|| self.status_timestamps.first().map(|t| t.timestamp))
    }

    /// When the run entered its current status, else the newest entry.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_for(self.status)
            .or_else(|| self.status_timestamps.last().map(|t| t.timestamp))
    }

    fn timestamp_for(&self, status: RunStatus) -> Option<DateTime<Utc>> {
        self.status_timestamps
            .iter()
            .rev()
            .find(|t| t.status == status)
            .map(|t| t.timestamp)
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} ({}) in workspace {}",
            self.run_id, self.status, self.workspace_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!(RunStatus::PlanQueued.as_str(), "plan_queued");
        assert_eq!(
            RunStatus::from_str("force_canceled").unwrap(),
            RunStatus::ForceCanceled
        );
        assert!(RunStatus::from_str("bogus").is_err());
    }

    #[test]
    fn test_done_statuses() {
        assert!(RunStatus::Applied.is_done());
        assert!(RunStatus::PlannedAndFinished.is_done());
        assert!(RunStatus::Errored.is_done());
        assert!(!RunStatus::Planned.is_done());
        assert!(!RunStatus::ApplyQueued.is_done());
    }

    #[test]
    fn test_created_and_updated_at() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let event = RunEvent::new("run-1", "ws-1", RunStatus::Planning)
            .with_timestamp(RunStatus::Pending, t0)
            .with_timestamp(RunStatus::Planning, t1);

        assert_eq!(event.created_at(), Some(t0));
        assert_eq!(event.updated_at(), Some(t1));
    }

    #[test]
    fn test_timestamps_fall_back_to_history_edges() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let event = RunEvent::new("run-1", "ws-1", RunStatus::Applied)
            .with_timestamp(RunStatus::PlanQueued, t0)
            .with_timestamp(RunStatus::Planning, t1);

        assert_eq!(event.created_at(), Some(t0));
        assert_eq!(event.updated_at(), Some(t1));
        assert_eq!(RunEvent::new("r", "w", RunStatus::Pending).created_at(), None);
    }
}
