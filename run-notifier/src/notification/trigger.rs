//! Run status to trigger mapping.

use super::config::Trigger;
use crate::domain::RunStatus;

/// Map a run status to the trigger it represents.
///
/// Queueing statuses (and other intermediate ones such as `confirmed`) map to
/// nothing, so notifications follow meaningful progress only.
pub fn match_trigger(status: RunStatus) -> Option<Trigger> {
    match status {
        RunStatus::Pending => Some(Trigger::Created),
        RunStatus::Planning => Some(Trigger::Planning),
        RunStatus::Planned => Some(Trigger::NeedsAttention),
        RunStatus::Applying => Some(Trigger::Applying),
        RunStatus::Errored => Some(Trigger::Errored),
        s if s.is_done() => Some(Trigger::Completed),
        _ => None,
    }
}
