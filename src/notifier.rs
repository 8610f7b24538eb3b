use crate::evaluator::alarm::{Alarm, Disposition};
use crate::evaluator::threshold::ReasonData;
use anyhow::Result;
use log::info;

/// Receives state changes, and repeated states for alarms with `repeat_actions`.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        alarm: &Alarm,
        previous: Disposition,
        reason: &str,
        reason_data: &ReasonData,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(
        &self,
        alarm: &Alarm,
        previous: Disposition,
        reason: &str,
        reason_data: &ReasonData,
    ) -> Result<()> {
        let payload = serde_json::to_string(reason_data)?;

        info!(
            "Alarm {} ({}) {previous} -> {}: {reason} {payload}",
            alarm.name, alarm.alarm_id, alarm.state
        );

        Ok(())
    }
}
