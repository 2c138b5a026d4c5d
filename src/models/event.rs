use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Topic name for the `alarm.triggered` event.
pub const TOPIC_ALARM_TRIGGERED: &str = "alarm.triggered";
/// Topic name for the `email.request` event (downstream delivery collaborator's inbox).
pub const TOPIC_EMAIL_REQUEST: &str = "email.request";

/// The `alarm.triggered` wire event. Flat, not a tagged enum: the façade contract documents a
/// single object shape, not a `{event, data}` envelope. Consumers dedup on
/// `(code_id, occurrence_local_date)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmEvent {
    pub code_id: String,
    pub email: String,
    pub fired_at_utc: DateTime<Utc>,
    pub occurrence_local_date: NaiveDate,
    pub timezone: String,
    pub local_time: String,
}

impl AlarmEvent {
    pub fn code_id(&self) -> &str {
        &self.code_id
    }
}
