pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::errors::AlarmError;
use crate::models::{Alarm, AlarmPatch, AlarmStatus, NewAlarm};
use crate::temporal::HmsTime;

/// Filter applied to `list_scheduled`. Both fields are optional narrowing predicates.
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub email: Option<String>,
    pub status: Option<AlarmStatus>,
}

/// Durable, transactional record of every alarm's canonical definition and lifecycle status.
///
/// `mark_status` is the compare-and-set primitive the Lifecycle Controller relies on to prevent
/// double-firing across replicas (§4.E step 3): it succeeds only if the row's current status
/// matches `expected_previous`, otherwise it returns `AlarmError::Stale`.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn create(&self, new: NewAlarm, default_zone: &str) -> Result<Alarm, AlarmError>;
    async fn update(&self, code_id: &str, patch: AlarmPatch) -> Result<Alarm, AlarmError>;
    async fn cancel(&self, code_id: &str) -> Result<(), AlarmError>;
    async fn get(&self, code_id: &str) -> Result<Alarm, AlarmError>;
    async fn list_scheduled(&self, filter: AlarmFilter) -> Result<Vec<Alarm>, AlarmError>;
    async fn mark_status(
        &self,
        code_id: &str,
        new_status: AlarmStatus,
        expected_previous: AlarmStatus,
    ) -> Result<(), AlarmError>;
    async fn delete_expired(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64, AlarmError>;

    /// Re-arms a recurring alarm after it fires: sets `utc_time` to the freshly computed value
    /// for its next qualifying occurrence and resets status to `scheduled`. Only valid on an
    /// alarm currently in status `triggered`.
    async fn advance_recurrence(&self, code_id: &str, new_utc_time: HmsTime) -> Result<Alarm, AlarmError>;
}
