//! In-memory `AlarmStore` test double, used by scheduler/controller tests that don't need to
//! exercise the real SQL layer.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AlarmError;
use crate::models::alarm::{validate_new_alarm, validate_patch};
use crate::models::{Alarm, AlarmPatch, AlarmStatus, NewAlarm};
use crate::temporal::{self, HmsTime};

use super::{AlarmFilter, AlarmStore};

#[derive(Default)]
pub struct InMemoryAlarmStore {
    alarms: RwLock<HashMap<String, Alarm>>,
}

impl InMemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn compute_utc_time(local_time: HmsTime, zone_name: &str, now: DateTime<Utc>) -> Result<HmsTime, AlarmError> {
    let zone = temporal::parse_zone(zone_name)?;
    let today = temporal::today_in_zone(now, &zone);
    temporal::local_to_utc(local_time, &zone, today)
}

#[async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn create(&self, new: NewAlarm, default_zone: &str) -> Result<Alarm, AlarmError> {
        let (local_time, zone_name) = validate_new_alarm(&new, default_zone)?;
        let now = Utc::now();
        let utc_time = compute_utc_time(local_time, &zone_name, now)?;

        let mut guard = self.alarms.write().unwrap();
        if guard.contains_key(&new.code_id) {
            return Err(AlarmError::Conflict(format!(
                "alarm with code_id {} already exists",
                new.code_id
            )));
        }
        let alarm = Alarm {
            code_id: new.code_id.clone(),
            email: new.email,
            local_time,
            timezone: zone_name,
            utc_time,
            is_recurring: new.is_recurring,
            days_of_week: new.days_of_week,
            status: AlarmStatus::Scheduled,
            created_at: now,
            updated_at: now,
        };
        guard.insert(new.code_id, alarm.clone());
        Ok(alarm)
    }

    async fn update(&self, code_id: &str, patch: AlarmPatch) -> Result<Alarm, AlarmError> {
        validate_patch(&patch)?;
        let mut guard = self.alarms.write().unwrap();
        let alarm = guard
            .get_mut(code_id)
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {code_id}")))?;

        if let Some(email) = patch.email {
            alarm.email = email;
        }
        if let Some(time) = &patch.time {
            alarm.local_time = HmsTime::parse(time)?;
        }
        if let Some(zone) = patch.timezone {
            alarm.timezone = zone;
        }
        if let Some(is_recurring) = patch.is_recurring {
            alarm.is_recurring = is_recurring;
        }
        if let Some(days) = patch.days_of_week {
            alarm.days_of_week = days;
        }
        alarm.utc_time = compute_utc_time(alarm.local_time, &alarm.timezone, Utc::now())?;
        alarm.updated_at = Utc::now();
        Ok(alarm.clone())
    }

    async fn cancel(&self, code_id: &str) -> Result<(), AlarmError> {
        let mut guard = self.alarms.write().unwrap();
        let alarm = guard
            .get_mut(code_id)
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {code_id}")))?;
        if !matches!(alarm.status, AlarmStatus::Triggered | AlarmStatus::Canceled) {
            alarm.status = AlarmStatus::Canceled;
            alarm.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, code_id: &str) -> Result<Alarm, AlarmError> {
        self.alarms
            .read()
            .unwrap()
            .get(code_id)
            .cloned()
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {code_id}")))
    }

    async fn list_scheduled(&self, filter: AlarmFilter) -> Result<Vec<Alarm>, AlarmError> {
        let guard = self.alarms.read().unwrap();
        Ok(guard
            .values()
            .filter(|a| filter.email.as_ref().map_or(true, |e| &a.email == e))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .cloned()
            .collect())
    }

    async fn mark_status(
        &self,
        code_id: &str,
        new_status: AlarmStatus,
        expected_previous: AlarmStatus,
    ) -> Result<(), AlarmError> {
        let mut guard = self.alarms.write().unwrap();
        let alarm = guard
            .get_mut(code_id)
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {code_id}")))?;
        if alarm.status != expected_previous {
            return Err(AlarmError::Stale(format!(
                "alarm {code_id} was not in status {expected_previous}"
            )));
        }
        alarm.status = new_status;
        alarm.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, AlarmError> {
        let mut guard = self.alarms.write().unwrap();
        let before = guard.len();
        guard.retain(|_, a| {
            let terminal = matches!(a.status, AlarmStatus::Triggered | AlarmStatus::Failed);
            !(terminal && !a.is_recurring && a.updated_at < cutoff)
        });
        Ok((before - guard.len()) as u64)
    }

    async fn advance_recurrence(&self, code_id: &str, new_utc_time: HmsTime) -> Result<Alarm, AlarmError> {
        let mut guard = self.alarms.write().unwrap();
        let alarm = guard
            .get_mut(code_id)
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {code_id}")))?;
        if alarm.status != AlarmStatus::Triggered || !alarm.is_recurring {
            return Err(AlarmError::Stale(format!(
                "alarm {code_id} was not a triggered recurring alarm"
            )));
        }
        alarm.status = AlarmStatus::Scheduled;
        alarm.utc_time = new_utc_time;
        alarm.updated_at = Utc::now();
        Ok(alarm.clone())
    }
}
