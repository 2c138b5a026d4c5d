//! SQLite-backed `AlarmStore`, following this codebase's connection-pool and versioned-migration
//! idiom: a `schema_version` table tracks which of the `MIGRATIONS` have run, each one applied in
//! a single transaction on first connect.

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::errors::AlarmError;
use crate::models::{Alarm, AlarmPatch, AlarmStatus, NewAlarm, Weekday};
use crate::temporal::{self, HmsTime};

use super::{AlarmFilter, AlarmStore};

/// `(version, name, sql)`. Applied in order; `schema_version` records the high-water mark.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "initial_schema",
    include_str!("../../migrations/0001_initial_schema.sql"),
)];

pub struct SqliteAlarmStore {
    pool: SqlitePool,
}

impl SqliteAlarmStore {
    pub async fn connect(database_url: &str, min_connections: u32, max_connections: u32) -> Result<Self, AlarmError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AlarmError::Storage(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// A single-connection in-memory database for tests. Deliberately capped at one pooled
    /// connection: sqlx hands each new connection to `sqlite::memory:` its own independent
    /// database, so a pool size above one would silently scatter writes and reads.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, AlarmError> {
        Self::connect("sqlite::memory:", 1, 1).await
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), AlarmError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query("SELECT COALESCE(MAX(version), 0) as v FROM schema_version")
        .fetch_one(pool)
        .await?
        .get("v");

    for (version, name, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::query(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (version, name) VALUES (?1, ?2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(version, name, "applied migration");
    }
    Ok(())
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, AlarmError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AlarmError::Internal(format!("corrupt timestamp {s}: {e}")))
}

fn days_to_json(days: &HashSet<Weekday>) -> String {
    let mut v: Vec<&'static str> = days
        .iter()
        .map(|d| match d {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        })
        .collect();
    v.sort_unstable();
    serde_json::to_string(&v).unwrap_or_else(|_| "[]".to_string())
}

fn days_from_json(s: &str) -> HashSet<Weekday> {
    let raw: Vec<String> = serde_json::from_str(s).unwrap_or_default();
    raw.iter()
        .filter_map(|d| match d.as_str() {
            "mon" => Some(Weekday::Mon),
            "tue" => Some(Weekday::Tue),
            "wed" => Some(Weekday::Wed),
            "thu" => Some(Weekday::Thu),
            "fri" => Some(Weekday::Fri),
            "sat" => Some(Weekday::Sat),
            "sun" => Some(Weekday::Sun),
            _ => None,
        })
        .collect()
}

fn row_to_alarm(row: &sqlx::sqlite::SqliteRow) -> Result<Alarm, AlarmError> {
    let local_time = HmsTime::new(
        row.get::<i64, _>("local_hour") as u32,
        row.get::<i64, _>("local_minute") as u32,
        row.get::<i64, _>("local_second") as u32,
    )?;
    let utc_time = HmsTime::new(
        row.get::<i64, _>("utc_hour") as u32,
        row.get::<i64, _>("utc_minute") as u32,
        row.get::<i64, _>("utc_second") as u32,
    )?;
    let status: String = row.get("status");
    Ok(Alarm {
        code_id: row.get("code_id"),
        email: row.get("email"),
        local_time,
        timezone: row.get("timezone"),
        utc_time,
        is_recurring: row.get::<i64, _>("is_recurring") != 0,
        days_of_week: days_from_json(&row.get::<String, _>("days_of_week")),
        status: status.parse()?,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

/// Computes `utc_time` for `local_time`/`zone` as of `now`'s date in that zone.
fn compute_utc_time(local_time: HmsTime, zone_name: &str, now: DateTime<Utc>) -> Result<HmsTime, AlarmError> {
    let zone = temporal::parse_zone(zone_name)?;
    let today = temporal::today_in_zone(now, &zone);
    temporal::local_to_utc(local_time, &zone, today)
}

#[async_trait]
impl AlarmStore for SqliteAlarmStore {
    async fn create(&self, new: NewAlarm, default_zone: &str) -> Result<Alarm, AlarmError> {
        let (local_time, zone_name) = crate::models::alarm::validate_new_alarm(&new, default_zone)?;
        let now = Utc::now();
        let utc_time = compute_utc_time(local_time, &zone_name, now)?;

        let existing: Option<i64> = sqlx::query("SELECT 1 as one FROM alarms WHERE code_id = ?1")
            .bind(&new.code_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| r.get("one"));
        if existing.is_some() {
            return Err(AlarmError::Conflict(format!(
                "alarm with code_id {} already exists",
                new.code_id
            )));
        }

        let days_json = days_to_json(&new.days_of_week);
        let ts = fmt_ts(now);
        sqlx::query(
            "INSERT INTO alarms
                (code_id, email, local_hour, local_minute, local_second, timezone,
                 utc_hour, utc_minute, utc_second, is_recurring, days_of_week, status,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'scheduled', ?12, ?12)",
        )
        .bind(&new.code_id)
        .bind(&new.email)
        .bind(local_time.hour as i64)
        .bind(local_time.minute as i64)
        .bind(local_time.second as i64)
        .bind(&zone_name)
        .bind(utc_time.hour as i64)
        .bind(utc_time.minute as i64)
        .bind(utc_time.second as i64)
        .bind(new.is_recurring as i64)
        .bind(&days_json)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        self.get(&new.code_id).await
    }

    async fn update(&self, code_id: &str, patch: AlarmPatch) -> Result<Alarm, AlarmError> {
        crate::models::alarm::validate_patch(&patch)?;
        let mut alarm = self.get(code_id).await?;

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

        let days_json = days_to_json(&alarm.days_of_week);
        sqlx::query(
            "UPDATE alarms SET
                email = ?1, local_hour = ?2, local_minute = ?3, local_second = ?4,
                timezone = ?5, utc_hour = ?6, utc_minute = ?7, utc_second = ?8,
                is_recurring = ?9, days_of_week = ?10, updated_at = ?11
             WHERE code_id = ?12",
        )
        .bind(&alarm.email)
        .bind(alarm.local_time.hour as i64)
        .bind(alarm.local_time.minute as i64)
        .bind(alarm.local_time.second as i64)
        .bind(&alarm.timezone)
        .bind(alarm.utc_time.hour as i64)
        .bind(alarm.utc_time.minute as i64)
        .bind(alarm.utc_time.second as i64)
        .bind(alarm.is_recurring as i64)
        .bind(&days_json)
        .bind(fmt_ts(alarm.updated_at))
        .bind(code_id)
        .execute(&self.pool)
        .await?;

        Ok(alarm)
    }

    async fn cancel(&self, code_id: &str) -> Result<(), AlarmError> {
        let result = sqlx::query(
            "UPDATE alarms SET status = 'canceled', updated_at = ?1
             WHERE code_id = ?2 AND status NOT IN ('triggered', 'canceled')",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(code_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            // Either missing entirely, or already terminal — confirm which to report correctly.
            self.get(code_id).await?;
        }
        Ok(())
    }

    async fn get(&self, code_id: &str) -> Result<Alarm, AlarmError> {
        let row = sqlx::query("SELECT * FROM alarms WHERE code_id = ?1")
            .bind(code_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {code_id}")))?;
        row_to_alarm(&row)
    }

    async fn list_scheduled(&self, filter: AlarmFilter) -> Result<Vec<Alarm>, AlarmError> {
        let mut sql = "SELECT * FROM alarms WHERE 1=1".to_string();
        if filter.email.is_some() {
            sql.push_str(" AND email = ?1");
        }
        if filter.status.is_some() {
            sql.push_str(if filter.email.is_some() {
                " AND status = ?2"
            } else {
                " AND status = ?1"
            });
        }
        let mut query = sqlx::query(&sql);
        if let Some(email) = &filter.email {
            query = query.bind(email);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_alarm).collect()
    }

    async fn mark_status(
        &self,
        code_id: &str,
        new_status: AlarmStatus,
        expected_previous: AlarmStatus,
    ) -> Result<(), AlarmError> {
        let result = sqlx::query(
            "UPDATE alarms SET status = ?1, updated_at = ?2 WHERE code_id = ?3 AND status = ?4",
        )
        .bind(new_status.to_string())
        .bind(fmt_ts(Utc::now()))
        .bind(code_id)
        .bind(expected_previous.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish "doesn't exist" from "lost the CAS race".
            match self.get(code_id).await {
                Ok(_) => Err(AlarmError::Stale(format!(
                    "alarm {code_id} was not in status {expected_previous}"
                ))),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        }
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, AlarmError> {
        let result = sqlx::query(
            "DELETE FROM alarms
             WHERE status IN ('triggered', 'failed') AND is_recurring = 0 AND updated_at < ?1",
        )
        .bind(fmt_ts(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn advance_recurrence(&self, code_id: &str, new_utc_time: HmsTime) -> Result<Alarm, AlarmError> {
        let result = sqlx::query(
            "UPDATE alarms SET status = 'scheduled', utc_hour = ?1, utc_minute = ?2, utc_second = ?3,
                updated_at = ?4
             WHERE code_id = ?5 AND status = 'triggered' AND is_recurring = 1",
        )
        .bind(new_utc_time.hour as i64)
        .bind(new_utc_time.minute as i64)
        .bind(new_utc_time.second as i64)
        .bind(fmt_ts(Utc::now()))
        .bind(code_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AlarmError::Stale(format!(
                "alarm {code_id} was not a triggered recurring alarm"
            )));
        }
        self.get(code_id).await
    }
}
