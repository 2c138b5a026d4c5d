use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AlarmError;
use crate::temporal::{parse_zone, HmsTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn from_chrono(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Mon => Weekday::Mon,
            chrono::Weekday::Tue => Weekday::Tue,
            chrono::Weekday::Wed => Weekday::Wed,
            chrono::Weekday::Thu => Weekday::Thu,
            chrono::Weekday::Fri => Weekday::Fri,
            chrono::Weekday::Sat => Weekday::Sat,
            chrono::Weekday::Sun => Weekday::Sun,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Scheduled,
    Triggered,
    Canceled,
    Failed,
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlarmStatus::Scheduled => "scheduled",
            AlarmStatus::Triggered => "triggered",
            AlarmStatus::Canceled => "canceled",
            AlarmStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlarmStatus {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AlarmStatus::Scheduled),
            "triggered" => Ok(AlarmStatus::Triggered),
            "canceled" => Ok(AlarmStatus::Canceled),
            "failed" => Ok(AlarmStatus::Failed),
            other => Err(AlarmError::Validation(format!("unknown status: {other}"))),
        }
    }
}

/// The canonical scheduled unit. `utc_time` is a derived field recomputed at each occurrence;
/// it is never frozen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub code_id: String,
    pub email: String,
    pub local_time: HmsTime,
    pub timezone: String,
    pub utc_time: HmsTime,
    pub is_recurring: bool,
    pub days_of_week: HashSet<Weekday>,
    pub status: AlarmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartialEq for Alarm {
    fn eq(&self, other: &Self) -> bool {
        self.code_id == other.code_id
            && self.email == other.email
            && self.local_time == other.local_time
            && self.timezone == other.timezone
            && self.utc_time == other.utc_time
            && self.is_recurring == other.is_recurring
            && self.days_of_week == other.days_of_week
            && self.status == other.status
    }
}

/// Wire shape returned by the façade: `time`/`utc_time` as `HH:MM:SS` strings, per the
/// AlarmResponse contract, rather than `Alarm`'s internal `local_time`/`HmsTime` representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmResponse {
    pub code_id: String,
    pub email: String,
    pub time: String,
    pub utc_time: String,
    pub timezone: String,
    pub is_recurring: bool,
    pub days_of_week: HashSet<Weekday>,
    pub status: AlarmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Alarm> for AlarmResponse {
    fn from(alarm: Alarm) -> Self {
        Self {
            code_id: alarm.code_id,
            email: alarm.email,
            time: alarm.local_time.to_hhmmss(),
            utc_time: alarm.utc_time.to_hhmmss(),
            timezone: alarm.timezone,
            is_recurring: alarm.is_recurring,
            days_of_week: alarm.days_of_week,
            status: alarm.status,
            created_at: alarm.created_at,
            updated_at: alarm.updated_at,
        }
    }
}

/// Caller-supplied fields for alarm creation. `utc_time` is always server-computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlarm {
    pub code_id: String,
    pub email: String,
    /// `HH:MM` or `HH:MM:SS`.
    pub time: String,
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub days_of_week: HashSet<Weekday>,
}

/// Partial update to an existing alarm. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmPatch {
    pub email: Option<String>,
    pub time: Option<String>,
    pub timezone: Option<String>,
    pub is_recurring: Option<bool>,
    pub days_of_week: Option<HashSet<Weekday>>,
}

fn validate_code_id(code_id: &str) -> Result<(), AlarmError> {
    if code_id.trim().is_empty() {
        return Err(AlarmError::Validation("code_id must not be empty".into()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AlarmError> {
    // Syntactic well-formedness only: one '@', non-empty local and domain parts, domain has a dot.
    let parts: Vec<&str> = email.splitn(2, '@').collect();
    let valid = matches!(parts.as_slice(), [local, domain]
        if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'));
    if !valid {
        return Err(AlarmError::Validation(format!("invalid email: {email}")));
    }
    Ok(())
}

/// Validates a `NewAlarm`, returning the parsed local time and resolved zone name on success.
pub fn validate_new_alarm(new: &NewAlarm, default_zone: &str) -> Result<(HmsTime, String), AlarmError> {
    validate_code_id(&new.code_id)?;
    validate_email(&new.email)?;
    let local_time = HmsTime::parse(&new.time)?;
    let zone_name = new.timezone.clone().unwrap_or_else(|| default_zone.to_string());
    parse_zone(&zone_name)?;
    if !new.is_recurring && !new.days_of_week.is_empty() {
        return Err(AlarmError::Validation(
            "days_of_week must be empty for a one-shot alarm".into(),
        ));
    }
    if new.is_recurring && new.days_of_week.is_empty() {
        return Err(AlarmError::Validation(
            "a recurring alarm needs at least one day_of_week".into(),
        ));
    }
    Ok((local_time, zone_name))
}

pub fn validate_patch(patch: &AlarmPatch) -> Result<(), AlarmError> {
    if let Some(email) = &patch.email {
        validate_email(email)?;
    }
    if let Some(time) = &patch.time {
        HmsTime::parse(time)?;
    }
    if let Some(zone) = &patch.timezone {
        parse_zone(zone)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_new(code_id: &str) -> NewAlarm {
        NewAlarm {
            code_id: code_id.to_string(),
            email: "user@example.com".to_string(),
            time: "09:00:00".to_string(),
            timezone: Some("America/Los_Angeles".to_string()),
            is_recurring: false,
            days_of_week: HashSet::new(),
        }
    }

    #[test]
    fn test_validate_new_alarm_one_shot_ok() {
        let new = sample_new("X");
        let (t, zone) = validate_new_alarm(&new, "UTC").unwrap();
        assert_eq!(t, HmsTime::new(9, 0, 0).unwrap());
        assert_eq!(zone, "America/Los_Angeles");
    }

    #[test]
    fn test_validate_new_alarm_default_zone_used_when_omitted() {
        let mut new = sample_new("X");
        new.timezone = None;
        let (_, zone) = validate_new_alarm(&new, "America/Chicago").unwrap();
        assert_eq!(zone, "America/Chicago");
    }

    #[test]
    fn test_validate_new_alarm_empty_code_id_rejected() {
        let new = sample_new("  ");
        assert!(validate_new_alarm(&new, "UTC").is_err());
    }

    #[test]
    fn test_validate_new_alarm_bad_email_rejected() {
        let mut new = sample_new("X");
        new.email = "not-an-email".to_string();
        assert!(validate_new_alarm(&new, "UTC").is_err());
    }

    #[test]
    fn test_validate_new_alarm_bad_timezone_rejected() {
        let mut new = sample_new("X");
        new.timezone = Some("Not/AZone".to_string());
        assert!(validate_new_alarm(&new, "UTC").is_err());
    }

    #[test]
    fn test_validate_new_alarm_recurring_needs_days() {
        let mut new = sample_new("X");
        new.is_recurring = true;
        assert!(validate_new_alarm(&new, "UTC").is_err());
        new.days_of_week.insert(Weekday::Mon);
        assert!(validate_new_alarm(&new, "UTC").is_ok());
    }

    #[test]
    fn test_validate_new_alarm_one_shot_rejects_days() {
        let mut new = sample_new("X");
        new.days_of_week.insert(Weekday::Mon);
        assert!(validate_new_alarm(&new, "UTC").is_err());
    }

    #[test]
    fn test_alarm_status_roundtrip() {
        for s in ["scheduled", "triggered", "canceled", "failed"] {
            let parsed: AlarmStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn test_alarm_status_unknown_rejected() {
        assert!("bogus".parse::<AlarmStatus>().is_err());
    }

    #[test]
    fn test_validate_patch_partial_fields() {
        let patch = AlarmPatch {
            time: Some("not-a-time".to_string()),
            ..Default::default()
        };
        assert!(validate_patch(&patch).is_err());

        let patch2 = AlarmPatch::default();
        assert!(validate_patch(&patch2).is_ok());
    }

    #[test]
    fn test_alarm_eq_ignores_timestamps() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(5);
        let make = |ts: DateTime<Utc>| Alarm {
            code_id: "X".into(),
            email: "a@b.com".into(),
            local_time: HmsTime::new(9, 0, 0).unwrap(),
            timezone: "UTC".into(),
            utc_time: HmsTime::new(9, 0, 0).unwrap(),
            is_recurring: false,
            days_of_week: HashSet::new(),
            status: AlarmStatus::Scheduled,
            created_at: ts,
            updated_at: ts,
        };
        assert_eq!(make(now), make(later));
    }
}
