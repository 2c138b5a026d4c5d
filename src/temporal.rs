//! Pure, I/O-free timezone conversion and weekday arithmetic.
//!
//! Every scheduling decision downstream is made on UTC wall-clock seconds; this module is the
//! only place local-time/timezone reasoning happens. DST policy: a nonexistent local time (spring
//! forward) resolves by shifting forward past the gap; an ambiguous local time (fall back)
//! resolves to the earlier (pre-transition) instant. Both are deliberate, documented choices, not
//! incidental behavior of the underlying library.

use std::str::FromStr;

use chrono::{Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::AlarmError;

/// Wall-clock hour/minute/second, independent of any particular date. Serializes as an
/// `HH:MM:SS` string rather than a `{hour,minute,second}` object, matching the wire shape of
/// every other time field in the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HmsTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl Serialize for HmsTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hhmmss())
    }
}

impl<'de> Deserialize<'de> for HmsTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HmsTime::parse(&s).map_err(de::Error::custom)
    }
}

impl HmsTime {
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self, AlarmError> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(AlarmError::Validation(format!(
                "invalid time {hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self { hour, minute, second })
    }

    /// `utc_second_of_day`, the key used by the scheduler's bucketed index.
    pub fn second_of_day(&self) -> u32 {
        self.hour * 3600 + self.minute * 60 + self.second
    }

    /// Accepts `HH:MM` (normalized to `HH:MM:SS` with seconds=0) or `HH:MM:SS`.
    pub fn parse(s: &str) -> Result<Self, AlarmError> {
        let parts: Vec<&str> = s.split(':').collect();
        let (h, m, sec) = match parts.as_slice() {
            [h, m] => (*h, *m, "0"),
            [h, m, s] => (*h, *m, *s),
            _ => {
                return Err(AlarmError::Validation(format!(
                    "malformed time string: {s}"
                )))
            }
        };
        let parse_field = |field: &str, name: &str| -> Result<u32, AlarmError> {
            field
                .parse::<u32>()
                .map_err(|_| AlarmError::Validation(format!("malformed {name} in time: {s}")))
        };
        Self::new(
            parse_field(h, "hour")?,
            parse_field(m, "minute")?,
            parse_field(sec, "second")?,
        )
    }

    pub fn to_hhmmss(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }

    fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second)
            .expect("validated in HmsTime::new")
    }

    fn from_naive_time(t: NaiveTime) -> Self {
        Self {
            hour: t.hour(),
            minute: t.minute(),
            second: t.second(),
        }
    }
}

use chrono::Timelike;

/// Parses and validates an IANA zone name.
pub fn parse_zone(zone: &str) -> Result<Tz, AlarmError> {
    Tz::from_str(zone).map_err(|_| AlarmError::Validation(format!("invalid timezone: {zone}")))
}

/// Attaches `local_time` to `on_date` in `zone`, converts to UTC, returns the UTC wall-clock.
///
/// Gaps (spring-forward) resolve by shifting forward to the first valid instant past the jump.
/// Overlaps (fall-back) resolve to the earlier, pre-transition instant.
pub fn local_to_utc(local_time: HmsTime, zone: &Tz, on_date: NaiveDate) -> Result<HmsTime, AlarmError> {
    let naive = on_date.and_time(local_time.to_naive_time());
    let utc_dt = match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earlier, _later) => earlier,
        LocalResult::None => resolve_gap(zone, naive)?,
    };
    Ok(HmsTime::from_naive_time(utc_dt.with_timezone(&Utc).time()))
}

/// Probes forward second-by-second past a DST gap to find the first valid local instant,
/// mirroring the "shift forward by the gap size" policy.
fn resolve_gap(zone: &Tz, naive: chrono::NaiveDateTime) -> Result<chrono::DateTime<Tz>, AlarmError> {
    let mut candidate = naive;
    for _ in 0..2 * 3600 {
        candidate += Duration::seconds(1);
        if let LocalResult::Single(dt) = zone.from_local_datetime(&candidate) {
            return Ok(dt);
        }
    }
    Err(AlarmError::Validation(format!(
        "could not resolve nonexistent local time {naive} in zone {zone}"
    )))
}

/// Inverse of `local_to_utc`: given a UTC wall-clock on `on_date`, returns the local time in `zone`.
pub fn utc_to_local(utc_time: HmsTime, zone: &Tz, on_date: NaiveDate) -> Result<HmsTime, AlarmError> {
    let naive_utc = on_date.and_time(utc_time.to_naive_time());
    let utc_dt = Utc.from_utc_datetime(&naive_utc);
    let local_dt = utc_dt.with_timezone(zone);
    Ok(HmsTime::from_naive_time(local_dt.naive_local().time()))
}

/// The weekday of `instant` as observed in `zone`.
pub fn weekday_in_zone(instant: chrono::DateTime<Utc>, zone: &Tz) -> Weekday {
    instant.with_timezone(zone).weekday()
}

/// "Now", abstracted so callers can inject a fixed instant in tests without touching the wall clock.
pub fn today_in_zone(now: chrono::DateTime<Utc>, zone: &Tz) -> NaiveDate {
    now.with_timezone(zone).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_hms_parse_hhmm() {
        let t = HmsTime::parse("09:30").unwrap();
        assert_eq!(t, HmsTime::new(9, 30, 0).unwrap());
    }

    #[test]
    fn test_hms_parse_hhmmss() {
        let t = HmsTime::parse("09:30:15").unwrap();
        assert_eq!(t, HmsTime::new(9, 30, 15).unwrap());
    }

    #[test]
    fn test_hms_parse_malformed() {
        assert!(HmsTime::parse("garbage").is_err());
        assert!(HmsTime::parse("25:00").is_err());
        assert!(HmsTime::parse("10:60").is_err());
    }

    #[test]
    fn test_hms_to_hhmmss() {
        assert_eq!(HmsTime::new(9, 5, 0).unwrap().to_hhmmss(), "09:05:00");
    }

    #[test]
    fn test_second_of_day() {
        assert_eq!(HmsTime::new(0, 0, 0).unwrap().second_of_day(), 0);
        assert_eq!(HmsTime::new(1, 0, 0).unwrap().second_of_day(), 3600);
        assert_eq!(HmsTime::new(23, 59, 59).unwrap().second_of_day(), 86399);
    }

    #[test]
    fn test_parse_zone_valid() {
        assert!(parse_zone("America/Los_Angeles").is_ok());
    }

    #[test]
    fn test_parse_zone_invalid() {
        assert!(parse_zone("Not/AZone").is_err());
    }

    #[test]
    fn test_local_to_utc_roundtrip_normal_day() {
        let zone = parse_zone("America/Los_Angeles").unwrap();
        let date = ymd(2025, 1, 15);
        let local = HmsTime::new(9, 0, 0).unwrap();
        let utc = local_to_utc(local, &zone, date).unwrap();
        assert_eq!(utc, HmsTime::new(17, 0, 0).unwrap());
        let back = utc_to_local(utc, &zone, date).unwrap();
        assert_eq!(back, local);
    }

    #[test]
    fn test_dst_spring_forward_gap_shifts_forward() {
        // 2025-03-09: America/New_York springs forward at 02:00 -> 03:00; 02:30 doesn't exist.
        let zone = parse_zone("America/New_York").unwrap();
        let date = ymd(2025, 3, 9);
        let local = HmsTime::new(2, 30, 0).unwrap();
        let utc = local_to_utc(local, &zone, date).unwrap();
        // Resolved instant must land at/after 03:00 local, i.e. 07:00 UTC.
        let resolved_local = utc_to_local(utc, &zone, date).unwrap();
        assert!(resolved_local >= HmsTime::new(3, 0, 0).unwrap());
    }

    #[test]
    fn test_dst_fall_back_overlap_resolves_earlier() {
        // 2025-11-02: America/New_York falls back at 02:00 -> 01:00; 01:30 occurs twice.
        let zone = parse_zone("America/New_York").unwrap();
        let date = ymd(2025, 11, 2);
        let local = HmsTime::new(1, 30, 0).unwrap();
        let utc = local_to_utc(local, &zone, date).unwrap();
        // The earlier instant is EDT (UTC-4), so 01:30 EDT = 05:30 UTC, not 06:30 UTC (EST).
        assert_eq!(utc, HmsTime::new(5, 30, 0).unwrap());
    }

    #[test]
    fn test_weekday_in_zone_crosses_date_boundary() {
        // 2025-01-15T07:00:00Z is Wed in UTC but still Tue 23:00 in Los Angeles (UTC-8).
        let instant = Utc.with_ymd_and_hms(2025, 1, 15, 7, 0, 0).unwrap();
        let zone = parse_zone("America/Los_Angeles").unwrap();
        assert_eq!(weekday_in_zone(instant, &zone), Weekday::Wed);
        let instant2 = Utc.with_ymd_and_hms(2025, 1, 15, 6, 59, 59).unwrap();
        assert_eq!(weekday_in_zone(instant2, &zone), Weekday::Tue);
    }

    #[test]
    fn test_today_in_zone() {
        let instant = Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap();
        let zone = parse_zone("America/Los_Angeles").unwrap();
        assert_eq!(today_in_zone(instant, &zone), ymd(2025, 1, 14));
    }
}
