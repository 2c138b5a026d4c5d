pub mod alarm;
pub mod config;
pub mod event;

pub use alarm::{Alarm, AlarmPatch, AlarmResponse, AlarmStatus, NewAlarm, Weekday};
pub use config::SchedulerConfig;
pub use event::{AlarmEvent, TOPIC_ALARM_TRIGGERED, TOPIC_EMAIL_REQUEST};
