//! The scheduler's clock abstraction and per-second tick loop.
//!
//! Carried from this codebase's existing `Clock`/`SystemClock`/`FakeClock` trio (used elsewhere
//! to drive cron-style scheduling under `tokio::time::pause`/`advance` in tests), but the tick
//! algorithm itself is new: rather than sleeping until the next single cron fire, `Ticker::poll`
//! is driven by a fast-polling outer loop and does its own catch-up/stutter bookkeeping so it
//! never misses or double-processes a UTC second regardless of how often it's called.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use super::index::SchedulerIndex;

/// Abstracts "now" so tests can advance time deterministically instead of sleeping in real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct FakeClock {
    current: std::sync::RwLock<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::RwLock::new(start),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.current.write().unwrap() = t;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.current.write().unwrap();
        *guard += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().unwrap()
    }
}

/// Drives the index's per-second due-set extraction. Each call to `poll` compares the clock's
/// current epoch second against the last one it processed: if the clock hasn't moved forward
/// (stutter), it returns nothing; if more than one second has elapsed, it walks every missed
/// second in order (catch-up) rather than silently skipping ahead.
pub struct Ticker {
    index: Arc<SchedulerIndex>,
    clock: Arc<dyn Clock>,
    last_epoch_second: Option<i64>,
}

impl Ticker {
    pub fn new(index: Arc<SchedulerIndex>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index,
            clock,
            last_epoch_second: None,
        }
    }

    /// Returns `(utc_second_of_day, due_code_ids)` for every newly-elapsed second since the last
    /// call, oldest first. Empty on the very first call's result vector only if the clock somehow
    /// reports a second at or before itself (never happens in practice, exercised via seams).
    pub async fn poll(&mut self) -> Vec<(u32, Vec<String>)> {
        let now = self.clock.now();
        let epoch = now.timestamp();

        let pending: Vec<i64> = match self.last_epoch_second {
            None => vec![epoch],
            Some(last) if epoch <= last => return Vec::new(),
            Some(last) => (last + 1..=epoch).collect(),
        };
        self.last_epoch_second = Some(epoch);

        let mut out = Vec::with_capacity(pending.len());
        for epoch_second in pending {
            let second_of_day = epoch_second.rem_euclid(86_400) as u32;
            let due = self.index.due(second_of_day).await;
            out.push((second_of_day, due));
        }
        out
    }
}

/// Runs the tick loop until `shutdown_rx` fires. Due code_ids are pushed onto `dispatch_tx` one
/// batch per elapsed second (never blocking — the loop dispatches and returns); `last_tick_tx` is
/// updated after every poll so `/health` can report tick staleness.
pub async fn run_tick_loop(
    mut ticker: Ticker,
    dispatch_tx: mpsc::Sender<Vec<String>>,
    last_tick_tx: watch::Sender<DateTime<Utc>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for (_second_of_day, due) in ticker.poll().await {
                    if due.is_empty() {
                        continue;
                    }
                    if dispatch_tx.send(due).await.is_err() {
                        tracing::warn!("tick dispatch channel closed, stopping tick loop");
                        return;
                    }
                }
                let _ = last_tick_tx.send(Utc::now());
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("tick loop received shutdown signal");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_system_clock_returns_recent_time() {
        let clock = SystemClock;
        let before = Utc::now();
        let now = clock.now();
        assert!(now >= before);
    }

    #[tokio::test]
    async fn test_fake_clock_set_and_advance() {
        let clock = FakeClock::new(at(1000));
        assert_eq!(clock.now(), at(1000));
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), at(1005));
        clock.set(at(2000));
        assert_eq!(clock.now(), at(2000));
    }

    #[tokio::test]
    async fn test_first_poll_processes_current_second() {
        let index = Arc::new(SchedulerIndex::new());
        index.add("A1", (1000i64 % 86400) as u32).await;
        let clock = Arc::new(FakeClock::new(at(1000)));
        let mut ticker = Ticker::new(index, clock);
        let results = ticker.poll().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, vec!["A1".to_string()]);
    }

    #[tokio::test]
    async fn test_stutter_protection_returns_empty() {
        let index = Arc::new(SchedulerIndex::new());
        let clock = Arc::new(FakeClock::new(at(1000)));
        let mut ticker = Ticker::new(index, clock);
        ticker.poll().await;
        let second_call = ticker.poll().await;
        assert!(second_call.is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_processes_every_missed_second() {
        let index = Arc::new(SchedulerIndex::new());
        index.add("A1", 1001 % 86400).await;
        index.add("A2", 1003 % 86400).await;
        let clock = Arc::new(FakeClock::new(at(1000)));
        let mut ticker = Ticker::new(index, clock.clone());
        ticker.poll().await; // processes 1000

        clock.set(at(1003)); // jump forward 3 seconds without intermediate polls
        let results = ticker.poll().await;
        assert_eq!(results.len(), 3); // 1001, 1002, 1003 all processed, none skipped
        assert_eq!(results[0].1, vec!["A1".to_string()]);
        assert!(results[1].1.is_empty());
        assert_eq!(results[2].1, vec!["A2".to_string()]);
    }

    #[tokio::test]
    async fn test_due_set_proportional_to_firing_alarms_not_population() {
        let index = Arc::new(SchedulerIndex::new());
        for i in 0..1000 {
            index.add(&format!("bulk-{i}"), 500).await;
        }
        index.add("A1", 600).await;
        let clock = Arc::new(FakeClock::new(at(600)));
        let mut ticker = Ticker::new(index, clock);
        let results = ticker.poll().await;
        assert_eq!(results[0].1.len(), 1);
    }

    #[tokio::test]
    async fn test_second_of_day_wraps_at_midnight() {
        let index = Arc::new(SchedulerIndex::new());
        index.add("A1", 0).await; // 00:00:00 UTC
        let clock = Arc::new(FakeClock::new(at(86_399)));
        let mut ticker = Ticker::new(index, clock.clone());
        ticker.poll().await;
        clock.set(at(86_400)); // midnight rollover
        let results = ticker.poll().await;
        assert_eq!(results[0].1, vec!["A1".to_string()]);
    }
}
