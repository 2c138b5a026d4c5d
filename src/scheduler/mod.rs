pub mod index;
pub mod tick;

pub use index::{IndexStats, SchedulerIndex};
pub use tick::{run_tick_loop, Clock, FakeClock, SystemClock, Ticker};
