// =============================================================================
// Refresh scheduler — periodic historical reloads per timeframe family
// =============================================================================
//
// Each timeframe has a fixed refresh period (1s / 60s / 300s by default).
// `RepeatingTask` decides whether a period has elapsed against an injectable
// `Clock`, so the timing logic is testable without sleeping. The async loop
// only polls the schedule and spawns loads; overlapping loads for one key are
// skipped rather than queued.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::history::load_history;
use crate::market_data::SeriesKey;
use crate::runtime_config::RefreshPeriods;
use crate::types::Timeframe;

/// How often the loop checks the schedule.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// Fires once per `period`. Missed ticks are coalesced: after a long stall
/// the task fires once and resumes on the original cadence.
#[derive(Debug, Clone)]
pub struct RepeatingTask {
    period: Duration,
    next_due: Instant,
}

impl RepeatingTask {
    /// First firing is one period after `start`.
    pub fn new(period: Duration, start: Instant) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            period,
            next_due: start + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        while self.next_due <= now {
            self.next_due += self.period;
        }
        true
    }
}

/// One repeating task per timeframe.
pub struct RefreshSchedule {
    tasks: Vec<(Timeframe, RepeatingTask)>,
}

impl RefreshSchedule {
    pub fn new(periods: &RefreshPeriods, start: Instant) -> Self {
        let tasks = Timeframe::ALL
            .iter()
            .map(|tf| (*tf, RepeatingTask::new(periods.for_timeframe(*tf), start)))
            .collect();
        Self { tasks }
    }

    /// Timeframes whose refresh period has elapsed since they last fired.
    pub fn due(&mut self, now: Instant) -> Vec<Timeframe> {
        self.tasks
            .iter_mut()
            .filter_map(|(tf, task)| task.poll(now).then_some(*tf))
            .collect()
    }
}

/// Poll the schedule forever, spawning a reload for every configured symbol
/// of each due timeframe.
pub async fn run_refresh_loop(state: Arc<AppState>, clock: Arc<dyn Clock>) {
    let periods = state.runtime_config.read().refresh_periods_secs.clone();
    let mut schedule = RefreshSchedule::new(&periods, clock.now());
    let in_flight: Arc<Mutex<HashSet<SeriesKey>>> = Arc::new(Mutex::new(HashSet::new()));

    info!("refresh scheduler started");
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        ticker.tick().await;

        for timeframe in schedule.due(clock.now()) {
            let symbols = state.runtime_config.read().symbols.clone();
            for symbol in symbols {
                let key = SeriesKey::new(&symbol, timeframe);
                if !in_flight.lock().insert(key.clone()) {
                    debug!(key = %key, "refresh still in flight, skipping");
                    continue;
                }

                let state = state.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    // Failures are recorded by the loader.
                    let _ = load_history(&state, &key).await;
                    in_flight.lock().remove(&key);
                });
            }
        }
    }
}
