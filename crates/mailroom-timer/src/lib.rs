//! Single-slot renewal timer for Mailroom.
//!
//! A session needs exactly one pending "renew the access token" alarm.
//! [`RenewalTimer`] owns that alarm as an explicit, cancellable handle:
//!
//! - [`RenewalTimer::arm`] cancels whatever was pending and schedules a new
//!   callback, so at most one renewal is ever armed.
//! - When the alarm fires, the slot is cleared *before* the callback runs.
//!   A callback that re-arms the timer (silent refresh rescheduling itself)
//!   therefore never cancels itself.
//! - [`RenewalTimer::cancel`] disarms without side effects.
//!
//! # Runtime
//!
//! Arming spawns a Tokio task, so `arm` must be called from inside a Tokio
//! runtime. Tests drive it with `tokio::time::pause()`.
//!
//! ```ignore
//! let timer = RenewalTimer::default();
//! timer.arm(Duration::from_secs(840), move || async move {
//!     coordinator.refresh().await;
//! });
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a renewal timer.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Random extra delay (0..max) added to every arm.
    ///
    /// Tabs that signed in at the same instant would otherwise all renew at
    /// the same instant. Default: zero, so the deadline is exact.
    pub jitter_max: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            jitter_max: Duration::ZERO,
        }
    }
}

impl TimerConfig {
    /// Largest jitter accepted. More than this would eat into the renewal
    /// safety margin.
    pub const MAX_JITTER: Duration = Duration::from_secs(30);

    /// Clamp out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.jitter_max > Self::MAX_JITTER {
            warn!(
                jitter_ms = self.jitter_max.as_millis() as u64,
                max_ms = Self::MAX_JITTER.as_millis() as u64,
                "renewal jitter exceeds maximum, clamping"
            );
            self.jitter_max = Self::MAX_JITTER;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters for one timer, mostly useful in tests and debug logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerMetrics {
    /// Total calls to `arm`.
    pub armed: u64,
    /// Alarms cancelled before firing (by `cancel` or by re-arming).
    pub cancelled: u64,
    /// Alarms that fired and ran their callback.
    pub fired: u64,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

struct Armed {
    id: u64,
    deadline: Instant,
    task: AbortHandle,
}

#[derive(Default)]
struct Slot {
    current: Option<Armed>,
    next_id: u64,
    metrics: TimerMetrics,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A timer holding at most one pending callback.
pub struct RenewalTimer {
    config: TimerConfig,
    slot: Arc<Mutex<Slot>>,
}

impl RenewalTimer {
    /// Create a new, disarmed timer.
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config: config.validated(),
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// A random extra delay in `[0, jitter_max)`, at nanosecond resolution.
    fn jitter(&self) -> Duration {
        let max_ns = u64::try_from(self.config.jitter_max.as_nanos()).unwrap_or(u64::MAX);
        if max_ns == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..max_ns))
    }

    /// Arm the timer to run `on_due` after `delay` (plus jitter).
    ///
    /// Any previously armed alarm is cancelled first. Returns the deadline.
    pub fn arm<F, Fut>(&self, delay: Duration, on_due: F) -> Instant
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let jitter = self.jitter();
        let deadline = Instant::now() + delay + jitter;

        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.current.take() {
            previous.task.abort();
            slot.metrics.cancelled += 1;
            trace!(id = previous.id, "pending renewal replaced");
        }
        slot.next_id += 1;
        let id = slot.next_id;

        let shared = Arc::clone(&self.slot);
        let task = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            {
                let mut slot = lock(&shared);
                // Lost a race with `cancel` or a newer `arm`.
                if !matches!(&slot.current, Some(armed) if armed.id == id) {
                    return;
                }
                slot.current = None;
                slot.metrics.fired += 1;
            }
            trace!(id, "renewal timer fired");
            on_due().await;
        });

        slot.current = Some(Armed {
            id,
            deadline,
            task: task.abort_handle(),
        });
        slot.metrics.armed += 1;

        debug!(
            id,
            delay_secs = delay.as_secs(),
            jitter_ms = jitter.as_millis() as u64,
            "renewal timer armed"
        );
        deadline
    }

    /// Disarm the timer. Returns `true` if an alarm was pending.
    ///
    /// Safe to call multiple times (idempotent).
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.slot);
        match slot.current.take() {
            Some(armed) => {
                armed.task.abort();
                slot.metrics.cancelled += 1;
                trace!(id = armed.id, "renewal timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether an alarm is pending.
    pub fn is_armed(&self) -> bool {
        lock(&self.slot).current.is_some()
    }

    /// When the pending alarm fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        lock(&self.slot).current.as_ref().map(|armed| armed.deadline)
    }

    /// Time left until the pending alarm, if one is armed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> TimerMetrics {
        lock(&self.slot).metrics
    }
}

impl Default for RenewalTimer {
    fn default() -> Self {
        Self::new(TimerConfig::default())
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        if let Some(armed) = lock(&self.slot).current.take() {
            armed.task.abort();
        }
    }
}
