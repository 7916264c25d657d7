//! Integration tests for the renewal timer.
//!
//! Uses `start_paused = true` so Tokio auto-advances the clock whenever
//! every task is idle: sleeping for an hour takes no wall time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mailroom_timer::{RenewalTimer, TimerConfig};
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn bump(count: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
    let count = Arc::clone(count);
    move || {
        count.fetch_add(1, Ordering::SeqCst);
        std::future::ready(())
    }
}

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

// =========================================================================
// Firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_arm_fires_once_after_delay() {
    let timer = RenewalTimer::default();
    let fired = counter();

    timer.arm(Duration::from_secs(60), bump(&fired));

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!timer.is_armed(), "slot must be cleared after firing");
    assert_eq!(timer.metrics().fired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_arm_zero_delay_fires_on_next_turn() {
    let timer = RenewalTimer::default();
    let fired = counter();

    timer.arm(Duration::ZERO, bump(&fired));
    assert!(timer.is_armed());

    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_reports_armed_instant() {
    let timer = RenewalTimer::default();
    let before = Instant::now();

    let deadline = timer.arm(Duration::from_secs(840), bump(&counter()));

    assert_eq!(deadline, before + Duration::from_secs(840));
    assert_eq!(timer.deadline(), Some(deadline));
    assert_eq!(timer.remaining(), Some(Duration::from_secs(840)));
}

// =========================================================================
// At most one pending alarm
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_rearm_cancels_previous_alarm() {
    let timer = RenewalTimer::default();
    let first = counter();
    let second = counter();

    timer.arm(Duration::from_secs(10), bump(&first));
    timer.arm(Duration::from_secs(20), bump(&second));

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;

    assert_eq!(first.load(Ordering::SeqCst), 0, "replaced alarm must not fire");
    assert_eq!(second.load(Ordering::SeqCst), 1);
    let metrics = timer.metrics();
    assert_eq!(metrics.armed, 2);
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.fired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_prevents_firing() {
    let timer = RenewalTimer::default();
    let fired = counter();

    timer.arm(Duration::from_secs(5), bump(&fired));
    assert!(timer.cancel());
    assert!(!timer.cancel(), "second cancel is a no-op");

    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_callback_can_rearm_itself() {
    // Silent refresh reschedules the next renewal from inside the
    // callback. The fresh alarm must survive.
    let timer = Arc::new(RenewalTimer::default());
    let fired = counter();

    let again = Arc::clone(&timer);
    let count = Arc::clone(&fired);
    timer.arm(Duration::from_secs(1), move || async move {
        count.fetch_add(1, Ordering::SeqCst);
        assert!(!again.is_armed(), "slot is cleared before the callback");
        again.arm(Duration::from_secs(100), || async {});
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(timer.is_armed());
    assert_eq!(timer.metrics().cancelled, 0);
}

#[tokio::test(start_paused = true)]
async fn test_drop_cancels_pending_alarm() {
    let fired = counter();
    {
        let timer = RenewalTimer::default();
        timer.arm(Duration::from_secs(1), bump(&fired));
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

// =========================================================================
// Jitter
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_jitter_stays_within_bound() {
    let timer = RenewalTimer::new(TimerConfig {
        jitter_max: Duration::from_secs(5),
    });
    let base = Duration::from_secs(100);

    for _ in 0..20 {
        let now = Instant::now();
        let deadline = timer.arm(base, || async {});
        let delay = deadline - now;
        assert!(delay >= base);
        assert!(delay < base + Duration::from_secs(5));
    }
    assert_eq!(timer.metrics().cancelled, 19);
}

#[tokio::test(start_paused = true)]
async fn test_arm_with_sub_microsecond_jitter_fires() {
    let timer = RenewalTimer::new(TimerConfig {
        jitter_max: Duration::from_nanos(500),
    });
    let fired = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&fired);

    timer.arm(Duration::from_secs(1), move || async move {
        c.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
