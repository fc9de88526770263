//! Generic polling adapter (`spec.md` §4.4.3): call a closure on a fixed
//! interval, optionally emitting once immediately before the first tick.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::warn;

/// Spawn a polling loop. `poll_fn` is awaited once per tick and its result
/// forwarded to `on_tick`; a poll that returns `Err` is reported via
/// `on_tick` the same as a success, since errors are values on a watch
/// stream, not stream termination (`spec.md` §3).
///
/// Returns a cancellation handle: dropping or calling `.abort()` on it stops
/// the loop. `emit_on_begin` mirrors the original API's flag of the same
/// name — when set, the first poll fires immediately instead of waiting out
/// one full interval.
pub fn spawn_poller<F, Fut, T, E>(
    period: Duration,
    emit_on_begin: bool,
    mut poll_fn: F,
    mut on_tick: impl FnMut(Result<T, E>) + Send + 'static,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
{
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if emit_on_begin {
            on_tick(poll_fn().await);
        } else {
            tick.tick().await;
        }

        loop {
            tick.tick().await;
            on_tick(poll_fn().await);
        }
    })
}

/// A cooperative stop flag for polling loops that need an explicit shutdown
/// signal distinct from dropping the `JoinHandle` (e.g. when the loop also
/// owns cleanup state it must run before exiting).
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `poll_fn` on an interval until `stop` is set, reporting an internal
/// panic-proofed message if `poll_fn` itself errors out unrecoverably.
pub async fn poll_until_stopped<F, Fut, T, E>(
    period: Duration,
    stop: StopFlag,
    mut poll_fn: F,
    on_tick: impl Fn(Result<T, E>),
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while !stop.is_stopped() {
        tick.tick().await;
        if stop.is_stopped() {
            break;
        }
        on_tick(poll_fn().await);
    }
    warn!("poll loop stopped");
}
