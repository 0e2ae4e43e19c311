//! Polling fallback scheduler.
//!
//! Bounds staleness while push delivery is unavailable: a fixed-interval
//! timer that only exists while the transport is not `Connected`, plus an
//! immediate refresh on focus regain that leaves the timer phase alone.

use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Refresh;
use crate::transport::ConnectionState;

/// Spawn the fallback poller for one sync instance.
///
/// The task ends when `cancel` fires. The first tick lands one `period`
/// after the transport is seen disconnected; moving between non-connected
/// states (`Connecting` ↔ `Disconnected`) keeps the running timer.
pub fn spawn_fallback_poller<R: Refresh>(
    refresh: R,
    mut state: watch::Receiver<ConnectionState>,
    mut focus: broadcast::Receiver<()>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker: Option<Interval> = None;
        let mut state_open = true;
        let mut focus_open = true;

        loop {
            let connected = *state.borrow_and_update() == ConnectionState::Connected;
            if connected {
                if ticker.take().is_some() {
                    tracing::debug!(
                        source = refresh.label(),
                        "Push connected, fallback polling stopped"
                    );
                }
            } else if ticker.is_none() {
                let mut t = interval_at(Instant::now() + period, period);
                t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker = Some(t);
                tracing::debug!(
                    source = refresh.label(),
                    period_ms = period.as_millis() as u64,
                    "Push unavailable, fallback polling started"
                );
            }

            let refresh_now = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state.changed(), if state_open => {
                    if changed.is_err() {
                        state_open = false;
                    }
                    false
                }
                _ = next_tick(&mut ticker) => true,
                event = focus.recv(), if focus_open => match event {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => !connected,
                    Err(broadcast::error::RecvError::Closed) => {
                        focus_open = false;
                        false
                    }
                },
            };

            if refresh_now {
                tracing::trace!(source = refresh.label(), "Fallback refresh");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = refresh.refresh_background() => {}
                }
            }
        }

        tracing::debug!(source = refresh.label(), "Fallback poller stopped");
    })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_millis(5000);

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicUsize>);

    impl Counter {
        fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Refresh for Counter {
        async fn refresh_background(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn label(&self) -> &'static str {
            "test"
        }
    }

    struct Harness {
        counter: Counter,
        state: watch::Sender<ConnectionState>,
        focus: broadcast::Sender<()>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(initial: ConnectionState) -> Harness {
        let counter = Counter::default();
        let (state, state_rx) = watch::channel(initial);
        let (focus, focus_rx) = broadcast::channel(4);
        let cancel = CancellationToken::new();
        let task =
            spawn_fallback_poller(counter.clone(), state_rx, focus_rx, PERIOD, cancel.clone());
        Harness {
            counter,
            state,
            focus,
            cancel,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_period_while_disconnected() {
        let h = start(ConnectionState::Disconnected);

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(h.counter.get(), 0);

        sleep(Duration::from_millis(5500)).await;
        assert_eq!(h.counter.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_polling_while_connected() {
        let h = start(ConnectionState::Connected);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.counter.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_connect_and_restarts_on_disconnect() {
        let h = start(ConnectionState::Disconnected);
        sleep(Duration::from_millis(5500)).await;
        assert_eq!(h.counter.get(), 1);

        h.state.send_replace(ConnectionState::Connected);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.counter.get(), 1);

        h.state.send_replace(ConnectionState::Disconnected);
        sleep(Duration::from_millis(5500)).await;
        assert_eq!(h.counter.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_to_disconnected_keeps_timer_phase() {
        let h = start(ConnectionState::Connecting);
        sleep(Duration::from_millis(3000)).await;

        h.state.send_replace(ConnectionState::Disconnected);
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.counter.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_refreshes_immediately_without_resetting_timer() {
        let h = start(ConnectionState::Disconnected);
        sleep(Duration::from_millis(2000)).await;

        h.focus.send(()).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.counter.get(), 1);

        // Original tick at 5000 ms still fires.
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.counter.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_ignored_while_connected() {
        let h = start(ConnectionState::Connected);

        h.focus.send(()).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.counter.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_task() {
        let h = start(ConnectionState::Disconnected);
        h.cancel.cancel();
        h.task.await.unwrap();

        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.counter.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_after_state_sender_dropped() {
        let h = start(ConnectionState::Disconnected);
        drop(h.state);

        sleep(Duration::from_millis(5500)).await;
        assert_eq!(h.counter.get(), 1);
    }
}
