//! Realtime synchronization glue.
//!
//! Both sync instances (notifications, per-course discussion) share the same
//! three layers: a push transport, a reconciliation engine and a polling
//! fallback. This module holds what the layers share plus the coordinators
//! that wire them together for one owning scope.
//!
//! - [`SyncPhase`]: `Uninitialized → Loading → Ready`, no failure state
//! - [`Refresh`]: what the poller needs from an engine
//! - [`FocusEvents`]: out-of-band "attention regained" signal
//! - [`poller`]: fixed-interval snapshots while push is not connected
//! - [`coordinator`]: [`NotificationSync`] and [`DiscussionSync`]

pub mod coordinator;
pub mod poller;

use async_trait::async_trait;
use tokio::sync::broadcast;

#[allow(unused_imports)]
pub use coordinator::{DiscussionSync, NotificationSync};
#[allow(unused_imports)]
pub use poller::spawn_fallback_poller;

/// Lifecycle shared by both reconciliation engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing fetched yet.
    Uninitialized,
    /// A snapshot fetch is in flight.
    Loading,
    /// At least one fetch has completed (successfully or not).
    Ready,
}

/// What happened to a snapshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched snapshot replaced the local model.
    Applied,
    /// Another snapshot was already in flight; nothing was fetched.
    Skipped,
    /// The snapshot arrived after a newer one had been applied.
    Stale,
    /// The fetch failed; the previous model was kept.
    Failed,
}

/// A background snapshot source the fallback poller can drive.
///
/// Errors never reach the poller: implementations log and swallow them.
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
    /// Fetch a full snapshot without showing a loader.
    async fn refresh_background(&self);

    /// Short name for log lines.
    fn label(&self) -> &'static str;
}

/// Broadcast source of focus-regained events (window focus in a browser,
/// `SIGUSR1` in the CLI). Cheap to clone; every subscriber sees every event.
#[derive(Debug, Clone)]
pub struct FocusEvents {
    tx: broadcast::Sender<()>,
}

impl Default for FocusEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Signal that attention came back. No-op when nobody listens.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn focus_reaches_every_subscriber() {
        let focus = FocusEvents::new();
        let mut a = focus.subscribe();
        let mut b = focus.subscribe();

        focus.notify();

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[test]
    fn focus_without_subscribers_is_noop() {
        FocusEvents::new().notify();
    }
}
