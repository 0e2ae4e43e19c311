//! Sync coordinators: one per owning scope.
//!
//! A coordinator wires a push channel, an engine and a fallback poller
//! together and owns their lifetime. Dropping it (or calling `shutdown`)
//! disconnects the transport and stops every task it spawned; in-flight
//! fetches may still finish but their results no longer reach anyone.
//!
//! ## Responsibilities
//!
//! - Subscribe the push channel to the scope's topic
//! - Pump deliveries into the engine (decode failures become snapshots)
//! - Run the fallback poller over the channel's connection state
//! - Kick off the initial loader-visible load

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{poller::spawn_fallback_poller, FocusEvents};
use crate::api::{DiscussionRole, LmsApi};
use crate::discussion::{DiscussionEngine, DiscussionHandle};
use crate::notifications::{NotificationEngine, NotificationHandle, NotificationPayload};
use crate::transport::{ConnectionState, Delivery, PushChannel};

/// Private per-user queue carrying notification payloads.
pub const NOTIFICATION_TOPIC: &str = "/user/queue/notifications";

const DELIVERY_BUFFER: usize = 64;

/// Per-course topic whose messages only mean "something changed".
pub fn discussion_topic(course_id: i64) -> String {
    format!("/topic/course/{course_id}/discussion")
}

/// Teardown shared by both coordinators.
struct Scope {
    push: Arc<dyn PushChannel>,
    cancel: CancellationToken,
}

impl Scope {
    fn new(push: Arc<dyn PushChannel>) -> Self {
        Self {
            push,
            cancel: CancellationToken::new(),
        }
    }

    fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.push.disconnect();
        self.cancel.cancel();
    }
}

// ── Notifications ────────────────────────────────────────────────

/// Notification sync for one authenticated session.
pub struct NotificationSync {
    handle: NotificationHandle,
    scope: Scope,
}

impl NotificationSync {
    pub fn start(
        api: Arc<dyn LmsApi>,
        push: Arc<dyn PushChannel>,
        focus: &FocusEvents,
        poll_interval: Duration,
    ) -> Self {
        let scope = Scope::new(push);
        let handle = NotificationEngine::spawn(api, scope.cancel.clone());

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        scope.push.connect(vec![NOTIFICATION_TOPIC.to_string()], tx);
        tokio::spawn(pump_notifications(handle.clone(), rx, scope.cancel.clone()));
        spawn_fallback_poller(
            handle.clone(),
            scope.push.state(),
            focus.subscribe(),
            poll_interval,
            scope.cancel.clone(),
        );
        handle.request_refresh(true);

        tracing::info!(topic = NOTIFICATION_TOPIC, "Notification sync started");
        Self { handle, scope }
    }

    pub fn handle(&self) -> &NotificationHandle {
        &self.handle
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.scope.push.state()
    }

    /// Disconnect and stop all tasks. Idempotent.
    pub fn shutdown(&self) {
        self.scope.shutdown();
    }
}

impl Drop for NotificationSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump_notifications(
    handle: NotificationHandle,
    mut rx: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = rx.recv() => match delivery {
                Some(d) => d,
                None => break,
            },
        };

        match serde_json::from_str::<NotificationPayload>(&delivery.body) {
            Ok(payload) => {
                let id = payload.id;
                match handle.ingest_push(payload).await {
                    Ok(true) => tracing::debug!(id, "Notification pushed"),
                    Ok(false) => {}
                    Err(_) => break,
                }
            }
            Err(e) => {
                tracing::warn!(
                    destination = %delivery.destination,
                    error = %e,
                    "Malformed notification push, requesting snapshot"
                );
                handle.request_refresh(true);
            }
        }
    }
    tracing::debug!("Notification pump stopped");
}

// ── Discussion ───────────────────────────────────────────────────

/// Discussion sync for one open course thread.
pub struct DiscussionSync {
    handle: DiscussionHandle,
    scope: Scope,
}

impl DiscussionSync {
    pub fn start(
        api: Arc<dyn LmsApi>,
        push: Arc<dyn PushChannel>,
        focus: &FocusEvents,
        poll_interval: Duration,
        course_id: i64,
        role: DiscussionRole,
    ) -> Self {
        let scope = Scope::new(push);
        let handle = DiscussionEngine::spawn(api, course_id, role, scope.cancel.clone());

        let topic = discussion_topic(course_id);
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        scope.push.connect(vec![topic.clone()], tx);
        tokio::spawn(pump_discussion(handle.clone(), rx, scope.cancel.clone()));
        spawn_fallback_poller(
            handle.clone(),
            scope.push.state(),
            focus.subscribe(),
            poll_interval,
            scope.cancel.clone(),
        );
        handle.request_load(true);

        tracing::info!(course_id, role = %role, topic = %topic, "Discussion sync started");
        Self { handle, scope }
    }

    pub fn handle(&self) -> &DiscussionHandle {
        &self.handle
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.scope.push.state()
    }

    /// Disconnect and stop all tasks. Idempotent.
    pub fn shutdown(&self) {
        self.scope.shutdown();
    }
}

impl Drop for DiscussionSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Message bodies on the course topic are not trusted; any delivery means
/// "re-fetch".
async fn pump_discussion(
    handle: DiscussionHandle,
    mut rx: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = rx.recv() => match delivery {
                Some(d) => {
                    tracing::debug!(
                        course_id = handle.course_id(),
                        destination = %d.destination,
                        "Discussion changed"
                    );
                    handle.request_load(false);
                }
                None => break,
            },
        }
    }
    tracing::debug!(course_id = handle.course_id(), "Discussion pump stopped");
}
