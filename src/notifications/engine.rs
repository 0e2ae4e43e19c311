//! Notification reconciliation engine.
//!
//! Three sources feed the same list: push events from the broker,
//! snapshot refreshes (initial load, fallback polling, decode-failure
//! compensation) and local read mutations. [`NotificationStore`] holds the
//! merge rules; [`NotificationEngine`] runs it inside a single owner task so
//! the rules never race.
//!
//! ## Ordering
//! - A snapshot request while another is in flight is dropped
//!   ([`RefreshOutcome::Skipped`]) and issues no network calls
//! - Every snapshot carries a generation; only a generation newer than the
//!   last applied one may replace the list
//! - Push ingestion is idempotent by id, and only an actual insert bumps
//!   the unread count

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::{NotificationEvent, NotificationPayload, NotificationView};
use crate::api::LmsApi;
use crate::error::{Result, SyncError};
use crate::sync::{Refresh, RefreshOutcome, SyncPhase};

/// Command queue depth for the engine task.
const COMMAND_BUFFER: usize = 256;

/// Server-authoritative state returned by one snapshot fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub items: Vec<NotificationEvent>,
    pub unread_count: u64,
}

// ── Store (merge rules) ──────────────────────────────────────────

/// The in-memory model plus its merge rules. Synchronous and owned by
/// exactly one engine task.
#[derive(Debug)]
pub struct NotificationStore {
    items: Vec<NotificationEvent>,
    unread_count: u64,
    phase: SyncPhase,
    loading: bool,
    in_flight: bool,
    next_generation: u64,
    applied_generation: u64,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            unread_count: 0,
            phase: SyncPhase::Uninitialized,
            loading: false,
            in_flight: false,
            next_generation: 0,
            applied_generation: 0,
        }
    }

    /// Reserve a generation for a new snapshot fetch, or `None` when one is
    /// already in flight.
    pub fn begin_snapshot(&mut self, show_loader: bool) -> Option<u64> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        self.loading = show_loader;
        self.phase = SyncPhase::Loading;
        self.next_generation += 1;
        Some(self.next_generation)
    }

    /// Apply (or discard) the result of the fetch stamped `generation`.
    pub fn finish_snapshot(&mut self, generation: u64, result: Result<Snapshot>) -> RefreshOutcome {
        self.in_flight = false;
        self.loading = false;
        self.phase = SyncPhase::Ready;

        match result {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    generation,
                    error = %e,
                    "Notification snapshot failed, keeping previous state"
                );
                RefreshOutcome::Failed
            }
            Err(e) => {
                tracing::error!(
                    generation,
                    error = %e,
                    "Notification snapshot rejected, keeping previous state"
                );
                RefreshOutcome::Failed
            }
            Ok(_) if generation <= self.applied_generation => {
                tracing::debug!(
                    generation,
                    applied = self.applied_generation,
                    "Dropping stale notification snapshot"
                );
                RefreshOutcome::Stale
            }
            Ok(snapshot) => {
                self.items = snapshot.items;
                self.unread_count = snapshot.unread_count;
                self.applied_generation = generation;
                RefreshOutcome::Applied
            }
        }
    }

    /// Prepend a pushed event unless its id is already present.
    /// Returns whether an insert happened.
    pub fn ingest(&mut self, event: NotificationEvent) -> bool {
        if self.items.iter().any(|n| n.id == event.id) {
            tracing::debug!(id = event.id, "Duplicate notification push ignored");
            return false;
        }
        self.items.insert(0, event);
        self.unread_count += 1;
        true
    }

    /// Local effect of a persisted mark-read.
    pub fn apply_read(&mut self, id: i64) {
        if let Some(item) = self.items.iter_mut().find(|n| n.id == id) {
            item.read = true;
        }
        self.unread_count = self.unread_count.saturating_sub(1);
    }

    /// Local effect of mark-all-read, applied as one batch.
    pub fn apply_all_read(&mut self) {
        for item in &mut self.items {
            item.read = true;
        }
        self.unread_count = 0;
    }

    pub fn view(&self) -> NotificationView {
        NotificationView {
            phase: self.phase,
            loading: self.loading,
            items: self.items.clone(),
            unread_count: self.unread_count,
        }
    }
}

// ── Engine task ──────────────────────────────────────────────────

enum Command {
    Refresh {
        show_loader: bool,
        reply: Option<oneshot::Sender<RefreshOutcome>>,
    },
    Push {
        payload: NotificationPayload,
        reply: oneshot::Sender<bool>,
    },
    ApplyRead {
        id: i64,
        reply: oneshot::Sender<()>,
    },
    ApplyAllRead {
        reply: oneshot::Sender<()>,
    },
}

struct Fetched {
    generation: u64,
    result: Result<Snapshot>,
}

/// Owner task for one [`NotificationStore`].
pub struct NotificationEngine {
    store: NotificationStore,
    api: Arc<dyn LmsApi>,
    view_tx: watch::Sender<NotificationView>,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
    pending_reply: Option<oneshot::Sender<RefreshOutcome>>,
}

impl NotificationEngine {
    /// Spawn the owner task. It runs until `cancel` fires or every handle
    /// is dropped.
    pub fn spawn(api: Arc<dyn LmsApi>, cancel: CancellationToken) -> NotificationHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();
        let store = NotificationStore::new();
        let (view_tx, view_rx) = watch::channel(store.view());

        let engine = Self {
            store,
            api: Arc::clone(&api),
            view_tx,
            fetched_tx,
            pending_reply: None,
        };
        tokio::spawn(engine.run(commands_rx, fetched_rx, cancel));

        NotificationHandle {
            commands: commands_tx,
            view: view_rx,
            api,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut fetched: mpsc::UnboundedReceiver<Fetched>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(done) = fetched.recv() => self.on_fetched(done),
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
        }
        tracing::debug!("Notification engine stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh { show_loader, reply } => {
                match self.store.begin_snapshot(show_loader) {
                    Some(generation) => {
                        self.pending_reply = reply;
                        self.publish();
                        self.spawn_fetch(generation);
                    }
                    None => {
                        tracing::debug!("Notification snapshot in flight, dropping request");
                        if let Some(reply) = reply {
                            let _ = reply.send(RefreshOutcome::Skipped);
                        }
                    }
                }
            }
            Command::Push { payload, reply } => {
                let inserted = self.store.ingest(payload.into_event(Utc::now()));
                if inserted {
                    self.publish();
                }
                let _ = reply.send(inserted);
            }
            Command::ApplyRead { id, reply } => {
                self.store.apply_read(id);
                self.publish();
                let _ = reply.send(());
            }
            Command::ApplyAllRead { reply } => {
                self.store.apply_all_read();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn on_fetched(&mut self, done: Fetched) {
        let outcome = self.store.finish_snapshot(done.generation, done.result);
        self.publish();
        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(outcome);
        }
    }

    fn spawn_fetch(&self, generation: u64) {
        let api = Arc::clone(&self.api);
        let tx = self.fetched_tx.clone();
        tokio::spawn(async move {
            let result = tokio::try_join!(api.notifications(), api.unread_count())
                .map(|(items, unread_count)| Snapshot { items, unread_count });
            let _ = tx.send(Fetched { generation, result });
        });
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.store.view());
    }
}

// ── Handle ───────────────────────────────────────────────────────

/// Cloneable front door to a running [`NotificationEngine`].
#[derive(Clone)]
pub struct NotificationHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<NotificationView>,
    api: Arc<dyn LmsApi>,
}

impl NotificationHandle {
    /// Full snapshot with the loader shown (initial load).
    pub async fn load_snapshot(&self) -> Result<RefreshOutcome> {
        self.refresh(true).await
    }

    /// Request a snapshot and wait for its outcome.
    pub async fn refresh(&self, show_loader: bool) -> Result<RefreshOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Refresh {
            show_loader,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }

    /// Queue a snapshot without waiting for it.
    pub fn request_refresh(&self, show_loader: bool) {
        if let Err(e) = self.commands.try_send(Command::Refresh {
            show_loader,
            reply: None,
        }) {
            tracing::debug!(error = %e, "Could not queue notification refresh");
        }
    }

    /// Merge one push payload. Returns whether it was new.
    pub async fn ingest_push(&self, payload: NotificationPayload) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Push { payload, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }

    /// Persist, then flip the local read flag. On failure nothing changes.
    pub async fn mark_read(&self, id: i64) -> Result<()> {
        self.api.mark_notification_read(id).await?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::ApplyRead { id, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }

    /// Persist every currently unread id in parallel, then mark everything
    /// read in one batch. Individual failures are logged and do not stop
    /// the batch; the next snapshot corrects any divergence.
    pub async fn mark_all_read(&self) -> Result<usize> {
        let ids = self.view.borrow().unread_ids();
        if ids.is_empty() {
            return Ok(0);
        }

        let calls = ids.iter().map(|&id| self.api.mark_notification_read(id));
        let results = futures_util::future::join_all(calls).await;
        for (id, result) in ids.iter().zip(&results) {
            if let Err(e) = result {
                tracing::warn!(id, error = %e, "Mark-read failed during mark-all");
            }
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::ApplyAllRead { reply }).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)?;
        Ok(ids.len())
    }

    /// Current view.
    pub fn view(&self) -> NotificationView {
        self.view.borrow().clone()
    }

    /// Observer channel; every model change publishes a new view.
    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.view.clone()
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).await.map_err(|_| SyncError::EngineClosed)
    }
}

#[async_trait]
impl Refresh for NotificationHandle {
    async fn refresh_background(&self) {
        let _ = self.refresh(false).await;
    }

    fn label(&self) -> &'static str {
        "notifications"
    }
}

// ── Tests ───────────────────────────────────────────────────────
