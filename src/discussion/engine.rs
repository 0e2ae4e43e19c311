//! Discussion reconciliation engine.
//!
//! Every relevant event (initial open, push signal, own post, moderation
//! toggle, fallback poll) becomes a full re-fetch. Loads may overlap; each is
//! stamped with a generation and only the newest completed one is kept, so a
//! slow early response can never overwrite a fresher tree.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::{thread, DiscussionMessage, DiscussionView};
use crate::api::{DiscussionRole, LmsApi};
use crate::error::{Result, SyncError};
use crate::sync::{Refresh, RefreshOutcome, SyncPhase};

const COMMAND_BUFFER: usize = 64;

// ── Store ────────────────────────────────────────────────────────

/// Tree state plus generation bookkeeping for one course/role pair.
#[derive(Debug)]
pub struct ThreadStore {
    threads: Vec<DiscussionMessage>,
    participants: Vec<String>,
    phase: SyncPhase,
    in_flight: usize,
    loaders_in_flight: usize,
    next_generation: u64,
    applied_generation: u64,
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadStore {
    pub fn new() -> Self {
        Self {
            threads: Vec::new(),
            participants: Vec::new(),
            phase: SyncPhase::Uninitialized,
            in_flight: 0,
            loaders_in_flight: 0,
            next_generation: 0,
            applied_generation: 0,
        }
    }

    /// Stamp a new load. Overlapping loads are allowed.
    pub fn begin_load(&mut self, show_loader: bool) -> u64 {
        self.in_flight += 1;
        if show_loader {
            self.loaders_in_flight += 1;
        }
        self.phase = SyncPhase::Loading;
        self.next_generation += 1;
        self.next_generation
    }

    /// Settle the load stamped `generation`. `threads` must already be
    /// normalized.
    pub fn finish_load(
        &mut self,
        generation: u64,
        show_loader: bool,
        result: Result<Vec<DiscussionMessage>>,
    ) -> RefreshOutcome {
        self.in_flight = self.in_flight.saturating_sub(1);
        if show_loader {
            self.loaders_in_flight = self.loaders_in_flight.saturating_sub(1);
        }
        if self.in_flight == 0 {
            self.phase = SyncPhase::Ready;
        }

        match result {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    generation,
                    error = %e,
                    "Discussion load failed, keeping previous thread"
                );
                RefreshOutcome::Failed
            }
            Err(e) => {
                tracing::error!(
                    generation,
                    error = %e,
                    "Discussion load rejected, keeping previous thread"
                );
                RefreshOutcome::Failed
            }
            Ok(_) if generation <= self.applied_generation => {
                tracing::debug!(
                    generation,
                    applied = self.applied_generation,
                    "Dropping stale discussion load"
                );
                RefreshOutcome::Stale
            }
            Ok(threads) => {
                self.participants = thread::participant_names(&threads);
                self.threads = threads;
                self.applied_generation = generation;
                RefreshOutcome::Applied
            }
        }
    }

    pub fn view(&self) -> DiscussionView {
        DiscussionView {
            phase: self.phase,
            loading: self.loaders_in_flight > 0,
            threads: self.threads.clone(),
            participants: self.participants.clone(),
        }
    }
}

// ── Engine task ──────────────────────────────────────────────────

struct LoadRequest {
    show_loader: bool,
    reply: Option<oneshot::Sender<RefreshOutcome>>,
}

struct Loaded {
    generation: u64,
    show_loader: bool,
    result: Result<Vec<DiscussionMessage>>,
}

/// Owner task for one [`ThreadStore`].
pub struct DiscussionEngine {
    store: ThreadStore,
    api: Arc<dyn LmsApi>,
    course_id: i64,
    role: DiscussionRole,
    view_tx: watch::Sender<DiscussionView>,
    loaded_tx: mpsc::UnboundedSender<Loaded>,
    replies: HashMap<u64, oneshot::Sender<RefreshOutcome>>,
}

impl DiscussionEngine {
    /// Spawn the owner task for `course_id` seen as `role`.
    pub fn spawn(
        api: Arc<dyn LmsApi>,
        course_id: i64,
        role: DiscussionRole,
        cancel: CancellationToken,
    ) -> DiscussionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();
        let store = ThreadStore::new();
        let (view_tx, view_rx) = watch::channel(store.view());

        let engine = Self {
            store,
            api: Arc::clone(&api),
            course_id,
            role,
            view_tx,
            loaded_tx,
            replies: HashMap::new(),
        };
        tokio::spawn(engine.run(commands_rx, loaded_rx, cancel));

        DiscussionHandle {
            commands: commands_tx,
            view: view_rx,
            api,
            course_id,
            role,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<LoadRequest>,
        mut loaded: mpsc::UnboundedReceiver<Loaded>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(done) = loaded.recv() => self.on_loaded(done),
                request = commands.recv() => match request {
                    Some(request) => self.on_load(request),
                    None => break,
                },
            }
        }
        tracing::debug!(course_id = self.course_id, "Discussion engine stopped");
    }

    fn on_load(&mut self, request: LoadRequest) {
        let generation = self.store.begin_load(request.show_loader);
        if let Some(reply) = request.reply {
            self.replies.insert(generation, reply);
        }
        self.publish();

        let api = Arc::clone(&self.api);
        let tx = self.loaded_tx.clone();
        let (course_id, role, show_loader) = (self.course_id, self.role, request.show_loader);
        tokio::spawn(async move {
            let result = api.discussion(course_id, role).await.map(thread::normalize);
            let _ = tx.send(Loaded {
                generation,
                show_loader,
                result,
            });
        });
    }

    fn on_loaded(&mut self, done: Loaded) {
        let outcome = self.store.finish_load(done.generation, done.show_loader, done.result);
        self.publish();
        if let Some(reply) = self.replies.remove(&done.generation) {
            let _ = reply.send(outcome);
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.store.view());
    }
}

// ── Handle ───────────────────────────────────────────────────────

/// Cloneable front door to a running [`DiscussionEngine`].
#[derive(Clone)]
pub struct DiscussionHandle {
    commands: mpsc::Sender<LoadRequest>,
    view: watch::Receiver<DiscussionView>,
    api: Arc<dyn LmsApi>,
    course_id: i64,
    role: DiscussionRole,
}

impl DiscussionHandle {
    pub fn course_id(&self) -> i64 {
        self.course_id
    }

    pub fn role(&self) -> DiscussionRole {
        self.role
    }

    /// Full re-fetch. `show_loader = false` for live updates so observers do
    /// not flash a loading state.
    pub async fn load_thread(&self, show_loader: bool) -> Result<RefreshOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LoadRequest {
                show_loader,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SyncError::EngineClosed)?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }

    /// Queue a re-fetch without waiting for it.
    pub fn request_load(&self, show_loader: bool) {
        if let Err(e) = self.commands.try_send(LoadRequest {
            show_loader,
            reply: None,
        }) {
            tracing::debug!(
                course_id = self.course_id,
                error = %e,
                "Could not queue discussion load"
            );
        }
    }

    /// Post a new thread root (`parent_id = None`) or a reply, then reload.
    pub async fn post_message(&self, content: &str, parent_id: Option<i64>) -> Result<()> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        self.api
            .post_discussion(self.course_id, self.role, trimmed, parent_id)
            .await?;
        self.load_thread(false).await?;
        Ok(())
    }

    /// Toggle the pin flag of a thread root. Instructor only.
    pub async fn toggle_pin(&self, message_id: i64) -> Result<()> {
        self.require_instructor("pinning")?;
        self.api.toggle_pin(self.course_id, message_id).await?;
        self.load_thread(false).await?;
        Ok(())
    }

    /// Toggle the best-answer flag of a reply. Instructor only.
    pub async fn toggle_best_answer(&self, message_id: i64) -> Result<()> {
        self.require_instructor("marking a best answer")?;
        self.api.toggle_best_answer(self.course_id, message_id).await?;
        self.load_thread(false).await?;
        Ok(())
    }

    pub fn view(&self) -> DiscussionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscussionView> {
        self.view.clone()
    }

    fn require_instructor(&self, action: &'static str) -> Result<()> {
        if self.role == DiscussionRole::Instructor {
            Ok(())
        } else {
            Err(SyncError::NotPermitted(action))
        }
    }
}

#[async_trait]
impl Refresh for DiscussionHandle {
    async fn refresh_background(&self) {
        let _ = self.load_thread(false).await;
    }

    fn label(&self) -> &'static str {
        "discussion"
    }
}
