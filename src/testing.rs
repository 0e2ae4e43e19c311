//! In-memory collaborators shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};

use crate::api::{DiscussionRole, LmsApi};
use crate::discussion::DiscussionMessage;
use crate::error::{Result, SyncError};
use crate::notifications::NotificationEvent;
use crate::transport::{ConnectionState, Delivery, PushChannel};

fn server_error() -> SyncError {
    SyncError::Status {
        status: 500,
        body: "boom".into(),
    }
}

async fn wait_until(counter: &AtomicUsize, n: usize) {
    while counter.load(Ordering::SeqCst) < n {
        tokio::task::yield_now().await;
    }
}

// ── LmsApi ───────────────────────────────────────────────────────

type Post = (i64, DiscussionRole, String, Option<i64>);

#[derive(Default)]
pub struct FakeApi {
    notifications: Mutex<(Vec<NotificationEvent>, u64)>,
    notification_gate: Mutex<Option<Arc<Notify>>>,
    fail_notifications: AtomicBool,
    failing_mark_read: Mutex<HashSet<i64>>,
    marked_read: Mutex<Vec<i64>>,
    list_calls: AtomicUsize,
    count_calls: AtomicUsize,

    discussion: Mutex<Vec<DiscussionMessage>>,
    scripted_discussion: Mutex<VecDeque<(Vec<DiscussionMessage>, Arc<Notify>)>>,
    fail_discussion: AtomicBool,
    fail_posts: AtomicBool,
    discussion_calls: AtomicUsize,
    posts: Mutex<Vec<Post>>,
    pins: Mutex<Vec<(i64, i64)>>,
    best_answers: Mutex<Vec<(i64, i64)>>,
}

impl FakeApi {
    pub fn set_notifications(&self, items: Vec<NotificationEvent>, unread: u64) {
        *self.notifications.lock() = (items, unread);
    }

    /// The next list fetch blocks until the returned gate is notified.
    pub fn hold_notification_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.notification_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_notification_fetches(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mark_read(&self, id: i64) {
        self.failing_mark_read.lock().insert(id);
    }

    pub fn marked_read(&self) -> Vec<i64> {
        self.marked_read.lock().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_list_calls(&self, n: usize) {
        wait_until(&self.list_calls, n).await;
    }

    pub fn set_discussion(&self, messages: Vec<DiscussionMessage>) {
        *self.discussion.lock() = messages;
    }

    /// Queue a one-shot discussion response released by the returned gate.
    pub fn script_discussion(&self, messages: Vec<DiscussionMessage>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.scripted_discussion
            .lock()
            .push_back((messages, Arc::clone(&gate)));
        gate
    }

    pub fn fail_discussion(&self, fail: bool) {
        self.fail_discussion.store(fail, Ordering::SeqCst);
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub fn discussion_calls(&self) -> usize {
        self.discussion_calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_discussion_calls(&self, n: usize) {
        wait_until(&self.discussion_calls, n).await;
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().clone()
    }

    pub fn pins(&self) -> Vec<(i64, i64)> {
        self.pins.lock().clone()
    }

    pub fn best_answers(&self) -> Vec<(i64, i64)> {
        self.best_answers.lock().clone()
    }
}

#[async_trait]
impl LmsApi for FakeApi {
    async fn notifications(&self) -> Result<Vec<NotificationEvent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.notification_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(self.notifications.lock().0.clone())
    }

    async fn unread_count(&self) -> Result<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(self.notifications.lock().1)
    }

    async fn mark_notification_read(&self, id: i64) -> Result<()> {
        if self.failing_mark_read.lock().contains(&id) {
            return Err(server_error());
        }
        self.marked_read.lock().push(id);
        Ok(())
    }

    async fn discussion(
        &self,
        _course_id: i64,
        _role: DiscussionRole,
    ) -> Result<Vec<DiscussionMessage>> {
        self.discussion_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted_discussion.lock().pop_front();
        if let Some((messages, gate)) = scripted {
            gate.notified().await;
            return Ok(messages);
        }
        if self.fail_discussion.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(self.discussion.lock().clone())
    }

    async fn post_discussion(
        &self,
        course_id: i64,
        role: DiscussionRole,
        content: &str,
        parent_id: Option<i64>,
    ) -> Result<()> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        self.posts
            .lock()
            .push((course_id, role, content.to_string(), parent_id));
        Ok(())
    }

    async fn toggle_pin(&self, course_id: i64, message_id: i64) -> Result<()> {
        self.pins.lock().push((course_id, message_id));
        Ok(())
    }

    async fn toggle_best_answer(&self, course_id: i64, message_id: i64) -> Result<()> {
        self.best_answers.lock().push((course_id, message_id));
        Ok(())
    }
}

// ── PushChannel ──────────────────────────────────────────────────

/// Push channel driven by the test: state changes and deliveries are
/// injected by hand.
pub struct FakePush {
    state: watch::Sender<ConnectionState>,
    deliveries: Mutex<Option<mpsc::Sender<Delivery>>>,
    topics: Mutex<Vec<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Default for FakePush {
    fn default() -> Self {
        Self {
            state: watch::Sender::new(ConnectionState::Disconnected),
            deliveries: Mutex::new(None),
            topics: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }
}

impl FakePush {
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub async fn deliver(&self, destination: &str, body: &str) {
        let tx = self.deliveries.lock().clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(Delivery {
                    destination: destination.into(),
                    body: body.into(),
                })
                .await;
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl PushChannel for FakePush {
    fn connect(&self, topics: Vec<String>, deliveries: mpsc::Sender<Delivery>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.topics.lock() = topics;
        *self.deliveries.lock() = Some(deliveries);
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.deliveries.lock().take();
        self.state.send_replace(ConnectionState::Disconnected);
    }
}
