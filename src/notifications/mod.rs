//! Notification model and its reconciliation engine.
//!
//! ## Design
//! - One engine task per session owns the list and the unread count
//! - The unread count is authoritative server state adjusted
//!   incrementally; it is never recomputed from the (possibly truncated) list
//! - Push events merge by id; snapshots replace wholesale
//! - Observers read [`NotificationView`] snapshots from a `watch` channel

pub mod engine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::SyncPhase;

#[allow(unused_imports)]
pub use engine::{NotificationEngine, NotificationHandle, NotificationStore, Snapshot};

/// Number of entries shown in the compact (bell) preview.
pub const PREVIEW_LEN: usize = 6;

/// Unread counts above this are shown as `99+`.
const BADGE_CAP: u64 = 99;

// ── Model ────────────────────────────────────────────────────────

/// A single notification as held in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: i64,
    pub message: String,
    pub event_type: String,
    #[serde(default)]
    pub reference_id: Option<i64>,
    #[serde(with = "crate::api::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Push payload from the private notification queue. Carries neither a
/// timestamp nor a read flag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: i64,
    pub message: String,
    pub event_type: String,
    #[serde(default)]
    pub reference_id: Option<i64>,
}

impl NotificationPayload {
    /// Build the in-memory event, stamped with the arrival time and unread.
    pub fn into_event(self, arrived_at: DateTime<Utc>) -> NotificationEvent {
        NotificationEvent {
            id: self.id,
            message: self.message,
            event_type: self.event_type,
            reference_id: self.reference_id,
            created_at: arrived_at,
            read: false,
        }
    }
}

// ── View ─────────────────────────────────────────────────────────

/// Read-only snapshot handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationView {
    pub phase: SyncPhase,
    /// A loader-visible refresh is in flight.
    pub loading: bool,
    pub items: Vec<NotificationEvent>,
    pub unread_count: u64,
}

impl Default for NotificationView {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            loading: false,
            items: Vec::new(),
            unread_count: 0,
        }
    }
}

impl NotificationView {
    /// Badge label: the count, or `99+` past the cap.
    pub fn badge_text(&self) -> String {
        if self.unread_count > BADGE_CAP {
            format!("{BADGE_CAP}+")
        } else {
            self.unread_count.to_string()
        }
    }

    /// Newest entries for the compact dropdown.
    pub fn preview(&self) -> &[NotificationEvent] {
        &self.items[..self.items.len().min(PREVIEW_LEN)]
    }

    /// Ids of entries not yet read, in list order.
    pub fn unread_ids(&self) -> Vec<i64> {
        self.items.iter().filter(|n| !n.read).map(|n| n.id).collect()
    }
}
