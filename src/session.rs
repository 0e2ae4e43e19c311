//! Authenticated-user session record.
//!
//! The record is written at login by the (external) auth flow and read by
//! the binary, which hands the role and identifiers to the sync core
//! explicitly. Nothing in `notifications`, `discussion` or `sync` reads
//! this store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the session record inside the config directory.
pub const SESSION_FILE: &str = "session.json";

/// Role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Student,
    Instructor,
    Admin,
}

/// Approval state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Pending,
    Deactive,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Pending => "PENDING",
            Self::Deactive => "DEACTIVE",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: i64,
    pub user_name: String,
    pub role: UserRole,
    #[serde(default)]
    pub avatar_url: String,
    pub status: AccountStatus,
}

/// JSON-file backed session store.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store rooted in the given config directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current session. A corrupt record is deleted and treated as absent.
    pub fn load(&self) -> Option<SessionUser> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Discarding corrupt session record"
                );
                let _ = std::fs::remove_file(&self.path);
                None
            }
        }
    }

    pub fn save(&self, user: &SessionUser) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(user)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    /// Rewrite only the status field; no-op when no session exists.
    pub fn update_status(&self, status: AccountStatus) -> anyhow::Result<()> {
        let Some(mut user) = self.load() else {
            return Ok(());
        };
        user.status = status;
        self.save(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> SessionUser {
        SessionUser {
            id: 42,
            user_name: "Joan Doe".into(),
            role: UserRole::Student,
            avatar_url: "/avatars/42.png".into(),
            status: AccountStatus::Active,
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        store.save(&sample_user()).unwrap();
        assert_eq!(store.load(), Some(sample_user()));
    }

    #[test]
    fn record_uses_browser_field_names() {
        let json = serde_json::to_value(sample_user()).unwrap();
        assert_eq!(json["userName"], "Joan Doe");
        assert_eq!(json["role"], "STUDENT");
        assert_eq!(json["avatarUrl"], "/avatars/42.png");
    }

    #[test]
    fn corrupt_record_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(store.load().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn update_status_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        store.save(&sample_user()).unwrap();

        store.update_status(AccountStatus::Pending).unwrap();

        let user = store.load().unwrap();
        assert_eq!(user.status, AccountStatus::Pending);
        assert_eq!(user.user_name, "Joan Doe");
    }

    #[test]
    fn update_status_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(dir.path());
        store.update_status(AccountStatus::Deactive).unwrap();
        assert!(store.load().is_none());
    }
}
