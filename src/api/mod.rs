//! Collaborator REST API consumed by the sync core.
//!
//! ## Design
//! - [`LmsApi`] is the seam: engines only see the trait, tests plug in
//!   in-memory fakes, the binary plugs in [`HttpLmsApi`]
//! - Discussion endpoints are selected through the closed [`DiscussionRole`]
//!   variant rather than string branching
//! - Legacy body decoding lives in [`content`], timestamp parsing in
//!   [`timestamp`]

pub mod content;
pub mod http;
pub mod timestamp;

use async_trait::async_trait;
use serde::Deserialize;

use crate::discussion::DiscussionMessage;
use crate::error::Result;
use crate::notifications::NotificationEvent;
use crate::session::UserRole;

#[allow(unused_imports)]
pub use content::decode_content;
#[allow(unused_imports)]
pub use http::HttpLmsApi;

// ── Discussion role ──────────────────────────────────────────────

/// Which side of the course a discussion view is opened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscussionRole {
    Student,
    Instructor,
}

impl DiscussionRole {
    /// Admins have no discussion view.
    pub fn from_user_role(role: UserRole) -> Option<Self> {
        match role {
            UserRole::Student => Some(Self::Student),
            UserRole::Instructor => Some(Self::Instructor),
            UserRole::Admin => None,
        }
    }

    /// Base path of the course discussion for this role.
    pub fn discussion_path(self, course_id: i64) -> String {
        match self {
            Self::Student => format!("/student/course/{course_id}/discussion"),
            Self::Instructor => format!("/instructor/courses/{course_id}/discussion"),
        }
    }

    /// Query parameters for a post. Student replies carry the parent id
    /// twice (`parent-id` and `parentId`) because backend builds disagree
    /// on the name.
    pub fn post_query(self, parent_id: Option<i64>) -> Vec<(&'static str, String)> {
        match (self, parent_id) {
            (_, None) => Vec::new(),
            (Self::Student, Some(id)) => {
                vec![("parent-id", id.to_string()), ("parentId", id.to_string())]
            }
            (Self::Instructor, Some(id)) => vec![("parentId", id.to_string())],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
        }
    }
}

impl std::fmt::Display for DiscussionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiscussionRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "instructor" => Ok(Self::Instructor),
            other => Err(format!("unknown discussion role: {other}")),
        }
    }
}

/// Moderation endpoints are instructor-only and role-independent in shape.
pub fn pin_path(course_id: i64, message_id: i64) -> String {
    format!("/instructor/courses/{course_id}/discussion/{message_id}/pin")
}

pub fn best_answer_path(course_id: i64, message_id: i64) -> String {
    format!("/instructor/courses/{course_id}/discussion/{message_id}/best-answer")
}

// ── Response envelope ────────────────────────────────────────────

/// `{ "success": bool, "data": T }` wrapper used by notification endpoints.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
}

impl<T: Default> ApiResponse<T> {
    /// Missing or null `data` means the empty value.
    pub fn into_data(self) -> T {
        self.data.unwrap_or_default()
    }
}

// ── Collaborator trait ───────────────────────────────────────────

/// Request/response API the engines call into.
#[async_trait]
pub trait LmsApi: Send + Sync {
    /// `GET /notifications`
    async fn notifications(&self) -> Result<Vec<NotificationEvent>>;

    /// `GET /notifications/unread-count`
    async fn unread_count(&self) -> Result<u64>;

    /// `PATCH /notifications/{id}/read` (idempotent)
    async fn mark_notification_read(&self, id: i64) -> Result<()>;

    /// `GET /{role}/course/{courseId}/discussion`, bodies still encoded.
    async fn discussion(
        &self,
        course_id: i64,
        role: DiscussionRole,
    ) -> Result<Vec<DiscussionMessage>>;

    /// `POST` the JSON-encoded `content` string to the discussion path.
    async fn post_discussion(
        &self,
        course_id: i64,
        role: DiscussionRole,
        content: &str,
        parent_id: Option<i64>,
    ) -> Result<()>;

    /// `PATCH .../{messageId}/pin`
    async fn toggle_pin(&self, course_id: i64, message_id: i64) -> Result<()>;

    /// `PATCH .../{messageId}/best-answer`
    async fn toggle_best_answer(&self, course_id: i64, message_id: i64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_role() {
        assert_eq!(DiscussionRole::Student.discussion_path(7), "/student/course/7/discussion");
        assert_eq!(
            DiscussionRole::Instructor.discussion_path(7),
            "/instructor/courses/7/discussion"
        );
        assert_eq!(pin_path(7, 3), "/instructor/courses/7/discussion/3/pin");
        assert_eq!(best_answer_path(7, 3), "/instructor/courses/7/discussion/3/best-answer");
    }

    #[test]
    fn student_reply_sends_both_parent_params() {
        let query = DiscussionRole::Student.post_query(Some(9));
        assert_eq!(
            query,
            vec![("parent-id", "9".to_string()), ("parentId", "9".to_string())]
        );
    }

    #[test]
    fn instructor_reply_sends_single_parent_param() {
        let query = DiscussionRole::Instructor.post_query(Some(9));
        assert_eq!(query, vec![("parentId", "9".to_string())]);
    }

    #[test]
    fn top_level_post_has_no_query() {
        assert!(DiscussionRole::Student.post_query(None).is_empty());
        assert!(DiscussionRole::Instructor.post_query(None).is_empty());
    }

    #[test]
    fn admin_has_no_discussion_role() {
        assert_eq!(DiscussionRole::from_user_role(UserRole::Admin), None);
        assert_eq!(
            DiscussionRole::from_user_role(UserRole::Instructor),
            Some(DiscussionRole::Instructor)
        );
    }

    #[test]
    fn envelope_null_data_is_default() {
        let resp: ApiResponse<Vec<i64>> =
            serde_json::from_str(r#"{"success":true,"data":null}"#).unwrap();
        assert!(resp.into_data().is_empty());
        let resp: ApiResponse<u64> = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(resp.into_data(), 0);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Student".parse::<DiscussionRole>(), Ok(DiscussionRole::Student));
        assert!("admin".parse::<DiscussionRole>().is_err());
    }
}
