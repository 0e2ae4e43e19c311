//! `reqwest` implementation of [`LmsApi`].

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde::de::DeserializeOwned;

use super::{best_answer_path, pin_path, ApiResponse, DiscussionRole, LmsApi};
use crate::config::Config;
use crate::discussion::DiscussionMessage;
use crate::error::{Result, SyncError};
use crate::notifications::NotificationEvent;
use crate::session::AccountStatus;

/// HTTP client for the LMS backend.
pub struct HttpLmsApi {
    base_url: String,
    session_cookie: Option<String>,
    http: reqwest::Client,
}

impl HttpLmsApi {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.http.timeout()).build()?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            session_cookie: config.session_cookie.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the session cookie when configured.
    fn authed(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(cookie) = &self.session_cookie {
            request = request.header(COOKIE, cookie);
        }
        request
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = self.authed(request).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::FORBIDDEN {
            if let Some(account) = classify_forbidden(&body) {
                tracing::warn!(status = %account, "Backend rejected request for account status");
                return Err(SyncError::AccountBlocked(account));
            }
        }
        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_envelope<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        let resp = self.send(self.http.get(self.url(path))).await?;
        let bytes = resp.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.into_data())
    }

    async fn patch_empty(&self, path: &str) -> Result<()> {
        self.send(self.http.patch(self.url(path))).await?;
        Ok(())
    }
}

/// Map a 403 body to the account status it announces, if any.
pub fn classify_forbidden(body: &str) -> Option<AccountStatus> {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_lowercase))
        .unwrap_or_default();

    if message.contains("awaiting admin approval") {
        Some(AccountStatus::Pending)
    } else if message.contains("deactivated") {
        Some(AccountStatus::Deactive)
    } else {
        None
    }
}

#[async_trait]
impl LmsApi for HttpLmsApi {
    async fn notifications(&self) -> Result<Vec<NotificationEvent>> {
        self.get_envelope("/notifications").await
    }

    async fn unread_count(&self) -> Result<u64> {
        self.get_envelope("/notifications/unread-count").await
    }

    async fn mark_notification_read(&self, id: i64) -> Result<()> {
        self.patch_empty(&format!("/notifications/{id}/read")).await
    }

    async fn discussion(
        &self,
        course_id: i64,
        role: DiscussionRole,
    ) -> Result<Vec<DiscussionMessage>> {
        let resp = self
            .send(self.http.get(self.url(&role.discussion_path(course_id))))
            .await?;
        let bytes = resp.bytes().await?;
        let messages: Option<Vec<DiscussionMessage>> = serde_json::from_slice(&bytes)?;
        Ok(messages.unwrap_or_default())
    }

    async fn post_discussion(
        &self,
        course_id: i64,
        role: DiscussionRole,
        content: &str,
        parent_id: Option<i64>,
    ) -> Result<()> {
        let body = serde_json::to_string(content)?;
        let request = self
            .http
            .post(self.url(&role.discussion_path(course_id)))
            .query(&role.post_query(parent_id))
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        tracing::debug!(
            course_id,
            role = %role,
            parent_id = ?parent_id,
            "Posting discussion message"
        );
        self.send(request).await?;
        Ok(())
    }

    async fn toggle_pin(&self, course_id: i64, message_id: i64) -> Result<()> {
        self.patch_empty(&pin_path(course_id, message_id)).await
    }

    async fn toggle_best_answer(&self, course_id: i64, message_id: i64) -> Result<()> {
        self.patch_empty(&best_answer_path(course_id, message_id)).await
    }
}
