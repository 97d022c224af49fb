//! REST adapter for the history, send and member-lookup collaborators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use shared::{
    domain::{ChannelId, MessageId, UserId},
    error::ApiError,
    protocol::{MessagePayload, SendMessageRequest, UserProfile},
};
use tracing::debug;

use crate::{
    error::{FetchError, SendError},
    HistoryFetcher, MemberResolver, MessageSender,
};

const MAX_PAGE: u32 = 100;

#[derive(Serialize)]
struct ListMessagesQuery {
    user_id: i64,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<i64>,
}

#[derive(Serialize)]
struct UserQuery {
    user_id: i64,
}

/// Non-2xx response, with the server's error body when it sent one.
enum Rejection {
    Api(ApiError),
    Status(StatusCode),
}

pub struct HttpChatApi {
    http: Client,
    server_url: String,
    user_id: UserId,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            server_url,
            user_id,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn list_messages(
        &self,
        channel_id: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError> {
        let limit = limit.clamp(1, MAX_PAGE);
        debug!(
            channel_id = channel_id.0,
            limit,
            before = ?before.map(|id| id.0),
            "http: listing messages"
        );
        let response = self
            .http
            .get(format!("{}/channels/{}/messages", self.server_url, channel_id.0))
            .query(&ListMessagesQuery {
                user_id: self.user_id.0,
                limit,
                before: before.map(|id| id.0),
            })
            .send()
            .await?;
        let response = match check(response).await {
            Ok(response) => response,
            Err(Rejection::Api(err)) => return Err(FetchError::Api(err)),
            Err(Rejection::Status(status)) => {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                })
            }
        };
        response
            .json()
            .await
            .map_err(|err| FetchError::Decode(err.to_string()))
    }
}

async fn check(response: Response) -> std::result::Result<Response, Rejection> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(err) => Err(Rejection::Api(err)),
        Err(_) => Err(Rejection::Status(status)),
    }
}

#[async_trait]
impl HistoryFetcher for HttpChatApi {
    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        limit: u32,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError> {
        self.list_messages(channel_id, limit, None).await
    }

    async fn fetch_history_before(
        &self,
        channel_id: ChannelId,
        before: MessageId,
        limit: u32,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError> {
        self.list_messages(channel_id, limit, Some(before)).await
    }
}

#[async_trait]
impl MessageSender for HttpChatApi {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        request: SendMessageRequest,
    ) -> std::result::Result<Option<MessagePayload>, SendError> {
        let response = self
            .http
            .post(format!("{}/channels/{}/messages", self.server_url, channel_id.0))
            .query(&UserQuery {
                user_id: self.user_id.0,
            })
            .json(&request)
            .send()
            .await?;
        let response = match check(response).await {
            Ok(response) => response,
            Err(Rejection::Api(err)) => return Err(SendError::Api(err)),
            Err(Rejection::Status(status)) => {
                return Err(SendError::Status {
                    status: status.as_u16(),
                })
            }
        };
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let created: MessagePayload = response
            .json()
            .await
            .map_err(|err| SendError::Decode(err.to_string()))?;
        Ok(Some(created))
    }
}

#[async_trait]
impl MemberResolver for HttpChatApi {
    async fn resolve_member(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let response = self
            .http
            .get(format!("{}/users/{}", self.server_url, user_id.0))
            .send()
            .await
            .with_context(|| format!("failed to look up user {}", user_id.0))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let profile = response
            .error_for_status()?
            .json::<UserProfile>()
            .await
            .with_context(|| format!("invalid profile for user {}", user_id.0))?;
        Ok(Some(profile))
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
