use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ChannelId, MessageId, UserId},
    protocol::{MessagePayload, SendMessageRequest, UserProfile},
};

pub mod condense;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod message;
pub mod reconcile;
pub mod render;
pub mod store;
pub mod view;

pub use error::{FetchError, SendError};
pub use message::{Delivery, Message, Reaction};
pub use render::{NullSink, RecordingSink, RenderOp, RenderSink, RowKey};
pub use store::{MessageStore, UpsertOutcome};
pub use view::{ChannelView, EventDisposition, ViewChange, ViewUpdate};

/// Remote channel history. Results may come back in any order.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        limit: u32,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError>;

    async fn fetch_history_before(
        &self,
        channel_id: ChannelId,
        before: MessageId,
        limit: u32,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError>;
}

pub struct MissingHistoryFetcher;

#[async_trait]
impl HistoryFetcher for MissingHistoryFetcher {
    async fn fetch_history(
        &self,
        _channel_id: ChannelId,
        _limit: u32,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError> {
        Err(FetchError::Unavailable)
    }

    async fn fetch_history_before(
        &self,
        _channel_id: ChannelId,
        _before: MessageId,
        _limit: u32,
    ) -> std::result::Result<Vec<MessagePayload>, FetchError> {
        Err(FetchError::Unavailable)
    }
}

/// Submits a locally composed message. The returned payload, if any, is the server's copy;
/// otherwise confirmation arrives later as a gateway `MessageCreate`.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        request: SendMessageRequest,
    ) -> std::result::Result<Option<MessagePayload>, SendError>;
}

pub struct MissingMessageSender;

#[async_trait]
impl MessageSender for MissingMessageSender {
    async fn send_message(
        &self,
        _channel_id: ChannelId,
        _request: SendMessageRequest,
    ) -> std::result::Result<Option<MessagePayload>, SendError> {
        Err(SendError::Unavailable)
    }
}

/// Display-name lookup. Optional: without one, rows keep the names their payloads carry.
#[async_trait]
pub trait MemberResolver: Send + Sync {
    async fn resolve_member(&self, user_id: UserId) -> Result<Option<UserProfile>>;
}

pub trait NotificationPolicy: Send + Sync {
    fn is_muted(&self, channel_id: ChannelId) -> bool;
    fn mentions_me(&self, message: &MessagePayload) -> bool;
}

/// Owned mute list plus mention detection for the signed-in user.
#[derive(Debug, Clone)]
pub struct MutedChannels {
    self_user_id: UserId,
    muted: HashSet<ChannelId>,
}

impl MutedChannels {
    pub fn new(self_user_id: UserId) -> Self {
        Self {
            self_user_id,
            muted: HashSet::new(),
        }
    }

    pub fn with_muted(mut self, channels: impl IntoIterator<Item = ChannelId>) -> Self {
        self.muted.extend(channels);
        self
    }
}

impl NotificationPolicy for MutedChannels {
    fn is_muted(&self, channel_id: ChannelId) -> bool {
        self.muted.contains(&channel_id)
    }

    fn mentions_me(&self, message: &MessagePayload) -> bool {
        message.author_id != self.self_user_id && message.mentions.contains(&self.self_user_id)
    }
}
