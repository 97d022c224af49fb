//! Channel-switch bulk load and backward pagination.

use shared::{
    domain::{ChannelId, MessageId},
    protocol::MessagePayload,
};
use tracing::{debug, info, warn};

use crate::{error::FetchError, message::Message, render::RenderSink, store::MessageStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    PaginationPending,
    Error(FetchError),
}

/// Identifies one bulk load; results carrying an older epoch are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub channel_id: ChannelId,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    pub channel_id: ChannelId,
    pub epoch: u64,
    pub before: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { count: usize },
    Stale,
    Failed(FetchError),
}

pub struct HistoryLoader {
    state: LoadState,
    channel_id: Option<ChannelId>,
    epoch: u64,
    retention: usize,
}

impl HistoryLoader {
    pub fn new(retention: usize) -> Self {
        Self {
            state: LoadState::Idle,
            channel_id: None,
            epoch: 0,
            retention,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn is_current(&self, channel_id: ChannelId, epoch: u64) -> bool {
        self.channel_id == Some(channel_id) && self.epoch == epoch
    }

    pub fn begin_switch(&mut self, channel_id: ChannelId) -> LoadTicket {
        self.epoch += 1;
        self.channel_id = Some(channel_id);
        self.state = LoadState::Loading;
        LoadTicket {
            channel_id,
            epoch: self.epoch,
        }
    }

    pub fn reset(&mut self) {
        self.epoch += 1;
        self.channel_id = None;
        self.state = LoadState::Idle;
    }

    pub fn commit_load<S: RenderSink>(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<MessagePayload>, FetchError>,
        store: &mut MessageStore<S>,
    ) -> LoadOutcome {
        if !self.is_current(ticket.channel_id, ticket.epoch) || self.state != LoadState::Loading {
            warn!(
                channel_id = ticket.channel_id.0,
                epoch = ticket.epoch,
                current_epoch = self.epoch,
                "history: discarding stale load result"
            );
            return LoadOutcome::Stale;
        }

        match result {
            Ok(payloads) => {
                let messages = into_ascending(payloads, ticket.channel_id);
                let count = messages.len();
                store.load(ticket.channel_id, messages);
                self.state = LoadState::Ready;
                info!(
                    channel_id = ticket.channel_id.0,
                    epoch = ticket.epoch,
                    count,
                    "history: channel loaded"
                );
                LoadOutcome::Applied { count }
            }
            Err(err) => {
                warn!(
                    channel_id = ticket.channel_id.0,
                    epoch = ticket.epoch,
                    error = %err,
                    "history: load failed"
                );
                self.state = LoadState::Error(err.clone());
                LoadOutcome::Failed(err)
            }
        }
    }

    /// Only pages once the store holds a full window; smaller channels have nothing older.
    pub fn begin_pagination<S: RenderSink>(
        &mut self,
        store: &MessageStore<S>,
    ) -> Option<PageTicket> {
        if self.state != LoadState::Ready {
            return None;
        }
        let channel_id = self.channel_id?;
        if store.channel_id() != Some(channel_id) {
            return None;
        }
        if store.len() < self.retention {
            debug!(
                channel_id = channel_id.0,
                rows = store.len(),
                retention = self.retention,
                "history: below retention ceiling; not paginating"
            );
            return None;
        }
        let before = store.first_id()?;
        self.state = LoadState::PaginationPending;
        Some(PageTicket {
            channel_id,
            epoch: self.epoch,
            before,
        })
    }

    pub fn commit_page<S: RenderSink>(
        &mut self,
        ticket: PageTicket,
        result: Result<Vec<MessagePayload>, FetchError>,
        store: &mut MessageStore<S>,
    ) -> LoadOutcome {
        if !self.is_current(ticket.channel_id, ticket.epoch)
            || self.state != LoadState::PaginationPending
        {
            warn!(
                channel_id = ticket.channel_id.0,
                epoch = ticket.epoch,
                "history: discarding stale page"
            );
            return LoadOutcome::Stale;
        }

        // The rows already on screen are still valid either way.
        self.state = LoadState::Ready;
        match result {
            Ok(payloads) => {
                let older: Vec<Message> = into_ascending(payloads, ticket.channel_id)
                    .into_iter()
                    .filter(|message| message.id.is_some_and(|id| id < ticket.before))
                    .collect();
                let count = store.prepend(older);
                info!(
                    channel_id = ticket.channel_id.0,
                    before = ticket.before.0,
                    count,
                    "history: page prepended"
                );
                LoadOutcome::Applied { count }
            }
            Err(err) => {
                warn!(
                    channel_id = ticket.channel_id.0,
                    before = ticket.before.0,
                    error = %err,
                    "history: pagination failed"
                );
                LoadOutcome::Failed(err)
            }
        }
    }
}

fn into_ascending(payloads: Vec<MessagePayload>, channel_id: ChannelId) -> Vec<Message> {
    let mut messages: Vec<Message> = payloads
        .into_iter()
        .filter(|payload| payload.channel_id == channel_id)
        .map(Message::from_payload)
        .collect();
    messages.sort_by(|a, b| a.id.cmp(&b.id).then(a.timestamp.cmp(&b.timestamp)));
    messages
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
