//! Per-row view-model for a channel's message list.

use chrono::{DateTime, TimeDelta, Utc};
use shared::{
    domain::{ChannelId, MessageId, MessageKind, UserId},
    protocol::{MessagePayload, MessageUpdatePayload, ReactionPayload},
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
    pub me: bool,
}

impl From<ReactionPayload> for Reaction {
    fn from(value: ReactionPayload) -> Self {
        Self {
            emoji: value.emoji,
            count: value.count,
            me: value.me,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Pending,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// `None` until the server has assigned an id.
    pub id: Option<MessageId>,
    pub nonce: Option<String>,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub mentions: Vec<UserId>,
    pub reactions: Vec<Reaction>,
    pub timestamp: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub delivery: Delivery,
    pub condensed: bool,
    pub condense_offset: TimeDelta,
    pub available: bool,
}

impl Message {
    pub fn from_payload(payload: MessagePayload) -> Self {
        let id = Some(payload.message_id).filter(|id| id.is_valid());
        let delivery = if id.is_some() {
            Delivery::Sent
        } else {
            Delivery::Pending
        };
        let mut message = Self {
            id,
            nonce: payload.nonce.filter(|nonce| !nonce.is_empty()),
            channel_id: payload.channel_id,
            author_id: payload.author_id,
            author_name: payload.author_username,
            content: payload.content,
            kind: payload.kind,
            mentions: payload.mentions,
            reactions: payload.reactions.into_iter().map(Reaction::from).collect(),
            timestamp: payload.sent_at,
            edited_at: payload.edited_at,
            delivery,
            condensed: false,
            condense_offset: TimeDelta::zero(),
            available: false,
        };
        message.refresh_availability();
        message
    }

    /// Builds an optimistic row for a message the local user is about to send.
    pub fn local(
        channel_id: ChannelId,
        author_id: UserId,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            nonce: Some(Uuid::new_v4().simple().to_string()),
            channel_id,
            author_id,
            author_name: None,
            content: content.into(),
            kind: MessageKind::Default,
            mentions: Vec::new(),
            reactions: Vec::new(),
            timestamp: sent_at,
            edited_at: None,
            delivery: Delivery::Pending,
            condensed: false,
            condense_offset: TimeDelta::zero(),
            available: false,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, Delivery::Failed { .. })
    }

    pub fn refresh_availability(&mut self) {
        self.available = self.kind != MessageKind::System && self.delivery == Delivery::Sent;
    }

    /// Confirmed rows never keep their nonce.
    pub(crate) fn normalize(&mut self) {
        if self.id.is_some() {
            self.nonce = None;
            self.delivery = Delivery::Sent;
        }
        self.refresh_availability();
    }

    /// Folds a reconciled incoming copy into this row.
    pub(crate) fn absorb(&mut self, incoming: Message) {
        if self.id.is_none() {
            self.id = incoming.id;
        }
        if incoming.id.is_some() {
            self.timestamp = incoming.timestamp;
            self.reactions = incoming.reactions;
            self.delivery = Delivery::Sent;
        } else {
            self.delivery = incoming.delivery;
        }
        if incoming.author_name.is_some() {
            self.author_name = incoming.author_name;
        }
        self.content = incoming.content;
        self.kind = incoming.kind;
        self.mentions = incoming.mentions;
        self.edited_at = incoming.edited_at.or(self.edited_at);
        self.normalize();
    }

    pub fn apply_edit(&mut self, update: &MessageUpdatePayload) {
        if let Some(content) = &update.content {
            self.content = content.clone();
        }
        if update.edited_at.is_some() {
            self.edited_at = update.edited_at;
        }
    }

    pub fn add_reaction(&mut self, emoji: &str, me: bool) {
        match self.reactions.iter_mut().find(|r| r.emoji == emoji) {
            Some(reaction) => {
                if me && reaction.me {
                    return;
                }
                reaction.count += 1;
                reaction.me |= me;
            }
            None => self.reactions.push(Reaction {
                emoji: emoji.to_string(),
                count: 1,
                me,
            }),
        }
    }

    pub fn remove_reaction(&mut self, emoji: &str, me: bool) {
        let Some(index) = self.reactions.iter().position(|r| r.emoji == emoji) else {
            return;
        };
        let reaction = &mut self.reactions[index];
        if me {
            if !reaction.me {
                return;
            }
            reaction.me = false;
        }
        reaction.count = reaction.count.saturating_sub(1);
        if reaction.count == 0 {
            self.reactions.remove(index);
        }
    }

    pub fn clear_reactions(&mut self) {
        self.reactions.clear();
    }

    /// Display label for a condensed row, e.g. `+42s`.
    pub fn offset_label(&self) -> Option<String> {
        self.condensed
            .then(|| format!("+{}s", self.condense_offset.num_seconds()))
    }
}

#[cfg(test)]
#[path = "tests/message_tests.rs"]
mod tests;
