//! Ordered message rows for the active channel.

use shared::domain::{ChannelId, MessageId, UserId};
use tracing::debug;

use crate::{
    condense::{Condensation, CondensePolicy},
    message::{Delivery, Message},
    reconcile::{self, Reconciliation},
    render::RenderSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// An optimistic row received its server id.
    Confirmed,
    Updated,
}

#[derive(Debug)]
pub struct Upserted<'a> {
    pub outcome: UpsertOutcome,
    pub position: usize,
    pub message: &'a Message,
}

pub struct MessageStore<S: RenderSink> {
    channel_id: Option<ChannelId>,
    entries: Vec<Message>,
    policy: CondensePolicy,
    at_bottom: bool,
    sink: S,
}

impl<S: RenderSink> MessageStore<S> {
    pub fn new(sink: S, policy: CondensePolicy) -> Self {
        Self {
            channel_id: None,
            entries: Vec::new(),
            policy,
            at_bottom: true,
            sink,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.entries
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_scrolled_to_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn set_scrolled_to_bottom(&mut self, at_bottom: bool) {
        self.at_bottom = at_bottom;
    }

    /// Releases every row and forgets the channel.
    pub fn teardown(&mut self) {
        for message in self.entries.drain(..) {
            self.sink.on_remove(&message);
        }
        self.channel_id = None;
        self.at_bottom = true;
    }

    pub fn reset(&mut self, channel_id: ChannelId) {
        self.teardown();
        self.channel_id = Some(channel_id);
    }

    /// Replaces the whole store. `messages` must already be in ascending order.
    pub fn load(&mut self, channel_id: ChannelId, messages: Vec<Message>) {
        self.teardown();
        self.channel_id = Some(channel_id);
        self.entries = messages;
        self.entries
            .dedup_by(|next, prev| next.id.is_some() && next.id == prev.id);
        for index in 0..self.entries.len() {
            self.entries[index].normalize();
            self.condense_silently(index);
        }
        for (position, message) in self.entries.iter().enumerate() {
            self.sink.on_insert(position, message);
        }
        debug!(
            channel_id = channel_id.0,
            rows = self.entries.len(),
            "store: loaded channel"
        );
    }

    /// Inserts an older batch ahead of the current head. Rows already present are skipped.
    pub fn prepend(&mut self, messages: Vec<Message>) -> usize {
        let mut batch: Vec<Message> = Vec::with_capacity(messages.len());
        for mut message in messages {
            let Some(id) = message.id else {
                continue;
            };
            if self.position_of(id).is_some() || batch.iter().any(|m| m.id == Some(id)) {
                continue;
            }
            message.normalize();
            batch.push(message);
        }

        let count = batch.len();
        if count == 0 {
            return 0;
        }

        self.entries.splice(0..0, batch);
        for index in 0..count {
            self.condense_silently(index);
        }
        for position in 0..count {
            self.sink.on_insert(position, &self.entries[position]);
        }
        self.recondense(count);
        count
    }

    pub fn upsert(&mut self, mut message: Message) -> Upserted<'_> {
        match reconcile::find_match(&self.entries, &message) {
            Reconciliation::ById(index) | Reconciliation::ByNonce(index) => {
                let was_confirmed = self.entries[index].is_confirmed();
                self.entries[index].absorb(message);
                let outcome = if !was_confirmed && self.entries[index].is_confirmed() {
                    UpsertOutcome::Confirmed
                } else {
                    UpsertOutcome::Updated
                };
                self.sink.on_update(index, &self.entries[index]);
                self.recondense(index);
                self.recondense(index + 1);
                Upserted {
                    outcome,
                    position: index,
                    message: &self.entries[index],
                }
            }
            Reconciliation::New => {
                message.normalize();
                let condensation = self.policy.evaluate(self.entries.last(), &message);
                message.condensed = condensation.condensed;
                message.condense_offset = condensation.offset;
                self.entries.push(message);
                let position = self.entries.len() - 1;
                self.sink.on_insert(position, &self.entries[position]);
                Upserted {
                    outcome: UpsertOutcome::Inserted,
                    position,
                    message: &self.entries[position],
                }
            }
        }
    }

    /// Applies `mutate` to the row with `id`. Returns false when the row is not retained.
    pub fn update_by_id(&mut self, id: MessageId, mutate: impl FnOnce(&mut Message)) -> bool {
        let Some(index) = self.position_of(id) else {
            debug!(message_id = id.0, "store: update for untracked message ignored");
            return false;
        };
        mutate(&mut self.entries[index]);
        self.entries[index].refresh_availability();
        self.sink.on_update(index, &self.entries[index]);
        self.recondense(index);
        self.recondense(index + 1);
        true
    }

    pub fn delete(&mut self, ids: &[MessageId]) -> usize {
        let mut removed = 0;
        for id in ids {
            let Some(index) = self.position_of(*id) else {
                continue;
            };
            let message = self.entries.remove(index);
            self.sink.on_remove(&message);
            self.recondense(index);
            removed += 1;
        }
        removed
    }

    pub fn remove_by_nonce(&mut self, nonce: &str) -> Option<Message> {
        let index = self.pending_position(nonce)?;
        let message = self.entries.remove(index);
        self.sink.on_remove(&message);
        self.recondense(index);
        Some(message)
    }

    /// Evicts the oldest rows beyond `retain`, but only while the view follows the bottom.
    pub fn trim(&mut self, retain: usize) -> usize {
        if !self.at_bottom || self.entries.len() <= retain {
            return 0;
        }
        let excess = self.entries.len() - retain;
        let evicted: Vec<Message> = self.entries.drain(..excess).collect();
        for message in &evicted {
            self.sink.on_remove(message);
        }
        self.recondense(0);
        debug!(evicted = excess, retained = retain, "store: trimmed oldest rows");
        excess
    }

    pub fn mark_failed(&mut self, nonce: &str, reason: impl Into<String>) -> bool {
        self.set_delivery(
            nonce,
            Delivery::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn mark_pending(&mut self, nonce: &str) -> bool {
        self.set_delivery(nonce, Delivery::Pending)
    }

    /// Fills in a resolved display name; ordering is untouched.
    pub fn apply_author_name(&mut self, author_id: UserId, name: &str) -> usize {
        let mut changed = 0;
        for index in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            if entry.author_id != author_id || entry.author_name.as_deref() == Some(name) {
                continue;
            }
            entry.author_name = Some(name.to_string());
            self.sink.on_update(index, &self.entries[index]);
            changed += 1;
        }
        changed
    }

    pub fn find_by_id(&self, id: MessageId) -> Option<&Message> {
        self.position_of(id).map(|index| &self.entries[index])
    }

    pub fn find_by_nonce(&self, nonce: &str) -> Option<&Message> {
        self.pending_position(nonce).map(|index| &self.entries[index])
    }

    /// Latest row from `author_id` that carries its own header.
    pub fn last_from_author(&self, author_id: UserId) -> Option<&Message> {
        self.entries
            .iter()
            .rev()
            .find(|message| message.author_id == author_id && !message.condensed)
    }

    /// Earliest confirmed id, the anchor for backward pagination.
    pub fn first_id(&self) -> Option<MessageId> {
        self.entries.iter().find_map(|message| message.id)
    }

    pub fn missing_author_names(&self) -> Vec<UserId> {
        let mut authors: Vec<UserId> = self
            .entries
            .iter()
            .filter(|message| message.author_name.is_none())
            .map(|message| message.author_id)
            .collect();
        authors.sort();
        authors.dedup();
        authors
    }

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|message| message.id == Some(id))
    }

    fn pending_position(&self, nonce: &str) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|message| message.id.is_none() && message.nonce.as_deref() == Some(nonce))
    }

    fn set_delivery(&mut self, nonce: &str, delivery: Delivery) -> bool {
        let Some(index) = self.pending_position(nonce) else {
            return false;
        };
        let entry = &mut self.entries[index];
        entry.delivery = delivery;
        entry.refresh_availability();
        self.sink.on_update(index, &self.entries[index]);
        true
    }

    fn condensation_at(&self, index: usize) -> Condensation {
        let previous = index.checked_sub(1).and_then(|p| self.entries.get(p));
        self.policy.evaluate(previous, &self.entries[index])
    }

    fn condense_silently(&mut self, index: usize) {
        let condensation = self.condensation_at(index);
        let entry = &mut self.entries[index];
        entry.condensed = condensation.condensed;
        entry.condense_offset = condensation.offset;
    }

    fn recondense(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }
        let condensation = self.condensation_at(index);
        let entry = &mut self.entries[index];
        if entry.condensed == condensation.condensed
            && entry.condense_offset == condensation.offset
        {
            return;
        }
        entry.condensed = condensation.condensed;
        entry.condense_offset = condensation.offset;
        self.sink.on_condense_changed(index, &self.entries[index]);
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
