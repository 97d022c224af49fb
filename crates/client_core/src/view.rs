//! Owner of the active channel's store. Background work reports back through a queue that
//! only the owner drains, so every store mutation happens on the owning task.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use shared::{
    domain::{ChannelId, MessageId, UserId},
    protocol::{GatewayEvent, MessagePayload, SendMessageRequest},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::ViewSettings,
    error::{FetchError, SendError},
    history::{HistoryLoader, LoadOutcome, LoadState, LoadTicket, PageTicket},
    message::Message,
    render::RenderSink,
    store::{MessageStore, UpsertOutcome},
    HistoryFetcher, MemberResolver, MessageSender, MissingMessageSender, MutedChannels,
    NotificationPolicy,
};

/// Result of background work, applied by [`ChannelView::apply`].
#[derive(Debug)]
pub enum ViewUpdate {
    History {
        ticket: LoadTicket,
        result: Result<Vec<MessagePayload>, FetchError>,
    },
    Page {
        ticket: PageTicket,
        result: Result<Vec<MessagePayload>, FetchError>,
    },
    SendAccepted {
        channel_id: ChannelId,
        epoch: u64,
        nonce: String,
        echo: Option<MessagePayload>,
    },
    SendFailed {
        channel_id: ChannelId,
        epoch: u64,
        nonce: String,
        error: SendError,
    },
    AuthorResolved {
        channel_id: ChannelId,
        epoch: u64,
        user_id: UserId,
        username: String,
    },
    AuthorLookupFailed {
        channel_id: ChannelId,
        epoch: u64,
        user_id: UserId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    Loaded { count: usize },
    LoadFailed(FetchError),
    Paged { count: usize },
    PageFailed(FetchError),
    Accepted { nonce: String },
    Confirmed { nonce: String },
    SendFailed { nonce: String, error: SendError },
    AuthorsRefreshed { user_id: UserId, rows: usize },
    /// The lookup failed; the next row from this author asks again.
    AuthorUnresolved { user_id: UserId },
    /// Started for a channel or epoch that is no longer active.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Applied,
    /// Targets a row outside the retained window.
    Missed,
    Ignored,
    Unread { channel_id: ChannelId, mentioned: bool },
    Muted,
}

pub struct ChannelView<S: RenderSink> {
    settings: ViewSettings,
    self_user_id: UserId,
    store: MessageStore<S>,
    loader: HistoryLoader,
    fetcher: Arc<dyn HistoryFetcher>,
    sender: Arc<dyn MessageSender>,
    members: Option<Arc<dyn MemberResolver>>,
    notifications: Arc<dyn NotificationPolicy>,
    updates_tx: mpsc::UnboundedSender<ViewUpdate>,
    updates_rx: mpsc::UnboundedReceiver<ViewUpdate>,
    pending_authors: HashSet<UserId>,
    author_names: HashMap<UserId, String>,
    failed_sends: HashMap<String, SendError>,
}

impl<S: RenderSink> ChannelView<S> {
    pub fn new(
        settings: ViewSettings,
        self_user_id: UserId,
        sink: S,
        fetcher: Arc<dyn HistoryFetcher>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            store: MessageStore::new(sink, settings.condense_policy()),
            loader: HistoryLoader::new(settings.retention),
            settings,
            self_user_id,
            fetcher,
            sender: Arc::new(MissingMessageSender),
            members: None,
            notifications: Arc::new(MutedChannels::new(self_user_id)),
            updates_tx,
            updates_rx,
            pending_authors: HashSet::new(),
            author_names: HashMap::new(),
            failed_sends: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_member_resolver(mut self, members: Arc<dyn MemberResolver>) -> Self {
        self.members = Some(members);
        self
    }

    pub fn with_notification_policy(mut self, notifications: Arc<dyn NotificationPolicy>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn store(&self) -> &MessageStore<S> {
        &self.store
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.store.sink_mut()
    }

    pub fn load_state(&self) -> &LoadState {
        self.loader.state()
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.loader.channel_id()
    }

    pub fn send_error(&self, nonce: &str) -> Option<&SendError> {
        self.failed_sends.get(nonce)
    }

    /// The row an edit-last-message gesture should open.
    pub fn edit_target(&self) -> Option<&Message> {
        self.store.last_from_author(self.self_user_id)
    }

    /// Tears down the current rows and starts loading `channel_id`.
    pub fn switch_channel(&mut self, channel_id: ChannelId) -> LoadTicket {
        self.store.reset(channel_id);
        self.pending_authors.clear();
        self.author_names.clear();
        self.failed_sends.clear();
        let ticket = self.loader.begin_switch(channel_id);
        info!(
            channel_id = channel_id.0,
            epoch = ticket.epoch,
            "view: switching channel"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let updates = self.updates_tx.clone();
        let limit = self.settings.fetch_limit;
        tokio::spawn(async move {
            let result = fetcher.fetch_history(ticket.channel_id, limit).await;
            let _ = updates.send(ViewUpdate::History { ticket, result });
        });
        ticket
    }

    pub fn close_channel(&mut self) {
        self.store.teardown();
        self.pending_authors.clear();
        self.author_names.clear();
        self.failed_sends.clear();
        self.loader.reset();
    }

    /// Requests the page before the earliest retained row, if the guard allows one.
    pub fn load_more(&mut self) -> Option<PageTicket> {
        let ticket = self.loader.begin_pagination(&self.store)?;
        // Older rows sit above the viewport; keep them until the user returns to the bottom.
        self.store.set_scrolled_to_bottom(false);
        debug!(
            channel_id = ticket.channel_id.0,
            before = ticket.before.0,
            "view: loading older messages"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let updates = self.updates_tx.clone();
        let limit = self.settings.fetch_limit;
        tokio::spawn(async move {
            let result = fetcher
                .fetch_history_before(ticket.channel_id, ticket.before, limit)
                .await;
            let _ = updates.send(ViewUpdate::Page { ticket, result });
        });
        Some(ticket)
    }

    /// Inserts an optimistic row and submits it. Returns the row's nonce.
    pub fn send(&mut self, content: impl Into<String>) -> Option<String> {
        let channel_id = self.loader.channel_id()?;
        let content = content.into();
        let mut message =
            Message::local(channel_id, self.self_user_id, content.clone(), Utc::now());
        self.fill_known_author(&mut message);
        let nonce = message.nonce.clone()?;
        let needs_author = message.author_name.is_none();
        self.store.upsert(message);
        self.trim();
        if needs_author {
            self.resolve_author(self.self_user_id);
        }
        self.spawn_send(channel_id, nonce.clone(), content);
        Some(nonce)
    }

    pub fn retry_send(&mut self, nonce: &str) -> bool {
        let Some(channel_id) = self.loader.channel_id() else {
            return false;
        };
        if self.failed_sends.remove(nonce).is_none() {
            return false;
        }
        let Some(content) = self.store.find_by_nonce(nonce).map(|m| m.content.clone()) else {
            return false;
        };
        self.store.mark_pending(nonce);
        self.spawn_send(channel_id, nonce.to_string(), content);
        true
    }

    pub fn discard_failed(&mut self, nonce: &str) -> bool {
        if self.failed_sends.remove(nonce).is_none() {
            return false;
        }
        self.store.remove_by_nonce(nonce).is_some()
    }

    pub fn set_scrolled_to_bottom(&mut self, at_bottom: bool) {
        self.store.set_scrolled_to_bottom(at_bottom);
        if at_bottom {
            self.trim();
        }
    }

    pub fn handle_gateway(&mut self, event: GatewayEvent) -> EventDisposition {
        let channel_id = event.channel_id();
        if self.loader.channel_id() != Some(channel_id) {
            return self.route_background(event);
        }
        debug!(channel_id = channel_id.0, event = event.kind(), "view: gateway event");

        match event {
            GatewayEvent::MessageCreate { message } => {
                let mut message = Message::from_payload(message);
                self.fill_known_author(&mut message);
                let author_id = message.author_id;
                let needs_author = message.author_name.is_none();
                let outcome = self.store.upsert(message).outcome;
                if outcome == UpsertOutcome::Inserted {
                    self.trim();
                }
                if needs_author {
                    self.resolve_author(author_id);
                }
                EventDisposition::Applied
            }
            GatewayEvent::MessageUpdate { message } => {
                self.update(message.message_id, |row| row.apply_edit(&message))
            }
            GatewayEvent::MessageDelete { message_id, .. } => self.delete(&[message_id]),
            GatewayEvent::MessageDeleteBulk { message_ids, .. } => self.delete(&message_ids),
            GatewayEvent::ReactionAdd {
                message_id,
                user_id,
                emoji,
                ..
            } => {
                let me = user_id == self.self_user_id;
                self.update(message_id, |row| row.add_reaction(&emoji, me))
            }
            GatewayEvent::ReactionRemove {
                message_id,
                user_id,
                emoji,
                ..
            } => {
                let me = user_id == self.self_user_id;
                self.update(message_id, |row| row.remove_reaction(&emoji, me))
            }
            GatewayEvent::ReactionRemoveAll { message_id, .. } => {
                self.update(message_id, Message::clear_reactions)
            }
        }
    }

    pub fn apply(&mut self, update: ViewUpdate) -> ViewChange {
        match update {
            ViewUpdate::History { ticket, result } => {
                // Live rows that arrived while loading are replayed on top of the history.
                let arrivals = if self.loader.is_current(ticket.channel_id, ticket.epoch) {
                    self.arrivals_missing_from(&result)
                } else {
                    Vec::new()
                };
                match self.loader.commit_load(ticket, result, &mut self.store) {
                    LoadOutcome::Applied { count } => {
                        for message in arrivals {
                            self.store.upsert(message);
                        }
                        self.trim();
                        self.resolve_missing_authors();
                        ViewChange::Loaded { count }
                    }
                    LoadOutcome::Failed(err) => ViewChange::LoadFailed(err),
                    LoadOutcome::Stale => ViewChange::Discarded,
                }
            }
            ViewUpdate::Page { ticket, result } => {
                match self.loader.commit_page(ticket, result, &mut self.store) {
                    LoadOutcome::Applied { count } => {
                        self.resolve_missing_authors();
                        ViewChange::Paged { count }
                    }
                    LoadOutcome::Failed(err) => ViewChange::PageFailed(err),
                    LoadOutcome::Stale => ViewChange::Discarded,
                }
            }
            ViewUpdate::SendAccepted {
                channel_id,
                epoch,
                nonce,
                echo,
            } => {
                if !self.loader.is_current(channel_id, epoch) {
                    return ViewChange::Discarded;
                }
                let Some(mut echo) = echo.filter(|echo| echo.channel_id == channel_id) else {
                    return ViewChange::Accepted { nonce };
                };
                if echo.nonce.is_none() {
                    echo.nonce = Some(nonce.clone());
                }
                let mut echo = Message::from_payload(echo);
                self.fill_known_author(&mut echo);
                match self.store.upsert(echo).outcome {
                    UpsertOutcome::Confirmed => ViewChange::Confirmed { nonce },
                    _ => ViewChange::Accepted { nonce },
                }
            }
            ViewUpdate::SendFailed {
                channel_id,
                epoch,
                nonce,
                error,
            } => {
                if !self.loader.is_current(channel_id, epoch) {
                    return ViewChange::Discarded;
                }
                warn!(
                    channel_id = channel_id.0,
                    nonce = %nonce,
                    error = %error,
                    retryable = error.is_retryable(),
                    "view: message failed to send"
                );
                if !self.store.mark_failed(&nonce, error.to_string()) {
                    // Already confirmed through the gateway or discarded.
                    return ViewChange::Discarded;
                }
                self.failed_sends.insert(nonce.clone(), error.clone());
                ViewChange::SendFailed { nonce, error }
            }
            ViewUpdate::AuthorResolved {
                channel_id,
                epoch,
                user_id,
                username,
            } => {
                if !self.loader.is_current(channel_id, epoch) {
                    return ViewChange::Discarded;
                }
                let rows = self.store.apply_author_name(user_id, &username);
                self.author_names.insert(user_id, username);
                ViewChange::AuthorsRefreshed { user_id, rows }
            }
            ViewUpdate::AuthorLookupFailed {
                channel_id,
                epoch,
                user_id,
            } => {
                if !self.loader.is_current(channel_id, epoch) {
                    return ViewChange::Discarded;
                }
                self.pending_authors.remove(&user_id);
                ViewChange::AuthorUnresolved { user_id }
            }
        }
    }

    /// Waits for the next background result and applies it.
    pub async fn next_update(&mut self) -> Option<ViewChange> {
        let update = self.updates_rx.recv().await?;
        Some(self.apply(update))
    }

    /// Applies every background result that is already queued.
    pub fn drain_updates(&mut self) -> Vec<ViewChange> {
        let mut changes = Vec::new();
        while let Ok(update) = self.updates_rx.try_recv() {
            changes.push(self.apply(update));
        }
        changes
    }

    fn route_background(&self, event: GatewayEvent) -> EventDisposition {
        let GatewayEvent::MessageCreate { message } = event else {
            return EventDisposition::Ignored;
        };
        if message.author_id == self.self_user_id {
            return EventDisposition::Ignored;
        }
        if self.notifications.is_muted(message.channel_id) {
            return EventDisposition::Muted;
        }
        EventDisposition::Unread {
            channel_id: message.channel_id,
            mentioned: self.notifications.mentions_me(&message),
        }
    }

    fn update(&mut self, id: MessageId, mutate: impl FnOnce(&mut Message)) -> EventDisposition {
        if self.store.update_by_id(id, mutate) {
            EventDisposition::Applied
        } else {
            EventDisposition::Missed
        }
    }

    fn delete(&mut self, ids: &[MessageId]) -> EventDisposition {
        if self.store.delete(ids) > 0 {
            self.forget_evicted_sends();
            EventDisposition::Applied
        } else {
            EventDisposition::Missed
        }
    }

    /// Evicts rows beyond the retention ceiling when the view follows the bottom.
    fn trim(&mut self) {
        if self.store.trim(self.settings.retention) > 0 {
            self.forget_evicted_sends();
        }
    }

    fn forget_evicted_sends(&mut self) {
        self.failed_sends
            .retain(|nonce, _| self.store.find_by_nonce(nonce).is_some());
    }

    /// Rows to replay after a load. Optimistic rows the history already
    /// confirms (same nonce) are dropped; the history copy replaces them.
    fn arrivals_missing_from(
        &mut self,
        result: &Result<Vec<MessagePayload>, FetchError>,
    ) -> Vec<Message> {
        let confirmed: HashSet<&str> = match result {
            Ok(payloads) => payloads
                .iter()
                .filter(|payload| payload.message_id.is_valid())
                .filter_map(|payload| payload.nonce.as_deref())
                .filter(|nonce| !nonce.is_empty())
                .collect(),
            Err(_) => HashSet::new(),
        };
        let mut arrivals = Vec::new();
        for message in self.store.iter() {
            let confirmed_nonce = message
                .nonce
                .as_deref()
                .filter(|nonce| message.id.is_none() && confirmed.contains(nonce));
            match confirmed_nonce {
                Some(nonce) => {
                    debug!(nonce = %nonce, "view: optimistic row confirmed by history");
                    self.failed_sends.remove(nonce);
                }
                None => arrivals.push(message.clone()),
            }
        }
        arrivals
    }

    fn fill_known_author(&self, message: &mut Message) {
        if message.author_name.is_none() {
            message.author_name = self.author_names.get(&message.author_id).cloned();
        }
    }

    fn spawn_send(&self, channel_id: ChannelId, nonce: String, content: String) {
        let sender = Arc::clone(&self.sender);
        let updates = self.updates_tx.clone();
        let epoch = self.loader.epoch();
        tokio::spawn(async move {
            let request = SendMessageRequest {
                content,
                nonce: nonce.clone(),
            };
            let update = match sender.send_message(channel_id, request).await {
                Ok(echo) => ViewUpdate::SendAccepted {
                    channel_id,
                    epoch,
                    nonce,
                    echo,
                },
                Err(error) => ViewUpdate::SendFailed {
                    channel_id,
                    epoch,
                    nonce,
                    error,
                },
            };
            let _ = updates.send(update);
        });
    }

    fn resolve_missing_authors(&mut self) {
        for author_id in self.store.missing_author_names() {
            match self.author_names.get(&author_id).cloned() {
                Some(name) => {
                    self.store.apply_author_name(author_id, &name);
                }
                None => self.resolve_author(author_id),
            }
        }
    }

    fn resolve_author(&mut self, user_id: UserId) {
        let Some(channel_id) = self.loader.channel_id() else {
            return;
        };
        let Some(members) = self.members.as_ref().map(Arc::clone) else {
            return;
        };
        if self.author_names.contains_key(&user_id) || !self.pending_authors.insert(user_id) {
            return;
        }
        let updates = self.updates_tx.clone();
        let epoch = self.loader.epoch();
        tokio::spawn(async move {
            match members.resolve_member(user_id).await {
                Ok(Some(profile)) => {
                    let _ = updates.send(ViewUpdate::AuthorResolved {
                        channel_id,
                        epoch,
                        user_id,
                        username: profile.username,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(user_id = user_id.0, error = %err, "view: author lookup failed");
                    let _ = updates.send(ViewUpdate::AuthorLookupFailed {
                        channel_id,
                        epoch,
                        user_id,
                    });
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
