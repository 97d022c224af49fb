use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    config::load_settings, http::HttpChatApi, ChannelView, FetchError, HistoryFetcher,
    MessageSender, MessageStore, RecordingSink, RenderSink, SendError, ViewChange,
};
use serde::Deserialize;
use shared::{
    domain::{ChannelId, MessageId, MessageKind, UserId},
    protocol::{GatewayEvent, MessagePayload, SendMessageRequest},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replays a recorded channel session and prints the resulting rows.
    Replay {
        #[arg(long)]
        fixture: PathBuf,
    },
    /// Loads a live channel, then reads gateway events (JSON) or messages to send from stdin.
    Tail {
        #[arg(long)]
        server_url: String,
        #[arg(long)]
        channel: i64,
        #[arg(long)]
        user_id: i64,
    },
}

#[derive(Debug, Deserialize)]
struct Fixture {
    channel_id: ChannelId,
    self_user_id: UserId,
    #[serde(default)]
    history: Vec<MessagePayload>,
    #[serde(default)]
    older: Vec<MessagePayload>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Gateway { event: GatewayEvent },
    Send { content: String },
    LoadMore,
    Scroll { at_bottom: bool },
}

struct FixtureHistory {
    latest: Vec<MessagePayload>,
    older: Vec<MessagePayload>,
}

#[async_trait]
impl HistoryFetcher for FixtureHistory {
    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, FetchError> {
        Ok(page(&self.latest, channel_id, None, limit))
    }

    async fn fetch_history_before(
        &self,
        channel_id: ChannelId,
        before: MessageId,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, FetchError> {
        Ok(page(&self.older, channel_id, Some(before), limit))
    }
}

fn page(
    rows: &[MessagePayload],
    channel_id: ChannelId,
    before: Option<MessageId>,
    limit: u32,
) -> Vec<MessagePayload> {
    let mut rows: Vec<MessagePayload> = rows
        .iter()
        .filter(|m| m.channel_id == channel_id)
        .filter(|m| before.map_or(true, |before| m.message_id < before))
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.message_id.cmp(&a.message_id));
    rows.truncate(limit as usize);
    rows
}

/// Accepts every send and echoes it back under the next free id.
struct EchoSender {
    author_id: UserId,
    next_id: AtomicI64,
}

#[async_trait]
impl MessageSender for EchoSender {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        request: SendMessageRequest,
    ) -> Result<Option<MessagePayload>, SendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Some(MessagePayload {
            message_id: MessageId(id),
            channel_id,
            guild_id: None,
            author_id: self.author_id,
            author_username: None,
            content: request.content,
            kind: MessageKind::Default,
            nonce: Some(request.nonce),
            mentions: Vec::new(),
            reactions: Vec::new(),
            sent_at: Utc::now(),
            edited_at: None,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(args.log.as_str())
        .init();

    match args.command {
        Command::Replay { fixture } => replay(fixture).await,
        Command::Tail {
            server_url,
            channel,
            user_id,
        } => tail(server_url, ChannelId(channel), UserId(user_id)).await,
    }
}

async fn replay(path: PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw)
        .with_context(|| format!("invalid fixture {}", path.display()))?;

    let next_id = fixture
        .history
        .iter()
        .chain(&fixture.older)
        .map(|m| m.message_id.0)
        .max()
        .unwrap_or(0)
        + 1;
    let fetcher = Arc::new(FixtureHistory {
        latest: fixture.history,
        older: fixture.older,
    });
    let sender = Arc::new(EchoSender {
        author_id: fixture.self_user_id,
        next_id: AtomicI64::new(next_id),
    });
    let mut view = ChannelView::new(
        load_settings(),
        fixture.self_user_id,
        RecordingSink::new(),
        fetcher,
    )
    .with_sender(sender);

    view.switch_channel(fixture.channel_id);
    report(settle(&mut view).await?);

    for step in fixture.steps {
        match step {
            Step::Gateway { event } => {
                let kind = event.kind();
                let disposition = view.handle_gateway(event);
                info!(event = kind, ?disposition, "replay: gateway event");
            }
            Step::Send { content } => {
                if view.send(content).is_some() {
                    report(settle(&mut view).await?);
                }
            }
            Step::LoadMore => {
                if view.load_more().is_some() {
                    report(settle(&mut view).await?);
                }
            }
            Step::Scroll { at_bottom } => view.set_scrolled_to_bottom(at_bottom),
        }
    }

    let ops = view.sink_mut().take();
    debug!(render_ops = ops.len(), "replay: finished");
    print_rows(view.store());
    Ok(())
}

async fn tail(server_url: String, channel_id: ChannelId, user_id: UserId) -> Result<()> {
    let api = Arc::new(HttpChatApi::new(server_url, user_id));
    info!(server_url = api.server_url(), channel_id = channel_id.0, "tail: connecting");
    let mut view = ChannelView::new(load_settings(), user_id, RecordingSink::new(), api.clone())
        .with_sender(api.clone())
        .with_member_resolver(api);
    view.switch_channel(channel_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                handle_input(&mut view, line.trim())?;
            }
            change = view.next_update() => {
                let change = change.ok_or_else(|| anyhow!("view update queue closed"))?;
                let reprint = matches!(change, ViewChange::Loaded { .. } | ViewChange::Paged { .. });
                report(change);
                if reprint {
                    print_rows(view.store());
                }
            }
        }
    }
    Ok(())
}

fn handle_input<S: RenderSink>(view: &mut ChannelView<S>, line: &str) -> Result<()> {
    match line {
        "" => {}
        "/more" => {
            if view.load_more().is_none() {
                println!("nothing older to load");
            }
        }
        "/top" => view.set_scrolled_to_bottom(false),
        "/bottom" => view.set_scrolled_to_bottom(true),
        "/rows" => print_rows(view.store()),
        line if line.starts_with('{') => {
            let event: GatewayEvent =
                serde_json::from_str(line).context("invalid gateway event")?;
            println!("{:?}", view.handle_gateway(event));
        }
        content => {
            if view.send(content).is_none() {
                println!("no channel open");
            }
        }
    }
    Ok(())
}

async fn settle<S: RenderSink>(view: &mut ChannelView<S>) -> Result<ViewChange> {
    tokio::time::timeout(Duration::from_secs(10), view.next_update())
        .await
        .context("timed out waiting for background work")?
        .ok_or_else(|| anyhow!("view update queue closed"))
}

fn report(change: ViewChange) {
    match change {
        ViewChange::Loaded { count } => println!("loaded {count} messages"),
        ViewChange::LoadFailed(err) => println!("failed to load channel: {err}"),
        ViewChange::Paged { count } => println!("loaded {count} older messages"),
        ViewChange::PageFailed(err) => println!("failed to load older messages: {err}"),
        ViewChange::Accepted { nonce } => println!("sent {nonce}"),
        ViewChange::Confirmed { nonce } => println!("confirmed {nonce}"),
        ViewChange::SendFailed { nonce, error } => println!("send {nonce} failed: {error}"),
        ViewChange::AuthorsRefreshed { user_id, rows } => {
            debug!(user_id = user_id.0, rows, "tail: author resolved")
        }
        ViewChange::AuthorUnresolved { user_id } => {
            debug!(user_id = user_id.0, "tail: author lookup failed")
        }
        ViewChange::Discarded => {}
    }
}

fn print_rows<S: RenderSink>(store: &MessageStore<S>) {
    for message in store.iter() {
        let id = message
            .id
            .map_or_else(|| "pending".to_string(), |id| id.to_string());
        let author = message
            .author_name
            .clone()
            .unwrap_or_else(|| format!("user {}", message.author_id));
        let stamp = message
            .offset_label()
            .unwrap_or_else(|| message.timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
        let marker = if message.is_failed() { " (failed)" } else { "" };
        if message.condensed {
            println!("{id:>20}   {stamp:>6} {}{marker}", message.content);
        } else {
            println!("{id:>20} {author} [{stamp}] {}{marker}", message.content);
        }
        for reaction in &message.reactions {
            println!("{:>20}   {} x{}", "", reaction.emoji, reaction.count);
        }
    }
}
