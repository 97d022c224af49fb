use super::*;
use crate::{condense::CondensePolicy, render::NullSink};
use chrono::{TimeDelta, TimeZone, Utc};
use shared::domain::{MessageKind, UserId};

const X: ChannelId = ChannelId(1);
const Y: ChannelId = ChannelId(2);

fn payload(channel_id: ChannelId, id: i64) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(id),
        channel_id,
        guild_id: None,
        author_id: UserId(id % 2),
        author_username: None,
        content: format!("#{id}"),
        kind: MessageKind::Default,
        nonce: None,
        mentions: Vec::new(),
        reactions: Vec::new(),
        sent_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(id),
        edited_at: None,
    }
}

fn page(channel_id: ChannelId, ids: &[i64]) -> Vec<MessagePayload> {
    ids.iter().map(|id| payload(channel_id, *id)).collect()
}

fn store() -> MessageStore<NullSink> {
    MessageStore::new(NullSink, CondensePolicy::default())
}

fn ids(store: &MessageStore<NullSink>) -> Vec<i64> {
    store.iter().filter_map(|m| m.id).map(|id| id.0).collect()
}

#[test]
fn bulk_load_is_sorted_ascending() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let ticket = loader.begin_switch(X);
    assert_eq!(loader.state(), &LoadState::Loading);

    let outcome = loader.commit_load(ticket, Ok(page(X, &[9, 7, 8])), &mut store);

    assert_eq!(outcome, LoadOutcome::Applied { count: 3 });
    assert_eq!(loader.state(), &LoadState::Ready);
    assert_eq!(ids(&store), vec![7, 8, 9]);
    assert_eq!(store.channel_id(), Some(X));
}

#[test]
fn failed_load_leaves_store_untouched() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let first = loader.begin_switch(X);
    loader.commit_load(first, Ok(page(X, &[1, 2])), &mut store);

    let retry = loader.begin_switch(X);
    let outcome = loader.commit_load(retry, Err(FetchError::Status { status: 502 }), &mut store);

    assert_eq!(outcome, LoadOutcome::Failed(FetchError::Status { status: 502 }));
    assert_eq!(
        loader.state(),
        &LoadState::Error(FetchError::Status { status: 502 })
    );
    assert_eq!(ids(&store), vec![1, 2]);
}

#[test]
fn result_for_a_channel_switched_away_from_is_discarded() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let for_x = loader.begin_switch(X);
    let for_y = loader.begin_switch(Y);

    assert_eq!(
        loader.commit_load(for_x, Ok(page(X, &[1, 2, 3])), &mut store),
        LoadOutcome::Stale
    );
    assert!(store.is_empty());

    loader.commit_load(for_y, Ok(page(Y, &[10])), &mut store);
    assert_eq!(ids(&store), vec![10]);
}

#[test]
fn same_channel_reload_invalidates_the_older_ticket() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let old = loader.begin_switch(X);
    let new = loader.begin_switch(X);

    assert_eq!(
        loader.commit_load(old, Ok(page(X, &[1])), &mut store),
        LoadOutcome::Stale
    );
    assert_eq!(
        loader.commit_load(new, Ok(page(X, &[2])), &mut store),
        LoadOutcome::Applied { count: 1 }
    );
}

#[test]
fn foreign_channel_rows_in_a_response_are_dropped() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let ticket = loader.begin_switch(X);
    let mut rows = page(X, &[1]);
    rows.extend(page(Y, &[2]));

    loader.commit_load(ticket, Ok(rows), &mut store);
    assert_eq!(ids(&store), vec![1]);
}

#[test]
fn pagination_waits_for_a_full_window() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let ticket = loader.begin_switch(X);
    loader.commit_load(ticket, Ok(page(X, &[10, 11])), &mut store);

    assert!(loader.begin_pagination(&store).is_none());
    assert_eq!(loader.state(), &LoadState::Ready);
}

#[test]
fn pagination_prepends_older_rows_in_ascending_order() {
    let mut loader = HistoryLoader::new(3);
    let mut store = store();
    let ticket = loader.begin_switch(X);
    loader.commit_load(ticket, Ok(page(X, &[10, 11, 12])), &mut store);

    let page_ticket = loader.begin_pagination(&store).expect("page ticket");
    assert_eq!(page_ticket.before, MessageId(10));
    assert_eq!(loader.state(), &LoadState::PaginationPending);
    assert!(loader.begin_pagination(&store).is_none(), "one page at a time");

    let outcome = loader.commit_page(page_ticket, Ok(page(X, &[5, 3, 4, 10, 20])), &mut store);

    assert_eq!(outcome, LoadOutcome::Applied { count: 3 });
    assert_eq!(ids(&store), vec![3, 4, 5, 10, 11, 12]);
    assert_eq!(loader.state(), &LoadState::Ready);
}

#[test]
fn failed_page_keeps_rows_and_allows_retry() {
    let mut loader = HistoryLoader::new(2);
    let mut store = store();
    let ticket = loader.begin_switch(X);
    loader.commit_load(ticket, Ok(page(X, &[10, 11])), &mut store);

    let page_ticket = loader.begin_pagination(&store).expect("page ticket");
    let outcome = loader.commit_page(page_ticket, Err(FetchError::Unavailable), &mut store);

    assert_eq!(outcome, LoadOutcome::Failed(FetchError::Unavailable));
    assert_eq!(ids(&store), vec![10, 11]);
    assert!(loader.begin_pagination(&store).is_some());
}

#[test]
fn page_arriving_after_a_switch_is_discarded() {
    let mut loader = HistoryLoader::new(2);
    let mut store = store();
    let ticket = loader.begin_switch(X);
    loader.commit_load(ticket, Ok(page(X, &[10, 11])), &mut store);
    let page_ticket = loader.begin_pagination(&store).expect("page ticket");

    store.reset(Y);
    loader.begin_switch(Y);

    assert_eq!(
        loader.commit_page(page_ticket, Ok(page(X, &[1, 2])), &mut store),
        LoadOutcome::Stale
    );
    assert!(store.is_empty());
}
