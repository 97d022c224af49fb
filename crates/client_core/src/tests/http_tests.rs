use super::*;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode as AxumStatus,
    routing::get,
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use shared::{domain::MessageKind, error::ErrorCode};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Deserialize)]
struct ListQuery {
    user_id: i64,
    limit: u32,
    before: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SendQuery {
    user_id: i64,
}

#[derive(Clone, Default)]
struct ServerState {
    list_queries: Arc<Mutex<Vec<(i64, i64, u32, Option<i64>)>>>,
    sent: Arc<Mutex<Vec<(i64, SendMessageRequest)>>>,
}

fn payload(channel_id: i64, id: i64, nonce: Option<&str>) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(id),
        channel_id: ChannelId(channel_id),
        guild_id: None,
        author_id: UserId(1),
        author_username: Some("ada".to_string()),
        content: format!("#{id}"),
        kind: MessageKind::Default,
        nonce: nonce.map(str::to_string),
        mentions: Vec::new(),
        reactions: Vec::new(),
        sent_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        edited_at: None,
    }
}

async fn list_messages(
    State(state): State<ServerState>,
    Path(channel_id): Path<i64>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<MessagePayload>>, (AxumStatus, Json<ApiError>)> {
    state
        .list_queries
        .lock()
        .await
        .push((channel_id, q.user_id, q.limit, q.before));
    if channel_id == 403 {
        return Err((
            AxumStatus::FORBIDDEN,
            Json(ApiError::new(ErrorCode::Forbidden, "not a member")),
        ));
    }
    Ok(Json(vec![payload(channel_id, 3, None), payload(channel_id, 2, None)]))
}

async fn create_message(
    State(state): State<ServerState>,
    Path(channel_id): Path<i64>,
    Query(q): Query<SendQuery>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<MessagePayload>, AxumStatus> {
    assert_eq!(q.user_id, 1);
    if channel_id == 500 {
        return Err(AxumStatus::INTERNAL_SERVER_ERROR);
    }
    let echo = payload(channel_id, 77, Some(&request.nonce));
    state.sent.lock().await.push((channel_id, request));
    Ok(Json(echo))
}

async fn get_user(Path(user_id): Path<i64>) -> Result<Json<UserProfile>, AxumStatus> {
    if user_id == 404 {
        return Err(AxumStatus::NOT_FOUND);
    }
    Ok(Json(UserProfile {
        user_id: UserId(user_id),
        username: format!("user-{user_id}"),
    }))
}

async fn spawn_server() -> Result<(String, ServerState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route(
            "/channels/:channel_id/messages",
            get(list_messages).post(create_message),
        )
        .route("/users/:user_id", get(get_user))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), state))
}

#[tokio::test]
async fn fetches_history_and_passes_pagination_cursor() -> Result<()> {
    let (server_url, state) = spawn_server().await?;
    let api = HttpChatApi::new(server_url, UserId(1));

    let latest = api.fetch_history(ChannelId(5), 500).await?;
    assert_eq!(latest.len(), 2);
    let older = api
        .fetch_history_before(ChannelId(5), MessageId(2), 25)
        .await?;
    assert_eq!(older.len(), 2);

    let queries = state.list_queries.lock().await.clone();
    assert_eq!(
        queries,
        vec![(5, 1, MAX_PAGE, None), (5, 1, 25, Some(2))]
    );
    Ok(())
}

#[tokio::test]
async fn server_error_body_surfaces_as_api_error() -> Result<()> {
    let (server_url, _state) = spawn_server().await?;
    let api = HttpChatApi::new(server_url, UserId(1));

    let err = api
        .fetch_history(ChannelId(403), 10)
        .await
        .expect_err("forbidden");
    assert_eq!(
        err,
        FetchError::Api(ApiError::new(ErrorCode::Forbidden, "not a member"))
    );
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let api = HttpChatApi::new("http://127.0.0.1:1", UserId(1));
    let err = api
        .fetch_history(ChannelId(1), 10)
        .await
        .expect_err("no server");
    assert!(matches!(err, FetchError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn send_returns_server_copy_with_nonce() -> Result<()> {
    let (server_url, state) = spawn_server().await?;
    let api = HttpChatApi::new(server_url, UserId(1));

    let echo = api
        .send_message(
            ChannelId(5),
            SendMessageRequest {
                content: "hello".to_string(),
                nonce: "n-1".to_string(),
            },
        )
        .await?
        .expect("echo");
    assert_eq!(echo.message_id, MessageId(77));
    assert_eq!(echo.nonce.as_deref(), Some("n-1"));

    let sent = state.sent.lock().await.clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.content, "hello");
    Ok(())
}

#[tokio::test]
async fn send_failure_maps_status() -> Result<()> {
    let (server_url, _state) = spawn_server().await?;
    let api = HttpChatApi::new(server_url, UserId(1));

    let err = api
        .send_message(
            ChannelId(500),
            SendMessageRequest {
                content: "hello".to_string(),
                nonce: "n-2".to_string(),
            },
        )
        .await
        .expect_err("server error");
    assert_eq!(err, SendError::Status { status: 500 });
    Ok(())
}

#[tokio::test]
async fn member_lookup_treats_404_as_unknown() -> Result<()> {
    let (server_url, _state) = spawn_server().await?;
    let api = HttpChatApi::new(server_url, UserId(1));

    let profile = api.resolve_member(UserId(8)).await?.expect("profile");
    assert_eq!(profile.username, "user-8");
    assert!(api.resolve_member(UserId(404)).await?.is_none());
    Ok(())
}
