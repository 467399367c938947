use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use domain::{Message, MessageId, OnlineUser};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection::ChatConnection};

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    before: Option<i64>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/presence", get(online_users))
        .route("/messages", get(get_history))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 升级之前完成令牌校验，失败直接返回 401
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state.jwt_service.session_from_token(&query.token)?;
    tracing::debug!(user_id = %session.user_id, "websocket upgrade accepted");

    let connection = ChatConnection::new(state, session);
    Ok(ws.on_upgrade(move |socket| connection.run(socket)))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<OnlineUser>>, ApiError> {
    state.jwt_service.extract_session_from_headers(&headers)?;
    Ok(Json(state.coordinator.online_users()))
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let session = state.jwt_service.extract_session_from_headers(&headers)?;
    let messages = state
        .coordinator
        .history(&session, params.before.map(MessageId::new), params.limit)
        .await?;
    Ok(Json(messages))
}
