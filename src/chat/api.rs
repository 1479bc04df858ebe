use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
};
use uuid::Uuid;

use crate::{
    chat::{
        models::{
            MessageCreate, MessageView, PageQuery, PageResponse, SessionCreate, SessionFavorite,
            SessionQuery, SessionRename, SessionView,
        },
        store::ChatStore,
    },
    error::{AppError, AppResult},
};

pub fn routes(store: Arc<ChatStore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/session", post(create_session).get(list_sessions))
        .route("/api/v1/session/{id}", delete(delete_session))
        .route("/api/v1/session/{id}/rename", patch(rename_session))
        .route("/api/v1/session/{id}/favorite", patch(favorite_session))
        .route(
            "/api/v1/session/{id}/messages",
            post(add_message).get(list_messages),
        )
        .with_state(store)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn create_session(
    State(store): State<Arc<ChatStore>>,
    Json(request): Json<SessionCreate>,
) -> AppResult<Json<SessionView>> {
    require_non_blank("userId", &request.user_id)?;
    tracing::info!(user_id = %request.user_id, "create session");

    let session = store.create_session(request.user_id, request.title);
    tracing::debug!(session_id = %session.id, "created session");
    Ok(Json(session.into()))
}

async fn list_sessions(
    State(store): State<Arc<ChatStore>>,
    Query(query): Query<SessionQuery>,
) -> Json<Vec<SessionView>> {
    tracing::info!(user_id = %query.user_id, favorite = ?query.favorite, "list sessions");
    Json(
        store
            .list_sessions(&query.user_id, query.favorite)
            .into_iter()
            .map(SessionView::from)
            .collect(),
    )
}

async fn rename_session(
    State(store): State<Arc<ChatStore>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SessionRename>,
) -> AppResult<Json<SessionView>> {
    require_non_blank("title", &request.title)?;
    tracing::info!(session_id = %id, "rename session");
    Ok(Json(store.rename(id, request.title)?.into()))
}

async fn favorite_session(
    State(store): State<Arc<ChatStore>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SessionFavorite>,
) -> AppResult<Json<SessionView>> {
    tracing::info!(session_id = %id, favorite = request.is_favorite, "favorite session");
    Ok(Json(store.set_favorite(id, request.is_favorite)?.into()))
}

async fn delete_session(
    State(store): State<Arc<ChatStore>>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    tracing::info!(session_id = %id, "soft delete session");
    store.soft_delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_message(
    State(store): State<Arc<ChatStore>>,
    Path(id): Path<Uuid>,
    Json(request): Json<MessageCreate>,
) -> AppResult<Json<MessageView>> {
    require_non_blank("createdBy", &request.created_by)?;
    require_non_blank("content", &request.content)?;
    tracing::info!(session_id = %id, "add message");

    let message = store.add_message(id, request.created_by, request.content, request.context)?;
    Ok(Json(message.into()))
}

async fn list_messages(
    State(store): State<Arc<ChatStore>>,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<PageResponse<MessageView>>> {
    let size = query.size.max(1);
    tracing::debug!(session_id = %id, page = query.page, size, "list messages");

    let (items, total) = store.list_messages(id, query.page, size)?;
    Ok(Json(PageResponse {
        content: items.into_iter().map(MessageView::from).collect(),
        page: query.page,
        size,
        total_elements: total,
        total_pages: total.div_ceil(size),
    }))
}

fn require_non_blank(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be blank")));
    }
    Ok(())
}
