//! HTTP handlers translating requests into store calls.
//!
//! # Design
//! Handlers own validation and status mapping only. Store results arrive as
//! `Option`/row counts and map to 200/204; store errors are logged by the
//! store and surface here as a generic 500 envelope.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error};

use crate::{
    context::RequestContext,
    error::ApiError,
    models::{IdQuery, NewTodo, TodoPostRequest, TodoPostResponse},
    router::AppState,
};

pub const ID_REQUIRED: &str = "id is required";
pub const ID_NOT_INTEGER: &str = "id must be an integer";
pub const INVALID_BODY: &str = "invalid body";

pub async fn get_todo(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    fetch(&state, &ctx, Some(&id)).await
}

pub async fn get_todo_by_query(
    State(state): State<AppState>,
    ctx: RequestContext,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let id = query.ok().and_then(|Query(query)| query.id);
    fetch(&state, &ctx, id.as_deref()).await
}

pub async fn delete_todo(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    remove(&state, &ctx, Some(&id)).await
}

pub async fn delete_todo_by_query(
    State(state): State<AppState>,
    ctx: RequestContext,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let id = query.ok().and_then(|Query(query)| query.id);
    remove(&state, &ctx, id.as_deref()).await
}

pub async fn post_todo(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<TodoPostRequest>, JsonRejection>,
) -> Result<Json<TodoPostResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(request_id = %ctx.request_id, reason = %rejection, "failed to decode todo body");
        ApiError::bad_request(INVALID_BODY)
    })?;

    request.validate().map_err(|reason| {
        debug!(request_id = %ctx.request_id, reason, "invalid todo post");
        ApiError::bad_request(reason)
    })?;

    let id = state
        .store
        .post_todo(&ctx, NewTodo { todo: request.todo })
        .await
        .map_err(|err| {
            error!(request_id = %ctx.request_id, error = %err, "failed to insert todo record");
            ApiError::Internal("internal server error with request")
        })?;

    Ok(Json(TodoPostResponse { id }))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn fetch(state: &AppState, ctx: &RequestContext, raw_id: Option<&str>) -> Result<Response, ApiError> {
    let id = parse_id(ctx, raw_id)?;

    let item = state.store.get_todo(ctx, id).await.map_err(|err| {
        error!(id, request_id = %ctx.request_id, error = %err, "failed to get todo item");
        ApiError::Internal("error retrieving record")
    })?;

    Ok(match item {
        Some(item) => (StatusCode::OK, Json(item)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn remove(state: &AppState, ctx: &RequestContext, raw_id: Option<&str>) -> Result<Response, ApiError> {
    let id = parse_id(ctx, raw_id)?;

    let count = state.store.delete_todo(ctx, id).await.map_err(|err| {
        error!(id, request_id = %ctx.request_id, error = %err, "failed to delete todo");
        ApiError::Internal("internal server error with request")
    })?;

    if count == 0 {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    debug!(id, request_id = %ctx.request_id, count, "rows deleted");
    Ok(StatusCode::OK.into_response())
}

fn parse_id(ctx: &RequestContext, raw: Option<&str>) -> Result<i64, ApiError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        debug!(request_id = %ctx.request_id, "missing id in request");
        return Err(ApiError::bad_request(ID_REQUIRED));
    }
    raw.parse().map_err(|_| {
        debug!(request_id = %ctx.request_id, raw, "id is not an integer");
        ApiError::bad_request(ID_NOT_INTEGER)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_integers() {
        let ctx = RequestContext::new();
        assert_eq!(parse_id(&ctx, Some("17")).unwrap(), 17);
        assert_eq!(parse_id(&ctx, Some(" -3 ")).unwrap(), -3);
    }

    #[test]
    fn parse_id_requires_a_value() {
        let ctx = RequestContext::new();
        for raw in [None, Some(""), Some("  ")] {
            let err = parse_id(&ctx, raw).unwrap_err();
            assert_eq!(err.to_string(), ID_REQUIRED);
        }
    }

    #[test]
    fn parse_id_rejects_non_integers() {
        let ctx = RequestContext::new();
        for raw in ["abc", "1.5", "1e3", "99999999999999999999"] {
            let err = parse_id(&ctx, Some(raw)).unwrap_err();
            assert_eq!(err.to_string(), ID_NOT_INTEGER);
        }
    }
}
