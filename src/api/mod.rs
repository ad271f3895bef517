//! Administrative HTTP routes
//!
//! Synchronous counterparts of the real-time operations. Results reached
//! through these routes are also pushed to the match rooms, so connected
//! players see the same events either way.

use crate::auth::{bearer_token, IdentityVerifier};
use crate::error::{ArenaError, ErrorKind};
use crate::game::{parse_duration, parse_player_ids, MatchEngine, MatchOrigin};
use crate::matchmaking::MatchmakingQueue;
use crate::transport::Dispatcher;
use crate::types::{JoinOutcome, Match, UserId};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared handles for the admin routes
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<MatchEngine>,
    pub queue: Arc<MatchmakingQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Domain error rendered as `{ statusCode, message }`
#[derive(Debug)]
pub struct ApiError(ArenaError);

impl From<ArenaError> for ApiError {
    fn from(error: ArenaError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Admin request failed: {}", self.0);
        }

        let body = json!({
            "statusCode": status.as_u16(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/social-tournament/matches", post(create_match))
        .route("/social-tournament/matches/{match_id}", get(get_match))
        .route(
            "/social-tournament/matches/{match_id}/answer",
            post(submit_answer),
        )
        .route("/game/social/join", post(join_matchmaking))
        .with_state(state)
}

fn parse_body(body: &Bytes) -> ApiResult<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|_| ApiError(ArenaError::validation("Request body must be valid JSON")))
}

fn caller_identity(state: &ApiState, headers: &HeaderMap) -> ApiResult<UserId> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| ArenaError::unauthorized("Bearer token is required"))?;
    Ok(state.verifier.verify(token)?)
}

async fn create_match(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Match>)> {
    let body = parse_body(&body)?;
    let player_ids = parse_player_ids(body.get("playerIds").unwrap_or(&Value::Null))?;
    let duration = parse_duration(body.get("durationMinutes"))?;

    let game = state
        .engine
        .create_match(&player_ids, duration, MatchOrigin::Admin)
        .await?;
    Ok((StatusCode::CREATED, Json(game)))
}

async fn get_match(
    State(state): State<ApiState>,
    Path(match_id): Path<String>,
) -> ApiResult<Json<Match>> {
    Ok(Json(state.engine.get_match(&match_id).await?))
}

async fn submit_answer(
    State(state): State<ApiState>,
    Path(match_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Match>)> {
    let user_id = caller_identity(&state, &headers)?;
    let body = parse_body(&body)?;
    let answer = body.get("answer").cloned().unwrap_or(Value::Null);

    let outcome = state.engine.submit_answer(&match_id, user_id, &answer).await?;
    if let Err(e) = state.dispatcher.publish_submit_outcome(&outcome) {
        warn!("Failed to publish answer results for match {}: {}", match_id, e);
    }

    info!("User {} answered match {} over HTTP", user_id, match_id);
    Ok((StatusCode::CREATED, Json(outcome.game)))
}

async fn join_matchmaking(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<JoinOutcome>)> {
    let user_id = caller_identity(&state, &headers)?;
    let body = parse_body(&body)?;

    let outcome = state
        .queue
        .join_raw(
            user_id,
            body.get("mode").and_then(Value::as_str),
            body.get("stakeAmount"),
        )
        .await?;

    if let Err(e) = state.dispatcher.publish_join_outcome(&outcome) {
        warn!("Failed to announce match to rooms: {}", e);
    }
    Ok((StatusCode::CREATED, Json(outcome)))
}
