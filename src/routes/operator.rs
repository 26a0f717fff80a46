//! Operator commands. Every handler first checks the caller against `operator_ids`.

use std::sync::Arc;

use crate::{
    app::AppState,
    broadcast::{spawn_broadcast, WizardInput, WizardOutcome},
    domain::{
        errors::ApiError,
        fields::{PhotoRef, Task, TaskProof, UserId},
    },
    repository,
    services::tasks::{self, ReviewResult},
};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

fn require_operator(state: &AppState, user_id: UserId) -> Result<UserId, ApiError> {
    if state.config.bot.is_operator(user_id) {
        Ok(user_id)
    } else {
        tracing::warn!("user {} tried an operator command", user_id);
        Err(ApiError::NotOperator)
    }
}

#[derive(Deserialize)]
pub struct PostTaskRequest {
    photo: PhotoRef,
    description: String,
}

/// Replaces the current task and announces it to every user in the background.
pub async fn post_task(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
    Json(payload): Json<PostTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let operator = require_operator(&state, operator)?;
    let pool = state.get_pool();
    let task = tasks::post_task(
        &pool,
        payload.photo,
        &payload.description,
        OffsetDateTime::now_utc(),
    )
    .await?;

    spawn_broadcast(
        pool,
        state.platform(),
        state.get_sender(),
        operator,
        tasks::task_announcement(&task),
    );
    Ok(Json(task))
}

pub async fn list_proofs(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
) -> Result<Json<Vec<TaskProof>>, ApiError> {
    require_operator(&state, operator)?;
    let proofs = tasks::pending_proofs(&state.get_pool()).await?;
    Ok(Json(proofs))
}

#[derive(Serialize)]
pub struct ClearedResponse {
    cleared: u64,
}

pub async fn clear_proofs(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
) -> Result<Json<ClearedResponse>, ApiError> {
    require_operator(&state, operator)?;
    let cleared = tasks::clear_reviewed_proofs(&state.get_pool()).await?;
    Ok(Json(ClearedResponse { cleared }))
}

/// Target ids arrive as free text, e.g. pasted from the proof list.
#[derive(Deserialize)]
pub struct ReviewRequest {
    targets: String,
}

pub async fn approve_tasks(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<Vec<ReviewResult>>, ApiError> {
    require_operator(&state, operator)?;
    let targets = tasks::parse_target_ids(&payload.targets);
    let results = tasks::approve(&state.get_pool(), state.platform().as_ref(), &targets).await?;
    Ok(Json(results))
}

pub async fn disapprove_tasks(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<Vec<ReviewResult>>, ApiError> {
    require_operator(&state, operator)?;
    let targets = tasks::parse_target_ids(&payload.targets);
    let results = tasks::disapprove(state.platform().as_ref(), &targets).await;
    Ok(Json(results))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalUsersResponse {
    total_users: i64,
}

pub async fn total_users(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
) -> Result<Json<TotalUsersResponse>, ApiError> {
    require_operator(&state, operator)?;
    let total_users = repository::total_users(&state.get_pool()).await?;
    Ok(Json(TotalUsersResponse { total_users }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopReferrerResponse {
    user_id: UserId,
    referrals: i64,
}

pub async fn top_referrer(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
) -> Result<Json<Option<TopReferrerResponse>>, ApiError> {
    require_operator(&state, operator)?;
    let top = repository::top_referrer(&state.get_pool())
        .await?
        .map(|(user_id, referrals)| TopReferrerResponse { user_id, referrals });
    Ok(Json(top))
}

#[derive(Deserialize)]
pub struct BroadcastRequest {
    input: WizardInput,
}

/// One step of the broadcast wizard. A committed message goes out on a spawned task.
pub async fn broadcast_step(
    State(state): State<Arc<AppState>>,
    Path(operator): Path<UserId>,
    Json(payload): Json<BroadcastRequest>,
) -> Result<Json<WizardOutcome>, ApiError> {
    let operator = require_operator(&state, operator)?;
    let platform = state.platform();
    let outcome = state
        .wizard
        .handle(platform.as_ref(), operator, payload.input)
        .await?;

    if let WizardOutcome::Committed(message) = &outcome {
        spawn_broadcast(
            state.get_pool(),
            platform,
            state.get_sender(),
            operator,
            message.clone(),
        );
    }
    Ok(Json(outcome))
}
