use std::sync::Arc;

use crate::{
    app::AppState,
    domain::{
        constants::REFERRAL_REWARD,
        errors::ApiError,
        events::{AppEvent, NewReferralEvent, ReferralRewardEvent, WithdrawalEvent},
        fields::{PhotoRef, Profile, User, UserId},
    },
    platform::{ensure_joined, missing_channels},
    repository::require_user,
    services::{
        claim::{self, Booster, BoosterOutcome, BoosterQuote, ClaimReceipt},
        exchange::{self, Withdrawal},
        referral::{self, ReferralSummary, WalletUpdate},
        tasks::{self, TaskStatus},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Claim, boosters, referrals and tasks are only open to users in every configured channel.
async fn require_channels(state: &AppState, user_id: UserId) -> Result<(), ApiError> {
    ensure_joined(state.platform().as_ref(), &state.config.bot.channels, user_id).await?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    user_id: UserId,
    #[serde(flatten)]
    profile: Profile,
    referrer_id: Option<UserId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(flatten)]
    user: User,
    is_new: bool,
    /// First name of the referrer named on this contact.
    referred_by: Option<String>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let registration = referral::register(
        &state.get_pool(),
        &state.config.bot.username,
        payload.user_id,
        payload.profile,
        payload.referrer_id,
        OffsetDateTime::now_utc(),
    )
    .await?;

    let status = if registration.is_new {
        state.publish(AppEvent::NewRegister(registration.user.clone()));
        if let Some(referrer) = registration.user.referrer_id {
            state.publish(AppEvent::NewReferral(NewReferralEvent {
                referrer,
                referred_user: registration.user.id,
            }));
        }
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let referred_by = registration
        .referrer
        .and_then(|referrer| referrer.profile.first_name);
    Ok((
        status,
        Json(RegisterResponse {
            user: registration.user,
            is_new: registration.is_new,
            referred_by,
        }),
    ))
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>, ApiError> {
    let user = require_user(&state.get_pool(), user_id).await?;
    Ok(Json(user))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    joined: bool,
    missing_channels: Vec<String>,
}

pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Json<SubscriptionResponse> {
    let missing =
        missing_channels(state.platform().as_ref(), &state.config.bot.channels, user_id).await;
    Json(SubscriptionResponse {
        joined: missing.is_empty(),
        missing_channels: missing,
    })
}

#[derive(Deserialize)]
pub struct WalletRequest {
    address: String,
}

pub async fn submit_wallet(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<WalletRequest>,
) -> Result<Json<WalletUpdate>, ApiError> {
    let update = referral::submit_wallet(
        &state.get_pool(),
        state.platform().as_ref(),
        user_id,
        &payload.address,
    )
    .await?;

    if let Some(referrer) = update.referrer_rewarded {
        state.publish(AppEvent::ReferralRewarded(ReferralRewardEvent {
            referrer,
            referred_user: user_id,
            amount: REFERRAL_REWARD,
        }));
    }
    Ok(Json(update))
}

pub async fn claim(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<ClaimReceipt>, ApiError> {
    require_channels(&state, user_id).await?;
    let receipt = claim::try_claim(&state.get_pool(), user_id, OffsetDateTime::now_utc()).await?;
    Ok(Json(receipt))
}

#[derive(Deserialize)]
pub struct BoosterRequest {
    booster: Booster,
}

pub async fn quote_booster(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<BoosterRequest>,
) -> Result<Json<BoosterQuote>, ApiError> {
    require_channels(&state, user_id).await?;
    let quote =
        claim::quote_booster(&state.get_pool(), &state.boosters, user_id, payload.booster).await?;
    Ok(Json(quote))
}

#[derive(Deserialize)]
pub struct BoosterReply {
    text: String,
}

pub async fn answer_booster(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<BoosterReply>,
) -> Result<Json<BoosterOutcome>, ApiError> {
    let outcome =
        claim::answer_booster(&state.get_pool(), &state.boosters, user_id, &payload.text).await?;
    Ok(Json(outcome))
}

pub async fn get_referrals(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<ReferralSummary>, ApiError> {
    require_channels(&state, user_id).await?;
    let summary = referral::referral_summary(&state.get_pool(), user_id).await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct WithdrawalRequest {
    amount: i64,
}

pub async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<WithdrawalRequest>,
) -> Result<Json<Withdrawal>, ApiError> {
    let withdrawal =
        exchange::request_withdrawal(&state.get_pool(), user_id, payload.amount).await?;

    state.publish(AppEvent::WithdrawalRequested(WithdrawalEvent {
        user_id,
        amount: withdrawal.amount,
        wallet_address: withdrawal.wallet_address.clone(),
    }));
    Ok(Json(withdrawal))
}

pub async fn get_tasks(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<TaskStatus>, ApiError> {
    require_channels(&state, user_id).await?;
    let status = tasks::task_status(&state.get_pool(), user_id).await?;
    Ok(Json(status))
}

#[derive(Deserialize)]
pub struct ProofRequest {
    photo: PhotoRef,
}

pub async fn submit_proof(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<ProofRequest>,
) -> Result<StatusCode, ApiError> {
    require_channels(&state, user_id).await?;
    tasks::submit_proof(
        &state.get_pool(),
        user_id,
        payload.photo,
        OffsetDateTime::now_utc(),
    )
    .await?;
    Ok(StatusCode::CREATED)
}
