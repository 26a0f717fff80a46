//! Claim cooldown and the two paid boosters.

use std::{collections::HashMap, sync::Mutex};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};

use crate::{
    domain::{
        constants::{BOOSTER_PRICE, CLAIM_COOLDOWN, CLAIM_REWARD, TIME_SPEED_SHIFT},
        errors::LedgerError,
        fields::UserId,
    },
    repository::{
        adjust_balance, begin, commit, enable_double_mine, enable_time_speed, require_user,
        set_last_claim,
    },
};

/// The only reply that confirms a booster purchase.
pub const CONFIRM_REPLY: &str = "Yes, deduct and proceed";

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub amount: i64,
    pub balance: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub next_claim_at: OffsetDateTime,
}

/// Time left before the next claim, or `None` when a claim is allowed now.
pub fn claim_wait(last_claim_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<Duration> {
    let remaining = CLAIM_COOLDOWN - (now - last_claim_at?);
    (remaining > Duration::ZERO).then_some(remaining)
}

pub async fn try_claim(
    pool: &SqlitePool,
    user_id: UserId,
    now: OffsetDateTime,
) -> Result<ClaimReceipt, LedgerError> {
    let mut tx = begin(pool).await?;
    let user = require_user(&mut *tx, user_id).await?;

    if let Some(remaining) = claim_wait(user.last_claim_at, now) {
        return Err(LedgerError::ClaimTooSoon(remaining));
    }

    let balance = adjust_balance(&mut tx, user_id, CLAIM_REWARD).await?;
    set_last_claim(&mut *tx, user_id, now).await?;
    commit(tx).await?;

    tracing::info!("user {} claimed {} >>> balance {}", user_id, CLAIM_REWARD, balance);
    Ok(ClaimReceipt {
        amount: CLAIM_REWARD,
        balance,
        next_claim_at: now + CLAIM_COOLDOWN,
    })
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Booster {
    TimeSpeed,
    DoubleMine,
}

impl Booster {
    fn prompt(&self) -> String {
        match self {
            Self::TimeSpeed => format!(
                "Do you want to proceed? The bot is about to deduct {} coins to speed up your daily claim time from 24 hours to 18 hours.",
                BOOSTER_PRICE
            ),
            Self::DoubleMine => format!(
                "Do you want to proceed? The bot is about to deduct {} coins to double your mining rewards.",
                BOOSTER_PRICE
            ),
        }
    }
}

/// Boosters offered to a user and waiting for their confirm/cancel reply.
#[derive(Default)]
pub struct PendingBoosters {
    pending: Mutex<HashMap<UserId, Booster>>,
}

impl PendingBoosters {
    fn offer(&self, user_id: UserId, booster: Booster) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, booster);
    }

    fn take(&self, user_id: UserId) -> Option<Booster> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id)
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BoosterQuote {
    pub booster: Booster,
    pub price: i64,
    pub prompt: String,
    pub confirm_reply: &'static str,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BoosterOutcome {
    #[serde(rename_all = "camelCase")]
    Activated {
        booster: Booster,
        balance: i64,
        #[serde(with = "time::serde::rfc3339::option")]
        next_claim_at: Option<OffsetDateTime>,
    },
    Cancelled {
        booster: Booster,
    },
}

/// Offers a booster. Fails without recording anything when the balance cannot cover it.
pub async fn quote_booster(
    pool: &SqlitePool,
    pending: &PendingBoosters,
    user_id: UserId,
    booster: Booster,
) -> Result<BoosterQuote, LedgerError> {
    let user = require_user(pool, user_id).await?;
    if user.balance < BOOSTER_PRICE {
        return Err(LedgerError::InsufficientFunds {
            balance: user.balance,
            required: BOOSTER_PRICE,
        });
    }

    pending.offer(user_id, booster);
    Ok(BoosterQuote {
        booster,
        price: BOOSTER_PRICE,
        prompt: booster.prompt(),
        confirm_reply: CONFIRM_REPLY,
    })
}

/// Resolves the pending offer. Anything but the exact confirm reply cancels it.
pub async fn answer_booster(
    pool: &SqlitePool,
    pending: &PendingBoosters,
    user_id: UserId,
    reply: &str,
) -> Result<BoosterOutcome, LedgerError> {
    let booster = pending.take(user_id).ok_or(LedgerError::NoPendingBooster)?;
    if reply != CONFIRM_REPLY {
        tracing::info!("user {} cancelled {:?}", user_id, booster);
        return Ok(BoosterOutcome::Cancelled { booster });
    }

    activate_booster(pool, user_id, booster).await
}

/// Deducts the price and applies the effect in one transaction.
pub async fn activate_booster(
    pool: &SqlitePool,
    user_id: UserId,
    booster: Booster,
) -> Result<BoosterOutcome, LedgerError> {
    let mut tx = begin(pool).await?;
    let balance = adjust_balance(&mut tx, user_id, -BOOSTER_PRICE).await?;

    let last_claim_at = match booster {
        Booster::TimeSpeed => {
            let user = require_user(&mut *tx, user_id).await?;
            let shifted = user.last_claim_at.map(|at| at - TIME_SPEED_SHIFT);
            if let Some(at) = shifted {
                set_last_claim(&mut *tx, user_id, at).await?;
            }
            enable_time_speed(&mut *tx, user_id).await?;
            shifted
        }
        Booster::DoubleMine => {
            enable_double_mine(&mut *tx, user_id).await?;
            require_user(&mut *tx, user_id).await?.last_claim_at
        }
    };
    commit(tx).await?;

    tracing::info!("user {} activated {:?} >>> balance {}", user_id, booster, balance);
    Ok(BoosterOutcome::Activated {
        booster,
        balance,
        next_claim_at: last_claim_at.map(|at| at + CLAIM_COOLDOWN),
    })
}
