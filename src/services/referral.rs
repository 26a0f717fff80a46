//! Registration, referral attribution and the verification payouts.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;

use crate::{
    domain::{
        constants::{GIVEAWAY_REFERRAL_THRESHOLD, REFERRAL_REWARD, STARTER_REWARD},
        errors::{DatabaseError, LedgerError},
        fields::{Profile, ReferralLink, User, UserId, WalletAddress},
    },
    platform::{OutboundMessage, Platform},
    repository::{
        adjust_balance, begin, commit, get_user, insert_referral, referral_count, require_user,
        set_verified, set_wallet, upsert_on_first_contact,
    },
};

pub struct Registration {
    pub user: User,
    pub is_new: bool,
    /// The referrer named on this contact, when they are registered.
    pub referrer: Option<User>,
}

pub async fn register(
    pool: &SqlitePool,
    bot_username: &str,
    user_id: UserId,
    profile: Profile,
    referrer_id: Option<UserId>,
    now: OffsetDateTime,
) -> Result<Registration, LedgerError> {
    let link = ReferralLink::new(bot_username, user_id);

    let mut tx = begin(pool).await?;
    let is_new =
        upsert_on_first_contact(&mut tx, user_id, &profile, &link, referrer_id, now).await?;
    if let (true, Some(referrer_id)) = (is_new, referrer_id) {
        attribute(&mut tx, user_id, referrer_id, now).await?;
    }

    let user = require_user(&mut *tx, user_id).await?;
    let referrer = match referrer_id {
        Some(referrer_id) => get_user(&mut *tx, referrer_id).await?,
        None => None,
    };
    commit(tx).await?;

    if is_new {
        tracing::info!("registered user {} >>> referrer {:?}", user_id, referrer_id);
    }
    Ok(Registration {
        user,
        is_new,
        referrer,
    })
}

/// Records that `referrer_id` brought in `new_user`. Repeated calls add repeated rows.
pub async fn attribute(
    conn: &mut SqliteConnection,
    new_user: UserId,
    referrer_id: UserId,
    now: OffsetDateTime,
) -> Result<(), DatabaseError> {
    insert_referral(conn, referrer_id, new_user, now).await?;
    tracing::info!("attributed {} to referrer {}", new_user, referrer_id);
    Ok(())
}

/// Credits the referrer of a freshly verified user. Returns who was paid.
pub async fn reward_on_verification(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> Result<Option<UserId>, LedgerError> {
    let user = require_user(&mut *conn, user_id).await?;
    let Some(referrer_id) = user.referrer_id else {
        return Ok(None);
    };

    match adjust_balance(conn, referrer_id, REFERRAL_REWARD).await {
        Ok(balance) => {
            tracing::info!(
                "paid referrer {} for {} >>> balance {}",
                referrer_id,
                user_id,
                balance
            );
            Ok(Some(referrer_id))
        }
        Err(LedgerError::NotFound(_)) => {
            tracing::warn!("referrer {} of {} is not registered, nothing paid", referrer_id, user_id);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WalletUpdate {
    pub verified_now: bool,
    pub starter_reward: i64,
    pub balance: i64,
    pub referrer_rewarded: Option<UserId>,
}

/// Stores the wallet address; the first submission verifies the user and pays out.
pub async fn submit_wallet(
    pool: &SqlitePool,
    platform: &dyn Platform,
    user_id: UserId,
    address: &str,
) -> Result<WalletUpdate, LedgerError> {
    let address = WalletAddress::parse(address)?;

    let mut tx = begin(pool).await?;
    set_wallet(&mut *tx, user_id, &address).await?;
    let verification = set_verified(&mut tx, user_id).await?;
    let referrer_rewarded = if verification.first_time {
        reward_on_verification(&mut tx, user_id).await?
    } else {
        None
    };
    let user = require_user(&mut *tx, user_id).await?;
    commit(tx).await?;

    if let Some(referrer_id) = referrer_rewarded {
        let name = user.profile.first_name.clone().unwrap_or_else(|| "a friend".into());
        let notice = OutboundMessage::text(format!(
            "You have successfully referred {} to mine on the bot 🚀, you have received {} coins",
            name, REFERRAL_REWARD
        ));
        if let Err(e) = platform.send_message(referrer_id, notice).await {
            tracing::warn!("notifying referrer {} failed >>> {}", referrer_id, e);
        }
    }

    Ok(WalletUpdate {
        verified_now: verification.first_time,
        starter_reward: if verification.starter_reward {
            STARTER_REWARD
        } else {
            0
        },
        balance: user.balance,
        referrer_rewarded,
    })
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSummary {
    pub referral_link: String,
    pub referrals: i64,
    pub giveaway_eligible: bool,
}

pub async fn referral_summary(
    pool: &SqlitePool,
    user_id: UserId,
) -> Result<ReferralSummary, LedgerError> {
    let user = require_user(pool, user_id).await?;
    let referrals = referral_count(pool, user_id).await?;

    Ok(ReferralSummary {
        referral_link: user.referral_link,
        referrals,
        giveaway_eligible: referrals >= GIVEAWAY_REFERRAL_THRESHOLD,
    })
}
