use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Serialize, Deserialize, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub(crate) username: Option<String>,
    pub(crate) first_name: Option<String>,
    pub(crate) last_name: Option<String>,
    pub(crate) referral_link: String,
    pub(crate) referrer_id: Option<i64>,
    pub(crate) verified: bool,
    pub(crate) balance: i64,
    pub(crate) wallet_address: Option<String>,
    pub(crate) last_claim_at: Option<OffsetDateTime>,
    pub(crate) double_mine_active: bool,
    pub(crate) double_mine_enabled: bool,
    pub(crate) time_speed_enabled: bool,
    pub(crate) created_on: OffsetDateTime,
}

#[derive(FromRow)]
pub struct DbTask {
    pub id: i64,
    pub(crate) photo: String,
    pub(crate) description: String,
    pub(crate) created_on: OffsetDateTime,
}

#[derive(FromRow)]
pub struct DbTaskProof {
    pub id: i64,
    pub(crate) user_id: i64,
    pub(crate) photo: String,
    pub(crate) timestamp: OffsetDateTime,
}

#[derive(FromRow)]
pub struct DbReferralCount {
    pub(crate) referrer_id: i64,
    pub(crate) referrals: i64,
}
