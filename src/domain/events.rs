use super::fields::{User, UserId};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewReferralEvent {
    pub referrer: UserId,
    pub referred_user: UserId,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReferralRewardEvent {
    pub referrer: UserId,
    pub referred_user: UserId,
    pub amount: i64,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalEvent {
    pub user_id: UserId,
    pub amount: i64,
    pub wallet_address: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastCompletedEvent {
    pub id: Uuid,
    pub operator: UserId,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type", content = "data")]
pub enum AppEvent {
    NewRegister(User),
    NewReferral(NewReferralEvent),
    ReferralRewarded(ReferralRewardEvent),
    WithdrawalRequested(WithdrawalEvent),
    BroadcastCompleted(BroadcastCompletedEvent),
}
