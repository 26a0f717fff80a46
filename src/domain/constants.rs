use time::Duration;

/// Coins credited per successful claim.
pub const CLAIM_REWARD: i64 = 1;
pub const CLAIM_COOLDOWN: Duration = Duration::hours(24);

pub const BOOSTER_PRICE: i64 = 20;
/// How far back Time-Speed moves the last claim.
pub const TIME_SPEED_SHIFT: Duration = Duration::hours(6);

pub const STARTER_REWARD: i64 = 3;
pub const REFERRAL_REWARD: i64 = 5;
pub const TASK_REWARD: i64 = 10;

pub const EXCHANGE_UNLOCK_BALANCE: i64 = 200;
pub const MIN_WITHDRAWAL: i64 = 60;

pub const GIVEAWAY_REFERRAL_THRESHOLD: i64 = 30;

/// Proofs are reviewed and cleared in pages of this size, oldest first.
pub const PROOF_PAGE_SIZE: i64 = 15;

pub const WALLET_MIN_LEN: usize = 40;
pub const WALLET_MAX_LEN: usize = 46;

pub const PERSONALIZATION_TOKEN: &str = "{user}";
pub const PERSONALIZATION_FALLBACK: &str = "USER";

pub const BUTTON_LINK_SCHEMES: [&str; 3] = ["http://", "https://", "tg://msg_url?url="];
