use serde::{Deserialize, Serialize};
use std::fmt::Display;
use time::OffsetDateTime;

use super::{
    constants::{BUTTON_LINK_SCHEMES, PERSONALIZATION_FALLBACK, WALLET_MAX_LEN, WALLET_MIN_LEN},
    errors::{LedgerError, WizardError},
    model::{DbTask, DbTaskProof, DbUser},
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn inner(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(address: &str) -> Result<Self, LedgerError> {
        let len = address.chars().count();
        if (WALLET_MIN_LEN..=WALLET_MAX_LEN).contains(&len) {
            Ok(Self(address.to_owned()))
        } else {
            Err(LedgerError::InvalidWalletFormat)
        }
    }

    pub fn inner(&self) -> String {
        self.0.to_owned()
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

pub struct ReferralLink;

impl ReferralLink {
    pub fn new(bot_username: &str, user_id: UserId) -> String {
        format!("https://t.me/{}?start={}", bot_username, user_id)
    }
}

/// Platform reference to an uploaded photo.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct PhotoRef(String);

impl PhotoRef {
    pub fn inner(&self) -> String {
        self.0.to_owned()
    }
}

impl From<String> for PhotoRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PhotoRef {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A URL button attached under a message, entered by operators as `"label, url"`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

impl LinkButton {
    pub fn parse(input: &str) -> Result<Self, WizardError> {
        let (label, url) = input.split_once(',').ok_or(WizardError::MalformedButton)?;
        let url = url.trim();

        if !BUTTON_LINK_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(WizardError::InvalidButtonLink);
        }

        Ok(Self {
            label: label.trim().to_owned(),
            url: url.to_owned(),
        })
    }
}

/// Display fields reported by the platform on every contact.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(flatten)]
    pub profile: Profile,
    pub referral_link: String,
    pub referrer_id: Option<UserId>,
    pub verified: bool,
    pub balance: i64,
    pub wallet_address: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_claim_at: Option<OffsetDateTime>,
    pub double_mine_active: bool,
    pub double_mine_enabled: bool,
    pub time_speed_enabled: bool,
}

impl User {
    /// Upper-cased first name used to personalise broadcasts.
    pub fn display_name(&self) -> String {
        match self.profile.first_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_uppercase(),
            _ => PERSONALIZATION_FALLBACK.to_owned(),
        }
    }
}

impl From<DbUser> for User {
    fn from(value: DbUser) -> Self {
        Self {
            id: value.id.into(),
            profile: Profile {
                username: value.username,
                first_name: value.first_name,
                last_name: value.last_name,
            },
            referral_link: value.referral_link,
            referrer_id: value.referrer_id.map(UserId::from),
            verified: value.verified,
            balance: value.balance,
            wallet_address: value.wallet_address,
            last_claim_at: value.last_claim_at,
            double_mine_active: value.double_mine_active,
            double_mine_enabled: value.double_mine_enabled,
            time_speed_enabled: value.time_speed_enabled,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub photo: PhotoRef,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub posted_on: OffsetDateTime,
}

impl From<DbTask> for Task {
    fn from(value: DbTask) -> Self {
        Self {
            photo: value.photo.into(),
            description: value.description,
            posted_on: value.created_on,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TaskProof {
    pub user_id: UserId,
    pub photo: PhotoRef,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

impl From<DbTaskProof> for TaskProof {
    fn from(value: DbTaskProof) -> Self {
        Self {
            user_id: value.user_id.into(),
            photo: value.photo.into(),
            submitted_at: value.timestamp,
        }
    }
}

/// Bearer token claims. `sub` is the adapter's client id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: usize,
}
