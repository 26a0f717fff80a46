use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::fmt::Display;

use super::{
    constants::{EXCHANGE_UNLOCK_BALANCE, MIN_WITHDRAWAL},
    fields::UserId,
};

#[derive(Debug)]
pub enum DatabaseError {
    ServerError,
}

#[derive(Debug)]
pub enum LedgerError {
    NotFound(UserId),
    InsufficientFunds { balance: i64, required: i64 },
    ClaimTooSoon(time::Duration),
    InvalidWalletFormat,
    ChannelsNotJoined(Vec<String>),
    TaskAlreadyCompleted,
    NoPendingBooster,
    ExchangeLocked { balance: i64 },
    InvalidWithdrawalAmount,
    Database(DatabaseError),
}

impl LedgerError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::ClaimTooSoon(_) => "claim_too_soon",
            Self::InvalidWalletFormat => "invalid_wallet_format",
            Self::ChannelsNotJoined(_) => "channels_not_joined",
            Self::TaskAlreadyCompleted => "task_already_completed",
            Self::NoPendingBooster => "no_pending_booster",
            Self::ExchangeLocked { .. } => "exchange_locked",
            Self::InvalidWithdrawalAmount => "invalid_withdrawal_amount",
            Self::Database(_) => "server_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientFunds { .. }
            | Self::ExchangeLocked { .. }
            | Self::InvalidWithdrawalAmount => StatusCode::BAD_REQUEST,
            Self::InvalidWalletFormat => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ClaimTooSoon(_) | Self::TaskAlreadyCompleted | Self::NoPendingBooster => {
                StatusCode::CONFLICT
            }
            Self::ChannelsNotJoined(_) => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "User {} not found", id),
            Self::InsufficientFunds { balance, required } => write!(
                f,
                "You need at least {} coins for this, your balance is {}",
                required, balance
            ),
            Self::ClaimTooSoon(remaining) => write!(
                f,
                "You can mine in the next {} hours and {} minutes",
                remaining.whole_hours(),
                remaining.whole_minutes() % 60
            ),
            Self::InvalidWalletFormat => write!(f, "Invalid wallet address"),
            Self::ChannelsNotJoined(channels) => write!(
                f,
                "Please join all channels to use this feature. You have not joined:\n{}",
                channels.join("\n")
            ),
            Self::TaskAlreadyCompleted => write!(
                f,
                "You had earlier completed the current task, kindly wait for a new one"
            ),
            Self::NoPendingBooster => write!(f, "There is no booster waiting for confirmation"),
            Self::ExchangeLocked { balance } => write!(
                f,
                "You need at least {} coins to withdraw, your balance is {}",
                EXCHANGE_UNLOCK_BALANCE, balance
            ),
            Self::InvalidWithdrawalAmount => write!(
                f,
                "Please enter an amount that you have in your balance and is at least {} coins",
                MIN_WITHDRAWAL
            ),
            Self::Database(_) => write!(f, "Something went wrong"),
        }
    }
}

impl From<DatabaseError> for LedgerError {
    fn from(value: DatabaseError) -> Self {
        Self::Database(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardError {
    InvalidButtonLink,
    MalformedButton,
    ExpectedPhoto,
    ExpectedText,
    ChooseShapeFirst,
}

impl Display for WizardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidButtonLink => write!(
                f,
                "Invalid link format. Please provide a valid link starting with 'http://', 'https://', or 'tg://msg_url?url='."
            ),
            Self::MalformedButton => write!(
                f,
                "Please provide the button placeholder and link in the format: 'Placeholder, https://link'"
            ),
            Self::ExpectedPhoto => write!(f, "Please send an image."),
            Self::ExpectedText => write!(f, "Please send some text."),
            Self::ChooseShapeFirst => write!(f, "Please pick a broadcast type from the menu."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The platform asked us to back off before retrying.
    RateLimited(std::time::Duration),
    Failed(String),
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited(after) => write!(f, "Rate limited, retry after {:?}", after),
            Self::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

pub enum ApiError {
    Ledger(LedgerError),
    Wizard(WizardError),
    NotOperator,
    AdapterAlreadyConnected,
    ServerError,
    AuthenticationError,
}

impl From<DatabaseError> for ApiError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::ServerError => Self::ServerError,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<WizardError> for ApiError {
    fn from(value: WizardError) -> Self {
        Self::Wizard(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, error_message) = match self {
            Self::Ledger(e) => (e.status(), e.code(), e.to_string()),
            Self::Wizard(e) => (StatusCode::BAD_REQUEST, "invalid_input", e.to_string()),
            Self::NotOperator => (
                StatusCode::FORBIDDEN,
                "not_operator",
                "You are not authorized to use this command.".to_owned(),
            ),
            Self::AdapterAlreadyConnected => (
                StatusCode::CONFLICT,
                "adapter_already_connected",
                "Another platform adapter is already taking deliveries".to_owned(),
            ),
            Self::ServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Something went wrong".to_owned(),
            ),
            Self::AuthenticationError => (
                StatusCode::UNAUTHORIZED,
                "authentication_failed",
                "Authentication failed".to_owned(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[derive(Debug)]
pub enum JWTError {
    GenerationFailed(jsonwebtoken::errors::ErrorKind),
    DecodeFailed(jsonwebtoken::errors::ErrorKind),
}

impl From<JWTError> for ApiError {
    fn from(_value: JWTError) -> Self {
        Self::AuthenticationError
    }
}
