use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    domain::{
        constants::{EXCHANGE_UNLOCK_BALANCE, MIN_WITHDRAWAL},
        errors::LedgerError,
        fields::UserId,
    },
    repository::{adjust_balance, begin, commit, require_user},
};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub amount: i64,
    pub balance: i64,
    pub wallet_address: Option<String>,
}

/// Debits a withdrawal from the ledger. Paying it out happens outside this service.
pub async fn request_withdrawal(
    pool: &SqlitePool,
    user_id: UserId,
    amount: i64,
) -> Result<Withdrawal, LedgerError> {
    let mut tx = begin(pool).await?;
    let user = require_user(&mut *tx, user_id).await?;

    if user.balance < EXCHANGE_UNLOCK_BALANCE {
        return Err(LedgerError::ExchangeLocked {
            balance: user.balance,
        });
    }
    if amount < MIN_WITHDRAWAL || amount > user.balance {
        return Err(LedgerError::InvalidWithdrawalAmount);
    }

    let balance = adjust_balance(&mut tx, user_id, -amount).await?;
    commit(tx).await?;

    tracing::info!("user {} requested withdrawal of {} >>> balance {}", user_id, amount, balance);
    Ok(Withdrawal {
        amount,
        balance,
        wallet_address: user.wallet_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::fields::Profile,
        repository::upsert_on_first_contact,
        test_support::{now, test_pool},
    };

    async fn funded(pool: &SqlitePool, balance: i64) -> UserId {
        let user = UserId::from(1);
        let mut conn = pool.acquire().await.unwrap();
        upsert_on_first_contact(&mut conn, user, &Profile::default(), "link", None, now())
            .await
            .unwrap();
        adjust_balance(&mut conn, user, balance).await.unwrap();
        user
    }

    #[tokio::test]
    async fn exchange_stays_locked_below_unlock_balance() {
        let pool = test_pool().await;
        let user = funded(&pool, 199).await;
        assert!(matches!(
            request_withdrawal(&pool, user, 60).await,
            Err(LedgerError::ExchangeLocked { balance: 199 })
        ));
    }

    #[tokio::test]
    async fn withdrawal_amount_is_bounded() {
        let pool = test_pool().await;
        let user = funded(&pool, 250).await;

        assert!(matches!(
            request_withdrawal(&pool, user, 59).await,
            Err(LedgerError::InvalidWithdrawalAmount)
        ));
        assert!(matches!(
            request_withdrawal(&pool, user, 251).await,
            Err(LedgerError::InvalidWithdrawalAmount)
        ));

        let withdrawal = request_withdrawal(&pool, user, 60).await.unwrap();
        assert_eq!(withdrawal.balance, 190);
    }
}
