//! Ledger store.
//!
//! Single statements are generic over the executor so they run against the pool or
//! inside a caller's transaction. Operations that need more than one statement take a
//! connection, which is what a `Transaction` derefs to.

use crate::domain::{
    constants::{PROOF_PAGE_SIZE, STARTER_REWARD},
    errors::{DatabaseError, LedgerError},
    fields::{PhotoRef, Profile, Task, TaskProof, User, UserId, WalletAddress},
    model::{DbReferralCount, DbTask, DbTaskProof, DbUser},
};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool, Transaction};
use time::OffsetDateTime;

pub async fn begin(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, DatabaseError> {
    pool.begin().await.map_err(|e| {
        tracing::error!("opening transaction failed >>> {}", e);
        DatabaseError::ServerError
    })
}

pub async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), DatabaseError> {
    tx.commit().await.map_err(|e| {
        tracing::error!("committing transaction failed >>> {}", e);
        DatabaseError::ServerError
    })
}

pub struct Verification {
    /// `verified` went from false to true on this call.
    pub first_time: bool,
    pub starter_reward: bool,
}

pub async fn get_user<'e, E>(executor: E, user_id: UserId) -> Result<Option<User>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let user = sqlx::query_as::<_, DbUser>("select * from users where id = ?1")
        .bind(user_id.inner())
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            tracing::error!("get user by id failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(user.map(|u| u.into()))
}

pub async fn require_user<'e, E>(executor: E, user_id: UserId) -> Result<User, LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    get_user(executor, user_id)
        .await?
        .ok_or(LedgerError::NotFound(user_id))
}

/// Inserts the user on first contact, otherwise refreshes the display fields only.
/// Returns whether a new row was created.
pub async fn upsert_on_first_contact(
    conn: &mut SqliteConnection,
    user_id: UserId,
    profile: &Profile,
    referral_link: &str,
    referrer_id: Option<UserId>,
    now: OffsetDateTime,
) -> Result<bool, DatabaseError> {
    let inserted = sqlx::query(
        "insert into users (id, username, first_name, last_name, referral_link, referrer_id, created_on)
         values (?1, ?2, ?3, ?4, ?5, ?6, ?7) on conflict (id) do nothing",
    )
    .bind(user_id.inner())
    .bind(profile.username.as_deref())
    .bind(profile.first_name.as_deref())
    .bind(profile.last_name.as_deref())
    .bind(referral_link)
    .bind(referrer_id.map(|r| r.inner()))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!("creating user failed >>> {}", e);
        DatabaseError::ServerError
    })?
    .rows_affected()
        == 1;

    if !inserted {
        sqlx::query("update users set username = ?1, first_name = ?2, last_name = ?3 where id = ?4")
            .bind(profile.username.as_deref())
            .bind(profile.first_name.as_deref())
            .bind(profile.last_name.as_deref())
            .bind(user_id.inner())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                tracing::error!("updating user profile failed >>> {}", e);
                DatabaseError::ServerError
            })?;
    }

    Ok(inserted)
}

/// Applies `delta` to the balance unless the result would be negative.
/// Returns the new balance.
pub async fn adjust_balance(
    conn: &mut SqliteConnection,
    user_id: UserId,
    delta: i64,
) -> Result<i64, LedgerError> {
    let updated = sqlx::query_scalar::<_, i64>(
        "update users set balance = balance + ?1 where id = ?2 and balance + ?1 >= 0 returning balance",
    )
    .bind(delta)
    .bind(user_id.inner())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!("adjusting balance failed >>> {}", e);
        DatabaseError::ServerError
    })?;

    if let Some(balance) = updated {
        return Ok(balance);
    }

    let user = require_user(&mut *conn, user_id).await?;
    Err(LedgerError::InsufficientFunds {
        balance: user.balance,
        required: -delta,
    })
}

pub async fn set_wallet<'e, E>(
    executor: E,
    user_id: UserId,
    address: &WalletAddress,
) -> Result<(), LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("update users set wallet_address = ?1 where id = ?2")
        .bind(address.as_ref())
        .bind(user_id.inner())
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("updating wallet address failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound(user_id));
    }
    Ok(())
}

/// Marks the user verified. The first transition also grants the starter reward, but
/// only while the balance is still zero.
pub async fn set_verified(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> Result<Verification, LedgerError> {
    let first_time = sqlx::query("update users set verified = 1 where id = ?1 and verified = 0")
        .bind(user_id.inner())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!("verifying user failed >>> {}", e);
            DatabaseError::ServerError
        })?
        .rows_affected()
        == 1;

    if !first_time {
        require_user(&mut *conn, user_id).await?;
        return Ok(Verification {
            first_time,
            starter_reward: false,
        });
    }

    let starter_reward =
        sqlx::query("update users set balance = balance + ?1 where id = ?2 and balance = 0")
            .bind(STARTER_REWARD)
            .bind(user_id.inner())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                tracing::error!("granting starter reward failed >>> {}", e);
                DatabaseError::ServerError
            })?
            .rows_affected()
            == 1;

    Ok(Verification {
        first_time,
        starter_reward,
    })
}

pub async fn set_last_claim<'e, E>(
    executor: E,
    user_id: UserId,
    at: OffsetDateTime,
) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("update users set last_claim_at = ?1 where id = ?2")
        .bind(at)
        .bind(user_id.inner())
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("updating last claim failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

pub async fn enable_time_speed<'e, E>(executor: E, user_id: UserId) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("update users set time_speed_enabled = 1 where id = ?1")
        .bind(user_id.inner())
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("enabling time speed failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

pub async fn enable_double_mine<'e, E>(executor: E, user_id: UserId) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("update users set double_mine_enabled = 1 where id = ?1")
        .bind(user_id.inner())
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("enabling double mine failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

/// Every registered user, in registration order.
pub async fn all_users<'e, E>(executor: E) -> Result<Vec<User>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let users = sqlx::query_as::<_, DbUser>("select * from users order by id")
        .fetch_all(executor)
        .await
        .map_err(|e| {
            tracing::error!("listing users failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(users.into_iter().map(User::from).collect())
}

pub async fn total_users<'e, E>(executor: E) -> Result<i64, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>("select count(*) from users")
        .fetch_one(executor)
        .await
        .map_err(|e| {
            tracing::error!("fetch total user count failed >>> {}", e);
            DatabaseError::ServerError
        })
}

/// Appends a referral row. There is no uniqueness check on the pair.
pub async fn insert_referral<'e, E>(
    executor: E,
    referrer_id: UserId,
    referred_id: UserId,
    now: OffsetDateTime,
) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("insert into referrals (referrer_id, referred_id, timestamp) values (?1, ?2, ?3)")
        .bind(referrer_id.inner())
        .bind(referred_id.inner())
        .bind(now)
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("inserting referral failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

pub async fn referral_count<'e, E>(executor: E, user_id: UserId) -> Result<i64, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>("select count(*) from referrals where referrer_id = ?1")
        .bind(user_id.inner())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            tracing::error!("fetch referral count failed >>> {}", e);
            DatabaseError::ServerError
        })
}

pub async fn top_referrer<'e, E>(executor: E) -> Result<Option<(UserId, i64)>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let top = sqlx::query_as::<_, DbReferralCount>(
        "select referrer_id, count(referred_id) as referrals from referrals
         group by referrer_id order by referrals desc, referrer_id asc limit 1",
    )
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        tracing::error!("fetch top referrer failed >>> {}", e);
        DatabaseError::ServerError
    })?;

    Ok(top.map(|t| (t.referrer_id.into(), t.referrals)))
}

/// Replaces the current task and forgets who completed the previous one.
pub async fn replace_task(
    conn: &mut SqliteConnection,
    photo: &PhotoRef,
    description: &str,
    now: OffsetDateTime,
) -> Result<(), DatabaseError> {
    for statement in ["delete from tasks", "delete from task_completions"] {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                tracing::error!("clearing previous task failed >>> {}", e);
                DatabaseError::ServerError
            })?;
    }

    sqlx::query("insert into tasks (photo, description, created_on) values (?1, ?2, ?3)")
        .bind(photo.inner())
        .bind(description)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!("saving task failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

pub async fn current_task<'e, E>(executor: E) -> Result<Option<Task>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let task = sqlx::query_as::<_, DbTask>("select * from tasks order by id desc limit 1")
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            tracing::error!("fetch current task failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(task.map(|t| t.into()))
}

pub async fn has_completed_task<'e, E>(executor: E, user_id: UserId) -> Result<bool, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found = sqlx::query_scalar::<_, i64>("select 1 from task_completions where user_id = ?1")
        .bind(user_id.inner())
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            tracing::error!("fetch task completion failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(found.is_some())
}

pub async fn insert_task_proof<'e, E>(
    executor: E,
    user_id: UserId,
    photo: &PhotoRef,
    now: OffsetDateTime,
) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("insert into task_proofs (user_id, photo, timestamp) values (?1, ?2, ?3)")
        .bind(user_id.inner())
        .bind(photo.inner())
        .bind(now)
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("saving task proof failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

pub async fn insert_task_completion<'e, E>(executor: E, user_id: UserId) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("insert into task_completions (user_id) values (?1)")
        .bind(user_id.inner())
        .execute(executor)
        .await
        .map_err(|e| {
            tracing::error!("saving task completion failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(())
}

pub async fn oldest_task_proofs<'e, E>(executor: E) -> Result<Vec<TaskProof>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let proofs = sqlx::query_as::<_, DbTaskProof>("select * from task_proofs order by id limit ?1")
        .bind(PROOF_PAGE_SIZE)
        .fetch_all(executor)
        .await
        .map_err(|e| {
            tracing::error!("fetch task proofs failed >>> {}", e);
            DatabaseError::ServerError
        })?;

    Ok(proofs.into_iter().map(|p| p.into()).collect())
}

pub async fn latest_task_proof<'e, E>(
    executor: E,
    user_id: UserId,
) -> Result<Option<TaskProof>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let proof = sqlx::query_as::<_, DbTaskProof>(
        "select * from task_proofs where user_id = ?1 order by id desc limit 1",
    )
    .bind(user_id.inner())
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        tracing::error!("fetch latest task proof failed >>> {}", e);
        DatabaseError::ServerError
    })?;

    Ok(proof.map(|p| p.into()))
}

/// Deletes the oldest page of proofs. Returns how many were removed.
pub async fn clear_oldest_task_proofs<'e, E>(executor: E) -> Result<u64, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "delete from task_proofs where id in (select id from task_proofs order by id limit ?1)",
    )
    .bind(PROOF_PAGE_SIZE)
    .execute(executor)
    .await
    .map_err(|e| {
        tracing::error!("clearing task proofs failed >>> {}", e);
        DatabaseError::ServerError
    })?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    async fn seed(pool: &sqlx::SqlitePool, id: i64, referrer: Option<i64>) -> bool {
        let mut conn = pool.acquire().await.unwrap();
        upsert_on_first_contact(
            &mut conn,
            UserId::from(id),
            &Profile {
                username: Some(format!("user{}", id)),
                first_name: Some("Ada".into()),
                last_name: None,
            },
            "https://t.me/bot?start=1",
            referrer.map(UserId::from),
            OffsetDateTime::now_utc(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn first_contact_inserts_then_only_refreshes_profile() {
        let pool = test_pool().await;
        assert!(seed(&pool, 1, Some(7)).await);

        let mut conn = pool.acquire().await.unwrap();
        let inserted = upsert_on_first_contact(
            &mut conn,
            UserId::from(1),
            &Profile {
                username: Some("renamed".into()),
                first_name: Some("Grace".into()),
                last_name: Some("Hopper".into()),
            },
            "ignored",
            Some(UserId::from(99)),
            OffsetDateTime::now_utc(),
        )
        .await
        .unwrap();
        drop(conn);
        assert!(!inserted);

        let user = require_user(&pool, UserId::from(1)).await.unwrap();
        assert_eq!(user.profile.first_name.as_deref(), Some("Grace"));
        assert_eq!(user.referrer_id, Some(UserId::from(7)));
        assert_eq!(user.referral_link, "https://t.me/bot?start=1");
    }

    #[tokio::test]
    async fn balance_never_goes_negative() {
        let pool = test_pool().await;
        seed(&pool, 1, None).await;
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(adjust_balance(&mut conn, UserId::from(1), 5).await.unwrap(), 5);
        assert!(matches!(
            adjust_balance(&mut conn, UserId::from(1), -6).await,
            Err(LedgerError::InsufficientFunds { balance: 5, required: 6 })
        ));
        assert_eq!(adjust_balance(&mut conn, UserId::from(1), -5).await.unwrap(), 0);
        assert!(matches!(
            adjust_balance(&mut conn, UserId::from(2), 1).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn starter_reward_only_at_zero_balance_and_only_once() {
        let pool = test_pool().await;
        seed(&pool, 1, None).await;
        seed(&pool, 2, None).await;
        let mut conn = pool.acquire().await.unwrap();

        let first = set_verified(&mut conn, UserId::from(1)).await.unwrap();
        assert!(first.first_time && first.starter_reward);
        let again = set_verified(&mut conn, UserId::from(1)).await.unwrap();
        assert!(!again.first_time && !again.starter_reward);
        assert_eq!(require_user(&mut *conn, UserId::from(1)).await.unwrap().balance, 3);

        adjust_balance(&mut conn, UserId::from(2), 1).await.unwrap();
        let funded = set_verified(&mut conn, UserId::from(2)).await.unwrap();
        assert!(funded.first_time && !funded.starter_reward);
        assert_eq!(require_user(&mut *conn, UserId::from(2)).await.unwrap().balance, 1);
    }

    #[tokio::test]
    async fn referrals_are_not_deduplicated() {
        let pool = test_pool().await;
        let now = OffsetDateTime::now_utc();
        insert_referral(&pool, UserId::from(1), UserId::from(2), now).await.unwrap();
        insert_referral(&pool, UserId::from(1), UserId::from(2), now).await.unwrap();
        insert_referral(&pool, UserId::from(3), UserId::from(4), now).await.unwrap();

        assert_eq!(referral_count(&pool, UserId::from(1)).await.unwrap(), 2);
        assert_eq!(top_referrer(&pool).await.unwrap(), Some((UserId::from(1), 2)));
    }

    #[tokio::test]
    async fn proofs_are_paged_oldest_first() {
        let pool = test_pool().await;
        let now = OffsetDateTime::now_utc();
        for id in 0..20 {
            insert_task_proof(&pool, UserId::from(id), &PhotoRef::from("p"), now)
                .await
                .unwrap();
        }

        let page = oldest_task_proofs(&pool).await.unwrap();
        assert_eq!(page.len(), 15);
        assert_eq!(page[0].user_id, UserId::from(0));

        assert_eq!(clear_oldest_task_proofs(&pool).await.unwrap(), 15);
        let rest = oldest_task_proofs(&pool).await.unwrap();
        assert_eq!(rest.len(), 5);
        assert_eq!(rest[0].user_id, UserId::from(15));
    }
}
