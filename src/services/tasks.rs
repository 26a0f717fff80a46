//! The single current task, proof submissions and the operator review of them.

use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    domain::{
        constants::TASK_REWARD,
        errors::{DatabaseError, LedgerError},
        fields::{PhotoRef, Task, TaskProof, UserId},
    },
    platform::{OutboundMessage, Platform},
    repository::{
        adjust_balance, begin, clear_oldest_task_proofs, commit, current_task, has_completed_task,
        insert_task_completion, insert_task_proof, latest_task_proof, oldest_task_proofs,
        replace_task, require_user,
    },
};

/// Replaces the current task. Every user may submit proof again afterwards.
pub async fn post_task(
    pool: &SqlitePool,
    photo: PhotoRef,
    description: &str,
    now: OffsetDateTime,
) -> Result<Task, DatabaseError> {
    let mut tx = begin(pool).await?;
    replace_task(&mut tx, &photo, description, now).await?;
    commit(tx).await?;

    tracing::info!("posted new task >>> {}", description);
    Ok(Task {
        photo,
        description: description.to_owned(),
        posted_on: now,
    })
}

/// The notice fanned out to every user when a task is posted.
pub fn task_announcement(task: &Task) -> OutboundMessage {
    OutboundMessage::Photo {
        photo: task.photo.clone(),
        caption: Some(format!(
            "New task available 🎯\n\n{}\n\nComplete it and send your proof to earn {} coins.",
            task.description, TASK_REWARD
        )),
        button: None,
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task: Option<Task>,
    pub submitted: bool,
}

pub async fn task_status(pool: &SqlitePool, user_id: UserId) -> Result<TaskStatus, LedgerError> {
    require_user(pool, user_id).await?;
    Ok(TaskStatus {
        task: current_task(pool).await?,
        submitted: has_completed_task(pool, user_id).await?,
    })
}

pub async fn submit_proof(
    pool: &SqlitePool,
    user_id: UserId,
    photo: PhotoRef,
    now: OffsetDateTime,
) -> Result<(), LedgerError> {
    let mut tx = begin(pool).await?;
    require_user(&mut *tx, user_id).await?;
    if has_completed_task(&mut *tx, user_id).await? {
        return Err(LedgerError::TaskAlreadyCompleted);
    }

    insert_task_proof(&mut *tx, user_id, &photo, now).await?;
    insert_task_completion(&mut *tx, user_id).await?;
    commit(tx).await?;

    tracing::info!("user {} submitted task proof", user_id);
    Ok(())
}

pub async fn pending_proofs(pool: &SqlitePool) -> Result<Vec<TaskProof>, DatabaseError> {
    oldest_task_proofs(pool).await
}

pub async fn clear_reviewed_proofs(pool: &SqlitePool) -> Result<u64, DatabaseError> {
    let cleared = clear_oldest_task_proofs(pool).await?;
    tracing::info!("cleared {} reviewed task proofs", cleared);
    Ok(cleared)
}

/// Pulls every run of digits out of free operator text.
pub fn parse_target_ids(raw: &str) -> Vec<UserId> {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter_map(|part| part.parse::<i64>().ok())
        .map(UserId::from)
        .collect()
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Review {
    Approved { balance: i64 },
    Disapproved,
    UnknownUser,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub user_id: UserId,
    #[serde(flatten)]
    pub review: Review,
    pub notified: bool,
}

async fn notify(platform: &dyn Platform, user_id: UserId, text: String) -> bool {
    match platform.send_message(user_id, OutboundMessage::text(text)).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("review notice to {} failed >>> {}", user_id, e);
            false
        }
    }
}

/// Pays the task reward to each target and tells them which submission was accepted.
pub async fn approve(
    pool: &SqlitePool,
    platform: &dyn Platform,
    targets: &[UserId],
) -> Result<Vec<ReviewResult>, DatabaseError> {
    let mut results = Vec::with_capacity(targets.len());
    for &user_id in targets {
        let credited = {
            let mut conn = pool.acquire().await.map_err(|e| {
                tracing::error!("acquiring connection failed >>> {}", e);
                DatabaseError::ServerError
            })?;
            adjust_balance(&mut conn, user_id, TASK_REWARD).await
        };

        let balance = match credited {
            Ok(balance) => balance,
            Err(LedgerError::NotFound(_)) => {
                results.push(ReviewResult {
                    user_id,
                    review: Review::UnknownUser,
                    notified: false,
                });
                continue;
            }
            Err(LedgerError::Database(e)) => return Err(e),
            Err(e) => {
                tracing::error!("crediting task reward to {} failed >>> {}", user_id, e);
                return Err(DatabaseError::ServerError);
            }
        };

        let text = match latest_task_proof(pool, user_id).await? {
            Some(proof) => format!(
                "The task you submitted on {} has been approved ✔. You have received {} coins.",
                proof.submitted_at.date(),
                TASK_REWARD
            ),
            None => format!(
                "Your task has been approved ✔. You have received {} coins.",
                TASK_REWARD
            ),
        };
        let notified = notify(platform, user_id, text).await;
        tracing::info!("approved task for {} >>> balance {}", user_id, balance);
        results.push(ReviewResult {
            user_id,
            review: Review::Approved { balance },
            notified,
        });
    }
    Ok(results)
}

pub async fn disapprove(platform: &dyn Platform, targets: &[UserId]) -> Vec<ReviewResult> {
    let mut results = Vec::with_capacity(targets.len());
    for &user_id in targets {
        let notified = notify(
            platform,
            user_id,
            "Your task submission has been disapproved ❌. Please check the task and try again."
                .to_owned(),
        )
        .await;
        results.push(ReviewResult {
            user_id,
            review: Review::Disapproved,
            notified,
        });
    }
    results
}
