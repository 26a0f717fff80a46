use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::{sync::broadcast::Sender, task::JoinHandle};
use uuid::Uuid;

use crate::{
    domain::{
        errors::{DatabaseError, DeliveryError},
        events::{AppEvent, BroadcastCompletedEvent},
        fields::UserId,
    },
    platform::{OutboundMessage, Platform},
    repository::all_users,
};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub id: Uuid,
    pub sent: usize,
    pub failed: usize,
    /// First line of each distinct delivery error.
    pub errors: BTreeSet<String>,
}

impl BroadcastReport {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Broadcast completed. Sent to {} users, failed to send to {} users.",
            self.sent, self.failed
        );
        if !self.errors.is_empty() {
            text.push_str("\n\nErrors:\n");
            text.push_str(&self.errors.iter().cloned().collect::<Vec<_>>().join("\n"));
        }
        text
    }
}

/// Sends once; a rate-limit answer pauses for the signalled time and retries exactly once.
async fn deliver(
    platform: &dyn Platform,
    recipient: UserId,
    message: OutboundMessage,
) -> Result<(), DeliveryError> {
    match platform.send_message(recipient, message.clone()).await {
        Err(DeliveryError::RateLimited(after)) => {
            tracing::warn!("rate limited on {}, retrying after {:?}", recipient, after);
            tokio::time::sleep(after).await;
            platform.send_message(recipient, message).await.map(|_| ())
        }
        result => result.map(|_| ()),
    }
}

/// Delivers `message` to every registered user. A failed recipient is counted and
/// skipped; nothing already sent is undone.
pub async fn broadcast(
    pool: &SqlitePool,
    platform: &dyn Platform,
    message: &OutboundMessage,
) -> Result<BroadcastReport, DatabaseError> {
    let id = Uuid::new_v4();
    let recipients = all_users(pool).await?;
    tracing::info!("broadcast {} started >>> {} recipients", id, recipients.len());

    let mut report = BroadcastReport {
        id,
        sent: 0,
        failed: 0,
        errors: BTreeSet::new(),
    };
    for user in recipients {
        let personalized = message.personalized(&user.display_name());
        match deliver(platform, user.id, personalized).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                tracing::warn!("broadcast {} to {} failed >>> {}", id, user.id, e);
                report.failed += 1;
                let reason = e.to_string();
                report
                    .errors
                    .insert(reason.lines().next().unwrap_or_default().to_owned());
            }
        }
    }

    tracing::info!(
        "broadcast {} finished >>> sent {}, failed {}",
        id,
        report.sent,
        report.failed
    );
    Ok(report)
}

pub async fn report_to_operator(
    platform: &dyn Platform,
    operator: UserId,
    report: &BroadcastReport,
) -> Result<(), DeliveryError> {
    platform
        .send_message(operator, OutboundMessage::text(report.summary()))
        .await
        .map(|_| ())
}

/// Runs a broadcast in the background to the end of the user list and reports back.
pub fn spawn_broadcast(
    pool: SqlitePool,
    platform: Arc<dyn Platform>,
    events: Sender<AppEvent>,
    operator: UserId,
    message: OutboundMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report = match broadcast(&pool, platform.as_ref(), &message).await {
            Ok(report) => report,
            Err(_) => {
                let notice = OutboundMessage::text("Broadcast failed: could not read the user list.");
                if let Err(e) = platform.send_message(operator, notice).await {
                    tracing::error!("broadcast failure notice to {} failed >>> {}", operator, e);
                }
                return;
            }
        };

        if let Err(e) = report_to_operator(platform.as_ref(), operator, &report).await {
            tracing::error!("broadcast report to {} failed >>> {}", operator, e);
        }
        let _ = events.send(AppEvent::BroadcastCompleted(BroadcastCompletedEvent {
            id: report.id,
            operator,
            sent: report.sent,
            failed: report.failed,
        }));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::fields::Profile,
        platform::RelayPlatform,
        repository::upsert_on_first_contact,
        test_support::{now, test_pool, MockPlatform},
    };
    use std::time::Duration;

    async fn roster(pool: &SqlitePool, users: &[(i64, Option<&str>)]) {
        let mut conn = pool.acquire().await.unwrap();
        for (id, name) in users {
            let profile = Profile {
                first_name: name.map(str::to_owned),
                ..Default::default()
            };
            upsert_on_first_contact(&mut conn, UserId::from(*id), &profile, "link", None, now())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn partial_failure_is_counted_and_reported() {
        let pool = test_pool().await;
        roster(&pool, &[(1, Some("ada")), (2, None), (3, Some("bo"))]).await;
        let platform = MockPlatform::failing(&[2]);

        let report = broadcast(&pool, &platform, &OutboundMessage::text("Hi {user}"))
            .await
            .unwrap();
        assert_eq!((report.sent, report.failed), (2, 1));
        assert_eq!(
            report.errors.iter().collect::<Vec<_>>(),
            vec!["Forbidden: bot was blocked by the user"]
        );
        assert_eq!(platform.last_text_to(UserId::from(1)).as_deref(), Some("Hi ADA"));
        assert_eq!(platform.last_text_to(UserId::from(3)).as_deref(), Some("Hi BO"));

        report_to_operator(&platform, UserId::from(1), &report).await.unwrap();
        let summary = platform.last_text_to(UserId::from(1)).unwrap();
        assert!(summary.contains("Sent to 2 users, failed to send to 1 users."));
    }

    #[tokio::test]
    async fn missing_name_falls_back_to_placeholder() {
        let pool = test_pool().await;
        roster(&pool, &[(1, None)]).await;
        let platform = MockPlatform::default();

        broadcast(&pool, &platform, &OutboundMessage::text("Hello {user}!"))
            .await
            .unwrap();
        assert_eq!(platform.last_text_to(UserId::from(1)).as_deref(), Some("Hello USER!"));
    }

    #[tokio::test]
    async fn rate_limited_recipient_is_retried_once() {
        let pool = test_pool().await;
        roster(&pool, &[(1, Some("ada")), (2, Some("bo"))]).await;
        let platform = MockPlatform::default();
        platform.rate_limited_once.lock().unwrap().insert(UserId::from(2));

        let report = broadcast(&pool, &platform, &OutboundMessage::text("hi"))
            .await
            .unwrap();
        assert_eq!((report.sent, report.failed), (2, 0));
        assert_eq!(platform.sent_to(UserId::from(2)).len(), 1);
    }

    #[tokio::test]
    async fn relay_counts_only_what_the_adapter_confirms() {
        let pool = test_pool().await;
        let users: Vec<(i64, Option<&str>)> = (1..=150).map(|id| (id, None)).collect();
        roster(&pool, &users).await;
        let relay = RelayPlatform::new(8, Duration::from_secs(5));
        let mut queue = relay.connect().unwrap();

        let adapter = async {
            let mut delivered = 0;
            for _ in 0..150 {
                let delivery = queue.recv().await.unwrap();
                let result = if delivery.id % 50 == 0 {
                    Err(DeliveryError::Failed("Forbidden: user is deactivated".into()))
                } else {
                    delivered += 1;
                    Ok(())
                };
                relay.resolve(delivery.id, result).await;
            }
            delivered
        };
        let message = OutboundMessage::text("hi");
        let (report, delivered) = tokio::join!(
            broadcast(&pool, &relay, &message),
            adapter
        );

        let report = report.unwrap();
        assert_eq!(report.sent, delivered);
        assert_eq!((report.sent, report.failed), (147, 3));
    }

    #[tokio::test]
    async fn spawned_broadcast_reports_and_publishes() {
        let pool = test_pool().await;
        roster(&pool, &[(1, Some("ada")), (2, Some("bo"))]).await;
        let platform = Arc::new(MockPlatform::default());
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);

        spawn_broadcast(
            pool,
            platform.clone(),
            tx,
            UserId::from(9),
            OutboundMessage::text("hi"),
        )
        .await
        .unwrap();

        assert!(platform
            .last_text_to(UserId::from(9))
            .unwrap()
            .starts_with("Broadcast completed"));
        match rx.recv().await.unwrap() {
            AppEvent::BroadcastCompleted(event) => assert_eq!((event.sent, event.failed), (2, 0)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
