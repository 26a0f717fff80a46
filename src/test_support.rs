use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    app::Db,
    config::DatabaseConfig,
    domain::{errors::DeliveryError, fields::UserId},
    platform::{MessageId, OutboundMessage, Platform},
};

pub(crate) async fn test_pool() -> SqlitePool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
    };
    Db::connect(&config)
        .await
        .expect("in-memory database should open")
        .inner()
}

/// Current time truncated to whole seconds so stored timestamps compare exactly.
pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
        .replace_nanosecond(0)
        .expect("zero is a valid nanosecond")
}

/// Records every delivery; recipients can be scripted to fail or to be rate limited once.
#[derive(Default)]
pub(crate) struct MockPlatform {
    pub sent: Mutex<Vec<(UserId, OutboundMessage)>>,
    pub deleted: Mutex<Vec<(UserId, MessageId)>>,
    pub failing: HashSet<UserId>,
    pub rate_limited_once: Mutex<HashSet<UserId>>,
    pub members: HashSet<(String, UserId)>,
    next_id: AtomicI64,
}

impl MockPlatform {
    pub fn failing(ids: &[i64]) -> Self {
        Self {
            failing: ids.iter().copied().map(UserId::from).collect(),
            ..Default::default()
        }
    }

    pub fn sent_to(&self, user: UserId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == user)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn last_text_to(&self, user: UserId) -> Option<String> {
        self.sent_to(user)
            .into_iter()
            .rev()
            .find_map(|message| match message {
                OutboundMessage::Text { text, .. } => Some(text),
                _ => None,
            })
    }
}

impl Platform for MockPlatform {
    fn send_message(
        &self,
        recipient: UserId,
        message: OutboundMessage,
    ) -> BoxFuture<'_, Result<MessageId, DeliveryError>> {
        let result = if self.rate_limited_once.lock().unwrap().remove(&recipient) {
            Err(DeliveryError::RateLimited(Duration::from_millis(5)))
        } else if self.failing.contains(&recipient) {
            Err(DeliveryError::Failed(
                "Forbidden: bot was blocked by the user\nrequest id 1".to_owned(),
            ))
        } else {
            self.sent.lock().unwrap().push((recipient, message));
            Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        };
        futures::future::ready(result).boxed()
    }

    fn delete_message(
        &self,
        chat: UserId,
        message_id: MessageId,
    ) -> BoxFuture<'_, Result<(), DeliveryError>> {
        self.deleted.lock().unwrap().push((chat, message_id));
        futures::future::ready(Ok(())).boxed()
    }

    fn is_channel_member<'a>(
        &'a self,
        channel: &'a str,
        user: UserId,
    ) -> BoxFuture<'a, Result<bool, DeliveryError>> {
        let member = self.members.contains(&(channel.to_owned(), user));
        futures::future::ready(Ok(member)).boxed()
    }
}
