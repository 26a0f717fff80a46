//! Boundary to the chat platform.
//!
//! The core never talks to the chat network itself. It asks a [`Platform`] to send
//! or delete messages and to answer channel membership questions. In production this
//! is the [`RelayPlatform`]: every delivery is queued for the connected platform adapter,
//! and the call only returns once the adapter has reported how it went.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};

use crate::domain::{
    constants::PERSONALIZATION_TOKEN,
    errors::{DeliveryError, LedgerError},
    fields::{LinkButton, PhotoRef, UserId},
};

pub type MessageId = i64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        text: String,
        button: Option<LinkButton>,
    },
    Photo {
        photo: PhotoRef,
        caption: Option<String>,
        button: Option<LinkButton>,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            button: None,
        }
    }

    /// Replaces the personalization token in the text or caption with `name`.
    pub fn personalized(&self, name: &str) -> Self {
        match self {
            Self::Text { text, button } => Self::Text {
                text: text.replace(PERSONALIZATION_TOKEN, name),
                button: button.clone(),
            },
            Self::Photo {
                photo,
                caption,
                button,
            } => Self::Photo {
                photo: photo.clone(),
                caption: caption
                    .as_ref()
                    .map(|c| c.replace(PERSONALIZATION_TOKEN, name)),
                button: button.clone(),
            },
        }
    }
}

pub trait Platform: Send + Sync {
    fn send_message(
        &self,
        recipient: UserId,
        message: OutboundMessage,
    ) -> BoxFuture<'_, Result<MessageId, DeliveryError>>;

    fn delete_message(
        &self,
        chat: UserId,
        message_id: MessageId,
    ) -> BoxFuture<'_, Result<(), DeliveryError>>;

    fn is_channel_member<'a>(
        &'a self,
        channel: &'a str,
        user: UserId,
    ) -> BoxFuture<'a, Result<bool, DeliveryError>>;
}

/// A request the adapter carries out and then acknowledges under the same `id`.
#[derive(Serialize, Clone, Debug)]
pub struct Delivery {
    pub id: MessageId,
    #[serde(flatten)]
    pub action: DeliveryAction,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeliveryAction {
    Send {
        recipient: UserId,
        message: OutboundMessage,
    },
    Delete {
        chat: UserId,
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

/// The adapter's report on one delivery.
#[derive(Deserialize, Debug)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryAck {
    Delivered,
    RateLimited {
        /// Seconds the platform asked us to wait.
        #[serde(rename = "retryAfter")]
        retry_after: u64,
    },
    Failed {
        reason: String,
    },
}

impl DeliveryAck {
    pub fn into_result(self) -> Result<(), DeliveryError> {
        match self {
            Self::Delivered => Ok(()),
            Self::RateLimited { retry_after } => Err(DeliveryError::RateLimited(
                Duration::from_secs(retry_after),
            )),
            Self::Failed { reason } => Err(DeliveryError::Failed(reason)),
        }
    }
}

type Queue = mpsc::Receiver<Delivery>;

pub struct RelayPlatform {
    outbox: mpsc::Sender<Delivery>,
    queue: Arc<Mutex<Queue>>,
    pending: Mutex<HashMap<MessageId, oneshot::Sender<Result<(), DeliveryError>>>>,
    ack_timeout: Duration,
    next_message_id: AtomicI64,
    memberships: RwLock<HashSet<(String, UserId)>>,
}

impl RelayPlatform {
    /// `capacity` bounds the deliveries waiting for the adapter; senders wait for room.
    pub fn new(capacity: usize, ack_timeout: Duration) -> Self {
        let (outbox, queue) = mpsc::channel(capacity);
        Self {
            outbox,
            queue: Arc::new(Mutex::new(queue)),
            pending: Mutex::new(HashMap::new()),
            ack_timeout,
            next_message_id: AtomicI64::new(1),
            memberships: RwLock::new(HashSet::new()),
        }
    }

    /// Hands the delivery queue to one adapter for as long as it holds the guard.
    /// `None` while another adapter is connected.
    pub fn connect(&self) -> Option<OwnedMutexGuard<Queue>> {
        self.queue.clone().try_lock_owned().ok()
    }

    fn is_connected(&self) -> bool {
        self.queue.try_lock().is_err()
    }

    /// Whether a delivery is still waiting for its result. Expired ones are not handed out.
    pub async fn is_pending(&self, id: MessageId) -> bool {
        self.pending.lock().await.contains_key(&id)
    }

    /// Completes the delivery `id`. Returns false if nothing is waiting on it.
    pub async fn resolve(&self, id: MessageId, result: Result<(), DeliveryError>) -> bool {
        match self.pending.lock().await.remove(&id) {
            Some(waiter) => waiter.send(result).is_ok(),
            None => false,
        }
    }

    pub async fn report_membership(&self, channel: String, user: UserId, member: bool) {
        let mut memberships = self.memberships.write().await;
        if member {
            memberships.insert((channel, user));
        } else {
            memberships.remove(&(channel, user));
        }
    }

    async fn dispatch(&self, action: DeliveryAction) -> Result<MessageId, DeliveryError> {
        if !self.is_connected() {
            return Err(DeliveryError::Failed(
                "no platform adapter connected".to_owned(),
            ));
        }

        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, ack) = oneshot::channel();
        self.pending.lock().await.insert(id, waiter);

        let outcome = tokio::time::timeout(self.ack_timeout, async {
            self.outbox
                .send(Delivery { id, action })
                .await
                .map_err(|_| DeliveryError::Failed("delivery queue closed".to_owned()))?;
            ack.await
                .map_err(|_| DeliveryError::Failed("delivery dropped".to_owned()))?
        })
        .await;

        match outcome {
            Ok(result) => result.map(|_| id),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DeliveryError::Failed(format!(
                    "no result for delivery {} within {:?}",
                    id, self.ack_timeout
                )))
            }
        }
    }
}

impl Platform for RelayPlatform {
    fn send_message(
        &self,
        recipient: UserId,
        message: OutboundMessage,
    ) -> BoxFuture<'_, Result<MessageId, DeliveryError>> {
        self.dispatch(DeliveryAction::Send { recipient, message }).boxed()
    }

    fn delete_message(
        &self,
        chat: UserId,
        message_id: MessageId,
    ) -> BoxFuture<'_, Result<(), DeliveryError>> {
        async move {
            self.dispatch(DeliveryAction::Delete { chat, message_id })
                .await
                .map(|_| ())
        }
        .boxed()
    }

    fn is_channel_member<'a>(
        &'a self,
        channel: &'a str,
        user: UserId,
    ) -> BoxFuture<'a, Result<bool, DeliveryError>> {
        async move {
            let memberships = self.memberships.read().await;
            Ok(memberships.contains(&(channel.to_owned(), user)))
        }
        .boxed()
    }
}

/// Channels from `channels` the user has not joined. A failed check counts as not joined.
pub async fn missing_channels(
    platform: &dyn Platform,
    channels: &[String],
    user: UserId,
) -> Vec<String> {
    let mut missing = Vec::new();
    for channel in channels {
        match platform.is_channel_member(channel, user).await {
            Ok(true) => {}
            Ok(false) => missing.push(channel.clone()),
            Err(e) => {
                tracing::warn!("membership check for {} in {} failed >>> {}", user, channel, e);
                missing.push(channel.clone());
            }
        }
    }
    missing
}

pub async fn ensure_joined(
    platform: &dyn Platform,
    channels: &[String],
    user: UserId,
) -> Result<(), LedgerError> {
    let missing = missing_channels(platform, channels, user).await;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LedgerError::ChannelsNotJoined(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personalization_replaces_every_token() {
        let message = OutboundMessage::text("Hi {user}, {user} again");
        assert_eq!(
            message.personalized("ADA"),
            OutboundMessage::text("Hi ADA, ADA again")
        );

        let photo = OutboundMessage::Photo {
            photo: "file-1".into(),
            caption: Some("Hello {user}".into()),
            button: None,
        };
        match photo.personalized("USER") {
            OutboundMessage::Photo { caption, .. } => {
                assert_eq!(caption.as_deref(), Some("Hello USER"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn relay() -> RelayPlatform {
        RelayPlatform::new(4, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn relay_fails_without_adapter() {
        let relay = relay();
        assert!(matches!(
            relay
                .send_message(UserId::from(1), OutboundMessage::text("hi"))
                .await,
            Err(DeliveryError::Failed(reason)) if reason == "no platform adapter connected"
        ));

        let queue = relay.connect().unwrap();
        assert!(relay.connect().is_none());
        drop(queue);
        assert!(relay.connect().is_some());
    }

    #[tokio::test]
    async fn send_returns_what_the_adapter_reports() {
        let relay = relay();
        let mut queue = relay.connect().unwrap();

        let adapter = async {
            let first = queue.recv().await.unwrap();
            relay
                .resolve(first.id, DeliveryAck::RateLimited { retry_after: 3 }.into_result())
                .await;
            let second = queue.recv().await.unwrap();
            let blocked = DeliveryAck::Failed {
                reason: "Forbidden: bot was blocked by the user".into(),
            };
            relay.resolve(second.id, blocked.into_result()).await;
            let third = queue.recv().await.unwrap();
            assert!(relay.resolve(third.id, Ok(())).await);
            third.id
        };
        let sends = async {
            let mut results = Vec::new();
            for id in 1..=3 {
                results.push(
                    relay
                        .send_message(UserId::from(id), OutboundMessage::text("hi"))
                        .await,
                );
            }
            results
        };

        let (delivered, results) = tokio::join!(adapter, sends);
        assert_eq!(
            results[0],
            Err(DeliveryError::RateLimited(Duration::from_secs(3)))
        );
        assert_eq!(
            results[1],
            Err(DeliveryError::Failed(
                "Forbidden: bot was blocked by the user".into()
            ))
        );
        assert_eq!(results[2], Ok(delivered));
        assert!(!relay.resolve(delivered, Ok(())).await);
    }

    #[tokio::test]
    async fn unacknowledged_delivery_times_out() {
        let relay = RelayPlatform::new(4, Duration::from_millis(20));
        let mut queue = relay.connect().unwrap();

        let result = relay.delete_message(UserId::from(1), 7).await;
        assert!(matches!(result, Err(DeliveryError::Failed(_))));

        let expired = queue.recv().await.unwrap();
        assert!(matches!(
            expired.action,
            DeliveryAction::Delete { message_id: 7, .. }
        ));
        assert!(!relay.is_pending(expired.id).await);
        assert!(!relay.resolve(expired.id, Ok(())).await);
    }

    #[tokio::test]
    async fn membership_follows_reports() {
        let relay = relay();
        let channels = vec!["@news".to_owned(), "@chat".to_owned()];
        let user = UserId::from(9);

        relay.report_membership("@news".into(), user, true).await;
        assert_eq!(missing_channels(&relay, &channels, user).await, vec!["@chat"]);

        relay.report_membership("@chat".into(), user, true).await;
        assert!(ensure_joined(&relay, &channels, user).await.is_ok());

        relay.report_membership("@news".into(), user, false).await;
        assert!(matches!(
            ensure_joined(&relay, &channels, user).await,
            Err(LedgerError::ChannelsNotJoined(missing)) if missing == vec!["@news".to_owned()]
        ));
    }
}
