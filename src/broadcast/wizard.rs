//! Per-operator conversation that composes a broadcast.
//!
//! [`advance`] is the pure transition function. [`BroadcastWizard`] keeps one session per
//! operator and performs the prompt bookkeeping around it: the previous prompt is deleted
//! whenever a new one is sent, so the operator's chat only ever shows the current step.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{
        errors::WizardError,
        fields::{LinkButton, PhotoRef, UserId},
    },
    platform::{MessageId, OutboundMessage, Platform},
};

/// Steps of an open session. Having no session is the idle state.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum WizardState {
    MenuShown,
    AwaitingTextBroadcast,
    AwaitingImageCaption,
    AwaitingImage,
    AwaitingTextForImage {
        photo: PhotoRef,
    },
    AwaitingButtonForImageText {
        photo: PhotoRef,
        text: String,
    },
    AwaitingText,
    AwaitingButtonForText {
        text: String,
    },
}

impl WizardState {
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::MenuShown => "Choose the type of broadcast: text, image with caption, image with text and button, or text with button.",
            Self::AwaitingTextBroadcast => "Send the text to broadcast. {user} is replaced with each recipient's name.",
            Self::AwaitingImageCaption => "Send the image to broadcast with its caption.",
            Self::AwaitingImage => "Send the image to broadcast.",
            Self::AwaitingTextForImage { .. } => "Send the text to go with the image.",
            Self::AwaitingText => "Send the text to broadcast.",
            Self::AwaitingButtonForImageText { .. } | Self::AwaitingButtonForText { .. } => {
                "Send the button placeholder and link in the format: 'Placeholder, https://link'"
            }
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastShape {
    Text,
    ImageCaption,
    ImageTextButton,
    TextButton,
}

impl BroadcastShape {
    fn first_step(self) -> WizardState {
        match self {
            Self::Text => WizardState::AwaitingTextBroadcast,
            Self::ImageCaption => WizardState::AwaitingImageCaption,
            Self::ImageTextButton => WizardState::AwaitingImage,
            Self::TextButton => WizardState::AwaitingText,
        }
    }
}

/// What an operator sent while composing.
#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WizardInput {
    OpenMenu,
    Choose(BroadcastShape),
    Text(String),
    Photo {
        photo: PhotoRef,
        caption: Option<String>,
    },
    Cancel,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Prompt(WizardState),
    Retry {
        current: WizardState,
        error: WizardError,
    },
    Commit(OutboundMessage),
    Cancelled,
    Ignored,
}

pub fn advance(state: Option<WizardState>, input: WizardInput) -> Step {
    use WizardInput as In;
    use WizardState as S;

    let pair = match (state, input) {
        (_, In::OpenMenu) => return Step::Prompt(S::MenuShown),
        (None, _) => return Step::Ignored,
        (Some(_), In::Cancel) => return Step::Cancelled,
        // picking a shape mid-flow starts that shape over
        (Some(_), In::Choose(shape)) => return Step::Prompt(shape.first_step()),
        (Some(state), input) => (state, input),
    };

    match pair {
        (S::MenuShown, _) => Step::Retry {
            current: S::MenuShown,
            error: WizardError::ChooseShapeFirst,
        },

        (S::AwaitingTextBroadcast, In::Text(text)) => {
            Step::Commit(OutboundMessage::Text { text, button: None })
        }
        (S::AwaitingImageCaption, In::Photo { photo, caption }) => {
            Step::Commit(OutboundMessage::Photo {
                photo,
                caption,
                button: None,
            })
        }

        (S::AwaitingImage, In::Photo { photo, .. }) => {
            Step::Prompt(S::AwaitingTextForImage { photo })
        }
        (S::AwaitingTextForImage { photo }, In::Text(text)) => {
            Step::Prompt(S::AwaitingButtonForImageText { photo, text })
        }
        (S::AwaitingButtonForImageText { photo, text }, In::Text(raw)) => {
            match LinkButton::parse(&raw) {
                Ok(button) => Step::Commit(OutboundMessage::Photo {
                    photo,
                    caption: Some(text),
                    button: Some(button),
                }),
                Err(error) => Step::Retry {
                    current: S::AwaitingButtonForImageText { photo, text },
                    error,
                },
            }
        }

        (S::AwaitingText, In::Text(text)) => Step::Prompt(S::AwaitingButtonForText { text }),
        (S::AwaitingButtonForText { text }, In::Text(raw)) => match LinkButton::parse(&raw) {
            Ok(button) => Step::Commit(OutboundMessage::Text {
                text,
                button: Some(button),
            }),
            Err(error) => Step::Retry {
                current: S::AwaitingButtonForText { text },
                error,
            },
        },

        (current @ (S::AwaitingImageCaption | S::AwaitingImage), _) => Step::Retry {
            current,
            error: WizardError::ExpectedPhoto,
        },
        (current, _) => Step::Retry {
            current,
            error: WizardError::ExpectedText,
        },
    }
}

struct BroadcastSession {
    state: WizardState,
    prompt: Option<MessageId>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum WizardOutcome {
    Prompted(WizardState),
    Committed(OutboundMessage),
    Cancelled,
    Ignored,
}

#[derive(Default)]
pub struct BroadcastWizard {
    sessions: Mutex<HashMap<UserId, Arc<Mutex<Option<BroadcastSession>>>>>,
}

impl BroadcastWizard {
    /// Feeds one operator input through the session. A rejected input keeps the step,
    /// repeats its prompt and comes back as the error.
    ///
    /// The operator's session stays locked across the platform calls, so overlapping
    /// inputs from the same operator are applied one after the other.
    pub async fn handle(
        &self,
        platform: &dyn Platform,
        operator: UserId,
        input: WizardInput,
    ) -> Result<WizardOutcome, WizardError> {
        let slot = self.slot(operator).await;
        let mut session = slot.lock().await;
        let (state, prompt) = match session.take() {
            Some(session) => (Some(session.state), session.prompt),
            None => (None, None),
        };

        match advance(state, input) {
            Step::Prompt(next) => {
                retire(platform, operator, prompt).await;
                let prompt = send_prompt(platform, operator, next.prompt().to_owned()).await;
                *session = Some(BroadcastSession {
                    state: next.clone(),
                    prompt,
                });
                Ok(WizardOutcome::Prompted(next))
            }
            Step::Retry { current, error } => {
                retire(platform, operator, prompt).await;
                let text = format!("{}\n\n{}", error, current.prompt());
                let prompt = send_prompt(platform, operator, text).await;
                *session = Some(BroadcastSession {
                    state: current,
                    prompt,
                });
                Err(error)
            }
            Step::Commit(message) => {
                retire(platform, operator, prompt).await;
                tracing::info!("operator {} committed a broadcast", operator);
                Ok(WizardOutcome::Committed(message))
            }
            Step::Cancelled => {
                retire(platform, operator, prompt).await;
                send_prompt(platform, operator, "Operation Ended".to_owned()).await;
                Ok(WizardOutcome::Cancelled)
            }
            Step::Ignored => Ok(WizardOutcome::Ignored),
        }
    }

    pub async fn state_of(&self, operator: UserId) -> Option<WizardState> {
        let slot = self.sessions.lock().await.get(&operator).cloned()?;
        let session = slot.lock().await;
        session.as_ref().map(|session| session.state.clone())
    }

    async fn slot(&self, operator: UserId) -> Arc<Mutex<Option<BroadcastSession>>> {
        self.sessions
            .lock()
            .await
            .entry(operator)
            .or_default()
            .clone()
    }
}

async fn retire(platform: &dyn Platform, operator: UserId, prompt: Option<MessageId>) {
    if let Some(message_id) = prompt {
        if let Err(e) = platform.delete_message(operator, message_id).await {
            tracing::warn!("deleting prompt {} for {} failed >>> {}", message_id, operator, e);
        }
    }
}

async fn send_prompt(platform: &dyn Platform, operator: UserId, text: String) -> Option<MessageId> {
    match platform.send_message(operator, OutboundMessage::text(text)).await {
        Ok(message_id) => Some(message_id),
        Err(e) => {
            tracing::warn!("sending wizard prompt to {} failed >>> {}", operator, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::errors::DeliveryError, test_support::MockPlatform};
    use futures::{future::BoxFuture, FutureExt};
    use std::time::Duration;

    /// Takes a while to send, like a real chat network.
    #[derive(Default)]
    struct SlowPlatform(MockPlatform);

    impl Platform for SlowPlatform {
        fn send_message(
            &self,
            recipient: UserId,
            message: OutboundMessage,
        ) -> BoxFuture<'_, Result<MessageId, DeliveryError>> {
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.0.send_message(recipient, message).await
            }
            .boxed()
        }

        fn delete_message(
            &self,
            chat: UserId,
            message_id: MessageId,
        ) -> BoxFuture<'_, Result<(), DeliveryError>> {
            self.0.delete_message(chat, message_id)
        }

        fn is_channel_member<'a>(
            &'a self,
            channel: &'a str,
            user: UserId,
        ) -> BoxFuture<'a, Result<bool, DeliveryError>> {
            self.0.is_channel_member(channel, user)
        }
    }

    fn text(value: &str) -> WizardInput {
        WizardInput::Text(value.to_owned())
    }

    fn photo(id: &str) -> WizardInput {
        WizardInput::Photo {
            photo: id.into(),
            caption: None,
        }
    }

    #[test]
    fn image_text_button_flow_commits_all_three_parts() {
        let step = advance(Some(WizardState::MenuShown), WizardInput::Choose(BroadcastShape::ImageTextButton));
        assert_eq!(step, Step::Prompt(WizardState::AwaitingImage));

        let step = advance(Some(WizardState::AwaitingImage), photo("p1"));
        let Step::Prompt(state) = step else { panic!("expected prompt") };
        let step = advance(Some(state), text("Hello {user}"));
        let Step::Prompt(state) = step else { panic!("expected prompt") };

        assert_eq!(
            advance(Some(state), text("Join, https://t.me/news")),
            Step::Commit(OutboundMessage::Photo {
                photo: "p1".into(),
                caption: Some("Hello {user}".into()),
                button: Some(LinkButton {
                    label: "Join".into(),
                    url: "https://t.me/news".into()
                }),
            })
        );
    }

    #[test]
    fn bad_button_link_keeps_the_step() {
        let state = WizardState::AwaitingButtonForText { text: "hi".into() };
        assert_eq!(
            advance(Some(state.clone()), text("Join, ftp://x")),
            Step::Retry {
                current: state.clone(),
                error: WizardError::InvalidButtonLink
            }
        );
        assert_eq!(
            advance(Some(state.clone()), text("no comma here")),
            Step::Retry {
                current: state,
                error: WizardError::MalformedButton
            }
        );
    }

    #[test]
    fn wrong_input_shape_is_rejected() {
        assert!(matches!(
            advance(Some(WizardState::AwaitingImage), text("hi")),
            Step::Retry { error: WizardError::ExpectedPhoto, .. }
        ));
        assert!(matches!(
            advance(Some(WizardState::AwaitingTextBroadcast), photo("p")),
            Step::Retry { error: WizardError::ExpectedText, .. }
        ));
        assert!(matches!(
            advance(Some(WizardState::MenuShown), text("hi")),
            Step::Retry { error: WizardError::ChooseShapeFirst, .. }
        ));
    }

    #[test]
    fn idle_ignores_everything_but_the_menu() {
        assert_eq!(advance(None, text("hi")), Step::Ignored);
        assert_eq!(advance(None, WizardInput::Cancel), Step::Ignored);
        assert_eq!(advance(None, WizardInput::OpenMenu), Step::Prompt(WizardState::MenuShown));
    }

    #[test]
    fn reentry_discards_accumulated_fields() {
        let state = WizardState::AwaitingButtonForImageText {
            photo: "p".into(),
            text: "t".into(),
        };
        assert_eq!(
            advance(Some(state.clone()), WizardInput::OpenMenu),
            Step::Prompt(WizardState::MenuShown)
        );
        assert_eq!(
            advance(Some(state), WizardInput::Choose(BroadcastShape::Text)),
            Step::Prompt(WizardState::AwaitingTextBroadcast)
        );
    }

    #[tokio::test]
    async fn each_new_step_deletes_the_previous_prompt() {
        let platform = MockPlatform::default();
        let wizard = BroadcastWizard::default();
        let operator = UserId::from(1);

        wizard.handle(&platform, operator, WizardInput::OpenMenu).await.unwrap();
        wizard
            .handle(&platform, operator, WizardInput::Choose(BroadcastShape::TextButton))
            .await
            .unwrap();
        wizard.handle(&platform, operator, text("Hello")).await.unwrap();
        assert_eq!(platform.deleted.lock().unwrap().len(), 2);

        assert_eq!(
            wizard.handle(&platform, operator, text("bad")).await,
            Err(WizardError::MalformedButton)
        );
        assert_eq!(
            wizard.state_of(operator).await,
            Some(WizardState::AwaitingButtonForText { text: "Hello".into() })
        );

        let outcome = wizard
            .handle(&platform, operator, text("Go, tg://msg_url?url=x"))
            .await
            .unwrap();
        assert!(matches!(outcome, WizardOutcome::Committed(OutboundMessage::Text { .. })));
        assert_eq!(platform.deleted.lock().unwrap().len(), 4);
        assert_eq!(wizard.state_of(operator).await, None);
    }

    #[tokio::test]
    async fn cancel_ends_the_session() {
        let platform = MockPlatform::default();
        let wizard = BroadcastWizard::default();
        let operator = UserId::from(1);

        wizard.handle(&platform, operator, WizardInput::OpenMenu).await.unwrap();
        assert_eq!(
            wizard.handle(&platform, operator, WizardInput::Cancel).await,
            Ok(WizardOutcome::Cancelled)
        );
        assert_eq!(wizard.state_of(operator).await, None);
        assert_eq!(platform.last_text_to(operator).as_deref(), Some("Operation Ended"));
    }

    #[tokio::test]
    async fn operators_hold_independent_sessions() {
        let platform = MockPlatform::default();
        let wizard = BroadcastWizard::default();

        wizard.handle(&platform, UserId::from(1), WizardInput::OpenMenu).await.unwrap();
        wizard.handle(&platform, UserId::from(2), WizardInput::OpenMenu).await.unwrap();
        wizard
            .handle(&platform, UserId::from(2), WizardInput::Choose(BroadcastShape::Text))
            .await
            .unwrap();

        assert_eq!(wizard.state_of(UserId::from(1)).await, Some(WizardState::MenuShown));
        assert_eq!(
            wizard.state_of(UserId::from(2)).await,
            Some(WizardState::AwaitingTextBroadcast)
        );
    }

    #[tokio::test]
    async fn overlapping_inputs_from_one_operator_queue() {
        let platform = SlowPlatform::default();
        let wizard = BroadcastWizard::default();
        let operator = UserId::from(1);

        let (first, second) = tokio::join!(
            wizard.handle(&platform, operator, WizardInput::OpenMenu),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                wizard
                    .handle(&platform, operator, WizardInput::Choose(BroadcastShape::Text))
                    .await
            }
        );

        assert_eq!(first, Ok(WizardOutcome::Prompted(WizardState::MenuShown)));
        assert_eq!(
            second,
            Ok(WizardOutcome::Prompted(WizardState::AwaitingTextBroadcast))
        );
        assert_eq!(
            wizard.state_of(operator).await,
            Some(WizardState::AwaitingTextBroadcast)
        );
        assert_eq!(platform.0.deleted.lock().unwrap().len(), 1);
    }
}
