use crate::{
    app::AppState,
    domain::{errors::ApiError, fields::UserId},
    platform::{DeliveryAck, MessageId},
};
use async_stream::try_stream;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    Json,
};
use futures::Stream;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Ledger events for the platform adapter.
pub async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::info!("new connection to sse stream >>>");

    let mut rx = state.get_sender().subscribe();

    Sse::new(try_stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Event::default()
                        .json_data(&event)
                        .map_err(axum::Error::new)?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("sse subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
    .keep_alive(KeepAlive::default())
}

/// Deliveries for the one connected adapter. Each must be answered on `report_delivery`.
pub async fn deliveries(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let platform = state.platform();
    let mut queue = platform.connect().ok_or(ApiError::AdapterAlreadyConnected)?;
    tracing::info!("platform adapter connected >>>");

    Ok(Sse::new(try_stream! {
        while let Some(delivery) = queue.recv().await {
            if !platform.is_pending(delivery.id).await {
                tracing::debug!("delivery {} expired before pickup", delivery.id);
                continue;
            }
            yield Event::default()
                .id(delivery.id.to_string())
                .json_data(&delivery)
                .map_err(axum::Error::new)?;
        }
    })
    .keep_alive(KeepAlive::default()))
}

pub async fn report_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MessageId>,
    Json(ack): Json<DeliveryAck>,
) -> StatusCode {
    tracing::debug!("delivery {} >>> {:?}", id, ack);
    if state.platform().resolve(id, ack.into_result()).await {
        StatusCode::NO_CONTENT
    } else {
        tracing::warn!("result for unknown or expired delivery {}", id);
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipReport {
    channel: String,
    user_id: UserId,
    member: bool,
}

/// The adapter reports channel joins and leaves here.
pub async fn report_membership(
    State(state): State<Arc<AppState>>,
    Json(report): Json<MembershipReport>,
) -> StatusCode {
    tracing::debug!(
        "membership of {} in {} >>> {}",
        report.user_id,
        report.channel,
        report.member
    );
    state
        .platform()
        .report_membership(report.channel, report.user_id, report.member)
        .await;
    StatusCode::NO_CONTENT
}
