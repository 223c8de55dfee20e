// src/events.rs

use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::services::lifecycle::PredictionStatus;

/// Capacity of the broadcast ring. Slow subscribers that fall further behind
/// than this receive a `resync` event instead of the missed updates.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened to a prediction and should reach live viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredictionEvent {
    VoteCast {
        prediction_id: i64,
        option_id: i64,
        votes: i64,
        votes_yes: i64,
        votes_no: i64,
        total_votes: i64,
    },
    CommentPosted {
        prediction_id: i64,
        comment_id: i64,
        parent_id: Option<i64>,
    },
    PredictionUpdated {
        prediction_id: i64,
        status: PredictionStatus,
    },
    PredictionResolved {
        prediction_id: i64,
        winning_option_id: i64,
    },
}

impl PredictionEvent {
    pub fn prediction_id(&self) -> i64 {
        match self {
            PredictionEvent::VoteCast { prediction_id, .. }
            | PredictionEvent::CommentPosted { prediction_id, .. }
            | PredictionEvent::PredictionUpdated { prediction_id, .. }
            | PredictionEvent::PredictionResolved { prediction_id, .. } => *prediction_id,
        }
    }

    /// Drafts are admin-only, so events about them never reach subscribers.
    pub fn is_public(&self) -> bool {
        !matches!(
            self,
            PredictionEvent::PredictionUpdated {
                status: PredictionStatus::Draft,
                ..
            }
        )
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            PredictionEvent::VoteCast { .. } => "vote_cast",
            PredictionEvent::CommentPosted { .. } => "comment_posted",
            PredictionEvent::PredictionUpdated { .. } => "prediction_updated",
            PredictionEvent::PredictionResolved { .. } => "prediction_resolved",
        }
    }
}

pub type EventSender = broadcast::Sender<PredictionEvent>;

pub fn create_broadcaster() -> EventSender {
    let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}

/// Publishes an event. Having no live subscriber is not an error.
pub fn publish(events: &EventSender, event: PredictionEvent) {
    if events.send(event).is_err() {
        tracing::trace!("No live subscribers for prediction event");
    }
}

/// What a live subscriber receives next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(PredictionEvent),
    /// The subscriber fell behind and this many events were dropped.
    Missed(u64),
}

/// Public events from `rx`, only those of `prediction_id` when given.
/// Ends when the sender side is gone.
pub fn deliveries(
    mut rx: broadcast::Receiver<PredictionEvent>,
    prediction_id: Option<i64>,
) -> impl Stream<Item = Delivery> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let wanted = prediction_id.is_none_or(|id| id == event.prediction_id());
                    if wanted && event.is_public() {
                        yield Delivery::Event(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => yield Delivery::Missed(skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }
}
