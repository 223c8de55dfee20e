// src/handlers/events.rs

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    events::{Delivery, EventSender, PredictionEvent, deliveries},
    handlers::predictions::{fetch_options, fetch_prediction_row},
    models::prediction::PredictionResponse,
    services::lifecycle::PredictionStatus,
};

fn to_sse(event: &PredictionEvent) -> Event {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => Event::default()
            .event("error")
            .data(json!({ "error": e.to_string() }).to_string()),
    }
}

/// Current state of a prediction as an SSE event named `name`, or an `error`
/// event when it cannot be shown. Drafts count as missing.
async fn snapshot(pool: &PgPool, prediction_id: i64, name: &'static str) -> Result<Event, Event> {
    let loaded: Result<Option<PredictionResponse>, AppError> = async {
        let mut conn = pool.acquire().await?;
        let Some(row) = fetch_prediction_row(&mut conn, prediction_id, false).await? else {
            return Ok(None);
        };
        let options = fetch_options(&mut conn, prediction_id).await?;
        let prediction = PredictionResponse::assemble(row, options, Utc::now())?;
        Ok(Some(prediction).filter(|p| p.status != PredictionStatus::Draft))
    }
    .await;

    match loaded {
        Ok(Some(prediction)) => Ok(Event::default()
            .event(name)
            .data(json!({ "prediction": prediction }).to_string())),
        Ok(None) => Err(Event::default()
            .event("error")
            .data(json!({ "error": "Prediction not found" }).to_string())),
        Err(e) => {
            tracing::warn!(prediction_id, "Failed to load SSE snapshot: {}", e);
            Err(Event::default()
                .event("error")
                .data(json!({ "error": "Failed to load prediction" }).to_string()))
        }
    }
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(30))
        .text("keep-alive")
}

/// Live updates of one prediction: an `init` snapshot, then its events.
///
/// A subscriber that fell behind gets a fresh snapshot as `resync` in place
/// of the updates it missed. The stream ends after an `error` event when the
/// prediction cannot be shown.
pub async fn prediction_events(
    State(pool): State<PgPool>,
    State(events): State<EventSender>,
    Path(prediction_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading the snapshot so nothing falls in between.
    let rx = events.subscribe();

    let stream = async_stream::stream! {
        match snapshot(&pool, prediction_id, "init").await {
            Ok(init) => yield Ok(init),
            Err(error) => {
                yield Ok(error);
                return;
            }
        }

        let updates = deliveries(rx, Some(prediction_id));
        futures::pin_mut!(updates);
        while let Some(delivery) = updates.next().await {
            match delivery {
                Delivery::Event(event) => yield Ok(to_sse(&event)),
                Delivery::Missed(skipped) => {
                    tracing::debug!(prediction_id, skipped, "SSE subscriber lagged");
                    match snapshot(&pool, prediction_id, "resync").await {
                        Ok(resync) => yield Ok(resync),
                        Err(error) => {
                            yield Ok(error);
                            return;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}

/// Every public prediction event, as it happens.
pub async fn all_events(
    State(events): State<EventSender>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = deliveries(events.subscribe(), None);

    let stream = updates.map(|delivery| {
        Ok(match delivery {
            Delivery::Event(event) => to_sse(&event),
            Delivery::Missed(skipped) => Event::default()
                .event("resync")
                .data(json!({ "skipped": skipped }).to_string()),
        })
    });

    Sse::new(stream).keep_alive(keep_alive())
}
