// tests/events_tests.rs

use futures::StreamExt;
use serde_json::json;
use tokio::sync::broadcast;
use truthvote::{
    events::{Delivery, PredictionEvent, deliveries},
    services::lifecycle::PredictionStatus,
};

fn vote(prediction_id: i64) -> PredictionEvent {
    PredictionEvent::VoteCast {
        prediction_id,
        option_id: prediction_id * 10,
        votes: 1,
        votes_yes: 0,
        votes_no: 0,
        total_votes: 1,
    }
}

fn updated(prediction_id: i64, status: PredictionStatus) -> PredictionEvent {
    PredictionEvent::PredictionUpdated {
        prediction_id,
        status,
    }
}

/// Sends everything, closes the channel and returns what a subscriber saw.
async fn delivered(
    capacity: usize,
    prediction_id: Option<i64>,
    events: Vec<PredictionEvent>,
) -> Vec<Delivery> {
    let (tx, rx) = broadcast::channel(capacity);
    for event in events {
        tx.send(event).expect("subscriber is listening");
    }
    drop(tx);
    deliveries(rx, prediction_id).collect().await
}

#[tokio::test]
async fn single_prediction_stream_skips_other_predictions() {
    let seen = delivered(16, Some(1), vec![vote(1), vote(2), vote(1), vote(3)]).await;

    assert_eq!(
        seen,
        vec![Delivery::Event(vote(1)), Delivery::Event(vote(1))]
    );
}

#[tokio::test]
async fn global_stream_sees_every_prediction() {
    let seen = delivered(16, None, vec![vote(1), vote(2)]).await;

    assert_eq!(seen, vec![Delivery::Event(vote(1)), Delivery::Event(vote(2))]);
}

#[tokio::test]
async fn draft_updates_never_reach_subscribers() {
    let events = vec![
        updated(4, PredictionStatus::Draft),
        updated(4, PredictionStatus::Active),
    ];

    let scoped = delivered(16, Some(4), events.clone()).await;
    assert_eq!(
        scoped,
        vec![Delivery::Event(updated(4, PredictionStatus::Active))]
    );

    let global = delivered(16, None, events).await;
    assert_eq!(
        global,
        vec![Delivery::Event(updated(4, PredictionStatus::Active))]
    );
}

#[tokio::test]
async fn lagging_subscriber_is_told_how_much_it_missed() {
    let seen = delivered(2, None, vec![vote(1), vote(2), vote(3), vote(4)]).await;

    assert_eq!(
        seen,
        vec![
            Delivery::Missed(2),
            Delivery::Event(vote(3)),
            Delivery::Event(vote(4)),
        ]
    );
}

#[tokio::test]
async fn stream_ends_when_the_broadcaster_is_gone() {
    let (tx, rx) = broadcast::channel::<PredictionEvent>(4);
    drop(tx);

    let seen: Vec<Delivery> = deliveries(rx, None).collect().await;
    assert!(seen.is_empty());
}

#[test]
fn events_serialize_with_a_type_tag() {
    let value = serde_json::to_value(updated(9, PredictionStatus::Active)).unwrap();
    assert_eq!(
        value,
        json!({ "type": "prediction_updated", "prediction_id": 9, "status": "active" })
    );
    assert_eq!(updated(9, PredictionStatus::Active).name(), "prediction_updated");

    let value = serde_json::to_value(PredictionEvent::PredictionResolved {
        prediction_id: 9,
        winning_option_id: 90,
    })
    .unwrap();
    assert_eq!(value["type"], "prediction_resolved");
    assert_eq!(value["winning_option_id"], 90);
}
