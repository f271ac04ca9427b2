//! Captcha gate integration: pausing, resuming, failed and abandoned challenges.

use std::time::Duration;

use courier::captcha::{CaptchaResolver, Challenge};
use courier::error::ChallengeError;
use courier::Dispatcher;
use serde_json::json;
use tokio::time::Instant;

use crate::support::{parking_handler, queued, take_resolver, text, RecordingClient};

#[tokio::test(start_paused = true)]
async fn no_send_starts_while_captcha_is_pending() {
    let client = RecordingClient::new();
    let dispatcher = Dispatcher::new(client.clone(), &queued(1_000));
    let (slot, handler) = parking_handler();
    dispatcher.set_captcha_handler(handler);

    client.raise_captcha(true);
    assert!(dispatcher.has_captcha());
    assert_eq!(dispatcher.captcha_count(), 1);

    let delivery = dispatcher.enqueue_outgoing(text(1, "held back"));
    dispatcher.start();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(client.sent().is_empty());

    // Resuming needs no further enqueue.
    let resolved = take_resolver(&slot).resolve("k3y").await;
    assert!(resolved.is_ok());
    assert!(!dispatcher.has_captcha());
    assert_eq!(delivery.await, Ok(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn captcha_while_armed_cancels_timer_and_resumes_immediately() {
    let client = RecordingClient::new();
    let dispatcher = Dispatcher::new(client.clone(), &queued(1_000));
    let (slot, handler) = parking_handler();
    dispatcher.set_captcha_handler(handler);

    let first = dispatcher.enqueue_outgoing(text(1, "first"));
    let second = dispatcher.enqueue_outgoing(text(2, "second"));
    dispatcher.start();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.sent().len(), 1);

    client.raise_captcha(true);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.sent().len(), 1, "blocked dispatcher must not send");
    assert_eq!(first.await, Ok(json!(1)));

    let resumed_at = Instant::now();
    assert!(take_resolver(&slot).resolve("key").await.is_ok());
    assert_eq!(second.await, Ok(json!(2)));

    let sent = client.sent();
    assert!(sent[1].at.duration_since(resumed_at) < Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn in_flight_send_completes_when_captcha_opens() {
    let client = RecordingClient::with_latency(Duration::from_secs(3));
    let dispatcher = Dispatcher::new(client.clone(), &queued(1_000));
    let (_slot, handler) = parking_handler();
    dispatcher.set_captcha_handler(handler);

    let in_flight = dispatcher.enqueue_outgoing(text(1, "mid-send"));
    dispatcher.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.raise_captcha(true);
    assert_eq!(in_flight.await, Ok(json!(1)));
    assert!(dispatcher.has_captcha());
}

#[tokio::test(start_paused = true)]
async fn failed_captcha_returns_error_to_resolver_and_reopens_dispatch() {
    let client = RecordingClient::new();
    let dispatcher = Dispatcher::new(client.clone(), &queued(1_000));
    let (slot, handler) = parking_handler();
    dispatcher.set_captcha_handler(handler);

    client.raise_captcha(false);
    let delivery = dispatcher.enqueue_outgoing(text(1, "queued"));
    dispatcher.start();

    let result = take_resolver(&slot).resolve("wrong").await;
    assert_eq!(result, Err(ChallengeError::Rejected("wrong".to_owned())));
    assert_eq!(dispatcher.captcha_count(), 0);

    // The failure is not propagated to queued messages.
    assert_eq!(delivery.await, Ok(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn every_outstanding_captcha_must_settle() {
    let client = RecordingClient::new();
    let dispatcher = Dispatcher::new(client.clone(), &queued(1_000));
    let (slot, handler) = parking_handler();
    dispatcher.set_captcha_handler(handler);

    client.raise_captcha(true);
    client.raise_captcha(true);
    assert_eq!(dispatcher.captcha_count(), 2);

    let delivery = dispatcher.enqueue_outgoing(text(1, "waiting"));
    dispatcher.start();

    assert!(take_resolver(&slot).resolve("one").await.is_ok());
    assert!(dispatcher.has_captcha());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(client.sent().is_empty());

    assert!(take_resolver(&slot).resolve("two").await.is_ok());
    assert_eq!(delivery.await, Ok(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn abandoned_resolver_closes_the_gate() {
    let client = RecordingClient::new();
    let dispatcher = Dispatcher::new(client.clone(), &queued(1_000));
    dispatcher.set_captcha_handler(|_challenge: Challenge, resolver: CaptchaResolver| {
        drop(resolver);
    });

    client.raise_captcha(true);
    assert!(!dispatcher.has_captcha());

    dispatcher.start();
    assert_eq!(
        dispatcher.enqueue_outgoing(text(1, "flows")).await,
        Ok(json!(1))
    );
}
