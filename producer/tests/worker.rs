//! Generation worker behaviour against mocked and scripted providers

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;

use common::{SlowProvider, not_cancelled, order, worker};
use producer::MockGenerationProvider;
use shared::{CredentialConfig, FailureClass, GenerationFailure};

fn mock_returning(references: Vec<&'static str>, times: usize) -> MockGenerationProvider {
    let mut provider = MockGenerationProvider::new();
    provider.expect_method().return_const("mock".to_string());
    provider
        .expect_generate()
        .times(times)
        .returning(move |_, _| Ok(references.iter().map(|r| r.to_string()).collect()));
    provider
}

#[tokio::test]
async fn test_success_returns_one_reference_per_variant() {
    let worker = worker(
        CredentialConfig::custom("key-1", "k", 5, 5.0, 1),
        Arc::new(mock_returning(vec!["a.png", "b.png", "c.png"], 1)),
    );

    let permit = worker.try_reserve().unwrap();
    let report = worker.process(permit, &order("sku-1", 2), &not_cancelled()).await;

    assert!(report.issued);
    assert_eq!(report.credential, "key-1");
    assert_eq!(report.method, "mock");
    // Extra references beyond the requested count are dropped
    assert_eq!(report.outcome.unwrap(), vec!["a.png", "b.png"]);

    let usage = worker.slot().usage();
    assert_eq!(usage.requests, 1);
    assert_eq!(usage.successes, 1);
    assert_eq!(worker.slot().in_flight(), 0);
}

#[tokio::test]
async fn test_short_response_is_retryable_incomplete() {
    let worker = worker(
        CredentialConfig::custom("key-1", "k", 5, 5.0, 1),
        Arc::new(mock_returning(vec!["a.png"], 1)),
    );

    let report = worker.process(worker.try_reserve().unwrap(), &order("sku-1", 3), &not_cancelled()).await;
    let failure = report.outcome.unwrap_err();
    assert_eq!(failure, GenerationFailure::IncompleteResponse { expected: 3, received: 1 });
    assert!(failure.is_retryable());
    assert_eq!(worker.slot().usage().failures, 1);
}

#[tokio::test]
async fn test_empty_response_is_terminal() {
    let worker = worker(
        CredentialConfig::custom("key-1", "k", 5, 5.0, 1),
        Arc::new(mock_returning(vec![], 1)),
    );

    let report = worker.process(worker.try_reserve().unwrap(), &order("sku-1", 1), &not_cancelled()).await;
    let failure = report.outcome.unwrap_err();
    assert!(matches!(failure, GenerationFailure::ContentRejected(_)));
    assert_eq!(failure.class(), FailureClass::Terminal);
}

#[tokio::test]
async fn test_provider_failure_is_passed_through() {
    let mut provider = MockGenerationProvider::new();
    provider.expect_method().return_const("mock".to_string());
    provider
        .expect_generate()
        .times(1)
        .returning(|_, _| Err(GenerationFailure::AuthenticationFailed));
    let worker = worker(CredentialConfig::custom("key-1", "k", 5, 5.0, 1), Arc::new(provider));

    let report = worker.process(worker.try_reserve().unwrap(), &order("sku-1", 1), &not_cancelled()).await;
    assert!(report.issued);
    assert_eq!(report.outcome.unwrap_err(), GenerationFailure::AuthenticationFailed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_call_times_out_as_retryable() {
    let provider = Arc::new(SlowProvider::new(Duration::from_secs(30)));
    let worker = worker(CredentialConfig::custom("key-1", "k", 1, 1.0, 1), provider.clone());

    let mut slow_order = order("sku-1", 1);
    slow_order.item_timeout = Duration::from_secs(2);

    let report = worker.process(worker.try_reserve().unwrap(), &slow_order, &not_cancelled()).await;
    let failure = report.outcome.unwrap_err();
    assert_eq!(failure, GenerationFailure::Timeout { after_ms: 2_000 });
    assert!(failure.is_retryable());
    assert!(report.issued);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_token_wait_expiry_issues_no_request() {
    // One token, returned after 100 seconds
    let worker = worker(
        CredentialConfig::custom("key-1", "k", 1, 0.01, 1),
        Arc::new(mock_returning(vec!["a.png"], 1)),
    );

    let first = worker.process(worker.try_reserve().unwrap(), &order("sku-1", 1), &not_cancelled()).await;
    assert!(first.is_success());

    let mut impatient = order("sku-2", 1);
    impatient.acquire_timeout = Duration::from_secs(1);
    let second = worker.process(worker.try_reserve().unwrap(), &impatient, &not_cancelled()).await;

    assert!(!second.issued);
    let failure = second.outcome.unwrap_err();
    assert_eq!(failure, GenerationFailure::TokenWaitExpired);
    assert!(failure.is_retryable());
    assert_eq!(worker.slot().usage().requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_worker_waits_for_refill_then_issues() {
    let provider = Arc::new(SlowProvider::new(Duration::ZERO));
    let worker = worker(CredentialConfig::custom("key-1", "k", 1, 0.5, 1), provider.clone());

    worker.process(worker.try_reserve().unwrap(), &order("sku-1", 1), &not_cancelled()).await;
    let report = worker.process(worker.try_reserve().unwrap(), &order("sku-2", 1), &not_cancelled()).await;

    assert!(report.is_success());
    assert_eq!(report.token_wait, Duration::from_secs(2));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(worker.slot().usage().token_wait_ms, 2_000);
}

#[tokio::test]
async fn test_cancelled_batch_never_reaches_provider() {
    let worker = worker(
        CredentialConfig::custom("key-1", "k", 5, 5.0, 1),
        Arc::new(mock_returning(vec!["a.png"], 0)),
    );
    let (_tx, cancel) = watch::channel(true);

    let report = worker.process(worker.try_reserve().unwrap(), &order("sku-1", 1), &cancel).await;
    assert!(!report.issued);
    assert_eq!(report.outcome.unwrap_err(), GenerationFailure::Cancelled);
    assert_eq!(worker.slot().usage().requests, 0);
    // Cancellation leaves the token in the bucket
    assert_eq!(worker.slot().limiter().available(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_token_wait_releases_worker() {
    let worker = Arc::new(worker(
        CredentialConfig::custom("key-1", "k", 1, 0.1, 2),
        Arc::new(mock_returning(vec!["a.png"], 1)),
    ));
    let (tx, cancel) = watch::channel(false);

    let first = worker.process(worker.try_reserve().unwrap(), &order("sku-1", 1), &cancel).await;
    assert!(first.is_success());

    // The next token returns after ten seconds, well inside the acquire
    // deadline, so only the stop signal can end the wait
    let mut patient = order("sku-2", 1);
    patient.acquire_timeout = Duration::from_secs(30);
    let waiting = {
        let worker = worker.clone();
        let permit = worker.try_reserve().unwrap();
        tokio::spawn(async move { worker.process(permit, &patient, &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stopped_at = tokio::time::Instant::now();
    tx.send_replace(true);

    let report = waiting.await.unwrap();
    assert_eq!(stopped_at.elapsed(), Duration::ZERO);
    assert!(!report.issued);
    assert_eq!(report.outcome.unwrap_err(), GenerationFailure::Cancelled);
    assert_eq!(worker.slot().in_flight(), 0);
}
