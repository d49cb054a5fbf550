use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use scoring::{
    error::MlError,
    ml::{MlClient, MlClientSettings, MlRiskClient, TransportFailure, circuit_breaker::CircuitBreakerConfig},
};

use super::mocks::{MockMlTransport, SlowTransport, prediction};
use super::test_utils::{assert_close, context};

fn settings() -> MlClientSettings {
    MlClientSettings {
        timeout: Duration::from_millis(500),
        cache_ttl: Duration::from_secs(60),
        rate_limit_max_calls: 100,
        rate_limit_window: Duration::from_secs(60),
        circuit: CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_secs(30),
        },
    }
}

fn counting_transport<F>(calls: Arc<AtomicUsize>, respond: F) -> MockMlTransport
where
    F: Fn(usize) -> Result<scoring::ml::MlPrediction, TransportFailure> + Send + 'static,
{
    let mut transport = MockMlTransport::new();
    transport.expect_post().returning(move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        respond(n)
    });
    transport
}

#[tokio::test]
async fn test_successful_prediction_is_returned() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |_| Ok(prediction(0.82, 0.7)));
    let client = MlRiskClient::new(Arc::new(transport), settings());

    let output = client.predict(&context(Some("exp-1"), "payer-1", 100.0)).await.unwrap();
    assert_close(output.score, 0.82);
    assert_close(output.confidence, 0.7);
    assert_eq!(output.model_version, "test-model-1");
    assert!(!output.cached);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_service_times_out() {
    let transport = SlowTransport::new(Duration::from_secs(10));
    let calls = transport.calls.clone();
    let client = MlRiskClient::new(Arc::new(transport), settings());

    let result = client.predict(&context(Some("exp-1"), "payer-1", 100.0)).await;
    assert_eq!(result, Err(MlError::Timeout));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_failure_is_retried_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |n| {
        if n == 0 {
            Err(TransportFailure::Connection("connection refused".to_string()))
        } else {
            Ok(prediction(0.3, 0.8))
        }
    });
    let client = MlRiskClient::new(Arc::new(transport), settings());

    let output = client.predict(&context(Some("exp-1"), "payer-1", 100.0)).await.unwrap();
    assert_close(output.score, 0.3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_repeated_connection_failure_is_unavailable() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |_| {
        Err(TransportFailure::Connection("connection refused".to_string()))
    });
    let client = MlRiskClient::new(Arc::new(transport), settings());

    let result = client.predict(&context(Some("exp-1"), "payer-1", 100.0)).await;
    assert!(matches!(result, Err(MlError::Unavailable(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |n| match n {
        0 => Err(TransportFailure::Status {
            status: 429,
            body: "slow down".to_string(),
        }),
        1 => Err(TransportFailure::Status {
            status: 400,
            body: "bad features".to_string(),
        }),
        2 => Err(TransportFailure::Decode("expected value".to_string())),
        _ => Err(TransportFailure::Status {
            status: 503,
            body: "maintenance".to_string(),
        }),
    });
    let client = MlRiskClient::new(Arc::new(transport), settings());
    let ctx = context(None, "payer-1", 100.0);

    assert_eq!(client.predict(&ctx).await, Err(MlError::RateLimited));
    assert!(matches!(client.predict(&ctx).await, Err(MlError::ModelError(_))));
    assert!(matches!(client.predict(&ctx).await, Err(MlError::ModelError(_))));
    assert!(matches!(client.predict(&ctx).await, Err(MlError::Unavailable(_))));
    // no retry on status failures
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_out_of_range_score_is_a_model_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls, |_| Ok(prediction(1.7, 0.5)));
    let client = MlRiskClient::new(Arc::new(transport), settings());

    let result = client.predict(&context(Some("exp-1"), "payer-1", 100.0)).await;
    assert!(matches!(result, Err(MlError::ModelError(_))));
}

#[tokio::test(start_paused = true)]
async fn test_predictions_are_cached_per_expense() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |_| Ok(prediction(0.6, 0.9)));
    let client = MlRiskClient::new(Arc::new(transport), settings());
    let ctx = context(Some("exp-1"), "payer-1", 100.0);

    let first = client.predict(&ctx).await.unwrap();
    let second = client.predict(&ctx).await.unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_close(second.score, 0.6);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // a different expense is not served from the cache
    client.predict(&context(Some("exp-2"), "payer-1", 100.0)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    let refreshed = client.predict(&ctx).await.unwrap();
    assert!(!refreshed.cached);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_expired_cache_entries_and_idle_scopes_are_swept() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |_| Ok(prediction(0.2, 0.8)));
    let mut short_lived = settings();
    short_lived.cache_ttl = Duration::from_millis(20);
    short_lived.rate_limit_window = Duration::from_millis(20);
    let client = MlRiskClient::new(Arc::new(transport), short_lived);

    for i in 0..300 {
        let id = format!("exp-{}", i);
        client.predict(&context(Some(&id), &format!("payer-{}", i), 10.0)).await.unwrap();
    }
    assert!(client.cached_entries() > 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    client.predict(&context(Some("exp-new"), "payer-new", 10.0)).await.unwrap();

    assert_eq!(client.cached_entries(), 1);
    assert_eq!(client.tracked_scopes(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 301);
}

#[tokio::test]
async fn test_client_side_rate_limit_per_scope() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |_| Ok(prediction(0.1, 0.9)));
    let mut limited = settings();
    limited.rate_limit_max_calls = 2;
    let client = MlRiskClient::new(Arc::new(transport), limited);

    client.predict(&context(None, "payer-1", 10.0)).await.unwrap();
    client.predict(&context(None, "payer-1", 20.0)).await.unwrap();
    assert_eq!(client.predict(&context(None, "payer-1", 30.0)).await, Err(MlError::RateLimited));

    // other payers have their own budget
    client.predict(&context(None, "payer-2", 30.0)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_and_recovers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = counting_transport(calls.clone(), |n| {
        if n < 2 {
            Err(TransportFailure::Status {
                status: 502,
                body: "bad gateway".to_string(),
            })
        } else {
            Ok(prediction(0.4, 0.6))
        }
    });
    let client = MlRiskClient::new(Arc::new(transport), settings());
    let ctx = context(None, "payer-1", 100.0);

    assert!(matches!(client.predict(&ctx).await, Err(MlError::Unavailable(_))));
    assert!(matches!(client.predict(&ctx).await, Err(MlError::Unavailable(_))));

    let rejected = client.predict(&ctx).await;
    assert_eq!(rejected, Err(MlError::Unavailable("circuit open".to_string())));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    let probe = client.predict(&ctx).await.unwrap();
    assert_close(probe.score, 0.4);
    client.predict(&ctx).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
