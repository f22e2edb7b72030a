//! Behavior-driven tests for retry and fault classification
//!
//! These tests verify HOW many attempts the executor makes for each fault
//! kind, and that classification alone decides it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tegpoll_core::{
    classify, AcquisitionError, Backoff, Credentials, DeviceClient, FaultKind, HttpError,
    HttpResponse, LocalGatewayClient, RawDeviceReading, RetryError, RetryExecutor, RetryPolicy,
};

mod support;

use support::ScriptedHttpClient;

fn timeout() -> AcquisitionError {
    AcquisitionError::from(HttpError::timeout("read timed out"))
}

fn bad_gateway() -> AcquisitionError {
    AcquisitionError::UpstreamStatus {
        endpoint: String::from("https://gateway.test/api/meters/aggregates"),
        status: 502,
        body: String::from("Bad Gateway"),
    }
}

// =============================================================================
// Retry: Budget Accounting
// =============================================================================

#[tokio::test]
async fn when_operation_always_fails_transiently_it_runs_max_retries_plus_one_times() {
    // Given: A policy allowing 5 retries and an operation that always times out
    let executor = RetryExecutor::new(RetryPolicy::transient(5));
    let attempts = AtomicU32::new(0);

    // When: The executor runs it
    let result: Result<(), _> = executor
        .execute(
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            },
            |_, _| {},
        )
        .await;

    // Then: Exactly 6 attempts were made and the last fault is reported
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    match result {
        Err(RetryError::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 6);
            assert_eq!(classify(&last), FaultKind::SoftTransient);
        }
        other => panic!("expected exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn when_operation_recovers_within_budget_the_success_value_is_returned() {
    // Given: An operation failing twice with mixed soft faults before succeeding
    let executor = RetryExecutor::new(RetryPolicy::transient(5));
    let attempts = AtomicU32::new(0);
    let retried = AtomicU32::new(0);

    // When: The executor runs it
    let result = executor
        .execute(
            |attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        0 => Err(timeout()),
                        1 => Err(bad_gateway()),
                        _ => Ok(42),
                    }
                }
            },
            |_, _| {
                retried.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

    // Then: The value arrives after three attempts and two retry callbacks
    assert_eq!(result.expect("recovers"), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(retried.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_fault_is_not_retryable_exactly_one_attempt_is_made() {
    let executor = RetryExecutor::new(RetryPolicy::transient(5));

    for fault in [
        AcquisitionError::auth_expired("401"),
        AcquisitionError::malformed("live_status", "missing response", "{}"),
        AcquisitionError::UpstreamStatus {
            endpoint: String::from("https://gateway.test/api/operation"),
            status: 500,
            body: String::new(),
        },
        AcquisitionError::NoEnergySites,
    ] {
        let attempts = AtomicU32::new(0);
        let fault = Mutex::new(Some(fault));

        let result: Result<(), _> = executor
            .execute(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let error = fault
                        .lock()
                        .expect("fault slot")
                        .take()
                        .unwrap_or(AcquisitionError::NoEnergySites);
                    async move { Err(error) }
                },
                |_, _| panic!("non-retryable faults must not trigger on_retry"),
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal(_))));
    }
}

#[tokio::test]
async fn when_policy_is_no_retry_even_soft_faults_fail_at_once() {
    let executor = RetryExecutor::new(RetryPolicy::no_retry());
    let attempts = AtomicU32::new(0);

    let result: Result<(), AcquisitionError> = executor
        .execute_logged("probe", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(timeout()) }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(AcquisitionError::Transport { .. })));
}

#[tokio::test]
async fn when_backoff_is_configured_retries_still_complete() {
    let executor = RetryExecutor::new(
        RetryPolicy::transient(2).with_backoff(Backoff::Fixed {
            delay: Duration::from_millis(1),
        }),
    );
    let attempts = AtomicU32::new(0);

    let result: Result<(), AcquisitionError> = executor
        .execute_logged("probe", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(bad_gateway()) }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        result,
        Err(AcquisitionError::RetriesExhausted { attempts: 3, .. })
    ));
}

// =============================================================================
// Classification: Totality and Determinism
// =============================================================================

#[test]
fn when_same_error_is_classified_twice_the_kind_is_identical() {
    let errors = [
        timeout(),
        bad_gateway(),
        AcquisitionError::from(HttpError::other("tls handshake rejected")),
        AcquisitionError::AuthRefreshFailed {
            status: Some(400),
            body: String::from("invalid_grant"),
        },
        AcquisitionError::RetriesExhausted {
            attempts: 6,
            source: Box::new(timeout()),
        },
    ];
    let expected = [
        FaultKind::SoftTransient,
        FaultKind::SoftTransient,
        FaultKind::HardOther,
        FaultKind::HardAuth,
        FaultKind::HardOther,
    ];

    for (error, kind) in errors.iter().zip(expected) {
        assert_eq!(classify(error), kind, "{error}");
        assert_eq!(classify(error), classify(error));
    }
}

// =============================================================================
// Retry: Through a Device Client
// =============================================================================

#[tokio::test]
async fn when_gateway_flaps_the_call_is_retried_until_it_answers() {
    // Given: A meters endpoint failing with a 504 and a refused connection first
    let http = Arc::new(
        ScriptedHttpClient::new()
            .on(
                "/api/meters/aggregates",
                vec![
                    Ok(HttpResponse::new(504, "Gateway Timeout")),
                    Err(HttpError::connect("connection refused")),
                    Ok(HttpResponse::ok_json(support::meters_payload().to_string())),
                ],
            )
            .on_json("/api/operation", support::operation_payload())
            .on_json("/api/system_status/soe", support::soe_payload())
            .on_json("/api/system_status/grid_status", serde_json::json!({"grid_status": "SystemGridConnected"})),
    );
    let client = LocalGatewayClient::new(http.clone(), support::GATEWAY).anonymous();

    // When: The summary is fetched
    let reading = client
        .fetch_energy_summary(&Credentials::anonymous())
        .await
        .expect("recovers");

    // Then: Three meter requests were made and the reading is complete
    assert_eq!(http.count("/api/meters/aggregates"), 3);
    assert!(matches!(reading, RawDeviceReading::Local(_)));
}

#[tokio::test]
async fn when_gateway_never_recovers_the_budget_bounds_the_attempts() {
    let http = Arc::new(ScriptedHttpClient::new().on(
        "/api/meters/aggregates",
        vec![Ok(HttpResponse::new(502, "Bad Gateway"))],
    ));
    let client = LocalGatewayClient::new(http.clone(), support::GATEWAY)
        .anonymous()
        .with_retry_policy(RetryPolicy::transient(3));

    let error = client
        .fetch_energy_summary(&Credentials::anonymous())
        .await
        .expect_err("exhausted");

    assert_eq!(http.count("/api/meters/aggregates"), 4);
    assert!(matches!(error, AcquisitionError::RetriesExhausted { attempts: 4, .. }));
}
