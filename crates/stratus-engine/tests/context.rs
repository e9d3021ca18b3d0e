use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use stratus_engine::{HandlerError, OpContext, WaitPolicy, wait_for};
use tokio_util::sync::CancellationToken;

fn policy(timeout_ms: u64, interval_ms: u64) -> WaitPolicy {
    WaitPolicy {
        timeout: Duration::from_millis(timeout_ms),
        interval: Duration::from_millis(interval_ms),
    }
}

#[tokio::test]
async fn run_passes_through_result() {
    let ctx = OpContext::new();
    let value = ctx.run(async { Ok::<_, HandlerError>(7) }).await.unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn run_reports_cancellation_first() {
    let token = CancellationToken::new();
    token.cancel();
    let ctx = OpContext::new().with_cancellation(token);

    let err = ctx.run(async { Ok::<_, HandlerError>(()) }).await.unwrap_err();
    assert!(matches!(err, HandlerError::Cancelled));
}

#[tokio::test]
async fn run_stops_at_deadline() {
    let ctx = OpContext::new().with_timeout(Duration::from_millis(20));
    let err = ctx
        .run(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, HandlerError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::Timeout { .. }));
}

#[tokio::test]
async fn wait_for_returns_once_poll_is_ready() {
    let ctx = OpContext::new().with_wait_policy(policy(1_000, 1));
    let polls = Arc::new(AtomicU32::new(0));

    let counter = polls.clone();
    let value = wait_for(&ctx, "queue available", move || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, HandlerError>((n >= 3).then_some("arn:queue"))
        }
    })
    .await
    .unwrap();

    assert_eq!(value, "arn:queue");
    assert_eq!(polls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn wait_for_times_out_with_what_it_waited_for() {
    let ctx = OpContext::new().with_wait_policy(policy(30, 10));

    let err = wait_for(&ctx, "instance running", || async {
        Ok::<Option<()>, HandlerError>(None)
    })
    .await
    .unwrap_err();

    match err {
        HandlerError::Timeout { what, .. } => assert_eq!(what, "instance running"),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn wait_for_propagates_poll_errors() {
    let ctx = OpContext::new().with_wait_policy(policy(1_000, 1));

    let err = wait_for(&ctx, "bucket", || async {
        Err::<Option<()>, _>(HandlerError::NotFound("bucket".into()))
    })
    .await
    .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn wait_for_stops_when_cancelled_between_polls() {
    let token = CancellationToken::new();
    let ctx = OpContext::new()
        .with_cancellation(token.clone())
        .with_wait_policy(policy(10_000, 1_000));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = wait_for(&ctx, "trail", || async { Ok::<Option<()>, HandlerError>(None) })
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::Cancelled));
}
