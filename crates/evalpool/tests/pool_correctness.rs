//! End-to-end coverage of the reservation scheduler: FIFO waiting,
//! reservation identity, and the basic evaluation result shapes.

mod support;

use std::time::Duration;

use evalpool::{EvalOutcome, EvalStatus, PoolError, PoolHandle};

/// S1: with two workers, a third `reserve` blocks until a release frees
/// one, and the freed worker is the one handed to the waiter.
#[tokio::test]
async fn third_reserve_blocks_until_release() {
    let pool = PoolHandle::start(support::config_with_workers(2)).await.unwrap();

    let t1 = pool.reserve(None).await.unwrap();
    let _t2 = pool.reserve(None).await.unwrap();

    let pool_clone = pool.clone();
    let waiter = tokio::spawn(async move { pool_clone.reserve(None).await });

    // Give the waiter a chance to actually enqueue before releasing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "third reserve should still be queued");

    pool.release(t1).await.unwrap();

    let t3 = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should resolve once t1 is released")
        .unwrap()
        .unwrap();

    // The freed worker is now reserved under t3; evaluating through it
    // should succeed and t1 itself should no longer be a live reservation.
    pool.eval("return 1;".into(), Some(t3), None).await.unwrap();
    let result = pool.eval("return 1;".into(), Some(t1), None).await;
    assert!(matches!(result, Err(PoolError::InvalidReservation)));
}

/// S2: a successful evaluation reports captured stdout, the return
/// value, an empty last-error, and `continue` status.
#[tokio::test]
async fn eval_echo_and_return() {
    let pool = PoolHandle::start(support::config_with_workers(1)).await.unwrap();
    let outcome = pool.eval_simple("echo 'hi'; return 42;").await.unwrap();
    match outcome {
        EvalOutcome::Ok { stdout, return_value, last_error, status } => {
            assert_eq!(stdout, "hi");
            assert_eq!(return_value, serde_json::json!(42));
            assert_eq!(last_error, "");
            assert_eq!(status, EvalStatus::Continue);
        }
        other => panic!("expected Ok, got {other:?}"),
    }
}

/// S3: unrecognized syntax is a parse error with a nonempty message and
/// `break` status.
#[tokio::test]
async fn eval_bad_syntax_is_parse_error() {
    let pool = PoolHandle::start(support::config_with_workers(1)).await.unwrap();
    let outcome = pool.eval_simple("syntax ][").await.unwrap();
    match outcome {
        EvalOutcome::ParseError { error_text, status } => {
            assert!(!error_text.is_empty());
            assert_eq!(status, EvalStatus::Break);
        }
        other => panic!("expected ParseError, got {other:?}"),
    }
}

/// Releasing an unknown/already-released token is reported, not panicked.
#[tokio::test]
async fn release_of_unknown_token_is_invalid_reservation() {
    let pool = PoolHandle::start(support::config_with_workers(1)).await.unwrap();
    let token = pool.reserve(None).await.unwrap();
    pool.release(token).await.unwrap();
    let result = pool.release(token).await;
    assert!(matches!(result, Err(PoolError::InvalidReservation)));
}

/// An unreserved `eval` that waits longer than the configured checkout
/// timeout gives up with `CheckoutTimeout` rather than waiting forever.
#[tokio::test]
async fn unreserved_eval_gives_up_after_checkout_timeout() {
    let mut config = support::config_with_workers(1);
    config.eval_checkout_timeout = Duration::from_millis(50);
    let pool = PoolHandle::start(config).await.unwrap();

    let _token = pool.reserve(None).await.unwrap();
    let result = pool.eval_simple("return 1;").await;
    assert!(matches!(result, Err(PoolError::CheckoutTimeout)));
}

/// Invariant 6: with N=2 workers, 3 concurrent token-less `eval` calls
/// admit at most 2 concurrent worker activations — the third is queued
/// and only completes after one of the first two releases its worker.
#[tokio::test]
async fn concurrent_evals_respect_worker_count() {
    let pool = PoolHandle::start(support::config_with_workers(2)).await.unwrap();

    let a = pool.clone();
    let b = pool.clone();
    let c = pool.clone();

    let ta = tokio::spawn(async move { a.eval_simple("sleep 200; return 1;").await });
    let tb = tokio::spawn(async move { b.eval_simple("sleep 200; return 2;").await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    let tc = tokio::spawn(async move { c.eval_simple("return 3;").await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!tc.is_finished(), "third eval should be queued behind the two busy workers");

    let (ra, rb, rc) = tokio::join!(ta, tb, tc);
    assert!(matches!(ra.unwrap().unwrap(), EvalOutcome::Ok { .. }));
    assert!(matches!(rb.unwrap().unwrap(), EvalOutcome::Ok { .. }));
    assert!(matches!(rc.unwrap().unwrap(), EvalOutcome::Ok { .. }));
}
