//! Timeout sweeps driven by a manual clock

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use common::Harness;
use mycelio_core::{AutoSettler, EngineConfig, SweepConfig, SweepScheduler, TimeoutReclaimer};
use mycelio_types::{TaskStatus, TxType};
use serde_json::json;

#[tokio::test]
async fn reclaimer_reopens_expired_claims() {
    let h = Harness::new();
    let a = h.agent().await;
    let b = h.agent().await;
    let task = h.publish(a, 30).await;
    h.engine.claim(b, task.task_id).await.unwrap();

    let reclaimer = TimeoutReclaimer::new(h.engine.clone());

    // Deadline not yet passed
    h.clock.advance(Duration::minutes(4));
    assert_eq!(reclaimer.run_once().await.unwrap(), 0);

    h.clock.advance(Duration::minutes(2));
    assert_eq!(reclaimer.run_once().await.unwrap(), 1);

    let stored = h.engine.get_task(task.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Open);
    assert_eq!(stored.solver_id, None);
    assert_eq!(stored.claim_deadline, None);
    assert_eq!(h.balances(a).await, (70, 30));

    // The reopened task can be claimed again
    let c = h.agent().await;
    assert_eq!(
        h.engine.claim(c, task.task_id).await.unwrap().value.solver_id,
        Some(c)
    );
    h.assert_reconciled().await;
}

#[tokio::test]
async fn reclaimer_skips_submitted_tasks() {
    let h = Harness::new();
    let a = h.agent().await;
    let b = h.agent().await;
    let task = h.publish(a, 30).await;
    h.engine.claim(b, task.task_id).await.unwrap();
    h.engine.submit(b, task.task_id, json!(1)).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    assert_eq!(TimeoutReclaimer::new(h.engine.clone()).run_once().await.unwrap(), 0);
    assert!(!h.engine.reclaim_task(task.task_id).await.unwrap());
    assert_eq!(
        h.engine.get_task(task.task_id).await.unwrap().status,
        TaskStatus::Submitted
    );
}

#[tokio::test]
async fn auto_settler_accepts_on_publisher_silence() {
    let h = Harness::new();
    let a = h.agent().await;
    let b = h.agent().await;
    let task = h.publish(a, 30).await;
    h.engine.claim(b, task.task_id).await.unwrap();
    h.engine.submit(b, task.task_id, json!(1)).await.unwrap();

    let settler = AutoSettler::new(h.engine.clone());
    h.clock.advance(Duration::hours(23));
    assert_eq!(settler.run_once().await.unwrap(), 0);

    h.clock.advance(Duration::hours(2));
    assert_eq!(settler.run_once().await.unwrap(), 1);

    let stored = h.engine.get_task(task.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(h.balances(a).await, (70, 0));
    assert_eq!(h.balances(b).await, (130, 0));
    assert_eq!(h.ledger_types(b).await.last(), Some(&(TxType::Transfer, 30)));

    // Nothing left to do
    assert_eq!(settler.run_once().await.unwrap(), 0);
    h.assert_reconciled().await;
}

#[tokio::test]
async fn auto_settle_can_be_disabled() {
    let h = Harness::with_config(EngineConfig {
        auto_settle_enabled: false,
        ..EngineConfig::default()
    });
    let a = h.agent().await;
    let b = h.agent().await;
    let task = h.publish(a, 30).await;
    h.engine.claim(b, task.task_id).await.unwrap();
    h.engine.submit(b, task.task_id, json!(1)).await.unwrap();

    h.clock.advance(Duration::days(3));
    assert_eq!(AutoSettler::new(h.engine.clone()).run_once().await.unwrap(), 0);
    assert_eq!(
        h.engine.get_task(task.task_id).await.unwrap().status,
        TaskStatus::Submitted
    );

    // The publisher can still settle explicitly
    h.engine.settle(a, task.task_id, false).await.unwrap();
    assert_eq!(h.balances(a).await, (100, 0));
}

#[tokio::test]
async fn sweeps_respect_batch_size() {
    let h = Harness::with_config(EngineConfig {
        sweep: SweepConfig {
            batch_size: 2,
            ..SweepConfig::default()
        },
        ..EngineConfig::default()
    });
    let a = h.agent().await;
    let b = h.agent().await;
    for _ in 0..3 {
        let task = h.publish(a, 10).await;
        h.engine.claim(b, task.task_id).await.unwrap();
    }

    h.clock.advance(Duration::minutes(6));
    let reclaimer = TimeoutReclaimer::new(h.engine.clone());
    assert_eq!(reclaimer.run_once().await.unwrap(), 2);
    assert_eq!(reclaimer.run_once().await.unwrap(), 1);
    assert_eq!(reclaimer.run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn scheduler_runs_and_stops() {
    let h = Harness::with_config(EngineConfig {
        sweep: SweepConfig {
            reclaim_interval: StdDuration::from_millis(10),
            ..SweepConfig::default()
        },
        ..EngineConfig::default()
    });
    let a = h.agent().await;
    let b = h.agent().await;
    let task = h.publish(a, 30).await;
    h.engine.claim(b, task.task_id).await.unwrap();
    h.clock.advance(Duration::minutes(6));

    let handle = SweepScheduler::new(h.engine.clone()).start();
    let mut reopened = false;
    for _ in 0..100 {
        if h.engine.get_task(task.task_id).await.unwrap().status == TaskStatus::Open {
            reopened = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    handle.shutdown().await;
    assert!(reopened);
}
