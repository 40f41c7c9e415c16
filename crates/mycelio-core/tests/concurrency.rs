//! Races between concurrent transitions

mod common;

use std::sync::Arc;

use common::Harness;
use futures::future::join_all;
use mycelio_core::{AutoSettler, EscrowError, TimeoutReclaimer};
use mycelio_types::TaskStatus;
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_worker_wins_a_claim_race() {
    let h = Harness::new();
    let publisher = h.agent().await;
    let task = h.publish(publisher, 30).await;

    let mut workers = Vec::new();
    for _ in 0..8 {
        workers.push(h.agent().await);
    }

    let handles = workers.iter().map(|&worker| {
        let engine = Arc::clone(&h.engine);
        let task_id = task.task_id;
        tokio::spawn(async move { (worker, engine.claim(worker, task_id).await) })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let winners: Vec<_> = results.iter().filter(|(_, r)| r.is_ok()).collect();
    assert_eq!(winners.len(), 1);
    for (_, result) in results.iter().filter(|(_, r)| r.is_err()) {
        assert!(matches!(result, Err(EscrowError::TaskAlreadyClaimed { .. })));
    }

    let stored = h.engine.get_task(task.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Locked);
    assert_eq!(stored.solver_id, Some(winners[0].0));
    assert_eq!(h.balances(publisher).await, (70, 30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claim_and_cancel_race_has_one_winner() {
    let h = Harness::new();
    let publisher = h.agent().await;
    let worker = h.agent().await;

    for _ in 0..5 {
        let task = h.publish(publisher, 10).await;
        let claim = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.claim(worker, task.task_id).await })
        };
        let cancel = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.cancel(publisher, task.task_id).await })
        };
        let (claimed, cancelled) = (claim.await.unwrap(), cancel.await.unwrap());

        match (claimed, cancelled) {
            (Ok(_), Err(EscrowError::TaskNotCancelable { .. })) => {
                let stored = h.engine.get_task(task.task_id).await.unwrap();
                assert_eq!(stored.status, TaskStatus::Locked);
            }
            (Err(EscrowError::TaskAlreadyClaimed { .. }), Ok(_)) => {
                let stored = h.engine.get_task(task.task_id).await.unwrap();
                assert_eq!(stored.status, TaskStatus::Cancelled);
            }
            other => panic!("both or neither succeeded: {:?}", other),
        }
    }
    h.assert_reconciled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settlements_credit_one_solver() {
    let h = Harness::new();
    let solver = h.agent().await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let publisher = h.agent().await;
        let task = h.publish(publisher, 25).await;
        h.engine.claim(solver, task.task_id).await.unwrap();
        h.engine.submit(solver, task.task_id, json!("done")).await.unwrap();
        tasks.push((publisher, task.task_id));
    }

    let handles = tasks.iter().map(|&(publisher, task_id)| {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.settle(publisher, task_id, true).await })
    });
    for result in join_all(handles).await {
        assert!(!result.unwrap().unwrap().replayed);
    }

    assert_eq!(h.balances(solver).await, (100 + 6 * 25, 0));
    h.assert_reconciled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_never_overdraw() {
    let h = Harness::new();
    let publisher = h.agent().await;

    // Ten attempts of 30 against a balance of 100: at most three fit
    let handles = (0..10).map(|_| {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.publish(publisher, common::publish_request(30)).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let published = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(published, 3);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(EscrowError::InsufficientKarma { .. })));
    }
    assert_eq!(h.balances(publisher).await, (10, 90));
    h.assert_reconciled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_submit_and_reclaim_race_has_one_outcome() {
    let h = Harness::new();
    let publisher = h.agent().await;
    let worker = h.agent().await;
    let reclaimer = TimeoutReclaimer::new(h.engine.clone());

    for _ in 0..5 {
        let task = h.publish(publisher, 10).await;
        h.engine.claim(worker, task.task_id).await.unwrap();
        h.clock.advance(chrono::Duration::minutes(6));

        let submit = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.submit(worker, task.task_id, json!({"v": 1})).await })
        };
        let sweep = {
            let reclaimer = reclaimer.clone();
            tokio::spawn(async move { reclaimer.run_once().await })
        };
        let (submitted, reclaimed) = (submit.await.unwrap(), sweep.await.unwrap().unwrap());

        let stored = h.engine.get_task(task.task_id).await.unwrap();
        match submitted {
            Ok(_) => {
                assert_eq!(reclaimed, 0);
                assert_eq!(stored.status, TaskStatus::Submitted);
                assert_eq!(stored.solver_id, Some(worker));
            }
            Err(err) => {
                assert!(matches!(err, EscrowError::Forbidden), "{err:?}");
                assert_eq!(reclaimed, 1);
                assert_eq!(stored.status, TaskStatus::Open);
                assert_eq!(stored.solver_id, None);
            }
        }
        assert!(stored.solver_consistent());
    }

    // Bounties stay escrowed either way
    assert_eq!(h.balances(publisher).await, (50, 50));
    assert_eq!(h.balances(worker).await, (100, 0));
    h.assert_reconciled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publisher_reject_and_auto_settle_race_settles_once() {
    let h = Harness::new();
    let publisher = h.agent().await;
    let worker = h.agent().await;
    let settler = AutoSettler::new(h.engine.clone());
    let mut completed = 0u64;

    for _ in 0..5 {
        let task = h.publish(publisher, 10).await;
        h.engine.claim(worker, task.task_id).await.unwrap();
        h.engine.submit(worker, task.task_id, json!({"v": 1})).await.unwrap();
        h.clock.advance(chrono::Duration::hours(25));

        let reject = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.settle(publisher, task.task_id, false).await })
        };
        let sweep = {
            let settler = settler.clone();
            tokio::spawn(async move { settler.run_once().await })
        };
        let (rejected, settled) = (reject.await.unwrap(), sweep.await.unwrap().unwrap());

        let stored = h.engine.get_task(task.task_id).await.unwrap();
        match rejected {
            Ok(_) => {
                assert_eq!(settled, 0);
                assert_eq!(stored.status, TaskStatus::Failed);
            }
            Err(err) => {
                assert!(matches!(err, EscrowError::TaskNotSettlable { .. }), "{err:?}");
                assert_eq!(settled, 1);
                assert_eq!(stored.status, TaskStatus::Completed);
                completed += 1;
            }
        }
        assert!(stored.settled_at.is_some());
    }

    assert_eq!(h.balances(publisher).await, (100 - 10 * completed, 0));
    assert_eq!(h.balances(worker).await, (100 + 10 * completed, 0));
    h.assert_reconciled().await;
}
