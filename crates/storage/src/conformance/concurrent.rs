//! Concurrency conformance tests.
//!
//! Racing snapshots are spawned as real tokio tasks against the OCC check.

use std::future::Future;
use std::sync::Arc;

use super::{make_report, seed_report, TestResult};
use crate::{ReportStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_exactly_one_wins",
            concurrent_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_different_reports_all_succeed",
            concurrent_updates_different_reports_all_succeed(factory).await,
        ),
    ]
}

/// N tasks each open a snapshot and update the same report from version 1.
/// Exactly one commit succeeds; the rest get ConcurrentConflict.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_report(storage.as_ref(), make_report("r1", "submitted")).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut record = make_report("r1", "assigned");
            record.assigned_officer_ids = vec![format!("officer-{i}")];
            match s.update_report(&mut snap, record, 1).await {
                Ok(_) => s.commit_snapshot(snap).await,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.map_err(|e| format!("join: {e}"))? {
            Ok(()) => wins += 1,
            Err(StorageError::ConcurrentConflict { .. }) => conflicts += 1,
            Err(e) => return Err(format!("unexpected error: {e}")),
        }
    }
    if wins != 1 || conflicts != N - 1 {
        return Err(format!("expected 1 win and {} conflicts, got {wins} and {conflicts}", N - 1));
    }

    let stored = storage.get_report("r1").await.map_err(|e| e.to_string())?;
    if stored.version != 2 || stored.assigned_officer_ids.len() != 1 {
        return Err(format!("inconsistent final state: {stored:?}"));
    }
    Ok(())
}

async fn concurrent_updates_different_reports_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_report(storage.as_ref(), make_report(&format!("r{i}"), "submitted")).await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.update_report(&mut snap, make_report(&format!("r{i}"), "assigned"), 1)
                .await?;
            s.commit_snapshot(snap).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("update: {e}"))?;
    }

    for i in 0..N {
        let stored = storage
            .get_report(&format!("r{i}"))
            .await
            .map_err(|e| e.to_string())?;
        if stored.version != 2 {
            return Err(format!("r{i} at version {}", stored.version));
        }
    }
    Ok(())
}
