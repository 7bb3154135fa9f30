//! Version validation (optimistic concurrency) conformance tests.

use std::future::Future;

use super::{make_report, seed_report, TestResult};
use crate::{ReportStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "update_returns_next_version",
            update_returns_next_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "versions_increment_sequentially",
            versions_increment_sequentially(factory).await,
        ),
        TestResult::from_result(
            "version",
            "wrong_version_returns_conflict",
            wrong_version_returns_conflict(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_snapshot_conflicts_at_commit",
            stale_snapshot_conflicts_at_commit(factory).await,
        ),
        TestResult::from_result(
            "version",
            "failed_commit_applies_nothing",
            failed_commit_applies_nothing(factory).await,
        ),
    ]
}

async fn update_returns_next_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    // The record's own version field is ignored; the store assigns it.
    let mut record = make_report("r1", "assigned");
    record.version = 42;
    let new_version = s
        .update_report(&mut snap, record, 1)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_report("r1").await.map_err(|e| e.to_string())?;
    if new_version != 2 || stored.version != 2 {
        return Err(format!(
            "expected version 2, update returned {new_version}, stored {}",
            stored.version
        ));
    }
    Ok(())
}

async fn versions_increment_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    for (expected, status) in [(1, "assigned"), (2, "in_progress"), (3, "awaiting_verification")] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let new_version = s
            .update_report(&mut snap, make_report("r1", status), expected)
            .await
            .map_err(|e| format!("update from {expected}: {e}"))?;
        if new_version != expected + 1 {
            return Err(format!("expected {}, got {new_version}", expected + 1));
        }
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    let stored = s.get_report("r1").await.map_err(|e| e.to_string())?;
    if stored.version != 4 || stored.status != "awaiting_verification" {
        return Err(format!("unexpected final state: {stored:?}"));
    }
    Ok(())
}

async fn wrong_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    for wrong in [0, 2, 7] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let result = s
            .update_report(&mut snap, make_report("r1", "assigned"), wrong)
            .await;
        let _ = s.abort_snapshot(snap).await;
        match result {
            Err(StorageError::ConcurrentConflict {
                report_id,
                expected_version,
            }) if report_id == "r1" && expected_version == wrong => {}
            other => {
                return Err(format!(
                    "expected ConcurrentConflict at version {wrong}, got {other:?}"
                ))
            }
        }
    }
    Ok(())
}

async fn stale_snapshot_conflicts_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_report(&mut first, make_report("r1", "assigned"), 1)
        .await
        .map_err(|e| e.to_string())?;

    // The second snapshot's update may fail immediately or at commit.
    let staged = s.update_report(&mut second, make_report("r1", "closed"), 1).await;
    s.commit_snapshot(first).await.map_err(|e| e.to_string())?;
    let result = match staged {
        Ok(_) => s.commit_snapshot(second).await,
        Err(e) => {
            let _ = s.abort_snapshot(second).await;
            Err(e)
        }
    };
    if !matches!(result, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!("expected ConcurrentConflict, got {result:?}"));
    }

    let stored = s.get_report("r1").await.map_err(|e| e.to_string())?;
    if stored.status != "assigned" || stored.version != 2 {
        return Err(format!("loser's write leaked: {stored:?}"));
    }
    Ok(())
}

async fn failed_commit_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;
    seed_report(&s, make_report("r2", "submitted")).await?;

    let mut stale = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_report(&mut stale, make_report("r2", "assigned"), 1)
        .await
        .map_err(|e| e.to_string())?;
    let r1_staged = s.update_report(&mut stale, make_report("r1", "assigned"), 1).await;

    // Move r1 forward underneath the stale snapshot.
    let mut winner = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_report(&mut winner, make_report("r1", "closed"), 1)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(winner).await.map_err(|e| e.to_string())?;

    if r1_staged.is_ok() && s.commit_snapshot(stale).await.is_ok() {
        return Err("stale multi-report snapshot committed".into());
    }

    let r2 = s.get_report("r2").await.map_err(|e| e.to_string())?;
    if r2.status != "submitted" || r2.version != 1 {
        return Err(format!("partial commit: r2 changed to {r2:?}"));
    }
    Ok(())
}
