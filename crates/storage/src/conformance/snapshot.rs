//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted writes are discarded.

use std::future::Future;

use super::{make_audit, make_report, seed_report, TestResult, T0};
use crate::{AuditQuery, ReportFilter, ReportStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_insert_invisible",
            uncommitted_insert_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "committed_insert_visible",
            committed_insert_visible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_writes_discarded",
            aborted_writes_discarded(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "snapshot_reads_its_own_writes",
            snapshot_reads_its_own_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "report_and_audit_commit_together",
            report_and_audit_commit_together(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "duplicate_insert_rejected",
            duplicate_insert_rejected(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "missing_report_not_found",
            missing_report_not_found(factory).await,
        ),
    ]
}

async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_report(&mut snap, make_report("r1", "submitted"))
        .await
        .map_err(|e| e.to_string())?;

    if s.get_report("r1").await.is_ok() {
        return Err("staged insert visible to get_report before commit".into());
    }
    let listed = s
        .list_reports(&ReportFilter::default())
        .await
        .map_err(|e| e.to_string())?;
    if !listed.is_empty() {
        return Err(format!("staged insert visible to list_reports: {listed:?}"));
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn committed_insert_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;
    let stored = s.get_report("r1").await.map_err(|e| e.to_string())?;
    if stored.status != "submitted" || stored.version != 1 {
        return Err(format!(
            "expected submitted at version 1, got {} at {}",
            stored.status, stored.version
        ));
    }
    Ok(())
}

async fn aborted_writes_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_report(&mut snap, make_report("r1", "assigned"), 1)
        .await
        .map_err(|e| e.to_string())?;
    s.append_audit(&mut snap, make_audit("a1", "r1", T0))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_report("r1").await.map_err(|e| e.to_string())?;
    if stored.status != "submitted" || stored.version != 1 {
        return Err(format!("aborted update leaked: {stored:?}"));
    }
    let page = s
        .query_audit(&AuditQuery::default())
        .await
        .map_err(|e| e.to_string())?;
    if page.total != 0 {
        return Err(format!("aborted audit entry leaked: {:?}", page.entries));
    }
    Ok(())
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_report(&mut snap, make_report("r1", "assigned"), 1)
        .await
        .map_err(|e| e.to_string())?;
    let seen = s
        .get_report_for_update(&mut snap, "r1")
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if seen.status != "assigned" || seen.version != 2 {
        return Err(format!(
            "snapshot should see its staged update, got {} at {}",
            seen.status, seen.version
        ));
    }
    Ok(())
}

async fn report_and_audit_commit_together<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_report(&mut snap, make_report("r1", "submitted"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_audit(&mut snap, make_audit("a1", "r1", T0))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    s.get_report("r1").await.map_err(|e| e.to_string())?;
    let page = s
        .query_audit(&AuditQuery {
            report_id: Some("r1".into()),
            ..AuditQuery::default()
        })
        .await
        .map_err(|e| e.to_string())?;
    if page.total != 1 || page.entries[0].id != "a1" {
        return Err(format!("expected one audit entry a1, got {:?}", page.entries));
    }
    Ok(())
}

async fn duplicate_insert_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_report(&s, make_report("r1", "submitted")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let inserted = s
        .insert_report(&mut snap, make_report("r1", "submitted"))
        .await;
    // Backends may detect the duplicate at insert or at commit.
    let result = match inserted {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::AlreadyExists { id }) if id == "r1" => Ok(()),
        other => Err(format!("expected AlreadyExists for r1, got {other:?}")),
    }
}

async fn missing_report_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_report("ghost").await {
        Err(StorageError::ReportNotFound { report_id }) if report_id == "ghost" => {}
        other => return Err(format!("expected ReportNotFound, got {other:?}")),
    }
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.update_report(&mut snap, make_report("ghost", "assigned"), 1).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ReportNotFound { .. }) => Ok(()),
        other => Err(format!("expected ReportNotFound on update, got {other:?}")),
    }
}
