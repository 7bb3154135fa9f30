//! Audit, notification and dead-letter conformance tests.

use std::future::Future;

use super::{at_minute, make_audit, make_dead_letter, make_notification, TestResult, T0};
use crate::{AuditQuery, ReportStorage, StorageError};

pub(super) async fn run_record_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "records",
            "audit_newest_first_with_sequence_tiebreak",
            audit_newest_first_with_sequence_tiebreak(factory).await,
        ),
        TestResult::from_result(
            "records",
            "audit_filters_and_paginates",
            audit_filters_and_paginates(factory).await,
        ),
        TestResult::from_result(
            "records",
            "audit_page_beyond_range_is_empty",
            audit_page_beyond_range_is_empty(factory).await,
        ),
        TestResult::from_result(
            "records",
            "notification_insert_is_idempotent",
            notification_insert_is_idempotent(factory).await,
        ),
        TestResult::from_result(
            "records",
            "read_state_and_unread_count",
            read_state_and_unread_count(factory).await,
        ),
        TestResult::from_result(
            "records",
            "mark_all_read_respects_cutoff",
            mark_all_read_respects_cutoff(factory).await,
        ),
        TestResult::from_result(
            "records",
            "dead_letters_resolve",
            dead_letters_resolve(factory).await,
        ),
    ]
}

async fn audit_newest_first_with_sequence_tiebreak<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let first = s
        .append_audit(&mut snap, make_audit("a1", "r1", T0))
        .await
        .map_err(|e| e.to_string())?;
    let second = s
        .append_audit(&mut snap, make_audit("a2", "r1", T0))
        .await
        .map_err(|e| e.to_string())?;
    s.append_audit(&mut snap, make_audit("a0", "r1", at_minute(-5)))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if second.sequence <= first.sequence {
        return Err(format!(
            "sequence not monotonic: {} then {}",
            first.sequence, second.sequence
        ));
    }
    let page = s
        .query_audit(&AuditQuery::default())
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = page.entries.iter().map(|e| e.id.as_str()).collect();
    if ids != ["a2", "a1", "a0"] {
        return Err(format!("expected [a2, a1, a0], got {ids:?}"));
    }
    Ok(())
}

async fn audit_filters_and_paginates<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for minute in 0..5 {
        s.append_audit(
            &mut snap,
            make_audit(&format!("r1-{minute}"), "r1", at_minute(minute)),
        )
        .await
        .map_err(|e| e.to_string())?;
    }
    s.append_audit(&mut snap, make_audit("r2-0", "r2", at_minute(10)))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let page = s
        .query_audit(&AuditQuery {
            report_id: Some("r1".into()),
            page: 2,
            limit: 2,
            ..AuditQuery::default()
        })
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = page.entries.iter().map(|e| e.id.as_str()).collect();
    if page.total != 5 || ids != ["r1-2", "r1-1"] {
        return Err(format!("page 2 of r1: total {} entries {ids:?}", page.total));
    }
    Ok(())
}

async fn audit_page_beyond_range_is_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for minute in 0..3 {
        s.append_audit(&mut snap, make_audit(&format!("a{minute}"), "r1", at_minute(minute)))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    for (page, limit) in [(4, 1), (usize::MAX, 100), (usize::MAX, usize::MAX)] {
        let result = s
            .query_audit(&AuditQuery {
                page,
                limit,
                ..AuditQuery::default()
            })
            .await
            .map_err(|e| e.to_string())?;
        if result.total != 3 || !result.entries.is_empty() {
            return Err(format!(
                "page {page} limit {limit}: total {} with {} entries",
                result.total,
                result.entries.len()
            ));
        }
    }
    Ok(())
}

async fn notification_insert_is_idempotent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_notification(&mut snap, make_notification("n1", "citizen-1", "a1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    // Same key, new id: the original record comes back and nothing is added.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let again = s
        .insert_notification(&mut snap, make_notification("n2", "citizen-1", "a1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if again.id != "n1" {
        return Err(format!("expected existing n1, got {}", again.id));
    }

    // A different audit entry is a different event.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_notification(&mut snap, make_notification("n3", "citizen-1", "a2"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let listed = s
        .list_notifications("citizen-1", false)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = listed.iter().map(|n| n.id.as_str()).collect();
    if ids != ["n3", "n1"] {
        return Err(format!("expected [n3, n1], got {ids:?}"));
    }
    Ok(())
}

async fn read_state_and_unread_count<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for (id, audit) in [("n1", "a1"), ("n2", "a2"), ("n3", "a3")] {
        s.insert_notification(&mut snap, make_notification(id, "citizen-1", audit))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.insert_notification(&mut snap, make_notification("other", "citizen-2", "a1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let ids = vec!["n1".to_string(), "n2".to_string(), "ghost".to_string()];
    let updated = s
        .mark_notifications_read(&ids, at_minute(1))
        .await
        .map_err(|e| e.to_string())?;
    if updated != 2 {
        return Err(format!("expected 2 marked read, got {updated}"));
    }
    // Already-read notifications are not counted again.
    let again = s
        .mark_notifications_read(&ids, at_minute(2))
        .await
        .map_err(|e| e.to_string())?;
    if again != 0 {
        return Err(format!("re-marking counted {again}"));
    }

    let unread = s.unread_count("citizen-1").await.map_err(|e| e.to_string())?;
    let other = s.unread_count("citizen-2").await.map_err(|e| e.to_string())?;
    let unread_list = s
        .list_notifications("citizen-1", true)
        .await
        .map_err(|e| e.to_string())?;
    if unread != 1 || other != 1 || unread_list.len() != 1 || unread_list[0].id != "n3" {
        return Err(format!(
            "unexpected read state: unread {unread}, other {other}, list {unread_list:?}"
        ));
    }
    Ok(())
}

async fn mark_all_read_respects_cutoff<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for minute in 0..3 {
        let mut n = make_notification(&format!("n{minute}"), "citizen-1", &format!("a{minute}"));
        n.created_at = at_minute(minute);
        s.insert_notification(&mut snap, n)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let updated = s
        .mark_all_read("citizen-1", Some(at_minute(1)), at_minute(5))
        .await
        .map_err(|e| e.to_string())?;
    if updated != 2 {
        return Err(format!("expected 2 at or before the cutoff, got {updated}"));
    }
    let rest = s
        .mark_all_read("citizen-1", None, at_minute(6))
        .await
        .map_err(|e| e.to_string())?;
    if rest != 1 {
        return Err(format!("expected 1 remaining, got {rest}"));
    }
    Ok(())
}

async fn dead_letters_resolve<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_dead_letter(&mut snap, make_dead_letter("d1"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_dead_letter(&mut snap, make_dead_letter("d2"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    s.resolve_dead_letter("d1", at_minute(1))
        .await
        .map_err(|e| e.to_string())?;

    let pending = s.list_dead_letters(true).await.map_err(|e| e.to_string())?;
    let all = s.list_dead_letters(false).await.map_err(|e| e.to_string())?;
    if pending.len() != 1 || pending[0].id != "d2" || all.len() != 2 {
        return Err(format!("pending {pending:?}, all {all:?}"));
    }

    match s.resolve_dead_letter("ghost", at_minute(2)).await {
        Err(StorageError::DeadLetterNotFound { id }) if id == "ghost" => Ok(()),
        other => Err(format!("expected DeadLetterNotFound, got {other:?}")),
    }
}
