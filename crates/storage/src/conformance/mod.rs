//! Conformance test suite for `ReportStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `ReportStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Snapshot isolation**: uncommitted writes invisible, aborted writes discarded
//! - **Version validation / OCC**: conflict detection at update and at commit
//! - **Records**: audit ordering, notification idempotency and read state,
//!   dead-letter resolution
//! - **Concurrency**: racing snapshots on one report, exactly one wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use civic_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod records;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use time::macros::datetime;
use time::OffsetDateTime;

use crate::record::{AuditRecord, DeadLetterRecord, NotificationRecord, ReportRecord};
use crate::ReportStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "snapshot", "version").
    pub category: String,
    /// Test name (e.g. "uncommitted_insert_invisible").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ReportStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(records::run_record_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

const T0: OffsetDateTime = datetime!(2026-03-01 09:00:00 UTC);

fn at_minute(minute: i64) -> OffsetDateTime {
    T0 + time::Duration::minutes(minute)
}

fn make_report(id: &str, status: &str) -> ReportRecord {
    ReportRecord {
        id: id.to_string(),
        status: status.to_string(),
        reporter_id: "citizen-1".to_string(),
        description: "broken street light".to_string(),
        category_id: None,
        department_id: None,
        assigned_officer_ids: vec![],
        photos_before: vec![],
        photos_after: vec![],
        misroute_reason: None,
        status_before_delete: None,
        version: 1,
        created_at: T0,
        updated_at: T0,
    }
}

fn make_audit(id: &str, report_id: &str, created_at: OffsetDateTime) -> AuditRecord {
    AuditRecord {
        id: id.to_string(),
        sequence: 0,
        report_id: report_id.to_string(),
        actor_id: "admin-1".to_string(),
        actor_role: "admin".to_string(),
        action: "status_changed".to_string(),
        diff: Default::default(),
        created_at,
    }
}

fn make_notification(id: &str, recipient_id: &str, audit_entry_id: &str) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        recipient_id: recipient_id.to_string(),
        notification_type: "report.assigned".to_string(),
        payload: serde_json::json!({"officer_ids": ["o1"]}),
        report_id: "r1".to_string(),
        audit_entry_id: audit_entry_id.to_string(),
        read_at: None,
        created_at: T0,
    }
}

fn make_dead_letter(id: &str) -> DeadLetterRecord {
    DeadLetterRecord {
        id: id.to_string(),
        audit_entry_id: "a1".to_string(),
        report_id: "r1".to_string(),
        recipient_id: "citizen-1".to_string(),
        notification_type: "report.closed".to_string(),
        payload: serde_json::json!({"forced": false}),
        error: "backend unavailable".to_string(),
        attempts: 3,
        created_at: T0,
        resolved_at: None,
    }
}

/// Insert `report` in its own committed snapshot.
async fn seed_report<S: ReportStorage>(s: &S, report: ReportRecord) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_report(&mut snap, report)
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}
