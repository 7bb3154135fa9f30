//! Integration tests for the `civic serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with an
//! empty in-memory store, makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so separate test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Kills the server when the test ends, pass or fail.
struct Server {
    child: Child,
    port: u16,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

/// Start `civic serve` with default config and the given extra env vars.
fn start_server(env: &[(&str, &str)]) -> Server {
    let port = next_port();
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_civic"));
    cmd.arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--config")
        .arg("/nonexistent/civic.toml");
    cmd.env_remove("CIVIC_API_KEY").env_remove("CIVIC_RATE_LIMIT");
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd.spawn().expect("failed to start civic serve");
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server { child, port }
}

/// Make an HTTP request and return (status, parsed JSON body).
fn request(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&Value>,
) -> (u16, Value) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    if body.is_some() {
        header_lines.push_str("Content-Type: application/json\r\n");
    }

    let raw = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        port,
        header_lines,
        payload.len(),
        payload
    );
    std::io::Write::write_all(&mut stream, raw.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    let (status, body) = parse_http_response(&response);
    let json = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, json)
}

fn as_actor<'a>(id: &'a str, role: &'a str) -> [(&'a str, &'a str); 2] {
    [("x-actor-id", id), ("x-actor-role", role)]
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status = headers
        .lines()
        .next()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };
    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = (chunk_start + size).min(remaining.len());
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }
    result
}

/// File a report as `citizen-1` and return its JSON.
fn create_report(port: u16) -> Value {
    let (status, report) = request(
        port,
        "POST",
        "/reports",
        &as_actor("citizen-1", "reporter"),
        Some(&json!({
            "description": "fallen tree blocking the cycle path",
            "photos_before": [{"url": "https://cdn/tree.jpg", "thumbnailUrl": null, "fileId": "f1"}],
        })),
    );
    assert_eq!(status, 201, "create failed: {}", report);
    report
}

fn transition(port: u16, id: &str, actor: [(&str, &str); 2], body: Value) -> (u16, Value) {
    request(
        port,
        "POST",
        &format!("/reports/{}/transitions", id),
        &actor,
        Some(&body),
    )
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn health_returns_200_with_registry_version() {
    let server = start_server(&[]);
    let (status, body) = request(server.port, "GET", "/health", &[], None);
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["registry_version"], 1);
}

#[test]
fn unknown_route_returns_404() {
    let server = start_server(&[]);
    let (status, body) = request(server.port, "GET", "/nope", &[], None);
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");
}

#[test]
fn create_report_starts_submitted() {
    let server = start_server(&[]);
    let report = create_report(server.port);
    assert_eq!(report["status"], "submitted");
    assert_eq!(report["version"], 1);
    assert_eq!(report["reporter_id"], "citizen-1");
    assert_eq!(report["photos_before"], json!(["https://cdn/tree.jpg"]));

    let id = report["id"].as_str().unwrap();
    let (status, fetched) = request(server.port, "GET", &format!("/reports/{}", id), &[], None);
    assert_eq!(status, 200);
    assert_eq!(fetched, report);
}

#[test]
fn missing_actor_headers_are_rejected() {
    let server = start_server(&[]);
    let (status, body) = request(
        server.port,
        "POST",
        "/reports",
        &[],
        Some(&json!({"description": "graffiti"})),
    );
    assert_eq!(status, 401);
    assert!(body["error"].as_str().unwrap().contains("x-actor-id"));

    let (status, _) = request(
        server.port,
        "POST",
        "/reports",
        &as_actor("someone", "mayor"),
        Some(&json!({"description": "graffiti"})),
    );
    assert_eq!(status, 400);
}

#[test]
fn lifecycle_over_http() {
    let server = start_server(&[]);
    let port = server.port;
    let report = create_report(port);
    let id = report["id"].as_str().unwrap().to_string();

    // Officers cannot skip assignment.
    let (status, body) = transition(port, &id, as_actor("o1", "officer"), json!({"status": "in_progress"}));
    assert_eq!(status, 422);
    assert_eq!(body["kind"], "InvalidTransition");

    let (status, body) = transition(
        port,
        &id,
        as_actor("admin-1", "admin"),
        json!({"status": "assigned", "expected_version": 1, "assigned_officer_ids": ["o1"]}),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["version"], 2);

    let (status, body) = request(
        port,
        "GET",
        &format!("/reports/{}/transitions", id),
        &as_actor("o1", "officer"),
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(body["allowed"], json!(["in_progress"]));

    let (status, _) = transition(port, &id, as_actor("o2", "officer"), json!({"status": "in_progress"}));
    assert_eq!(status, 403);

    // Starting work cannot carry a reassignment.
    let (status, body) = transition(
        port,
        &id,
        as_actor("o1", "officer"),
        json!({"status": "in_progress", "assigned_officer_ids": ["o9"]}),
    );
    assert_eq!(status, 422);
    assert_eq!(body["kind"], "PreconditionFailed");

    let (status, _) = transition(port, &id, as_actor("o1", "officer"), json!({"status": "in_progress"}));
    assert_eq!(status, 200);

    let (status, body) = transition(
        port,
        &id,
        as_actor("o1", "officer"),
        json!({"status": "awaiting_verification"}),
    );
    assert_eq!(status, 422);
    assert_eq!(body["kind"], "PreconditionFailed");

    let (status, body) = transition(
        port,
        &id,
        as_actor("o1", "officer"),
        json!({"status": "awaiting_verification", "photos_after": ["https://cdn/cleared.jpg"]}),
    );
    assert_eq!(status, 200);
    assert_eq!(body["version"], 4);

    // Stale version.
    let (status, body) = transition(
        port,
        &id,
        as_actor("admin-1", "admin"),
        json!({"status": "verified", "expected_version": 3}),
    );
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "VersionConflict");

    let (status, _) = transition(port, &id, as_actor("admin-1", "admin"), json!({"status": "verified"}));
    assert_eq!(status, 200);
    let (status, body) = transition(port, &id, as_actor("admin-1", "admin"), json!({"status": "closed"}));
    assert_eq!(status, 200);
    assert_eq!(body["status"], "closed");

    let (status, audit) = request(
        port,
        "GET",
        &format!("/audit?report_id={}&limit=50", id),
        &[],
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(audit["total"], 6);
    assert_eq!(audit["entries"][0]["action"], "status_changed");
    assert_eq!(audit["entries"][0]["diff"]["status"]["after"], "closed");
    assert_eq!(audit["entries"][5]["action"], "created");
}

#[test]
fn notifications_are_listed_and_marked_read() {
    let server = start_server(&[]);
    let port = server.port;
    let report = create_report(port);
    let id = report["id"].as_str().unwrap().to_string();
    transition(port, &id, as_actor("admin-1", "admin"), json!({"status": "assigned", "assigned_officer_ids": ["o1"]}));
    transition(port, &id, as_actor("admin-1", "admin"), json!({"status": "closed"}));

    let citizen = as_actor("citizen-1", "reporter");
    let (status, body) = request(port, "GET", "/notifications", &citizen, None);
    assert_eq!(status, 200);
    let notes = body["notifications"].as_array().unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0]["type"], "report.closed");
    assert_eq!(notes[0]["message"], "Your report was closed by an administrator");
    assert_eq!(notes[1]["type"], "report.assigned");

    let (_, count) = request(port, "GET", "/notifications/unread-count", &citizen, None);
    assert_eq!(count["unread"], 2);

    // Someone else's ids are ignored.
    let first_id = notes[0]["id"].clone();
    let (_, body) = request(
        port,
        "POST",
        "/notifications/read",
        &as_actor("citizen-2", "reporter"),
        Some(&json!({"ids": [first_id]})),
    );
    assert_eq!(body["updated"], 0);

    let (_, body) = request(port, "POST", "/notifications/read", &citizen, Some(&json!({"ids": [first_id]})));
    assert_eq!(body["updated"], 1);

    let (_, body) = request(port, "POST", "/notifications/read-all", &citizen, Some(&json!({})));
    assert_eq!(body["updated"], 1);

    let (_, count) = request(port, "GET", "/notifications/unread-count", &citizen, None);
    assert_eq!(count["unread"], 0);
}

#[test]
fn bulk_reports_per_item_outcomes() {
    let server = start_server(&[]);
    let port = server.port;
    let a = create_report(port)["id"].as_str().unwrap().to_string();
    let b = create_report(port)["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        port,
        "POST",
        "/reports/bulk",
        &as_actor("admin-1", "admin"),
        Some(&json!({"ids": [a, "missing", b], "status": "assigned"})),
    );
    assert_eq!(status, 200);
    assert_eq!(body["updated"], json!([a, b]));
    assert_eq!(body["failed"][0]["id"], "missing");
    assert_eq!(body["failed"][0]["reason"], "NotFound");
}

#[test]
fn delete_hides_report_until_restored() {
    let server = start_server(&[]);
    let port = server.port;
    let id = create_report(port)["id"].as_str().unwrap().to_string();

    let (status, _) = transition(port, &id, as_actor("root", "superadmin"), json!({"status": "deleted"}));
    assert_eq!(status, 200);
    let (_, listed) = request(port, "GET", "/reports", &[], None);
    assert_eq!(listed["reports"].as_array().unwrap().len(), 0);
    let (_, deleted) = request(port, "GET", "/reports?status=deleted", &[], None);
    assert_eq!(deleted["reports"].as_array().unwrap().len(), 1);

    let restore_path = format!("/reports/{}/restore", id);
    let (status, _) = request(port, "POST", &restore_path, &as_actor("admin-1", "admin"), None);
    assert_eq!(status, 403);
    let (status, body) = request(port, "POST", &restore_path, &as_actor("root", "superadmin"), None);
    assert_eq!(status, 200);
    assert_eq!(body["status"], "submitted");

    let (_, listed) = request(port, "GET", "/reports", &[], None);
    assert_eq!(listed["reports"].as_array().unwrap().len(), 1);
}

#[test]
fn unknown_report_returns_404() {
    let server = start_server(&[]);
    let (status, body) = request(server.port, "GET", "/reports/does-not-exist", &[], None);
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "NotFound");
}

#[test]
fn notification_registry_is_published() {
    let server = start_server(&[]);
    let (status, body) = request(server.port, "GET", "/notification-types", &[], None);
    assert_eq!(status, 200);
    assert_eq!(body["version"], 1);
    let types: Vec<&str> = body["types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        types,
        vec![
            "report.assigned",
            "report.misrouted",
            "report.awaiting_verification",
            "report.verified",
            "report.closed",
        ]
    );
}

#[test]
fn dead_letters_are_admin_only() {
    let server = start_server(&[]);
    let (status, _) = request(
        server.port,
        "GET",
        "/dead-letters",
        &as_actor("citizen-1", "reporter"),
        None,
    );
    assert_eq!(status, 403);

    let (status, body) = request(
        server.port,
        "GET",
        "/dead-letters",
        &as_actor("admin-1", "admin"),
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(body["dead_letters"], json!([]));

    let (status, body) = request(
        server.port,
        "POST",
        "/dead-letters/redeliver",
        &as_actor("admin-1", "admin"),
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(body["redelivered"], json!([]));
}

#[test]
fn api_key_guards_everything_but_health() {
    let server = start_server(&[("CIVIC_API_KEY", "s3cret")]);
    let port = server.port;

    let (status, _) = request(port, "GET", "/health", &[], None);
    assert_eq!(status, 200);

    let (status, _) = request(port, "GET", "/reports", &[], None);
    assert_eq!(status, 401);

    let (status, _) = request(port, "GET", "/reports", &[("x-api-key", "wrong")], None);
    assert_eq!(status, 403);

    let (status, _) = request(port, "GET", "/reports", &[("authorization", "Bearer s3cret")], None);
    assert_eq!(status, 200);
}

#[test]
fn rate_limit_returns_429() {
    let server = start_server(&[("CIVIC_RATE_LIMIT", "2")]);
    let port = server.port;
    // The readiness probe does not send a request, so the budget is intact.
    assert_eq!(request(port, "GET", "/health", &[], None).0, 200);
    assert_eq!(request(port, "GET", "/health", &[], None).0, 200);
    let (status, body) = request(port, "GET", "/health", &[], None);
    assert_eq!(status, 429);
    assert!(body["retry_after"].is_number());
}
