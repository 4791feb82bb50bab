//! HTTP surface tests - trigger auth, admin license routes, credentials, login checks

use std::net::SocketAddr;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::*;

fn app(ctx: &TestContext) -> Router {
    coursegate::app(ctx.state.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "198.51.100.20");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.20");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// A request with no proxy headers, as seen directly from socket `peer`.
fn post_from_peer(uri: &str, peer: [u8; 4], token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .extension(ConnectInfo(SocketAddr::from((peer, 40000))));
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let ctx = TestContext::new();
    let (status, body) = send(app(&ctx), get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ============ Scan trigger ============

#[tokio::test]
async fn scan_trigger_rejects_missing_secret() {
    let ctx = TestContext::new();
    let (status, body) = send(app(&ctx), post("/internal/license-scan", None, json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn scan_trigger_rejects_wrong_secret() {
    let ctx = TestContext::new();
    let (status, _) = send(
        app(&ctx),
        post("/internal/license-scan", Some("not-the-secret"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scan_trigger_runs_with_secret() {
    let ctx = TestContext::new();
    seed_license(&ctx, "Acme", LicenseStatus::Active, chrono::Utc::now() - days(3), 0);

    let (status, body) = send(
        app(&ctx),
        post("/internal/license-scan", Some(SCHEDULER_SECRET), json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checked"], 1);
    assert_eq!(body["suspended"], 1);
    assert_eq!(ctx.notifier.suspension_count(), 1);
}

#[tokio::test]
async fn scan_trigger_throttles_secret_guessing() {
    let ctx = TestContext::new();

    for _ in 0..5 {
        let (status, _) = send(
            app(&ctx),
            post("/internal/license-scan", Some("guess"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let response = app(&ctx)
        .oneshot(post("/internal/license-scan", Some(SCHEDULER_SECRET), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn secret_guessing_locks_out_only_the_guessing_peer() {
    let ctx = TestContext::new();
    let attacker = [10, 0, 0, 1];

    for _ in 0..5 {
        let (status, _) = send(
            app(&ctx),
            post_from_peer("/internal/license-scan", attacker, Some("guess"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = send(
        app(&ctx),
        post_from_peer("/internal/license-scan", attacker, Some(SCHEDULER_SECRET), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = send(
        app(&ctx),
        post_from_peer("/internal/license-scan", [10, 0, 0, 2], Some(SCHEDULER_SECRET), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn scan_trigger_disabled_without_configured_secret() {
    let mut ctx = TestContext::new();
    ctx.state.scheduler_secret = None;

    let (status, _) = send(
        app(&ctx),
        post("/internal/license-scan", Some(SCHEDULER_SECRET), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============ Admin licenses ============

#[tokio::test]
async fn admin_routes_require_token() {
    let ctx = TestContext::new();
    let (company, _) = seed_license(&ctx, "Acme", LicenseStatus::Active, t0() + days(90), 0);
    let uri = format!("/admin/companies/{}/license", company.id);

    let (status, _) = send(app(&ctx), get(&uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(app(&ctx), get(&uri, Some(SCHEDULER_SECRET))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_company_license_includes_activity() {
    let ctx = TestContext::new();
    let (company, license) = seed_license(&ctx, "Acme", LicenseStatus::Active, t0() + days(90), 0);

    let (status, body) = send(
        app(&ctx),
        get(&format!("/admin/companies/{}/license", company.id), Some(ADMIN_TOKEN)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], license.id.as_str());
    assert_eq!(body["status"], "active");
    assert_eq!(body["activity"][0]["action"], "created");
}

#[tokio::test]
async fn unknown_company_license_is_not_found() {
    let ctx = TestContext::new();
    let (status, _) = send(
        app(&ctx),
        get("/admin/companies/nope/license", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn suspend_and_resume_over_http() {
    let ctx = TestContext::new();
    let (company, license) = seed_license(&ctx, "Acme", LicenseStatus::Active, t0() + days(400), 0);
    let base = format!("/admin/companies/{}/license", company.id);

    let (status, body) = send(
        app(&ctx),
        post(
            &format!("{}/suspend", base),
            Some(ADMIN_TOKEN),
            json!({ "reason": "Failed audit", "actor": "ops@coursegate" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["license"]["status"], "suspended");
    assert_eq!(body["activity"]["action"], "suspended");

    let (status, body) = send(
        app(&ctx),
        post(
            &format!("{}/suspend", base),
            Some(ADMIN_TOKEN),
            json!({ "reason": "Failed audit", "actor": "ops@coursegate" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "License is already suspended");

    let (status, body) = send(
        app(&ctx),
        post(
            &format!("{}/resume", base),
            Some(ADMIN_TOKEN),
            json!({ "actor": "ops@coursegate", "extend_days": 30 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["license"]["status"], "active");
    assert_eq!(body["activity"]["action"], "resumed");

    assert_eq!(ctx.license(&license.id).status, LicenseStatus::Active);
    assert_eq!(ctx.audit_count("license_suspended"), 1);
    assert_eq!(ctx.audit_count("license_resumed"), 1);
}

#[tokio::test]
async fn suspend_requires_reason_and_actor() {
    let ctx = TestContext::new();
    let (company, _) = seed_license(&ctx, "Acme", LicenseStatus::Active, t0() + days(400), 0);
    let uri = format!("/admin/companies/{}/license/suspend", company.id);

    let (status, _) = send(
        app(&ctx),
        post(&uri, Some(ADMIN_TOKEN), json!({ "reason": "", "actor": "ops" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(&ctx),
        post(&uri, Some(ADMIN_TOKEN), json!({ "reason": "Audit", "actor": " " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app(&ctx), post(&uri, Some(ADMIN_TOKEN), json!({ "actor": "ops" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resuming_active_license_conflicts() {
    let ctx = TestContext::new();
    let (company, _) = seed_license(&ctx, "Acme", LicenseStatus::Active, t0() + days(400), 0);

    let (status, _) = send(
        app(&ctx),
        post(
            &format!("/admin/companies/{}/license/resume", company.id),
            Some(ADMIN_TOKEN),
            json!({ "actor": "ops" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ============ Credentials ============

#[tokio::test]
async fn issue_and_read_credential() {
    let ctx = TestContext::new();
    let course = {
        let conn = ctx.state.db.get().unwrap();
        create_test_course(&conn, "First Aid", Some(ValidityPolicy::fixed_years(3, 30)))
    };
    let completed = chrono::Utc::now() - days(10);

    let (status, body) = send(
        app(&ctx),
        post(
            "/admin/credentials",
            Some(ADMIN_TOKEN),
            json!({
                "person_id": "person-7",
                "course_id": course.id,
                "completed_at": completed.timestamp(),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["freshness"], "valid");
    assert_eq!(body["validity_basis"], "fixed_years");
    assert_eq!(body["grace_days"], 30);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app(&ctx),
        get(&format!("/admin/credentials/{}", id), Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["person_id"], "person-7");
    assert_eq!(body["freshness"], "valid");
}

#[tokio::test]
async fn credential_for_misconfigured_course_is_unprocessable() {
    let ctx = TestContext::new();
    let course = {
        let conn = ctx.state.db.get().unwrap();
        create_test_course(
            &conn,
            "Broken",
            Some(ValidityPolicy {
                kind: ValidityKind::FixedYears,
                years: None,
                grace_days: 0,
            }),
        )
    };

    let (status, _) = send(
        app(&ctx),
        post(
            "/admin/credentials",
            Some(ADMIN_TOKEN),
            json!({ "person_id": "p", "course_id": course.id, "completed_at": 1_700_000_000 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_credential_is_not_found() {
    let ctx = TestContext::new();
    let (status, _) = send(app(&ctx), get("/admin/credentials/missing", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============ Login checks ============

#[tokio::test]
async fn login_check_counts_down_and_blocks() {
    let ctx = TestContext::new();
    let body = json!({ "email": "learner@example.com" });

    let (status, verdict) = send(app(&ctx), post("/auth/login-attempts/check", None, body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["remaining_attempts"], 5);

    for _ in 0..5 {
        let (status, _) = send(
            app(&ctx),
            post("/auth/login-attempts/failure", None, body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, error) = send(app(&ctx), post("/auth/login-attempts/check", None, body.clone())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(error["error"].as_str().unwrap().starts_with("Too many failed attempts"));
}

#[tokio::test]
async fn login_success_resets_the_counter() {
    let ctx = TestContext::new();
    let body = json!({ "email": "learner@example.com" });

    for _ in 0..3 {
        send(app(&ctx), post("/auth/login-attempts/failure", None, body.clone())).await;
    }
    let (status, _) = send(app(&ctx), post("/auth/login-attempts/success", None, body.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (_, verdict) = send(app(&ctx), post("/auth/login-attempts/check", None, body)).await;
    assert_eq!(verdict["remaining_attempts"], 5);
}

#[tokio::test]
async fn login_check_requires_email() {
    let ctx = TestContext::new();
    let (status, _) = send(
        app(&ctx),
        post("/auth/login-attempts/check", None, json!({ "email": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_failures_without_proxy_headers_are_keyed_by_peer() {
    let ctx = TestContext::new();
    let attacker = [10, 0, 0, 1];

    for i in 0..5 {
        let body = json!({ "email": format!("attacker{}@x.com", i) });
        let (status, _) = send(
            app(&ctx),
            post_from_peer("/auth/login-attempts/failure", attacker, None, body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let innocent = json!({ "email": "innocent@example.com" });
    let (status, verdict) = send(
        app(&ctx),
        post_from_peer("/auth/login-attempts/check", [10, 0, 0, 2], None, innocent.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["remaining_attempts"], 5);

    let (status, _) = send(
        app(&ctx),
        post_from_peer("/auth/login-attempts/check", attacker, None, innocent),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}
