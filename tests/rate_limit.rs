//! Rate limiter tests - windows, auto-block, shared stores, login guard

use std::sync::Arc;
use std::thread;

mod common;
use common::*;

use coursegate::db::create_pool;
use coursegate::rate_limit::{
    LOGIN_FAILED_MESSAGE, LoginGuard, MemoryRateLimitStore, RateLimitKey, RateLimitPolicy,
    RateLimitStore, SqliteRateLimitStore,
};

const NOW: i64 = 1_767_268_800;
const WINDOW: i64 = 15 * 60;
const DAY: i64 = 24 * 60 * 60;

fn limiter() -> RateLimiter {
    RateLimiter::in_memory(RateLimitSettings::default())
}

fn generous_settings() -> RateLimitSettings {
    let policy = RateLimitPolicy {
        max_attempts: 10_000,
        window_secs: WINDOW,
        auto_block_attempts: 20_000,
        auto_block_secs: DAY,
    };
    RateLimitSettings {
        ip: policy,
        email: policy,
    }
}

// ============ Window ============

#[test]
fn fifth_failure_exhausts_the_window() {
    let limiter = limiter();
    let key = RateLimitKey::email("user@example.com");

    for i in 0..4 {
        let result = limiter.record_failure_at(&key, NOW + i).unwrap();
        assert!(!result.blocked, "failure {} should not block", i + 1);
    }
    assert!(limiter.check_at(&key, NOW + 4).unwrap().allowed);

    let fifth = limiter.record_failure_at(&key, NOW + 4).unwrap();
    assert!(fifth.blocked);
    assert!(!fifth.auto_blocked);

    let check = limiter.check_at(&key, NOW + 5).unwrap();
    assert!(!check.allowed);
    assert_eq!(check.remaining_attempts, Some(0));
    assert_eq!(check.retry_after, Some(WINDOW - 5));
    assert!(check.message.unwrap().starts_with("Too many failed attempts"));
}

#[test]
fn window_expiry_restores_allowance() {
    let limiter = limiter();
    let key = RateLimitKey::ip("203.0.113.9");

    for _ in 0..5 {
        limiter.record_failure_at(&key, NOW).unwrap();
    }
    assert!(!limiter.check_at(&key, NOW + WINDOW - 1).unwrap().allowed);

    let after = limiter.check_at(&key, NOW + WINDOW).unwrap();
    assert!(after.allowed);
    assert_eq!(after.remaining_attempts, Some(5));
}

#[test]
fn reset_restores_full_allowance() {
    let limiter = limiter();
    let key = RateLimitKey::email("user@example.com");

    for _ in 0..5 {
        limiter.record_failure_at(&key, NOW).unwrap();
    }
    assert!(!limiter.check_at(&key, NOW).unwrap().allowed);

    limiter.reset(&key).unwrap();

    let check = limiter.check_at(&key, NOW).unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining_attempts, Some(5));
}

#[test]
fn ip_and_email_subjects_are_independent() {
    let limiter = limiter();
    let ip = RateLimitKey::ip("203.0.113.9");
    let email = RateLimitKey::email("user@example.com");

    for _ in 0..5 {
        limiter.record_failure_at(&ip, NOW).unwrap();
    }

    assert!(!limiter.check_at(&ip, NOW).unwrap().allowed);
    assert!(limiter.check_at(&email, NOW).unwrap().allowed);
}

#[test]
fn denial_messages_do_not_reveal_subject_kind() {
    let limiter = limiter();
    let ip = RateLimitKey::ip("203.0.113.9");
    let email = RateLimitKey::email("user@example.com");

    for _ in 0..5 {
        limiter.record_failure_at(&ip, NOW).unwrap();
        limiter.record_failure_at(&email, NOW).unwrap();
    }

    let by_ip = limiter.check_at(&ip, NOW).unwrap();
    let by_email = limiter.check_at(&email, NOW).unwrap();
    assert_eq!(by_ip.message, by_email.message);
}

// ============ Auto-block ============

#[test]
fn tenth_failure_blocks_for_a_day() {
    let limiter = limiter();
    let key = RateLimitKey::ip("198.51.100.7");

    let mut last = None;
    for i in 0..10 {
        last = Some(limiter.record_failure_at(&key, NOW + i).unwrap());
    }
    let tenth = last.unwrap();
    assert!(tenth.auto_blocked);
    assert_eq!(tenth.retry_after, Some(DAY));

    // Well past the 15 minute window the block still holds
    let later = NOW + 9 + WINDOW + 60;
    let check = limiter.check_at(&key, later).unwrap();
    assert!(!check.allowed);
    assert_eq!(check.retry_after, Some(NOW + 9 + DAY - later));

    assert!(limiter.check_at(&key, NOW + 9 + DAY).unwrap().allowed);
}

#[test]
fn block_survives_a_new_window() {
    let limiter = limiter();
    let key = RateLimitKey::ip("198.51.100.7");

    for _ in 0..10 {
        limiter.record_failure_at(&key, NOW).unwrap();
    }

    // A failure after the window lapsed starts a new count but keeps the block
    let later = NOW + WINDOW + 1;
    let result = limiter.record_failure_at(&key, later).unwrap();
    assert!(result.blocked);
    assert!(!result.auto_blocked);
    assert_eq!(result.retry_after, Some(NOW + DAY - later));
}

// ============ Concurrency ============

#[test]
fn concurrent_failures_are_never_lost() {
    let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::new()), generous_settings());
    let key = RateLimitKey::ip("192.0.2.1");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    limiter.record_failure_at(&key, NOW).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = limiter.store().get(&key.storage_key(), NOW).unwrap().unwrap();
    assert_eq!(record.count, 400);
}

#[test]
fn sqlite_store_is_shared_between_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limits.db");
    let path = path.to_str().unwrap();

    let first_pool = create_pool(path).unwrap();
    init_db(&first_pool.get().unwrap()).unwrap();
    let second_pool = create_pool(path).unwrap();

    let first = RateLimiter::new(
        Arc::new(SqliteRateLimitStore::new(first_pool)),
        RateLimitSettings::default(),
    );
    let second = RateLimiter::new(
        Arc::new(SqliteRateLimitStore::new(second_pool)),
        RateLimitSettings::default(),
    );
    let key = RateLimitKey::email("shared@example.com");

    for i in 0..5 {
        let instance = if i % 2 == 0 { &first } else { &second };
        instance.record_failure_at(&key, NOW).unwrap();
    }

    assert!(!first.check_at(&key, NOW).unwrap().allowed);
    assert!(!second.check_at(&key, NOW).unwrap().allowed);

    second.reset(&key).unwrap();
    assert!(first.check_at(&key, NOW).unwrap().allowed);
}

#[test]
fn sqlite_store_serializes_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limits.db");
    let path = path.to_str().unwrap().to_string();

    let pool = create_pool(&path).unwrap();
    init_db(&pool.get().unwrap()).unwrap();

    let key = RateLimitKey::ip("192.0.2.44");
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let limiter = RateLimiter::new(
                Arc::new(SqliteRateLimitStore::new(create_pool(&path).unwrap())),
                generous_settings(),
            );
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    limiter.record_failure_at(&key, NOW).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = SqliteRateLimitStore::new(pool);
    let record = store.get(&key.storage_key(), NOW).unwrap().unwrap();
    assert_eq!(record.count, 40);
}

#[test]
fn purge_drops_only_lapsed_records() {
    let store = Arc::new(MemoryRateLimitStore::new());
    let limiter = RateLimiter::new(store.clone(), RateLimitSettings::default());

    limiter.record_failure_at(&RateLimitKey::ip("192.0.2.1"), NOW).unwrap();
    for _ in 0..10 {
        limiter.record_failure_at(&RateLimitKey::ip("192.0.2.2"), NOW).unwrap();
    }

    assert_eq!(store.purge_expired(NOW + WINDOW).unwrap(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.purge_expired(NOW + DAY).unwrap(), 1);
    assert!(store.is_empty());
}

// ============ Login guard ============

fn guard(ctx: &TestContext) -> LoginGuard {
    ctx.state.login_guard()
}

#[test]
fn login_failures_report_a_generic_message() {
    let ctx = TestContext::new();
    let guard = guard(&ctx);

    let failure = guard.record_failure_at("203.0.113.1", "nobody@example.com", NOW).unwrap();
    assert_eq!(failure.message, LOGIN_FAILED_MESSAGE);
    assert!(!failure.blocked);
}

#[test]
fn login_precheck_denies_after_max_attempts() {
    let ctx = TestContext::new();
    let guard = guard(&ctx);

    for _ in 0..5 {
        guard.record_failure_at("203.0.113.1", "user@example.com", NOW).unwrap();
    }

    // Same email from a different IP is still blocked
    let err = guard.precheck_at("203.0.113.2", "user@example.com", NOW).unwrap_err();
    assert!(matches!(err, AppError::RateLimited { retry_after, .. } if retry_after == WINDOW));

    // Same IP with a different email is blocked too
    let err = guard.precheck_at("203.0.113.1", "other@example.com", NOW).unwrap_err();
    assert!(matches!(err, AppError::RateLimited { .. }));
}

#[test]
fn login_success_forgives_both_subjects() {
    let ctx = TestContext::new();
    let guard = guard(&ctx);

    for _ in 0..4 {
        guard.record_failure_at("203.0.113.1", "user@example.com", NOW).unwrap();
    }
    assert_eq!(
        guard.precheck_at("203.0.113.1", "user@example.com", NOW).unwrap().remaining_attempts,
        1
    );

    guard.record_success("203.0.113.1", "user@example.com").unwrap();

    let allowance = guard.precheck_at("203.0.113.1", "user@example.com", NOW).unwrap();
    assert_eq!(allowance.remaining_attempts, 5);
}

#[test]
fn login_auto_block_is_audited() {
    let ctx = TestContext::new();
    let guard = guard(&ctx);

    for i in 0..10 {
        guard
            .record_failure_at("203.0.113.1", &format!("user{}@example.com", i), NOW)
            .unwrap();
    }

    // Only the IP subject crossed the threshold
    assert_eq!(ctx.audit_count("login_auto_blocked"), 1);
}
