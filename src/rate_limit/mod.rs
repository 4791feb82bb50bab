//! Failed-authentication throttling.
//!
//! Each subject (source IP or submitted email) gets a counter inside a fixed
//! window. Reaching `max_attempts` exhausts the window; reaching
//! `auto_block_attempts` promotes the subject to a long block that outlives the
//! window. A successful login deletes the record.
//!
//! ```text
//! CLEAN --failure--> THROTTLED --max_attempts--> LOCKED_OUT --expiry--> CLEAN
//!                                 \--auto_block_attempts--> BLOCKED (24h)
//! ```

mod login;
mod store;

pub use login::*;
pub use store::*;

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use strum::AsRefStr;
use unicode_normalization::UnicodeNormalization;

use crate::error::Result;
use crate::util::now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RateLimitKind {
    Ip,
    Email,
}

/// A rate-limited subject.
///
/// Email subjects are normalized and hashed so the store never holds addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub kind: RateLimitKind,
    subject: String,
}

impl RateLimitKey {
    pub fn ip(ip: &str) -> Self {
        Self {
            kind: RateLimitKind::Ip,
            subject: ip.trim().to_string(),
        }
    }

    pub fn email(email: &str) -> Self {
        Self {
            kind: RateLimitKind::Email,
            subject: hash_email_subject(email),
        }
    }

    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.kind.as_ref(), self.subject)
    }
}

fn hash_email_subject(email: &str) -> String {
    let normalized: String = email.trim().nfkc().collect::<String>().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(b"coursegate-login-v1:");
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitRecord {
    pub count: i64,
    pub window_reset_at: i64,
    pub blocked_until: Option<i64>,
}

impl RateLimitRecord {
    /// When the record stops mattering and the store may drop it.
    pub fn expires_at(&self) -> i64 {
        self.window_reset_at.max(self.blocked_until.unwrap_or(0))
    }

    fn active_block(&self, now: i64) -> Option<i64> {
        self.blocked_until.filter(|until| *until > now)
    }
}

/// Thresholds for one subject kind. Durations are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: i64,
    pub window_secs: i64,
    pub auto_block_attempts: i64,
    pub auto_block_secs: i64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 15 * 60,
            auto_block_attempts: 10,
            auto_block_secs: 24 * 60 * 60,
        }
    }
}

/// IP and email subjects are limited independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub ip: RateLimitPolicy,
    pub email: RateLimitPolicy,
}

impl RateLimitSettings {
    pub fn for_kind(&self, kind: RateLimitKind) -> &RateLimitPolicy {
        match kind {
            RateLimitKind::Ip => &self.ip,
            RateLimitKind::Email => &self.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<i64>,
    /// Seconds until the subject may try again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    fn allowed(remaining: i64) -> Self {
        Self {
            allowed: true,
            remaining_attempts: Some(remaining),
            retry_after: None,
            message: None,
        }
    }

    fn denied(retry_after: i64) -> Self {
        Self {
            allowed: false,
            remaining_attempts: Some(0),
            retry_after: Some(retry_after),
            message: Some(retry_message(retry_after)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResult {
    /// The subject can no longer attempt until `retry_after` elapses
    pub blocked: bool,
    /// This failure promoted the subject to the long block
    pub auto_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Human-readable retry hint. Identical for every subject kind.
pub fn retry_message(retry_after_secs: i64) -> String {
    let minutes = (retry_after_secs.max(1) + 59) / 60;
    if minutes >= 120 {
        let hours = (minutes + 59) / 60;
        format!("Too many failed attempts. Please try again in {} hours.", hours)
    } else if minutes == 1 {
        "Too many failed attempts. Please try again in 1 minute.".to_string()
    } else {
        format!("Too many failed attempts. Please try again in {} minutes.", minutes)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    /// Limiter over a process-local store.
    pub fn in_memory(settings: RateLimitSettings) -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()), settings)
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    pub fn check(&self, key: &RateLimitKey) -> Result<CheckResult> {
        self.check_at(key, now())
    }

    /// Read-only verdict for `key` at `now`.
    pub fn check_at(&self, key: &RateLimitKey, now: i64) -> Result<CheckResult> {
        let policy = self.settings.for_kind(key.kind);
        let Some(record) = self.store.get(&key.storage_key(), now)? else {
            return Ok(CheckResult::allowed(policy.max_attempts));
        };

        if let Some(until) = record.active_block(now) {
            return Ok(CheckResult::denied(until - now));
        }

        if record.window_reset_at <= now {
            return Ok(CheckResult::allowed(policy.max_attempts));
        }

        if record.count >= policy.max_attempts {
            return Ok(CheckResult::denied(record.window_reset_at - now));
        }

        Ok(CheckResult::allowed(policy.max_attempts - record.count))
    }

    pub fn record_failure(&self, key: &RateLimitKey) -> Result<FailureResult> {
        self.record_failure_at(key, now())
    }

    /// Count one failed attempt for `key`, atomically with respect to the key.
    pub fn record_failure_at(&self, key: &RateLimitKey, now: i64) -> Result<FailureResult> {
        let policy = *self.settings.for_kind(key.kind);
        let mut auto_blocked = false;

        let record = self.store.update(&key.storage_key(), now, &mut |existing| {
            let mut record = match existing {
                Some(r) if r.window_reset_at > now => r,
                // Window over: start a fresh one but keep any long block in force
                Some(r) => RateLimitRecord {
                    count: 0,
                    window_reset_at: now + policy.window_secs,
                    blocked_until: r.active_block(now),
                },
                None => RateLimitRecord {
                    count: 0,
                    window_reset_at: now + policy.window_secs,
                    blocked_until: None,
                },
            };

            record.count += 1;
            auto_blocked = false;
            if record.count >= policy.auto_block_attempts && record.active_block(now).is_none() {
                record.blocked_until = Some(now + policy.auto_block_secs);
                auto_blocked = true;
            }
            record
        })?;

        let retry_after = match record.active_block(now) {
            Some(until) => Some(until - now),
            None if record.count >= policy.max_attempts => Some(record.window_reset_at - now),
            None => None,
        };

        if auto_blocked {
            tracing::warn!(
                kind = key.kind.as_ref(),
                count = record.count,
                "Rate limit subject auto-blocked"
            );
        }

        Ok(FailureResult {
            blocked: retry_after.is_some(),
            auto_blocked,
            retry_after,
            message: retry_after.map(retry_message),
        })
    }

    /// Forget every failure recorded for `key`.
    pub fn reset(&self, key: &RateLimitKey) -> Result<()> {
        self.store.delete(&key.storage_key())
    }

    /// Drop records whose windows and blocks have all lapsed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired(now())
    }
}
