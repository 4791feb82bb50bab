//! License lifecycle: transition table, transactional state changes, the
//! expiry scheduler and the admin suspend/resume operations.
//!
//! State changes commit first and hand back a list of [`SideEffect`]s; the
//! [`EffectDispatcher`] delivers them afterwards so a failed email never rolls
//! back a compliance transition.

mod manual;
mod scheduler;
mod transitions;

pub use manual::*;
pub use scheduler::*;
pub use transitions::*;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::audit::AuditSink;
use crate::models::AuditEntry;
use crate::notify::{ExpiryWarning, NotificationSink, SuspensionNotice};

/// Work deferred until after the state change commits.
#[derive(Debug, Clone)]
pub enum SideEffect {
    Audit(AuditEntry),
    ExpiryWarning(ExpiryWarning),
    SuspensionNotice(SuspensionNotice),
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::Audit(_) => "audit",
            SideEffect::ExpiryWarning(_) => "expiry_warning",
            SideEffect::SuspensionNotice(_) => "suspension_notice",
        }
    }

    fn is_notification(&self) -> bool {
        !matches!(self, SideEffect::Audit(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectFailure {
    pub effect: &'static str,
    pub message: String,
}

impl EffectFailure {
    pub fn is_notification(&self) -> bool {
        self.effect != "audit"
    }
}

/// Delivers side effects. Every effect is attempted once; failures are returned, not retried.
#[derive(Clone)]
pub struct EffectDispatcher {
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
    notify_timeout: Duration,
}

impl EffectDispatcher {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            audit,
            notifier,
            notify_timeout,
        }
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub async fn dispatch(&self, effects: Vec<SideEffect>) -> Vec<EffectFailure> {
        let mut failures = Vec::new();
        for effect in effects {
            if let Err(message) = self.dispatch_one(&effect).await {
                tracing::warn!(effect = effect.kind(), error = %message, "Side effect failed");
                failures.push(EffectFailure {
                    effect: effect.kind(),
                    message,
                });
            }
        }
        failures
    }

    async fn dispatch_one(&self, effect: &SideEffect) -> std::result::Result<(), String> {
        if effect.is_notification() {
            let sent = tokio::time::timeout(self.notify_timeout, self.notify(effect)).await;
            return match sent {
                Ok(result) => result,
                Err(_) => Err(format!(
                    "notification timed out after {}s",
                    self.notify_timeout.as_secs()
                )),
            };
        }

        match effect {
            SideEffect::Audit(entry) => self.audit.record(entry).map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }

    async fn notify(&self, effect: &SideEffect) -> std::result::Result<(), String> {
        let outcome = match effect {
            SideEffect::ExpiryWarning(warning) => {
                if warning.recipient().is_none() {
                    return Err("missing contact email".to_string());
                }
                self.notifier.send_license_expiry_warning(warning).await
            }
            SideEffect::SuspensionNotice(notice) => {
                if notice.recipient().is_none() {
                    return Err("missing contact email".to_string());
                }
                self.notifier.send_license_suspended(notice).await
            }
            SideEffect::Audit(_) => return Ok(()),
        };

        outcome.map(|_| ()).map_err(|e| e.to_string())
    }
}
