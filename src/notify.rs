//! Notification delivery for license warnings and suspension notices.
//!
//! `EmailService` supports three modes:
//! 1. Send via Resend API (default when an API key is configured)
//! 2. POST to a webhook URL (for DIY delivery)
//! 3. Disabled (no message sent, log only)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmailConfig;
use crate::error::{AppError, Result};
use crate::models::notice_recipient;
use crate::util::format_date;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Result of attempting to deliver a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// Email was sent successfully via Resend
    Sent,
    /// Payload was POSTed to the configured webhook URL
    WebhookCalled,
    /// Delivery is switched off
    Disabled,
    /// No provider key configured
    NoApiKey,
}

/// Upcoming license expiry.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryWarning {
    pub license_id: String,
    pub company_id: String,
    pub company_name: String,
    /// Company's general email
    pub email: Option<String>,
    pub contact_email: Option<String>,
    pub days_until_expiry: i64,
    /// Unix timestamp of the license end date
    pub expiry_date: i64,
}

/// License expired past its grace period (or otherwise suspended).
#[derive(Debug, Clone, Serialize)]
pub struct SuspensionNotice {
    pub license_id: String,
    pub company_id: String,
    pub company_name: String,
    pub email: Option<String>,
    pub contact_email: Option<String>,
    pub suspended_at: i64,
    pub reason: Option<String>,
}

impl ExpiryWarning {
    pub fn recipient(&self) -> Option<&str> {
        notice_recipient(&self.contact_email, &self.email)
    }
}

impl SuspensionNotice {
    pub fn recipient(&self) -> Option<&str> {
        notice_recipient(&self.contact_email, &self.email)
    }
}

/// Outbound transport for license notices.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_license_expiry_warning(
        &self,
        warning: &ExpiryWarning,
    ) -> Result<NotificationOutcome>;

    async fn send_license_suspended(&self, notice: &SuspensionNotice)
    -> Result<NotificationOutcome>;
}

/// Webhook payload sent when a webhook URL is configured.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a, T: Serialize> {
    event: &'static str,
    to: &'a str,
    #[serde(flatten)]
    data: &'a T,
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
    html: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

struct RenderedEmail {
    subject: String,
    text: String,
    html: String,
}

/// Email service using the Resend API.
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
    http_client: Client,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
        }
    }

    /// Resolution order:
    /// 1. Disabled -> return Disabled
    /// 2. Webhook URL set -> POST to webhook
    /// 3. Otherwise send via Resend (NoApiKey when no key is configured)
    async fn deliver<T: Serialize + Sync>(
        &self,
        event: &'static str,
        to: &str,
        data: &T,
        rendered: RenderedEmail,
    ) -> Result<NotificationOutcome> {
        if !self.config.enabled {
            tracing::debug!(event, "Email disabled, skipping notification");
            return Ok(NotificationOutcome::Disabled);
        }

        if let Some(ref webhook_url) = self.config.webhook_url {
            return self.call_webhook(webhook_url, event, to, data).await;
        }

        let Some(ref api_key) = self.config.resend_api_key else {
            tracing::warn!(event, "No Resend API key configured, cannot send email");
            return Ok(NotificationOutcome::NoApiKey);
        };

        self.send_via_resend(api_key, to, rendered).await
    }

    async fn send_via_resend(
        &self,
        api_key: &str,
        to: &str,
        rendered: RenderedEmail,
    ) -> Result<NotificationOutcome> {
        let request = ResendEmailRequest {
            from: &self.config.from_email,
            to: vec![to],
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        };

        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                AppError::Internal(format!("Email service error: {}", e))
            })?;

        if response.status().is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                AppError::Internal("Email service response error".into())
            })?;

            tracing::info!(to = %to, "Notification email sent via Resend");
            Ok(NotificationOutcome::Sent)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Resend API returned error");
            Err(AppError::Internal(format!(
                "Email service error: {} - {}",
                status, body
            )))
        }
    }

    async fn call_webhook<T: Serialize + Sync>(
        &self,
        webhook_url: &str,
        event: &'static str,
        to: &str,
        data: &T,
    ) -> Result<NotificationOutcome> {
        let payload = WebhookPayload { event, to, data };

        let response = self
            .http_client
            .post(webhook_url)
            .header("Content-Type", "application/json")
            .header("X-Coursegate-Event", event)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, webhook_url = %webhook_url, "Failed to call notification webhook");
                AppError::Internal(format!("Webhook call failed: {}", e))
            })?;

        if response.status().is_success() {
            tracing::info!(webhook_url = %webhook_url, event, "Notification webhook called successfully");
            Ok(NotificationOutcome::WebhookCalled)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                webhook_url = %webhook_url,
                "Notification webhook returned error"
            );
            Err(AppError::Internal(format!(
                "Webhook returned {}",
                status
            )))
        }
    }
}

fn render_expiry_warning(warning: &ExpiryWarning) -> RenderedEmail {
    let date = format_date(warning.expiry_date);
    let subject = format!(
        "Your license for {} expires in {} days",
        warning.company_name, warning.days_until_expiry
    );
    let text = format!(
        "Hello {},\n\nYour license expires in {} days, on {}.\n\nRenew before then to keep uninterrupted access for your team.",
        warning.company_name, warning.days_until_expiry, date
    );
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Your license expires in {} days</h2>
<p>Hello <strong>{}</strong>,</p>
<p>Your license expires on <strong>{}</strong>.</p>
<p>Renew before then to keep uninterrupted access for your team.</p>
</body>
</html>"#,
        warning.days_until_expiry, warning.company_name, date
    );
    RenderedEmail {
        subject,
        text,
        html,
    }
}

fn render_suspension(notice: &SuspensionNotice) -> RenderedEmail {
    let date = format_date(notice.suspended_at);
    let reason = notice.reason.as_deref().unwrap_or("license expired");
    let subject = format!("Your license for {} has been suspended", notice.company_name);
    let text = format!(
        "Hello {},\n\nYour license was suspended on {} ({}).\n\nContact us to restore access.",
        notice.company_name, date, reason
    );
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Your license has been suspended</h2>
<p>Hello <strong>{}</strong>,</p>
<p>Your license was suspended on <strong>{}</strong> ({}).</p>
<p>Contact us to restore access.</p>
</body>
</html>"#,
        notice.company_name, date, reason
    );
    RenderedEmail {
        subject,
        text,
        html,
    }
}

#[async_trait]
impl NotificationSink for EmailService {
    async fn send_license_expiry_warning(
        &self,
        warning: &ExpiryWarning,
    ) -> Result<NotificationOutcome> {
        let to = warning.recipient().ok_or_else(|| {
            AppError::BadRequest(format!("Company {} has no contact email", warning.company_id))
        })?;
        self.deliver(
            "license_expiry_warning",
            to,
            warning,
            render_expiry_warning(warning),
        )
        .await
    }

    async fn send_license_suspended(
        &self,
        notice: &SuspensionNotice,
    ) -> Result<NotificationOutcome> {
        let to = notice.recipient().ok_or_else(|| {
            AppError::BadRequest(format!("Company {} has no contact email", notice.company_id))
        })?;
        self.deliver("license_suspended", to, notice, render_suspension(notice))
            .await
    }
}
