use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use coursegate::audit::SqliteAuditSink;
use coursegate::config::{Config, RateLimitBackend};
use coursegate::db::{AppState, create_pool, init_audit_db, init_db};
use coursegate::lifecycle::SchedulerSettings;
use coursegate::notify::EmailService;
use coursegate::rate_limit::{RateLimiter, SqliteRateLimitStore};
use coursegate::util::now;

/// How often stale rate-limit records are swept.
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(name = "coursegate", about = "Course compliance and license lifecycle service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run the license scan once and print the report as JSON
    ScanLicenses,
    /// Delete audit logs and notification keys past their retention window
    PurgeAudit,
}

struct Services {
    state: AppState,
    audit: Arc<SqliteAuditSink>,
}

fn build_services(config: &Config) -> anyhow::Result<Services> {
    let db = create_pool(&config.database_path).context("opening database")?;
    let conn = db.get()?;
    init_db(&conn).context("initializing database schema")?;
    drop(conn);

    let audit_db = create_pool(&config.audit_database_path).context("opening audit database")?;
    let audit_conn = audit_db.get()?;
    init_audit_db(&audit_conn).context("initializing audit schema")?;
    drop(audit_conn);

    let audit = Arc::new(SqliteAuditSink::new(audit_db, config.audit_log_enabled));

    let rate_limiter = match config.rate_limit_backend {
        RateLimitBackend::Memory => RateLimiter::in_memory(config.rate_limits),
        RateLimitBackend::Sqlite => RateLimiter::new(
            Arc::new(SqliteRateLimitStore::new(db.clone())),
            config.rate_limits,
        ),
    };

    if config.scheduler_secret.is_none() {
        tracing::warn!("SCHEDULER_SECRET not set, the license scan trigger will reject all calls");
    }
    if config.admin_api_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set, admin routes will reject all calls");
    }
    if config.email.enabled && config.email.resend_api_key.is_none() && config.email.webhook_url.is_none() {
        tracing::warn!("No RESEND_API_KEY or NOTIFICATION_WEBHOOK_URL configured, notifications will not be delivered");
    }

    let state = AppState {
        db,
        audit: audit.clone(),
        notifier: Arc::new(EmailService::new(config.email.clone())),
        rate_limiter,
        scheduler_secret: config.scheduler_secret.clone(),
        admin_api_token: config.admin_api_token.clone(),
        scheduler_settings: SchedulerSettings {
            license_timeout: config.scheduler_license_timeout,
            ..SchedulerSettings::default()
        },
    };

    Ok(Services { state, audit })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "coursegate=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let services = build_services(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, services).await,
        Command::ScanLicenses => {
            let report = services.state.scheduler().run(chrono::Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::PurgeAudit => {
            let purged = services
                .audit
                .purge_older_than(config.audit_log_retention_days, now())?;
            println!("Purged {} audit log entries", purged);
            let keys = services
                .state
                .scheduler()
                .purge_notification_keys(chrono::Utc::now())?;
            println!("Purged {} notification keys", keys);
            Ok(())
        }
    }
}

async fn serve(config: &Config, services: Services) -> anyhow::Result<()> {
    if let Err(e) = services
        .audit
        .purge_older_than(config.audit_log_retention_days, now())
    {
        tracing::warn!(error = %e, "Audit log retention purge failed");
    }
    if let Err(e) = services
        .state
        .scheduler()
        .purge_notification_keys(chrono::Utc::now())
    {
        tracing::warn!(error = %e, "Notification key purge failed");
    }

    let limiter = services.state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match limiter.purge_expired() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Swept expired rate limit records"),
                Err(e) => tracing::warn!(error = %e, "Rate limit sweep failed"),
            }
        }
    });

    let app = coursegate::app(services.state);
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}
