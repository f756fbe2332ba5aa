//! Wiring for the `process-notification-queue` job.
//!
//! Connects to Postgres, builds the SMTP email sender and drains the queue
//! once. Scheduling (cron, systemd timer) is external.

use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use paddock_infra::config::AppConfig;
use paddock_infra::delivery::{EmailNotificationSender, PostgresRecipientDirectory, SmtpMailer};
use paddock_infra::jobs::{PostgresJobStore, QueueProcessor, RunReport};

/// Connections held by one run: the processor is sequential.
const MAX_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drain the queue once with the production constants.
pub async fn process_queue(config: &AppConfig) -> anyhow::Result<RunReport> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;

    let mailer = SmtpMailer::new(&config.smtp, &config.mail_from)
        .context("failed to set up the SMTP transport")?;
    let sender = EmailNotificationSender::new(PostgresRecipientDirectory::new(pool.clone()), mailer)
        .with_base_url(config.base_url.clone());

    info!(
        smtp_host = %config.smtp.host,
        smtp_port = config.smtp.port,
        "processing notification queue"
    );

    let result = QueueProcessor::new(PostgresJobStore::new(pool.clone()), sender)
        .run()
        .await
        .context("notification queue run aborted");

    pool.close().await;
    result
}
