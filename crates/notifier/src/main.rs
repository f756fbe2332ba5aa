use std::process::ExitCode;

use paddock_infra::config::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();
    paddock_observability::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match paddock_notifier::process_queue(&config).await {
        Ok(report) => {
            tracing::info!(
                duration_ms = report.duration.as_millis() as u64,
                processed = report.processed,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                "notification queue processed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "notification queue processing failed");
            ExitCode::FAILURE
        }
    }
}
