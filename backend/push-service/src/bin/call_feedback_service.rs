//! Reads the feedback stream of a feedback service and deactivates the
//! devices it reports.

use anyhow::Context;
use clap::Parser;
use push_service::{Config, PushService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "call-feedback-service", about = "Deactivate devices reported by a feedback service")]
struct Args {
    /// Feedback service id
    #[arg(long)]
    feedback_service: Uuid,
}

fn summary(deactivated: u64) -> String {
    if deactivated == 1 {
        "1 device was deactivated.".to_string()
    } else {
        format!("{deactivated} devices were deactivated.")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let service = PushService::from_config(&config).await?;

    let deactivated = service
        .call_feedback(args.feedback_service)
        .await
        .context("Feedback service call failed")?;

    println!("{}", summary(deactivated));
    Ok(())
}
