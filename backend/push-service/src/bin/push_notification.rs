//! Sends a notification to every active device of a push service.

use anyhow::{bail, Context};
use apns_binary::{Localization, PayloadError};
use clap::Parser;
use push_service::{Config, Notification, PushService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "push-notification", about = "Send a push notification")]
struct Args {
    /// Alert text
    #[arg(short, long)]
    message: Option<String>,

    /// Badge number
    #[arg(short, long)]
    badge: Option<u32>,

    /// Sound file name
    #[arg(short, long)]
    sound: Option<String>,

    /// Push service id
    #[arg(long)]
    service: Uuid,

    /// Extra top level payload keys, as a JSON object
    #[arg(short, long, value_parser = parse_extra)]
    extra: Option<serde_json::Value>,

    /// Save the notification after sending
    #[arg(long, conflicts_with = "no_persist")]
    persist: bool,

    /// Do not save the notification
    #[arg(long)]
    no_persist: bool,

    /// Devices per connection
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Localization key for the alert
    #[arg(long)]
    loc_key: Option<String>,

    /// Localization argument, repeatable
    #[arg(long = "loc-arg", requires = "loc_key")]
    loc_args: Vec<String>,

    /// Localization key for the action button
    #[arg(long, requires = "loc_key")]
    action_loc_key: Option<String>,

    /// Background notification with content-available
    #[arg(long)]
    silent: bool,
}

fn parse_extra(raw: &str) -> Result<serde_json::Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(_) => Err("extra must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

impl Args {
    fn persist(&self) -> Option<bool> {
        match (self.persist, self.no_persist) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    fn notification(&self) -> Notification {
        let mut notification = Notification::new(self.service);
        notification.message = self.message.clone();
        notification.badge = self.badge;
        notification.sound = self.sound.clone();
        notification.extra = self.extra.clone();
        notification.silent = self.silent;
        notification.persist = self.persist();

        if let Some(loc_key) = &self.loc_key {
            let localization = Localization::new(loc_key.clone(), self.loc_args.iter());
            notification.localization = Some(match &self.action_loc_key {
                Some(action) => localization.with_action_loc_key(action.clone()),
                None => localization,
            });
        }

        notification
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
    let mut notification = args.notification();

    match notification.payload().encode() {
        Err(PayloadError::PayloadTooLarge { .. }) => {
            bail!("Notification exceeds the maximum payload length. Try making your message shorter.")
        }
        Err(e) => return Err(e).context("Invalid notification"),
        Ok(_) => {}
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    let service = PushService::from_config(&config).await?;

    let outcome = service
        .push_notification(&mut notification, args.chunk_size)
        .await
        .context("Failed to push notification")?;

    println!("Notification pushed successfully");
    println!(
        "sent: {}, skipped: {}, abandoned: {}, connections: {}",
        outcome.sent, outcome.skipped, outcome.abandoned, outcome.connections
    );
    if let Some(id) = notification.id {
        println!("notification id: {id}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "6f1b3c4e-2d7a-4a8e-9c1f-0b5d6e7f8a9b";

    #[test]
    fn test_message_only() {
        let args = Args::parse_from(["push-notification", "--service", SERVICE, "--message", "Hi"]);
        let notification = args.notification();

        assert_eq!(notification.message.as_deref(), Some("Hi"));
        assert_eq!(notification.persist, None);
        assert!(notification.localization.is_none());
    }

    #[test]
    fn test_localized_alert() {
        let args = Args::parse_from([
            "push-notification",
            "--service",
            SERVICE,
            "--loc-key",
            "GAME_INVITE",
            "--loc-arg",
            "Jenna",
            "--loc-arg",
            "3",
            "--action-loc-key",
            "PLAY",
        ]);
        let localization = args.notification().localization.unwrap();

        assert_eq!(localization.loc_key, "GAME_INVITE");
        assert_eq!(localization.loc_args, vec!["Jenna", "3"]);
        assert_eq!(localization.action_loc_key.as_deref(), Some("PLAY"));
    }

    #[test]
    fn test_persist_flags() {
        let args = Args::parse_from(["push-notification", "--service", SERVICE, "--no-persist"]);
        assert_eq!(args.persist(), Some(false));

        let args = Args::parse_from(["push-notification", "--service", SERVICE, "--persist"]);
        assert_eq!(args.persist(), Some(true));

        assert!(Args::try_parse_from([
            "push-notification",
            "--service",
            SERVICE,
            "--persist",
            "--no-persist"
        ])
        .is_err());
    }

    #[test]
    fn test_extra_must_be_object() {
        assert!(Args::try_parse_from([
            "push-notification",
            "--service",
            SERVICE,
            "--extra",
            "[1, 2]"
        ])
        .is_err());

        let args = Args::parse_from([
            "push-notification",
            "--service",
            SERVICE,
            "--extra",
            r#"{"thread": "abc"}"#,
        ]);
        assert_eq!(args.extra.unwrap()["thread"], "abc");
    }
}
