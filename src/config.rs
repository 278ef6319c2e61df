use std::time::Duration;

use anyhow::Context;

use crate::mailer::RelayConfig;
use crate::reminder::ReminderSettings;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_LOG_FILTER: &str = "info,procedure_control=debug";
const DEFAULT_MAIL_TIMEOUT_SECS: u64 = 15;
const DEFAULT_APP_URL: &str = "http://localhost:3000";

/// Settings for commands that send reminders or serve the API.
#[derive(Debug, Clone)]
pub struct Config {
    pub cron_secret: Option<String>,
    pub relay: RelayConfig,
    pub reminder: ReminderSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };

        let timeout_secs = match lookup("MAIL_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MAIL_TIMEOUT_SECS must be a whole number, got {raw:?}"))?,
            None => DEFAULT_MAIL_TIMEOUT_SECS,
        };
        let timeout = Duration::from_secs(timeout_secs.max(1));

        let relay = RelayConfig {
            endpoint: required("MAIL_RELAY_URL")?,
            token: required("MAIL_RELAY_TOKEN")?,
            from: required("MAIL_FROM")?,
            timeout,
        };

        let reminder = ReminderSettings {
            recipient: required("REMINDER_RECIPIENT")?,
            app_url: lookup("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            dispatch_timeout: timeout,
        };

        let cron_secret = lookup("CRON_SECRET").filter(|value| !value.is_empty());

        Ok(Self {
            cron_secret,
            relay,
            reminder,
        })
    }
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full() -> HashMap<String, String> {
        env(&[
            ("MAIL_RELAY_URL", "https://relay.example.com/send"),
            ("MAIL_RELAY_TOKEN", "tok"),
            ("MAIL_FROM", "noreply@example.com"),
            ("REMINDER_RECIPIENT", "clinic@example.com"),
            ("CRON_SECRET", "s3cret"),
        ])
    }

    #[test]
    fn reads_required_values_and_defaults() {
        let vars = full();
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.relay.endpoint, "https://relay.example.com/send");
        assert_eq!(config.reminder.recipient, "clinic@example.com");
        assert_eq!(config.reminder.app_url, DEFAULT_APP_URL);
        assert_eq!(config.reminder.dispatch_timeout, Duration::from_secs(15));
    }

    #[test]
    fn missing_recipient_is_an_error() {
        let mut vars = full();
        vars.remove("REMINDER_RECIPIENT");
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("REMINDER_RECIPIENT"));
    }

    #[test]
    fn empty_cron_secret_counts_as_unset() {
        let mut vars = full();
        vars.insert("CRON_SECRET".into(), String::new());
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(config.cron_secret.is_none());
    }

    #[test]
    fn timeout_override_is_parsed() {
        let mut vars = full();
        vars.insert("MAIL_TIMEOUT_SECS".into(), "3".into());
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.relay.timeout, Duration::from_secs(3));

        vars.insert("MAIL_TIMEOUT_SECS".into(), "soon".into());
        assert!(Config::from_lookup(|k| vars.get(k).cloned()).is_err());
    }
}
