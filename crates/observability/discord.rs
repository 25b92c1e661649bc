use super::notifier::{AlertEvent, AlertProvider};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use url::Url;

const DISCORD_CONTENT_LIMIT: usize = 2000;

pub(crate) struct DiscordAlertProvider {
    webhook_url: Url,
    client: Client,
}

impl DiscordAlertProvider {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(3))
            .build()?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

pub(crate) fn format_alert(event: &AlertEvent) -> String {
    let mut lines = vec![
        format!(
            "**{}** `{}` `{}` `{}`",
            event.service_name,
            event.environment,
            event.component,
            event.level.as_str()
        ),
        format!(
            "`{}` `{}`",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            event.target
        ),
    ];

    if let Some(message) = event.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        lines.push(format!("> {}", message));
    }

    for (key, value) in &event.fields {
        lines.push(format!("- `{}` = `{}`", key, value));
    }

    for span in event.spans.iter().filter(|s| !s.fields.is_empty()) {
        lines.push(format!("span `{}`:", span.name));
        for (key, value) in &span.fields {
            lines.push(format!("- `{}` = `{}`", key, value));
        }
    }

    truncate_chars(lines.join("\n"), DISCORD_CONTENT_LIMIT)
}

fn truncate_chars(content: String, limit: usize) -> String {
    const SUFFIX: &str = "\n… (truncated)";

    if content.chars().count() <= limit {
        return content;
    }

    let allowed = limit.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}

#[async_trait]
impl AlertProvider for DiscordAlertProvider {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": format_alert(event) }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    anyhow!("discord webhook request timed out")
                } else {
                    anyhow!("discord webhook request failed")
                }
            })?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "discord webhook returned non-success status: {}",
                response.status()
            ));
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "discord"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tracing::Level;

    fn alert(message: &str) -> AlertEvent {
        AlertEvent {
            level: Level::ERROR,
            timestamp: Utc::now(),
            service_name: "recorder".to_string(),
            environment: "test".to_string(),
            component: "recorder".to_string(),
            target: "recorder::recording_engine".to_string(),
            message: Some(message.to_string()),
            fields: BTreeMap::from([("recording_id".to_string(), "abc".to_string())]),
            spans: Vec::new(),
        }
    }

    #[test]
    fn formats_message_and_fields() {
        let content = format_alert(&alert("rotation: failed to start next segment"));
        assert!(content.contains("**recorder**"));
        assert!(content.contains("> rotation: failed to start next segment"));
        assert!(content.contains("`recording_id` = `abc`"));
    }

    #[test]
    fn long_alerts_are_truncated_to_the_discord_limit() {
        let content = format_alert(&alert(&"x".repeat(5000)));
        assert_eq!(content.chars().count(), DISCORD_CONTENT_LIMIT);
        assert!(content.ends_with("(truncated)"));
    }
}
