use std::env;
use tracing::Level;
use url::Url;

#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Clone)]
pub(crate) struct AlertSinkConfig {
    pub(crate) discord_webhook_url: Url,
    pub(crate) min_level: Level,
}

#[derive(Clone)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    pub(crate) alerts: Option<AlertSinkConfig>,
    /// Collected while parsing; logged once tracing is installed.
    pub(crate) warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        let component = component.trim().to_string();

        let service_name = env_string("SERVICE_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| component.clone());

        let environment = env_string("STAGE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let (alerts, warnings) = alerts_from_env();

        Self {
            service_context: ServiceContext {
                service_name,
                environment,
                component,
            },
            alerts,
            warnings,
        }
    }
}

fn alerts_from_env() -> (Option<AlertSinkConfig>, Vec<String>) {
    let mut warnings = Vec::new();

    if !env_bool("ALERT_NOTIFY_ENABLED").unwrap_or(true) {
        return (None, warnings);
    }

    let Some(raw_url) = env_string("DISCORD_WEBHOOK_URL").filter(|v| !v.trim().is_empty()) else {
        return (None, warnings);
    };

    let discord_webhook_url = match Url::parse(raw_url.trim()) {
        Ok(url) => url,
        Err(err) => {
            // The raw URL carries the webhook secret; only report the parse error.
            warnings.push(format!(
                "DISCORD_WEBHOOK_URL is invalid; error alerts disabled (parse error: {err})"
            ));
            return (None, warnings);
        }
    };

    let min_level = match env_string("ALERT_NOTIFY_LEVEL").filter(|v| !v.trim().is_empty()) {
        Some(raw) => parse_level(&raw).unwrap_or_else(|| {
            warnings.push(format!(
                "ALERT_NOTIFY_LEVEL is invalid (value: {raw}); defaulting to ERROR"
            ));
            Level::ERROR
        }),
        None => Level::ERROR,
    };

    (
        Some(AlertSinkConfig {
            discord_webhook_url,
            min_level,
        }),
        warnings,
    )
}

pub(crate) fn parse_level(input: &str) -> Option<Level> {
    match input.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
