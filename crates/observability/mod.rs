mod config;
mod discord;
mod layer;
mod notifier;

use anyhow::Result;
use config::ObservabilityConfig;
use discord::DiscordAlertProvider;
use layer::AlertLayer;
use notifier::AlertNotifier;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber: env-filtered fmt output plus optional Discord alerts.
///
/// Must be called from inside a tokio runtime because the alert notifier spawns its
/// delivery task.
pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);

    let alert_layer = match config.alerts.as_ref() {
        Some(alerts) => {
            let provider = DiscordAlertProvider::new(alerts.discord_webhook_url.clone())?;
            let notifier = AlertNotifier::new(vec![Arc::new(provider)]);
            Some(
                AlertLayer::new(notifier, config.service_context.clone(), alerts.min_level)
                    .with_filter(LevelFilter::from_level(alerts.min_level)),
            )
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Local time so `TZ=...` shows the operator's offset in logs.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    let context = &config.service_context;
    for warning in &config.warnings {
        warn!(
            service = %context.service_name,
            environment = %context.environment,
            component = %context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %context.service_name,
        environment = %context.environment,
        component = %context.component,
        alerts_enabled = config.alerts.is_some(),
        "observability: tracing initialized"
    );

    Ok(())
}
