use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs the global subscriber. An unparsable `filter` falls back to `info`
/// and is reported once the subscriber is live.
pub fn init_tracing(filter: &str) -> anyhow::Result<()> {
    let (env_filter, rejected) = match EnvFilter::try_new(filter) {
        Ok(env_filter) => (env_filter, None),
        Err(err) => (EnvFilter::new("info"), Some(err)),
    };
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    if let Some(err) = rejected {
        warn!(filter, error = %err, "invalid log filter; using info");
    }
    Ok(())
}
