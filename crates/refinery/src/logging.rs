use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs the global tracing subscriber and routes `log` records into it.
///
/// `RUST_LOG` takes precedence over `level`. Returns false when a subscriber
/// was already installed, in which case nothing changes.
pub fn init_logging(level: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let installed = if json {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(fmt::layer().json().with_target(false));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(false));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if installed {
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::warn!("log records will not be captured: {}", e);
        }
    }
    installed
}
