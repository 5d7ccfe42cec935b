use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, registry::Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

/// Install the global tracing subscriber. Diagnostic events go to stderr so
/// that stdout stays reserved for the check report.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    match format {
        LogFormat::Text => {
            let subscriber = Registry::default().with(env_filter()).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(env_filter())
                .with(fmt::layer().with_writer(std::io::stderr).json());
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
