mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use std::path::PathBuf;
use std::process;
use storefront::errors::StorefrontError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "storefront";

#[derive(Parser)]
#[command(about = "Storefront API gateway")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the storefront API
    Run(ConfigArgs),
    /// Check the configuration and exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// YAML config file. Without one, settings come from the environment.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load(self.config.as_deref(), |name| std::env::var(name).ok())
    }
}

#[derive(thiserror::Error, Debug)]
enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up logging: {0}")]
    Logging(String),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error(transparent)]
    Storefront(#[from] StorefrontError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Run(args) => run(args).await,
        CliCommand::Validate(args) => validate(args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Gateway failed");
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(args: &ConfigArgs) -> Result<(), GatewayError> {
    let config = args.load()?;

    let _sentry = init_logging(config.logging.as_ref())?;
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    storefront::run(config.storefront).await?;
    Ok(())
}

fn validate(args: &ConfigArgs) -> Result<(), GatewayError> {
    let config = args.load()?;
    let upstream = config
        .storefront
        .validate()
        .map_err(ConfigError::from)?;
    println!("config ok, upstream {}", upstream.url);
    Ok(())
}

/// The returned guard flushes pending sentry events when dropped.
fn init_logging(
    logging: Option<&LoggingConfig>,
) -> Result<Option<sentry::ClientInitGuard>, GatewayError> {
    let guard = match logging {
        Some(logging) => {
            let dsn: sentry::types::Dsn = logging
                .sentry_dsn
                .parse()
                .map_err(|e| GatewayError::Logging(format!("invalid sentry dsn: {e}")))?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), GatewayError> {
    let recorder =
        metrics_exporter_statsd::StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
            .build(Some(METRICS_PREFIX))
            .map_err(|e| GatewayError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| GatewayError::Metrics("a metrics recorder is already installed".into()))?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
