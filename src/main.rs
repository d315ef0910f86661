use pubwrap::cli::{Cli, commands};
use pubwrap::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Resolve configuration before logging so its level and format apply
    let config = commands::load_config(&cli.global)?;
    init_tracing(&config.logging);

    // Execute the command
    commands::execute_command(cli, config).await?;

    Ok(())
}

/// Initialize tracing; `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }
}
