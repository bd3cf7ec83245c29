use clap::Parser;
use sandbox_engine::config::{Cli, EngineConfig};
use sandbox_engine::{api, signals};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive("sandbox_engine=info".parse()?)).init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;

    signals::install_signal_handlers().map_err(|e| anyhow::anyhow!("installing signal handlers: {e}"))?;

    api::serve(config, cli.port).await?;
    Ok(())
}
