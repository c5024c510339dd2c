use clap::Parser;
use gossip_membership::config::{Args, Config};
use gossip_membership::MembershipService;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let config = Config::from(&args);
    tracing::info!("Starting node on {}:{}", config.host, config.port);
    match &config.initial_peer {
        Some(peer) => tracing::info!("Initial peer: {}", peer),
        None => tracing::info!("No initial peer configured"),
    }

    // Failing to bind the local socket is the only fatal error.
    let service = MembershipService::new(config).await?;
    service.start().await?;

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    service.shutdown();

    Ok(())
}
