use bot_gateway::config::Config;
use bot_gateway::discord::{DiscordClient, GatewayClient};
use bot_gateway::identity::Identity;
use bot_gateway::telemetry::try_init_tracing;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "gateway client failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let identity = Identity::load(config.token.clone(), &config.intents_file)?;
    let http = DiscordClient::with_api_base(&config.api_base)?;

    let mut client = GatewayClient::new(http, identity).with_reconnect_config(config.reconnect);
    client.connect().await?;

    shutdown_signal().await?;
    info!("shutting down");
    client.disconnect().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
