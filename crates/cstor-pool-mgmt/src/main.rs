use clap::Parser;
use cstor_agent::{client_config, Agent, AgentConfig, ApiClient, ApiEventRecorder, ResourceApis};
use cstor_zfs::SystemRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cspi-mgmt", about = "cStor pool instance management agent")]
struct Cli {
    /// Path to a kubeconfig; empty means in-cluster configuration
    #[arg(long, env = "KUBECONFIG", default_value = "")]
    kubeconfig: String,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = AgentConfig::from_env()?;
    let kube_config = client_config(Some(&cli.kubeconfig)).await?;
    info!(
        "Managing pool instance {} against {}",
        config.pool_uid, kube_config.cluster_url
    );
    let client = kube::Client::try_from(kube_config)
        .map_err(|e| miette::miette!("Failed to create Kubernetes client: {}", e))?;
    let client = Arc::new(ApiClient::new(client));

    let recorder = Arc::new(ApiEventRecorder::new(
        &client,
        "cspi-mgmt",
        std::env::var("NODE_NAME").ok(),
    ));
    let agent = Agent::new(
        config,
        ResourceApis::from_client(client),
        recorder,
        Arc::new(SystemRunner),
    );

    let token = CancellationToken::new();
    let mut agent_handle = tokio::spawn(agent.run(token.clone()));

    tokio::select! {
        result = &mut agent_handle => {
            return match result {
                Ok(result) => result.map_err(Into::into),
                Err(e) => Err(miette::miette!("Agent task failed: {}", e)),
            };
        }
        signal = shutdown_signal() => signal?,
    }

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    match tokio::time::timeout(shutdown_timeout, agent_handle).await {
        Ok(Ok(Err(e))) => error!("Agent stopped with error: {}", e),
        Ok(Err(e)) => error!("Agent task failed: {}", e),
        Err(_) => error!("Agent did not stop within {:?}", shutdown_timeout),
        Ok(Ok(Ok(()))) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() -> miette::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| miette::miette!("Failed to listen for SIGTERM: {}", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))
        }
        _ = terminate.recv() => Ok(()),
    }
}
