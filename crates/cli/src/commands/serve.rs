//! HTTP API server command.

use super::common::{shutdown_signal, AppContext, CommonArgs};
use anyhow::Result;
use clap::Args;
use tradepilot_web_api::ApiServer;

/// Arguments for the serve command.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Server address (defaults to `[server]` host and port)
    #[arg(short, long)]
    pub addr: Option<String>,
}

/// Serves the orchestrator API until Ctrl+C.
///
/// # Errors
/// Returns an error if startup fails or the listener cannot bind.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let ctx = AppContext::load(&args.common).await?;
    ctx.spawn_config_watch();

    if ctx.config.server.api_key.is_none() {
        tracing::warn!("server.api_key is not set; guarded endpoints will answer 500");
    }

    let addr = args.addr.unwrap_or_else(|| ctx.config.server.addr());
    let server = ApiServer::new(ctx.orchestrator.clone(), ctx.config.server.api_key.clone());

    tokio::select! {
        result = server.serve(&addr) => result?,
        () = shutdown_signal() => {}
    }

    tracing::info!("Web API stopped");
    Ok(())
}
