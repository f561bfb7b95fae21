mod config;
mod full_node;

use cobalt_log::log_info;

use crate::full_node::FullNode;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = config::parse_args()?;
    cobalt_log::set_level(config.log_level()?);

    let node = FullNode::new(&config)?;
    node.start().map_err(|code| code.to_string())?;

    // The connection fabric attaches handshaken channels through
    // node.protocol(); header sync proceeds as peers arrive.
    tokio::select! {
        code = node.run() => {
            if !code.is_success() {
                node.close().await.map_err(|code| code.to_string())?;
                return Err(code.to_string());
            }
            // Steady state until interrupted.
            wait_for_shutdown().await?;
        }
        result = wait_for_shutdown() => {
            result?;
        }
    }

    log_info!("shutting down");
    node.close().await.map_err(|code| code.to_string())?;
    Ok(())
}

async fn wait_for_shutdown() -> Result<(), String> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| format!("failed to wait for shutdown signal: {err}"))
}
