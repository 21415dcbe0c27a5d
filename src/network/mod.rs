use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::file_transfer::FileTransferHandler;
use crate::protocol::PROTOCOL_VERSION;
use crate::utils;

/// Pause after a failed accept (e.g. out of file descriptors) before retrying
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Validate the storage directory, bind the listener and serve forever.
///
/// Only startup problems (bad storage directory, bind failure) are returned;
/// per-connection failures are logged and never stop the server.
pub async fn start_server(config: &ServerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let listener = TcpListener::bind(config.socket_addr())
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    info!(
        "Listening on {} (protocol {})",
        listener.local_addr()?,
        PROTOCOL_VERSION
    );
    info!("Download directory: {}", config.storage_dir.display());

    let handler = Arc::new(FileTransferHandler::from_config(config));
    serve(listener, handler).await;
    Ok(())
}

/// Accept connections and run one handler task per connection
pub async fn serve(listener: TcpListener, handler: Arc<FileTransferHandler>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let connection_id = utils::generate_id();
        let span = info_span!("connection", id = %connection_id, %peer);
        span.in_scope(|| info!("Accepted connection {}", peer));

        let handler = Arc::clone(&handler);
        tokio::spawn(
            async move {
                handler.serve(stream).await;
                info!("Connection closed");
            }
            .instrument(span),
        );
    }
}
