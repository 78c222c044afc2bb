//! Accepts client sockets and spawns a `Connection` task per accepted socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::config::{AddressFamily, Config};
use crate::connection::Connection;

/// Binds one `TcpListener` per address family enabled in `config` and spawns an
/// accept loop for each, returning once every listener is bound (accept loops keep
/// running as background tasks). A slow or misbehaving peer never blocks acceptance
/// of the next one: each accepted socket gets its own freshly spawned task.
pub async fn serve(config: Arc<Config>) -> Result<()> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((config.listen_address.as_str(), config.listen_port))
        .await
        .with_context(|| format!("failed to resolve listen address {}", config.listen_address))?
        .collect();

    let wants = |addr: &SocketAddr| match config.family {
        AddressFamily::Both => true,
        AddressFamily::Ipv4Only => addr.is_ipv4(),
        AddressFamily::Ipv6Only => addr.is_ipv6(),
    };

    let mut bind_addrs: Vec<SocketAddr> = resolved.into_iter().filter(wants).collect();
    bind_addrs.dedup_by_key(|addr| addr.is_ipv4());

    if bind_addrs.is_empty() {
        anyhow::bail!("no address family requested resolves for {}", config.listen_address);
    }

    let mut accept_loops = Vec::with_capacity(bind_addrs.len());
    for bind_addr in bind_addrs {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind listener on {bind_addr}"))?;
        tracing::info!(address = %listener.local_addr().unwrap_or(bind_addr), "listening");

        let config = Arc::clone(&config);
        accept_loops.push(tokio::spawn(accept_loop(listener, config)));
    }

    for handle in accept_loops {
        handle.await.context("accept loop task panicked")??;
    }

    Ok(())
}

async fn accept_loop(listener: TcpListener, config: Arc<Config>) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await.context("accept failed")?;
        tracing::debug!(%peer, "accepted connection");

        let config = Arc::clone(&config);
        tokio::spawn(async move {
            if let Err(e) = Connection::new(socket, peer, config).run().await {
                tracing::warn!(%peer, error = %e, "connection ended with an error");
            }
        });
    }
}
