//! ferry-fs: remote file management over a single TCP connection
//!
//! A client can list, download, upload, delete, create and rename entries
//! under a directory chosen by the server.
//! Wire format: [1 byte tag][4 byte length BE][body]

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ops;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use client::ClientSession;
pub use command::Command;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use protocol::{DirectoryEntry, EntryKind, Response, Status};

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Bind `config.bind` and serve until `shutdown` resolves.
pub async fn run(config: ServerConfig, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    serve(listener, config, shutdown).await
}

/// Accept connections on `listener`, one task per connection.
///
/// At most `config.workers` sessions run at once. Connections beyond that are
/// still accepted and wait for a slot before their first command is read.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let gateway = Gateway::open(&config.root)
        .with_context(|| format!("open root {}", config.root.display()))?;
    let gateway = Arc::new(gateway);
    let workers = config.workers.max(1);
    let slots = Arc::new(Semaphore::new(workers));

    info!(
        addr = %listener.local_addr()?,
        root = %gateway.root().display(),
        workers,
        "ferry-fs listening"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        info!(%peer, "Client connected");

                        let gateway = gateway.clone();
                        let slots = slots.clone();
                        let idle_timeout = config.idle_timeout;
                        tokio::spawn(async move {
                            let Ok(_slot) = slots.acquire_owned().await else {
                                return;
                            };
                            match session::serve_session(stream, &gateway, idle_timeout).await {
                                Ok(()) => info!(%peer, "Client disconnected"),
                                Err(e) => error!(%peer, error = %e, "Client error"),
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    }
                }
            }
        }
    }
    Ok(())
}
