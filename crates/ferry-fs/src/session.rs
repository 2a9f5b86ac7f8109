//! Server side of one connection: read a command, run it, answer it.

use crate::command::Command;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::ops;
use crate::protocol::{Channel, Response, format_listing};
use crate::transfer;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Serve commands until the peer disconnects.
///
/// Request and server errors are reported to the peer and the loop continues;
/// transport errors end the session. A clean close is `Ok`.
pub async fn serve_session<S>(stream: S, gateway: &Gateway, idle_timeout: Option<Duration>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut chan = Channel::new(stream, idle_timeout);

    loop {
        let line = match chan.recv_command().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(Error::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };

        let outcome = match Command::parse(&line) {
            Ok(cmd) => {
                debug!(command = cmd.tag(), "Received command");
                dispatch(cmd, gateway, &mut chan).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            if e.is_transport() {
                return Err(e);
            }
            warn!(status = e.status().code(), error = %e, line = %line, "Command failed");
            chan.send_response(&Response::from_error(&e)).await?;
        }
    }
}

async fn dispatch<S>(cmd: Command, gateway: &Gateway, chan: &mut Channel<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match cmd {
        Command::List { path } => {
            let entries = ops::list(&gateway.resolve(&path).await?).await?;
            chan.send_response(&Response::ok("ok", format_listing(&entries)))
                .await
        }
        Command::Download { path } => {
            let (mut file, size) = ops::open_download(&gateway.resolve(&path).await?).await?;
            chan.send_response(&Response::ok("sending file", size.to_string()))
                .await?;
            transfer::send_exactly(&mut file, chan, size).await?;
            debug!(size, "Download complete");
            Ok(())
        }
        Command::Upload { path, size } => {
            let mut file = ops::open_upload(&gateway.resolve(&path).await?).await?;
            chan.send_response(&Response::ok("ready to receive", ""))
                .await?;
            let received = transfer::receive_exactly(chan, &mut file, size).await?;
            debug!(size = received, "Upload complete");
            chan.send_response(&Response::ok("upload complete", received.to_string()))
                .await
        }
        Command::Delete { path } => {
            let target = gateway.resolve(&path).await?;
            if gateway.is_root(&target) {
                return Err(Error::request("cannot delete the root directory"));
            }
            let removed = ops::delete(&target).await?;
            chan.send_response(&Response::ok(format!("deleted {removed} entries"), ""))
                .await
        }
        Command::Mkdir { path } => {
            ops::mkdir(&gateway.resolve(&path).await?).await?;
            chan.send_response(&Response::ok("directory created", ""))
                .await
        }
        Command::Rename { from, to } => {
            let source = gateway.resolve(&from).await?;
            let target = gateway.resolve(&to).await?;
            if gateway.is_root(&source) {
                return Err(Error::request("cannot rename the root directory"));
            }
            ops::rename(&source, &target).await?;
            chan.send_response(&Response::ok("renamed", "")).await
        }
    }
}
