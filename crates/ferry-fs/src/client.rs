//! Client side of the session protocol
//!
//! [`ClientSession`] owns the connection and the caller's remote working
//! directory. Relative arguments to every operation resolve against that
//! directory; the server itself only ever sees root-relative paths.

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{Channel, DirectoryEntry, Response, parse_listing};
use crate::transfer;
use std::io;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub struct ClientSession {
    addr: String,
    config: ClientConfig,
    chan: Option<Channel<TcpStream>>,
    cwd: String,
}

impl ClientSession {
    pub async fn connect(addr: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let mut session = Self {
            addr: addr.into(),
            config,
            chan: None,
            cwd: "/".to_string(),
        };
        session.open().await?;
        Ok(session)
    }

    pub fn is_connected(&self) -> bool {
        self.chan.is_some()
    }

    pub fn disconnect(&mut self) {
        if self.chan.take().is_some() {
            debug!(addr = %self.addr, "Disconnected");
        }
    }

    /// Reconnect if the connection has been dropped. Returns `true` when a
    /// new connection was made.
    pub async fn ensure_connected(&mut self) -> Result<bool> {
        if self.chan.is_some() {
            return Ok(false);
        }
        info!(addr = %self.addr, "Connection lost, reconnecting");
        self.open().await?;
        Ok(true)
    }

    async fn open(&mut self) -> Result<()> {
        let limit = self.config.connect_timeout;
        let stream = tokio::time::timeout(limit, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::Timeout(limit))?
            .map_err(Error::transport)?;
        let _ = stream.set_nodelay(true);
        self.chan = Some(Channel::new(stream, Some(self.config.read_timeout)));
        debug!(addr = %self.addr, "Connected");
        Ok(())
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Resolve `arg` against the current remote directory.
    pub fn resolve(&self, arg: &str) -> String {
        let arg = arg.trim();
        if arg.is_empty() || arg == "." {
            return self.cwd.clone();
        }
        if arg.starts_with('/') {
            return arg.to_string();
        }
        if arg == ".." {
            return parent_of(&self.cwd);
        }
        format!("{}/{arg}", self.cwd.trim_end_matches('/'))
    }

    /// Move the remote working directory after checking the target lists.
    pub async fn change_dir(&mut self, arg: &str) -> Result<&str> {
        let mut target = self.resolve(arg);
        if !target.ends_with('/') {
            target.push('/');
        }
        self.list(&target).await?;
        self.cwd = target;
        Ok(&self.cwd)
    }

    pub async fn list(&mut self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let path = self.resolve(path);
        let payload = self.exchange(&Command::List { path }).await?.into_payload()?;
        parse_listing(&payload)
    }

    /// Fetch a remote file into `local`, returning the byte count.
    pub async fn download(&mut self, remote: &str, local: impl AsRef<Path>) -> Result<u64> {
        let local = local.as_ref();
        let path = self.resolve(remote);
        let payload = self
            .exchange(&Command::Download { path })
            .await?
            .into_payload()?;
        let size: u64 = match payload.trim().parse() {
            Ok(size) => size,
            Err(_) => {
                self.disconnect();
                return Err(Error::Transport(format!("bad download size {payload:?}")));
            }
        };

        match create_local(local).await {
            Ok(mut file) => self.receive(&mut file, size).await,
            Err(e) => {
                // keep the connection aligned before reporting the local failure
                self.receive(&mut tokio::io::sink(), size).await?;
                Err(e)
            }
        }
    }

    /// Send a local file to `remote`, returning the byte count.
    pub async fn upload(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<u64> {
        let local = local.as_ref();
        let meta = fs::metadata(local)
            .await
            .map_err(|e| Error::request(format!("{}: {e}", local.display())))?;
        if !meta.is_file() {
            return Err(Error::request(format!("{} is not a file", local.display())));
        }
        let mut file = File::open(local)
            .await
            .map_err(|e| Error::request(format!("{}: {e}", local.display())))?;
        let size = meta.len();

        let path = self.resolve(remote);
        self.exchange(&Command::Upload { path, size })
            .await?
            .into_payload()?;

        let chan = self.chan.as_mut().ok_or(Error::Closed)?;
        let outcome = async {
            transfer::send_exactly(&mut file, chan, size).await?;
            chan.recv_response().await
        }
        .await;
        match outcome {
            Ok(resp) => {
                resp.into_payload()?;
                Ok(size)
            }
            Err(e) => {
                if e.is_transport() {
                    self.disconnect();
                }
                Err(e)
            }
        }
    }

    pub async fn delete(&mut self, path: &str) -> Result<()> {
        let path = self.resolve(path);
        self.exchange(&Command::Delete { path }).await?.into_payload()?;
        Ok(())
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = self.resolve(path);
        self.exchange(&Command::Mkdir { path }).await?.into_payload()?;
        Ok(())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        self.exchange(&Command::Rename { from, to }).await?.into_payload()?;
        Ok(())
    }

    /// One command/response exchange, delivered at most once.
    ///
    /// A held connection the server has already closed is replaced before
    /// sending. The command is resent only when its frame could not be written
    /// on a reused connection. Once written, a lost reply is surfaced as an
    /// error: the server may already have acted on the command.
    async fn exchange(&mut self, cmd: &Command) -> Result<Response> {
        let line = cmd.to_line()?;
        self.drop_if_closed();
        let fresh = self.ensure_connected().await?;
        debug!(command = cmd.tag(), "Sending command");

        if let Err(e) = self.send(&line).await {
            if fresh || !e.is_transport() {
                return Err(e);
            }
            warn!(error = %e, "Stale connection, resending once");
            self.open().await?;
            self.send(&line).await?;
        }

        let chan = self.chan.as_mut().ok_or(Error::Closed)?;
        let outcome = chan.recv_response().await;
        if matches!(&outcome, Err(e) if e.is_transport()) {
            self.disconnect();
        }
        outcome
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        let chan = self.chan.as_mut().ok_or(Error::Closed)?;
        let outcome = chan.send_command(line).await;
        if outcome.is_err() {
            self.disconnect();
        }
        outcome
    }

    /// Drop the held connection if the server has closed it or sent
    /// something unsolicited.
    fn drop_if_closed(&mut self) {
        let Some(chan) = &self.chan else {
            return;
        };
        let mut byte = [0u8; 1];
        let polled = chan.get_ref().try_read(&mut byte);
        match polled {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Ok(0) => {
                debug!(addr = %self.addr, "Server closed the connection");
                self.disconnect();
            }
            Ok(_) => {
                warn!(addr = %self.addr, "Unexpected bytes on idle connection");
                self.disconnect();
            }
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "Idle connection failed");
                self.disconnect();
            }
        }
    }

    async fn receive<W>(&mut self, sink: &mut W, size: u64) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let chan = self.chan.as_mut().ok_or(Error::Closed)?;
        let outcome = transfer::receive_exactly(chan, sink, size).await;
        if matches!(&outcome, Err(e) if e.is_transport()) {
            self.disconnect();
        }
        outcome
    }
}

async fn create_local(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Server(format!("{}: {e}", parent.display())))?;
    }
    File::create(path)
        .await
        .map_err(|e| Error::Server(format!("{}: {e}", path.display())))
}

fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..=idx].to_string(),
        None => "/".to_string(),
    }
}
