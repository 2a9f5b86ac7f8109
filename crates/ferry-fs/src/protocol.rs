//! Wire protocol for ferry-fs
//!
//! Wire format: [1 byte tag][4 byte length BE][body]
//!
//! Control lines, responses and payload chunks all travel as frames read by a
//! single [`Channel`], so payload bytes can never be consumed by a line reader.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Frame tags
pub const MSG_COMMAND: u8 = 1; // client → server, UTF-8 `TAG|arg1|arg2`
pub const MSG_RESPONSE: u8 = 20; // server → client, MessagePack `Response`
pub const MSG_DATA: u8 = 30; // either direction, raw payload chunk

/// Largest body accepted in a single frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Field separator inside a control line
pub const DELIMITER: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Status {
    Ok = 200,
    BadRequest = 400,
    ServerError = 500,
}

impl Status {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Status {
    type Error = String;

    fn try_from(code: u16) -> std::result::Result<Self, Self::Error> {
        match code {
            200 => Ok(Self::Ok),
            400 => Ok(Self::BadRequest),
            500 => Ok(Self::ServerError),
            other => Err(format!("unknown status code {other}")),
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        status.code()
    }
}

/// One reply to one command. UPLOAD produces two of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
    #[serde(default)]
    pub payload: String,
}

impl Response {
    pub fn ok(message: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
            payload: payload.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
            payload: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Turn a non-200 reply into the matching error, yielding the payload otherwise.
    pub fn into_payload(self) -> Result<String> {
        match self.status {
            Status::Ok => Ok(self.payload),
            Status::BadRequest => Err(Error::Request(self.message)),
            Status::ServerError => Err(Error::Server(self.message)),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            self.status.code(),
            self.message,
            self.payload
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Immediate child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntryKind::File => "FILE",
            EntryKind::Directory => "DIR",
        };
        write!(f, "{}/{kind}", self.name)
    }
}

impl FromStr for DirectoryEntry {
    type Err = Error;

    fn from_str(item: &str) -> Result<Self> {
        let (name, kind) = item
            .rsplit_once('/')
            .ok_or_else(|| Error::Transport(format!("malformed listing entry {item:?}")))?;
        let kind = match kind {
            "DIR" => EntryKind::Directory,
            "FILE" => EntryKind::File,
            _ => return Err(Error::Transport(format!("malformed listing entry {item:?}"))),
        };
        Ok(Self {
            name: name.to_string(),
            kind,
        })
    }
}

/// Comma-join entries into a LIST payload.
pub fn format_listing(entries: &[DirectoryEntry]) -> String {
    entries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_listing(payload: &str) -> Result<Vec<DirectoryEntry>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    payload
        .split(',')
        .map(|item| item.parse::<DirectoryEntry>())
        .collect()
}

/// Framed duplex connection shared by the control and data channels.
pub struct Channel<S> {
    stream: S,
    read_timeout: Option<Duration>,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, read_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            read_timeout,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub async fn send_command(&mut self, line: &str) -> Result<()> {
        self.write_frame(MSG_COMMAND, line.as_bytes()).await
    }

    /// Next control line, or `None` once the peer has closed cleanly.
    pub async fn recv_command(&mut self) -> Result<Option<String>> {
        match self.read_frame().await? {
            None => Ok(None),
            Some((MSG_COMMAND, body)) => Ok(Some(String::from_utf8_lossy(&body).into_owned())),
            Some((tag, _)) => Err(Error::Transport(format!(
                "expected command frame, got tag {tag}"
            ))),
        }
    }

    pub async fn send_response(&mut self, resp: &Response) -> Result<()> {
        let data = rmp_serde::to_vec_named(resp)?;
        self.write_frame(MSG_RESPONSE, &data).await
    }

    pub async fn recv_response(&mut self) -> Result<Response> {
        match self.read_frame().await? {
            None => Err(Error::Closed),
            Some((MSG_RESPONSE, body)) => Ok(rmp_serde::from_slice(&body)?),
            Some((tag, _)) => Err(Error::Transport(format!(
                "expected response frame, got tag {tag}"
            ))),
        }
    }

    pub async fn send_data(&mut self, chunk: &[u8]) -> Result<()> {
        self.write_frame(MSG_DATA, chunk).await
    }

    pub async fn recv_data(&mut self) -> Result<Vec<u8>> {
        match self.read_frame().await? {
            None => Err(Error::Closed),
            Some((MSG_DATA, body)) => Ok(body),
            Some((tag, _)) => Err(Error::Transport(format!(
                "expected data frame, got tag {tag}"
            ))),
        }
    }

    async fn write_frame(&mut self, tag: u8, body: &[u8]) -> Result<()> {
        if body.len() > MAX_FRAME_LEN {
            return Err(Error::Transport(format!(
                "frame too large: {} bytes (max {MAX_FRAME_LEN})",
                body.len()
            )));
        }
        let mut frame = Vec::with_capacity(5 + body.len());
        frame.push(tag);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        self.stream
            .write_all(&frame)
            .await
            .map_err(Error::transport)?;
        self.stream.flush().await.map_err(Error::transport)
    }

    async fn read_frame(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_frame_untimed())
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.read_frame_untimed().await,
        }
    }

    async fn read_frame_untimed(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        let mut tag = [0u8; 1];
        if self.stream.read(&mut tag).await.map_err(Error::transport)? == 0 {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(Error::transport)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::Transport(format!(
                "frame too large: {len} bytes (max {MAX_FRAME_LEN})"
            )));
        }

        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(Error::transport)?;
        Ok(Some((tag[0], body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_format_and_parse() {
        let entries = vec![
            DirectoryEntry {
                name: "docs".into(),
                kind: EntryKind::Directory,
            },
            DirectoryEntry {
                name: "a.txt".into(),
                kind: EntryKind::File,
            },
        ];
        let payload = format_listing(&entries);
        assert_eq!(payload, "docs/DIR,a.txt/FILE");
        assert_eq!(parse_listing(&payload).unwrap(), entries);
        assert!(parse_listing("").unwrap().is_empty());
        assert!(parse_listing("broken").is_err());
    }

    #[test]
    fn response_maps_status_to_error() {
        let resp = Response {
            status: Status::BadRequest,
            message: "path does not exist".into(),
            payload: String::new(),
        };
        assert_eq!(resp.to_string(), "400|path does not exist|");
        assert!(matches!(resp.into_payload(), Err(Error::Request(m)) if m == "path does not exist"));
        assert_eq!(Response::ok("ok", "12").into_payload().unwrap(), "12");
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = Channel::new(a, None);
        let mut server = Channel::new(b, None);

        client.send_command("LIST|/").await.unwrap();
        client.send_data(b"raw").await.unwrap();
        assert_eq!(server.recv_command().await.unwrap().as_deref(), Some("LIST|/"));
        assert_eq!(server.recv_data().await.unwrap(), b"raw");

        server.send_response(&Response::ok("ok", "x/FILE")).await.unwrap();
        let resp = client.recv_response().await.unwrap();
        assert_eq!(resp.payload, "x/FILE");
        assert!(resp.is_ok());

        drop(client);
        assert!(server.recv_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unexpected_frame_is_transport_error() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = Channel::new(a, None);
        let mut server = Channel::new(b, None);

        client.send_data(b"oops").await.unwrap();
        let err = server.recv_command().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn read_timeout_expires() {
        let (a, _b) = tokio::io::duplex(1024);
        let mut client = Channel::new(a, Some(Duration::from_millis(20)));
        assert!(matches!(client.recv_response().await, Err(Error::Timeout(_))));
    }
}
