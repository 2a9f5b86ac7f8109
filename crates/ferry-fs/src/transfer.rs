//! Exact-length payload streaming between a local stream and a [`Channel`]

use crate::error::{Error, Result};
use crate::protocol::Channel;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const CHUNK_SIZE: usize = 8 * 1024;

/// Read `count` bytes from `source` and emit them as DATA frames.
pub async fn send_exactly<R, S>(source: &mut R, chan: &mut Channel<S>, count: u64) -> Result<u64>
where
    R: AsyncRead + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = count;

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = source
            .read(&mut buf[..want])
            .await
            .map_err(Error::transport)?;
        if n == 0 {
            return Err(Error::Transport(format!(
                "source ended after {} of {count} bytes",
                count - remaining
            )));
        }
        chan.send_data(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(count)
}

/// Consume exactly `count` payload bytes from `chan` into `sink`.
///
/// A failing sink does not stop the drain: the remaining frames are still read
/// so the next control frame lines up, and the sink error is returned as a
/// server error afterwards.
pub async fn receive_exactly<W, S>(chan: &mut Channel<S>, sink: &mut W, count: u64) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut remaining = count;
    let mut sink_error = None;

    while remaining > 0 {
        let chunk = chan.recv_data().await?;
        if chunk.is_empty() || chunk.len() as u64 > remaining {
            return Err(Error::Transport(format!(
                "data frame of {} bytes with {remaining} remaining",
                chunk.len()
            )));
        }
        remaining -= chunk.len() as u64;

        if sink_error.is_none() {
            if let Err(e) = sink.write_all(&chunk).await {
                sink_error = Some(e);
            }
        }
    }

    if sink_error.is_none() {
        if let Err(e) = sink.flush().await {
            sink_error = Some(e);
        }
    }
    match sink_error {
        Some(e) => Err(Error::server(e)),
        None => Ok(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn pair() -> (Channel<tokio::io::DuplexStream>, Channel<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        (Channel::new(a, None), Channel::new(b, None))
    }

    #[tokio::test]
    async fn copies_across_chunk_boundaries() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 123).map(|i| (i % 251) as u8).collect();
        let (mut tx, mut rx) = pair();

        let len = data.len() as u64;
        let mut source = data.as_slice();
        let sent = send_exactly(&mut source, &mut tx, len).await.unwrap();
        assert_eq!(sent, len);

        let mut out = Vec::new();
        receive_exactly(&mut rx, &mut out, len).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn zero_bytes_sends_nothing() {
        let (mut tx, mut rx) = pair();
        let mut source: &[u8] = b"";
        assert_eq!(send_exactly(&mut source, &mut tx, 0).await.unwrap(), 0);

        let mut out = Vec::new();
        assert_eq!(receive_exactly(&mut rx, &mut out, 0).await.unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn short_source_is_transport_error() {
        let (mut tx, _rx) = pair();
        let mut source: &[u8] = b"only ten b";
        let err = send_exactly(&mut source, &mut tx, 20).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn peer_closing_early_is_transport_error() {
        let (mut tx, mut rx) = pair();
        tx.send_data(b"half").await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = receive_exactly(&mut rx, &mut out, 8).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    struct FailingSink;

    impl AsyncWrite for FailingSink {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failing_sink_still_drains() {
        let (mut tx, mut rx) = pair();
        let data = vec![7u8; CHUNK_SIZE + 10];
        let mut source = data.as_slice();
        send_exactly(&mut source, &mut tx, data.len() as u64).await.unwrap();
        tx.send_command("LIST|/").await.unwrap();

        let err = receive_exactly(&mut rx, &mut FailingSink, data.len() as u64)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server(m) if m.contains("disk full")));
        assert_eq!(rx.recv_command().await.unwrap().as_deref(), Some("LIST|/"));
    }
}
