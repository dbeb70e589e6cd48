//! Defines IO with a chat peer.
//!
//! A [`PeerChannel`] owns both halves of one established byte stream. The read half and the write
//! half sit behind their own locks so the receive loop and the send loop never wait on each
//! other. Closing is a one-shot: the first caller shuts the stream down, everyone else gets a
//! no-op.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::message::{validate_line, LineCodec};

type LineReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, LineCodec>;
type LineWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LineCodec>;

/// Fills and drains one stream, a line at a time.
pub struct PeerChannel {
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<LineWriter>>,
    open: AtomicBool,
    /// Fired on close so reads and writes in flight give up instead of holding the halves.
    closing: CancellationToken,
    peer_addr: Option<SocketAddr>,
    max_length: usize,
}

impl PeerChannel {
    /// Wraps an already established stream.
    pub fn new<S>(stream: S, peer_addr: Option<SocketAddr>, max_length: usize) -> PeerChannel
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);

        PeerChannel {
            reader: Mutex::new(Some(FramedRead::new(read_half, LineCodec::new(max_length)))),
            writer: Mutex::new(Some(FramedWrite::new(write_half, LineCodec::new(max_length)))),
            open: AtomicBool::new(true),
            closing: CancellationToken::new(),
            peer_addr,
            max_length,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Sends one line to the peer.
    pub async fn write_line(&self, text: &str) -> Result<(), ChatError> {
        validate_line(text, self.max_length)?;
        if !self.is_open() {
            return Err(ChatError::ChannelClosed);
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ChatError::ChannelClosed)?;
        tokio::select! {
            _ = self.closing.cancelled() => Err(ChatError::ChannelClosed),
            sent = writer.send(text) => sent.map_err(ChatError::ChannelWrite),
        }
    }

    /// Waits for the next line from the peer.
    ///
    /// `Ok(None)` means the peer closed its side cleanly. A close on this side while waiting
    /// returns [`ChatError::ChannelClosed`].
    pub async fn read_line(&self) -> Result<Option<String>, ChatError> {
        if !self.is_open() {
            return Err(ChatError::ChannelClosed);
        }

        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(ChatError::ChannelClosed)?;
        tokio::select! {
            _ = self.closing.cancelled() => Err(ChatError::ChannelClosed),
            frame = reader.next() => match frame {
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(err)) => Err(ChatError::ChannelRead(err)),
                None => Ok(None),
            },
        }
    }

    /// Releases the stream. Only the first call does anything and only it returns true.
    pub async fn close(&self) -> bool {
        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.closing.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            // The peer may already be gone, a failed shutdown changes nothing for us.
            if let Err(err) = SinkExt::<&str>::close(&mut writer).await {
                debug!(%err, "shutdown of write half failed");
            }
        }
        drop(self.reader.lock().await.take());

        debug!(peer = ?self.peer_addr, "channel closed");
        true
    }
}

/// Accepts exactly one peer on a bound port.
pub struct PeerListener {
    inner: TcpListener,
    addr: String,
}

impl PeerListener {
    pub async fn bind(addr: &str) -> Result<PeerListener, ChatError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ChatError::Connection {
                addr: addr.to_string(),
                source,
            })?;
        info!(addr, "listening for a peer");
        Ok(PeerListener {
            inner,
            addr: addr.to_string(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        self.inner
            .local_addr()
            .map_err(|source| ChatError::Connection {
                addr: self.addr.clone(),
                source,
            })
    }

    /// Waits for the first peer and hands back its channel. The listener is consumed, later
    /// connection attempts are refused.
    pub async fn accept(self, max_length: usize) -> Result<PeerChannel, ChatError> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|source| ChatError::Connection {
                addr: self.addr.clone(),
                source,
            })?;
        info!(%peer, "peer connected");
        Ok(channel_for(stream, Some(peer), max_length))
    }
}

/// Dials a listening peer, giving up after `timeout`.
pub async fn connect(
    addr: &str,
    timeout: Duration,
    max_length: usize,
) -> Result<PeerChannel, ChatError> {
    let connection_error = |source: std::io::Error| ChatError::Connection {
        addr: addr.to_string(),
        source,
    };

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => stream.map_err(connection_error)?,
        Err(_) => {
            return Err(connection_error(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no answer within {timeout:?}"),
            )))
        }
    };
    let peer = stream.peer_addr().ok();
    info!(?peer, "connected to peer");
    Ok(channel_for(stream, peer, max_length))
}

fn channel_for(stream: TcpStream, peer: Option<SocketAddr>, max_length: usize) -> PeerChannel {
    // Chat lines are tiny and interactive, don't let Nagle hold them back.
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "could not disable Nagle's algorithm");
    }
    PeerChannel::new(stream, peer, max_length)
}
