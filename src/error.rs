//! Error types shared by the channel, the loops and the supervisor.

use std::io;

use thiserror::Error;

/// Errors that can end (or prevent) a chat session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The channel never became active. Fatal, no retry.
    #[error("could not establish the connection with {addr}: {source}")]
    Connection {
        /// Address we tried to bind to or connect with.
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Reading from the peer failed for a reason other than a clean close.
    #[error("failed to read from peer: {0}")]
    ChannelRead(#[source] io::Error),

    /// Writing to the peer failed.
    #[error("failed to write to peer: {0}")]
    ChannelWrite(#[source] io::Error),

    /// The channel was closed before or during the operation.
    #[error("channel is closed")]
    ChannelClosed,

    /// A local line that cannot be put on the wire as one line.
    #[error("invalid line: {0}")]
    InvalidLine(String),
}

impl ChatError {
    /// Whether the failure came from the remote end going away, as opposed to a
    /// local transport fault.
    pub fn is_peer_disconnect(&self) -> bool {
        match self {
            Self::ChannelRead(err) | Self::ChannelWrite(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Transcript sink failures. These never end a session.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The underlying file could not be opened or written.
    #[error("transcript i/o error: {0}")]
    Io(#[from] io::Error),

    /// The sink lock was poisoned by a panicking writer.
    #[error("transcript sink is unavailable")]
    Poisoned,
}
