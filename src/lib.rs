//! # A two-peer, line-oriented chat over one TCP connection.
//!
//! One peer listens, the other connects. Once the connection is up each side runs two loops at
//! the same time:
//!
//! 1. The send loop reads what the operator types and writes it to the peer, one line per
//!    message.
//! 2. The receive loop reads the peer's lines and shows them locally.
//!
//! Typing `exit` (any case) ends the session on both sides: the line is still sent, so the peer's
//! receive loop sees it and stops as well. It is never shown or recorded as a chat message. A
//! peer hanging up or the connection breaking ends the session the same way.
//!
//! Both loops can optionally record what was said to a text log and to an HTML page.
//!
//! Architecture:
//!
//!  TcpListener / TcpStream::connect
//!     v
//! +-----------+             +-------------+   SendLoop  <-- stdin lines (Terminal)
//! | TcpStream |<-LineCodec->| PeerChannel |
//! +-----------+             +-------------+   ReceiveLoop --> SessionEvents --> Console (stdout)
//!                                  ^                |  |
//!                                  |                |  +--> TranscriptHandle --> Transcript
//!                                  |                |                          (log, html)
//!                           +-------------+         |
//!                           |   Session   |<--------+ TerminationGate (first trigger wins)
//!                           +-------------+
//!
//! [`session::start`] is the one-call entry point; [`session::Session`] runs over a channel you
//! established yourself. Either way the caller gets a [`session::SessionReport`] back, the
//! process is never exited from inside the library.

pub mod config;
pub mod error;
pub mod html;
pub mod message;
pub mod peer;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod terminal;
pub mod transcript;

pub use config::{ChatConfig, TranscriptConfig};
pub use error::{ChatError, SinkError};
pub use message::{Role, TranscriptEntry, SENTINEL};
pub use peer::{PeerChannel, PeerListener};
pub use session::{Session, SessionEvent, SessionReport, SessionState, Termination};
pub use transcript::{MemorySink, Transcript, TranscriptSink};
