//! Terminal side of a session: operator lines in, rendered session events out.
//!
//! Stdin is read on a dedicated thread rather than through tokio, a blocked interactive read
//! would otherwise keep the runtime from shutting down once the session is over.

use std::io::{self, BufRead};
use std::thread;

use futures::channel::mpsc::{self, UnboundedReceiver};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::session::SessionEvent;

pub const PROMPT: &str = ">> ";

/// Streams stdin line by line. The stream ends at end of input or after the first read error.
pub fn stdin_lines() -> UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded();
    let spawned = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let failed = line.is_err();
                let line = line.map(|mut line| {
                    if line.ends_with('\r') {
                        line.pop();
                    }
                    line
                });
                if tx.unbounded_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        // The sender went down with the closure, so the session sees input as closed.
        warn!(%err, "could not start the stdin reader");
    }
    rx
}

/// Formats one event the way the operator sees it.
pub fn render(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Listening(addr) => format!("{PROMPT}Waiting for request on {addr}...\n"),
        SessionEvent::Connecting(addr) => format!("{PROMPT}Sending a request to {addr}...\n"),
        SessionEvent::Connected { peer: Some(peer), .. } => {
            format!("{PROMPT}[Connection Established with {peer}]\n{PROMPT}\n")
        }
        SessionEvent::Connected { peer: None, .. } => {
            format!("{PROMPT}[Connection Established]\n{PROMPT}\n")
        }
        SessionEvent::Sent(_) => format!("{PROMPT}[Message Sent]\n"),
        SessionEvent::Received { from, text } => format!("\n{from} : {text}\n"),
        SessionEvent::Rejected { reason } => format!("{PROMPT}[Message Not Sent] {reason}\n"),
        SessionEvent::Closed { status, .. } => format!("\n{PROMPT}\n{PROMPT}{status}\n"),
    }
}

/// Writes session events to an output until the session closes.
pub struct Console<W> {
    out: W,
}

impl Console<tokio::io::Stdout> {
    pub fn stdout() -> Console<tokio::io::Stdout> {
        Console::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> Console<W> {
    pub fn new(out: W) -> Console<W> {
        Console { out }
    }

    /// Renders events until the stream ends, putting the prompt back after each one.
    pub async fn run(mut self, mut events: UnboundedReceiver<SessionEvent>) -> io::Result<W> {
        while let Some(event) = events.next().await {
            self.out.write_all(render(&event).as_bytes()).await?;
            match event {
                SessionEvent::Closed { .. } => {
                    self.out.flush().await?;
                    break;
                }
                SessionEvent::Listening(_) | SessionEvent::Connecting(_) => {}
                _ => self.out.write_all(PROMPT.as_bytes()).await?,
            }
            self.out.flush().await?;
        }
        Ok(self.out)
    }
}
