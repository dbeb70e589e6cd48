//! Operator input to the wire.

use std::io;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::message::{is_sentinel, Role};
use crate::peer::PeerChannel;
use crate::session::{emit, EventSender, SessionEvent, Termination, TerminationGate};
use crate::transcript::TranscriptHandle;

/// Forwards local lines to the peer until the operator says `exit`, input runs dry, the channel
/// breaks, or the other loop ends the session.
pub struct SendLoop {
    role: Role,
    channel: Arc<PeerChannel>,
    gate: Arc<TerminationGate>,
    transcript: TranscriptHandle,
    events: EventSender,
    sent: usize,
}

impl SendLoop {
    pub fn new(
        role: Role,
        channel: Arc<PeerChannel>,
        gate: Arc<TerminationGate>,
        transcript: TranscriptHandle,
        events: EventSender,
    ) -> SendLoop {
        SendLoop {
            role,
            channel,
            gate,
            transcript,
            events,
            sent: 0,
        }
    }

    /// Runs to completion and returns how many chat lines went out.
    pub async fn run<I>(mut self, mut input: I) -> usize
    where
        I: Stream<Item = io::Result<String>> + Unpin,
    {
        if let Some(reason) = self.forward(&mut input).await {
            if self.gate.trigger(reason) {
                debug!(role = %self.role, "send loop ended the session");
            }
        }
        self.sent
    }

    /// `None` means the session was already ending when we noticed.
    async fn forward<I>(&mut self, input: &mut I) -> Option<Termination>
    where
        I: Stream<Item = io::Result<String>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = self.gate.fired() => return None,
                next = input.next() => next,
            };
            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    warn!(%err, "reading local input failed");
                    return Some(Termination::InputClosed);
                }
                None => return Some(Termination::InputClosed),
            };

            if is_sentinel(&line) {
                // The peer has to see the sentinel too, otherwise only our side stops.
                return match self.channel.write_line(&line).await {
                    // No await between here and the gate firing in `run`, so the peer's close
                    // in reply to this line can't be recorded as a disconnect first.
                    Ok(()) => Some(Termination::LocalExit),
                    Err(_) if self.gate.is_fired() => None,
                    Err(err) => {
                        warn!(%err, "could not pass the sentinel on to the peer");
                        Some(Termination::Failed(err))
                    }
                };
            }

            match self.channel.write_line(&line).await {
                Ok(()) => {
                    self.sent += 1;
                    self.transcript.append(self.role, &line);
                    emit(&self.events, SessionEvent::Sent(line));
                }
                Err(ChatError::InvalidLine(reason)) => {
                    emit(&self.events, SessionEvent::Rejected { reason });
                }
                Err(_) if self.gate.is_fired() => return None,
                Err(err) => return Some(Termination::Failed(err)),
            }
        }
    }
}
