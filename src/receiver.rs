//! The wire to local output.

use std::sync::Arc;

use tracing::debug;

use crate::message::{is_sentinel, Role};
use crate::peer::PeerChannel;
use crate::session::{emit, EventSender, SessionEvent, Termination, TerminationGate};
use crate::transcript::TranscriptHandle;

/// Reads the peer's lines and reports them until the peer says `exit`, hangs up, the channel
/// breaks, or the other loop ends the session.
pub struct ReceiveLoop {
    role: Role,
    channel: Arc<PeerChannel>,
    gate: Arc<TerminationGate>,
    transcript: TranscriptHandle,
    events: EventSender,
    received: usize,
}

impl ReceiveLoop {
    pub fn new(
        role: Role,
        channel: Arc<PeerChannel>,
        gate: Arc<TerminationGate>,
        transcript: TranscriptHandle,
        events: EventSender,
    ) -> ReceiveLoop {
        ReceiveLoop {
            role,
            channel,
            gate,
            transcript,
            events,
            received: 0,
        }
    }

    /// Runs to completion and returns how many chat lines came in.
    pub async fn run(mut self) -> usize {
        if let Some(reason) = self.forward().await {
            if self.gate.trigger(reason) {
                debug!(role = %self.role, "receive loop ended the session");
            }
        }
        self.received
    }

    async fn forward(&mut self) -> Option<Termination> {
        let peer = self.role.peer();
        loop {
            let read = self.channel.read_line().await;
            // Whatever this read produced, a session that is already closing does not care.
            if self.gate.is_fired() {
                return None;
            }

            match read {
                Ok(Some(line)) if is_sentinel(&line) => return Some(Termination::PeerExit),
                Ok(Some(line)) => {
                    self.received += 1;
                    self.transcript.append(peer, &line);
                    emit(
                        &self.events,
                        SessionEvent::Received {
                            from: peer,
                            text: line,
                        },
                    );
                }
                Ok(None) => return Some(Termination::PeerDisconnected),
                Err(err) => return Some(Termination::Failed(err)),
            }
        }
    }
}
