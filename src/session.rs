//! Runs one chat session from an established channel to a final report.
//!
//! The supervisor spawns the send loop and the receive loop over a shared [`PeerChannel`] and
//! then waits on a [`TerminationGate`]. Whichever loop trips the gate first decides why the
//! session ended; every later attempt is ignored. Shutdown is always the same sequence: close the
//! channel (which unblocks the other loop), wait for both loops, drain the transcript, report.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use futures::channel::mpsc::UnboundedSender;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::message::Role;
use crate::peer::{self, PeerChannel, PeerListener};
use crate::receiver::ReceiveLoop;
use crate::sender::SendLoop;
use crate::transcript::{Transcript, TranscriptStats};

/// Where the session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum Termination {
    /// The operator typed the sentinel.
    LocalExit,
    /// The peer sent the sentinel.
    PeerExit,
    /// The peer closed the connection without sending the sentinel.
    PeerDisconnected,
    /// Local input ran out.
    InputClosed,
    /// Reading or writing the channel failed.
    Failed(ChatError),
}

impl Termination {
    /// False only when the transport broke underneath us.
    pub fn is_clean(&self) -> bool {
        !matches!(self, Termination::Failed(_))
    }

    /// The line shown to the operator when the session is over.
    pub fn status(&self, role: Role) -> String {
        let peer = role.peer();
        match self {
            Termination::LocalExit => "Successfully Disconnected!".to_string(),
            Termination::PeerExit => format!("{} Disconnected!", peer),
            Termination::PeerDisconnected => {
                format!("{} closed the connection without saying goodbye.", peer)
            }
            Termination::InputClosed => "Input closed, Disconnected.".to_string(),
            Termination::Failed(err) if err.is_peer_disconnect() => {
                format!("Lost the connection to {}: {}", peer, err)
            }
            Termination::Failed(err) => format!("Local transport fault: {}", err),
        }
    }
}

/// Single-shot decision on how the session ends.
#[derive(Debug, Default)]
pub struct TerminationGate {
    fired: AtomicBool,
    reason: Mutex<Option<Termination>>,
    token: CancellationToken,
}

impl TerminationGate {
    pub fn new() -> TerminationGate {
        TerminationGate::default()
    }

    /// Records `reason` if nobody got here first. Returns whether this call won.
    pub fn trigger(&self, reason: Termination) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once some loop has triggered the gate.
    pub async fn fired(&self) {
        self.token.cancelled().await
    }

    pub fn take_reason(&self) -> Option<Termination> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Everything the hosting program gets to see of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bound and waiting for the peer.
    Listening(SocketAddr),
    /// Dialing the peer.
    Connecting(String),
    /// Channel established, both loops are about to start.
    Connected {
        role: Role,
        peer: Option<SocketAddr>,
    },
    /// A local line went out.
    Sent(String),
    /// A line from the peer.
    Received { from: Role, text: String },
    /// A local line that could not be sent.
    Rejected { reason: String },
    /// The session is over. Always the last event.
    Closed { status: String, clean: bool },
}

pub type EventSender = UnboundedSender<SessionEvent>;

pub(crate) fn emit(events: &EventSender, event: SessionEvent) {
    // Nobody listening is fine, the session does not depend on its audience.
    let _ = events.unbounded_send(event);
}

/// Final word on a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub role: Role,
    pub state: SessionState,
    pub termination: Termination,
    pub sent: usize,
    pub received: usize,
    pub transcript: TranscriptStats,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.termination.is_clean()
    }

    pub fn status(&self) -> String {
        self.termination.status(self.role)
    }
}

/// One established connection and the two loops that will run over it.
pub struct Session {
    role: Role,
    channel: Arc<PeerChannel>,
    transcript: Transcript,
    events: EventSender,
    state: SessionState,
}

impl Session {
    pub fn new(
        role: Role,
        channel: PeerChannel,
        transcript: Transcript,
        events: EventSender,
    ) -> Session {
        Session {
            role,
            channel: Arc::new(channel),
            transcript,
            events,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        info!(role = %self.role, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Runs both loops until one of them ends the session, then shuts everything down.
    pub async fn run<I>(mut self, input: I) -> SessionReport
    where
        I: Stream<Item = io::Result<String>> + Send + Unpin + 'static,
    {
        self.advance(SessionState::Active);
        emit(
            &self.events,
            SessionEvent::Connected {
                role: self.role,
                peer: self.channel.peer_addr(),
            },
        );

        let gate = Arc::new(TerminationGate::new());
        let send_task = tokio::spawn(
            SendLoop::new(
                self.role,
                self.channel.clone(),
                gate.clone(),
                self.transcript.handle(),
                self.events.clone(),
            )
            .run(input),
        );
        let receive_task = tokio::spawn(
            ReceiveLoop::new(
                self.role,
                self.channel.clone(),
                gate.clone(),
                self.transcript.handle(),
                self.events.clone(),
            )
            .run(),
        );

        gate.fired().await;
        self.advance(SessionState::Closing);

        // Closing the channel is what gets the losing loop off its blocking call.
        self.channel.close().await;
        let sent = send_task.await.unwrap_or_else(|err| {
            warn!(%err, "send loop did not finish cleanly");
            0
        });
        let received = receive_task.await.unwrap_or_else(|err| {
            warn!(%err, "receive loop did not finish cleanly");
            0
        });
        // Both loops are gone, so no handle can keep the writer alive any more.
        let transcript = std::mem::replace(&mut self.transcript, Transcript::disabled())
            .close()
            .await;

        let termination = gate
            .take_reason()
            .unwrap_or(Termination::Failed(ChatError::ChannelClosed));
        self.advance(SessionState::Closed);

        let report = SessionReport {
            role: self.role,
            state: self.state,
            termination,
            sent,
            received,
            transcript,
        };
        if report.is_clean() {
            info!(status = %report.status(), sent, received, "session closed");
        } else {
            warn!(status = %report.status(), sent, received, "session failed");
        }
        emit(
            &self.events,
            SessionEvent::Closed {
                status: report.status(),
                clean: report.is_clean(),
            },
        );
        report
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("peer", &self.channel.peer_addr())
            .field("state", &self.state)
            .finish()
    }
}

/// Establishes the channel described by `config` and runs a session over it.
///
/// A failure to connect (or to bind and accept) is returned as [`ChatError::Connection`] and no
/// loop is ever started.
pub async fn start<I>(
    config: &ChatConfig,
    input: I,
    events: EventSender,
) -> Result<SessionReport, ChatError>
where
    I: Stream<Item = io::Result<String>> + Send + Unpin + 'static,
{
    let channel = match config.role {
        Role::Listener => {
            let listener = PeerListener::bind(&config.addr).await?;
            emit(&events, SessionEvent::Listening(listener.local_addr()?));
            listener.accept(config.max_line_length).await?
        }
        Role::Connector => {
            emit(&events, SessionEvent::Connecting(config.addr.clone()));
            peer::connect(&config.addr, config.connect_timeout, config.max_line_length).await?
        }
    };

    let transcript = Transcript::spawn(config.transcript.open_sinks(config.role, Local::now()));
    Ok(Session::new(config.role, channel, transcript, events)
        .run(input)
        .await)
}
