//! End-to-end session tests over real loopback TCP.
//!
//! Each peer runs a full `Session` with scripted input and an in-memory transcript. Tests wait
//! on session events rather than on sleeps.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use duplex_chat::config::{ChatConfig, TranscriptConfig};
use duplex_chat::message::DEFAULT_MAX_LINE_LENGTH;
use duplex_chat::peer::{self, PeerChannel, PeerListener};
use duplex_chat::session::{self, Session, SessionEvent, SessionReport, SessionState, Termination};
use duplex_chat::transcript::{MemorySink, Transcript};
use duplex_chat::{ChatError, Role};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const PATIENCE: Duration = Duration::from_secs(10);

/// One side of a running session, driven by the test.
struct Peer {
    input: Option<UnboundedSender<io::Result<String>>>,
    events: UnboundedReceiver<SessionEvent>,
    transcript: MemorySink,
    done: JoinHandle<SessionReport>,
}

impl Peer {
    fn start(role: Role, channel: PeerChannel) -> Peer {
        let transcript = MemorySink::new();
        let (input_tx, input_rx) = mpsc::unbounded();
        let (events_tx, events_rx) = mpsc::unbounded();

        let session = Session::new(
            role,
            channel,
            Transcript::spawn(vec![Box::new(transcript.clone())]),
            events_tx,
        );
        assert_eq!(session.state(), SessionState::Connecting);
        let done = tokio::spawn(session.run(input_rx));

        Peer {
            input: Some(input_tx),
            events: events_rx,
            transcript,
            done,
        }
    }

    fn say(&self, line: &str) {
        self.input
            .as_ref()
            .expect("input already closed")
            .unbounded_send(Ok(line.to_string()))
            .unwrap();
    }

    fn close_input(&mut self) {
        self.input = None;
    }

    async fn next_event(&mut self) -> SessionEvent {
        timeout(PATIENCE, self.events.next())
            .await
            .expect("timed out waiting for a session event")
            .expect("event stream ended early")
    }

    async fn expect_sent(&mut self, expected: &str) {
        loop {
            match self.next_event().await {
                SessionEvent::Sent(line) => {
                    assert_eq!(line, expected);
                    return;
                }
                SessionEvent::Closed { status, .. } => panic!("closed before sending: {status}"),
                _ => {}
            }
        }
    }

    async fn expect_received(&mut self) -> String {
        loop {
            match self.next_event().await {
                SessionEvent::Received { text, .. } => return text,
                SessionEvent::Closed { status, .. } => panic!("closed before receiving: {status}"),
                _ => {}
            }
        }
    }

    /// Waits for the session to end and returns its report plus every event not yet consumed.
    async fn finish(self) -> (SessionReport, Vec<SessionEvent>, MemorySink) {
        let report = timeout(PATIENCE, self.done)
            .await
            .expect("session did not close")
            .expect("session task panicked");
        let rest = self.events.collect().await;
        (report, rest, self.transcript)
    }
}

async fn connected_channels() -> (PeerChannel, PeerChannel) {
    let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let accepting = tokio::spawn(listener.accept(DEFAULT_MAX_LINE_LENGTH));
    let connector = peer::connect(&addr, PATIENCE, DEFAULT_MAX_LINE_LENGTH)
        .await
        .unwrap();
    let listener = accepting.await.unwrap().unwrap();
    (listener, connector)
}

/// Returns (listener side, connector side).
async fn connected_peers() -> (Peer, Peer) {
    let (listener, connector) = connected_channels().await;
    (
        Peer::start(Role::Listener, listener),
        Peer::start(Role::Connector, connector),
    )
}

fn mentions_sentinel(events: &[SessionEvent]) -> bool {
    events.iter().any(|event| match event {
        SessionEvent::Sent(text) | SessionEvent::Received { text, .. } => {
            text.eq_ignore_ascii_case("exit")
        }
        _ => false,
    })
}

#[tokio::test]
async fn hello_hi_exit() {
    let (mut b, mut a) = connected_peers().await;

    a.say("hello");
    a.expect_sent("hello").await;
    assert_eq!(b.expect_received().await, "hello");

    b.say("hi");
    b.expect_sent("hi").await;
    assert_eq!(a.expect_received().await, "hi");

    a.say("exit");
    let (a_report, a_events, a_transcript) = a.finish().await;
    let (b_report, b_events, b_transcript) = b.finish().await;

    assert_eq!(a_report.state, SessionState::Closed);
    assert_eq!(b_report.state, SessionState::Closed);
    assert!(matches!(a_report.termination, Termination::LocalExit));
    assert!(matches!(b_report.termination, Termination::PeerExit));
    assert!(a_report.is_clean() && b_report.is_clean());

    assert_eq!(a_transcript.texts(), vec!["hello", "hi"]);
    assert_eq!(b_transcript.texts(), vec!["hello", "hi"]);
    let roles: Vec<Role> = a_transcript.entries().iter().map(|entry| entry.role).collect();
    assert_eq!(roles, vec![Role::Connector, Role::Listener]);

    assert_eq!((a_report.sent, a_report.received), (1, 1));
    assert_eq!((b_report.sent, b_report.received), (1, 1));
    assert!(!mentions_sentinel(&a_events));
    assert!(!mentions_sentinel(&b_events));

    assert_eq!(
        a_events.last(),
        Some(&SessionEvent::Closed {
            status: "Successfully Disconnected!".to_string(),
            clean: true,
        })
    );
    assert_eq!(
        b_events.last(),
        Some(&SessionEvent::Closed {
            status: "Client Disconnected!".to_string(),
            clean: true,
        })
    );
}

#[tokio::test]
async fn sentinel_from_the_listener_ends_both_sides() {
    let (b, a) = connected_peers().await;

    b.say("ExIt");
    let (b_report, b_events, b_transcript) = b.finish().await;
    let (a_report, a_events, a_transcript) = a.finish().await;

    assert!(matches!(b_report.termination, Termination::LocalExit));
    assert!(matches!(a_report.termination, Termination::PeerExit));
    assert!(b_transcript.entries().is_empty());
    assert!(a_transcript.entries().is_empty());
    assert!(!mentions_sentinel(&a_events));
    assert!(!mentions_sentinel(&b_events));
}

#[tokio::test]
async fn lines_arrive_in_the_order_they_were_sent() {
    let (mut b, a) = connected_peers().await;
    let lines: Vec<String> = (0..200).map(|i| format!("message #{i} <{}>", "x".repeat(i % 17))).collect();

    for line in &lines {
        a.say(line);
    }
    for line in &lines {
        assert_eq!(&b.expect_received().await, line);
    }
    a.say("exit");

    let (a_report, _, a_transcript) = a.finish().await;
    let (b_report, _, b_transcript) = b.finish().await;
    assert_eq!(a_report.sent, 200);
    assert_eq!(b_report.received, 200);
    assert_eq!(a_transcript.texts(), lines);
    assert_eq!(b_transcript.texts(), lines);
}

#[tokio::test]
async fn lines_flow_both_ways_at_once() {
    let (mut b, mut a) = connected_peers().await;

    for i in 0..50 {
        a.say(&format!("a{i}"));
        b.say(&format!("b{i}"));
    }
    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    for _ in 0..50 {
        from_a.push(b.expect_received().await);
        from_b.push(a.expect_received().await);
    }
    assert_eq!(from_a, (0..50).map(|i| format!("a{i}")).collect::<Vec<_>>());
    assert_eq!(from_b, (0..50).map(|i| format!("b{i}")).collect::<Vec<_>>());

    a.say("exit");
    let (a_report, _, _) = a.finish().await;
    let (b_report, _, _) = b.finish().await;
    assert_eq!((a_report.sent, a_report.received), (50, 50));
    assert_eq!((b_report.sent, b_report.received), (50, 50));
}

#[tokio::test]
async fn running_out_of_input_hangs_up_on_the_peer() {
    let (b, mut a) = connected_peers().await;

    a.close_input();
    let (a_report, _, _) = a.finish().await;
    let (b_report, b_events, _) = b.finish().await;

    assert!(matches!(a_report.termination, Termination::InputClosed));
    assert!(matches!(b_report.termination, Termination::PeerDisconnected));
    assert_eq!(b_report.state, SessionState::Closed);
    assert!(matches!(
        b_events.last(),
        Some(SessionEvent::Closed { clean: true, .. })
    ));
}

#[tokio::test]
async fn peer_vanishing_without_exit_still_closes() {
    let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepting = tokio::spawn(listener.accept(DEFAULT_MAX_LINE_LENGTH));

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let b = Peer::start(Role::Listener, accepting.await.unwrap().unwrap());
    raw.write_all(b"one\r\ntwo\n").await.unwrap();
    drop(raw);

    let (report, events, transcript) = b.finish().await;
    assert!(matches!(report.termination, Termination::PeerDisconnected));
    assert_eq!(report.state, SessionState::Closed);
    assert_eq!(transcript.texts(), vec!["one", "two"]);
    assert!(events.contains(&SessionEvent::Received {
        from: Role::Connector,
        text: "one".to_string(),
    }));
}

#[tokio::test]
async fn local_exit_is_still_sent_to_the_peer() {
    let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepting = tokio::spawn(listener.accept(DEFAULT_MAX_LINE_LENGTH));

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let b = Peer::start(Role::Listener, accepting.await.unwrap().unwrap());
    b.say("see you");
    b.say("Exit");

    let (report, _, transcript) = b.finish().await;
    assert!(matches!(report.termination, Termination::LocalExit));
    assert_eq!(transcript.texts(), vec!["see you"]);

    let mut wire = String::new();
    timeout(PATIENCE, raw.read_to_string(&mut wire))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wire, "see you\nExit\n");
}

/// A stream whose peer never speaks and whose writes always hit a broken pipe.
struct BrokenWrites;

impl AsyncRead for BrokenWrites {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn undeliverable_exit_is_not_a_clean_ending() {
    let channel = PeerChannel::new(BrokenWrites, None, DEFAULT_MAX_LINE_LENGTH);
    let b = Peer::start(Role::Listener, channel);
    b.say("exit");

    let (report, events, _) = b.finish().await;
    assert!(matches!(
        report.termination,
        Termination::Failed(ChatError::ChannelWrite(_))
    ));
    assert!(!report.is_clean());
    assert_ne!(report.status(), "Successfully Disconnected!");
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Closed { clean: false, .. })
    ));
}

#[tokio::test]
async fn overlong_incoming_line_fails_the_session() {
    let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepting = tokio::spawn(listener.accept(16));

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let b = Peer::start(Role::Listener, accepting.await.unwrap().unwrap());
    raw.write_all(&[b'z'; 64]).await.unwrap();

    let (report, events, _) = b.finish().await;
    assert!(matches!(
        report.termination,
        Termination::Failed(ChatError::ChannelRead(_))
    ));
    assert!(!report.is_clean());
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Closed { clean: false, .. })
    ));
}

#[tokio::test]
async fn overlong_local_line_is_rejected_not_sent() {
    let (listener, connector) = connected_channels().await;
    let mut b = Peer::start(Role::Listener, listener);
    let mut a = Peer::start(Role::Connector, connector);

    a.say(&"y".repeat(DEFAULT_MAX_LINE_LENGTH + 1));
    a.say("short");
    assert_eq!(b.expect_received().await, "short");

    a.say("exit");
    let (a_report, a_events, _) = a.finish().await;
    b.finish().await;
    assert_eq!(a_report.sent, 1);
    assert!(a_events
        .iter()
        .any(|event| matches!(event, SessionEvent::Rejected { .. })));
}

#[tokio::test]
async fn connecting_to_nobody_never_starts_the_loops() {
    let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = ChatConfig {
        connect_timeout: Duration::from_secs(5),
        ..ChatConfig::connector(addr)
    };
    let (_input_tx, input_rx) = mpsc::unbounded::<io::Result<String>>();
    let (events_tx, events_rx) = mpsc::unbounded();

    let result = session::start(&config, input_rx, events_tx).await;
    assert!(matches!(result, Err(ChatError::Connection { .. })));

    let events: Vec<SessionEvent> = events_rx.collect().await;
    assert!(events
        .iter()
        .all(|event| matches!(event, SessionEvent::Connecting(_))));
}

#[tokio::test]
async fn start_as_listener_records_a_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.txt");
    let config = ChatConfig {
        transcript: TranscriptConfig {
            log_path: Some(log_path.clone()),
            ..TranscriptConfig::default()
        },
        ..ChatConfig::listener("127.0.0.1:0")
    };

    let (_input_tx, input_rx) = mpsc::unbounded::<io::Result<String>>();
    let (events_tx, mut events_rx) = mpsc::unbounded();
    let running = tokio::spawn(async move { session::start(&config, input_rx, events_tx).await });

    let addr = match timeout(PATIENCE, events_rx.next()).await.unwrap() {
        Some(SessionEvent::Listening(addr)) => addr,
        other => panic!("expected to be listening, got {other:?}"),
    };
    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"hello\nEXIT\n").await.unwrap();

    let report = timeout(PATIENCE, running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(report.termination, Termination::PeerExit));
    assert_eq!(report.transcript.entries, 1);
    assert_eq!(report.transcript.failures, 0);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("[Client]:\thello"));
    assert!(!log.to_lowercase().contains("exit"));
}
