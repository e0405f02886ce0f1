//! Shared helpers for the stream client integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use feed_stream_client::{
    ClientConfig, ClientEvent, ConnectionLink, EventKind, LinkError, LinkEvent, LinkEvents,
    StreamClient,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Outcome of one `open` call on a [`FakeLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Report `Opened` right away.
    Open,
    /// Report a transport error followed by an unclean close.
    Refuse,
    /// Report nothing; the attempt only ends by timeout.
    Hang,
}

#[derive(Debug)]
struct Inner {
    tokens: Vec<String>,
    sent: Vec<String>,
    sessions: Vec<Vec<String>>,
    closes: Vec<(u16, String)>,
    open: bool,
    peer: Option<mpsc::UnboundedSender<LinkEvent>>,
    script: VecDeque<OpenOutcome>,
    fallback: OpenOutcome,
}

/// Scriptable in-memory link.
///
/// Each `open` takes the next scripted outcome, or the fallback once the
/// script is empty. Tests act as the server through [`emit`](Self::emit).
#[derive(Debug, Clone)]
pub struct FakeLink {
    inner: Arc<Mutex<Inner>>,
}

impl FakeLink {
    /// Link whose every `open` has the given outcome.
    pub fn new(fallback: OpenOutcome) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tokens: Vec::new(),
                sent: Vec::new(),
                sessions: Vec::new(),
                closes: Vec::new(),
                open: false,
                peer: None,
                script: VecDeque::new(),
                fallback,
            })),
        }
    }

    /// Queue outcomes for the next `open` calls.
    pub fn script(&self, outcomes: &[OpenOutcome]) {
        self.inner.lock().script.extend(outcomes.iter().copied());
    }

    /// Change the outcome used once the script is empty.
    pub fn set_fallback(&self, outcome: OpenOutcome) {
        self.inner.lock().fallback = outcome;
    }

    /// Deliver an event on the current connection.
    pub fn emit(&self, event: LinkEvent) {
        let inner = self.inner.lock();
        let peer = inner.peer.as_ref().expect("no connection to emit on");
        let _ = peer.send(event);
    }

    /// Deliver a JSON frame on the current connection.
    pub fn push(&self, frame: &Value) {
        self.emit(LinkEvent::Message(frame.to_string()));
    }

    /// Deliver a raw text frame on the current connection.
    pub fn push_raw(&self, frame: &str) {
        self.emit(LinkEvent::Message(frame.to_string()));
    }

    /// Simulate the server dropping the connection without a close frame.
    pub fn drop_connection(&self) {
        self.inner.lock().open = false;
        self.emit(LinkEvent::Closed {
            code: 1006,
            reason: String::new(),
            was_clean: false,
        });
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> usize {
        self.inner.lock().tokens.len()
    }

    /// Tokens passed to `open`, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.inner.lock().tokens.clone()
    }

    /// Close codes passed to `close`, in order.
    pub fn close_codes(&self) -> Vec<u16> {
        self.inner.lock().closes.iter().map(|(code, _)| *code).collect()
    }

    /// Frames written so far, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.inner
            .lock()
            .sent
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    /// `(type, channel)` of every frame written so far.
    pub fn sent_commands(&self) -> Vec<(String, Option<String>)> {
        self.inner.lock().sent.iter().map(|frame| command_of(frame)).collect()
    }

    /// Channels of the written frames of one type.
    pub fn sent_channels(&self, kind: &str) -> Vec<String> {
        self.sent_commands()
            .into_iter()
            .filter(|(k, _)| k == kind)
            .filter_map(|(_, channel)| channel)
            .collect()
    }

    /// `(type, channel)` of the frames written on each opened connection.
    pub fn session_commands(&self) -> Vec<Vec<(String, Option<String>)>> {
        self.inner
            .lock()
            .sessions
            .iter()
            .map(|frames| frames.iter().map(|frame| command_of(frame)).collect())
            .collect()
    }

    /// Forget written frames.
    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }
}

impl ConnectionLink for FakeLink {
    fn open(&mut self, _target: &str, auth_token: &str) -> Result<LinkEvents, LinkError> {
        let mut inner = self.inner.lock();
        inner.tokens.push(auth_token.to_string());

        let outcome = inner.script.pop_front().unwrap_or(inner.fallback);
        let (tx, rx) = mpsc::unbounded_channel();

        match outcome {
            OpenOutcome::Open => {
                inner.open = true;
                inner.sessions.push(Vec::new());
                let _ = tx.send(LinkEvent::Opened);
            }
            OpenOutcome::Refuse => {
                inner.open = false;
                let _ = tx.send(LinkEvent::TransportError("connection refused".to_string()));
                let _ = tx.send(LinkEvent::Closed {
                    code: 1006,
                    reason: String::new(),
                    was_clean: false,
                });
            }
            OpenOutcome::Hang => inner.open = false,
        }

        inner.peer = Some(tx);
        Ok(rx)
    }

    fn send(&mut self, frame: String) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(LinkError::NotOpen);
        }
        if let Some(session) = inner.sessions.last_mut() {
            session.push(frame.clone());
        }
        inner.sent.push(frame);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.closes.push((code, reason.to_string()));
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }
}

fn command_of(frame: &str) -> (String, Option<String>) {
    let frame: Value = serde_json::from_str(frame).unwrap();
    (
        frame["type"].as_str().unwrap().to_string(),
        frame["channel"].as_str().map(str::to_string),
    )
}

/// Config with short, jitter-free back-off.
pub fn test_config() -> ClientConfig {
    ClientConfig::new("ws://feed.test/stream")
        .with_reconnect_base_delay(Duration::from_millis(100))
        .with_reconnect_cap(Duration::from_secs(5))
        .with_reconnect_jitter_ratio(0.0)
}

/// Let the client task drain everything that is ready.
///
/// With paused time the clock only advances once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Record every event of one kind.
pub fn record(client: &StreamClient, kind: EventKind) -> Arc<Mutex<Vec<ClientEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    // Handler stays registered for the client's lifetime
    let _ = client.on(kind, move |event| sink.lock().push(event.clone()));
    log
}
