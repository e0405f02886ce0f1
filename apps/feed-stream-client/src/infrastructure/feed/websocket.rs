//! WebSocket Link
//!
//! `ConnectionLink` adapter over `tokio-tungstenite`. Each `open` spawns a
//! worker task that owns the socket; the link itself only holds a command
//! sender and the open flag, so every call returns immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectionLink, LinkError, LinkEvent, LinkEvents};

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
const NO_STATUS: u16 = 1005;

enum WorkerCommand {
    Frame(String),
    Close { code: u16, reason: String },
}

struct Session {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// WebSocket implementation of [`ConnectionLink`].
#[derive(Default)]
pub struct WebSocketLink {
    session: Option<Session>,
}

impl std::fmt::Debug for WebSocketLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketLink")
            .field("open", &self.is_open())
            .finish()
    }
}

impl WebSocketLink {
    /// Create a link with no connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn abandon(&mut self) {
        if let Some(session) = self.session.take() {
            session.open.store(false, Ordering::SeqCst);
            session.cancel.cancel();
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl ConnectionLink for WebSocketLink {
    fn open(&mut self, target: &str, auth_token: &str) -> Result<LinkEvents, LinkError> {
        self.abandon();

        let request = build_request(target, auth_token)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tracing::debug!(target = %target, "Opening WebSocket link");
        tokio::spawn(run_worker(
            request,
            events_tx,
            commands_rx,
            Arc::clone(&open),
            cancel.clone(),
        ));

        self.session = Some(Session {
            commands: commands_tx,
            open,
            cancel,
        });

        Ok(events_rx)
    }

    fn send(&mut self, frame: String) -> Result<(), LinkError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.open.load(Ordering::SeqCst))
            .ok_or(LinkError::NotOpen)?;

        session
            .commands
            .send(WorkerCommand::Frame(frame))
            .map_err(|_| LinkError::SendFailed("link worker stopped".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(session) = self.session.take() {
            session.open.store(false, Ordering::SeqCst);
            let _ = session.commands.send(WorkerCommand::Close {
                code,
                reason: reason.to_string(),
            });
            session.cancel.cancel();
        }
    }

    fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.open.load(Ordering::SeqCst))
    }
}

fn build_request(target: &str, auth_token: &str) -> Result<Request, LinkError> {
    let invalid = |message: String| LinkError::InvalidTarget {
        target: target.to_string(),
        message,
    };

    let mut request = target
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;

    if !auth_token.is_empty() {
        let value = HeaderValue::from_str(&format!("Bearer {auth_token}"))
            .map_err(|_| invalid("auth token is not a valid header value".to_string()))?;
        request.headers_mut().insert("Authorization", value);
    }

    Ok(request)
}

async fn run_worker(
    request: Request,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = connect_async(request) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket connect failed");
            let _ = events.send(LinkEvent::TransportError(e.to_string()));
            let _ = events.send(LinkEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "connect failed".to_string(),
                was_clean: false,
            });
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    let _ = events.send(LinkEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    let closed = loop {
        tokio::select! {
            biased;

            command = commands.recv() => {
                match command {
                    Some(WorkerCommand::Frame(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = events.send(LinkEvent::TransportError(e.to_string()));
                            break abnormal("write failed");
                        }
                    }
                    Some(WorkerCommand::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break LinkEvent::Closed { code, reason, was_clean: true };
                    }
                    None => break abnormal("link dropped"),
                }
            }
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(LinkEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (NO_STATUS, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                        );
                        tracing::info!(code, reason = %reason, "Server sent close frame");
                        break LinkEvent::Closed { code, reason, was_clean: true };
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for the feed
                    }
                    Some(Err(e)) => {
                        let _ = events.send(LinkEvent::TransportError(e.to_string()));
                        break abnormal("read failed");
                    }
                    None => break abnormal("stream ended"),
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = events.send(closed);
}

fn abnormal(reason: &str) -> LinkEvent {
    LinkEvent::Closed {
        code: ABNORMAL_CLOSURE,
        reason: reason.to_string(),
        was_clean: false,
    }
}
