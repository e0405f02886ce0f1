//! Stream Client
//!
//! Owns the connection state machine and keeps one logical feed connection
//! alive across transport failures.
//!
//! # Architecture
//!
//! ```text
//! StreamClient (handle, Clone) ──mailbox──▶ ClientActor (one task)
//!                                              ├── ConnectionLink   (open/send/close)
//!                                              ├── SubscriptionRegistry
//!                                              ├── OutboundQueue
//!                                              ├── ReconnectPolicy  (back-off sleep)
//!                                              ├── HeartbeatManager (spawned per session)
//!                                              └── EventBus ──▶ state/error observers
//! ```
//!
//! Every input (caller command, link event, heartbeat event, timer expiry)
//! is handled to completion before the next one is taken. Timers and the
//! heartbeat belong to the state that started them and are dropped on every
//! exit from it.
//!
//! # State Machine
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──opened──▶ connected
//!                                 │                      │
//!                     error/timeout/auth      heartbeat timeout / closed
//!                                 ▼                      ▼
//!                 connecting ◀─delay── reconnecting ──ceiling──▶ failed
//! ```
//!
//! `disconnect()` moves any state to `disconnected`; `reconnect()` resets the
//! attempt counter and moves any state to `connecting`.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::codec::JsonCodec;
use super::heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::ClientConfig;
use crate::application::ports::{
    AuthError, AuthTokenProvider, ConnectionLink, LinkEvent, LinkEvents,
};
use crate::domain::events::{ClientEvent, EventBus, EventKind, EventSubscription, StreamError};
use crate::domain::outbound::{CommandKind, Enqueued, Flushed, OutboundCommand, OutboundQueue};
use crate::domain::streaming::{ConnectionState, InboundMessage, Payload, Topic};
use crate::domain::subscription::{Listener, ListenerId, SubscriptionRegistry};
use crate::infrastructure::metrics::{self as feed_metrics, DropReason};

/// Close code for an intentional close.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for a connection dropped by the client as unhealthy
/// (heartbeat timeout, connect timeout).
pub const CLOSE_UNHEALTHY: u16 = 4000;

/// Errors returned by [`StreamClient`] calls that need a reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The client task has stopped.
    #[error("stream client has shut down")]
    Closed,
}

/// Point-in-time snapshot of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientDiagnostics {
    /// Current connection state.
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Commands waiting in the outbound queue.
    pub queued_commands: usize,
    /// Topics with at least one listener.
    pub active_topics: Vec<Topic>,
    /// Listeners across all topics.
    pub listener_count: usize,
    /// Whether a heartbeat is attached to the current session.
    pub heartbeat_armed: bool,
    /// Whether a reconnect back-off is pending.
    pub reconnect_timer_armed: bool,
    /// Whether a connect timeout is pending.
    pub connect_timer_armed: bool,
    /// Heartbeat tasks still alive for this client.
    pub live_heartbeat_tasks: usize,
}

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Subscribe {
        topic: Topic,
        listener_id: ListenerId,
        listener: Listener,
    },
    Unsubscribe {
        topic: Topic,
        listener_id: ListenerId,
    },
    Send(OutboundCommand),
    Diagnostics(oneshot::Sender<ClientDiagnostics>),
    Teardown(oneshot::Sender<()>),
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running stream client.
///
/// Cheap to clone; every clone drives the same connection. The client task
/// stops on [`teardown`](Self::teardown) or once every handle is dropped.
#[derive(Clone)]
pub struct StreamClient {
    mailbox: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: EventBus,
    next_listener_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Spawn a client task in the `disconnected` state.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn<L, A>(config: ClientConfig, link: L, auth: A) -> Self
    where
        L: ConnectionLink,
        A: AuthTokenProvider,
    {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let events = EventBus::new();

        let span = tracing::info_span!("feed_client", url = %config.url);
        let actor = ClientActor::new(config, link, Arc::new(auth), inbox, state_tx, events.clone());
        tokio::spawn(actor.run().instrument(span));

        Self {
            mailbox,
            state,
            events,
            next_listener_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start connecting. No-op unless `disconnected`.
    pub fn connect(&self) {
        self.post(Command::Connect);
    }

    /// Close the connection and stop all retries, timers and queued sends.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Reset the attempt counter and connect again, from any state.
    pub fn reconnect(&self) {
        self.post(Command::Reconnect);
    }

    /// Register a listener for a topic.
    ///
    /// The first listener of a topic announces it to the server; the handle's
    /// [`unsubscribe`](SubscriptionHandle::unsubscribe) withdraws it again
    /// once the last listener is gone. The listener stops receiving payloads
    /// as soon as `unsubscribe` returns.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        let gate = Arc::clone(&active);
        let listener: Listener = Arc::new(move |payload: &Payload| {
            if gate.load(Ordering::SeqCst) {
                listener(payload)
            } else {
                Ok(())
            }
        });

        self.post(Command::Subscribe {
            topic: topic.clone(),
            listener_id,
            listener,
        });

        SubscriptionHandle {
            topic,
            listener_id,
            mailbox: self.mailbox.downgrade(),
            active,
        }
    }

    /// Send a command now if connected, otherwise queue it for replay.
    ///
    /// Pings are dropped instead of queued.
    pub fn send(&self, command: OutboundCommand) {
        self.post(Command::Send(command));
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    ///
    /// A watcher only sees the latest state; use [`on`](Self::on) with
    /// [`EventKind::StateChanged`] to observe every transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the client is in `target`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Closed` if the client stops first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Register an event handler.
    ///
    /// Handlers run on the client task; they must not block.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> EventSubscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    /// Take a diagnostics snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Closed` if the client has stopped.
    pub async fn diagnostics(&self) -> Result<ClientDiagnostics, ClientError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Command::Diagnostics(reply))
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)
    }

    /// Disconnect and stop the client task.
    ///
    /// Returns once the task has released the link. Calling it again, or on
    /// a stopped client, returns immediately.
    pub async fn teardown(&self) {
        let (ack, done) = oneshot::channel();
        if self.mailbox.send(Command::Teardown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    fn post(&self, command: Command) {
        if self.mailbox.send(command).is_err() {
            tracing::debug!("Stream client has shut down, command ignored");
        }
    }
}

/// Handle for one listener registration.
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug)]
pub struct SubscriptionHandle {
    topic: Topic,
    listener_id: ListenerId,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Remove the listener. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(Command::Unsubscribe {
                topic: self.topic.clone(),
                listener_id: self.listener_id,
            });
        }
    }

    /// Get the topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the listener id.
    #[must_use]
    pub const fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Check if the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Actor
// =============================================================================

struct HeartbeatHandle {
    state: Arc<HeartbeatState>,
    events: mpsc::Receiver<HeartbeatEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

enum Input {
    Command(Command),
    HandlesDropped,
    Auth(Result<String, AuthError>),
    Link(Option<LinkEvent>),
    Heartbeat(Option<HeartbeatEvent>),
    ReconnectDue,
    ConnectTimeout,
}

struct ClientActor<L> {
    config: ClientConfig,
    link: L,
    auth: Arc<dyn AuthTokenProvider>,
    inbox: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventBus,
    state: ConnectionState,
    codec: JsonCodec,
    registry: SubscriptionRegistry,
    /// Topics whose queued (un)subscribes came from the registry.
    registry_topics: HashSet<Topic>,
    queue: OutboundQueue,
    policy: ReconnectPolicy,
    heartbeat_config: HeartbeatConfig,
    heartbeat_live: Arc<AtomicUsize>,
    auth_pending: Option<BoxFuture<'static, Result<String, AuthError>>>,
    link_events: Option<LinkEvents>,
    heartbeat: Option<HeartbeatHandle>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    connect_timer: Option<Pin<Box<Sleep>>>,
}

impl<L: ConnectionLink> ClientActor<L> {
    fn new(
        config: ClientConfig,
        link: L,
        auth: Arc<dyn AuthTokenProvider>,
        inbox: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        events: EventBus,
    ) -> Self {
        let queue = OutboundQueue::new(config.outbound_queue_max_size, config.outbound_queue_ttl);
        let policy = ReconnectPolicy::new(ReconnectConfig::from_client_config(&config));
        let heartbeat_config = HeartbeatConfig::from_client_config(&config);

        Self {
            config,
            link,
            auth,
            inbox,
            state_tx,
            events,
            state: ConnectionState::Disconnected,
            codec: JsonCodec::new(),
            registry: SubscriptionRegistry::new(),
            registry_topics: HashSet::new(),
            queue,
            policy,
            heartbeat_config,
            heartbeat_live: Arc::new(AtomicUsize::new(0)),
            auth_pending: None,
            link_events: None,
            heartbeat: None,
            reconnect_timer: None,
            connect_timer: None,
        }
    }

    async fn run(mut self) {
        tracing::debug!("Stream client started");

        let ack = loop {
            let input = tokio::select! {
                command = self.inbox.recv() => command.map_or(Input::HandlesDropped, Input::Command),
                result = poll_auth(&mut self.auth_pending) => Input::Auth(result),
                event = recv_link(&mut self.link_events) => Input::Link(event),
                event = recv_heartbeat(&mut self.heartbeat) => Input::Heartbeat(event),
                () = wait_timer(&mut self.reconnect_timer) => Input::ReconnectDue,
                () = wait_timer(&mut self.connect_timer) => Input::ConnectTimeout,
            };

            match input {
                Input::Command(Command::Teardown(ack)) => break Some(ack),
                Input::Command(command) => self.handle_command(command),
                Input::HandlesDropped => break None,
                Input::Auth(result) => self.on_auth(result),
                Input::Link(Some(event)) => self.on_link_event(event),
                Input::Link(None) => {
                    self.link_events = None;
                    self.fail_connection(StreamError::Transport(
                        "link dropped its event channel".to_string(),
                    ));
                }
                Input::Heartbeat(event) => self.on_heartbeat(event),
                Input::ReconnectDue => {
                    self.reconnect_timer = None;
                    feed_metrics::record_reconnect_attempt();
                    self.begin_connecting();
                }
                Input::ConnectTimeout => self.on_connect_timeout(),
            }
        };

        self.disconnect("client shut down");
        tracing::debug!("Stream client stopped");

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => match self.state {
                ConnectionState::Disconnected => self.begin_connecting(),
                ConnectionState::Failed => {
                    tracing::debug!("Client failed; connect() ignored until reconnect()");
                }
                _ => {}
            },
            Command::Disconnect => self.disconnect("client disconnect"),
            Command::Reconnect => {
                if self.link_events.is_some() {
                    self.link.close(CLOSE_NORMAL, "client reconnect");
                }
                self.clear_session();
                self.policy.reset();
                self.begin_connecting();
            }
            Command::Subscribe {
                topic,
                listener_id,
                listener,
            } => {
                if self.registry.add(topic.clone(), listener_id, listener) {
                    tracing::info!(topic = %topic, "Topic activated");
                    self.registry_topics.insert(topic.clone());
                    self.enqueue_or_send(OutboundCommand::subscribe(topic));
                }
                self.refresh_gauges();
            }
            Command::Unsubscribe { topic, listener_id } => {
                if self.registry.remove(&topic, listener_id) {
                    tracing::info!(topic = %topic, "Topic deactivated");
                    self.enqueue_or_send(OutboundCommand::unsubscribe(topic));
                }
                self.refresh_gauges();
            }
            Command::Send(command) => self.enqueue_or_send(command),
            Command::Diagnostics(reply) => {
                let _ = reply.send(self.diagnostics());
            }
            // Handled by the run loop
            Command::Teardown(_) => {}
        }
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        self.state_tx.send_replace(to);
        feed_metrics::record_state_transition(to);
        tracing::info!(from = %from, to = %to, "Connection state changed");
        self.events.emit(&ClientEvent::StateChanged { from, to });
    }

    fn begin_connecting(&mut self) {
        self.transition(ConnectionState::Connecting);
        self.connect_timer = Some(Box::pin(tokio::time::sleep(self.config.connect_timeout)));

        let auth = Arc::clone(&self.auth);
        self.auth_pending = Some(Box::pin(async move { auth.auth_token().await }));
    }

    fn on_auth(&mut self, result: Result<String, AuthError>) {
        self.auth_pending = None;

        let token = match result {
            Ok(token) => token,
            Err(e) => {
                self.fail_connection(StreamError::Auth(e.to_string()));
                return;
            }
        };

        match self.link.open(&self.config.url, &token) {
            Ok(events) => self.link_events = Some(events),
            Err(e) => self.fail_connection(StreamError::Transport(e.to_string())),
        }
    }

    fn on_opened(&mut self) {
        self.connect_timer = None;
        self.policy.reset();
        self.transition(ConnectionState::Connected);

        self.flush_queue();
        self.announce_active_topics();
        self.start_heartbeat();
        self.refresh_gauges();
    }

    fn on_connect_timeout(&mut self) {
        self.connect_timer = None;
        if self.state != ConnectionState::Connecting {
            return;
        }

        let timeout = self.config.connect_timeout;
        let error = if self.auth_pending.is_some() {
            StreamError::Auth(format!("auth token not available within {timeout:?}"))
        } else {
            StreamError::Transport(format!("link not opened within {timeout:?}"))
        };
        self.fail_connection(error);
    }

    /// Record a failed attempt or lost connection and schedule the next try.
    fn fail_connection(&mut self, error: StreamError) {
        if self.link_events.is_some() {
            self.link.close(CLOSE_UNHEALTHY, &error.to_string());
        }
        self.clear_session();

        tracing::warn!(
            error = %error,
            state = %self.state,
            attempt = self.policy.attempt_count() + 1,
            "Connection attempt failed"
        );

        match self.policy.record_failure() {
            Some(delay) => {
                self.transition(ConnectionState::Reconnecting);
                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt = self.policy.attempt_count(),
                    "Scheduling reconnect"
                );
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => {
                let attempts = self.policy.attempt_count();
                self.transition(ConnectionState::Failed);
                tracing::error!(attempts, "Reconnect attempts exhausted");

                let exhausted = ReconnectError::MaxAttemptsExceeded(attempts);
                self.events
                    .emit(&ClientEvent::Error(StreamError::Transport(exhausted.to_string())));
                self.events.emit(&ClientEvent::MaxAttemptsReached { attempts });
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if self.link_events.is_some() {
            self.link.close(CLOSE_NORMAL, reason);
        }
        self.clear_session();

        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared outbound queue");
        }

        self.policy.reset();
        self.transition(ConnectionState::Disconnected);
        self.refresh_gauges();
    }

    /// Drop everything tied to the current attempt or session.
    fn clear_session(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        self.link_events = None;
        self.auth_pending = None;
        self.connect_timer = None;
        self.reconnect_timer = None;
    }

    // -------------------------------------------------------------------------
    // Link and heartbeat events
    // -------------------------------------------------------------------------

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.on_opened();
                }
            }
            LinkEvent::Message(text) => self.on_message(&text),
            LinkEvent::TransportError(message) => {
                self.fail_connection(StreamError::Transport(message));
            }
            LinkEvent::Closed {
                code,
                reason,
                was_clean,
            } => {
                self.link_events = None;
                tracing::info!(code, reason = %reason, was_clean, "Link closed");
                self.fail_connection(StreamError::Transport(format!(
                    "link closed with code {code}: {reason}"
                )));
            }
        }
    }

    fn on_message(&mut self, text: &str) {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                feed_metrics::record_protocol_error();
                tracing::warn!(error = %e, "Dropping malformed frame");
                self.events
                    .emit(&ClientEvent::Error(StreamError::Protocol(e.to_string())));
                return;
            }
        };

        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.state.record_inbound();
        }
        feed_metrics::record_message_received(message.type_name());

        match message {
            InboundMessage::Data { channel, data } => self.dispatch(&channel, &data),
            InboundMessage::Error { channel, error } => {
                let message = error.unwrap_or_else(|| "unspecified error".to_string());
                tracing::warn!(channel = ?channel, error = %message, "Feed reported an error");
                self.events
                    .emit(&ClientEvent::Error(StreamError::Feed { channel, message }));
            }
            InboundMessage::SubscriptionConfirmed { channel } => {
                tracing::debug!(channel = ?channel, "Subscription confirmed");
            }
            InboundMessage::Heartbeat | InboundMessage::Pong => {}
        }
    }

    fn dispatch(&self, topic: &str, payload: &Payload) {
        let report = self.registry.dispatch(topic, payload);

        if report.delivered == 0 && report.failures.is_empty() {
            tracing::debug!(topic = %topic, "No listeners for topic");
        }

        for failure in report.failures {
            feed_metrics::record_listener_error();
            tracing::warn!(
                topic = %failure.topic,
                listener_id = failure.listener_id,
                error = %failure.message,
                "Listener failed"
            );
            self.events.emit(&ClientEvent::Error(failure.into()));
        }
    }

    fn on_heartbeat(&mut self, event: Option<HeartbeatEvent>) {
        match event {
            Some(HeartbeatEvent::SendPing) => self.enqueue_or_send(OutboundCommand::ping()),
            Some(HeartbeatEvent::Timeout { silent_for }) => {
                let error = HeartbeatError::Timeout(silent_for);
                self.fail_connection(StreamError::Transport(error.to_string()));
            }
            None => {
                self.heartbeat = None;
            }
        }
    }

    fn start_heartbeat(&mut self) {
        if let Some(previous) = self.heartbeat.take() {
            previous.stop();
        }

        let state = Arc::new(HeartbeatState::new());
        let (event_tx, events) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(
            self.heartbeat_config.clone(),
            Arc::clone(&state),
            event_tx,
            cancel.clone(),
            Arc::clone(&self.heartbeat_live),
        );
        let task = tokio::spawn(manager.run().in_current_span());

        self.heartbeat = Some(HeartbeatHandle {
            state,
            events,
            cancel,
            task,
        });
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    fn enqueue_or_send(&mut self, command: OutboundCommand) {
        if self.state.is_connected() {
            self.write(command);
            return;
        }

        if command.kind == CommandKind::Ping {
            feed_metrics::record_command_dropped(DropReason::SkippedPing);
            return;
        }

        self.park(command);
        self.refresh_gauges();
    }

    /// Hold a command for the next session, counting capacity drops.
    fn park(&mut self, command: OutboundCommand) {
        match self.queue.push(command) {
            Enqueued::Queued => {}
            Enqueued::Evicted(evicted) => {
                feed_metrics::record_command_dropped(DropReason::Capacity);
                let error = StreamError::Capacity {
                    kind: evicted.kind,
                    topic: evicted.topic,
                };
                tracing::warn!(error = %error, "Outbound queue full");
            }
            Enqueued::Skipped => {
                feed_metrics::record_command_dropped(DropReason::Capacity);
                tracing::warn!("Outbound queue has no capacity, command dropped");
            }
        }
    }

    fn write(&mut self, command: OutboundCommand) {
        let frame = match self.codec.encode(&command) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, kind = command.kind.as_str(), "Failed to encode command");
                return;
            }
        };

        match self.link.send(frame) {
            Ok(()) => {
                feed_metrics::record_command_sent(command.kind);
                tracing::debug!(
                    kind = command.kind.as_str(),
                    topic = ?command.topic,
                    request_id = %command.request_id,
                    "Sent command"
                );
            }
            Err(e) if command.kind == CommandKind::Ping => {
                feed_metrics::record_command_dropped(DropReason::SkippedPing);
                tracing::debug!(error = %e, "Ping not sent");
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = command.kind.as_str(), "Send failed, queueing");
                self.park(command);
            }
        }
    }

    /// Replay queued commands, dropping stale ones and every registry
    /// (un)subscribe.
    ///
    /// A fresh session holds no server-side subscriptions, so the registry
    /// snapshot announced next is the whole topic state. Only commands sent
    /// through [`StreamClient::send`] for topics the registry never held
    /// are replayed.
    fn flush_queue(&mut self) {
        let Flushed { ready, expired } = self.queue.flush(Instant::now());

        for command in expired {
            feed_metrics::record_command_dropped(DropReason::Expired);
            tracing::debug!(
                kind = command.kind.as_str(),
                topic = ?command.topic,
                "Dropping expired command"
            );
        }

        for command in ready {
            let superseded = command
                .topic
                .as_deref()
                .is_some_and(|topic| self.registry_topics.contains(topic));

            if superseded {
                feed_metrics::record_command_dropped(DropReason::Superseded);
                tracing::debug!(
                    kind = command.kind.as_str(),
                    topic = ?command.topic,
                    "Dropping command superseded by topic snapshot"
                );
                continue;
            }
            self.write(command);
        }

        self.registry_topics.retain(|topic| self.registry.is_active(topic));
    }

    fn announce_active_topics(&mut self) {
        let topics = self.registry.active_topics();
        if !topics.is_empty() {
            tracing::info!(count = topics.len(), "Re-announcing active topics");
        }

        for topic in topics {
            self.write(OutboundCommand::subscribe(topic));
        }
    }

    fn refresh_gauges(&self) {
        feed_metrics::set_active_topics(self.registry.topic_count());
        feed_metrics::set_queued_commands(self.queue.len());
    }

    fn diagnostics(&self) -> ClientDiagnostics {
        ClientDiagnostics {
            state: self.state,
            reconnect_attempts: self.policy.attempt_count(),
            queued_commands: self.queue.len(),
            active_topics: self.registry.active_topics().into_iter().collect(),
            listener_count: self.registry.listener_count(),
            heartbeat_armed: self.heartbeat.is_some(),
            reconnect_timer_armed: self.reconnect_timer.is_some(),
            connect_timer_armed: self.connect_timer.is_some(),
            live_heartbeat_tasks: self.heartbeat_live.load(Ordering::SeqCst),
        }
    }
}

async fn poll_auth(
    slot: &mut Option<BoxFuture<'static, Result<String, AuthError>>>,
) -> Result<String, AuthError> {
    match slot {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

async fn recv_link(events: &mut Option<LinkEvents>) -> Option<LinkEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_heartbeat(heartbeat: &mut Option<HeartbeatHandle>) -> Option<HeartbeatEvent> {
    match heartbeat {
        Some(heartbeat) => heartbeat.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
