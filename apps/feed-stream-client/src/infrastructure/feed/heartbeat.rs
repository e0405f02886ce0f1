//! Heartbeat Manager
//!
//! Detects a feed connection that is open at the transport layer but has
//! gone silent. Every interval the manager checks whether any inbound frame
//! arrived since the previous tick; if not, it asks for a ping. After
//! `max_missed_ticks` silent ticks in a row it reports a timeout and exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks.
    pub interval: Duration,
    /// Consecutive silent ticks before the connection is considered dead.
    pub max_missed_ticks: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed_ticks: 2,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, max_missed_ticks: u32) -> Self {
        Self {
            interval,
            max_missed_ticks,
        }
    }

    /// Create configuration from `ClientConfig`.
    #[must_use]
    pub fn from_client_config(config: &crate::ClientConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            ..Self::default()
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// No traffic since the last tick; a ping should be sent.
    SendPing,
    /// Too many silent ticks; the connection should be dropped.
    Timeout {
        /// Time since the last inbound frame.
        silent_for: Duration,
    },
}

/// Inbound traffic bookkeeping shared between the client and the manager.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
    traffic_since_tick: AtomicBool,
    missed_ticks: AtomicU32,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
            traffic_since_tick: AtomicBool::new(false),
            missed_ticks: AtomicU32::new(0),
        }
    }

    /// Record that an inbound frame was received.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
        self.traffic_since_tick.store(true, Ordering::SeqCst);
    }

    /// Consume the traffic flag for the current tick.
    fn take_traffic(&self) -> bool {
        self.traffic_since_tick.swap(false, Ordering::SeqCst)
    }

    #[cfg(test)]
    fn missed_ticks(&self) -> u32 {
        self.missed_ticks.load(Ordering::SeqCst)
    }

    /// Get the time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Counts live heartbeat managers for one client.
#[derive(Debug)]
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Heartbeat manager that monitors connection liveness.
///
/// The manager counts itself in `live` from construction until it is
/// dropped, so an aborted or finished task is no longer counted.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
    _live: LiveGuard,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
        live: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
            _live: LiveGuard::new(live),
        }
    }

    /// Run the heartbeat monitoring loop.
    ///
    /// The first check happens one interval after start. Runs until
    /// cancelled, the event channel closes, or a timeout is reported.
    pub async fn run(self) {
        // interval_at panics on a zero period
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check inbound traffic and request a ping if the link was silent.
    ///
    /// Returns `Err(())` if the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if self.state.take_traffic() {
            self.state.missed_ticks.store(0, Ordering::SeqCst);
            return Ok(());
        }

        let missed = self.state.missed_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if missed >= self.config.max_missed_ticks {
            let silent_for = self.state.time_since_inbound();
            tracing::warn!(
                missed_ticks = missed,
                silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
                "Heartbeat timeout detected"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout { silent_for }).await;
            return Err(());
        }

        tracing::debug!(missed_ticks = missed, "No inbound traffic, requesting ping");
        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}

/// Error type for heartbeat failures.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// Heartbeat timeout occurred.
    #[error("heartbeat timeout after {0:?} without inbound traffic")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        state: Arc<HeartbeatState>,
        events: mpsc::Receiver<HeartbeatEvent>,
        cancel: CancellationToken,
        live: Arc<AtomicUsize>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_manager(interval: Duration) -> Harness {
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, events) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let live = Arc::new(AtomicUsize::new(0));

        let manager = HeartbeatManager::new(
            HeartbeatConfig::new(interval, 2),
            Arc::clone(&state),
            event_tx,
            cancel.clone(),
            Arc::clone(&live),
        );
        let handle = tokio::spawn(manager.run());

        Harness {
            state,
            events,
            cancel,
            live,
            handle,
        }
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.max_missed_ticks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn state_tracks_inbound_traffic() {
        let state = HeartbeatState::new();
        assert!(!state.take_traffic());

        state.record_inbound();
        assert!(state.take_traffic());
        assert!(!state.take_traffic());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(state.time_since_inbound(), Duration::from_secs(5));
        assert_eq!(state.missed_ticks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_link_pings_then_times_out() {
        let mut h = spawn_manager(Duration::from_secs(30));

        // Nothing before the first interval elapses
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(h.events.try_recv().is_err());

        assert_eq!(h.events.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(h.state.missed_ticks(), 1);

        let event = h.events.recv().await;
        assert_eq!(
            event,
            Some(HeartbeatEvent::Timeout {
                silent_for: Duration::from_secs(60)
            })
        );

        h.handle.await.unwrap();
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_resets_missed_ticks() {
        let mut h = spawn_manager(Duration::from_secs(30));

        assert_eq!(h.events.recv().await, Some(HeartbeatEvent::SendPing));
        h.state.record_inbound();

        // Tick at 60s sees traffic and stays quiet
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.state.missed_ticks(), 0);

        // Silence resumes: ping at 90s, timeout at 120s
        assert_eq!(h.events.recv().await, Some(HeartbeatEvent::SendPing));
        assert!(matches!(
            h.events.recv().await,
            Some(HeartbeatEvent::Timeout { .. })
        ));

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn manager_cancellation() {
        let h = spawn_manager(Duration::from_secs(10));
        assert_eq!(h.live.load(Ordering::SeqCst), 1);

        h.cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), h.handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_manager_is_not_counted() {
        let h = spawn_manager(Duration::from_secs(10));
        h.handle.abort();
        let _ = h.handle.await;

        assert_eq!(h.live.load(Ordering::SeqCst), 0);
    }
}
