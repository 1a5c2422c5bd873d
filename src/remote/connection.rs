//! Session lifecycle: connection state machine, bounded reconnect driver
//! and the client facade that owns the network worker thread.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::webrtc::WebRtcConnector;
use crate::config::{PlayerSettings, WORKER_JOIN_TIMEOUT};
use crate::context::{AppContext, SessionId};
use crate::display::FrameSlot;
use crate::error::ConnectionError;
use crate::events::SubscriberRegistry;
use crate::utils::sos::SignalOfStop;

/// Connection state machine
///
/// State transitions are validated so a session cannot, for example, jump
/// from `Idle` straight to `Connected` or leave `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session has been opened yet
    Idle,

    /// First connection attempt in flight
    Connecting,

    /// Media is flowing
    Connected,

    /// Session was lost, retrying within the reconnect budget
    Reconnecting,

    /// Reconnect budget exhausted; terminal apart from close
    Failed,

    /// Session released by the owner; terminal
    Closed,
}

impl ConnectionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, target) {
            // Self-transitions
            (a, b) if a == b => true,

            // From Closed - no transitions allowed
            (Closed, _) => false,

            // Close is reachable from every other state
            (_, Closed) => true,

            (Idle, Connecting) => true,

            (Connecting, Connected) => true,
            (Connecting, Reconnecting) => true,
            (Connecting, Failed) => true,

            (Connected, Reconnecting) => true,

            // Each retry goes back through Connecting after the cooldown
            (Reconnecting, Connecting) => true,
            (Reconnecting, Failed) => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Failed => "Failed",
            ConnectionState::Closed => "Closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Shared, transition-validated holder of the current [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Apply `target` if the transition is legal; leaves the state alone
    /// and returns false otherwise.
    pub fn transition(&self, target: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.can_transition_to(&target) {
            if *state != target {
                log::debug!("connection state {} -> {}", state, target);
            }
            *state = target;
            true
        } else {
            log::warn!("rejected connection state transition {} -> {}", state, target);
            false
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// An established media session: resolves when the transport drops.
#[async_trait]
pub trait ActiveSession: Send {
    /// Wait until the transport ends and report why.
    async fn closed(&mut self) -> ConnectionError;

    /// Tear down the session, releasing every transport resource. The next
    /// attempt starts from a fresh negotiation.
    async fn release(self: Box<Self>);
}

/// One-shot factory for sessions; called once per connection attempt.
#[async_trait]
pub trait SessionConnector: Send {
    async fn connect(&mut self) -> Result<Box<dyn ActiveSession>, ConnectionError>;
}

/// Drive connect/ingest/reconnect until the budget is exhausted or the
/// stop signal fires.
///
/// The attempt counter resets on every successful connection, so a stream
/// that drops occasionally keeps playing; only `max_reconnect_attempts`
/// consecutive failures end the session in `Failed`. `Connected` and
/// `Failed` each notify subscribers exactly once per occurrence.
pub async fn run_session(
    connector: &mut dyn SessionConnector,
    settings: &PlayerSettings,
    state: &StateCell,
    registry: &SubscriberRegistry,
    sos: &SignalOfStop,
) {
    let mut attempts: u32 = 0;

    loop {
        if sos.cancelled() {
            return;
        }

        state.transition(ConnectionState::Connecting);

        let attempt = match sos.select(connector.connect()).await {
            Some(result) => result,
            None => return,
        };

        match attempt {
            Ok(mut session) => {
                attempts = 0;
                state.transition(ConnectionState::Connected);
                registry.publish_playback_state(true, false);
                log::info!("session established for {}", settings.stream_url);

                let dropped = sos.select(session.closed()).await;
                session.release().await;

                match dropped {
                    Some(reason) => {
                        log::warn!("session lost: {reason}");
                        state.transition(ConnectionState::Reconnecting);
                    }
                    None => return,
                }
            }
            Err(err) => {
                attempts += 1;
                log::warn!(
                    "connection attempt {attempts}/{} failed: {err}",
                    settings.max_reconnect_attempts
                );
                state.transition(ConnectionState::Reconnecting);

                if attempts >= settings.max_reconnect_attempts {
                    state.transition(ConnectionState::Failed);
                    registry.publish_playback_state(false, false);
                    log::error!(
                        "giving up on {} after {attempts} consecutive failures",
                        settings.stream_url
                    );
                    return;
                }

                if sos
                    .select(tokio::time::sleep(settings.reconnect_cooldown))
                    .await
                    .is_none()
                {
                    return;
                }
            }
        }
    }
}

/// Client for one remote stream.
///
/// `open` starts a dedicated network thread running its own single-threaded
/// runtime; frames land in the [`FrameSlot`] and flow through the
/// subscriber registry until `close` or budget exhaustion.
pub struct StreamClient {
    settings: PlayerSettings,
    registry: Arc<SubscriberRegistry>,
    slot: Arc<FrameSlot>,
    state: Arc<StateCell>,
    sos: SignalOfStop,
    context: AppContext,
    session_id: Mutex<Option<SessionId>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl StreamClient {
    pub fn new(settings: PlayerSettings, context: &AppContext) -> Self {
        Self {
            settings,
            registry: Arc::new(SubscriberRegistry::new()),
            slot: Arc::new(FrameSlot::new()),
            state: Arc::new(StateCell::new()),
            sos: context.sos().child(),
            context: context.clone(),
            session_id: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn frame_slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Start the session worker. Returns false when the client is already
    /// open or was closed.
    pub fn open(&self) -> bool {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() || self.state.get() != ConnectionState::Idle {
            return false;
        }

        let mut connector = match WebRtcConnector::new(
            &self.settings,
            Arc::clone(&self.slot),
            Arc::clone(&self.registry),
            self.sos.clone(),
        ) {
            Ok(connector) => connector,
            Err(err) => {
                log::error!("signaling setup failed: {err}");
                return false;
            }
        };

        let settings = self.settings.clone();
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        let sos = self.sos.clone();

        let spawned = thread::Builder::new()
            .name("webrtc-session".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::error!("cannot start network runtime: {err}");
                        state.transition(ConnectionState::Connecting);
                        state.transition(ConnectionState::Failed);
                        registry.publish_playback_state(false, false);
                        return;
                    }
                };

                runtime.block_on(run_session(
                    &mut connector,
                    &settings,
                    &state,
                    &registry,
                    &sos,
                ));
            });

        match spawned {
            Ok(handle) => {
                *self.session_id.lock().unwrap() = Some(self.context.register_session());
                *worker = Some(handle);
                true
            }
            Err(err) => {
                log::error!("cannot spawn session worker: {err}");
                false
            }
        }
    }

    /// Stop the session and release its resources. Always succeeds and is
    /// safe to call repeatedly; only the first call publishes the stopped
    /// notification.
    pub fn close(&self) -> bool {
        let mut worker = self.worker.lock().unwrap();
        if self.state.get() == ConnectionState::Closed {
            return true;
        }

        self.sos.cancel();

        if let Some(handle) = worker.take() {
            let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("session worker did not stop in time, detaching");
            }
        }

        // Failed already notified subscribers that playback ended
        let already_notified = self.state.get() == ConnectionState::Failed;
        self.state.transition(ConnectionState::Closed);

        if let Some(id) = self.session_id.lock().unwrap().take() {
            self.context.unregister_session(id);
        }
        self.slot.clear();

        if !already_notified {
            self.registry.publish_playback_state(false, false);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, PlayerSubscriber};
    use std::collections::VecDeque;

    #[test]
    fn transition_table() {
        use ConnectionState::*;

        assert!(Idle.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Connected));
        assert!(Connecting.can_transition_to(&Reconnecting));
        assert!(Connected.can_transition_to(&Reconnecting));
        assert!(Reconnecting.can_transition_to(&Connecting));
        assert!(Reconnecting.can_transition_to(&Failed));

        // Every live state can close
        for state in [Idle, Connecting, Connected, Reconnecting, Failed] {
            assert!(state.can_transition_to(&Closed), "{state} -> Closed");
        }

        // Invalid jumps
        assert!(!Idle.can_transition_to(&Connected));
        assert!(!Connected.can_transition_to(&Idle));
        // A retry re-enters Connecting first
        assert!(!Reconnecting.can_transition_to(&Connected));
        assert!(!Failed.can_transition_to(&Connecting));
        assert!(!Closed.can_transition_to(&Idle));
        assert!(!Closed.can_transition_to(&Connecting));

        // Self-transitions are no-ops, not errors
        assert!(Reconnecting.can_transition_to(&Reconnecting));
    }

    #[test]
    fn state_cell_rejects_invalid_transition() {
        let cell = StateCell::new();
        assert!(!cell.transition(ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Idle);

        assert!(cell.transition(ConnectionState::Connecting));
        assert!(cell.transition(ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Connected);
    }

    struct StubSession;

    #[async_trait]
    impl ActiveSession for StubSession {
        async fn closed(&mut self) -> ConnectionError {
            ConnectionError::TransportClosed("stub drop".into())
        }

        async fn release(self: Box<Self>) {}
    }

    enum Step {
        Fail,
        /// Connect successfully; the session drops right away.
        Drop,
    }

    struct ScriptedConnector {
        steps: VecDeque<Step>,
        attempts_seen: u32,
    }

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                attempts_seen: 0,
            }
        }
    }

    #[async_trait]
    impl SessionConnector for ScriptedConnector {
        async fn connect(&mut self) -> Result<Box<dyn ActiveSession>, ConnectionError> {
            self.attempts_seen += 1;
            match self.steps.pop_front() {
                Some(Step::Drop) => Ok(Box::new(StubSession)),
                Some(Step::Fail) | None => {
                    Err(ConnectionError::TransportClosed("refused".into()))
                }
            }
        }
    }

    struct PendingConnector;

    #[async_trait]
    impl SessionConnector for PendingConnector {
        async fn connect(&mut self) -> Result<Box<dyn ActiveSession>, ConnectionError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct StateEvents {
        events: Mutex<Vec<(bool, bool)>>,
    }

    impl PlayerSubscriber for StateEvents {
        fn on_playback_state(&self, playing: bool, paused: bool) {
            self.events.lock().unwrap().push((playing, paused));
        }
    }

    fn settings(max_attempts: u32) -> PlayerSettings {
        PlayerSettings {
            max_reconnect_attempts: max_attempts,
            reconnect_cooldown: Duration::from_millis(1),
            ..PlayerSettings::default()
        }
    }

    fn harness() -> (Arc<StateCell>, Arc<SubscriberRegistry>, Arc<StateEvents>) {
        let state = Arc::new(StateCell::new());
        let registry = Arc::new(SubscriberRegistry::new());
        let events = Arc::new(StateEvents::default());
        registry.subscribe(EventKind::PlaybackState, Arc::clone(&events) as _);
        (state, registry, events)
    }

    #[tokio::test]
    async fn budget_exhaustion_fails_once() {
        let (state, registry, events) = harness();
        let mut connector = ScriptedConnector::new(vec![]);
        let sos = SignalOfStop::new();

        run_session(&mut connector, &settings(3), &state, &registry, &sos).await;

        assert_eq!(connector.attempts_seen, 3);
        assert_eq!(state.get(), ConnectionState::Failed);
        // Exactly one stopped notification
        assert_eq!(*events.events.lock().unwrap(), vec![(false, false)]);
    }

    #[tokio::test]
    async fn successful_connection_resets_the_budget() {
        let (state, registry, events) = harness();
        // Two failures, a connection that drops, then nothing but failures
        let mut connector = ScriptedConnector::new(vec![Step::Fail, Step::Fail, Step::Drop]);
        let sos = SignalOfStop::new();

        run_session(&mut connector, &settings(3), &state, &registry, &sos).await;

        // 2 failed + 1 connected + 3 failed after the reset
        assert_eq!(connector.attempts_seen, 6);
        assert_eq!(state.get(), ConnectionState::Failed);
        assert_eq!(
            *events.events.lock().unwrap(),
            vec![(true, false), (false, false)]
        );
    }

    /// Records the connection state as seen at the start of every attempt.
    struct StateSamplingConnector {
        state: Arc<StateCell>,
        seen: Vec<ConnectionState>,
    }

    #[async_trait]
    impl SessionConnector for StateSamplingConnector {
        async fn connect(&mut self) -> Result<Box<dyn ActiveSession>, ConnectionError> {
            self.seen.push(self.state.get());
            Err(ConnectionError::TransportClosed("refused".into()))
        }
    }

    #[tokio::test]
    async fn every_retry_reenters_connecting() {
        let (state, registry, _events) = harness();
        let mut connector = StateSamplingConnector {
            state: Arc::clone(&state),
            seen: Vec::new(),
        };
        let sos = SignalOfStop::new();

        run_session(&mut connector, &settings(3), &state, &registry, &sos).await;

        // Retries pass through Reconnecting but attempt in Connecting
        assert_eq!(
            connector.seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connecting,
                ConnectionState::Connecting
            ]
        );
        assert_eq!(state.get(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_attempt() {
        let (state, registry, events) = harness();
        let sos = SignalOfStop::new();
        let canceller = sos.clone();

        let driver = tokio::spawn({
            let state = Arc::clone(&state);
            let registry = Arc::clone(&registry);
            async move {
                let mut connector = PendingConnector;
                run_session(&mut connector, &settings(100), &state, &registry, &sos).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
        tokio::time::timeout(Duration::from_secs(1), driver)
            .await
            .expect("driver ignored cancellation")
            .unwrap();

        assert_ne!(state.get(), ConnectionState::Failed);
        assert!(events.events.lock().unwrap().is_empty());
    }

    #[test]
    fn client_close_is_idempotent() {
        let context = AppContext::new();
        let client = StreamClient::new(PlayerSettings::default(), &context);
        let events = Arc::new(StateEvents::default());
        client
            .registry()
            .subscribe(EventKind::PlaybackState, Arc::clone(&events) as _);

        // Close succeeds every time but notifies only once
        assert!(client.close());
        assert!(client.close());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(*events.events.lock().unwrap(), vec![(false, false)]);

        // A closed client cannot reopen
        assert!(!client.open());
    }
}
