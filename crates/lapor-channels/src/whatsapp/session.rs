//! WhatsApp session manager: owns the live transport, drives the connection
//! state machine, runs forced restarts and the periodic health probe.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lapor_core::config::SessionConfig;
use lapor_core::error::{LaporError, Result};
use lapor_core::traits::{EventSink, Transport, TransportEvent, TransportFactory};
use lapor_core::types::{ConnectionState, SessionStatus};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::state::{Effect, SessionEvent, transition};

/// Error fragments that mean the underlying browser session is gone.
const SESSION_CLOSED_SIGNATURES: &[&str] = &[
    "session closed",
    "protocol error",
    "target closed",
    "page has been closed",
    "connection closed",
    "connection reset",
    "connection refused",
];

/// Case-insensitive match against the known fatal signatures.
pub fn is_session_closed(message: &str) -> bool {
    let lower = message.to_lowercase();
    SESSION_CLOSED_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

pub fn is_session_closed_error(err: &LaporError) -> bool {
    matches!(err, LaporError::SessionClosed(_)) || is_session_closed(&err.to_string())
}

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Not Ready, or a restart is already running.
    Skipped,
    Healthy(String),
    /// Probe failed with an error that does not look fatal.
    Degraded(String),
    /// Fatal signature matched; a forced restart was requested.
    SessionClosed(String),
}

type EventRx = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

struct Inner {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state: watch::Sender<ConnectionState>,
    reconnecting: AtomicBool,
    /// A restart was requested by the session being brought up.
    restart_pending: AtomicBool,
    /// Restart attempts since the last Ready.
    attempts: AtomicU32,
    generation: AtomicU64,
    /// Generation whose events are accepted. 0 while no transport is live.
    active_generation: AtomicU64,
    received: AtomicU64,
    qr: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: Mutex<Option<EventRx>>,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                transport: RwLock::new(None),
                state,
                reconnecting: AtomicBool::new(false),
                restart_pending: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                active_generation: AtomicU64::new(0),
                received: AtomicU64::new(0),
                qr: Mutex::new(None),
                last_error: Mutex::new(None),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Spawn the event dispatch loop. Returns None if it is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let mut rx = self
            .inner
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let this = self.clone();
        Some(tokio::spawn(async move {
            while let Some((generation, event)) = rx.recv().await {
                this.dispatch(generation, event);
            }
        }))
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            is_reconnecting: self.inner.reconnecting.load(Ordering::SeqCst),
            attempts: self.inner.attempts.load(Ordering::SeqCst),
            qr: slot(&self.inner.qr).clone(),
            last_error: slot(&self.inner.last_error).clone(),
        }
    }

    /// Inbound messages observed since start.
    pub fn messages_received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    /// First bring-up. A no-op unless the session is Uninitialized.
    ///
    /// A failed bring-up hands over to the restart procedure and returns the error.
    pub async fn initialize(&self) -> Result<()> {
        if self.apply(SessionEvent::Initialize) != Effect::BringUp {
            return Ok(());
        }
        if let Err(e) = self.bring_up().await {
            tracing::error!("❌ WhatsApp initialization failed: {e}");
            self.request_restart(format!("initialization failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Block until the session is Ready, or fail.
    ///
    /// Uninitialized sessions are brought up first. Failed sessions fail
    /// immediately, as do sessions that were shut down.
    pub async fn await_ready(&self, timeout: Duration) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Failed => {
                return Err(LaporError::RestartExhausted(
                    self.inner.attempts.load(Ordering::SeqCst),
                ));
            }
            ConnectionState::Disconnected => {
                return Err(LaporError::NotReady("session has been shut down".into()));
            }
            ConnectionState::Uninitialized => {
                // Errors are picked up by the restart procedure; keep waiting.
                let _ = self.initialize().await;
            }
            _ => {}
        }

        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Failed))
                .await
                .map(|s| *s)
        })
        .await;

        match waited {
            Ok(Ok(ConnectionState::Ready)) => Ok(()),
            Ok(Ok(_)) => Err(LaporError::RestartExhausted(
                self.inner.attempts.load(Ordering::SeqCst),
            )),
            Ok(Err(_)) => Err(LaporError::NotReady("state channel closed".into())),
            Err(_) => Err(LaporError::NotReady(format!(
                "still {} after {}s",
                self.state(),
                timeout.as_secs()
            ))),
        }
    }

    /// The live transport, if any.
    pub async fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.inner
            .transport
            .read()
            .await
            .clone()
            .ok_or_else(|| LaporError::NotReady("no active session".into()))
    }

    /// Operator override: restart now with a fresh budget, even from Failed.
    ///
    /// Runs the restart procedure inline. Collapses into a restart that is
    /// already running.
    pub async fn force_restart(&self, reason: &str) -> Result<()> {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::info!("♻️ Restart already in progress, not starting another ({reason})");
            return Ok(());
        }
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.apply(SessionEvent::RestartRequested(reason.to_string()));
        tracing::warn!("♻️ Forced WhatsApp restart: {reason}");
        self.restart_procedure().await
    }

    /// Move to Reconnecting and start a restart in the background.
    pub fn request_restart(&self, reason: impl Into<String>) {
        let event = SessionEvent::RestartRequested(reason.into());
        if let Effect::BeginRestart(reason) = self.apply(event) {
            self.spawn_restart(reason);
        }
    }

    /// Query the transport once and restart on a fatal signature.
    pub async fn probe(&self) -> ProbeOutcome {
        let reconnecting = self.inner.reconnecting.load(Ordering::SeqCst);
        if self.state() != ConnectionState::Ready || reconnecting {
            return ProbeOutcome::Skipped;
        }
        let Ok(transport) = self.transport().await else {
            return ProbeOutcome::Skipped;
        };

        match tokio::time::timeout(self.inner.config.probe_timeout(), transport.get_state()).await {
            Ok(Ok(state)) => {
                tracing::debug!("💓 WhatsApp health check: {state}");
                ProbeOutcome::Healthy(state)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                if is_session_closed_error(&e) {
                    tracing::warn!("💔 Health check detected closed session: {reason}");
                    self.request_restart(format!("health check: {reason}"));
                    ProbeOutcome::SessionClosed(reason)
                } else {
                    tracing::warn!("⚠️ Health check error: {reason}");
                    ProbeOutcome::Degraded(reason)
                }
            }
            Err(_) => {
                tracing::warn!("⚠️ Health check timed out");
                ProbeOutcome::Degraded("timed out".into())
            }
        }
    }

    /// Spawn the periodic health probe.
    pub fn spawn_health_probe(&self) -> JoinHandle<()> {
        let this = self.clone();
        let every = self.inner.config.probe_interval();
        tracing::info!("💓 Health probe started (every {}s)", every.as_secs());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                this.probe().await;
            }
        })
    }

    /// Tear down the session for good.
    pub async fn shutdown(&self) {
        self.apply(SessionEvent::Shutdown);
        self.teardown().await;
        tracing::info!("👋 WhatsApp session shut down");
    }

    fn dispatch(&self, generation: u64, event: TransportEvent) {
        let active = self.inner.active_generation.load(Ordering::SeqCst);
        if generation != active {
            tracing::debug!("Dropping event from stale session #{generation} (active #{active})");
            return;
        }

        let event = match event {
            TransportEvent::Message(msg) => {
                self.inner.received.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "📨 Message in {} from {}: {}",
                    msg.chat_id,
                    msg.sender_id,
                    msg.body
                );
                return;
            }
            TransportEvent::Qr(code) => SessionEvent::Qr(code),
            TransportEvent::Authenticated => SessionEvent::Authenticated,
            TransportEvent::Ready => SessionEvent::Ready,
            TransportEvent::Disconnected(reason) => SessionEvent::Disconnected(reason),
            TransportEvent::AuthFailure(reason) => SessionEvent::AuthFailure(reason),
        };

        if let Effect::BeginRestart(reason) = self.apply(event) {
            self.spawn_restart(reason);
        }
    }

    /// Run one transition and its bookkeeping. Returns the effect left for the caller.
    fn apply(&self, event: SessionEvent) -> Effect {
        let mut effect = Effect::None;
        self.inner.state.send_if_modified(|state| {
            let t = transition(*state, &event);
            effect = t.effect;
            if t.to == t.from {
                return false;
            }
            tracing::info!("🔄 WhatsApp {} → {} ({})", t.from, t.to, t.event);
            *state = t.to;
            true
        });

        match &effect {
            Effect::SurfaceQr(code) => {
                tracing::info!("📱 QR code received, scan it with the WhatsApp app: {code}");
                *slot(&self.inner.qr) = Some(code.clone());
            }
            Effect::ClearCounters => {
                tracing::info!("✅ WhatsApp client is ready");
                self.inner.attempts.store(0, Ordering::SeqCst);
                *slot(&self.inner.qr) = None;
                *slot(&self.inner.last_error) = None;
            }
            Effect::BeginRestart(reason) => {
                *slot(&self.inner.last_error) = Some(reason.clone());
            }
            Effect::Halt => {
                tracing::error!("🛑 WhatsApp session failed, manual restart required");
            }
            Effect::None | Effect::BringUp => {}
        }
        effect
    }

    fn spawn_restart(&self, reason: String) {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Restart already in progress, folding in: {reason}");
            self.inner.restart_pending.store(true, Ordering::SeqCst);
            return;
        }
        tracing::warn!("♻️ Restarting WhatsApp session: {reason}");
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.restart_procedure().await;
        });
    }

    /// Destroy, settle, re-create; bounded by the restart budget.
    /// The caller must have set the in-progress flag.
    ///
    /// Only Ready resets the attempt counter, so a session that comes up and
    /// drops again before Ready still spends budget.
    async fn restart_procedure(&self) -> Result<()> {
        let budget = self.inner.config.restart_budget.max(1);
        let backoff = self.inner.config.restart_backoff();

        loop {
            if self.inner.attempts.load(Ordering::SeqCst) >= budget {
                return self.exhaust(budget).await;
            }
            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            self.teardown().await;
            tokio::time::sleep(self.inner.config.settle()).await;
            if self.is_shut_down() {
                return self.abandon_restart().await;
            }

            self.inner.restart_pending.store(false, Ordering::SeqCst);
            let result = match self.bring_up().await {
                Ok(()) if self.inner.restart_pending.swap(false, Ordering::SeqCst) => Err(
                    LaporError::Transport("session dropped before becoming ready".into()),
                ),
                other => other,
            };
            if self.is_shut_down() {
                return self.abandon_restart().await;
            }

            match result {
                Ok(()) => {
                    self.inner.reconnecting.store(false, Ordering::SeqCst);
                    tracing::info!(
                        "🔁 WhatsApp session re-created (attempt {attempt}/{budget}), waiting for ready"
                    );
                    return Ok(());
                }
                Err(e) => {
                    *slot(&self.inner.last_error) = Some(e.to_string());
                    // A Ready seen before the drop has already reset the counter.
                    let attempt = self.inner.attempts.load(Ordering::SeqCst);
                    if attempt >= budget {
                        tracing::error!("❌ Restart attempt {attempt}/{budget} failed: {e}");
                        return self.exhaust(budget).await;
                    }
                    tracing::warn!(
                        "⚠️ Restart attempt {attempt}/{budget} failed: {e}, retrying in {}ms",
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    if self.is_shut_down() {
                        return self.abandon_restart().await;
                    }
                }
            }
        }
    }

    async fn exhaust(&self, budget: u32) -> Result<()> {
        self.teardown().await;
        self.apply(SessionEvent::RestartExhausted);
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        Err(LaporError::RestartExhausted(budget))
    }

    fn is_shut_down(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    async fn abandon_restart(&self) -> Result<()> {
        tracing::info!("Session shut down, abandoning restart");
        self.teardown().await;
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        Err(LaporError::NotReady("session has been shut down".into()))
    }

    async fn bring_up(&self) -> Result<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = EventSink::new(generation, self.inner.events_tx.clone());
        let transport: Arc<dyn Transport> = Arc::from(self.inner.factory.create(sink)?);

        self.inner.active_generation.store(generation, Ordering::SeqCst);
        *self.inner.transport.write().await = Some(transport.clone());
        tracing::info!("🚀 Starting WhatsApp session #{generation}");

        if let Err(e) = transport.initialize().await {
            let _ = self.inner.active_generation.compare_exchange(
                generation,
                0,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            self.inner.transport.write().await.take();
            self.destroy(transport).await;
            return Err(e);
        }
        Ok(())
    }

    async fn teardown(&self) {
        self.inner.active_generation.store(0, Ordering::SeqCst);
        let previous = self.inner.transport.write().await.take();
        if let Some(transport) = previous {
            self.destroy(transport).await;
        }
    }

    /// Best effort; errors are logged and ignored.
    async fn destroy(&self, transport: Arc<dyn Transport>) {
        match tokio::time::timeout(self.inner.config.probe_timeout(), transport.destroy()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Error destroying WhatsApp session (ignored): {e}"),
            Err(_) => tracing::warn!("Timed out destroying WhatsApp session (ignored)"),
        }
    }
}

fn slot<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
