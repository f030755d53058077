//! Connection state machine as a pure transition table.
//!
//! `SessionManager` feeds every lifecycle signal through [`transition`] and
//! carries out the returned [`Effect`]. Nothing else mutates the state.

use lapor_core::types::ConnectionState;

/// Signals that can move the session between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Initialize,
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
    AuthFailure(String),
    /// Operator override, failed health probe, or a send that hit a dead session.
    RestartRequested(String),
    RestartExhausted,
    Shutdown,
}

impl SessionEvent {
    fn label(&self) -> &'static str {
        match self {
            SessionEvent::Initialize => "initialize",
            SessionEvent::Qr(_) => "qr",
            SessionEvent::Authenticated => "authenticated",
            SessionEvent::Ready => "ready",
            SessionEvent::Disconnected(_) => "disconnected",
            SessionEvent::AuthFailure(_) => "auth_failure",
            SessionEvent::RestartRequested(_) => "restart_requested",
            SessionEvent::RestartExhausted => "restart_exhausted",
            SessionEvent::Shutdown => "shutdown",
        }
    }
}

/// Side effect the manager must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    BringUp,
    SurfaceQr(String),
    /// Reset retry counters and wake readiness waiters.
    ClearCounters,
    BeginRestart(String),
    /// Stop auto-retry; operator must intervene.
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub effect: Effect,
    pub event: &'static str,
}

/// Compute the next state for `event` arriving in `from`.
pub fn transition(from: ConnectionState, event: &SessionEvent) -> Transition {
    use ConnectionState::*;

    let (to, effect) = match (from, event) {
        (Uninitialized, SessionEvent::Initialize) => (Initializing, Effect::BringUp),

        (Initializing | Authenticating | Reconnecting, SessionEvent::Qr(code)) => {
            (Authenticating, Effect::SurfaceQr(code.clone()))
        }

        (Initializing | Authenticating, SessionEvent::Authenticated) => {
            (Authenticating, Effect::None)
        }

        (Initializing | Authenticating | Reconnecting, SessionEvent::Ready) => {
            (Ready, Effect::ClearCounters)
        }

        // While Reconnecting the manager collapses this into the running restart.
        (
            Ready | Initializing | Authenticating | Reconnecting,
            SessionEvent::Disconnected(reason),
        ) => (Reconnecting, Effect::BeginRestart(reason.clone())),

        // Auth failure passes through Failed straight into a restart.
        (_, SessionEvent::AuthFailure(reason)) => {
            (Reconnecting, Effect::BeginRestart(format!("auth failure: {reason}")))
        }

        (_, SessionEvent::RestartRequested(reason)) => {
            (Reconnecting, Effect::BeginRestart(reason.clone()))
        }

        (Initializing | Authenticating | Reconnecting, SessionEvent::RestartExhausted) => {
            (Failed, Effect::Halt)
        }

        (_, SessionEvent::Shutdown) => (Disconnected, Effect::None),

        (state, _) => (state, Effect::None),
    };

    Transition {
        from,
        to,
        effect,
        event: event.label(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn to(from: ConnectionState, event: SessionEvent) -> (ConnectionState, Effect) {
        let t = transition(from, &event);
        (t.to, t.effect)
    }

    #[test]
    fn test_happy_path() {
        assert_eq!(to(Uninitialized, SessionEvent::Initialize), (Initializing, Effect::BringUp));
        assert_eq!(
            to(Initializing, SessionEvent::Qr("2@abc".into())),
            (Authenticating, Effect::SurfaceQr("2@abc".into()))
        );
        assert_eq!(to(Authenticating, SessionEvent::Authenticated), (Authenticating, Effect::None));
        assert_eq!(to(Authenticating, SessionEvent::Ready), (Ready, Effect::ClearCounters));
    }

    #[test]
    fn test_restored_session_skips_qr() {
        assert_eq!(to(Initializing, SessionEvent::Ready), (Ready, Effect::ClearCounters));
    }

    #[test]
    fn test_disconnect_from_ready_restarts() {
        let (state, effect) = to(Ready, SessionEvent::Disconnected("NAVIGATION".into()));
        assert_eq!(state, Reconnecting);
        assert_eq!(effect, Effect::BeginRestart("NAVIGATION".into()));
    }

    #[test]
    fn test_disconnect_while_reconnecting_requests_restart() {
        assert_eq!(
            to(Reconnecting, SessionEvent::Disconnected("x".into())),
            (Reconnecting, Effect::BeginRestart("x".into()))
        );
        assert_eq!(
            to(Failed, SessionEvent::Disconnected("x".into())),
            (Failed, Effect::None)
        );
    }

    #[test]
    fn test_auth_failure_from_any_state_restarts() {
        for from in [Uninitialized, Initializing, Authenticating, Ready, Reconnecting, Failed] {
            let (state, effect) = to(from, SessionEvent::AuthFailure("bad".into()));
            assert_eq!(state, Reconnecting);
            assert!(matches!(effect, Effect::BeginRestart(_)));
        }
    }

    #[test]
    fn test_exhaustion_and_manual_override() {
        assert_eq!(to(Reconnecting, SessionEvent::RestartExhausted), (Failed, Effect::Halt));
        assert_eq!(to(Ready, SessionEvent::RestartExhausted), (Ready, Effect::None));
        let (state, effect) = to(Failed, SessionEvent::RestartRequested("operator".into()));
        assert_eq!(state, Reconnecting);
        assert_eq!(effect, Effect::BeginRestart("operator".into()));
    }

    #[test]
    fn test_restart_reaches_ready() {
        assert_eq!(to(Reconnecting, SessionEvent::Ready), (Ready, Effect::ClearCounters));
    }

    #[test]
    fn test_stray_events_do_not_move_state() {
        assert_eq!(to(Failed, SessionEvent::Ready), (Failed, Effect::None));
        assert_eq!(to(Ready, SessionEvent::Initialize), (Ready, Effect::None));
        assert_eq!(to(Uninitialized, SessionEvent::Qr("x".into())), (Uninitialized, Effect::None));
    }

    #[test]
    fn test_shutdown() {
        assert_eq!(to(Ready, SessionEvent::Shutdown), (Disconnected, Effect::None));
    }
}
