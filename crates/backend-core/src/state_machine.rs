use crate::types::{SessionEvent, SessionState};

/// Tracks the per-process session lifecycle.
///
/// `Uninitialized` is left exactly once; after that the machine only moves
/// between `LoggedOut` and `LoggedIn`. Readiness is published by the
/// session channels, not tracked here.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether the first restore/switch has resolved.
    pub fn is_initialized(&self) -> bool {
        self.state != SessionState::Uninitialized
    }

    pub fn active_account_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::LoggedIn { account_id } => Some(account_id),
            _ => None,
        }
    }

    /// An account's handle became the active one.
    pub fn logged_in(&mut self, account_id: impl Into<String>) -> Option<SessionEvent> {
        self.transition(SessionState::LoggedIn {
            account_id: account_id.into(),
        })
    }

    /// The active handle, if any, is gone.
    pub fn logged_out(&mut self) -> Option<SessionEvent> {
        self.transition(SessionState::LoggedOut)
    }

    fn transition(&mut self, next: SessionState) -> Option<SessionEvent> {
        if self.state == next {
            return None;
        }
        self.state = next.clone();
        Some(SessionEvent::StateChanged { state: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        let sm = SessionStateMachine::default();
        assert_eq!(sm.state(), &SessionState::Uninitialized);
        assert!(!sm.is_initialized());
        assert_eq!(sm.active_account_id(), None);
    }

    #[test]
    fn login_switch_and_logout_emit_state_changes() {
        let mut sm = SessionStateMachine::default();

        let event = sm.logged_in("a").expect("first login emits");
        assert_eq!(
            event,
            SessionEvent::StateChanged {
                state: SessionState::LoggedIn {
                    account_id: "a".into()
                }
            }
        );
        assert!(sm.is_initialized());

        assert!(sm.logged_in("b").is_some());
        assert_eq!(sm.active_account_id(), Some("b"));

        assert!(sm.logged_out().is_some());
        assert_eq!(sm.state(), &SessionState::LoggedOut);
        assert!(sm.is_initialized());
    }

    #[test]
    fn repeated_state_is_not_re_emitted() {
        let mut sm = SessionStateMachine::default();
        assert!(sm.logged_out().is_some());
        assert!(sm.logged_out().is_none());
    }
}
