//! Programming session state machine
//!
//! Every vendor protocol brackets a codeplug transfer with an "enter
//! programming mode" and a "leave programming mode" request. [`Session`]
//! tracks where the CPS is in that bracket and reports the transitions that
//! begin and end a capture.

use tracing::debug;

use crate::events::CaptureEvent;

/// State of the programming session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the CPS to enter programming mode
    #[default]
    Initial,
    /// In programming mode: reads and writes are served
    Program,
    /// A capture failed; the next program request starts over
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_programming(&self) -> bool {
        self.state == SessionState::Program
    }

    /// Enter programming mode. Returns [`CaptureEvent::Started`] unless the
    /// session was already in programming mode.
    pub fn enter_program(&mut self) -> Option<CaptureEvent> {
        let previous = std::mem::replace(&mut self.state, SessionState::Program);
        debug!("Session {:?} -> Program", previous);
        match previous {
            SessionState::Program => None,
            SessionState::Initial | SessionState::Error => Some(CaptureEvent::Started),
        }
    }

    /// Leave programming mode. Returns [`CaptureEvent::Ended`] only if the
    /// session was in programming mode.
    pub fn end_program(&mut self) -> Option<CaptureEvent> {
        let previous = std::mem::replace(&mut self.state, SessionState::Initial);
        debug!("Session {:?} -> Initial", previous);
        (previous == SessionState::Program).then_some(CaptureEvent::Ended)
    }

    /// Mark the session as failed
    pub fn fail(&mut self) {
        self.state = SessionState::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_brackets() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Initial);
        assert_eq!(session.end_program(), None);

        assert_eq!(session.enter_program(), Some(CaptureEvent::Started));
        assert!(session.is_programming());
        assert_eq!(session.enter_program(), None);

        assert_eq!(session.end_program(), Some(CaptureEvent::Ended));
        assert_eq!(session.state(), SessionState::Initial);
        assert_eq!(session.end_program(), None);
    }

    #[test]
    fn test_session_restarts_after_error() {
        let mut session = Session::new();
        session.enter_program();
        session.fail();
        assert!(!session.is_programming());
        assert_eq!(session.enter_program(), Some(CaptureEvent::Started));

        session.fail();
        assert_eq!(session.end_program(), None);
        assert_eq!(session.state(), SessionState::Initial);
    }
}
