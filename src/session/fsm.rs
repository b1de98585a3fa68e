//! The listening-session state machine.
//!
//! One explicit finite-state machine with a pure transition function,
//! driven by discrete events. The driver owns one instance per session and
//! consults it before acting, so ordering rules like "no new capture while
//! an utterance is finalizing" are encoded in the table instead of in
//! scattered flags.

use serde::Serialize;

/// Where a listening session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session running.
    Idle,
    /// Opening the microphone and (in streaming mode) the socket.
    Connecting,
    /// Session live, waiting for speech.
    Listening,
    /// Speech detected, accumulating an utterance.
    Capturing,
    /// Utterance ended, waiting for its final transcript.
    Finalizing,
    /// Session dead after a fatal error; requires explicit re-initiation.
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Capturing => "capturing",
            Self::Finalizing => "finalizing",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Discrete inputs to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// The caller asked for a session.
    StartRequested,
    /// Microphone (and socket, if streaming) are up.
    Ready,
    /// A frame classified as speech arrived.
    EnergyAbove,
    /// Sustained silence exceeded the debounce while capturing.
    SilenceElapsed,
    /// The final transcript for the current utterance was handled.
    TranscriptDone,
    /// The streaming socket dropped; a reconnect is being attempted.
    SocketClosed,
    /// Reconnection succeeded.
    Reconnected,
    /// Unrecoverable failure (capture error, retries exhausted).
    Failed,
    /// The caller asked to stop listening.
    StopRequested,
}

/// Pure transition function. `None` means the event is ignored in this
/// state (notably: energy events while finalizing or reconnecting).
pub fn transition(state: SessionState, input: SessionInput) -> Option<SessionState> {
    use SessionInput::*;
    use SessionState::*;

    let next = match (state, input) {
        (Idle, StartRequested) => Connecting,
        (Connecting, Ready) => Listening,
        (Listening, EnergyAbove) => Capturing,
        (Capturing, SilenceElapsed) => Finalizing,
        (Finalizing, TranscriptDone) => Listening,
        // Socket loss interrupts whatever was in progress
        (Listening | Capturing | Finalizing, SocketClosed) => Connecting,
        (Connecting, Reconnected) => Listening,
        (_, Failed) => Error,
        (_, StopRequested) => Idle,
        _ => return None,
    };
    Some(next)
}

/// The machine itself: current state plus the transition table.
#[derive(Debug)]
pub struct SessionFsm {
    state: SessionState,
}

impl SessionFsm {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply one input. Returns the new state if it changed, `None` if the
    /// input was ignored.
    pub fn apply(&mut self, input: SessionInput) -> Option<SessionState> {
        let next = transition(self.state, input)?;
        if next != self.state {
            self.state = next;
            Some(next)
        } else {
            None
        }
    }

    pub fn is(&self, state: SessionState) -> bool {
        self.state == state
    }
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionInput::*;
    use super::SessionState::*;
    use super::*;

    #[test]
    fn test_happy_path_one_utterance() {
        let mut fsm = SessionFsm::new();
        assert_eq!(fsm.apply(StartRequested), Some(Connecting));
        assert_eq!(fsm.apply(Ready), Some(Listening));
        assert_eq!(fsm.apply(EnergyAbove), Some(Capturing));
        assert_eq!(fsm.apply(SilenceElapsed), Some(Finalizing));
        assert_eq!(fsm.apply(TranscriptDone), Some(Listening));
    }

    #[test]
    fn test_no_capture_while_finalizing() {
        let mut fsm = SessionFsm::new();
        fsm.apply(StartRequested);
        fsm.apply(Ready);
        fsm.apply(EnergyAbove);
        fsm.apply(SilenceElapsed);
        assert_eq!(fsm.state(), Finalizing);
        // Speech during finalization must not start an overlapping capture
        assert_eq!(fsm.apply(EnergyAbove), None);
        assert_eq!(fsm.state(), Finalizing);
    }

    #[test]
    fn test_energy_in_idle_is_ignored() {
        let mut fsm = SessionFsm::new();
        assert_eq!(fsm.apply(EnergyAbove), None);
        assert_eq!(fsm.apply(SilenceElapsed), None);
        assert_eq!(fsm.state(), Idle);
    }

    #[test]
    fn test_socket_loss_and_recovery() {
        let mut fsm = SessionFsm::new();
        fsm.apply(StartRequested);
        fsm.apply(Ready);
        fsm.apply(EnergyAbove);
        assert_eq!(fsm.apply(SocketClosed), Some(Connecting));
        // No frames are processed while reconnecting
        assert_eq!(fsm.apply(EnergyAbove), None);
        assert_eq!(fsm.apply(Reconnected), Some(Listening));
    }

    #[test]
    fn test_failure_is_terminal_until_stop() {
        let mut fsm = SessionFsm::new();
        fsm.apply(StartRequested);
        fsm.apply(Ready);
        assert_eq!(fsm.apply(Failed), Some(Error));
        assert_eq!(fsm.apply(EnergyAbove), None);
        assert_eq!(fsm.apply(Ready), None);
        assert_eq!(fsm.apply(StopRequested), Some(Idle));
    }

    #[test]
    fn test_stop_works_from_any_state() {
        for setup in [
            vec![],
            vec![StartRequested],
            vec![StartRequested, Ready],
            vec![StartRequested, Ready, EnergyAbove],
            vec![StartRequested, Ready, EnergyAbove, SilenceElapsed],
        ] {
            let mut fsm = SessionFsm::new();
            for input in setup {
                fsm.apply(input);
            }
            fsm.apply(StopRequested);
            assert_eq!(fsm.state(), Idle);
        }
    }
}
