use serde::Serialize;
use std::fmt;

/// Lifecycle of one peer connection.
///
/// `new → negotiating → connected ⇄ disconnected`; any live state may fail;
/// `failed` and explicit teardown both end in `closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Outcome of feeding a requested state into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested state.
    Stay,
    Enter(SessionState),
    Reject,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }

    pub fn is_live(self) -> bool {
        !matches!(self, SessionState::Failed | SessionState::Closed)
    }

    pub fn next(self, requested: SessionState) -> Transition {
        use SessionState::*;

        if self == requested {
            return Transition::Stay;
        }
        let allowed = match (self, requested) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (New, Negotiating)
            | (Negotiating, Connected)
            | (Connected, Disconnected)
            | (Disconnected, Connected) => true,
            _ => false,
        };
        if allowed {
            Transition::Enter(requested)
        } else {
            Transition::Reject
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
