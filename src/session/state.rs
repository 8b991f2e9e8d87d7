use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one camera session.
///
/// The happy path is `Idle → Connecting → Ready → Recording → Stopping →
/// Downloading → Idle`. `Locked` is entered on a detected hardware fault (or a
/// stale claim during connect) and left through a recovery `open()`. `Failed`
/// ends the session; the controller can still be reopened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Ready,
    Recording,
    Stopping,
    Downloading,
    Locked,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Downloading => "downloading",
            SessionState::Locked => "locked",
            SessionState::Failed => "failed",
        }
    }

    /// Whether the state graph has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (*self, next) {
            // close, hardware fault and fatal error are reachable from anywhere
            (_, Idle) | (_, Locked) | (_, Failed) => true,
            (Idle | Locked | Failed, Connecting) => true,
            (Connecting | Locked, Ready) => true,
            // recovery of a take that was in progress when the camera went silent
            (Connecting | Locked, Recording) => true,
            (Ready, Recording) => true,
            (Recording, Stopping) => true,
            // record-end rejected; the camera keeps recording
            (Stopping, Recording) => true,
            // record-end accepted but no file ever appeared
            (Stopping, Ready) => true,
            (Stopping, Downloading) => true,
            // retry of a download that was cancelled or exhausted
            (Idle | Ready, Downloading) => true,
            _ => false,
        }
    }

    /// States in which the device handle is expected to be held.
    pub fn holds_handle(&self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Recording
                | SessionState::Stopping
                | SessionState::Downloading
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
