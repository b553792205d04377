//! Events delivered from a transcode worker to its handle.

use std::fmt;

use uuid::Uuid;

use crate::pipeline::{TranscodeError, TranscodeOutput};

/// Identifies one transcode invocation in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TranscodeId(Uuid);

impl TranscodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used for worker thread names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TranscodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TranscodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress or terminal outcome of a transcode.
///
/// A worker emits any number of `Progress` events with strictly increasing
/// percentages followed by exactly one of `Completed` or `Failed`.
#[derive(Debug)]
pub enum TranscodeEvent {
    Progress { percent: u8 },
    Completed(TranscodeOutput),
    Failed { error: TranscodeError },
}

impl TranscodeEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TranscodeEvent::Progress { .. })
    }

    /// Error message of a `Failed` event.
    pub fn message(&self) -> Option<String> {
        match self {
            TranscodeEvent::Failed { error } => Some(error.to_string()),
            _ => None,
        }
    }
}
