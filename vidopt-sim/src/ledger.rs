//! Lifecycle ledger shared by every simulated resource of one backend.
//!
//! Each source, codec and writer the backend hands out records when it is
//! opened and when it is released. Tests inspect the ledger afterwards to
//! check that teardown released everything exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use vidopt_core::media::{CodecRole, TrackKind};

/// Kind of simulated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Source,
    Codec(CodecRole, TrackKind),
    Writer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Source => write!(f, "source"),
            ResourceKind::Codec(role, kind) => write!(f, "{kind} {role}"),
            ResourceKind::Writer => write!(f, "writer"),
        }
    }
}

/// Lifecycle transition of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerAction {
    Open,
    Start,
    Stop,
    Release,
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAction::Open => write!(f, "open"),
            LedgerAction::Start => write!(f, "start"),
            LedgerAction::Stop => write!(f, "stop"),
            LedgerAction::Release => write!(f, "release"),
        }
    }
}

/// Identity of one resource instance handed out by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub serial: u64,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.serial)
    }
}

/// One recorded transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub resource: ResourceId,
    pub action: LedgerAction,
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.resource, self.action)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    next_serial: u64,
    entries: Vec<LedgerEntry>,
}

/// Append-only record of resource transitions, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an identity for a new resource and records its opening.
    pub fn open(&self, kind: ResourceKind) -> ResourceId {
        let mut state = self.state.lock();
        state.next_serial += 1;
        let resource = ResourceId {
            kind,
            serial: state.next_serial,
        };
        state.entries.push(LedgerEntry {
            resource,
            action: LedgerAction::Open,
        });
        resource
    }

    pub fn record(&self, resource: ResourceId, action: LedgerAction) {
        self.state.lock().entries.push(LedgerEntry { resource, action });
    }

    /// Every transition in the order it happened.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().entries.clone()
    }

    /// Number of times `action` happened to resources of `kind`.
    pub fn count(&self, kind: ResourceKind, action: LedgerAction) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.resource.kind == kind && entry.action == action)
            .count()
    }

    /// Releases recorded per resource.
    pub fn release_counts(&self) -> BTreeMap<ResourceId, usize> {
        let state = self.state.lock();
        let mut counts = BTreeMap::new();
        for entry in &state.entries {
            let count = counts.entry(entry.resource).or_insert(0);
            if entry.action == LedgerAction::Release {
                *count += 1;
            }
        }
        counts
    }

    /// Resources opened but never released.
    pub fn unreleased(&self) -> Vec<ResourceId> {
        self.release_counts()
            .into_iter()
            .filter_map(|(resource, count)| (count == 0).then_some(resource))
            .collect()
    }

    /// Resources released more than once.
    pub fn released_twice(&self) -> Vec<ResourceId> {
        self.release_counts()
            .into_iter()
            .filter_map(|(resource, count)| (count > 1).then_some(resource))
            .collect()
    }

    /// Whether every opened resource was released exactly once.
    pub fn is_balanced(&self) -> bool {
        self.release_counts().values().all(|count| *count == 1)
    }

    /// Position of the release of the first resource of `kind`.
    pub fn release_position(&self, kind: ResourceKind) -> Option<usize> {
        self.state.lock().entries.iter().position(|entry| {
            entry.resource.kind == kind && entry.action == LedgerAction::Release
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_after_single_release() {
        let ledger = ResourceLedger::new();
        let source = ledger.open(ResourceKind::Source);
        let writer = ledger.open(ResourceKind::Writer);
        assert_eq!(ledger.unreleased(), vec![source, writer]);

        ledger.record(source, LedgerAction::Release);
        ledger.record(writer, LedgerAction::Release);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_double_release_is_reported() {
        let ledger = ResourceLedger::new();
        let decoder = ledger.open(ResourceKind::Codec(CodecRole::Decoder, TrackKind::Video));
        ledger.record(decoder, LedgerAction::Release);
        ledger.record(decoder, LedgerAction::Release);

        assert!(!ledger.is_balanced());
        assert_eq!(ledger.released_twice(), vec![decoder]);
        assert_eq!(decoder.to_string(), "video decoder#1");
    }

    #[test]
    fn test_counts_by_kind_and_action() {
        let ledger = ResourceLedger::new();
        let writer = ledger.open(ResourceKind::Writer);
        ledger.record(writer, LedgerAction::Start);
        ledger.record(writer, LedgerAction::Stop);

        assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Start), 1);
        assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Release), 0);
        assert_eq!(ledger.entries().len(), 3);
    }
}
