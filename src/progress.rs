use std::sync::Arc;

use crate::model::EntityKind;

/// Events emitted during synchronization for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A sync pass is starting
    SyncPassStarted {
        /// 1 for the first attempt, incremented on each retry
        attempt: u32,
    },

    /// The change list of one entity type has been fetched
    ChangeListFetched {
        kind: EntityKind,
        /// Cursor the change list was requested after
        after: i64,
        changes: usize,
    },

    /// Rows deleted server-side were removed locally
    ModelsDeleted { kind: EntityKind, count: usize },

    /// Changed rows were pulled and stored locally
    ModelsUpdated { kind: EntityKind, count: usize },

    /// The cursor of an entity type was advanced
    VersionCommitted { kind: EntityKind, version: i64 },

    /// Syncing one entity type failed; the others are unaffected
    EntitySyncFailed { kind: EntityKind, error: String },

    /// Episodes of followed podcasts arrived that were not known before
    NewEpisodesAvailable { episode_uris: Vec<String> },

    /// A sync pass finished
    SyncPassCompleted { success: bool },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Collects every reported event for later inspection
    #[derive(Default)]
    pub struct RecordingReporter {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingReporter {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
