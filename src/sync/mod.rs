// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod retry;
mod scheduler;
mod worker;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::datastore::{ChangeListVersions, VersionStore};
use crate::error::{StoreError, SyncError};
use crate::model::{ChangeListEntry, EntityKind};
use crate::progress::{ProgressEvent, SharedProgressReporter};

pub use retry::RetryPolicy;
pub use scheduler::{
    AlwaysOnline, MIN_SYNC_INTERVAL, NetworkMonitor, SyncManager, SyncOptions,
    WatchNetworkMonitor,
};
pub use worker::{SyncWorker, WorkOutcome};

/// Access to the change list cursors for one sync pass.
///
/// Implementations guarantee that change list syncs using the same
/// synchronizer never run concurrently for the same entity type.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn get_change_list_versions(&self) -> Result<ChangeListVersions, StoreError>;

    async fn update_change_list_versions(
        &self,
        update: &(dyn Fn(ChangeListVersions) -> ChangeListVersions + Send + Sync),
    ) -> Result<ChangeListVersions, StoreError>;

    /// Fires when the pass should unwind
    fn cancellation(&self) -> &CancellationToken;

    fn reporter(&self) -> &SharedProgressReporter;
}

/// A local model kept up to date through a remote change list
#[async_trait]
pub trait ChangeListModel: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Cursor of this model within all cursors
    fn read_version(&self, versions: &ChangeListVersions) -> i64 {
        versions.get(self.kind())
    }

    /// Replace the cursor of this model, leaving the others untouched
    fn update_version(&self, versions: ChangeListVersions, latest: i64) -> ChangeListVersions {
        versions.with(self.kind(), latest)
    }

    /// Remote entries changed strictly after `after`
    async fn fetch_change_list(&self, after: i64) -> Result<Vec<ChangeListEntry>, SyncError>;

    /// Remove local rows; ids that are not present must be ignored
    async fn delete_models(&self, ids: &[String]) -> Result<(), SyncError>;

    /// Pull full records for `ids` and store them locally
    async fn update_models(&self, ids: &[String]) -> Result<(), SyncError>;

    /// Make the applied changes durable; called before the cursor moves
    async fn persist(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Something whose local data can be brought in line with the remote
#[async_trait]
pub trait Syncable: Send + Sync {
    /// `Ok(false)` when the sync failed and may be retried. Cancellation and
    /// malformed change lists are returned as errors.
    async fn sync_with(&self, synchronizer: &dyn Synchronizer) -> Result<bool, SyncError>;
}

#[async_trait]
impl<T: ChangeListModel> Syncable for T {
    async fn sync_with(&self, synchronizer: &dyn Synchronizer) -> Result<bool, SyncError> {
        change_list_sync(synchronizer, self).await
    }
}

/// Synchronizer backed by a [`VersionStore`]
pub struct StoreSynchronizer {
    store: Arc<dyn VersionStore>,
    cancel: CancellationToken,
    reporter: SharedProgressReporter,
}

impl StoreSynchronizer {
    pub fn new(
        store: Arc<dyn VersionStore>,
        cancel: CancellationToken,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            store,
            cancel,
            reporter,
        }
    }
}

#[async_trait]
impl Synchronizer for StoreSynchronizer {
    async fn get_change_list_versions(&self) -> Result<ChangeListVersions, StoreError> {
        self.store.read().await
    }

    async fn update_change_list_versions(
        &self,
        update: &(dyn Fn(ChangeListVersions) -> ChangeListVersions + Send + Sync),
    ) -> Result<ChangeListVersions, StoreError> {
        self.store.update(update).await
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn reporter(&self) -> &SharedProgressReporter {
        &self.reporter
    }
}

/// Bring one model up to date with its remote change list.
///
/// 1. Read the model's cursor and fetch the change list after it
/// 2. Apply deletions, then updates
/// 3. Persist the model, then advance the cursor to the highest version seen
///
/// An empty change list touches nothing, not even the cursor. The cursor is
/// only written after both apply steps succeeded and the model was persisted,
/// so an interrupted pass is redone from the old cursor. Failures other than cancellation and
/// malformed entries are logged and reported as `Ok(false)`.
pub async fn change_list_sync<M>(
    synchronizer: &dyn Synchronizer,
    model: &M,
) -> Result<bool, SyncError>
where
    M: ChangeListModel + ?Sized,
{
    let kind = model.kind();
    match apply_change_list(synchronizer, model).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_transient() => {
            warn!(%kind, error = %e, "change list sync failed");
            synchronizer.reporter().report(ProgressEvent::EntitySyncFailed {
                kind,
                error: e.to_string(),
            });
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn apply_change_list<M>(synchronizer: &dyn Synchronizer, model: &M) -> Result<(), SyncError>
where
    M: ChangeListModel + ?Sized,
{
    let kind = model.kind();
    let cancel = synchronizer.cancellation();
    let reporter = synchronizer.reporter();

    let current = model.read_version(&synchronizer.get_change_list_versions().await?);
    let change_list = cancellable(cancel, model.fetch_change_list(current)).await?;

    reporter.report(ProgressEvent::ChangeListFetched {
        kind,
        after: current,
        changes: change_list.len(),
    });

    if change_list.is_empty() {
        debug!(%kind, version = current, "already up to date");
        return Ok(());
    }

    let latest = validate_change_list(kind, current, &change_list)?;
    let (deleted, updated) = partition_change_list(change_list);

    if !deleted.is_empty() {
        cancellable(cancel, model.delete_models(&deleted)).await?;
        reporter.report(ProgressEvent::ModelsDeleted {
            kind,
            count: deleted.len(),
        });
    }

    if !updated.is_empty() {
        cancellable(cancel, model.update_models(&updated)).await?;
        reporter.report(ProgressEvent::ModelsUpdated {
            kind,
            count: updated.len(),
        });
    }

    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    model.persist().await?;

    synchronizer
        .update_change_list_versions(&|versions| model.update_version(versions, latest))
        .await?;

    info!(
        %kind,
        from = current,
        to = latest,
        deleted = deleted.len(),
        updated = updated.len(),
        "change list applied"
    );
    reporter.report(ProgressEvent::VersionCommitted {
        kind,
        version: latest,
    });

    Ok(())
}

/// Check every entry against the cursor and return the highest version
fn validate_change_list(
    kind: EntityKind,
    current: i64,
    change_list: &[ChangeListEntry],
) -> Result<i64, SyncError> {
    let mut latest = current;
    for entry in change_list {
        let malformed = |reason: String| SyncError::MalformedChangeList {
            kind,
            id: entry.id.clone(),
            version: entry.change_list_version,
            reason,
        };

        if entry.id.is_empty() {
            return Err(malformed("empty id".to_string()));
        }
        if entry.change_list_version <= current {
            return Err(malformed(format!("version is not after cursor {current}")));
        }
        latest = latest.max(entry.change_list_version);
    }
    Ok(latest)
}

/// Split into (deleted, updated) ids, keeping only the newest entry per id
fn partition_change_list(change_list: Vec<ChangeListEntry>) -> (Vec<String>, Vec<String>) {
    let mut newest: HashMap<String, ChangeListEntry> = HashMap::new();
    for entry in change_list {
        let is_newer = newest
            .get(&entry.id)
            .is_none_or(|seen| entry.change_list_version > seen.change_list_version);
        if is_newer {
            newest.insert(entry.id.clone(), entry);
        }
    }

    let mut entries: Vec<ChangeListEntry> = newest.into_values().collect();
    entries.sort_by_key(|e| e.change_list_version);

    let (deleted, updated): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_delete);
    (
        deleted.into_iter().map(|e| e.id).collect(),
        updated.into_iter().map(|e| e.id).collect(),
    )
}

async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::datastore::PreferencesStore;

    /// Version store that counts cursor writes
    pub struct CountingStore {
        inner: PreferencesStore,
        writes: AtomicUsize,
    }

    impl CountingStore {
        /// Start with every cursor unsynced except the podcast cursor
        pub async fn with_podcast_version(version: i64) -> Self {
            let inner = PreferencesStore::in_memory();
            inner
                .write(ChangeListVersions::default().with(EntityKind::Podcast, version))
                .await
                .unwrap();
            Self {
                inner,
                writes: AtomicUsize::new(0),
            }
        }

        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VersionStore for CountingStore {
        async fn read(&self) -> Result<ChangeListVersions, StoreError> {
            self.inner.read().await
        }

        async fn write(&self, versions: ChangeListVersions) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write(versions).await
        }

        async fn update(
            &self,
            update: &(dyn Fn(ChangeListVersions) -> ChangeListVersions + Send + Sync),
        ) -> Result<ChangeListVersions, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.update(update).await
        }
    }
}
