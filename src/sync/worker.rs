// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::LocalCache;
use crate::datastore::PreferencesStore;
use crate::error::SyncError;
use crate::network::RemoteDataSource;
use crate::progress::{NoopReporter, SharedProgressReporter};
use crate::repository::{CategoryRepository, EpisodeRepository, PodcastRepository};

use super::{StoreSynchronizer, Syncable};

/// Result of one sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Every syncable is up to date
    Success,
    /// At least one syncable failed in a way that may go away
    Retry,
    /// The remote broke the change list contract; retrying will not help
    Failure,
}

/// One sync pass over all syncables, run concurrently
pub struct SyncWorker {
    preferences: Arc<PreferencesStore>,
    syncables: Vec<Arc<dyn Syncable>>,
    reporter: SharedProgressReporter,
}

impl SyncWorker {
    pub fn new(preferences: Arc<PreferencesStore>) -> Self {
        Self {
            preferences,
            syncables: Vec::new(),
            reporter: NoopReporter::shared(),
        }
    }

    /// Worker syncing categories, podcasts and episodes of `cache` from `remote`
    pub fn for_catalog(
        cache: Arc<LocalCache>,
        remote: Arc<dyn RemoteDataSource>,
        preferences: Arc<PreferencesStore>,
        batch_size: usize,
        reporter: SharedProgressReporter,
    ) -> Self {
        let categories = CategoryRepository::new(cache.clone(), remote.clone());
        let podcasts =
            PodcastRepository::new(cache.clone(), remote.clone()).with_batch_size(batch_size);
        let episodes = EpisodeRepository::new(cache, remote, preferences.clone())
            .with_batch_size(batch_size)
            .with_reporter(reporter.clone());

        Self::new(preferences)
            .with_reporter(reporter)
            .with_syncable(Arc::new(categories))
            .with_syncable(Arc::new(podcasts))
            .with_syncable(Arc::new(episodes))
    }

    pub fn with_syncable(mut self, syncable: Arc<dyn Syncable>) -> Self {
        self.syncables.push(syncable);
        self
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run every syncable once.
    ///
    /// Returns `Err(SyncError::Cancelled)` if `cancel` fired; whatever the
    /// other syncables committed before that stays committed.
    pub async fn do_work(&self, cancel: &CancellationToken) -> Result<WorkOutcome, SyncError> {
        let synchronizer = StoreSynchronizer::new(
            self.preferences.clone(),
            cancel.clone(),
            self.reporter.clone(),
        );

        let results = join_all(
            self.syncables
                .iter()
                .map(|syncable| syncable.sync_with(&synchronizer)),
        )
        .await;

        if results
            .iter()
            .any(|r| r.as_ref().is_err_and(SyncError::is_cancellation))
        {
            info!("sync pass cancelled");
            return Err(SyncError::Cancelled);
        }

        let mut outcome = WorkOutcome::Success;
        for result in results {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    if outcome == WorkOutcome::Success {
                        outcome = WorkOutcome::Retry;
                    }
                }
                Err(e) => {
                    error!(error = %e, "sync pass failed permanently");
                    outcome = WorkOutcome::Failure;
                }
            }
        }

        if outcome == WorkOutcome::Success
            && let Err(e) = self.preferences.mark_synced(Utc::now()).await
        {
            warn!(error = %e, "failed to record sync time");
        }

        Ok(outcome)
    }
}
