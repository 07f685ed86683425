use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{LocalCache, Observed, PopulatedPodcast};
use crate::error::SyncError;
use crate::model::{CategoryEntity, ChangeListEntry, EntityKind, NetworkPodcast, PodcastEntity};
use crate::network::RemoteDataSource;
use crate::sync::ChangeListModel;

use super::DEFAULT_SYNC_BATCH_SIZE;

/// Podcasts, read from the local cache and synced from the remote
pub struct PodcastRepository {
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteDataSource>,
    batch_size: usize,
}

impl PodcastRepository {
    pub fn new(cache: Arc<LocalCache>, remote: Arc<dyn RemoteDataSource>) -> Self {
        Self {
            cache,
            remote,
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Podcasts ordered by their newest episode
    pub fn podcasts(&self) -> Observed<Vec<PopulatedPodcast>> {
        self.cache.observe_podcasts(None)
    }

    pub fn podcasts_in_category(&self, category_id: &str) -> Observed<Vec<PopulatedPodcast>> {
        self.cache.observe_podcasts(Some(category_id.to_string()))
    }

    pub fn podcast(&self, uri: &str) -> Option<PodcastEntity> {
        self.cache.podcast(uri)
    }

    /// Store one batch of podcasts. Category shells go in first so the links
    /// to them can be stored right after the podcasts.
    fn store_batch(&self, podcasts: &[NetworkPodcast]) {
        let mut seen = BTreeSet::new();
        let shells: Vec<CategoryEntity> = podcasts
            .iter()
            .flat_map(NetworkPodcast::category_shells)
            .filter(|shell| seen.insert(shell.id.clone()))
            .collect();
        let shells_inserted = self.cache.insert_or_ignore_categories(&shells);

        let entities: Vec<PodcastEntity> = podcasts.iter().map(PodcastEntity::from).collect();
        self.cache.upsert_podcasts(&entities);

        let cross_refs: Vec<_> = podcasts
            .iter()
            .flat_map(NetworkPodcast::category_cross_refs)
            .collect();
        self.cache.insert_or_ignore_cross_refs(&cross_refs);

        debug!(
            podcasts = entities.len(),
            category_shells = shells_inserted,
            "stored podcast batch"
        );
    }
}

#[async_trait]
impl ChangeListModel for PodcastRepository {
    fn kind(&self) -> EntityKind {
        EntityKind::Podcast
    }

    async fn fetch_change_list(&self, after: i64) -> Result<Vec<ChangeListEntry>, SyncError> {
        Ok(self.remote.get_change_list(EntityKind::Podcast, after).await?)
    }

    async fn delete_models(&self, uris: &[String]) -> Result<(), SyncError> {
        self.cache.delete_podcasts(uris);
        Ok(())
    }

    async fn update_models(&self, uris: &[String]) -> Result<(), SyncError> {
        for chunk in uris.chunks(self.batch_size) {
            let podcasts = self.remote.get_podcasts(chunk).await?;
            self.store_batch(&podcasts);
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), SyncError> {
        Ok(self.cache.persist().await?)
    }
}
