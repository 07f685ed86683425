use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{LocalCache, Observed};
use crate::error::SyncError;
use crate::model::{CategoryEntity, ChangeListEntry, EntityKind};
use crate::network::RemoteDataSource;
use crate::sync::ChangeListModel;

/// Categories, read from the local cache and synced from the remote
pub struct CategoryRepository {
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteDataSource>,
}

impl CategoryRepository {
    pub fn new(cache: Arc<LocalCache>, remote: Arc<dyn RemoteDataSource>) -> Self {
        Self { cache, remote }
    }

    pub fn categories(&self) -> Observed<Vec<CategoryEntity>> {
        self.cache.observe_categories()
    }
}

#[async_trait]
impl ChangeListModel for CategoryRepository {
    fn kind(&self) -> EntityKind {
        EntityKind::Category
    }

    async fn fetch_change_list(&self, after: i64) -> Result<Vec<ChangeListEntry>, SyncError> {
        Ok(self.remote.get_change_list(EntityKind::Category, after).await?)
    }

    async fn delete_models(&self, ids: &[String]) -> Result<(), SyncError> {
        self.cache.delete_categories(ids);
        Ok(())
    }

    async fn update_models(&self, ids: &[String]) -> Result<(), SyncError> {
        let categories = self.remote.get_categories(ids).await?;
        let entities: Vec<CategoryEntity> = categories.iter().map(CategoryEntity::from).collect();
        self.cache.upsert_categories(&entities);
        Ok(())
    }

    async fn persist(&self) -> Result<(), SyncError> {
        Ok(self.cache.persist().await?)
    }
}
