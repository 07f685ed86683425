mod fixture;
mod rest;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::model::{ChangeListEntry, EntityKind, NetworkCategory, NetworkEpisode, NetworkPodcast};

pub use fixture::FixtureRemoteSource;
pub use rest::HttpRemoteSource;

/// Network calls to the podcast catalog backend
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// Entries of the delta feed of `kind` with a version strictly after `after`
    async fn get_change_list(
        &self,
        kind: EntityKind,
        after: i64,
    ) -> Result<Vec<ChangeListEntry>, RemoteError>;

    async fn get_categories(&self, ids: &[String]) -> Result<Vec<NetworkCategory>, RemoteError>;

    async fn get_podcasts(&self, uris: &[String]) -> Result<Vec<NetworkPodcast>, RemoteError>;

    async fn get_episodes(&self, uris: &[String]) -> Result<Vec<NetworkEpisode>, RemoteError>;
}
