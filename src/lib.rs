pub mod cache;
pub mod datastore;
pub mod error;
pub mod http;
pub mod model;
pub mod network;
pub mod progress;
pub mod repository;
pub mod sync;

// Re-export main types for convenience
pub use cache::{EpisodeQuery, LocalCache, Observed, PopulatedPodcast};
pub use datastore::{ChangeListVersions, PreferencesStore, UserPreferences, VersionStore};
pub use error::{CacheError, RemoteError, StoreError, SyncError};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use model::{ChangeListEntry, EntityKind};
pub use network::{FixtureRemoteSource, HttpRemoteSource, RemoteDataSource};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use repository::{CategoryRepository, EpisodeRepository, PodcastRepository};
pub use sync::{
    AlwaysOnline, ChangeListModel, MIN_SYNC_INTERVAL, NetworkMonitor, RetryPolicy,
    StoreSynchronizer, SyncManager, SyncOptions, SyncWorker, Syncable, Synchronizer,
    WatchNetworkMonitor, WorkOutcome, change_list_sync,
};
