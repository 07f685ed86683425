use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cache::{EpisodeQuery, LocalCache, Observed};
use crate::datastore::{PreferencesStore, VersionStore};
use crate::error::SyncError;
use crate::model::{ChangeListEntry, EntityKind, EpisodeEntity, NetworkEpisode, PodcastEntity};
use crate::network::RemoteDataSource;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::sync::ChangeListModel;

use super::DEFAULT_SYNC_BATCH_SIZE;

/// Episodes, read from the local cache and synced from the remote.
///
/// Besides the rows themselves, syncing keeps the listened set of the
/// preferences consistent: the very first sync marks everything as listened
/// so a fresh install does not flood the user, and deleted episodes are
/// dropped from the set.
pub struct EpisodeRepository {
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteDataSource>,
    preferences: Arc<PreferencesStore>,
    reporter: SharedProgressReporter,
    batch_size: usize,
}

impl EpisodeRepository {
    pub fn new(
        cache: Arc<LocalCache>,
        remote: Arc<dyn RemoteDataSource>,
        preferences: Arc<PreferencesStore>,
    ) -> Self {
        Self {
            cache,
            remote,
            preferences,
            reporter: NoopReporter::shared(),
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Where [`ProgressEvent::NewEpisodesAvailable`] goes
    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// All episodes, newest first
    pub fn episodes(&self) -> Observed<Vec<EpisodeEntity>> {
        self.cache.observe_episodes(EpisodeQuery::default())
    }

    pub fn episodes_of_podcasts<I, S>(&self, podcast_uris: I) -> Observed<Vec<EpisodeEntity>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache
            .observe_episodes(EpisodeQuery::for_podcasts(podcast_uris))
    }

    pub fn episode(&self, uri: &str) -> Option<EpisodeEntity> {
        self.cache.episode(uri)
    }

    /// Remember how far an episode has been played
    pub fn set_duration_played(&self, uri: &str, played: Duration) -> bool {
        self.cache.set_duration_played(uri, played)
    }

    /// Store one batch and return the uris that were not cached before
    fn store_batch(&self, episodes: &[NetworkEpisode]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let shells: Vec<PodcastEntity> = episodes
            .iter()
            .filter(|episode| seen.insert(episode.podcast_uri.clone()))
            .map(NetworkEpisode::podcast_shell)
            .collect();
        let shells_inserted = self.cache.insert_or_ignore_podcasts(&shells);

        let tables = self.cache.snapshot();
        let inserted: Vec<String> = episodes
            .iter()
            .filter(|episode| !tables.episodes.contains_key(&episode.uri))
            .map(|episode| episode.uri.clone())
            .collect();

        let entities: Vec<EpisodeEntity> = episodes.iter().map(EpisodeEntity::from).collect();
        self.cache.upsert_episodes(&entities);

        debug!(
            episodes = entities.len(),
            new = inserted.len(),
            podcast_shells = shells_inserted,
            "stored episode batch"
        );
        inserted
    }

    /// Tell the user about new episodes of podcasts they follow, once onboarded
    async fn notify_new_episodes(&self, inserted: &[String]) {
        if inserted.is_empty() {
            return;
        }

        let preferences = self.preferences.snapshot().await;
        if !preferences.should_hide_onboarding {
            return;
        }

        let episode_uris: Vec<String> = inserted
            .iter()
            .filter(|uri| {
                self.cache
                    .episode(uri)
                    .is_some_and(|e| preferences.followed_podcasts.contains(&e.podcast_uri))
            })
            .cloned()
            .collect();

        if !episode_uris.is_empty() {
            info!(count = episode_uris.len(), "new episodes of followed podcasts");
            self.reporter
                .report(ProgressEvent::NewEpisodesAvailable { episode_uris });
        }
    }
}

#[async_trait]
impl ChangeListModel for EpisodeRepository {
    fn kind(&self) -> EntityKind {
        EntityKind::Episode
    }

    async fn fetch_change_list(&self, after: i64) -> Result<Vec<ChangeListEntry>, SyncError> {
        Ok(self.remote.get_change_list(EntityKind::Episode, after).await?)
    }

    async fn delete_models(&self, uris: &[String]) -> Result<(), SyncError> {
        self.cache.delete_episodes(uris);
        self.preferences.remove_listened_episodes(uris).await?;
        Ok(())
    }

    async fn update_models(&self, uris: &[String]) -> Result<(), SyncError> {
        // The cursor is only committed after this returns, so it still shows
        // whether episodes were ever synced
        let is_first_sync = self.read_version(&self.preferences.read().await?) <= 0;

        let mut inserted = Vec::new();
        for chunk in uris.chunks(self.batch_size) {
            let episodes = self.remote.get_episodes(chunk).await?;
            inserted.extend(self.store_batch(&episodes));
        }

        if is_first_sync {
            self.preferences.add_listened_episodes(uris).await?;
        } else {
            self.notify_new_episodes(&inserted).await;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), SyncError> {
        Ok(self.cache.persist().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_util::sync::CancellationToken;

    use crate::network::FixtureRemoteSource;
    use crate::progress::testing::RecordingReporter;
    use crate::repository::testing::{network_episode, sample_remote};
    use crate::sync::{StoreSynchronizer, Syncable};

    struct Fixture {
        cache: Arc<LocalCache>,
        remote: Arc<FixtureRemoteSource>,
        preferences: Arc<PreferencesStore>,
        reporter: Arc<RecordingReporter>,
        subject: EpisodeRepository,
    }

    impl Fixture {
        fn new() -> Self {
            let cache = Arc::new(LocalCache::new());
            let remote = Arc::new(sample_remote());
            let preferences = Arc::new(PreferencesStore::in_memory());
            let reporter = Arc::new(RecordingReporter::default());
            let subject = EpisodeRepository::new(cache.clone(), remote.clone(), preferences.clone())
                .with_batch_size(4)
                .with_reporter(reporter.clone());
            Self {
                cache,
                remote,
                preferences,
                reporter,
                subject,
            }
        }

        fn synchronizer(&self) -> StoreSynchronizer {
            StoreSynchronizer::new(
                self.preferences.clone(),
                CancellationToken::new(),
                NoopReporter::shared(),
            )
        }

        fn episode_uris(&self) -> Vec<String> {
            self.cache.snapshot().episodes.into_keys().collect()
        }

        fn announced(&self) -> Vec<Vec<String>> {
            self.reporter
                .events()
                .into_iter()
                .filter_map(|event| match event {
                    ProgressEvent::NewEpisodesAvailable { episode_uris } => Some(episode_uris),
                    _ => None,
                })
                .collect()
        }

        async fn onboard_following(&self, podcast_uri: &str) {
            self.preferences
                .set_podcast_followed(podcast_uri, true)
                .await
                .unwrap();
            self.preferences
                .set_should_hide_onboarding(true)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn sync_pulls_episodes_and_podcast_shells() {
        let fixture = Fixture::new();

        assert!(fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap());

        assert_eq!(
            fixture.episode_uris(),
            vec!["ep-1", "ep-2", "ep-3", "ep-4", "ep-5", "ep-6"]
        );
        let shell = fixture.cache.podcast("pod-9").unwrap();
        assert!(shell.title.is_empty());
        assert_eq!(fixture.preferences.read().await.unwrap().episode, 6);
    }

    #[tokio::test]
    async fn first_sync_marks_everything_listened() {
        let fixture = Fixture::new();
        fixture.onboard_following("pod-1").await;

        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        let listened = fixture.preferences.snapshot().await.listened_episodes;
        assert_eq!(listened.len(), 6);
        assert!(fixture.announced().is_empty());
    }

    #[tokio::test]
    async fn later_sync_announces_new_episodes_of_followed_podcasts() {
        let fixture = Fixture::new();
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();
        fixture.onboard_following("pod-1").await;

        fixture.remote.put_episode(network_episode("ep-7", "pod-1", 7));
        fixture.remote.put_episode(network_episode("ep-8", "pod-2", 8));
        fixture.remote.put_episode(network_episode("ep-2", "pod-1", 9));
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        assert_eq!(fixture.announced(), vec![vec!["ep-7".to_string()]]);
        let listened = fixture.preferences.snapshot().await.listened_episodes;
        assert!(!listened.contains("ep-7"));
    }

    #[tokio::test]
    async fn nothing_is_announced_before_onboarding() {
        let fixture = Fixture::new();
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();
        fixture
            .preferences
            .set_podcast_followed("pod-1", true)
            .await
            .unwrap();

        fixture.remote.put_episode(network_episode("ep-7", "pod-1", 7));
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        assert!(fixture.announced().is_empty());
        assert!(fixture.subject.episode("ep-7").is_some());
    }

    #[tokio::test]
    async fn deletes_also_forget_listened_state() {
        let fixture = Fixture::new();
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        fixture
            .remote
            .edit_model_collection(EntityKind::Episode, "ep-3", true);
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        assert!(fixture.subject.episode("ep-3").is_none());
        let listened = fixture.preferences.snapshot().await.listened_episodes;
        assert!(!listened.contains("ep-3"));
        assert_eq!(listened.len(), 5);
    }

    #[tokio::test]
    async fn resync_keeps_play_position() {
        let fixture = Fixture::new();
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();
        assert!(
            fixture
                .subject
                .set_duration_played("ep-1", Duration::from_secs(300))
        );

        fixture.remote.put_episode(network_episode("ep-1", "pod-1", 11));
        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        let episode = fixture.subject.episode("ep-1").unwrap();
        assert_eq!(episode.duration_played, Some(Duration::from_secs(300)));
        assert_eq!(
            episode.published,
            network_episode("ep-1", "pod-1", 11).published_date
        );
    }

    #[tokio::test]
    async fn observed_episodes_follow_sync() {
        let fixture = Fixture::new();
        let mut observed = fixture.subject.episodes_of_podcasts(["pod-2"]);
        assert!(observed.latest().is_empty());

        fixture.subject.sync_with(&fixture.synchronizer()).await.unwrap();

        let uris: Vec<_> = observed
            .changed()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.uri)
            .collect();
        assert_eq!(uris, vec!["ep-4", "ep-3"]);
    }
}
