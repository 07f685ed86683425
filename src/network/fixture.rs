use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::RemoteError;
use crate::model::{ChangeListEntry, EntityKind, NetworkCategory, NetworkEpisode, NetworkPodcast};

use super::RemoteDataSource;

#[derive(Default)]
struct FixtureState {
    categories: Vec<NetworkCategory>,
    podcasts: Vec<NetworkPodcast>,
    episodes: Vec<NetworkEpisode>,
    change_lists: HashMap<EntityKind, Vec<ChangeListEntry>>,
    unavailable: HashSet<EntityKind>,
}

/// A remote catalog served from static data.
///
/// Every item gets a change list entry whose version is its 1-based index.
/// The collection can be edited afterwards, mimicking the server's change
/// list registry.
pub struct FixtureRemoteSource {
    state: Mutex<FixtureState>,
}

impl FixtureRemoteSource {
    pub fn new(
        categories: Vec<NetworkCategory>,
        podcasts: Vec<NetworkPodcast>,
        episodes: Vec<NetworkEpisode>,
    ) -> Self {
        let mut change_lists = HashMap::new();
        change_lists.insert(
            EntityKind::Category,
            indexed_change_list(categories.iter().map(|c| c.id.clone())),
        );
        change_lists.insert(
            EntityKind::Podcast,
            indexed_change_list(podcasts.iter().map(|p| p.uri.clone())),
        );
        change_lists.insert(
            EntityKind::Episode,
            indexed_change_list(episodes.iter().map(|e| e.uri.clone())),
        );

        Self {
            state: Mutex::new(FixtureState {
                categories,
                podcasts,
                episodes,
                change_lists,
                unavailable: HashSet::new(),
            }),
        }
    }

    /// Load `categories.json`, `podcasts.json` and `episodes.json` from `dir`
    pub async fn from_dir(dir: &Path) -> Result<Self, RemoteError> {
        Ok(Self::new(
            read_fixture(dir, EntityKind::Category).await?,
            read_fixture(dir, EntityKind::Podcast).await?,
            read_fixture(dir, EntityKind::Episode).await?,
        ))
    }

    pub fn latest_change_list_version(&self, kind: EntityKind) -> Option<i64> {
        self.lock()
            .change_lists
            .get(&kind)
            .and_then(|list| list.last())
            .map(|entry| entry.change_list_version)
    }

    /// Record a change of `id` at the next version, replacing earlier entries for it
    pub fn edit_model_collection(&self, kind: EntityKind, id: &str, is_delete: bool) {
        let mut state = self.lock();
        record_change(&mut state, kind, id, is_delete);
    }

    /// Publish a new or changed episode
    pub fn put_episode(&self, episode: NetworkEpisode) {
        let mut state = self.lock();
        let uri = episode.uri.clone();
        state.episodes.retain(|e| e.uri != uri);
        state.episodes.push(episode);
        record_change(&mut state, EntityKind::Episode, &uri, false);
    }

    /// Publish a new or changed podcast
    pub fn put_podcast(&self, podcast: NetworkPodcast) {
        let mut state = self.lock();
        let uri = podcast.uri.clone();
        state.podcasts.retain(|p| p.uri != uri);
        state.podcasts.push(podcast);
        record_change(&mut state, EntityKind::Podcast, &uri, false);
    }

    /// Make record lookups of `kind` fail with a server error; the change
    /// list itself stays reachable
    pub fn set_unavailable(&self, kind: EntityKind, unavailable: bool) {
        let mut state = self.lock();
        if unavailable {
            state.unavailable.insert(kind);
        } else {
            state.unavailable.remove(&kind);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self, kind: EntityKind) -> Result<(), RemoteError> {
        if self.lock().unavailable.contains(&kind) {
            return Err(RemoteError::HttpStatus {
                url: format!("fixture://{}", kind.collection()),
                status: 503,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDataSource for FixtureRemoteSource {
    async fn get_change_list(
        &self,
        kind: EntityKind,
        after: i64,
    ) -> Result<Vec<ChangeListEntry>, RemoteError> {
        Ok(self
            .lock()
            .change_lists
            .get(&kind)
            .map(|list| {
                list.iter()
                    .filter(|entry| entry.change_list_version > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_categories(&self, ids: &[String]) -> Result<Vec<NetworkCategory>, RemoteError> {
        self.check_available(EntityKind::Category)?;
        Ok(matching(&self.lock().categories, ids, |c| &c.id))
    }

    async fn get_podcasts(&self, uris: &[String]) -> Result<Vec<NetworkPodcast>, RemoteError> {
        self.check_available(EntityKind::Podcast)?;
        Ok(matching(&self.lock().podcasts, uris, |p| &p.uri))
    }

    async fn get_episodes(&self, uris: &[String]) -> Result<Vec<NetworkEpisode>, RemoteError> {
        self.check_available(EntityKind::Episode)?;
        Ok(matching(&self.lock().episodes, uris, |e| &e.uri))
    }
}

fn indexed_change_list(ids: impl Iterator<Item = String>) -> Vec<ChangeListEntry> {
    ids.enumerate()
        .map(|(index, id)| ChangeListEntry::updated(id, index as i64 + 1))
        .collect()
}

fn record_change(state: &mut FixtureState, kind: EntityKind, id: &str, is_delete: bool) {
    let list = state.change_lists.entry(kind).or_default();
    let next_version = list.last().map_or(0, |e| e.change_list_version) + 1;
    list.retain(|entry| entry.id != id);
    list.push(ChangeListEntry {
        id: id.to_string(),
        change_list_version: next_version,
        is_delete,
    });
}

fn matching<T: Clone>(items: &[T], ids: &[String], id_of: impl Fn(&T) -> &String) -> Vec<T> {
    let wanted: HashSet<&String> = ids.iter().collect();
    items
        .iter()
        .filter(|item| wanted.contains(id_of(item)))
        .cloned()
        .collect()
}

async fn read_fixture<T: DeserializeOwned>(
    dir: &Path,
    kind: EntityKind,
) -> Result<Vec<T>, RemoteError> {
    let path = dir.join(format!("{}.json", kind.collection()));
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| RemoteError::FixtureReadFailed {
            path: path.clone(),
            source: e,
        })?;

    serde_json::from_str(&content).map_err(|e| RemoteError::FixtureParseFailed { path, source: e })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn category(id: &str) -> NetworkCategory {
        NetworkCategory {
            id: id.to_string(),
            name: id.to_uppercase(),
        }
    }

    fn source() -> FixtureRemoteSource {
        FixtureRemoteSource::new(
            vec![category("news"), category("tech"), category("arts")],
            vec![],
            vec![],
        )
    }

    #[tokio::test]
    async fn versions_follow_item_order() {
        let remote = source();

        let all = remote
            .get_change_list(EntityKind::Category, -1)
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|e| e.change_list_version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let after_two = remote.get_change_list(EntityKind::Category, 2).await.unwrap();
        assert_eq!(after_two, vec![ChangeListEntry::updated("arts", 3)]);
    }

    #[tokio::test]
    async fn edits_move_id_to_the_head_of_the_feed() {
        let remote = source();

        remote.edit_model_collection(EntityKind::Category, "news", true);

        assert_eq!(remote.latest_change_list_version(EntityKind::Category), Some(4));
        let changes = remote.get_change_list(EntityKind::Category, 3).await.unwrap();
        assert_eq!(changes, vec![ChangeListEntry::deleted("news", 4)]);
        // The superseded entry for "news" is gone
        let all = remote.get_change_list(EntityKind::Category, -1).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn lookups_filter_by_id() {
        let remote = source();

        let found = remote
            .get_categories(&["tech".to_string(), "missing".to_string()])
            .await
            .unwrap();

        assert_eq!(found, vec![category("tech")]);
    }

    #[tokio::test]
    async fn unavailable_kind_fails_lookups_with_server_error() {
        let remote = source();
        remote.set_unavailable(EntityKind::Category, true);

        let result = remote.get_categories(&["news".to_string()]).await;
        assert!(matches!(
            result,
            Err(RemoteError::HttpStatus { status: 503, .. })
        ));
        assert!(remote.get_change_list(EntityKind::Category, -1).await.is_ok());

        remote.set_unavailable(EntityKind::Category, false);
        assert!(remote.get_categories(&["news".to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn from_dir_reads_all_collections() {
        let dir = tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("categories.json"),
            r#"[{"id":"news","name":"News"}]"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("podcasts.json"),
            r#"[{"uri":"pod-1","title":"Pod","categoryIds":["news"]}]"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("episodes.json"), "[]")
            .await
            .unwrap();

        let remote = FixtureRemoteSource::from_dir(dir.path()).await.unwrap();

        assert_eq!(remote.latest_change_list_version(EntityKind::Podcast), Some(1));
        assert_eq!(remote.latest_change_list_version(EntityKind::Episode), None);
    }

    #[tokio::test]
    async fn from_dir_reports_missing_file() {
        let dir = tempdir().unwrap();
        let result = FixtureRemoteSource::from_dir(dir.path()).await;
        assert!(matches!(result, Err(RemoteError::FixtureReadFailed { .. })));
    }
}
