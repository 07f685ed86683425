use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::datastore::partial_path_for;
use crate::error::CacheError;
use crate::model::{CategoryEntity, EpisodeEntity, PodcastCategoryCrossRef, PodcastEntity};

/// All locally cached rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTables {
    pub categories: BTreeMap<String, CategoryEntity>,
    pub podcasts: BTreeMap<String, PodcastEntity>,
    pub episodes: BTreeMap<String, EpisodeEntity>,
    pub cross_refs: BTreeSet<PodcastCategoryCrossRef>,
}

/// A podcast together with its categories and the date of its newest episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulatedPodcast {
    pub podcast: PodcastEntity,
    pub categories: Vec<CategoryEntity>,
    pub last_episode_date: Option<DateTime<Utc>>,
}

/// Filter for episode reads; `None` means "no filter"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeQuery {
    pub filter_podcast_uris: Option<HashSet<String>>,
    pub filter_episode_uris: Option<HashSet<String>>,
}

impl EpisodeQuery {
    pub fn for_podcasts<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter_podcast_uris: Some(uris.into_iter().map(Into::into).collect()),
            filter_episode_uris: None,
        }
    }
}

type Projection<T> = Box<dyn Fn(&CacheTables) -> T + Send + Sync>;

/// A live read query over the cache.
///
/// The current result is always available through [`Observed::latest`].
/// [`Observed::changed`] waits for the next modification and yields only the
/// newest state, so intermediate states may be skipped.
pub struct Observed<T> {
    rx: watch::Receiver<CacheTables>,
    project: Projection<T>,
}

impl<T> Observed<T> {
    pub fn latest(&mut self) -> T {
        let tables = self.rx.borrow_and_update();
        (self.project)(&tables)
    }

    /// `None` once the cache has been dropped
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.latest())
    }
}

/// In-memory local store of categories, podcasts and episodes.
///
/// Relationship rules:
/// - deleting a podcast removes its episodes and category links
/// - deleting a category removes its podcast links
/// - episodes and links that point at missing rows are not stored
///
/// A cache opened from a snapshot file writes itself back to that file on
/// [`LocalCache::persist`].
pub struct LocalCache {
    tables: watch::Sender<CacheTables>,
    revision: AtomicU64,
    snapshot_path: Option<PathBuf>,
    // Serializes snapshot writes, which share one partial file
    write_lock: Mutex<()>,
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCache {
    pub fn new() -> Self {
        Self::with_tables(CacheTables::default(), None)
    }

    fn with_tables(tables: CacheTables, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            tables: watch::Sender::new(tables),
            revision: AtomicU64::new(0),
            snapshot_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the snapshot at `path` and persist back to it.
    ///
    /// A missing file yields an empty cache.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let tables = read_snapshot(&path).await?;
        Ok(Self::with_tables(tables, Some(path)))
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Number of modifications applied so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> CacheTables {
        self.tables.borrow().clone()
    }

    fn modify(&self, f: impl FnOnce(&mut CacheTables) -> bool) -> bool {
        let modified = self.tables.send_if_modified(f);
        if modified {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        modified
    }

    fn observe<T>(
        &self,
        project: impl Fn(&CacheTables) -> T + Send + Sync + 'static,
    ) -> Observed<T> {
        Observed {
            rx: self.tables.subscribe(),
            project: Box::new(project),
        }
    }

    // Categories

    pub fn upsert_categories(&self, categories: &[CategoryEntity]) {
        self.modify(|t| upsert(&mut t.categories, categories, |c| &c.id));
    }

    /// Insert categories whose id is not present yet; returns how many were inserted
    pub fn insert_or_ignore_categories(&self, categories: &[CategoryEntity]) -> usize {
        let mut inserted = 0;
        self.modify(|t| {
            inserted = insert_or_ignore(&mut t.categories, categories, |c| &c.id);
            inserted > 0
        });
        inserted
    }

    /// Delete categories by id; absent ids are ignored
    pub fn delete_categories(&self, ids: &[String]) -> usize {
        let mut removed = 0;
        self.modify(|t| {
            removed = remove_keys(&mut t.categories, ids);
            if removed > 0 {
                let ids: HashSet<&String> = ids.iter().collect();
                t.cross_refs.retain(|r| !ids.contains(&r.category_id));
            }
            removed > 0
        });
        removed
    }

    pub fn categories(&self) -> Vec<CategoryEntity> {
        all_categories(&self.tables.borrow())
    }

    pub fn observe_categories(&self) -> Observed<Vec<CategoryEntity>> {
        self.observe(all_categories)
    }

    // Podcasts

    pub fn upsert_podcasts(&self, podcasts: &[PodcastEntity]) {
        self.modify(|t| upsert(&mut t.podcasts, podcasts, |p| &p.uri));
    }

    /// Insert podcasts whose uri is not present yet; returns how many were inserted
    pub fn insert_or_ignore_podcasts(&self, podcasts: &[PodcastEntity]) -> usize {
        let mut inserted = 0;
        self.modify(|t| {
            inserted = insert_or_ignore(&mut t.podcasts, podcasts, |p| &p.uri);
            inserted > 0
        });
        inserted
    }

    /// Delete podcasts by uri together with their episodes and category links
    pub fn delete_podcasts(&self, uris: &[String]) -> usize {
        let mut removed = 0;
        self.modify(|t| {
            removed = remove_keys(&mut t.podcasts, uris);
            if removed > 0 {
                let uris: HashSet<&String> = uris.iter().collect();
                t.episodes.retain(|_, e| !uris.contains(&e.podcast_uri));
                t.cross_refs.retain(|r| !uris.contains(&r.podcast_uri));
            }
            removed > 0
        });
        removed
    }

    pub fn insert_or_ignore_cross_refs(&self, refs: &[PodcastCategoryCrossRef]) {
        self.modify(|t| {
            let mut modified = false;
            for r in refs {
                if !t.podcasts.contains_key(&r.podcast_uri)
                    || !t.categories.contains_key(&r.category_id)
                {
                    warn!(
                        podcast = %r.podcast_uri,
                        category = %r.category_id,
                        "skipping dangling category link"
                    );
                    continue;
                }
                modified |= t.cross_refs.insert(r.clone());
            }
            modified
        });
    }

    pub fn podcast(&self, uri: &str) -> Option<PodcastEntity> {
        self.tables.borrow().podcasts.get(uri).cloned()
    }

    /// Podcasts, newest episode first, optionally restricted to one category
    pub fn observe_podcasts(&self, category_id: Option<String>) -> Observed<Vec<PopulatedPodcast>> {
        self.observe(move |t| populated_podcasts(t, category_id.as_deref()))
    }

    // Episodes

    /// Upsert episodes, keeping the locally tracked play position of existing ones
    pub fn upsert_episodes(&self, episodes: &[EpisodeEntity]) {
        self.modify(|t| {
            let mut modified = false;
            for episode in episodes {
                if !t.podcasts.contains_key(&episode.podcast_uri) {
                    warn!(
                        episode = %episode.uri,
                        podcast = %episode.podcast_uri,
                        "skipping episode of unknown podcast"
                    );
                    continue;
                }
                let mut episode = episode.clone();
                if let Some(existing) = t.episodes.get(&episode.uri) {
                    episode.duration_played = episode.duration_played.or(existing.duration_played);
                    if *existing == episode {
                        continue;
                    }
                }
                t.episodes.insert(episode.uri.clone(), episode);
                modified = true;
            }
            modified
        });
    }

    /// Delete episodes by uri; absent uris are ignored
    pub fn delete_episodes(&self, uris: &[String]) -> usize {
        let mut removed = 0;
        self.modify(|t| {
            removed = remove_keys(&mut t.episodes, uris);
            removed > 0
        });
        removed
    }

    pub fn set_duration_played(&self, uri: &str, played: Duration) -> bool {
        self.modify(|t| match t.episodes.get_mut(uri) {
            Some(episode) if episode.duration_played != Some(played) => {
                episode.duration_played = Some(played);
                true
            }
            _ => false,
        })
    }

    pub fn episode(&self, uri: &str) -> Option<EpisodeEntity> {
        self.tables.borrow().episodes.get(uri).cloned()
    }

    /// Episodes matching `query`, newest first
    pub fn episodes(&self, query: &EpisodeQuery) -> Vec<EpisodeEntity> {
        matching_episodes(&self.tables.borrow(), query)
    }

    pub fn observe_episodes(&self, query: EpisodeQuery) -> Observed<Vec<EpisodeEntity>> {
        self.observe(move |t| matching_episodes(t, &query))
    }

    // Persistence

    /// Write all tables to the file the cache was opened from.
    ///
    /// Does nothing for an in-memory cache.
    pub async fn persist(&self) -> Result<(), CacheError> {
        match &self.snapshot_path {
            Some(path) => self.save_snapshot(path).await,
            None => Ok(()),
        }
    }

    /// Write all tables to a JSON snapshot, replacing the previous one atomically
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string(&*self.tables.borrow())?;
        let partial_path = partial_path_for(path);

        tokio::fs::write(&partial_path, json)
            .await
            .map_err(|e| CacheError::SnapshotWriteFailed {
                path: partial_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&partial_path, path)
            .await
            .map_err(|e| CacheError::SnapshotWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!(path = %path.display(), "cache snapshot saved");
        Ok(())
    }

    /// Load a snapshot written by [`LocalCache::save_snapshot`] into an in-memory cache
    pub async fn load_snapshot(path: &Path) -> Result<Self, CacheError> {
        Ok(Self::with_tables(read_snapshot(path).await?, None))
    }
}

async fn read_snapshot(path: &Path) -> Result<CacheTables, CacheError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(CacheTables::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CacheError::SnapshotReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    serde_json::from_str(&content).map_err(|e| CacheError::SnapshotParseFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

fn upsert<T: Clone + PartialEq>(
    table: &mut BTreeMap<String, T>,
    rows: &[T],
    key: impl Fn(&T) -> &String,
) -> bool {
    let mut modified = false;
    for row in rows {
        if table.get(key(row)) != Some(row) {
            table.insert(key(row).clone(), row.clone());
            modified = true;
        }
    }
    modified
}

fn insert_or_ignore<T: Clone>(
    table: &mut BTreeMap<String, T>,
    rows: &[T],
    key: impl Fn(&T) -> &String,
) -> usize {
    let mut inserted = 0;
    for row in rows {
        if !table.contains_key(key(row)) {
            table.insert(key(row).clone(), row.clone());
            inserted += 1;
        }
    }
    inserted
}

fn remove_keys<T>(table: &mut BTreeMap<String, T>, keys: &[String]) -> usize {
    keys.iter().filter(|k| table.remove(*k).is_some()).count()
}

fn all_categories(tables: &CacheTables) -> Vec<CategoryEntity> {
    tables.categories.values().cloned().collect()
}

fn populated_podcasts(tables: &CacheTables, category_id: Option<&str>) -> Vec<PopulatedPodcast> {
    let mut podcasts: Vec<PopulatedPodcast> = tables
        .podcasts
        .values()
        .filter(|p| {
            category_id.is_none_or(|id| {
                tables
                    .cross_refs
                    .iter()
                    .any(|r| r.podcast_uri == p.uri && r.category_id == id)
            })
        })
        .map(|p| PopulatedPodcast {
            podcast: p.clone(),
            categories: tables
                .cross_refs
                .iter()
                .filter(|r| r.podcast_uri == p.uri)
                .filter_map(|r| tables.categories.get(&r.category_id).cloned())
                .collect(),
            last_episode_date: tables
                .episodes
                .values()
                .filter(|e| e.podcast_uri == p.uri)
                .map(|e| e.published)
                .max(),
        })
        .collect();

    // Newest first, podcasts without episodes last
    podcasts.sort_by(|a, b| b.last_episode_date.cmp(&a.last_episode_date));
    podcasts
}

fn matching_episodes(tables: &CacheTables, query: &EpisodeQuery) -> Vec<EpisodeEntity> {
    let mut episodes: Vec<EpisodeEntity> = tables
        .episodes
        .values()
        .filter(|e| {
            query
                .filter_podcast_uris
                .as_ref()
                .is_none_or(|uris| uris.contains(&e.podcast_uri))
        })
        .filter(|e| {
            query
                .filter_episode_uris
                .as_ref()
                .is_none_or(|uris| uris.contains(&e.uri))
        })
        .cloned()
        .collect();

    episodes.sort_by(|a, b| b.published.cmp(&a.published));
    episodes
}
