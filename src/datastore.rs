// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::model::EntityKind;

/// Cursor value meaning "nothing has been synced yet"
pub const UNSYNCED_VERSION: i64 = -1;

/// The last synced change list version of each entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeListVersions {
    pub category: i64,
    pub podcast: i64,
    pub episode: i64,
}

impl Default for ChangeListVersions {
    fn default() -> Self {
        Self {
            category: UNSYNCED_VERSION,
            podcast: UNSYNCED_VERSION,
            episode: UNSYNCED_VERSION,
        }
    }
}

impl ChangeListVersions {
    pub fn get(&self, kind: EntityKind) -> i64 {
        match kind {
            EntityKind::Category => self.category,
            EntityKind::Podcast => self.podcast,
            EntityKind::Episode => self.episode,
        }
    }

    /// Copy with the cursor of `kind` replaced, leaving the others untouched
    pub fn with(mut self, kind: EntityKind, version: i64) -> Self {
        match kind {
            EntityKind::Category => self.category = version,
            EntityKind::Podcast => self.podcast = version,
            EntityKind::Episode => self.episode = version,
        }
        self
    }
}

/// The single persisted preferences record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub change_list_versions: ChangeListVersions,
    pub followed_podcasts: BTreeSet<String>,
    pub listened_episodes: BTreeSet<String>,
    pub should_hide_onboarding: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Persistent storage of the change list cursors.
///
/// `write` replaces the whole record (last write wins). `update` must apply
/// its closure and persist the result without another writer interleaving.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn read(&self) -> Result<ChangeListVersions, StoreError>;

    async fn write(&self, versions: ChangeListVersions) -> Result<(), StoreError>;

    async fn update(
        &self,
        update: &(dyn Fn(ChangeListVersions) -> ChangeListVersions + Send + Sync),
    ) -> Result<ChangeListVersions, StoreError> {
        let updated = update(self.read().await?);
        self.write(updated).await?;
        Ok(updated)
    }
}

/// Preferences record kept in memory and, optionally, mirrored to a JSON file
pub struct PreferencesStore {
    path: Option<PathBuf>,
    state: Mutex<UserPreferences>,
}

impl PreferencesStore {
    /// A store that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(UserPreferences::default()),
        }
    }

    /// Open the preferences file at `path`, starting from defaults if it does not exist
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let preferences = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            read_preferences(path).await?
        } else {
            UserPreferences::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(preferences),
        })
    }

    pub async fn snapshot(&self) -> UserPreferences {
        self.state.lock().await.clone()
    }

    pub async fn set_podcast_followed(&self, uri: &str, followed: bool) -> Result<(), StoreError> {
        self.mutate(|prefs| {
            if followed {
                prefs.followed_podcasts.insert(uri.to_string());
            } else {
                prefs.followed_podcasts.remove(uri);
            }
            if prefs.followed_podcasts.is_empty() {
                prefs.should_hide_onboarding = false;
            }
        })
        .await
        .map(|_| ())
    }

    pub async fn set_should_hide_onboarding(&self, hide: bool) -> Result<(), StoreError> {
        self.mutate(|prefs| prefs.should_hide_onboarding = hide)
            .await
            .map(|_| ())
    }

    pub async fn add_listened_episodes(&self, uris: &[String]) -> Result<(), StoreError> {
        if uris.is_empty() {
            return Ok(());
        }
        self.mutate(|prefs| prefs.listened_episodes.extend(uris.iter().cloned()))
            .await
            .map(|_| ())
    }

    pub async fn remove_listened_episodes(&self, uris: &[String]) -> Result<(), StoreError> {
        if uris.is_empty() {
            return Ok(());
        }
        self.mutate(|prefs| {
            for uri in uris {
                prefs.listened_episodes.remove(uri);
            }
        })
        .await
        .map(|_| ())
    }

    pub async fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|prefs| prefs.last_synced_at = Some(at))
            .await
            .map(|_| ())
    }

    /// Apply `f` to a copy of the record and persist it; memory is only
    /// updated once the file write went through.
    async fn mutate<F>(&self, f: F) -> Result<UserPreferences, StoreError>
    where
        F: FnOnce(&mut UserPreferences),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        f(&mut next);

        if next != *state {
            if let Some(path) = &self.path {
                write_preferences(&next, path).await?;
            }
            *state = next;
        }

        Ok(state.clone())
    }
}

#[async_trait]
impl VersionStore for PreferencesStore {
    async fn read(&self) -> Result<ChangeListVersions, StoreError> {
        Ok(self.state.lock().await.change_list_versions)
    }

    async fn write(&self, versions: ChangeListVersions) -> Result<(), StoreError> {
        self.mutate(|prefs| prefs.change_list_versions = versions)
            .await
            .map(|_| ())
    }

    async fn update(
        &self,
        update: &(dyn Fn(ChangeListVersions) -> ChangeListVersions + Send + Sync),
    ) -> Result<ChangeListVersions, StoreError> {
        let prefs = self
            .mutate(|prefs| prefs.change_list_versions = update(prefs.change_list_versions))
            .await?;
        debug!(versions = ?prefs.change_list_versions, "change list versions updated");
        Ok(prefs.change_list_versions)
    }
}

/// Write the record next to its destination and rename it into place
async fn write_preferences(preferences: &UserPreferences, path: &Path) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(preferences)?;
    let partial_path = partial_path_for(path);

    tokio::fs::write(&partial_path, json)
        .await
        .map_err(|e| StoreError::WriteFailed {
            path: partial_path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&partial_path, path)
        .await
        .map_err(|e| StoreError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn read_preferences(path: &Path) -> Result<UserPreferences, StoreError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    serde_json::from_str(&content).map_err(|e| StoreError::JsonParseFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

pub(crate) fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}
