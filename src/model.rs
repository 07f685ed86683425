use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The entity types that are synchronized through change lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Category,
    Podcast,
    Episode,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Category, Self::Podcast, Self::Episode];

    /// Singular name, used for change list endpoints and log fields
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Podcast => "podcast",
            Self::Episode => "episode",
        }
    }

    /// Plural name, used for entity endpoints and fixture files
    pub fn collection(self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Podcast => "podcasts",
            Self::Episode => "episodes",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the remote delta feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeListEntry {
    pub id: String,
    pub change_list_version: i64,
    #[serde(default)]
    pub is_delete: bool,
}

impl ChangeListEntry {
    pub fn updated(id: impl Into<String>, version: i64) -> Self {
        Self {
            id: id.into(),
            change_list_version: version,
            is_delete: false,
        }
    }

    pub fn deleted(id: impl Into<String>, version: i64) -> Self {
        Self {
            id: id.into(),
            change_list_version: version,
            is_delete: true,
        }
    }
}

/// Remote representation of a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCategory {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Remote representation of a podcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPodcast {
    pub uri: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<String>,
}

/// Remote representation of an episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEpisode {
    pub uri: String,
    pub podcast_uri: String,
    pub title: String,
    pub audio_uri: String,
    pub audio_mime_type: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub published_date: DateTime<Utc>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastEntity {
    pub uri: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub copyright: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodcastCategoryCrossRef {
    pub podcast_uri: String,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeEntity {
    pub uri: String,
    pub podcast_uri: String,
    pub title: String,
    pub audio_uri: String,
    pub audio_mime_type: String,
    pub subtitle: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published: DateTime<Utc>,
    pub duration: Option<Duration>,
    /// Playback position tracked locally, never sent by the remote
    pub duration_played: Option<Duration>,
}

impl From<&NetworkCategory> for CategoryEntity {
    fn from(category: &NetworkCategory) -> Self {
        Self {
            id: category.id.clone(),
            name: category.name.clone(),
        }
    }
}

impl From<&NetworkPodcast> for PodcastEntity {
    fn from(podcast: &NetworkPodcast) -> Self {
        Self {
            uri: podcast.uri.clone(),
            title: podcast.title.clone(),
            description: podcast.description.clone(),
            author: podcast.author.clone(),
            image_url: podcast.image_url.clone(),
            copyright: podcast.copyright.clone(),
        }
    }
}

impl From<&NetworkEpisode> for EpisodeEntity {
    fn from(episode: &NetworkEpisode) -> Self {
        Self {
            uri: episode.uri.clone(),
            podcast_uri: episode.podcast_uri.clone(),
            title: episode.title.clone(),
            audio_uri: episode.audio_uri.clone(),
            audio_mime_type: episode.audio_mime_type.clone(),
            subtitle: episode.subtitle.clone(),
            summary: episode.summary.clone(),
            author: episode.author.clone(),
            published: episode.published_date,
            duration: episode.duration.map(Duration::from_secs),
            duration_played: None,
        }
    }
}

impl NetworkPodcast {
    /// Placeholder categories that satisfy the cross references of this podcast
    pub fn category_shells(&self) -> Vec<CategoryEntity> {
        self.category_ids
            .iter()
            .map(|id| CategoryEntity {
                id: id.clone(),
                name: String::new(),
            })
            .collect()
    }

    pub fn category_cross_refs(&self) -> Vec<PodcastCategoryCrossRef> {
        self.category_ids
            .iter()
            .map(|id| PodcastCategoryCrossRef {
                podcast_uri: self.uri.clone(),
                category_id: id.clone(),
            })
            .collect()
    }
}

impl NetworkEpisode {
    /// Placeholder podcast that satisfies the owner reference of this episode
    pub fn podcast_shell(&self) -> PodcastEntity {
        PodcastEntity {
            uri: self.podcast_uri.clone(),
            title: String::new(),
            description: None,
            author: None,
            image_url: None,
            copyright: None,
        }
    }
}
