mod category;
mod episode;
mod podcast;

pub use category::CategoryRepository;
pub use episode::EpisodeRepository;
pub use podcast::PodcastRepository;

/// Number of ids fetched per remote request when pulling changed records
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 40;

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{TimeZone, Utc};

    use crate::model::{NetworkCategory, NetworkEpisode, NetworkPodcast};
    use crate::network::FixtureRemoteSource;

    pub fn network_category(id: &str) -> NetworkCategory {
        NetworkCategory {
            id: id.to_string(),
            name: format!("Category {id}"),
        }
    }

    pub fn network_podcast(uri: &str, category_ids: &[&str]) -> NetworkPodcast {
        NetworkPodcast {
            uri: uri.to_string(),
            title: format!("Podcast {uri}"),
            description: Some("About things".to_string()),
            author: Some("Someone".to_string()),
            image_url: None,
            copyright: None,
            category_ids: category_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub fn network_episode(uri: &str, podcast_uri: &str, day: u32) -> NetworkEpisode {
        NetworkEpisode {
            uri: uri.to_string(),
            podcast_uri: podcast_uri.to_string(),
            title: format!("Episode {uri}"),
            audio_uri: format!("https://example.com/{uri}.mp3"),
            audio_mime_type: "audio/mpeg".to_string(),
            subtitle: None,
            summary: None,
            author: None,
            published_date: Utc.with_ymd_and_hms(2024, 2, day, 8, 0, 0).unwrap(),
            duration: Some(2400),
        }
    }

    /// Three categories, four podcasts and six episodes
    pub fn sample_remote() -> FixtureRemoteSource {
        FixtureRemoteSource::new(
            vec![
                network_category("news"),
                network_category("tech"),
                network_category("arts"),
            ],
            vec![
                network_podcast("pod-1", &["news"]),
                network_podcast("pod-2", &["tech", "news"]),
                network_podcast("pod-3", &["arts"]),
                network_podcast("pod-4", &["science"]),
            ],
            vec![
                network_episode("ep-1", "pod-1", 1),
                network_episode("ep-2", "pod-1", 2),
                network_episode("ep-3", "pod-2", 3),
                network_episode("ep-4", "pod-2", 4),
                network_episode("ep-5", "pod-3", 5),
                network_episode("ep-6", "pod-9", 6),
            ],
        )
    }
}
