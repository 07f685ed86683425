// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::RemoteError;
use crate::http::HttpClient;
use crate::model::{ChangeListEntry, EntityKind, NetworkCategory, NetworkEpisode, NetworkPodcast};

use super::RemoteDataSource;

/// Remote catalog reached over HTTP with JSON bodies.
///
/// Endpoints are resolved relative to the base URL:
/// `changelist/{kind}?after=N` and `{kinds}?ids=a,b`.
pub struct HttpRemoteSource<C> {
    client: C,
    base_url: Url,
}

impl<C: HttpClient> HttpRemoteSource<C> {
    pub fn new(client: C, base_url: &str) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn change_list_url(&self, kind: EntityKind, after: i64) -> Result<Url, RemoteError> {
        let mut url = self.base_url.join(&format!("changelist/{kind}"))?;
        url.query_pairs_mut()
            .append_pair("after", &after.to_string());
        Ok(url)
    }

    fn entities_url(&self, kind: EntityKind, ids: &[String]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.join(kind.collection())?;
        url.query_pairs_mut().append_pair("ids", &ids.join(","));
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        debug!(%url, "requesting");
        let response = self
            .client
            .get(url.as_str())
            .await
            .map_err(|e| RemoteError::RequestFailed {
                url: url.to_string(),
                source: e,
            })?;

        if response.status >= 400 {
            return Err(RemoteError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        serde_json::from_slice(&response.body).map_err(|e| RemoteError::DecodeFailed {
            url: url.to_string(),
            source: e,
        })
    }

    async fn get_by_ids<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<T>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.entities_url(kind, ids)?;
        self.get_json(url).await
    }
}

#[async_trait]
impl<C: HttpClient> RemoteDataSource for HttpRemoteSource<C> {
    async fn get_change_list(
        &self,
        kind: EntityKind,
        after: i64,
    ) -> Result<Vec<ChangeListEntry>, RemoteError> {
        let url = self.change_list_url(kind, after)?;
        // A body that is not a change list breaks the cursor contract
        self.get_json(url).await.map_err(|e| match e {
            RemoteError::DecodeFailed { url, source } => {
                RemoteError::InvalidChangeList { url, source }
            }
            other => other,
        })
    }

    async fn get_categories(&self, ids: &[String]) -> Result<Vec<NetworkCategory>, RemoteError> {
        self.get_by_ids(EntityKind::Category, ids).await
    }

    async fn get_podcasts(&self, uris: &[String]) -> Result<Vec<NetworkPodcast>, RemoteError> {
        self.get_by_ids(EntityKind::Podcast, uris).await
    }

    async fn get_episodes(&self, uris: &[String]) -> Result<Vec<NetworkEpisode>, RemoteError> {
        self.get_by_ids(EntityKind::Episode, uris).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use crate::error::SyncError;
    use crate::http::HttpResponse;

    #[derive(Clone)]
    struct MockHttpClient {
        status: u16,
        body: &'static str,
        requested: Arc<Mutex<Vec<String>>>,
    }

    impl MockHttpClient {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                requested: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(HttpResponse {
                status: self.status,
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    #[tokio::test]
    async fn change_list_request_carries_cursor() {
        let client = MockHttpClient::new(
            200,
            r#"[{"id":"a","changeListVersion":6,"isDelete":false},
                {"id":"b","changeListVersion":7,"isDelete":true}]"#,
        );
        let remote = HttpRemoteSource::new(client.clone(), "https://api.example.com/v1").unwrap();

        let entries = remote
            .get_change_list(EntityKind::Podcast, 5)
            .await
            .unwrap();

        assert_eq!(
            entries,
            vec![
                ChangeListEntry::updated("a", 6),
                ChangeListEntry::deleted("b", 7)
            ]
        );
        assert_eq!(
            client.requested.lock().unwrap()[0],
            "https://api.example.com/v1/changelist/podcast?after=5"
        );
    }

    #[tokio::test]
    async fn entity_request_joins_ids() {
        let client = MockHttpClient::new(200, r#"[{"id":"news","name":"News"}]"#);
        let remote = HttpRemoteSource::new(client.clone(), "https://api.example.com/").unwrap();

        let categories = remote
            .get_categories(&["news".to_string(), "tech".to_string()])
            .await
            .unwrap();

        assert_eq!(categories[0].name, "News");
        assert_eq!(
            client.requested.lock().unwrap()[0],
            "https://api.example.com/categories?ids=news%2Ctech"
        );
    }

    #[tokio::test]
    async fn empty_id_list_skips_request() {
        let client = MockHttpClient::new(200, "[]");
        let remote = HttpRemoteSource::new(client.clone(), "https://api.example.com/").unwrap();

        let episodes = remote.get_episodes(&[]).await.unwrap();

        assert!(episodes.is_empty());
        assert!(client.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let client = MockHttpClient::new(503, "unavailable");
        let remote = HttpRemoteSource::new(client, "https://api.example.com/").unwrap();

        let result = remote.get_change_list(EntityKind::Episode, -1).await;

        match result.unwrap_err() {
            RemoteError::HttpStatus { status, .. } => assert_eq!(status, 503),
            other => panic!("Expected HttpStatus error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_reported() {
        let client = MockHttpClient::new(200, "<html>");
        let remote = HttpRemoteSource::new(client, "https://api.example.com/").unwrap();

        let result = remote.get_categories(&["news".to_string()]).await;

        assert!(matches!(result, Err(RemoteError::DecodeFailed { .. })));
    }

    #[tokio::test]
    async fn change_list_entry_without_version_is_invalid() {
        let client = MockHttpClient::new(200, r#"[{"id":"a","isDelete":false}]"#);
        let remote = HttpRemoteSource::new(client, "https://api.example.com/").unwrap();

        let err = remote
            .get_change_list(EntityKind::Podcast, 3)
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::InvalidChangeList { .. }));
        assert!(SyncError::from(err).is_contract_violation());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = HttpRemoteSource::new(MockHttpClient::new(200, "[]"), "not a url");
        assert!(matches!(result, Err(RemoteError::InvalidUrl(_))));
    }
}
