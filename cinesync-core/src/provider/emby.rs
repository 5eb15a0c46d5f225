//! Emby HTTP provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::{EmbyBackend, EmbyItem, EmbyItems, EmbyPlayback, HTTP_CLIENT};
use crate::{Error, Result};

pub struct HttpEmby {
    client: reqwest::Client,
}

impl HttpEmby {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        host: &str,
        path: &str,
        api_key: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{path}", host.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("X-Emby-Token", api_key)
            .query(query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "emby returned {} for {url}",
                resp.status()
            )));
        }
        Ok(resp.json::<T>().await?)
    }
}

impl Default for HttpEmby {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlaybackInfoResp {
    #[serde(default)]
    media_sources: Vec<MediaSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaSource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    container: String,
    #[serde(default)]
    direct_stream_url: Option<String>,
    #[serde(default)]
    media_streams: Vec<MediaStream>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaStream {
    #[serde(default, rename = "Type")]
    stream_type: String,
    #[serde(default)]
    display_title: String,
    #[serde(default)]
    delivery_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResp {
    #[serde(default)]
    items: Vec<ItemInfo>,
    #[serde(default)]
    total_record_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemInfo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_folder: bool,
}

#[async_trait]
impl EmbyBackend for HttpEmby {
    async fn playback(&self, host: &str, api_key: &str, item_id: &str) -> Result<EmbyPlayback> {
        let resp: PlaybackInfoResp = self
            .get_json(
                host,
                &format!("/emby/Items/{item_id}/PlaybackInfo"),
                api_key,
                &[],
            )
            .await?;

        let source = resp
            .media_sources
            .into_iter()
            .next()
            .ok_or_else(|| Error::Upstream("emby item has no media sources".to_string()))?;

        let host = host.trim_end_matches('/');
        let url = source.direct_stream_url.map_or_else(
            || {
                format!(
                    "{host}/emby/Videos/{item_id}/stream.{}?MediaSourceId={}&Static=true&api_key={api_key}",
                    if source.container.is_empty() { "mp4" } else { &source.container },
                    source.id,
                )
            },
            |direct| format!("{host}{direct}"),
        );

        let subtitles: HashMap<String, String> = source
            .media_streams
            .into_iter()
            .filter(|s| s.stream_type == "Subtitle")
            .filter_map(|s| {
                s.delivery_url
                    .map(|delivery| (s.display_title, format!("{host}{delivery}")))
            })
            .collect();

        Ok(EmbyPlayback {
            url,
            container: source.container,
            subtitles,
        })
    }

    async fn items(
        &self,
        host: &str,
        api_key: &str,
        parent_id: &str,
        start: u64,
        limit: u64,
    ) -> Result<EmbyItems> {
        let mut query = vec![
            ("StartIndex", start.to_string()),
            ("Limit", limit.to_string()),
            ("Recursive", "false".to_string()),
        ];
        if !parent_id.is_empty() {
            query.push(("ParentId", parent_id.to_string()));
        }
        let resp: ItemsResp = self.get_json(host, "/emby/Items", api_key, &query).await?;
        Ok(EmbyItems {
            items: resp
                .items
                .into_iter()
                .map(|i| EmbyItem {
                    id: i.id,
                    name: i.name,
                    is_folder: i.is_folder,
                })
                .collect(),
            total: resp.total_record_count,
        })
    }
}
