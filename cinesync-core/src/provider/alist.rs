//! Alist HTTP provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AlistBackend, AlistFsEntry, AlistFsList, HTTP_CLIENT};
use crate::{Error, Result};

pub struct HttpAlist {
    client: reqwest::Client,
}

impl HttpAlist {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
        }
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        host: &str,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{path}", host.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(body);
        if !token.is_empty() {
            req = req.header("Authorization", token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "alist returned {} for {url}",
                resp.status()
            )));
        }
        let wrapper: ApiResp<T> = resp.json().await?;
        wrapper.into_data()
    }
}

impl Default for HttpAlist {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResp<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> ApiResp<T> {
    fn into_data(self) -> Result<T> {
        if self.code != 200 {
            return Err(Error::Upstream(format!(
                "alist api error {}: {}",
                self.code, self.message
            )));
        }
        self.data
            .ok_or_else(|| Error::Upstream("alist api returned no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct FsGetData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    raw_url: String,
    #[serde(default)]
    provider: String,
}

#[derive(Debug, Default, Deserialize)]
struct FsListData {
    #[serde(default)]
    content: Option<Vec<FsGetData>>,
    #[serde(default)]
    total: u64,
}

impl From<FsGetData> for AlistFsEntry {
    fn from(data: FsGetData) -> Self {
        Self {
            name: data.name,
            is_dir: data.is_dir,
            size: data.size,
            raw_url: data.raw_url,
            provider: data.provider,
        }
    }
}

#[async_trait]
impl AlistBackend for HttpAlist {
    async fn login(&self, host: &str, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginReq<'a> {
            username: &'a str,
            password: &'a str,
        }
        let data: LoginData = self
            .post_json(host, "/api/auth/login", "", &LoginReq { username, password })
            .await?;
        Ok(data.token)
    }

    async fn fs_get(
        &self,
        host: &str,
        token: &str,
        path: &str,
        password: &str,
    ) -> Result<AlistFsEntry> {
        #[derive(Serialize)]
        struct FsGetReq<'a> {
            path: &'a str,
            password: &'a str,
        }
        let data: FsGetData = self
            .post_json(host, "/api/fs/get", token, &FsGetReq { path, password })
            .await?;
        Ok(data.into())
    }

    async fn fs_list(
        &self,
        host: &str,
        token: &str,
        path: &str,
        password: &str,
        page: u64,
        per_page: u64,
    ) -> Result<AlistFsList> {
        #[derive(Serialize)]
        struct FsListReq<'a> {
            path: &'a str,
            password: &'a str,
            page: u64,
            per_page: u64,
            refresh: bool,
        }
        let data: FsListData = self
            .post_json(
                host,
                "/api/fs/list",
                token,
                &FsListReq {
                    path,
                    password,
                    page,
                    per_page,
                    refresh: false,
                },
            )
            .await?;
        Ok(AlistFsList {
            entries: data
                .content
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            total: data.total,
        })
    }
}
