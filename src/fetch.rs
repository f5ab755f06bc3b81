use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use url::Url;

use crate::error::FetchError;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const AGENT: &str = concat!("doclevels/", env!("CARGO_PKG_VERSION"));

pub fn parse_page_url(input: &str) -> Result<Url, FetchError> {
    let input = input.trim();
    if let Ok(url) = Url::parse(input) {
        return Ok(url);
    }
    std::path::Path::new(input)
        .canonicalize()
        .ok()
        .and_then(|path| Url::from_file_path(path).ok())
        .ok_or_else(|| FetchError::InvalidUrl(input.to_owned()))
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(FetchError::Transport)?;
        Ok(Self { client, timeout })
    }

    async fn fetch_http(&self, url: &Url) -> Result<String, FetchError> {
        let map_err = |err: reqwest::Error| {
            if err.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(err)
            }
        };

        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(map_err)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        tracing::debug!(url = %url, "fetch page");
        match url.scheme() {
            "http" | "https" => self.fetch_http(url).await,
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| FetchError::InvalidUrl(url.to_string()))?;
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| FetchError::File {
                        path: path.display().to_string(),
                        source,
                    })
            }
            other => Err(FetchError::InvalidUrl(format!(
                "{url} (unsupported scheme {other})"
            ))),
        }
    }
}
