use std::path::PathBuf;
use std::time::Duration;

use siphon_core::blocklist::{FetchResponse, ListError, ListSource};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the tracker list over HTTPS.
pub struct HttpListSource {
    client: reqwest::Client,
    url: String,
}

impl HttpListSource {
    pub fn new(url: &str) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("siphon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl ListSource for HttpListSource {
    async fn fetch(&self) -> Result<FetchResponse, ListError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ListError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ListError::Network(e.to_string()))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// Reads a list saved on disk, for offline replays.
pub struct FileListSource {
    path: PathBuf,
}

impl FileListSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ListSource for FileListSource {
    async fn fetch(&self) -> Result<FetchResponse, ListError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ListError::Network(format!("{}: {}", self.path.display(), e)))?;
        Ok(FetchResponse {
            status: 200,
            reason: "OK".to_string(),
            body,
        })
    }
}

/// Either kind of source, chosen from command-line flags.
pub enum AnySource {
    Http(HttpListSource),
    File(FileListSource),
}

impl AnySource {
    pub fn from_args(url: &str, list_file: Option<&str>) -> Result<Self, String> {
        match list_file {
            Some(path) => Ok(AnySource::File(FileListSource::new(path))),
            None => Ok(AnySource::Http(HttpListSource::new(url)?)),
        }
    }
}

impl ListSource for AnySource {
    async fn fetch(&self) -> Result<FetchResponse, ListError> {
        match self {
            AnySource::Http(source) => source.fetch().await,
            AnySource::File(source) => source.fetch().await,
        }
    }
}
