use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;

/// Retrieve the content of a remote list of trusted proxies
#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// Fetch remote lists over http(s), and local lists from `file:` urls
///
/// Every http fetch is bounded by the client timeout, a list that takes longer to download fails
/// the same way as an unreachable one.
#[derive(Debug, Clone)]
pub struct HttpListFetcher {
    client: reqwest::Client,
}

impl HttpListFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListFetcher for HttpListFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|()| FetchError::Unavailable(format!("{url} is not a local path")))?;

            return Ok(tokio::fs::read_to_string(path).await?);
        }

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Split the content of a remote list in entries
///
/// One IP address or CIDR per line, surrounding whitespace is trimmed and blank lines are
/// skipped. Entries are not validated here.
pub fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
