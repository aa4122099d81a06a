use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::CacheError;

/// HTTP request timeout in seconds.
/// Asset fetches happen at install time, so a slow network should fail the
/// install rather than stall it.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Network access for the worker.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, CacheError>;
}

/// Fetches manifest paths relative to the app's base URL.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> Result<Self, CacheError> {
        let base_url = Url::parse(base_url).map_err(|e| CacheError::Fetch {
            path: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, path: &str) -> Result<Url, CacheError> {
        self.base_url.join(path).map_err(|e| CacheError::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        let url = self.url_for(path)?;
        debug!(url = %url, "Fetching asset");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::from_status(path, status, &body));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_against_base() {
        let fetcher = HttpFetcher::new("https://customodoro.app/").unwrap();
        assert_eq!(
            fetcher.url_for("/style.css").unwrap().as_str(),
            "https://customodoro.app/style.css"
        );
        assert_eq!(
            fetcher.url_for("images/icon-192.png").unwrap().as_str(),
            "https://customodoro.app/images/icon-192.png"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpFetcher::new("not a url"),
            Err(CacheError::Fetch { .. })
        ));
    }
}
