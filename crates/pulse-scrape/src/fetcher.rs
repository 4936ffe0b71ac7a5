use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use pulse_core::Target;

use crate::error::FetchError;

/// 拉取目标的原始暴露内容
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, target: &Target) -> Result<Vec<u8>, FetchError>;
}

/// HTTP 拉取
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &Target) -> Result<Vec<u8>, FetchError> {
        let url = target.url().map_err(|e| FetchError::Url(e.to_string()))?;
        debug!(url = %url, "Scraping target");

        let response = self
            .client
            .get(url)
            .header("Accept", "text/plain;version=0.0.4")
            .timeout(target.scrape_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, target.scrape_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, target.scrape_timeout))?;
        Ok(body.to_vec())
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Request(err.to_string())
    }
}
