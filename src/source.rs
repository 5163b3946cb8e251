use crate::config::SourceConfig;
use crate::data::{self, DataError};
use crate::types::Point;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote source answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Where a fresh point collection comes from.
pub trait PointSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<Point>, LoadError>> + Send;
}

/// GET of a static GeoJSON FeatureCollection.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PointSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<Point>, LoadError> {
        debug!(url = %self.url, "Fetching point data");
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(LoadError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let points = data::parse_collection(&body)?;
        info!(count = points.len(), "Fetched points from remote source");
        Ok(points)
    }
}
