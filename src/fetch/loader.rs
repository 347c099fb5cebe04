use tracing::{debug, info};

use super::{HttpClient, fetch_bytes};
use crate::config::{FeedConfig, FeedSource};
use crate::error::{FeedKind, PipelineError};
use crate::parser::{RawTable, parse_csv};

/// The two raw feeds, parsed but not yet prepared.
#[derive(Debug, Clone)]
pub struct RawFeeds {
    pub national: RawTable,
    pub regional: RawTable,
}

/// Loads both feeds from their configured sources.
pub struct FeedLoader<C> {
    client: C,
    national: FeedSource,
    regional: FeedSource,
}

impl<C: HttpClient> FeedLoader<C> {
    pub fn new(client: C, config: &FeedConfig) -> Self {
        Self {
            client,
            national: config.national.clone(),
            regional: config.regional.clone(),
        }
    }

    /// Fetches and parses both feeds concurrently, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Fetch`] or [`PipelineError::Parse`] from
    /// whichever feed fails first.
    #[tracing::instrument(skip(self), fields(national = %self.national, regional = %self.regional))]
    pub async fn load(&self) -> Result<RawFeeds, PipelineError> {
        let (national, regional) = tokio::try_join!(
            self.load_one(FeedKind::National, &self.national),
            self.load_one(FeedKind::Regional, &self.regional),
        )?;

        info!(
            national_rows = national.len(),
            regional_rows = regional.len(),
            "Feeds loaded"
        );
        Ok(RawFeeds { national, regional })
    }

    async fn load_one(
        &self,
        feed: FeedKind,
        source: &FeedSource,
    ) -> Result<RawTable, PipelineError> {
        let bytes = match source {
            FeedSource::Url(url) => fetch_bytes(&self.client, url).await?,
            FeedSource::Path(path) => {
                debug!(%feed, path = %path.display(), "Reading feed from disk");
                tokio::fs::read(path)
                    .await
                    .map_err(|e| PipelineError::fetch(&source.to_string(), e))?
                    .into()
            }
        };
        parse_csv(feed, &bytes)
    }
}
