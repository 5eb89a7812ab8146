use crate::models::ListingRecord;
use anyhow::Result;
use async_trait::async_trait;

/// Common trait for all listing-source scrapers.
///
/// Each source pipeline is one joinable unit of work for the orchestrator,
/// whether it multiplexes fetch tasks on the runtime or drives a browser on
/// blocking worker threads internally.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    /// Scrape everything this source has for the run. Best effort: walks
    /// that fail part-way contribute what they collected.
    async fn scrape(&self) -> Result<Vec<ListingRecord>>;

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
