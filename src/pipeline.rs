use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::models::ListingRecord;
use crate::scrapers::SourceScraper;

/// Run every source pipeline concurrently and aggregate their records.
///
/// Each source is one joinable unit of work. A source that fails or panics
/// is logged and dropped; the remaining sources' results are still
/// returned. Each source's internal emission order is preserved, with no
/// ordering guarantee across sources.
pub async fn run(scrapers: Vec<Arc<dyn SourceScraper>>) -> Vec<ListingRecord> {
    let mut tasks = JoinSet::new();
    for scraper in scrapers {
        tasks.spawn(async move {
            let name = scraper.source_name();
            let started = Instant::now();
            let outcome = scraper.scrape().await;
            (name, started.elapsed(), outcome)
        });
    }

    let mut all = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, elapsed, Ok(records))) => {
                log_elapsed(name, elapsed);
                all.extend(records);
            }
            Ok((name, elapsed, Err(err))) => {
                log_elapsed(name, elapsed);
                error!("{name} pipeline failed: {err:#}");
            }
            Err(err) => error!("source task panicked: {err}"),
        }
    }
    all
}

fn log_elapsed(name: &str, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        info!("{name} took {secs:.2} seconds to run.");
    } else {
        info!("{name} took {:.2} minutes to run.", secs / 60.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingSource, TransactionKind};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct FixedScraper {
        name: &'static str,
        records: Vec<ListingRecord>,
    }

    struct BrokenScraper;

    fn record(id: &str) -> ListingRecord {
        ListingRecord {
            property_id: id.to_string(),
            transaction_type: TransactionKind::Buy,
            bedrooms: None,
            bathrooms: None,
            description: String::new(),
            property_subtype: None,
            featured: None,
            price: 100_000.0,
            currency_symbol: "£".to_string(),
            rent_frequency: None,
            display_address: None,
            latitude: None,
            longitude: None,
            agent_name: None,
            listing_url: format!("https://example.test/{id}"),
            listing_source: ListingSource::Rightmove,
            first_visible_date: None,
            commercial: None,
            development: None,
            residential: None,
            students: None,
            display_size: None,
            short_description: None,
        }
    }

    #[async_trait]
    impl SourceScraper for FixedScraper {
        async fn scrape(&self) -> Result<Vec<ListingRecord>> {
            Ok(self.records.clone())
        }

        fn source_name(&self) -> &'static str {
            self.name
        }
    }

    #[async_trait]
    impl SourceScraper for BrokenScraper {
        async fn scrape(&self) -> Result<Vec<ListingRecord>> {
            Err(anyhow!("source offline"))
        }

        fn source_name(&self) -> &'static str {
            "Broken"
        }
    }

    #[tokio::test]
    async fn failed_source_does_not_block_the_others() {
        let scrapers: Vec<Arc<dyn SourceScraper>> = vec![
            Arc::new(FixedScraper {
                name: "A",
                records: vec![record("a1"), record("a2")],
            }),
            Arc::new(BrokenScraper),
            Arc::new(FixedScraper {
                name: "B",
                records: vec![record("b1")],
            }),
        ];

        let mut ids: Vec<_> = run(scrapers)
            .await
            .into_iter()
            .map(|r| r.property_id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[tokio::test]
    async fn source_emission_order_is_preserved() {
        let scrapers: Vec<Arc<dyn SourceScraper>> = vec![Arc::new(FixedScraper {
            name: "A",
            records: vec![record("a1"), record("a2"), record("a3")],
        })];

        let ids: Vec<_> = run(scrapers)
            .await
            .into_iter()
            .map(|r| r.property_id)
            .collect();

        assert_eq!(ids, vec!["a1", "a2", "a3"]);
    }
}
