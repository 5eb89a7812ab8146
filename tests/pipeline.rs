use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;

use property_scout::fetch::{FetchError, Fetcher, RetryPolicy, Transport};
use property_scout::models::{ListingSource, TransactionKind};
use property_scout::observe::MemorySink;
use property_scout::pipeline;
use property_scout::scrapers::{RightmoveScraper, SourceScraper, ZooplaScraper};
use property_scout::scrapers::browser::PageRenderer;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        delay: Duration::from_millis(1),
    }
}

fn rightmove_row(id: u64, kind: &str) -> Value {
    serde_json::json!({
        "id": id,
        "transactionType": kind,
        "bedrooms": 2,
        "bathrooms": 1,
        "summary": "A flat",
        "propertySubType": "Flat",
        "featuredProperty": false,
        "price": {"amount": 400000.0, "currencyCode": "GBP"},
        "displayAddress": "Somewhere in London",
        "location": {"latitude": 51.5, "longitude": -0.1},
        "customer": {"brandTradingName": "Agents R Us"},
        "propertyUrl": format!("/properties/{id}"),
        "firstVisibleDate": "2023-04-21T10:00:00Z",
        "commercial": false,
        "development": false,
        "residential": true,
        "students": false,
        "displaySize": "500 sq ft",
        "propertyTypeFullDescription": "2 bedroom flat"
    })
}

fn rightmove_page(count: u32, rows: &[Value]) -> String {
    let model = serde_json::json!({ "properties": rows });
    format!(
        "<html><span class=\"searchHeader-resultCount\">{count}</span>\
         <script>window.jsonModel = {model}</script></html>"
    )
}

/// One single-page search result per (region, kind), keyed by region and a
/// per-region id offset so every record comes out distinct.
struct RegionTransport;

#[async_trait]
impl Transport for RegionTransport {
    async fn get(
        &self,
        url: &str,
        _headers: &HeaderMap,
        query: &[(String, String)],
    ) -> Result<String, FetchError> {
        let region = query
            .iter()
            .find(|(k, _)| k == "locationIdentifier")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let offset = if region == "e1" { 100 } else { 200 };
        // serve listings for sales only; rentals have nothing today
        if url.contains("to-rent") {
            return Ok(rightmove_page(0, &[]));
        }
        let rows = vec![
            rightmove_row(offset + 1, "buy"),
            rightmove_row(offset + 2, "buy"),
        ];
        Ok(rightmove_page(2, &rows))
    }
}

#[tokio::test]
async fn two_regions_one_page_each_yield_four_records() {
    let sink = Arc::new(MemorySink::new());
    let fetcher = Fetcher::new(Arc::new(RegionTransport), 30, fast_policy(), sink.clone());
    let scraper = RightmoveScraper::with_fetcher(
        fetcher,
        vec!["e1".to_string(), "e2".to_string()],
        sink.clone(),
    );

    let scrapers: Vec<Arc<dyn SourceScraper>> = vec![Arc::new(scraper)];
    let records = pipeline::run(scrapers).await;

    assert_eq!(records.len(), 4);
    assert!(records
        .iter()
        .all(|r| r.listing_source == ListingSource::Rightmove));
    let mut ids: Vec<_> = records.iter().map(|r| r.property_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["101", "102", "201", "202"]);
    assert!(sink.is_empty());
}

/// A renderer that fails outright, as when no browser is reachable.
struct DeadRenderer;

impl PageRenderer for DeadRenderer {
    fn rendered_body(&self, _url: &str) -> anyhow::Result<String> {
        anyhow::bail!("browser session lost")
    }
}

#[tokio::test]
async fn broken_browser_source_still_returns_other_sources() {
    let sink = Arc::new(MemorySink::new());
    let fetcher = Fetcher::new(Arc::new(RegionTransport), 30, fast_policy(), sink.clone());
    let rightmove =
        RightmoveScraper::with_fetcher(fetcher, vec!["e1".to_string()], sink.clone());
    let zoopla = ZooplaScraper::new(Arc::new(DeadRenderer), sink.clone());

    let scrapers: Vec<Arc<dyn SourceScraper>> =
        vec![Arc::new(rightmove), Arc::new(zoopla)];
    let records = pipeline::run(scrapers).await;

    // Rightmove's two sale listings survive; both Zoopla walks were
    // recorded as failures
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.listing_source == ListingSource::Rightmove));
    assert_eq!(sink.len(), 2);

    // spot-check the canonical mapping
    let record = &records[0];
    assert_eq!(record.transaction_type, TransactionKind::Buy);
    assert_eq!(record.currency_symbol, "GBP");
    assert_eq!(record.display_size.as_deref(), Some("500 sq ft"));
    assert!(record.listing_url.starts_with("https://www.rightmove.co.uk/properties/"));
}
