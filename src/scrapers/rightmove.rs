use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, USER_AGENT};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::info;

use crate::fetch::{Fetcher, HttpTransport};
use crate::models::{parse_listing_date, ListingRecord, ListingSource, TransactionKind};
use crate::observe::ErrorSink;
use crate::scrapers::traits::SourceScraper;
use crate::scrapers::types::{ParseError, RawId, ScrapeConfig};

const BASE_URL: &str = "https://www.rightmove.co.uk";

/// Search pages advance by result index, 24 results at a time.
const PAGE_SIZE: u32 = 24;
/// The site never serves more than 1000 results per search: 42 pages.
const MAX_PAGES: u32 = 42;

static JSON_MODEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"window\.jsonModel = (\{.+\})").unwrap());

/// Rightmove scraper: one pagination walk per (region, transaction kind),
/// every search page carrying complete listing rows in its embedded model.
pub struct RightmoveScraper {
    worker: Worker,
    regions: Vec<String>,
}

#[derive(Clone)]
struct Worker {
    fetcher: Fetcher,
    headers: HeaderMap,
    sink: Arc<dyn ErrorSink>,
}

impl RightmoveScraper {
    pub fn new(
        config: &ScrapeConfig,
        regions: Vec<String>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        let fetcher = Fetcher::new(transport, config.max_in_flight, config.retry, sink.clone());
        Ok(Self::with_fetcher(fetcher, regions, sink))
    }

    /// Build against an arbitrary fetcher; used by tests to stub the network.
    pub fn with_fetcher(fetcher: Fetcher, regions: Vec<String>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            worker: Worker {
                fetcher,
                headers: headers(),
                sink,
            },
            regions,
        }
    }
}

#[async_trait]
impl SourceScraper for RightmoveScraper {
    async fn scrape(&self) -> Result<Vec<ListingRecord>> {
        info!("Started scraping from Rightmove");

        let mut tasks = JoinSet::new();
        for region in &self.regions {
            for kind in [TransactionKind::Buy, TransactionKind::Rent] {
                let worker = self.worker.clone();
                let region = region.clone();
                tasks.spawn(async move { worker.walk_region(&region, kind).await });
            }
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(found) = joined {
                records.extend(found);
            }
        }

        info!("Scraped {} Rightmove records", records.len());
        Ok(records)
    }

    fn source_name(&self) -> &'static str {
        "Rightmove"
    }
}

impl Worker {
    /// One region/kind walk. The first page's result-count indicator fixes
    /// the maximum index up front; the walk also stops on an empty page or
    /// any terminal fetch failure, keeping what was already collected.
    async fn walk_region(&self, region: &str, kind: TransactionKind) -> Vec<ListingRecord> {
        let segment = match kind {
            TransactionKind::Buy => "property-for-sale",
            TransactionKind::Rent => "property-to-rent",
        };
        let url = format!("{BASE_URL}/{segment}/find.html");

        let mut records = Vec::new();
        let mut index = 0u32;
        let mut max_index = None;
        loop {
            if let Some(max) = max_index {
                if index >= max {
                    break;
                }
            }
            let query = [
                ("locationIdentifier".to_string(), region.to_string()),
                ("index".to_string(), index.to_string()),
                ("maxDaysSinceAdded".to_string(), "1".to_string()),
            ];
            let body = match self.fetcher.fetch(&url, &self.headers, &query).await {
                Ok(body) => body,
                // terminal failure already recorded by the fetcher
                Err(_) => break,
            };

            if max_index.is_none() {
                match max_result_index(&body) {
                    Ok(0) => break,
                    Ok(max) => max_index = Some(max),
                    Err(err) => {
                        self.sink.record(&url, err.kind());
                        break;
                    }
                }
            }

            match self.page_records(&body, &url) {
                Ok(found) if found.is_empty() => break,
                Ok(found) => records.extend(found),
                Err(err) => {
                    self.sink.record(&url, err.kind());
                    break;
                }
            }
            index += PAGE_SIZE;
        }
        records
    }

    /// Rows of one search page, with row-level failure containment: a
    /// malformed row is recorded and skipped without touching its siblings.
    fn page_records(&self, body: &str, url: &str) -> Result<Vec<ListingRecord>, ParseError> {
        let rows = search_rows(body)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_row(row) {
                Ok(record) => records.push(record),
                Err(err) => self.sink.record(url, err.kind()),
            }
        }
        Ok(records)
    }
}

fn headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.6"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert("sec-gpc", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(
            "\"Chromium\";v=\"112\", \"Brave\";v=\"112\", \"Not:A-Brand\";v=\"99\"",
        ),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
    headers
}

/// Maximum result index for a search, from the first page's result-count
/// header: ceiling-divide into pages of 24, capped at the site's 42-page
/// ceiling. A count of 10 therefore allows exactly one page request.
fn max_result_index(body: &str) -> Result<u32, ParseError> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("span.searchHeader-resultCount").unwrap();
    let text: String = document
        .select(&selector)
        .next()
        .ok_or(ParseError::MissingResultCount)?
        .text()
        .collect();
    let count: u32 = text
        .replace(',', "")
        .trim()
        .parse()
        .map_err(|_| ParseError::MissingResultCount)?;
    let pages = count.div_ceil(PAGE_SIZE).min(MAX_PAGES);
    Ok(pages * PAGE_SIZE)
}

#[derive(Deserialize)]
struct SearchModel {
    properties: Vec<Value>,
}

fn search_rows(body: &str) -> Result<Vec<Value>, ParseError> {
    let caps = JSON_MODEL.captures(body).ok_or(ParseError::MissingDataBlock)?;
    let model: SearchModel = serde_json::from_str(&caps[1])?;
    Ok(model.properties)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RightmoveRow {
    id: RawId,
    transaction_type: String,
    price: RowPrice,
    property_url: String,
    #[serde(default)]
    bedrooms: Option<u32>,
    #[serde(default)]
    bathrooms: Option<u32>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    property_sub_type: Option<String>,
    #[serde(default)]
    featured_property: Option<bool>,
    #[serde(default)]
    display_address: Option<String>,
    #[serde(default)]
    location: Option<RowLocation>,
    #[serde(default)]
    customer: Option<RowCustomer>,
    #[serde(default)]
    first_visible_date: Option<String>,
    #[serde(default)]
    commercial: Option<bool>,
    #[serde(default)]
    development: Option<bool>,
    #[serde(default)]
    residential: Option<bool>,
    #[serde(default)]
    students: Option<bool>,
    #[serde(default)]
    display_size: Option<String>,
    #[serde(default)]
    property_type_full_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowPrice {
    amount: f64,
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    frequency: Option<String>,
}

#[derive(Deserialize)]
struct RowLocation {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowCustomer {
    #[serde(default)]
    brand_trading_name: Option<String>,
}

/// Map one search-result row into the canonical record. The row's own
/// transaction type is authoritative, not the walked search's.
fn parse_row(value: Value) -> Result<ListingRecord, ParseError> {
    let row: RightmoveRow =
        serde_json::from_value(value).map_err(|e| ParseError::Row(e.to_string()))?;

    let transaction_type = match row.transaction_type.as_str() {
        "buy" | "sale" => TransactionKind::Buy,
        "rent" | "let" => TransactionKind::Rent,
        other => return Err(ParseError::Row(format!("unknown transaction type {other:?}"))),
    };
    // frequency accompanies rental rows only; sales never carry one
    let rent_frequency = match transaction_type {
        TransactionKind::Rent => row.price.frequency,
        TransactionKind::Buy => None,
    };

    Ok(ListingRecord {
        property_id: row.id.into_string(),
        transaction_type,
        bedrooms: row.bedrooms,
        bathrooms: row.bathrooms,
        description: row.summary.unwrap_or_default(),
        property_subtype: row.property_sub_type,
        featured: row.featured_property,
        price: row.price.amount,
        currency_symbol: row.price.currency_code.unwrap_or_default(),
        rent_frequency,
        display_address: row.display_address,
        latitude: row.location.as_ref().and_then(|l| l.latitude),
        longitude: row.location.as_ref().and_then(|l| l.longitude),
        agent_name: row.customer.and_then(|c| c.brand_trading_name),
        listing_url: if row.property_url.starts_with("http") {
            row.property_url
        } else {
            format!("{BASE_URL}{}", row.property_url)
        },
        listing_source: ListingSource::Rightmove,
        first_visible_date: row.first_visible_date.as_deref().and_then(parse_listing_date),
        commercial: row.commercial,
        development: row.development,
        residential: row.residential,
        students: row.students,
        display_size: row.display_size.filter(|s| !s.is_empty()),
        short_description: row.property_type_full_description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, RetryPolicy, Transport};
    use crate::observe::MemorySink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sale_row(id: u64) -> Value {
        serde_json::json!({
            "id": id,
            "transactionType": "buy",
            "bedrooms": 3,
            "bathrooms": 1,
            "summary": "A charming terrace",
            "propertySubType": "Terraced",
            "featuredProperty": false,
            "price": {"amount": 525000.0, "currencyCode": "GBP", "frequency": "not specified"},
            "displayAddress": "2 Sample Road, London",
            "location": {"latitude": 51.49, "longitude": -0.12},
            "customer": {"brandTradingName": "Sample & Sons"},
            "propertyUrl": format!("/properties/{id}"),
            "firstVisibleDate": "2023-04-21T17:52:02Z",
            "commercial": false,
            "development": false,
            "residential": true,
            "students": false,
            "displaySize": "",
            "propertyTypeFullDescription": "3 bedroom terraced house for sale"
        })
    }

    fn page_body(count: u32, rows: &[Value]) -> String {
        let model = serde_json::json!({ "properties": rows });
        format!(
            "<html><span class=\"searchHeader-resultCount\">{count}</span>\
             <script>window.jsonModel = {model}</script></html>"
        )
    }

    struct CountingTransport {
        body: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn get(
            &self,
            _url: &str,
            _headers: &HeaderMap,
            _query: &[(String, String)],
        ) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn worker(transport: Arc<dyn Transport>) -> (Worker, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let fetcher = Fetcher::new(
            transport,
            30,
            RetryPolicy {
                max_attempts: 1,
                delay: std::time::Duration::from_millis(1),
            },
            sink.clone(),
        );
        (
            Worker {
                fetcher,
                headers: HeaderMap::new(),
                sink: sink.clone(),
            },
            sink,
        )
    }

    #[test]
    fn result_count_rounds_up_to_whole_pages() {
        assert_eq!(max_result_index(&page_body(10, &[])).unwrap(), 24);
        assert_eq!(max_result_index(&page_body(24, &[])).unwrap(), 24);
        assert_eq!(max_result_index(&page_body(25, &[])).unwrap(), 48);
        assert_eq!(max_result_index(&page_body(0, &[])).unwrap(), 0);
        // 1,200 results reported but the site caps at 42 pages
        assert_eq!(max_result_index(&page_body(1200, &[])).unwrap(), 42 * 24);
    }

    #[test]
    fn missing_result_count_is_a_structural_error() {
        let err = max_result_index("<html></html>").unwrap_err();
        assert!(matches!(err, ParseError::MissingResultCount));
    }

    #[test]
    fn row_maps_into_canonical_record() {
        let record = parse_row(sale_row(77)).unwrap();
        assert_eq!(record.property_id, "77");
        assert_eq!(record.transaction_type, TransactionKind::Buy);
        assert_eq!(record.price, 525_000.0);
        assert_eq!(record.currency_symbol, "GBP");
        // sales never carry a frequency, even when the source reports one
        assert_eq!(record.rent_frequency, None);
        assert_eq!(record.listing_url, "https://www.rightmove.co.uk/properties/77");
        assert_eq!(record.residential, Some(true));
        // empty display size is unknown, not empty text
        assert_eq!(record.display_size, None);
        assert_eq!(
            record.first_visible_date,
            chrono::NaiveDate::from_ymd_opt(2023, 4, 21)
        );
    }

    #[test]
    fn rental_rows_keep_their_frequency() {
        let mut row = sale_row(78);
        row["transactionType"] = "rent".into();
        row["price"] = serde_json::json!({"amount": 1950.0, "currencyCode": "GBP", "frequency": "monthly"});
        let record = parse_row(row).unwrap();
        assert_eq!(record.transaction_type, TransactionKind::Rent);
        assert_eq!(record.rent_frequency.as_deref(), Some("monthly"));
    }

    #[tokio::test]
    async fn count_of_ten_issues_exactly_one_page_request() {
        let rows = vec![sale_row(1), sale_row(2)];
        let transport = Arc::new(CountingTransport {
            body: page_body(10, &rows),
            calls: AtomicU32::new(0),
        });
        let (worker, sink) = worker(transport.clone());

        let records = worker.walk_region("OUTCODE^761", TransactionKind::Buy).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(records.len(), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn malformed_row_is_skipped_and_recorded_once() {
        let rows = vec![
            sale_row(1),
            sale_row(2),
            serde_json::json!({"id": 3, "transactionType": "buy"}), // no price
            sale_row(4),
            sale_row(5),
        ];
        let transport = Arc::new(CountingTransport {
            body: page_body(5, &rows),
            calls: AtomicU32::new(0),
        });
        let (worker, sink) = worker(transport);

        let records = worker.walk_region("OUTCODE^761", TransactionKind::Buy).await;

        let ids: Vec<_> = records.iter().map(|r| r.property_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "4", "5"]);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].1, "listing row rejected");
    }
}
