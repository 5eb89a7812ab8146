use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::info;

use crate::fetch::{Fetcher, HttpTransport};
use crate::models::{ListingRecord, ListingSource, TransactionKind};
use crate::observe::ErrorSink;
use crate::scrapers::traits::SourceScraper;
use crate::scrapers::types::{decimal_amount, ParseError, RawId, ScrapeConfig};

const BASE_URL: &str = "https://www.onthemarket.com";

/// Marker for the embedded listing payload on both search and detail pages.
static JSON_DATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__OTM__\.jsonData = (\{.+\})").unwrap());
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// OnTheMarket scraper. Two phases: walk every (region, transaction kind)
/// search to discover property links, then fetch each unique property page
/// for the full record. Detail pages embed fields the search grid omits.
pub struct OnTheMarketScraper {
    worker: Worker,
    regions: Vec<String>,
}

#[derive(Clone)]
struct Worker {
    fetcher: Fetcher,
    headers: HeaderMap,
    sink: Arc<dyn ErrorSink>,
}

impl OnTheMarketScraper {
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

    /// Walk all regions for both transaction kinds and return the sorted,
    /// deduplicated set of property links. The same property shows up under
    /// neighbouring outcodes, hence the dedup.
    async fn collect_links(&self) -> BTreeSet<String> {
        let mut tasks = JoinSet::new();
        for region in &self.regions {
            for kind in [TransactionKind::Buy, TransactionKind::Rent] {
                let worker = self.worker.clone();
                let region = region.clone();
                tasks.spawn(async move { worker.region_links(&region, kind).await });
            }
        }

        let mut links = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(found) = joined {
                links.extend(found);
            }
        }
        links
    }
}

#[async_trait]
impl SourceScraper for OnTheMarketScraper {
    async fn scrape(&self) -> Result<Vec<ListingRecord>> {
        info!("Started scraping from OnTheMarket");

        let links = self.collect_links().await;
        info!("Discovered {} unique OnTheMarket property links", links.len());

        let mut tasks = JoinSet::new();
        for url in links {
            let worker = self.worker.clone();
            tasks.spawn(async move { worker.property_record(&url).await });
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(record)) = joined {
                records.push(record);
            }
        }

        info!("Scraped {} OnTheMarket records", records.len());
        Ok(records)
    }

    fn source_name(&self) -> &'static str {
        "OnTheMarket"
    }
}

impl Worker {
    /// One region/kind pagination walk over the recently-added search grid.
    /// Terminates on the first empty page; a fetch failure ends the walk
    /// early keeping whatever was already collected.
    async fn region_links(&self, region: &str, kind: TransactionKind) -> Vec<String> {
        let segment = match kind {
            TransactionKind::Buy => "for-sale",
            TransactionKind::Rent => "to-rent",
        };
        let url = format!("{BASE_URL}/{segment}/property/{region}/");

        let mut links = Vec::new();
        let mut page = 0u32;
        loop {
            let query = [
                ("page".to_string(), page.to_string()),
                ("recently-added".to_string(), "24-hours".to_string()),
                ("view".to_string(), "grid".to_string()),
            ];
            let body = match self.fetcher.fetch(&url, &self.headers, &query).await {
                Ok(body) => body,
                // terminal failure already recorded by the fetcher
                Err(_) => break,
            };

            let rows = match search_rows(&body) {
                Ok(rows) => rows,
                Err(err) => {
                    self.sink.record(&url, err.kind());
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }
            // A lone result without a property link is an advertisement,
            // not data.
            if rows.len() == 1 && row_link(&rows[0]).is_none() {
                break;
            }

            for row in &rows {
                match row_link(row) {
                    Some(link) => links.push(link),
                    None => self.sink.record(&url, "listing row missing property link"),
                }
            }
            page += 1;
        }
        links
    }

    async fn property_record(&self, url: &str) -> Option<ListingRecord> {
        // fetch failures are recorded by the fetcher and skip this property
        let body = self.fetcher.fetch(url, &self.headers, &[]).await.ok()?;
        match parse_property(&body, url) {
            Ok(record) => Some(record),
            Err(err) => {
                self.sink.record(url, err.kind());
                None
            }
        }
    }
}

fn headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
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

#[derive(Deserialize)]
struct SearchPayload {
    properties: Vec<Value>,
}

fn search_rows(body: &str) -> Result<Vec<Value>, ParseError> {
    let caps = JSON_DATA.captures(body).ok_or(ParseError::MissingDataBlock)?;
    let payload: SearchPayload = serde_json::from_str(&caps[1])?;
    Ok(payload.properties)
}

fn row_link(row: &Value) -> Option<String> {
    let path = row.get("property-link").and_then(Value::as_str)?;
    Some(absolutize(path))
}

fn absolutize(path: &str) -> String {
    if path.starts_with("http") {
        path.to_string()
    } else {
        format!("{BASE_URL}{path}")
    }
}

#[derive(Deserialize)]
struct PropertyPayload {
    id: RawId,
    #[serde(rename = "for-sale?")]
    for_sale: bool,
    price: String,
    #[serde(default)]
    bedrooms: Option<u32>,
    #[serde(default)]
    bathrooms: Option<u32>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(rename = "humanised-property-type", default)]
    property_type: Option<String>,
    #[serde(default)]
    display_address: Option<String>,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    agent: Option<Agent>,
    #[serde(rename = "canonical-url", default)]
    canonical_url: Option<String>,
    #[serde(rename = "commercial?", default)]
    commercial: Option<bool>,
    #[serde(rename = "development-property?", default)]
    development: Option<bool>,
    #[serde(rename = "student?", default)]
    student: Option<bool>,
    #[serde(rename = "minimum-area", default)]
    minimum_area: Option<String>,
    #[serde(rename = "property-title", default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct Feature {
    feature: String,
}

#[derive(Deserialize)]
struct Location {
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

#[derive(Deserialize)]
struct Agent {
    #[serde(default)]
    company_name: Option<String>,
}

/// Map one property detail page into the canonical record.
///
/// The site does not expose a true first-visible date, so the scrape date
/// stands in for it; a documented asymmetry with the other two sources.
fn parse_property(body: &str, url: &str) -> Result<ListingRecord, ParseError> {
    let caps = JSON_DATA.captures(body).ok_or(ParseError::MissingDataBlock)?;
    let payload: PropertyPayload = serde_json::from_str(&caps[1])?;

    let transaction_type = if payload.for_sale {
        TransactionKind::Buy
    } else {
        TransactionKind::Rent
    };
    let (price, currency_symbol, rent_frequency) =
        parse_price(&payload.price, payload.for_sale)?;

    Ok(ListingRecord {
        property_id: payload.id.into_string(),
        transaction_type,
        bedrooms: payload.bedrooms,
        bathrooms: payload.bathrooms,
        description: parse_description(payload.description.as_deref(), &payload.features),
        property_subtype: payload.property_type,
        featured: None,
        price,
        currency_symbol,
        rent_frequency,
        display_address: payload.display_address,
        latitude: payload.location.as_ref().and_then(|l| l.lat),
        longitude: payload.location.as_ref().and_then(|l| l.lon),
        agent_name: payload.agent.and_then(|a| a.company_name),
        listing_url: absolutize(payload.canonical_url.as_deref().unwrap_or(url)),
        listing_source: ListingSource::OnTheMarket,
        first_visible_date: Some(Utc::now().date_naive()),
        commercial: payload.commercial,
        development: payload.development,
        residential: None,
        students: payload.student,
        display_size: payload.minimum_area,
        short_description: payload.title,
    })
}

/// Price text arrives as e.g. `"£450,000"` for sales and `"£1,950 pcm"` for
/// rentals: amount from the digits, currency from the leading character,
/// frequency from the second token.
fn parse_price(raw: &str, for_sale: bool) -> Result<(f64, String, Option<String>), ParseError> {
    let mut tokens = raw.split_whitespace();
    let price_text = if for_sale {
        raw
    } else {
        tokens.next().unwrap_or(raw)
    };
    let amount = decimal_amount(price_text)
        .ok_or_else(|| ParseError::Row(format!("unparseable price {raw:?}")))?;
    let symbol = raw.chars().next().map(String::from).unwrap_or_default();
    let frequency = if for_sale {
        None
    } else {
        tokens.next().map(str::to_string)
    };
    Ok((amount, symbol, frequency))
}

fn parse_description(description: Option<&str>, features: &[Feature]) -> String {
    let stripped = TAGS.replace_all(description.unwrap_or_default(), " ");
    let feature_list = features
        .iter()
        .map(|f| f.feature.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let full = format!("{} {}", stripped.trim(), feature_list);
    SPACES.replace_all(full.trim(), " ").into_owned()
}
