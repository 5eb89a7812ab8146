use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::models::{parse_listing_date, ListingRecord, ListingSource, TransactionKind};
use crate::observe::ErrorSink;
use crate::scrapers::browser::PageRenderer;
use crate::scrapers::traits::SourceScraper;
use crate::scrapers::types::{decimal_amount, ParseError, RawId};

const BASE_URL: &str = "https://www.zoopla.co.uk";

/// Zoopla scraper. Listings render client-side, so page bodies come from a
/// browser session rather than the bounded fetcher; the sale and rental
/// walks run on blocking worker threads joined concurrently.
pub struct ZooplaScraper {
    renderer: Arc<dyn PageRenderer>,
    sink: Arc<dyn ErrorSink>,
}

impl ZooplaScraper {
    pub fn new(renderer: Arc<dyn PageRenderer>, sink: Arc<dyn ErrorSink>) -> Self {
        Self { renderer, sink }
    }

    fn walk_task(
        &self,
        kind: TransactionKind,
    ) -> tokio::task::JoinHandle<Vec<ListingRecord>> {
        let renderer = self.renderer.clone();
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || walk_kind(renderer.as_ref(), sink.as_ref(), kind))
    }
}

#[async_trait]
impl SourceScraper for ZooplaScraper {
    async fn scrape(&self) -> Result<Vec<ListingRecord>> {
        info!("Started scraping from Zoopla");

        let sales = self.walk_task(TransactionKind::Buy);
        let rentals = self.walk_task(TransactionKind::Rent);

        let mut records = sales.await.context("Zoopla sales walk panicked")?;
        records.extend(rentals.await.context("Zoopla rentals walk panicked")?);

        info!("Scraped {} Zoopla records", records.len());
        Ok(records)
    }

    fn source_name(&self) -> &'static str {
        "Zoopla"
    }
}

/// One transaction kind's pagination walk over the London search. Any
/// render or extraction failure is treated as the end of the results,
/// recorded, and already-collected records are kept.
fn walk_kind(
    renderer: &dyn PageRenderer,
    sink: &dyn ErrorSink,
    kind: TransactionKind,
) -> Vec<ListingRecord> {
    let segment = match kind {
        TransactionKind::Buy => "for-sale",
        TransactionKind::Rent => "to-rent",
    };

    let mut records = Vec::new();
    let mut page = 1u32;
    loop {
        let url = format!(
            "{BASE_URL}/{segment}/property/london/?q=London&search_source=home&added=24_hours&pn={page}"
        );
        let body = match renderer.rendered_body(&url) {
            Ok(body) => body,
            Err(_) => {
                sink.record(&url, "page render failed");
                break;
            }
        };

        if page == 1 {
            if let Some(total) = total_results(&body) {
                info!("Total {segment}: {total}");
            }
        }

        let rows = match listing_rows(&body) {
            Ok(rows) => rows,
            Err(err) => {
                sink.record(&url, err.kind());
                break;
            }
        };
        if rows.is_empty() {
            info!("Completed {segment} after {} pages", page - 1);
            break;
        }

        for row in rows {
            match parse_row(row, kind) {
                Ok(record) => records.push(record),
                Err(err) => sink.record(&url, err.kind()),
            }
        }
        info!("Scraped {segment} page #{page}");
        page += 1;
    }
    records
}

/// Source-reported total-results indicator, present on the first page.
fn total_results(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("p[data-testid='total-results']").unwrap();
    let text: String = document.select(&selector).next()?.text().collect();
    Some(text.trim().to_string())
}

/// Listing rows from the embedded `__NEXT_DATA__` payload.
fn listing_rows(body: &str) -> Result<Vec<Value>, ParseError> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("script#__NEXT_DATA__").unwrap();
    let script = document
        .select(&selector)
        .next()
        .ok_or(ParseError::MissingDataBlock)?;
    let data: Value = serde_json::from_str(&script.inner_html())?;
    data.pointer("/props/pageProps/regularListingsFormatted")
        .and_then(Value::as_array)
        .cloned()
        .ok_or(ParseError::MissingDataBlock)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZooplaRow {
    listing_id: RawId,
    price: String,
    listing_uris: ListingUris,
    #[serde(default)]
    features: Vec<RowFeature>,
    #[serde(default)]
    summary_description: Option<String>,
    #[serde(default)]
    property_type: Option<String>,
    #[serde(default)]
    featured_type: Option<Value>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    location: Option<RowLocation>,
    #[serde(default)]
    branch: Option<RowBranch>,
    #[serde(default)]
    published_on: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct ListingUris {
    detail: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowFeature {
    icon_id: String,
    content: Value,
}

#[derive(Deserialize)]
struct RowLocation {
    #[serde(default)]
    coordinates: Option<Coordinates>,
}

#[derive(Deserialize)]
struct Coordinates {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[derive(Deserialize)]
struct RowBranch {
    #[serde(default)]
    name: Option<String>,
}

fn parse_row(value: Value, kind: TransactionKind) -> Result<ListingRecord, ParseError> {
    let row: ZooplaRow =
        serde_json::from_value(value).map_err(|e| ParseError::Row(e.to_string()))?;

    let (price, currency_symbol, rent_frequency) = parse_price(&row.price, kind)?;
    let coordinates = row.location.as_ref().and_then(|l| l.coordinates.as_ref());

    Ok(ListingRecord {
        property_id: row.listing_id.into_string(),
        transaction_type: kind,
        bedrooms: feature_count(&row.features, "bed"),
        bathrooms: feature_count(&row.features, "bath"),
        description: row.summary_description.unwrap_or_default(),
        property_subtype: row.property_type,
        featured: Some(row.featured_type.map_or(false, |v| !v.is_null())),
        price,
        currency_symbol,
        rent_frequency,
        display_address: row.address,
        latitude: coordinates.and_then(|c| c.latitude),
        longitude: coordinates.and_then(|c| c.longitude),
        agent_name: row.branch.and_then(|b| b.name),
        listing_url: format!("{BASE_URL}/{}", row.listing_uris.detail.trim_start_matches('/')),
        listing_source: ListingSource::Zoopla,
        first_visible_date: row.published_on.as_deref().and_then(parse_listing_date),
        commercial: None,
        development: None,
        residential: None,
        students: None,
        display_size: None,
        short_description: row.title,
    })
}

/// Bedroom/bathroom totals ride in an icon-keyed feature list; a missing
/// icon means unknown, never zero.
fn feature_count(features: &[RowFeature], icon: &str) -> Option<u32> {
    let content = &features.iter().find(|f| f.icon_id == icon)?.content;
    match content {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Same price shape as OnTheMarket: amount from the digits, currency from
/// the first character, frequency from the second token for rentals. A
/// malformed rental price degrades the frequency to unknown instead of
/// dropping the record.
fn parse_price(
    raw: &str,
    kind: TransactionKind,
) -> Result<(f64, String, Option<String>), ParseError> {
    let mut tokens = raw.split_whitespace();
    let price_text = match kind {
        TransactionKind::Buy => raw,
        TransactionKind::Rent => tokens.next().unwrap_or(raw),
    };
    let amount = decimal_amount(price_text)
        .ok_or_else(|| ParseError::Row(format!("unparseable price {raw:?}")))?;
    let symbol = raw.chars().next().map(String::from).unwrap_or_default();
    let frequency = match kind {
        TransactionKind::Buy => None,
        TransactionKind::Rent => tokens.next().map(str::to_string),
    };
    Ok((amount, symbol, frequency))
}
