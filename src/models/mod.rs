use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Source site of a property listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListingSource {
    OnTheMarket,
    Rightmove,
    Zoopla,
}

impl ListingSource {
    pub fn name(&self) -> &'static str {
        match self {
            ListingSource::OnTheMarket => "OnTheMarket",
            ListingSource::Rightmove => "Rightmove",
            ListingSource::Zoopla => "Zoopla",
        }
    }
}

/// Whether a listing is for sale or to let
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionKind {
    Buy,
    Rent,
}

/// Canonical listing data model shared by all sources.
///
/// Constructed once per parsed row and immutable afterwards. Optional fields
/// are `None` when the source does not expose them; a missing boolean is
/// never coerced to `false` and a missing count never to zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub property_id: String,
    pub transaction_type: TransactionKind,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub description: String,
    pub property_subtype: Option<String>,
    pub featured: Option<bool>,
    pub price: f64,
    pub currency_symbol: String,
    pub rent_frequency: Option<String>,
    pub display_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub agent_name: Option<String>,
    pub listing_url: String,
    pub listing_source: ListingSource,
    /// For OnTheMarket this is the scrape date; the site does not expose a
    /// true first-visible date. Rightmove and Zoopla report a real one.
    pub first_visible_date: Option<NaiveDate>,
    pub commercial: Option<bool>,
    pub development: Option<bool>,
    pub residential: Option<bool>,
    pub students: Option<bool>,
    pub display_size: Option<String>,
    pub short_description: Option<String>,
}

/// Parse a source-reported first-visible date.
///
/// Rightmove reports RFC 3339 timestamps, Zoopla a mix of timestamps and
/// plain dates. Unparseable input degrades to `None` rather than dropping
/// the record.
pub fn parse_listing_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_timestamps() {
        let date = parse_listing_date("2023-04-21T17:52:02Z").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 4, 21).unwrap());
    }

    #[test]
    fn parses_plain_dates() {
        let date = parse_listing_date("2023-04-20").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 4, 20).unwrap());
    }

    #[test]
    fn unparseable_date_is_unknown() {
        assert_eq!(parse_listing_date("yesterday"), None);
    }
}
