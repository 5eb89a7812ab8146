use std::path::Path;

use anyhow::{Context, Result};

/// London postal outcodes used for OnTheMarket searches.
const LONDON_OUTCODES: &[&str] = &[
    "E1", "E2", "E3", "E5", "E8", "E9", "E14", "E17", "EC1A", "EC1M", "EC1V",
    "EC2A", "EC2M", "EC3A", "EC4A", "N1", "N4", "N5", "N7", "N16", "N19",
    "NW1", "NW3", "NW5", "NW6", "NW8", "SE1", "SE5", "SE8", "SE11", "SE15",
    "SE16", "SW1A", "SW3", "SW4", "SW6", "SW8", "SW11", "W1D", "W2", "W6",
    "W9", "W11", "W14", "WC1A", "WC2E",
];

/// Rightmove location identifiers for the same areas. Rightmove keys its
/// searches on internal outcode ids rather than postal codes.
const RIGHTMOVE_OUTCODES: &[&str] = &[
    "OUTCODE^747", "OUTCODE^750", "OUTCODE^753", "OUTCODE^755", "OUTCODE^758",
    "OUTCODE^759", "OUTCODE^761", "OUTCODE^764", "OUTCODE^768", "OUTCODE^772",
    "OUTCODE^776", "OUTCODE^779", "OUTCODE^781", "OUTCODE^785", "OUTCODE^788",
    "OUTCODE^791", "OUTCODE^1666", "OUTCODE^1670", "OUTCODE^1673",
    "OUTCODE^1677", "OUTCODE^1681", "OUTCODE^1685", "OUTCODE^1813",
    "OUTCODE^1817", "OUTCODE^1821", "OUTCODE^1825", "OUTCODE^1829",
    "OUTCODE^2264", "OUTCODE^2268", "OUTCODE^2272", "OUTCODE^2276",
    "OUTCODE^2280", "OUTCODE^2345", "OUTCODE^2349", "OUTCODE^2353",
    "OUTCODE^2357", "OUTCODE^2361", "OUTCODE^2365", "OUTCODE^2810",
    "OUTCODE^2814", "OUTCODE^2818", "OUTCODE^2822",
];

/// Outcodes for which OnTheMarket never returns results.
const ONTHEMARKET_EXCLUDED: &[&str] = &[
    "EC1P", "EC3P", "EC2P", "UB18", "E77", "E98", "SW99", "SW95", "EC4P", "W1A",
];

/// Search regions for OnTheMarket: lowercased outcodes with the known dead
/// outcodes filtered out.
pub fn onthemarket_regions() -> Vec<String> {
    LONDON_OUTCODES
        .iter()
        .filter(|oc| !ONTHEMARKET_EXCLUDED.contains(oc))
        .map(|oc| oc.to_lowercase())
        .collect()
}

/// Search regions for Rightmove: opaque location identifiers.
pub fn rightmove_regions() -> Vec<String> {
    RIGHTMOVE_OUTCODES.iter().map(|oc| oc.to_string()).collect()
}

/// Load a region list from a newline-delimited file, one region per line.
/// Blank lines and `#` comments are skipped.
pub fn regions_from_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read region list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_outcodes_never_reach_onthemarket() {
        let regions = onthemarket_regions();
        for dead in ONTHEMARKET_EXCLUDED {
            assert!(!regions.contains(&dead.to_lowercase()));
        }
        assert!(regions.contains(&"e1".to_string()));
    }

    #[test]
    fn region_file_skips_blanks_and_comments() {
        let dir = std::env::temp_dir().join("property-scout-regions-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("regions.txt");
        std::fs::write(&path, "e1\n\n# comment\ne2\n").unwrap();

        let regions = regions_from_file(&path).unwrap();
        assert_eq!(regions, vec!["e1".to_string(), "e2".to_string()]);
    }
}
