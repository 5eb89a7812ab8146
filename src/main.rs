use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn, Level};

use property_scout::observe::{ErrorSink, TracingSink};
use property_scout::pipeline;
use property_scout::regions;
use property_scout::scrapers::{
    ChromeRenderer, OnTheMarketScraper, RightmoveScraper, ScrapeConfig, SourceScraper,
    ZooplaScraper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("🏠 Property Scout - London listings refresh");
    info!("============================================");

    let sink: Arc<dyn ErrorSink> = Arc::new(TracingSink);
    let config = ScrapeConfig::default();

    let mut scrapers: Vec<Arc<dyn SourceScraper>> = vec![
        Arc::new(OnTheMarketScraper::new(
            &config,
            regions_for("OTM_REGIONS", regions::onthemarket_regions())?,
            sink.clone(),
        )?),
        Arc::new(RightmoveScraper::new(
            &config,
            regions_for("RIGHTMOVE_REGIONS", regions::rightmove_regions())?,
            sink.clone(),
        )?),
    ];

    // Zoopla needs a local Chrome; skip the source rather than fail the run
    match ChromeRenderer::new() {
        Ok(renderer) => {
            scrapers.push(Arc::new(ZooplaScraper::new(Arc::new(renderer), sink.clone())));
        }
        Err(err) => warn!("Skipping Zoopla, browser unavailable: {err:#}"),
    }

    let started = Instant::now();
    let listings = pipeline::run(scrapers).await;
    info!(
        "✅ Collected {} listings in {:.2?}",
        listings.len(),
        started.elapsed()
    );

    let json = serde_json::to_string_pretty(&listings)?;
    tokio::fs::write("london_listings.json", json).await?;
    info!("💾 Saved listings to london_listings.json");

    Ok(())
}

/// Region list for one source: a newline-delimited file named by the
/// environment variable when set, the built-in London list otherwise.
fn regions_for(env_var: &str, fallback: Vec<String>) -> anyhow::Result<Vec<String>> {
    match std::env::var(env_var) {
        Ok(path) => regions::regions_from_file(Path::new(&path)),
        Err(_) => Ok(fallback),
    }
}
