pub mod browser;
pub mod onthemarket;
pub mod rightmove;
pub mod traits;
pub mod types;
pub mod zoopla;

pub use browser::{ChromeRenderer, PageRenderer};
pub use onthemarket::OnTheMarketScraper;
pub use rightmove::RightmoveScraper;
pub use traits::SourceScraper;
pub use types::ScrapeConfig;
pub use zoopla::ZooplaScraper;
