pub mod fetch;
pub mod models;
pub mod observe;
pub mod pipeline;
pub mod regions;
pub mod scrapers;
