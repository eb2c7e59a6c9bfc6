pub mod config;
pub mod detail;
pub mod export;
pub mod input;
pub mod listing;
pub mod navigation;
pub mod parser;
pub mod pipeline;
pub mod scraper;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::{ClientSettings, InputColumns, MissingCityPolicy, ScrapeConfig};
pub use pipeline::{Pipeline, RunError, UnitError};
pub use scraper::{HttpConnector, WebScraper};

pub(crate) const BASE_URL: &str = "https://www.consultaescolas.pr.gov.br/consultaescolas-java";
