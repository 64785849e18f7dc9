//! Fire danger ratings and Total Fire Ban status for CFA fire districts.
//!
//! District feeds are fetched, parsed and reduced to a fixed four-day
//! [`RegionForecast`] per district. [`ForecastService`] fans requests out
//! across districts, caches the merged [`AggregateResult`] and keeps a log
//! of every fetch attempt.

pub mod assembler;
pub mod cache;
pub mod config;
pub mod extract;
pub mod fetch_log;
pub mod parser;
pub mod regions;
pub mod scraper;
pub mod service;
pub mod types;
pub mod utils;

pub use assembler::{ForecastAssembler, next_update_after};
pub use config::Config;
pub use extract::{FireBanExtractor, extract_rating, extract_tfb};
pub use fetch_log::{FetchLog, FetchLogRecord};
pub use parser::{FeedParser, HtmlPageParser, ParseError, RssParser};
pub use regions::{Region, RegionRegistry};
pub use scraper::{FeedFetcher, FetchError, WebScraper};
pub use service::ForecastService;
pub use types::{AggregateResult, ForecastDay, ForecastStatus, Rating, RegionForecast};

/// The authority's civil timezone, used for day labels and update times.
pub const AUTHORITY_TZ: chrono_tz::Tz = chrono_tz::Australia::Melbourne;
