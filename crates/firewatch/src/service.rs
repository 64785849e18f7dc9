//! Read and refresh triggers: cache lookup, multi-region fan-out and the
//! fetch log, wired together around one [`FeedFetcher`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::assembler::{AssemblyError, ForecastAssembler, next_update_after};
use crate::cache::{ForecastCache, fingerprint};
use crate::config::Config;
use crate::extract::FireBanExtractor;
use crate::fetch_log::{FetchLog, FetchLogRecord};
use crate::parser::{FeedParser, HtmlPageParser, RssParser};
use crate::regions::{Region, RegionRegistry};
use crate::scraper::{FeedFetcher, FetchError, WebScraper};
use crate::types::{AggregateResult, RegionForecast};
use crate::utils::RegionSelection;

pub struct ForecastService<F: FeedFetcher> {
    fetcher: F,
    config: Arc<Config>,
    registry: RegionRegistry,
    assembler: ForecastAssembler,
    cache: ForecastCache,
    log: FetchLog,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ForecastService<WebScraper> {
    /// Service backed by the HTTP client, using the configured timeout.
    pub fn from_config(config: Arc<Config>) -> Result<Self, FetchError> {
        let fetcher = WebScraper::new(config.fetch_timeout())?;
        Ok(Self::new(fetcher, config))
    }
}

impl<F: FeedFetcher> ForecastService<F> {
    pub fn new(fetcher: F, config: Arc<Config>) -> Self {
        let registry = RegionRegistry::cfa().clone();
        let fire_ban =
            FireBanExtractor::new(registry.clone(), config.directional_qualifiers.clone());

        Self {
            fetcher,
            log: FetchLog::from_config(&config),
            config,
            registry,
            assembler: ForecastAssembler::new(fire_ban),
            cache: ForecastCache::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn fetch_log(&self) -> &FetchLog {
        &self.log
    }

    /// Forecast for a comma-separated region list, served from cache when fresh.
    pub async fn forecast(&self, region_ids: &str) -> AggregateResult {
        let ids = self.select(region_ids);
        self.cached_or_assemble(ids).await
    }

    /// Drops the cached result for this region set, then reassembles it.
    pub async fn refresh(&self, region_ids: &str) -> AggregateResult {
        let ids = self.select(region_ids);
        let key = fingerprint(&ids);
        if self.cache.invalidate(&key) {
            log::info!("Invalidated cached forecast for {key}");
        }
        self.cached_or_assemble(ids).await
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.invalidate_all()
    }

    pub fn clear_log(&self) -> usize {
        self.log.clear()
    }

    pub fn recent_log(&self, n: usize) -> Vec<FetchLogRecord> {
        self.log.recent(n)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Assembles every region in `region_ids` without touching the cache.
    /// One entry per requested id, live or fallback.
    pub async fn assemble_many(&self, region_ids: &[String]) -> AggregateResult {
        let now = Utc::now();
        // Owned ids keep the per-region futures free of borrowed closure
        // arguments, so the whole future stays Send.
        let forecasts: Vec<RegionForecast> = stream::iter(region_ids.iter().cloned())
            .map(|id| async move { self.assemble_region(&id, now).await })
            .buffered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let result = AggregateResult {
            regions: region_ids.to_vec(),
            by_region: forecasts
                .into_iter()
                .map(|f| (f.region_id.clone(), f))
                .collect(),
            fetched_at: now,
            next_scheduled_update: next_update_after(now),
        };

        log::info!(
            "Assembled {} regions, {} live",
            result.regions.len(),
            result.usable_count()
        );
        result
    }

    fn select(&self, region_ids: &str) -> Vec<String> {
        RegionSelection::parse(region_ids)
            .or_default(&self.config.default_region)
            .into_ids()
    }

    async fn cached_or_assemble(&self, ids: Vec<String>) -> AggregateResult {
        let key = fingerprint(&ids);
        if let Some(mut hit) = self.cache.get(&key) {
            log::debug!("Cache hit for {key}");
            hit.regions = ids;
            return hit;
        }

        // One assembly per fingerprint; callers queued behind it re-check the cache.
        let gate = self.in_flight.entry(key.clone()).or_default().clone();
        let guard = gate.lock().await;

        let mut result = match self.cache.get(&key) {
            Some(hit) => hit,
            None => {
                let result = self.assemble_many(&ids).await;
                if result.is_unavailable() {
                    log::warn!("No live data for {key}, result not cached");
                } else {
                    let ttl = if ids.len() > 1 {
                        self.config.multi_region_cache_ttl()
                    } else {
                        self.config.cache_ttl()
                    };
                    self.cache.put(&key, result.clone(), ttl);
                }
                result
            }
        };

        drop(guard);
        drop(gate);
        self.in_flight
            .remove_if(&key, |_, gate| Arc::strong_count(gate) == 1);

        // The cached value carries the order of whoever filled it.
        result.regions = ids;
        result
    }

    async fn assemble_region(&self, region_id: &str, now: DateTime<Utc>) -> RegionForecast {
        let region = match self.registry.locate(region_id) {
            Ok(region) => region,
            Err(e) => {
                log::warn!("{e}");
                self.log
                    .record(FetchLogRecord::failure(region_id, None, e.to_string(), 0));
                return self.assembler.fallback_at(region_id, None, &e.into(), now);
            }
        };

        let error = match self
            .fetch_and_assemble(region, &region.feed_address, &RssParser, now)
            .await
        {
            Ok(forecast) => return forecast,
            Err(e) => e,
        };
        log::warn!("RSS feed unusable for {}: {error}", region.id);

        if self.config.html_fallback {
            match self
                .fetch_and_assemble(region, &region.page_address, &HtmlPageParser, now)
                .await
            {
                Ok(forecast) => {
                    log::info!("Using HTML page for {}", region.id);
                    return forecast;
                }
                Err(e) => log::warn!("HTML page unusable for {}: {e}", region.id),
            }
        }

        self.assembler.fallback_at(region_id, Some(region), &error, now)
    }

    async fn fetch_and_assemble(
        &self,
        region: &Region,
        address: &str,
        parser: &dyn FeedParser,
        now: DateTime<Utc>,
    ) -> Result<RegionForecast, AssemblyError> {
        let bytes = self.fetch_logged(region, address).await?;
        let forecast = self
            .assembler
            .try_assemble_at(&bytes, parser, region, address, now)?;
        Ok(forecast)
    }

    async fn fetch_logged(&self, region: &Region, address: &str) -> Result<Vec<u8>, FetchError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.fetch_timeout(), self.fetcher.fetch(address))
            .await
            .unwrap_or(Err(FetchError::Timeout));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(bytes) => {
                log::info!(
                    "Fetched {} ({} bytes in {elapsed_ms}ms)",
                    address,
                    bytes.len()
                );
                self.log.record(FetchLogRecord::success(
                    &region.id,
                    address,
                    bytes.len(),
                    elapsed_ms,
                ));
            }
            Err(e) => {
                log::error!("Fetch of {address} failed after {elapsed_ms}ms: {e}");
                self.log.record(FetchLogRecord::failure(
                    &region.id,
                    Some(address),
                    e.to_string(),
                    elapsed_ms,
                ));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForecastStatus, Rating};
    use std::collections::HashMap;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CENTRAL: &str = "central-fire-district";
    const NORTH_CENTRAL: &str = "north-central-fire-district";

    #[derive(Default)]
    struct StubFetcher {
        responses: HashMap<String, Result<Vec<u8>, FetchError>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl StubFetcher {
        fn with(mut self, address: &str, response: Result<Vec<u8>, FetchError>) -> Self {
            self.responses.insert(address.to_string(), response);
            self
        }

        fn with_fixture(self, region_id: &str, fixture: &str) -> Self {
            let address = RegionRegistry::cfa().get(region_id).unwrap().feed_address.clone();
            let bytes = fs::read(format!("fixtures/{fixture}")).expect("Failed to read fixture");
            self.with(&address, Ok(bytes))
        }
    }

    impl FeedFetcher for StubFetcher {
        async fn fetch(&self, address: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .get(address)
                .cloned()
                .unwrap_or(Err(FetchError::HttpStatus(404)))
        }
    }

    fn config() -> Arc<Config> {
        Arc::new(Config {
            html_fallback: false,
            ..Config::default()
        })
    }

    fn region(id: &str) -> &'static Region {
        RegionRegistry::cfa().get(id).unwrap()
    }

    #[tokio::test]
    async fn test_forecast_single_region() {
        let fetcher = StubFetcher::default().with_fixture(CENTRAL, "central_rss.xml");
        let service = ForecastService::new(fetcher, config());

        let result = service.forecast(CENTRAL).await;
        assert_eq!(result.regions, vec![CENTRAL.to_string()]);

        let central = result.get(CENTRAL).unwrap();
        assert_eq!(central.status, ForecastStatus::Live);
        assert_eq!(central.current_rating, Rating::High);
        assert_eq!(central.forecast.len(), 4);
        assert_eq!(result.usable_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_request_uses_default_region() {
        let fetcher = StubFetcher::default().with_fixture(NORTH_CENTRAL, "north_central_rss.xml");
        let service = ForecastService::new(fetcher, config());

        let result = service.forecast("  ").await;
        assert_eq!(result.regions, vec![NORTH_CENTRAL.to_string()]);
        assert!(result.get(NORTH_CENTRAL).unwrap().current_tfb);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_both_regions() {
        let fetcher = StubFetcher::default()
            .with_fixture(CENTRAL, "central_rss.xml")
            .with(&region(NORTH_CENTRAL).feed_address, Err(FetchError::Timeout));
        let service = ForecastService::new(fetcher, config());

        let result = service
            .forecast(&format!("{CENTRAL},{NORTH_CENTRAL}"))
            .await;

        assert_eq!(result.by_region.len(), 2);
        assert_eq!(result.get(CENTRAL).unwrap().status, ForecastStatus::Live);

        let failed = result.get(NORTH_CENTRAL).unwrap();
        assert!(failed.is_fallback());
        assert_eq!(failed.forecast.len(), 4);
        assert_eq!(failed.current_rating, Rating::Error);
        assert_eq!(failed.region_name, "North Central Fire District");

        let failures: Vec<_> = service
            .recent_log(10)
            .into_iter()
            .filter(|r| !r.success)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].region, NORTH_CENTRAL);
        assert_eq!(failures[0].message, "Request timed out");
    }

    #[tokio::test]
    async fn test_unknown_region_is_logged_and_falls_back() {
        let service = ForecastService::new(StubFetcher::default(), config());

        let result = service.forecast("not-a-real-region").await;
        assert_eq!(result.by_region.len(), 1);
        assert!(result.is_unavailable());

        let entry = result.get("not-a-real-region").unwrap();
        assert!(entry.is_fallback());
        assert_eq!(entry.region_name, "Unknown");
        assert_eq!(entry.current_rating, Rating::NoRating);

        let log = service.recent_log(10);
        assert_eq!(log.len(), 1);
        assert!(!log[0].success);
        assert_eq!(log[0].region, "not-a-real-region");
        assert_eq!(service.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let fetcher = StubFetcher::default().with_fixture(CENTRAL, "central_rss.xml");
        let service = ForecastService::new(fetcher, config());

        let first = service.forecast(CENTRAL).await;
        let second = service.forecast(" Central-Fire-District ").await;

        assert_eq!(first, second);
        assert_eq!(service.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_invalidates_before_reassembling() {
        let fetcher = StubFetcher::default().with_fixture(CENTRAL, "central_rss.xml");
        let service = ForecastService::new(fetcher, config());

        service.forecast(CENTRAL).await;
        service.refresh(CENTRAL).await;
        assert_eq!(service.fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_result_is_not_cached() {
        let fetcher = StubFetcher::default()
            .with(&region(CENTRAL).feed_address, Err(FetchError::EmptyBody));
        let service = ForecastService::new(fetcher, config());

        let result = service.forecast(CENTRAL).await;
        assert!(result.is_unavailable());
        assert_eq!(service.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_html_page_used_when_feed_fails() {
        let north_central = region(NORTH_CENTRAL);
        let page = fs::read("fixtures/north_central_page.html").expect("Failed to read fixture");
        let fetcher = StubFetcher::default()
            .with(&north_central.feed_address, Err(FetchError::HttpStatus(503)))
            .with(&north_central.page_address, Ok(page));
        let service = ForecastService::new(fetcher, Arc::new(Config::default()));

        let result = service.forecast(NORTH_CENTRAL).await;
        let forecast = result.get(NORTH_CENTRAL).unwrap();
        assert_eq!(forecast.status, ForecastStatus::Live);
        assert_eq!(forecast.current_rating, Rating::Extreme);
        assert_eq!(
            forecast.source_address.as_deref(),
            Some(north_central.page_address.as_str())
        );

        let log = service.recent_log(10);
        assert_eq!(log.len(), 2);
        assert!(log[0].success);
        assert!(!log[1].success);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_assembly() {
        let fetcher = StubFetcher {
            delay: Some(Duration::from_millis(50)),
            ..StubFetcher::default().with_fixture(CENTRAL, "central_rss.xml")
        };
        let service = ForecastService::new(fetcher, config());

        let (a, b, c) = tokio::join!(
            service.forecast(CENTRAL),
            service.forecast(CENTRAL),
            service.forecast(CENTRAL)
        );

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(service.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_and_log() {
        let fetcher = StubFetcher::default().with_fixture(CENTRAL, "central_rss.xml");
        let service = ForecastService::new(fetcher, config());
        service.forecast(CENTRAL).await;

        assert_eq!(service.clear_cache(), 1);
        assert_eq!(service.cache_len(), 0);
        assert_eq!(service.clear_log(), 1);
        assert!(service.recent_log(5).is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let fetcher = StubFetcher::default()
            .with_fixture(NORTH_CENTRAL, "north_central_rss.xml")
            .with_fixture(CENTRAL, "central_rss.xml");
        let service = ForecastService::new(fetcher, config());

        let result = service
            .forecast(&format!("{NORTH_CENTRAL},{CENTRAL}"))
            .await;
        let ordered: Vec<&str> = result.ordered().map(|f| f.region_id.as_str()).collect();
        assert_eq!(ordered, vec![NORTH_CENTRAL, CENTRAL]);
    }

    #[tokio::test]
    async fn test_cached_result_follows_each_request_order() {
        let fetcher = StubFetcher::default()
            .with_fixture(NORTH_CENTRAL, "north_central_rss.xml")
            .with_fixture(CENTRAL, "central_rss.xml");
        let service = ForecastService::new(fetcher, config());

        service.forecast(&format!("{CENTRAL},{NORTH_CENTRAL}")).await;
        let reversed = service
            .forecast(&format!("{NORTH_CENTRAL},{CENTRAL}"))
            .await;

        assert_eq!(service.fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            reversed.regions,
            vec![NORTH_CENTRAL.to_string(), CENTRAL.to_string()]
        );
        let ordered: Vec<&str> = reversed.ordered().map(|f| f.region_id.as_str()).collect();
        assert_eq!(ordered, vec![NORTH_CENTRAL, CENTRAL]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forecast_runs_on_spawned_task() {
        let fetcher = StubFetcher::default()
            .with_fixture(CENTRAL, "central_rss.xml")
            .with_fixture(NORTH_CENTRAL, "north_central_rss.xml");
        let service = Arc::new(ForecastService::new(fetcher, config()));

        let unknown = {
            let service = service.clone();
            tokio::spawn(async move { service.forecast("not-a-real-region").await })
        };
        let both = {
            let service = service.clone();
            tokio::spawn(async move { service.refresh(&format!("{CENTRAL},{NORTH_CENTRAL}")).await })
        };

        let unknown = unknown.await.unwrap();
        assert!(unknown.get("not-a-real-region").unwrap().is_fallback());

        let both = both.await.unwrap();
        assert_eq!(both.usable_count(), 2);
        assert_eq!(service.cache_len(), 1);
    }
}
