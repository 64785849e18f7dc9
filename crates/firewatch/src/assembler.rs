//! Turns one district feed into a fixed four-day [`RegionForecast`].

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::AUTHORITY_TZ;
use crate::extract::{FireBanExtractor, extract_rating};
use crate::parser::{FeedParser, ParseError, normalize_whitespace, parse_date_from_title};
use crate::regions::Region;
use crate::scraper::FetchError;
use crate::types::{FORECAST_DAYS, FeedItem, ForecastDay, ForecastStatus, Rating, RegionForecast};

/// Title words marking an administrative listing rather than a daily forecast.
const ADMIN_TITLE_WORDS: [&str; 2] = ["municipality", "restrictions"];

/// Hours (authority local time) at which the authority republishes ratings.
const UPDATE_HOURS: [u32; 2] = [6, 18];

pub const UNKNOWN_REGION_NAME: &str = "Unknown";

/// Why a region could not be assembled from live data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl AssemblyError {
    /// Unknown regions carry no rating at all; every other failure is shown
    /// as an error so it is not mistaken for a quiet day.
    pub fn fallback_rating(&self) -> Rating {
        match self {
            AssemblyError::Fetch(FetchError::UnknownRegion(_)) => Rating::NoRating,
            _ => Rating::Error,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForecastAssembler {
    fire_ban: FireBanExtractor,
}

impl ForecastAssembler {
    pub fn new(fire_ban: FireBanExtractor) -> Self {
        Self { fire_ban }
    }

    /// Assembles `region`'s forecast, returning the fallback forecast when the
    /// feed cannot be parsed. Never fails.
    pub fn assemble_at(
        &self,
        feed: &[u8],
        parser: &dyn FeedParser,
        region: &Region,
        source_address: &str,
        now: DateTime<Utc>,
    ) -> RegionForecast {
        match self.try_assemble_at(feed, parser, region, source_address, now) {
            Ok(forecast) => forecast,
            Err(e) => {
                log::warn!("Could not assemble {}: {e}", region.id);
                self.fallback_at(&region.id, Some(region), &AssemblyError::Parse(e), now)
            }
        }
    }

    pub fn try_assemble_at(
        &self,
        feed: &[u8],
        parser: &dyn FeedParser,
        region: &Region,
        source_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RegionForecast, ParseError> {
        let items = parser.parse(feed)?;
        let today = local_today(now);

        let mut days: Vec<ForecastDay> = items
            .iter()
            .filter(|item| !is_admin_item(item))
            .take(FORECAST_DAYS)
            .enumerate()
            .map(|(index, item)| self.forecast_day(index, item, region, today))
            .collect();

        if days.len() < FORECAST_DAYS {
            log::debug!(
                "{} has {} forecast items, padding to {FORECAST_DAYS}",
                region.id,
                days.len()
            );
        }
        for index in days.len()..FORECAST_DAYS {
            days.push(ForecastDay {
                day_label: format!("Day {}", index + 1),
                date: offset_days(today, index),
                rating: Rating::NoRating,
                total_fire_ban: false,
            });
        }

        let forecast = into_forecast_days(days);
        Ok(RegionForecast {
            region_id: region.id.clone(),
            region_name: region.name.clone(),
            current_rating: forecast[0].rating,
            current_tfb: forecast[0].total_fire_ban,
            forecast,
            source_address: Some(source_address.to_string()),
            fetched_at: now,
            next_update: next_update_after(now),
            status: ForecastStatus::Live,
            fallback_reason: None,
        })
    }

    /// Structurally complete forecast for a region that could not be read.
    pub fn fallback_at(
        &self,
        region_id: &str,
        region: Option<&Region>,
        error: &AssemblyError,
        now: DateTime<Utc>,
    ) -> RegionForecast {
        let today = local_today(now);
        let rating = error.fallback_rating();

        let days = (0..FORECAST_DAYS)
            .map(|index| {
                let date = offset_days(today, index);
                ForecastDay {
                    day_label: day_label(index, date),
                    date,
                    rating,
                    total_fire_ban: false,
                }
            })
            .collect();

        RegionForecast {
            region_id: region_id.to_string(),
            region_name: region
                .map(|r| r.name.clone())
                .unwrap_or_else(|| UNKNOWN_REGION_NAME.to_string()),
            current_rating: rating,
            current_tfb: false,
            forecast: into_forecast_days(days),
            source_address: region.map(|r| r.feed_address.clone()),
            fetched_at: now,
            next_update: next_update_after(now),
            status: ForecastStatus::Fallback,
            fallback_reason: Some(error.to_string()),
        }
    }

    fn forecast_day(
        &self,
        index: usize,
        item: &FeedItem,
        region: &Region,
        today: NaiveDate,
    ) -> ForecastDay {
        let date = parse_date_from_title(&item.title).unwrap_or_else(|_| offset_days(today, index));

        let label = match index {
            0 | 1 => day_label(index, date),
            _ => {
                let title = normalize_whitespace(&item.title);
                if title.is_empty() { day_label(index, date) } else { title }
            }
        };

        // Only today's ban status is checked against the district name.
        let region_id = (index == 0).then_some(region.id.as_str());

        ForecastDay {
            day_label: label,
            date,
            rating: extract_rating(&item.description),
            total_fire_ban: self.fire_ban.extract(&item.description, region_id),
        }
    }
}

/// Next 6AM or 6PM in the authority's timezone after `now`.
pub fn next_update_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&AUTHORITY_TZ);
    let today = local.date_naive();

    let next = UPDATE_HOURS
        .iter()
        .find(|&&hour| local.hour() < hour)
        .map(|&hour| (today, hour))
        .unwrap_or((offset_days(today, 1), UPDATE_HOURS[0]));

    NaiveTime::from_hms_opt(next.1, 0, 0)
        .map(|time| next.0.and_time(time))
        .and_then(|naive| AUTHORITY_TZ.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(12))
}

/// Today's calendar date in the authority's timezone.
pub fn local_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&AUTHORITY_TZ).date_naive()
}

fn is_admin_item(item: &FeedItem) -> bool {
    let title = item.title.to_lowercase();
    ADMIN_TITLE_WORDS.iter().any(|word| title.contains(word))
}

fn day_label(index: usize, date: NaiveDate) -> String {
    match index {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        _ => date.format("%A").to_string(),
    }
}

fn offset_days(date: NaiveDate, days: usize) -> NaiveDate {
    date.checked_add_days(Days::new(days as u64)).unwrap_or(date)
}

fn into_forecast_days(days: Vec<ForecastDay>) -> [ForecastDay; FORECAST_DAYS] {
    let mut days = days.into_iter();
    std::array::from_fn(|_| days.next().unwrap_or_else(empty_day))
}

fn empty_day() -> ForecastDay {
    ForecastDay {
        day_label: String::new(),
        date: NaiveDate::default(),
        rating: Rating::NoRating,
        total_fire_ban: false,
    }
}
