use std::collections::BTreeMap;
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Number of days every region forecast carries, today included.
pub const FORECAST_DAYS: usize = 4;

#[derive(Debug, thiserror::Error)]
#[error(
    "Invalid rating '{0}'. Accepted values: 'no rating', 'low-moderate', 'moderate', 'high', 'extreme', 'catastrophic', 'error'"
)]
pub struct RatingParseError(String);

/// Fire danger rating, ordered by severity.
///
/// `Error` sorts below everything else: it means the rating could not be
/// loaded, not that the danger is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "NO RATING")]
    NoRating,
    #[serde(rename = "LOW-MODERATE")]
    LowModerate,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "EXTREME")]
    Extreme,
    #[serde(rename = "CATASTROPHIC")]
    Catastrophic,
}

impl Rating {
    pub const ALL: [Rating; 7] = [
        Rating::Error,
        Rating::NoRating,
        Rating::LowModerate,
        Rating::Moderate,
        Rating::High,
        Rating::Extreme,
        Rating::Catastrophic,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Rating::Error => "ERROR",
            Rating::NoRating => "NO RATING",
            Rating::LowModerate => "LOW-MODERATE",
            Rating::Moderate => "MODERATE",
            Rating::High => "HIGH",
            Rating::Extreme => "EXTREME",
            Rating::Catastrophic => "CATASTROPHIC",
        }
    }

    /// Class name used by renderers to pick the rating colour.
    pub fn css_class(&self) -> &'static str {
        match self {
            Rating::Error => "error",
            Rating::NoRating => "no-rating",
            Rating::LowModerate => "low-moderate",
            Rating::Moderate => "moderate",
            Rating::High => "high",
            Rating::Extreme => "extreme",
            Rating::Catastrophic => "catastrophic",
        }
    }

    pub fn is_rated(&self) -> bool {
        !matches!(self, Rating::Error | Rating::NoRating)
    }
}

impl FromStr for Rating {
    type Err = RatingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join("-");

        match normalized.as_str() {
            "no-rating" => Ok(Rating::NoRating),
            "low-moderate" => Ok(Rating::LowModerate),
            "moderate" => Ok(Rating::Moderate),
            "high" => Ok(Rating::High),
            "extreme" => Ok(Rating::Extreme),
            "catastrophic" => Ok(Rating::Catastrophic),
            "error" | "error-loading" => Ok(Rating::Error),
            _ => Err(RatingParseError(s.to_string())),
        }
    }
}

impl Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// One raw entry of a district feed, before extraction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub day_label: String,
    pub date: NaiveDate,
    pub rating: Rating,
    pub total_fire_ban: bool,
}

impl Display for ForecastDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<28} {}  {:<13}",
            self.day_label,
            self.date.format("%a %d %b"),
            self.rating
        )?;
        if self.total_fire_ban {
            write!(f, " TOTAL FIRE BAN")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastStatus {
    Live,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionForecast {
    pub region_id: String,
    pub region_name: String,
    pub current_rating: Rating,
    pub current_tfb: bool,
    pub forecast: [ForecastDay; FORECAST_DAYS],
    pub source_address: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub status: ForecastStatus,
    pub fallback_reason: Option<String>,
}

impl RegionForecast {
    pub fn is_fallback(&self) -> bool {
        self.status == ForecastStatus::Fallback
    }
}

impl Display for RegionForecast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "┌─ {} ─ {}", self.region_name, self.current_rating)?;
        if self.current_tfb {
            writeln!(f, "│  Today is a day of Total Fire Ban")?;
        }
        if let Some(reason) = &self.fallback_reason {
            writeln!(f, "│  Data unavailable: {}", reason)?;
        }
        if let Some(source) = &self.source_address {
            writeln!(f, "│  Source: {}", source)?;
        }
        writeln!(f, "└─ fetched {}", self.fetched_at.format("%Y-%m-%d %H:%M UTC"))?;
        for day in &self.forecast {
            writeln!(f, "   {}", day)?;
        }
        Ok(())
    }
}

/// Result of one multi-region request.
///
/// `regions` keeps the request order; `by_region` is keyed by region id and
/// holds a live or fallback forecast for every requested id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub regions: Vec<String>,
    pub by_region: BTreeMap<String, RegionForecast>,
    pub fetched_at: DateTime<Utc>,
    pub next_scheduled_update: DateTime<Utc>,
}

impl AggregateResult {
    pub fn get(&self, region_id: &str) -> Option<&RegionForecast> {
        self.by_region.get(region_id)
    }

    /// Forecasts in request order, skipping any id with no entry.
    pub fn ordered(&self) -> impl Iterator<Item = &RegionForecast> {
        self.regions.iter().filter_map(|id| self.by_region.get(id))
    }

    pub fn usable_count(&self) -> usize {
        self.by_region.values().filter(|f| !f.is_fallback()).count()
    }

    /// True when no requested region produced live data.
    pub fn is_unavailable(&self) -> bool {
        self.usable_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_severity_order() {
        assert!(Rating::Catastrophic > Rating::Extreme);
        assert!(Rating::Extreme > Rating::High);
        assert!(Rating::High > Rating::Moderate);
        assert!(Rating::Moderate > Rating::LowModerate);
        assert!(Rating::LowModerate > Rating::NoRating);
        assert!(Rating::NoRating > Rating::Error);
    }

    #[test]
    fn test_rating_from_str_accepts_labels_and_classes() {
        for rating in Rating::ALL {
            assert_eq!(rating.label().parse::<Rating>().unwrap(), rating);
            assert_eq!(rating.css_class().parse::<Rating>().unwrap(), rating);
        }
        assert_eq!("Low Moderate".parse::<Rating>().unwrap(), Rating::LowModerate);
        assert_eq!("ERROR LOADING".parse::<Rating>().unwrap(), Rating::Error);
        assert!("severe".parse::<Rating>().is_err());
    }

    #[test]
    fn test_rating_serializes_as_label() {
        let json = serde_json::to_string(&Rating::LowModerate).unwrap();
        assert_eq!(json, "\"LOW-MODERATE\"");
        let parsed: Rating = serde_json::from_str("\"NO RATING\"").unwrap();
        assert_eq!(parsed, Rating::NoRating);
    }
}
