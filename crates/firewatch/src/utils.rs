use crate::types::{AggregateResult, Rating};

/// Requested region ids, normalised: trimmed, lowercased, de-duplicated with
/// the first occurrence kept in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSelection {
    ids: Vec<String>,
}

impl RegionSelection {
    /// Parses a comma-separated list such as `"central-fire-district, mallee-fire-district"`.
    pub fn parse(raw: &str) -> Self {
        Self::from_ids(raw.split(','))
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selection = Self::default();
        for id in ids {
            let id = id.as_ref().trim().to_lowercase();
            if !id.is_empty() && !selection.ids.contains(&id) {
                selection.ids.push(id);
            }
        }
        selection
    }

    /// Falls back to `default_region` when nothing was requested.
    pub fn or_default(mut self, default_region: &str) -> Self {
        if self.ids.is_empty() {
            self.ids.push(default_region.trim().to_lowercase());
        }
        self
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<String> {
        self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug)]
pub struct ForecastStats {
    pub live: usize,
    pub fallback: usize,
    pub total_fire_bans: usize,
    pub highest: Option<Rating>,
}

impl ForecastStats {
    pub fn from_aggregate(result: &AggregateResult) -> ForecastStats {
        let forecasts = result.by_region.values();
        ForecastStats {
            live: result.usable_count(),
            fallback: forecasts.clone().filter(|f| f.is_fallback()).count(),
            total_fire_bans: forecasts.clone().filter(|f| f.current_tfb).count(),
            highest: forecasts
                .filter(|f| !f.is_fallback())
                .map(|f| f.current_rating)
                .max(),
        }
    }
}

impl std::fmt::Display for ForecastStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nSummary:")?;
        writeln!(f, "  Live regions:        {}", self.live)?;
        writeln!(f, "  Unavailable regions: {}", self.fallback)?;
        writeln!(f, "  Total Fire Bans:     {}", self.total_fire_bans)?;
        match self.highest {
            Some(rating) => writeln!(f, "  Highest rating:      {}", rating),
            None => writeln!(f, "  Highest rating:      n/a"),
        }
    }
}
