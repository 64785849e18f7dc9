//! Static registry of CFA fire districts and the feed addresses serving them.

use std::sync::LazyLock;

use serde::Serialize;

use crate::scraper::FetchError;

pub(crate) const RSS_BASE_URL: &str = "https://www.cfa.vic.gov.au/cfa/rssfeed/";
pub(crate) const PAGE_BASE_URL: &str = "https://www.cfa.vic.gov.au/warnings-restrictions/fire-bans-ratings-and-restrictions/total-fire-bans-fire-danger-ratings/";

const DISTRICT_SUFFIX: &str = " fire district";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub feed_address: String,
    pub page_address: String,
}

impl Region {
    fn new(id: &str, name: &str, feed_file: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            feed_address: format!("{RSS_BASE_URL}{feed_file}"),
            page_address: format!("{PAGE_BASE_URL}{id}"),
        }
    }

    /// Display name without the generic " Fire District" suffix,
    /// e.g. "North Central".
    pub fn short_name(&self) -> &str {
        let lower = self.name.to_lowercase();
        match lower.strip_suffix(DISTRICT_SUFFIX) {
            Some(stem) => self.name[..stem.len()].trim(),
            None => self.name.trim(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<Region>,
}

static CFA_DISTRICTS: LazyLock<RegionRegistry> = LazyLock::new(|| {
    RegionRegistry::new(vec![
        Region::new(
            "central-fire-district",
            "Central Fire District",
            "central-firedistrict_rss.xml",
        ),
        Region::new(
            "mallee-fire-district",
            "Mallee Fire District",
            "mallee-firedistrict_rss.xml",
        ),
        Region::new(
            "north-central-fire-district",
            "North Central Fire District",
            "northcentral-firedistrict_rss.xml",
        ),
        Region::new(
            "north-east-fire-district",
            "North East Fire District",
            "northeast-firedistrict_rss.xml",
        ),
        Region::new(
            "northern-country-fire-district",
            "Northern Country Fire District",
            "northerncountry-firedistrict_rss.xml",
        ),
        Region::new(
            "south-west-fire-district",
            "South West Fire District",
            "southwest-firedistrict_rss.xml",
        ),
        Region::new(
            "west-and-south-gippsland-fire-district",
            "West and South Gippsland Fire District",
            "westandsouthgippsland-firedistrict_rss.xml",
        ),
        Region::new(
            "wimmera-fire-district",
            "Wimmera Fire District",
            "wimmera-firedistrict_rss.xml",
        ),
        Region::new(
            "east-gippsland-fire-district",
            "East Gippsland Fire District",
            "eastgippsland-firedistrict_rss.xml",
        ),
    ])
});

impl RegionRegistry {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// The nine CFA districts that publish RSS forecasts.
    pub fn cfa() -> &'static RegionRegistry {
        &CFA_DISTRICTS
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Resolves a region id to its registry entry. Unknown ids fail closed.
    pub fn locate(&self, id: &str) -> Result<&Region, FetchError> {
        self.get(id)
            .ok_or_else(|| FetchError::UnknownRegion(id.to_string()))
    }

    /// Words that, placed directly before `region`'s short name, turn it into
    /// another district's name ("North" before "Central").
    ///
    /// Empty when the short name is not contained in any other district name.
    pub fn ambiguous_qualifiers(&self, region: &Region) -> Vec<String> {
        let short = region.short_name().to_lowercase();
        let mut qualifiers = Vec::new();

        for other in self.regions.iter().filter(|r| r.id != region.id) {
            let other_short = other.short_name().to_lowercase();
            let words: Vec<&str> = other_short.split_whitespace().collect();
            let target: Vec<&str> = short.split_whitespace().collect();
            if target.is_empty() || words.len() <= target.len() {
                continue;
            }

            for start in 1..=(words.len() - target.len()) {
                if words[start..start + target.len()] == target[..] {
                    let qualifier = words[start - 1].to_string();
                    if !qualifiers.contains(&qualifier) {
                        qualifiers.push(qualifier);
                    }
                }
            }
        }

        qualifiers
    }

    /// Short names of every district, lowercase, longest first so callers
    /// scanning text match "north central" before "central".
    pub fn short_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .regions
            .iter()
            .map(|r| r.short_name().to_lowercase())
            .collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        names
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::cfa().clone()
    }
}
