//! Rating and Total Fire Ban extraction from a single feed item's text.
//!
//! Both extractors are pure: the same text (and region) always yields the
//! same answer, and neither can fail. Item descriptions arrive as HTML,
//! sometimes escaped a second time, so they are decoded before matching.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use crate::config::DEFAULT_QUALIFIERS;
use crate::parser::normalize_whitespace;
use crate::regions::{Region, RegionRegistry};
use crate::types::Rating;

static RE_LABELLED_RATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i):\s*(no\s+rating|low[\s-]*moderate|moderate|high|extreme|catastrophic)\b")
        .expect("invalid regex: labelled rating")
});

// low-moderate sits before moderate so find_iter consumes it whole.
static RE_RATING_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(catastrophic|extreme|high|low[\s-]*moderate|moderate)\b")
        .expect("invalid regex: rating token")
});

static RE_FIRST_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").expect("invalid regex: first paragraph")
});

static RE_LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|\r?\n").expect("invalid regex: line break")
});

static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid regex: markup tag"));

static RE_NEGATED_BAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bis\s+not\s+(?:currently\s+)?a\s+day\s+of\s+total\s+fire\s+ban\b")
        .expect("invalid regex: negated ban")
});

static RE_BAN_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btotal\s+fire\s+ban\b").expect("invalid regex: ban phrase")
});

static RE_DECLARED_BAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bday\s+of\s+total\s+fire\s+ban\b|\btotal\s+fire\s+ban\s+(?:is\s+)?in\s+force\b|\btotal\s+fire\s+ban\s+(?:has\s+been\s+)?declared\b",
    )
    .expect("invalid regex: declared ban")
});

static RE_ALL_DISTRICTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\ball\s+(?:fire\s+)?districts\b").expect("invalid regex: all districts")
});

static DEFAULT_EXTRACTOR: LazyLock<FireBanExtractor> = LazyLock::new(|| {
    FireBanExtractor::new(
        RegionRegistry::cfa().clone(),
        DEFAULT_QUALIFIERS.iter().map(|q| q.to_string()).collect(),
    )
});

/// Decodes entities once, undoing the second escaping some feeds apply to
/// their HTML descriptions. Text that does not unescape cleanly is kept as is.
pub(crate) fn decode_entities(raw: &str) -> String {
    let raw = raw.replace("&nbsp;", " ");
    match quick_xml::escape::unescape(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

/// Drops markup, decodes any remaining HTML entities and collapses whitespace.
pub(crate) fn clean_text(html: &str) -> String {
    let without_tags = RE_TAG.replace_all(html, " ");
    let fragment = Html::parse_fragment(&without_tags);
    normalize_whitespace(&fragment.root_element().text().collect::<String>())
}

/// The first paragraph of `html`, or everything before the first line break
/// when the text has no paragraphs.
pub(crate) fn first_block(html: &str) -> &str {
    if let Some(caps) = RE_FIRST_PARAGRAPH.captures(html)
        && let Some(inner) = caps.get(1)
    {
        return inner.as_str();
    }

    RE_LINE_BREAK
        .split(html)
        .find(|segment| !segment.trim().is_empty())
        .unwrap_or("")
}

/// Reads the fire danger rating from an item's text.
///
/// The feed's own "Label: RATING" form wins. Failing that, the most severe
/// rating word anywhere in the text is taken, so boilerplate mentioning a
/// milder rating cannot downgrade a severe one.
pub fn extract_rating(item_text: &str) -> Rating {
    let text = clean_text(&decode_entities(item_text));

    if let Some(caps) = RE_LABELLED_RATING.captures(&text)
        && let Ok(rating) = caps[1].parse::<Rating>()
    {
        return rating;
    }

    RE_RATING_TOKEN
        .find_iter(&text)
        .filter_map(|m| m.as_str().parse::<Rating>().ok())
        .max()
        .unwrap_or(Rating::NoRating)
}

/// Reads the Total Fire Ban flag using the CFA district registry.
///
/// With `region_id` the ban must name that district (or all districts);
/// without it any declared-ban phrase counts.
pub fn extract_tfb(item_text: &str, region_id: Option<&str>) -> bool {
    DEFAULT_EXTRACTOR.extract(item_text, region_id)
}

#[derive(Debug, Clone)]
pub struct FireBanExtractor {
    registry: RegionRegistry,
    qualifiers: Vec<String>,
}

impl FireBanExtractor {
    /// `qualifiers` are directional words ("North", "South", ...) that turn a
    /// district's short name into another district's name when they precede it.
    pub fn new(registry: RegionRegistry, qualifiers: Vec<String>) -> Self {
        Self {
            registry,
            qualifiers: qualifiers.iter().map(|q| q.trim().to_lowercase()).collect(),
        }
    }

    pub fn extract(&self, item_text: &str, region_id: Option<&str>) -> bool {
        let decoded = decode_entities(item_text);
        let text = clean_text(first_block(&decoded)).to_lowercase();

        if RE_NEGATED_BAN.is_match(&text) {
            return false;
        }

        if let Some(region) = region_id.and_then(|id| self.registry.get(id))
            && RE_BAN_PHRASE.is_match(&text)
        {
            if self.mentions_region(&text, region) {
                return true;
            }
            if RE_ALL_DISTRICTS.is_match(&text) {
                return true;
            }
            if self.mentions_any_region(&text) {
                log::debug!("Total Fire Ban text names another district than {}", region.id);
                return false;
            }
        }

        RE_DECLARED_BAN.is_match(&text)
    }

    fn qualifiers_for(&self, region: &Region) -> Vec<String> {
        let mut qualifiers = self.registry.ambiguous_qualifiers(region);
        if qualifiers.is_empty() {
            return qualifiers;
        }
        for q in &self.qualifiers {
            if !qualifiers.contains(q) {
                qualifiers.push(q.clone());
            }
        }
        qualifiers
    }

    /// Whole-word match of the region's short name that is not part of a
    /// longer district name ("central" but not "north central").
    fn mentions_region(&self, text: &str, region: &Region) -> bool {
        let short = region.short_name().to_lowercase();
        let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(&short))) else {
            return false;
        };
        let qualifiers = self.qualifiers_for(region);

        re.find_iter(text).any(|m| {
            let preceding = text[..m.start()]
                .trim_end()
                .rsplit(|c: char| c.is_whitespace())
                .next()
                .unwrap_or("")
                .trim_matches(|c: char| !c.is_alphanumeric());
            !qualifiers.iter().any(|q| q == preceding)
        })
    }

    fn mentions_any_region(&self, text: &str) -> bool {
        self.registry.short_names().iter().any(|name| {
            Regex::new(&format!(r"\b{}\b", regex::escape(name)))
                .is_ok_and(|re| re.is_match(text))
        })
    }
}

impl Default for FireBanExtractor {
    fn default() -> Self {
        DEFAULT_EXTRACTOR.clone()
    }
}
