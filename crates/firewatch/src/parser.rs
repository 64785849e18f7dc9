use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use crate::types::FeedItem;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed feed XML: {0}")]
    Xml(String),
    #[error("Feed contained no items")]
    NoItems,
    #[error("Unusable HTML page: {0}")]
    Html(String),
    #[error("Failed to parse date: {0}")]
    DateParse(String),
}

/// Turns a fetched document into the list of entries it carries.
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<FeedItem>, ParseError>;
}

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

/// Parses the district RSS feeds (`rss/channel/item`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RssParser;

impl FeedParser for RssParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<FeedItem>, ParseError> {
        let xml = String::from_utf8_lossy(bytes);
        let document: RssDocument =
            quick_xml::de::from_str(&xml).map_err(|e| ParseError::Xml(e.to_string()))?;

        let items: Vec<FeedItem> = document
            .channel
            .items
            .into_iter()
            .map(|item| FeedItem {
                title: normalize_whitespace(&item.title),
                description: item.description.trim().to_string(),
            })
            .collect();

        if items.is_empty() {
            return Err(ParseError::NoItems);
        }

        log::debug!("Parsed {} RSS items", items.len());
        Ok(items)
    }
}

/// Parses a district's HTML page into a single "today" entry.
///
/// The page only carries the current rating, in an element whose class
/// contains `fdrRating`, and the ban status in a paragraph mentioning
/// "Total Fire Ban".
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPageParser;

impl FeedParser for HtmlPageParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<FeedItem>, ParseError> {
        let html = String::from_utf8_lossy(bytes);
        let document = Html::parse_document(&html);
        let rating_sel = Selector::parse("[class*=\"fdrRating\"]").unwrap();
        let para_sel = Selector::parse("p").unwrap();

        let rating = document
            .select(&rating_sel)
            .map(|e| normalize_whitespace(&elem_text(e)))
            .find(|t| !t.is_empty());

        let ban_paragraph = document
            .select(&para_sel)
            .map(|e| normalize_whitespace(&elem_text(e)))
            .find(|t| t.to_lowercase().contains("total fire ban"));

        if rating.is_none() && ban_paragraph.is_none() {
            return Err(ParseError::Html(
                "no rating element or fire ban paragraph".to_string(),
            ));
        }

        // Ban paragraph first: only the first block is read for the ban status.
        let mut description = String::new();
        if let Some(paragraph) = ban_paragraph {
            description.push_str(&format!("<p>{}</p>", paragraph));
        }
        if let Some(rating) = rating {
            description.push_str(&format!("<p>Fire Danger Rating: {}</p>", rating));
        }

        Ok(vec![FeedItem {
            title: "Today".to_string(),
            description,
        }])
    }
}

static RE_TITLE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+(\d{4})\b")
        .expect("invalid regex: title date")
});

static RE_ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("invalid regex: iso date")
});

pub(crate) fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_month(month: &str) -> Result<u32, ParseError> {
    let lower = month.to_lowercase();
    let month = match lower.get(..3) {
        Some("jan") => 1,
        Some("feb") => 2,
        Some("mar") => 3,
        Some("apr") => 4,
        Some("may") => 5,
        Some("jun") => 6,
        Some("jul") => 7,
        Some("aug") => 8,
        Some("sep") => 9,
        Some("oct") => 10,
        Some("nov") => 11,
        Some("dec") => 12,
        _ => return Err(ParseError::DateParse(format!("Unknown month: {}", month))),
    };
    Ok(month)
}

/// Reads a calendar date out of an item title such as
/// "Saturday, 17 October 2026" or "Sat 17th Oct 2026".
pub fn parse_date_from_title(title: &str) -> Result<NaiveDate, ParseError> {
    if let Some(caps) = RE_ISO_DATE.captures(title) {
        let (y, m, d) = (&caps[1], &caps[2], &caps[3]);
        return NaiveDate::from_ymd_opt(
            y.parse().unwrap_or_default(),
            m.parse().unwrap_or_default(),
            d.parse().unwrap_or_default(),
        )
        .ok_or_else(|| ParseError::DateParse(format!("Invalid date: {}-{}-{}", y, m, d)));
    }

    let caps = RE_TITLE_DATE.captures(title).ok_or_else(|| {
        ParseError::DateParse(format!("Could not match date pattern in: {}", title))
    })?;

    let day: u32 = caps[1]
        .parse()
        .map_err(|_| ParseError::DateParse(format!("Invalid day: {}", &caps[1])))?;
    let month = parse_month(&caps[2])?;
    let year: i32 = caps[3]
        .parse()
        .map_err(|_| ParseError::DateParse(format!("Invalid year: {}", &caps[3])))?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        ParseError::DateParse(format!("Invalid date: {}-{}-{}", year, month, day))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_rss_fixture() {
        let xml = fs::read_to_string("fixtures/central_rss.xml").expect("Failed to read fixture");

        let items = RssParser.parse(xml.as_bytes()).expect("Failed to parse feed");

        assert_eq!(items.len(), 5);
        assert_eq!(items[0].title, "Today, Friday 16 October 2026");
        assert!(items[0].description.contains("Central: HIGH"));
        assert!(
            items.iter().any(|i| i.title.contains("Municipality")),
            "Administrative entries are left for the assembler to skip"
        );
    }

    #[test]
    fn test_parse_rss_with_cdata_description() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>Wimmera</title>
              <link>https://www.cfa.vic.gov.au</link>
              <item>
                <title>Sunday, 18 October 2026</title>
                <link>https://www.cfa.vic.gov.au</link>
                <description><![CDATA[<p>Wimmera: EXTREME</p>]]></description>
              </item>
            </channel></rss>"#;

        let items = RssParser.parse(xml.as_bytes()).expect("Failed to parse feed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "<p>Wimmera: EXTREME</p>");
    }

    #[test]
    fn test_parse_rss_rejects_garbage() {
        let err = RssParser.parse(b"<html><body>Service unavailable").unwrap_err();
        assert!(matches!(err, ParseError::Xml(_)));
    }

    #[test]
    fn test_parse_rss_without_items() {
        let xml = "<rss><channel><title>Empty</title></channel></rss>";
        assert_eq!(RssParser.parse(xml.as_bytes()).unwrap_err(), ParseError::NoItems);
    }

    #[test]
    fn test_parse_html_page_fixture() {
        let html = fs::read_to_string("fixtures/north_central_page.html")
            .expect("Failed to read fixture");

        let items = HtmlPageParser.parse(html.as_bytes()).expect("Failed to parse page");

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Today");
        assert!(items[0].description.starts_with("<p>Total Fire Ban"));
        assert!(items[0].description.contains("Fire Danger Rating: EXTREME"));
    }

    #[test]
    fn test_parse_html_page_without_content() {
        let err = HtmlPageParser
            .parse(b"<html><body><h1>Not found</h1></body></html>")
            .unwrap_err();
        assert!(matches!(err, ParseError::Html(_)));
    }

    #[test]
    fn test_parse_date_from_title_variants() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(parse_date_from_title("Saturday, 17 October 2026").unwrap(), expected);
        assert_eq!(parse_date_from_title("Sat 17th Oct 2026").unwrap(), expected);
        assert_eq!(parse_date_from_title("Tomorrow, Saturday 17 October 2026").unwrap(), expected);
        assert_eq!(parse_date_from_title("Forecast for 2026-10-17").unwrap(), expected);
    }

    #[test]
    fn test_parse_date_from_title_failures() {
        assert!(parse_date_from_title("Today").is_err());
        assert!(parse_date_from_title("31 February 2026").is_err());
        assert!(parse_date_from_title("12 Smarch 2026").is_err());
    }
}
