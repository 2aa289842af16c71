//! Selector-driven extractor for listing pages
//!
//! One `CssExtractor` serves one category; its behavior comes entirely from
//! the category's `SelectorSpec` in the config file, so supporting a new
//! marketplace is a config change, not a code change.

use crate::extract::{ExtractError, Extractor, Record};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use url::Url;

/// Longest description kept on a record; the rest is cut with an ellipsis
const MAX_DESCRIPTION_CHARS: usize = 500;

/// CSS selectors describing one site's listing markup
///
/// `card` scopes one listed item; the field selectors are evaluated inside
/// each card. Only `title` is required per card: cards without a readable
/// title are dropped, and a page whose cards all drop is treated as a
/// structure mismatch.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSpec {
    /// Container element of one listed item
    pub card: String,

    /// Item title, relative to the card
    pub title: String,

    /// Item price, relative to the card
    #[serde(default)]
    pub price: Option<String>,

    /// Item condition ("New", "Used", ...), relative to the card
    #[serde(default)]
    pub condition: Option<String>,

    /// Item description snippet, relative to the card
    #[serde(default)]
    pub description: Option<String>,

    /// Posting date, relative to the card; a `datetime` attribute wins over text
    #[serde(rename = "posted-at", default)]
    pub posted_at: Option<String>,

    /// Link to the item page; defaults to the first `a[href]` in the card
    #[serde(default)]
    pub link: Option<String>,
}

impl SelectorSpec {
    /// Parses every configured selector, failing on the first invalid one
    pub fn compile(&self) -> Result<CompiledSelectors, ExtractError> {
        Ok(CompiledSelectors {
            card: compile_one(&self.card)?,
            title: compile_one(&self.title)?,
            price: self.price.as_deref().map(compile_one).transpose()?,
            condition: self.condition.as_deref().map(compile_one).transpose()?,
            description: self.description.as_deref().map(compile_one).transpose()?,
            posted_at: self.posted_at.as_deref().map(compile_one).transpose()?,
            link: self.link.as_deref().map(compile_one).transpose()?,
        })
    }
}

fn compile_one(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector(format!("{}: {}", selector, e)))
}

/// Pre-parsed form of a `SelectorSpec`
pub struct CompiledSelectors {
    card: Selector,
    title: Selector,
    price: Option<Selector>,
    condition: Option<Selector>,
    description: Option<Selector>,
    posted_at: Option<Selector>,
    link: Option<Selector>,
}

/// Extractor that reads listing cards with compiled CSS selectors
pub struct CssExtractor {
    selectors: CompiledSelectors,
}

impl CssExtractor {
    /// Builds an extractor from a selector spec
    pub fn new(spec: &SelectorSpec) -> Result<Self, ExtractError> {
        Ok(Self {
            selectors: spec.compile()?,
        })
    }

    /// Reads one listing card into a record, if it has a usable title
    fn read_card(&self, card: ElementRef<'_>, page_url: &Url) -> Option<Record> {
        let title = text_of(card, &self.selectors.title)?;

        let price = self
            .selectors
            .price
            .as_ref()
            .and_then(|s| text_of(card, s))
            .unwrap_or_else(|| "N/A".to_string());

        let condition = self
            .selectors
            .condition
            .as_ref()
            .and_then(|s| text_of(card, s))
            .unwrap_or_else(|| "New".to_string());

        let description = self
            .selectors
            .description
            .as_ref()
            .and_then(|s| text_of(card, s))
            .map(|d| truncate_description(&d))
            .unwrap_or_else(|| "N/A".to_string());

        let posted_at = self
            .selectors
            .posted_at
            .as_ref()
            .and_then(|s| date_of(card, s))
            .unwrap_or_else(|| "N/A".to_string());

        let url = self
            .item_link(card, page_url)
            .unwrap_or_else(|| page_url.to_string());

        Some(Record {
            title,
            price,
            condition,
            description,
            posted_at,
            url,
            captured_at: Utc::now(),
        })
    }

    /// Resolves the card's item link against the page URL
    fn item_link(&self, card: ElementRef<'_>, page_url: &Url) -> Option<String> {
        let href = match &self.selectors.link {
            Some(selector) => card
                .select(selector)
                .find_map(|el| el.value().attr("href")),
            None => default_link(card),
        }?;

        match page_url.join(href.trim()) {
            Ok(absolute) => Some(absolute.to_string()),
            Err(_) => None,
        }
    }
}

impl Extractor for CssExtractor {
    fn extract(&self, body: &str, page_url: &Url) -> Result<Vec<Record>, ExtractError> {
        let document = Html::parse_document(body);

        let cards: Vec<ElementRef<'_>> = document.select(&self.selectors.card).collect();
        if cards.is_empty() {
            // No cards at all: the page-termination signal, not a mismatch
            return Ok(Vec::new());
        }

        let card_count = cards.len();
        let records: Vec<Record> = cards
            .into_iter()
            .filter_map(|card| self.read_card(card, page_url))
            .collect();

        if records.is_empty() {
            return Err(ExtractError::StructureMismatch(format!(
                "{} listing cards matched but none had a readable title",
                card_count
            )));
        }

        if records.len() < card_count {
            tracing::debug!(
                "Dropped {} of {} cards without a readable title on {}",
                card_count - records.len(),
                card_count,
                page_url
            );
        }

        Ok(records)
    }
}

/// Collects the text of the first match, whitespace-collapsed
fn text_of(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .map(|el| clean_text(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

/// Reads a posting date, preferring a machine-readable datetime attribute
fn date_of(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let el = card.select(selector).next()?;
    if let Some(datetime) = el.value().attr("datetime") {
        let datetime = datetime.trim();
        if !datetime.is_empty() {
            return Some(datetime.to_string());
        }
    }
    let text = clean_text(&el.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// First `a[href]` inside the card, used when no link selector is configured
fn default_link(card: ElementRef<'_>) -> Option<&str> {
    // The card itself may be the anchor
    if card.value().name() == "a" {
        if let Some(href) = card.value().attr("href") {
            return Some(href);
        }
    }

    let anchor = Selector::parse("a[href]").ok()?;
    card.select(&anchor).find_map(|el| el.value().attr("href"))
}

/// Collapses runs of whitespace to single spaces and trims
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts a description at the character limit, marking the cut
fn truncate_description(text: &str) -> String {
    if text.chars().count() <= MAX_DESCRIPTION_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_DESCRIPTION_CHARS).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
impl SelectorSpec {
    /// Spec matching the fixture markup used across the crate's tests
    pub(crate) fn test_spec() -> Self {
        Self {
            card: "article.listing".to_string(),
            title: "h2.title".to_string(),
            price: Some("span.price".to_string()),
            condition: Some("span.condition".to_string()),
            description: Some("p.desc".to_string()),
            posted_at: Some("time.posted".to_string()),
            link: Some("a.item-link".to_string()),
        }
    }
}
