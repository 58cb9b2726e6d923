// 🌐 HTML Listing Extractor - paginated result listings → positioned text items
// Each listing row becomes a baseline and each cell a column position, so HTML sources
// flow through the same classify → cluster → partition → assemble chain as PDFs

use crate::error::{IngestError, Result};
use crate::game::{GameSpec, Session};
use crate::token::{is_date_shaped, RawItem};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Vertical distance between consecutive listing rows
pub const ROW_PITCH: f64 = 20.0;
const ROW_TOP: f64 = 10_000.0;

/// Horizontal distance between consecutive cells
const CELL_PITCH: f64 = 40.0;

/// Horizontal distance between the numbers of a split run
const PIECE_PITCH: f64 = 10.0;

const PENDING_PHRASES: &[&str] = &[
    "results pending",
    "results are pending",
    "not yet available",
    "check back",
    "draw in progress",
    "results will be posted",
];

static NUMBER_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}(?:\s*[-‐–—,]?\s*\d{1,3})+$").expect("valid number-run regex")
});

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,3}").expect("valid number regex"));

static LIVE_CONFIG_ATTR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-live-config]").expect("valid selector"));

static LIVE_CONFIG_SCRIPT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script#live-config, script[type="application/json"][data-live-component]"#)
        .expect("valid selector")
});

static PROPERTIES_ATTR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-live-props], [data-properties]").expect("valid selector"));

static PROPERTIES_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[name="properties"]"#).expect("valid selector"));

// ============================================================================
// SELECTORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlSelectors {
    /// One match per listing row
    pub row: String,

    /// Cells within a row; rows without matching cells fall back to their text nodes
    pub cell: String,

    /// The "load more" affordance
    pub load_more: String,
}

impl Default for HtmlSelectors {
    fn default() -> Self {
        HtmlSelectors {
            row: "tr, li.draw, div.draw-row".to_string(),
            cell: "td, th, span.cell, div.cell".to_string(),
            load_more: "button.load-more, a.load-more, [data-load-more]".to_string(),
        }
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| IngestError::Html(format!("invalid selector '{}': {:?}", selector, e)))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// LISTING PARSER
// ============================================================================

pub struct ListingParser {
    game: GameSpec,
    row: Selector,
    cell: Selector,
    load_more: Selector,
    row_css: String,
    load_more_css: String,
}

impl ListingParser {
    pub fn new(game: &GameSpec, selectors: &HtmlSelectors) -> Result<Self> {
        Ok(ListingParser {
            game: game.clone(),
            row: compile(&selectors.row)?,
            cell: compile(&selectors.cell)?,
            load_more: compile(&selectors.load_more)?,
            row_css: selectors.row.clone(),
            load_more_css: selectors.load_more.clone(),
        })
    }

    /// CSS of a listing row, for counting rows in a live DOM
    pub fn row_selector(&self) -> &str {
        &self.row_css
    }

    /// CSS of the load-more affordance, for driving a browser
    pub fn load_more_selector(&self) -> &str {
        &self.load_more_css
    }

    /// Cell texts of one row, outermost matching cells only
    fn cell_texts(&self, row: ElementRef<'_>) -> Vec<String> {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cell).collect();
        if cells.is_empty() {
            return row
                .text()
                .map(normalize)
                .filter(|t| !t.is_empty())
                .collect();
        }

        let ids: HashSet<_> = cells.iter().map(|c| c.id()).collect();
        cells
            .into_iter()
            .filter(|c| {
                !c.ancestors()
                    .take_while(|a| a.id() != row.id())
                    .any(|a| ids.contains(&a.id()))
            })
            .map(|c| normalize(&c.text().collect::<Vec<_>>().join(" ")))
            .collect()
    }

    /// Spelled-out session labels ("Midday") become the game's printed marker
    fn session_marker(&self, text: &str) -> Option<String> {
        if self.game.session_for_code(text).is_some() {
            return Some(text.to_string());
        }
        let session: Session = Session::from_label(text)?;
        self.game
            .session_codes()
            .into_iter()
            .find(|sc| sc.session == session)
            .map(|sc| sc.code)
    }

    /// Rows that carry at least one number, as cell texts
    fn listing_rows(&self, doc: &Html) -> Vec<Vec<String>> {
        doc.select(&self.row)
            .map(|row| self.cell_texts(row))
            .filter(|cells| cells.iter().any(|c| c.chars().any(|ch| ch.is_ascii_digit())))
            .collect()
    }

    /// Lay out one listing fragment as positioned items on `page`
    pub fn extract_items(&self, html: &str, page: usize) -> Vec<RawItem> {
        let doc = Html::parse_document(html);
        let synthetic_session = self.game.default_session_code();
        let mut items = Vec::new();
        let mut last_date: Option<(f64, String)> = None;

        for (i, cells) in self.listing_rows(&doc).into_iter().enumerate() {
            let y = ROW_TOP - i as f64 * ROW_PITCH;
            let has_date = cells.iter().any(|c| is_date_shaped(c));
            let has_session = cells.iter().any(|c| self.session_marker(c).is_some());

            let mut x = 0.0;
            if !has_date {
                // Session rows under a shared (rowspan) date reuse the previous date
                let Some((date_x, date)) = last_date.clone() else {
                    continue;
                };
                items.push(RawItem::new(page, date_x, y, date));
                if !has_session {
                    if let Some(code) = &synthetic_session {
                        items.push(RawItem::new(page, date_x + CELL_PITCH / 2.0, y, code.as_str()));
                    }
                }
                if cells.first().is_some_and(|c| !c.is_empty()) {
                    x += CELL_PITCH;
                }
            }

            for cell in &cells {
                if cell.is_empty() {
                    x += CELL_PITCH;
                    continue;
                }

                if is_date_shaped(cell) {
                    items.push(RawItem::new(page, x, y, cell.as_str()));
                    last_date = Some((x, cell.clone()));
                    if !has_session {
                        if let Some(code) = &synthetic_session {
                            items.push(RawItem::new(page, x + CELL_PITCH / 2.0, y, code.as_str()));
                        }
                    }
                    x += CELL_PITCH;
                    continue;
                }

                if let Some(code) = self.session_marker(cell) {
                    items.push(RawItem::new(page, x, y, code));
                    x += CELL_PITCH;
                    continue;
                }

                if NUMBER_RUN.is_match(cell) {
                    let mut last_x = x;
                    for (k, m) in NUMBER.find_iter(cell).enumerate() {
                        last_x = x + k as f64 * PIECE_PITCH;
                        items.push(RawItem::new(page, last_x, y, m.as_str()));
                    }
                    x = last_x + CELL_PITCH;
                    continue;
                }

                items.push(RawItem::new(page, x, y, cell.as_str()));
                x += CELL_PITCH;
            }
        }

        debug!(page, items = items.len(), "laid out listing fragment");
        items
    }

    /// Fingerprints of the dated rows in a fragment, used to detect growth between pages
    pub fn row_keys(&self, html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        self.listing_rows(&doc)
            .into_iter()
            .map(|cells| cells.join("|"))
            .collect()
    }

    /// An enabled, visible load-more affordance is present
    pub fn has_load_more(&self, html: &str) -> bool {
        let doc = Html::parse_document(html);
        let found = doc.select(&self.load_more).any(|el| {
            let v = el.value();
            v.attr("disabled").is_none()
                && v.attr("hidden").is_none()
                && v.attr("aria-disabled") != Some("true")
        });
        found
    }
}

// ============================================================================
// PAGE STATE
// ============================================================================

fn visible_text(doc: &Html) -> String {
    doc.root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?.value().as_element()?.name();
            if parent == "script" || parent == "style" {
                None
            } else {
                Some(text.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the page announces that today's results are not published yet
pub fn is_pending(html: &str) -> bool {
    let text = visible_text(&Html::parse_document(html)).to_lowercase();
    PENDING_PHRASES.iter().any(|p| text.contains(p))
}

pub fn check_pending(html: &str, source: &str) -> Result<()> {
    if is_pending(html) {
        return Err(IngestError::PendingResults(source.to_string()));
    }
    Ok(())
}

/// Next-page endpoint description embedded by a live-component page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    pub endpoint: String,

    #[serde(default = "default_page_param")]
    pub page_param: String,

    /// Fixed query parameters, e.g. the game identifier
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub properties: Option<String>,
}

fn default_page_param() -> String {
    "page".to_string()
}

impl LiveConfig {
    /// Query pairs for one page number, fixed params first
    pub fn query_for_page(&self, page: usize) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();
        pairs.push((self.page_param.clone(), page.to_string()));
        pairs
    }
}

/// Find the live-component configuration: a data attribute first, then a JSON script tag
pub fn find_live_config(html: &str) -> Result<LiveConfig> {
    let doc = Html::parse_document(html);

    if let Some(raw) = doc
        .select(&LIVE_CONFIG_ATTR)
        .find_map(|el| el.value().attr("data-live-config"))
    {
        return parse_live_config(raw);
    }

    if let Some(script) = doc.select(&LIVE_CONFIG_SCRIPT).next() {
        let raw = script.text().collect::<String>();
        return parse_live_config(raw.trim());
    }

    Err(IngestError::NoLiveConfig(
        "listing page".to_string(),
    ))
}

fn parse_live_config(raw: &str) -> Result<LiveConfig> {
    serde_json::from_str(raw).map_err(|e| IngestError::NoLiveConfig(format!("listing page (bad config: {})", e)))
}

/// Opaque component state to echo back on the next stateful request
pub fn find_properties(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let from_attr = doc.select(&PROPERTIES_ATTR).find_map(|el| {
        let v = el.value();
        v.attr("data-live-props").or_else(|| v.attr("data-properties"))
    });
    if let Some(props) = from_attr {
        return Some(props.to_string());
    }

    if let Some(value) = doc
        .select(&PROPERTIES_INPUT)
        .find_map(|el| el.value().attr("value"))
    {
        return Some(value.to_string());
    }

    find_live_config(html).ok().and_then(|c| c.properties)
}

/// A replay response reduced to its HTML fragment and the next state blob
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub html: String,
    pub properties: Option<String>,
}

/// Unwrap `{"html"|"content"|"fragment": ..., "properties": ...}` envelopes; raw HTML passes through
pub fn unwrap_response(body: &str) -> Fragment {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(trimmed) {
            let html = ["html", "content", "fragment"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
                .unwrap_or_default()
                .to_string();
            let properties = obj.get("properties").and_then(|v| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });
            let properties = properties.or_else(|| find_properties(&html));
            return Fragment { html, properties };
        }
    }

    Fragment {
        html: body.to_string(),
        properties: find_properties(body),
    }
}
