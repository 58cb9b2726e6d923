// 🏷️ Token Classifier - positioned text item → typed token
// Rules in priority order: compound split, date, session, tag, digit, drop-list, noise

use crate::error::Result;
use crate::game::{DateOrder, GameSpec};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// CORE TYPES
// ============================================================================

/// A text fragment with its position on a rendered page (PDF points, y grows upward)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

impl RawItem {
    pub fn new(page: usize, x: f64, y: f64, text: impl Into<String>) -> Self {
        RawItem {
            page,
            x,
            y,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Date,
    Session,
    Tag,
    Digit,
    Noise,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Date => "date",
            TokenKind::Session => "session",
            TokenKind::Tag => "tag",
            TokenKind::Digit => "digit",
            TokenKind::Noise => "noise",
        }
    }

    /// Presence priority used to type a column: lower wins
    pub fn priority(&self) -> u8 {
        match self {
            TokenKind::Date => 0,
            TokenKind::Session => 1,
            TokenKind::Tag => 2,
            TokenKind::Digit => 3,
            TokenKind::Noise => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(page: usize, x: f64, y: f64, text: impl Into<String>, kind: TokenKind) -> Self {
        Token {
            page,
            x,
            y,
            text: text.into(),
            kind,
        }
    }

    /// Numeric value of a digit token
    pub fn number(&self) -> Option<u8> {
        self.text.trim().parse::<u8>().ok()
    }
}

/// Per-page token-kind tallies for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub date: usize,
    pub session: usize,
    pub tag: usize,
    pub digit: usize,
    pub noise: usize,
    pub dropped: usize,
}

impl KindCounts {
    pub fn add(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::Date => self.date += 1,
            TokenKind::Session => self.session += 1,
            TokenKind::Tag => self.tag += 1,
            TokenKind::Digit => self.digit += 1,
            TokenKind::Noise => self.noise += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "date={} session={} tag={} digit={} noise={} dropped={}",
            self.date, self.session, self.tag, self.digit, self.noise, self.dropped
        )
    }
}

// ============================================================================
// DATE PATTERNS
// ============================================================================

static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+)?(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})$",
    )
    .expect("valid month-name date regex")
});

static DASH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})-(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*-(\d{4}|\d{2})$")
        .expect("valid dash date regex")
});

static SLASH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})$").expect("valid slash date regex")
});

/// Boilerplate that never belongs to a table (headers, footers, disclaimers)
const DEFAULT_DROP_LIST: &[&str] = &[
    "page",
    "draw date",
    "winning numbers",
    "unofficial",
    "copyright",
    "©",
    "all rights reserved",
    "subject to",
    "disclaimer",
    "printed on",
    "in the event of a discrepancy",
    "www.",
    "http",
];

/// Horizontal offset between the tag and the synthetic digit of a compound run, per tag char
const COMPOUND_CHAR_WIDTH: f64 = 5.0;

fn month_number(abbrev: &str) -> Option<u32> {
    let m = match abbrev.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(m)
}

fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    Some(match raw.len() {
        2 if year >= 70 => 1900 + year,
        2 => 2000 + year,
        _ => year,
    })
}

/// Whether the text has the shape of a date in any supported format
pub fn is_date_shaped(text: &str) -> bool {
    let t = text.trim();
    MONTH_NAME_DATE.is_match(t) || DASH_DATE.is_match(t) || SLASH_DATE.is_match(t)
}

/// Parse a date-shaped string. None when the shape matches but the calendar date is invalid.
pub fn parse_date(text: &str, order: DateOrder) -> Option<NaiveDate> {
    let t = text.trim();

    if let Some(caps) = MONTH_NAME_DATE.captures(t) {
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year = expand_year(&caps[3])?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = DASH_DATE.captures(t) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year = expand_year(&caps[3])?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = SLASH_DATE.captures(t) {
        let a: u32 = caps[1].parse().ok()?;
        let b: u32 = caps[2].parse().ok()?;
        let year = expand_year(&caps[3])?;
        let (day, month) = match order {
            DateOrder::DayFirst => (a, b),
            DateOrder::MonthFirst => (b, a),
        };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct TokenClassifier {
    session: Regex,
    tag: Option<Regex>,
    compound: Option<Regex>,
    digit: Regex,
    max_number: u32,
    drop_list: Vec<String>,
}

impl TokenClassifier {
    /// Build the game-specific patterns
    pub fn new(game: &GameSpec) -> Result<Self> {
        let codes: Vec<String> = game
            .session_codes()
            .iter()
            .map(|sc| regex::escape(&sc.code))
            .collect();
        let session = Regex::new(&format!(r"(?i)^(?:{}):?$", codes.join("|")))?;

        let width = game.digit_width();
        let digit = Regex::new(&format!(r"^[-‐–—_]*\s*(\d{{1,{}}})\s*[-‐–—_]*$", width))?;

        let (tag, compound) = match &game.bonus_tag {
            Some(label) => {
                let escaped = regex::escape(label.trim());
                (
                    Some(Regex::new(&format!(r"(?i)^{}\s*:?$", escaped))?),
                    Some(Regex::new(&format!(
                        r"(?i)^({})\s*:?\s*(\d{{1,{}}})$",
                        escaped, width
                    ))?),
                )
            }
            None => (None, None),
        };

        Ok(TokenClassifier {
            session,
            tag,
            compound,
            digit,
            max_number: game.max_number(),
            drop_list: DEFAULT_DROP_LIST.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Builder pattern: extend the boilerplate drop-list (matched case-insensitively as substrings)
    pub fn with_drop_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_list
            .extend(patterns.into_iter().map(|p| p.into().to_lowercase()));
        self
    }

    /// Classify one item. None means the item hit the drop-list and is discarded.
    pub fn classify(&self, item: &RawItem) -> Option<Vec<Token>> {
        let text = item.text.trim();
        let token = |text: &str, kind| Token::new(item.page, item.x, item.y, text, kind);

        if text.is_empty() {
            return Some(Vec::new());
        }

        // Rule 1: "FB 8" → tag + digit
        if let Some(caps) = self.compound.as_ref().and_then(|re| re.captures(text)) {
            let tag_text = caps[1].to_string();
            let digit_text = caps[2].to_string();
            let dx = (tag_text.chars().count() + 1) as f64 * COMPOUND_CHAR_WIDTH;
            return Some(vec![
                token(&tag_text, TokenKind::Tag),
                Token::new(item.page, item.x + dx, item.y, digit_text, TokenKind::Digit),
            ]);
        }

        // Rule 2
        if is_date_shaped(text) {
            return Some(vec![token(text, TokenKind::Date)]);
        }

        // Rule 3
        if self.session.is_match(text) {
            return Some(vec![token(text, TokenKind::Session)]);
        }

        // Rule 4
        if self.tag.as_ref().is_some_and(|re| re.is_match(text)) {
            return Some(vec![token(text, TokenKind::Tag)]);
        }

        // Rule 5: stray kerning dashes around a number
        if let Some(caps) = self.digit.captures(text) {
            let bare = &caps[1];
            if bare.parse::<u32>().is_ok_and(|n| n <= self.max_number) {
                return Some(vec![token(bare, TokenKind::Digit)]);
            }
        }

        // Rule 6
        let lower = text.to_lowercase();
        if self.drop_list.iter().any(|p| lower.contains(p.as_str())) {
            return None;
        }

        // Rule 7
        Some(vec![token(text, TokenKind::Noise)])
    }

    /// Classify a whole extraction run; logs per-page kind counts when verbose
    pub fn classify_all(&self, items: &[RawItem], verbose: bool) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(items.len());
        let mut counts: BTreeMap<usize, KindCounts> = BTreeMap::new();

        for item in items {
            let page_counts = counts.entry(item.page).or_default();
            match self.classify(item) {
                Some(classified) => {
                    for t in classified {
                        page_counts.add(t.kind);
                        tokens.push(t);
                    }
                }
                None => page_counts.dropped += 1,
            }
        }

        if verbose {
            for (page, c) in &counts {
                debug!(page = *page, "token kinds: {}", c.summary());
            }
        }

        tokens
    }
}

/// Tally token kinds per page
pub fn kind_counts(tokens: &[Token]) -> BTreeMap<usize, KindCounts> {
    let mut counts: BTreeMap<usize, KindCounts> = BTreeMap::new();
    for t in tokens {
        counts.entry(t.page).or_default().add(t.kind);
    }
    counts
}

/// Split tokens by page, keeping page order
pub fn tokens_by_page(tokens: &[Token]) -> BTreeMap<usize, Vec<Token>> {
    let mut pages: BTreeMap<usize, Vec<Token>> = BTreeMap::new();
    for t in tokens {
        pages.entry(t.page).or_default().push(t.clone());
    }
    pages
}

// ============================================================================
// TESTS
// ============================================================================
