// 🎲 Game definitions - arity, sessions, bonus label, ledger header
// Everything downstream (classifier, assembler, ledger) is parameterized by a GameSpec

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SESSION
// ============================================================================

/// Sub-draw distinguisher within a date.
///
/// Variant order is the in-day order used when sorting the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Daily,
    Midday,
    Evening,
    Night,
}

impl Session {
    /// Label written to the ledger
    pub fn label(&self) -> &'static str {
        match self {
            Session::Daily => "daily",
            Session::Midday => "midday",
            Session::Evening => "evening",
            Session::Night => "night",
        }
    }

    pub fn from_label(label: &str) -> Option<Session> {
        match label.trim().to_lowercase().as_str() {
            "daily" => Some(Session::Daily),
            "midday" | "mid-day" | "day" => Some(Session::Midday),
            "evening" | "eve" => Some(Session::Evening),
            "night" => Some(Session::Night),
            _ => None,
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps a printed session marker ("M", "E:") to a Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCode {
    pub code: String,
    pub session: Session,
}

impl SessionCode {
    pub fn new(code: impl Into<String>, session: Session) -> Self {
        SessionCode {
            code: code.into(),
            session,
        }
    }
}

// ============================================================================
// DATE ORDER
// ============================================================================

/// How to read ambiguous slash dates like 03/04/2024
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    #[default]
    DayFirst,
    MonthFirst,
}

// ============================================================================
// GAME SPEC
// ============================================================================

/// Recorded numbers are `u8`, so at most two printed digits per number
pub const MAX_NUMBER_WIDTH: usize = 2;

fn default_number_width() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSpec {
    /// Short identifier, also the default ledger file stem
    pub name: String,

    /// Count of main numbers per draw
    pub arity: usize,

    /// Max printed digits per number (1 for digit games like Pick 3)
    #[serde(default = "default_number_width")]
    pub number_width: usize,

    /// Printed session markers; empty means a single daily draw
    #[serde(default)]
    pub sessions: Vec<SessionCode>,

    /// Label of the bonus column ("FB", "Fireball"), if the game has one
    #[serde(default)]
    pub bonus_tag: Option<String>,

    #[serde(default)]
    pub date_order: DateOrder,

    /// Ledger file name override
    #[serde(default)]
    pub ledger_file: Option<String>,
}

impl GameSpec {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        GameSpec {
            name: name.into(),
            arity,
            number_width: 1,
            sessions: Vec::new(),
            bonus_tag: None,
            date_order: DateOrder::default(),
            ledger_file: None,
        }
    }

    /// Builder pattern: add a session marker
    pub fn with_session(mut self, code: impl Into<String>, session: Session) -> Self {
        self.sessions.push(SessionCode::new(code, session));
        self
    }

    /// Builder pattern: set the bonus tag label
    pub fn with_bonus_tag(mut self, tag: impl Into<String>) -> Self {
        self.bonus_tag = Some(tag.into());
        self
    }

    pub fn with_number_width(mut self, width: usize) -> Self {
        self.number_width = width.clamp(1, MAX_NUMBER_WIDTH);
        self
    }

    pub fn with_date_order(mut self, order: DateOrder) -> Self {
        self.date_order = order;
        self
    }

    pub fn has_bonus(&self) -> bool {
        self.bonus_tag.is_some()
    }

    /// More than one draw per date → the ledger carries a session column
    pub fn is_multi_session(&self) -> bool {
        self.sessions.len() > 1
    }

    /// Configured markers; a game without any prints a single "D" daily marker
    pub fn session_codes(&self) -> Vec<SessionCode> {
        if self.sessions.is_empty() {
            vec![SessionCode::new("D", Session::Daily)]
        } else {
            self.sessions.clone()
        }
    }

    /// Session for a printed marker, ignoring case and a trailing colon
    pub fn session_for_code(&self, marker: &str) -> Option<Session> {
        let bare = marker.trim().trim_end_matches(':').trim();
        self.session_codes()
            .into_iter()
            .find(|sc| sc.code.eq_ignore_ascii_case(bare))
            .map(|sc| sc.session)
    }

    /// Marker injected for sources that print no session (single-draw games)
    pub fn default_session_code(&self) -> Option<String> {
        match self.session_codes().as_slice() {
            [only] => Some(only.code.clone()),
            _ => None,
        }
    }

    /// Session for records of a game with a single draw per day
    pub fn default_session(&self) -> Session {
        match self.sessions.as_slice() {
            [only] => only.session,
            _ => Session::Daily,
        }
    }

    /// Fixed ledger header: date, [session], n1..nN, [bonus]
    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["date".to_string()];
        if self.is_multi_session() {
            header.push("session".to_string());
        }
        for i in 1..=self.arity {
            header.push(format!("n{}", i));
        }
        if self.has_bonus() {
            header.push("bonus".to_string());
        }
        header
    }

    pub fn ledger_file_name(&self) -> String {
        self.ledger_file
            .clone()
            .unwrap_or_else(|| format!("{}.csv", self.name))
    }

    /// Largest number a printed token may carry
    pub fn max_number(&self) -> u32 {
        10u32.pow(self.digit_width() as u32) - 1
    }

    /// Printed digits per number, bounded to what a record can hold
    pub fn digit_width(&self) -> usize {
        self.number_width.clamp(1, MAX_NUMBER_WIDTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick3() -> GameSpec {
        GameSpec::new("pick3", 3)
            .with_session("M", Session::Midday)
            .with_session("E", Session::Evening)
            .with_bonus_tag("FB")
    }

    #[test]
    fn test_header_multi_session_with_bonus() {
        assert_eq!(
            pick3().header(),
            vec!["date", "session", "n1", "n2", "n3", "bonus"]
        );
    }

    #[test]
    fn test_header_single_session_no_bonus() {
        let game = GameSpec::new("cash5", 5).with_number_width(2);
        assert_eq!(game.header(), vec!["date", "n1", "n2", "n3", "n4", "n5"]);
        assert_eq!(game.max_number(), 99);
        assert_eq!(game.default_session(), Session::Daily);
        assert_eq!(game.default_session_code().as_deref(), Some("D"));
        assert_eq!(game.session_for_code("D:"), Some(Session::Daily));
    }

    #[test]
    fn test_number_width_is_capped_at_two_digits() {
        let game = GameSpec::new("pick10", 10).with_number_width(3);
        assert_eq!(game.number_width, 2);
        assert_eq!(game.max_number(), 99);

        let mut raw = GameSpec::new("pick10", 10);
        raw.number_width = 3;
        assert_eq!(raw.digit_width(), 2);
        assert_eq!(raw.max_number(), 99);
    }

    #[test]
    fn test_session_for_code_ignores_colon_and_case() {
        let game = pick3();
        assert_eq!(game.session_for_code("E:"), Some(Session::Evening));
        assert_eq!(game.session_for_code("m"), Some(Session::Midday));
        assert_eq!(game.session_for_code("X"), None);
    }

    #[test]
    fn test_session_ordering_within_day() {
        assert!(Session::Midday < Session::Evening);
        assert_eq!(Session::from_label("Evening"), Some(Session::Evening));
    }
}
