// 🧾 DrawRecord - canonical row of the ledger
// Output of row assembly, input of the merger

use crate::error::{IngestError, Result};
use crate::game::{GameSpec, Session};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identity of a draw in the ledger
pub type DrawKey = (NaiveDate, Session);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub date: NaiveDate,
    pub session: Session,
    pub digits: Vec<u8>,
    pub bonus: Option<u8>,
}

impl DrawRecord {
    pub fn new(date: NaiveDate, session: Session, digits: Vec<u8>) -> Self {
        DrawRecord {
            date,
            session,
            digits,
            bonus: None,
        }
    }

    /// Builder pattern: attach the bonus number
    pub fn with_bonus(mut self, bonus: u8) -> Self {
        self.bonus = Some(bonus);
        self
    }

    pub fn key(&self) -> DrawKey {
        (self.date, self.session)
    }

    /// Populated optional fields; the merger prefers the higher count
    pub fn completeness(&self) -> usize {
        usize::from(self.bonus.is_some())
    }

    /// Serialize to ledger columns in header order
    pub fn to_row(&self, game: &GameSpec) -> Vec<String> {
        let mut row = vec![self.date.format("%Y-%m-%d").to_string()];
        if game.is_multi_session() {
            row.push(self.session.label().to_string());
        }
        row.extend(self.digits.iter().map(|d| d.to_string()));
        if game.has_bonus() {
            row.push(self.bonus.map(|b| b.to_string()).unwrap_or_default());
        }
        row
    }

    /// Parse one ledger line (already split into fields)
    pub fn from_row(game: &GameSpec, fields: &[&str], line: usize) -> Result<Self> {
        let malformed = |reason: String| IngestError::MalformedRow { line, reason };

        let expected = game.header().len();
        if fields.len() != expected {
            return Err(malformed(format!(
                "expected {} fields, found {}",
                expected,
                fields.len()
            )));
        }

        let date = NaiveDate::parse_from_str(fields[0].trim(), "%Y-%m-%d")
            .map_err(|e| malformed(format!("bad date '{}': {}", fields[0], e)))?;

        let mut idx = 1;
        let session = if game.is_multi_session() {
            idx += 1;
            Session::from_label(fields[1])
                .ok_or_else(|| malformed(format!("unknown session '{}'", fields[1])))?
        } else {
            game.default_session()
        };

        let mut digits = Vec::with_capacity(game.arity);
        for field in &fields[idx..idx + game.arity] {
            let n = field
                .trim()
                .parse::<u8>()
                .map_err(|_| malformed(format!("bad number '{}'", field)))?;
            digits.push(n);
        }
        idx += game.arity;

        let bonus = if game.has_bonus() {
            let raw = fields[idx].trim();
            if raw.is_empty() {
                None
            } else {
                Some(
                    raw.parse::<u8>()
                        .map_err(|_| malformed(format!("bad bonus '{}'", raw)))?,
                )
            }
        } else {
            None
        };

        Ok(DrawRecord {
            date,
            session,
            digits,
            bonus,
        })
    }
}

// ============================================================================
// PROVENANCE
// ============================================================================

/// Whether a source is authoritative or a stand-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    #[default]
    Primary,
    Fallback,
}

/// A freshly assembled record plus where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedRecord {
    pub record: DrawRecord,
    pub role: SourceRole,
    pub source: String,
}

impl SourcedRecord {
    pub fn new(record: DrawRecord, role: SourceRole, source: impl Into<String>) -> Self {
        SourcedRecord {
            record,
            role,
            source: source.into(),
        }
    }
}
