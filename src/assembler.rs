// 🧱 Row Assembler - session markers → dated draw records
// For every session marker: date to the left, optional tag+bonus to the right, then the
// fixed-arity digit group on the same baseline via a cascade of matching strategies

use crate::columns::median;
use crate::game::GameSpec;
use crate::panes::Pane;
use crate::record::DrawRecord;
use crate::token::{parse_date, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

// ============================================================================
// TOLERANCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Row tolerance as a fraction of the pane's row pitch (default: 0.35)
    pub y_tol_fraction: f64,

    /// Tag/bonus tolerance as a fraction of the row pitch (default: 0.5)
    pub tag_tol_fraction: f64,

    /// Clamp for both tolerances, in points
    pub tol_min: f64,
    pub y_tol_max: f64,
    pub tag_tol_max: f64,

    /// Pitch assumed when a pane has fewer than two session rows
    pub default_pitch: f64,

    /// Digits this close (in x) to the bonus digit never join the main group
    pub bonus_exclusion_radius: f64,

    /// Vertical distances closer than this count as a tie
    pub tie_epsilon: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances {
            y_tol_fraction: 0.35,
            tag_tol_fraction: 0.5,
            tol_min: 1.5,
            y_tol_max: 8.0,
            tag_tol_max: 10.0,
            default_pitch: 14.0,
            bonus_exclusion_radius: 6.0,
            tie_epsilon: 0.5,
        }
    }
}

impl Tolerances {
    /// Scale fractions and upper clamps; used by the page tuner
    pub fn widened(&self, factor: f64) -> Self {
        Tolerances {
            y_tol_fraction: self.y_tol_fraction * factor,
            tag_tol_fraction: self.tag_tol_fraction * factor,
            y_tol_max: self.y_tol_max * factor,
            tag_tol_max: self.tag_tol_max * factor,
            ..*self
        }
    }

    /// Resolve tolerances from a pane's own row pitch
    pub fn for_pane(&self, pane: &Pane) -> PaneTolerance {
        let mut ys: Vec<f64> = pane.tokens_of(TokenKind::Session).map(|t| t.y).collect();
        ys.sort_by(|a, b| b.total_cmp(a));
        ys.dedup_by(|a, b| (*a - *b).abs() < self.tie_epsilon);

        let diffs: Vec<f64> = ys.windows(2).map(|w| w[0] - w[1]).collect();
        let pitch = median(&diffs).unwrap_or(self.default_pitch);

        PaneTolerance {
            pitch,
            y_tol: (pitch * self.y_tol_fraction).clamp(self.tol_min, self.y_tol_max),
            y_tol_tag: (pitch * self.tag_tol_fraction).clamp(self.tol_min, self.tag_tol_max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaneTolerance {
    pub pitch: f64,
    pub y_tol: f64,
    pub y_tol_tag: f64,
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    NoDateLeft,
    DateParseFail,
    NotEnoughDigitsBeforeTag,
    NoTagButDigitsMissing,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoDateLeft => "noDateLeft",
            SkipReason::DateParseFail => "dateParseFail",
            SkipReason::NotEnoughDigitsBeforeTag => "notEnoughDigitsBeforeTag",
            SkipReason::NoTagButDigitsMissing => "noTagButDigitsMissing",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub page: usize,
    pub pane: usize,
    pub y: f64,
    pub marker: String,
    pub reason: SkipReason,
    pub detail: String,
}

/// Which digit strategy produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DigitStrategy {
    Windowed,
    LookAhead(usize),
    ColumnScan,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    pub records: Vec<DrawRecord>,
    pub skips: Vec<SkippedRow>,
    pub strategies: BTreeMap<DigitStrategy, usize>,
}

impl AssemblyReport {
    pub fn rows(&self) -> usize {
        self.records.len()
    }

    /// Fraction of session markers that did not become records
    pub fn skip_rate(&self) -> f64 {
        let total = self.records.len() + self.skips.len();
        if total == 0 {
            0.0
        } else {
            self.skips.len() as f64 / total as f64
        }
    }

    pub fn skips_by_reason(&self) -> BTreeMap<SkipReason, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.skips {
            *counts.entry(s.reason).or_insert(0) += 1;
        }
        counts
    }

    pub fn extend(&mut self, other: AssemblyReport) {
        self.records.extend(other.records);
        self.skips.extend(other.skips);
        for (k, v) in other.strategies {
            *self.strategies.entry(k).or_insert(0) += v;
        }
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

struct RowSkip {
    reason: SkipReason,
    detail: String,
}

impl RowSkip {
    fn new(reason: SkipReason, detail: impl Into<String>) -> Self {
        RowSkip {
            reason,
            detail: detail.into(),
        }
    }
}

pub struct RowAssembler<'a> {
    game: &'a GameSpec,
    tolerances: Tolerances,
}

impl<'a> RowAssembler<'a> {
    pub fn new(game: &'a GameSpec, tolerances: Tolerances) -> Self {
        RowAssembler { game, tolerances }
    }

    /// Assemble every session row of every pane on a page
    pub fn assemble(&self, panes: &[Pane]) -> AssemblyReport {
        let mut report = AssemblyReport::default();

        for (pi, pane) in panes.iter().enumerate() {
            let tol = self.tolerances.for_pane(pane);
            let mut sessions: Vec<&Token> = pane.tokens_of(TokenKind::Session).collect();
            sessions.sort_by(|a, b| b.y.total_cmp(&a.y));

            for session in sessions {
                match self.assemble_row(panes, pi, &tol, session) {
                    Ok((record, strategy)) => {
                        *report.strategies.entry(strategy).or_insert(0) += 1;
                        report.records.push(record);
                    }
                    Err(skip) => {
                        debug!(
                            page = session.page,
                            pane = pane.index,
                            y = session.y,
                            reason = %skip.reason,
                            "row skipped: {}",
                            skip.detail
                        );
                        report.skips.push(SkippedRow {
                            page: session.page,
                            pane: pane.index,
                            y: session.y,
                            marker: session.text.clone(),
                            reason: skip.reason,
                            detail: skip.detail,
                        });
                    }
                }
            }
        }

        report
    }

    fn assemble_row(
        &self,
        panes: &[Pane],
        pi: usize,
        tol: &PaneTolerance,
        session: &Token,
    ) -> Result<(DrawRecord, DigitStrategy), RowSkip> {
        let pane = &panes[pi];

        // Date: nearest strictly to the left on the same baseline
        let date_token = self
            .closest(
                pane.tokens_of(TokenKind::Date)
                    .filter(|t| t.x < session.x && (t.y - session.y).abs() <= tol.y_tol),
                session.y,
                session.x,
            )
            .ok_or_else(|| {
                RowSkip::new(
                    SkipReason::NoDateLeft,
                    format!("no date within {:.1}pt left of x={:.1}", tol.y_tol, session.x),
                )
            })?;
        let date = parse_date(&date_token.text, self.game.date_order).ok_or_else(|| {
            RowSkip::new(SkipReason::DateParseFail, format!("'{}'", date_token.text))
        })?;

        let session_kind = self
            .game
            .session_for_code(&session.text)
            .unwrap_or_else(|| self.game.default_session());

        // Tag: this pane, then up to two panes to the right. A neighbour's tag
        // only counts while it sits left of that pane's own session column.
        let tag = (0..=2)
            .filter_map(|look| panes.get(pi + look).map(|p| (look, p)))
            .find_map(|(look, p)| {
                let limit = if look == 0 {
                    f64::INFINITY
                } else {
                    p.tokens_of(TokenKind::Session).map(|s| s.x).fold(f64::INFINITY, f64::min)
                };
                self.closest(
                    p.tokens_of(TokenKind::Tag).filter(|t| {
                        t.x > session.x && t.x < limit && (t.y - session.y).abs() <= tol.y_tol_tag
                    }),
                    session.y,
                    session.x,
                )
                .map(|t| (look, t))
            });

        let bonus = tag.and_then(|(look, tag)| {
            panes
                .iter()
                .skip(pi + look)
                .take(2)
                .flat_map(|p| p.tokens_of(TokenKind::Digit))
                .filter(|t| t.x > tag.x && (t.y - tag.y).abs() <= tol.y_tol_tag)
                .min_by(|a, b| (a.x - tag.x).total_cmp(&(b.x - tag.x)))
        });
        let bonus_x = bonus.map(|b| b.x);
        let tag_x = tag.map(|(_, t)| t.x);

        // Digits: windowed, then look-ahead into one and two more panes, then column scan
        let mut found = None;
        for extra in 0..=2 {
            if pi + extra >= panes.len() && extra > 0 {
                break;
            }
            if let Some(digits) = self.windowed_group(panes, pi, extra, tol, session, tag_x, bonus_x) {
                let strategy = if extra == 0 {
                    DigitStrategy::Windowed
                } else {
                    DigitStrategy::LookAhead(extra)
                };
                found = Some((digits, strategy));
                break;
            }
        }
        if found.is_none() {
            found = self
                .column_scan_group(pane, tol, session, bonus_x)
                .map(|digits| (digits, DigitStrategy::ColumnScan));
        }

        let (digits, strategy) = found.ok_or_else(|| match tag {
            Some((_, t)) => RowSkip::new(
                SkipReason::NotEnoughDigitsBeforeTag,
                format!("fewer than {} digits between x={:.1} and tag at x={:.1}", self.game.arity, session.x, t.x),
            ),
            None => RowSkip::new(
                SkipReason::NoTagButDigitsMissing,
                format!("fewer than {} digits right of x={:.1}", self.game.arity, session.x),
            ),
        })?;

        let mut record = DrawRecord::new(date, session_kind, digits);
        if let Some(b) = bonus.and_then(|b| b.number()) {
            record = record.with_bonus(b);
        }
        Ok((record, strategy))
    }

    /// Closest token by vertical distance, ties broken by horizontal distance to `ref_x`
    fn closest<'t>(
        &self,
        candidates: impl Iterator<Item = &'t Token>,
        ref_y: f64,
        ref_x: f64,
    ) -> Option<&'t Token> {
        let eps = self.tolerances.tie_epsilon;
        candidates.min_by(|a, b| {
            let qa = ((a.y - ref_y).abs() / eps).round() as i64;
            let qb = ((b.y - ref_y).abs() / eps).round() as i64;
            qa.cmp(&qb)
                .then_with(|| (a.x - ref_x).abs().total_cmp(&(b.x - ref_x).abs()))
        })
    }

    fn is_excluded(&self, x: f64, bonus_x: Option<f64>) -> bool {
        bonus_x.is_some_and(|bx| (x - bx).abs() <= self.tolerances.bonus_exclusion_radius)
    }

    /// Strategies (a) and (b): digits between the session and the tag, over `extra` more panes
    #[allow(clippy::too_many_arguments)]
    fn windowed_group(
        &self,
        panes: &[Pane],
        pi: usize,
        extra: usize,
        tol: &PaneTolerance,
        session: &Token,
        tag_x: Option<f64>,
        bonus_x: Option<f64>,
    ) -> Option<Vec<u8>> {
        let candidates: Vec<&Token> = panes
            .iter()
            .skip(pi)
            .take(extra + 1)
            .flat_map(|p| p.tokens_of(TokenKind::Digit))
            .filter(|t| {
                t.x > session.x
                    && tag_x.map_or(true, |tx| t.x < tx)
                    && (t.y - session.y).abs() <= tol.y_tol
                    && !self.is_excluded(t.x, bonus_x)
            })
            .collect();

        self.pick_group(candidates, session)
    }

    /// Greedy closest-N with a running horizontal reference, returned in reading order
    fn pick_group(&self, mut candidates: Vec<&Token>, session: &Token) -> Option<Vec<u8>> {
        let arity = self.game.arity;
        if candidates.len() < arity {
            return None;
        }

        let mut ref_x = session.x;
        let mut chosen: Vec<&Token> = Vec::with_capacity(arity);
        for _ in 0..arity {
            let idx = candidates
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let eps = self.tolerances.tie_epsilon;
                    let qa = ((a.y - session.y).abs() / eps).round() as i64;
                    let qb = ((b.y - session.y).abs() / eps).round() as i64;
                    qa.cmp(&qb)
                        .then_with(|| (a.x - ref_x).abs().total_cmp(&(b.x - ref_x).abs()))
                })
                .map(|(i, _)| i)?;
            let picked = candidates.remove(idx);
            ref_x = picked.x;
            chosen.push(picked);
        }

        chosen.sort_by(|a, b| a.x.total_cmp(&b.x));
        chosen.iter().map(|t| t.number()).collect()
    }

    /// Strategy (c): scan the pane's digit columns directly, nearest rows by vertical distance
    fn column_scan_group(
        &self,
        pane: &Pane,
        tol: &PaneTolerance,
        session: &Token,
        bonus_x: Option<f64>,
    ) -> Option<Vec<u8>> {
        let reach = tol.y_tol * 2.0;
        let mut best: Vec<&Token> = pane
            .digit_columns()
            .filter(|c| c.center_x >= pane.min_x && c.center_x <= pane.max_x)
            .filter(|c| !self.is_excluded(c.center_x, bonus_x))
            .filter_map(|c| {
                c.tokens_of(TokenKind::Digit)
                    .filter(|t| (t.y - session.y).abs() <= reach)
                    .min_by(|a, b| (a.y - session.y).abs().total_cmp(&(b.y - session.y).abs()))
            })
            .collect();

        if best.len() < self.game.arity {
            return None;
        }

        best.sort_by(|a, b| {
            (a.y - session.y)
                .abs()
                .total_cmp(&(b.y - session.y).abs())
                .then_with(|| (a.x - session.x).abs().total_cmp(&(b.x - session.x).abs()))
        });
        best.truncate(self.game.arity);
        best.sort_by(|a, b| a.x.total_cmp(&b.x));
        best.iter().map(|t| t.number()).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{cluster_columns, ClusterParams};
    use crate::game::Session;
    use crate::panes::{partition_panes, PaneParams};
    use chrono::NaiveDate;

    fn pick3() -> GameSpec {
        GameSpec::new("pick3", 3)
            .with_session("M", Session::Midday)
            .with_session("E", Session::Evening)
            .with_bonus_tag("FB")
    }

    fn t(x: f64, y: f64, text: &str, kind: TokenKind) -> Token {
        Token::new(0, x, y, text, kind)
    }

    /// One row: date, session, three digits, optional tag + bonus at given x
    fn row(tokens: &mut Vec<Token>, x0: f64, y: f64, date: &str, session: &str, digits: [u8; 3]) {
        tokens.push(t(x0 + 10.0, y, date, TokenKind::Date));
        tokens.push(t(x0 + 60.0, y, session, TokenKind::Session));
        for (i, d) in digits.iter().enumerate() {
            tokens.push(t(x0 + 75.0 + 10.0 * i as f64, y, &d.to_string(), TokenKind::Digit));
        }
    }

    fn assemble(tokens: &[Token], game: &GameSpec) -> AssemblyReport {
        let columns = cluster_columns(tokens, &ClusterParams::default());
        let panes = partition_panes(&columns, &PaneParams::default());
        RowAssembler::new(game, Tolerances::default()).assemble(&panes)
    }

    #[test]
    fn test_pane_tolerance_from_row_pitch() {
        let mut tokens = Vec::new();
        row(&mut tokens, 0.0, 700.0, "Jan 2, 2024", "E", [1, 2, 3]);
        row(&mut tokens, 0.0, 680.0, "Jan 2, 2024", "M", [4, 5, 6]);
        let columns = cluster_columns(&tokens, &ClusterParams::default());
        let panes = partition_panes(&columns, &PaneParams::default());
        let tol = Tolerances::default().for_pane(&panes[0]);
        assert_eq!(tol.pitch, 20.0);
        assert!((tol.y_tol - 7.0).abs() < 1e-9);
        assert_eq!(tol.y_tol_tag, 10.0);
    }

    #[test]
    fn test_six_clean_rows_across_three_panes() {
        let game = pick3();
        let mut tokens = Vec::new();
        for (p, x0) in [0.0, 200.0, 400.0].iter().enumerate() {
            let day = 10 + p as u32;
            row(&mut tokens, *x0, 700.0, &format!("Mar {}, 2024", day), "E", [1, 2, p as u8]);
            row(&mut tokens, *x0, 686.0, &format!("Mar {}, 2024", day), "M", [7, 8, 9]);
        }

        let report = assemble(&tokens, &game);
        assert_eq!(report.rows(), 6);
        assert!(report.skips.is_empty());
        assert!(report.records.iter().all(|r| r.digits.len() == 3));

        let first = &report.records[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(first.session, Session::Evening);
        assert_eq!(first.digits, vec![1, 2, 0]);
        assert_eq!(first.bonus, None);
        assert_eq!(report.strategies[&DigitStrategy::Windowed], 6);
    }

    #[test]
    fn test_bonus_tag_shifted_into_next_pane_is_recovered() {
        let game = pick3();
        let mut tokens = Vec::new();
        for x0 in [0.0, 300.0, 600.0] {
            for (y, session) in [(700.0, "E"), (686.0, "M")] {
                row(&mut tokens, x0, y, "Apr 1, 2024", session, [3, 1, 4]);
                let shifted = x0 == 0.0 && session == "M";
                let tag_x = if shifted { x0 + 170.0 } else { x0 + 120.0 };
                tokens.push(t(tag_x, y, "FB", TokenKind::Tag));
                tokens.push(t(tag_x + 15.0, y, "5", TokenKind::Digit));
            }
        }

        let report = assemble(&tokens, &game);
        assert!(report.skips.is_empty(), "skips: {:?}", report.skips);
        assert_eq!(report.rows(), 6);

        let shifted = report
            .records
            .iter()
            .find(|r| r.session == Session::Midday && r.digits == vec![3, 1, 4])
            .unwrap();
        assert_eq!(shifted.bonus, Some(5));
        assert!(report.records.iter().all(|r| r.bonus == Some(5)));
    }

    #[test]
    fn test_row_without_bonus_ignores_neighbour_tag() {
        let game = pick3();
        let mut tokens = Vec::new();
        for x0 in [0.0, 300.0, 600.0] {
            row(&mut tokens, x0, 700.0, "Apr 2, 2024", "E", [2, 7, 1]);
            if x0 > 0.0 {
                tokens.push(t(x0 + 120.0, 700.0, "FB", TokenKind::Tag));
                tokens.push(t(x0 + 135.0, 700.0, "5", TokenKind::Digit));
            }
        }

        let report = assemble(&tokens, &game);
        assert!(report.skips.is_empty(), "skips: {:?}", report.skips);
        let bonuses: Vec<Option<u8>> = report.records.iter().map(|r| r.bonus).collect();
        assert_eq!(bonuses, vec![None, Some(5), Some(5)]);
    }

    #[test]
    fn test_skip_reasons_are_categorized() {
        let game = pick3();
        let tokens = vec![
            // no date to the left
            t(60.0, 700.0, "E", TokenKind::Session),
            t(75.0, 700.0, "1", TokenKind::Digit),
            t(85.0, 700.0, "2", TokenKind::Digit),
            t(95.0, 700.0, "3", TokenKind::Digit),
            // invalid calendar date
            t(10.0, 660.0, "31/02/2024", TokenKind::Date),
            t(60.0, 660.0, "M", TokenKind::Session),
            t(75.0, 660.0, "1", TokenKind::Digit),
            t(85.0, 660.0, "2", TokenKind::Digit),
            t(95.0, 660.0, "3", TokenKind::Digit),
            // only one digit before the tag
            t(10.0, 620.0, "Feb 3, 2024", TokenKind::Date),
            t(60.0, 620.0, "E", TokenKind::Session),
            t(75.0, 620.0, "9", TokenKind::Digit),
            t(120.0, 620.0, "FB", TokenKind::Tag),
            t(135.0, 620.0, "4", TokenKind::Digit),
        ];
        let columns = cluster_columns(&tokens, &ClusterParams::default());
        let panes = partition_panes(&columns, &PaneParams::default().with_pane_count(1));
        let report = RowAssembler::new(&game, Tolerances::default()).assemble(&panes);

        let reasons: Vec<SkipReason> = report.skips.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::NoDateLeft,
                SkipReason::DateParseFail,
                SkipReason::NotEnoughDigitsBeforeTag
            ]
        );
        assert_eq!(report.rows(), 0);
        assert_eq!(report.skip_rate(), 1.0);
    }

    #[test]
    fn test_missing_digits_without_tag() {
        let game = GameSpec::new("daily4", 4);
        let tokens = vec![
            t(10.0, 700.0, "Jan 5, 2024", TokenKind::Date),
            t(60.0, 700.0, "D", TokenKind::Session),
            t(75.0, 700.0, "1", TokenKind::Digit),
            t(85.0, 700.0, "2", TokenKind::Digit),
        ];
        let report = assemble(&tokens, &game);
        assert_eq!(report.skips[0].reason, SkipReason::NoTagButDigitsMissing);
        assert_eq!(report.skips[0].reason.to_string(), "noTagButDigitsMissing");
    }

    #[test]
    fn test_column_scan_picks_digits_left_of_session() {
        let game = GameSpec::new("pick2", 2);
        let tokens = vec![
            t(10.0, 700.0, "Jan 5, 2024", TokenKind::Date),
            t(40.0, 700.5, "6", TokenKind::Digit),
            t(50.0, 699.5, "7", TokenKind::Digit),
            t(70.0, 700.0, "D", TokenKind::Session),
        ];
        let report = assemble(&tokens, &game);
        assert_eq!(report.rows(), 1);
        assert_eq!(report.records[0].digits, vec![6, 7]);
        assert_eq!(report.strategies[&DigitStrategy::ColumnScan], 1);
    }

    #[test]
    fn test_equal_vertical_distance_prefers_reading_order() {
        let game = GameSpec::new("pick2", 2);
        let tokens = vec![
            t(10.0, 700.0, "Jan 5, 2024", TokenKind::Date),
            t(60.0, 700.0, "D", TokenKind::Session),
            t(75.0, 700.0, "1", TokenKind::Digit),
            t(85.0, 700.0, "2", TokenKind::Digit),
            t(95.0, 700.0, "3", TokenKind::Digit),
        ];
        let report = assemble(&tokens, &game);
        assert_eq!(report.records[0].digits, vec![1, 2]);
    }
}
