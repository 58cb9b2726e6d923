// 🎛️ Page-Level Tuner - retry row assembly with wider tolerances
// At most three attempts per page; best score (rows - skip rate) wins

use crate::assembler::{AssemblyReport, RowAssembler, Tolerances};
use crate::columns::{cluster_columns, non_noise_count, ClusterParams};
use crate::game::GameSpec;
use crate::panes::{partition_panes, PaneParams};
use crate::record::DrawRecord;
use crate::token::{tokens_by_page, Token};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerParams {
    pub cluster: ClusterParams,
    pub panes: PaneParams,
    pub tolerances: Tolerances,

    /// Attempts per page (default: 3)
    pub max_attempts: usize,

    /// Stop once a page's skip rate is at or below this (default: 0.25)
    pub target_skip_rate: f64,

    /// Tolerance scale for attempts 2 and 3 (default: 1.5)
    pub widen_factor: f64,

    /// Clustering epsilon scale for attempt 3 (default: 1.4)
    pub eps_factor: f64,

    /// Pane-gap scale for attempt 3 (default: 0.5)
    pub gap_shrink: f64,
}

impl Default for TunerParams {
    fn default() -> Self {
        TunerParams {
            cluster: ClusterParams::default(),
            panes: PaneParams::default(),
            tolerances: Tolerances::default(),
            max_attempts: 3,
            target_skip_rate: 0.25,
            widen_factor: 1.5,
            eps_factor: 1.4,
            gap_shrink: 0.5,
        }
    }
}

impl TunerParams {
    pub fn with_pane_count(mut self, count: usize) -> Self {
        self.panes = self.panes.with_pane_count(count);
        self
    }

    /// Parameters for a 1-based attempt number
    fn for_attempt(&self, attempt: usize) -> (ClusterParams, PaneParams, Tolerances) {
        match attempt {
            1 => (self.cluster, self.panes, self.tolerances),
            2 => (
                self.cluster,
                self.panes,
                self.tolerances.widened(self.widen_factor),
            ),
            _ => (
                self.cluster.widened(self.eps_factor),
                self.panes.shrunk(self.gap_shrink),
                self.tolerances.widened(self.widen_factor),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub page: usize,
    /// 1-based attempt that produced the kept result
    pub attempt: usize,
    pub columns: usize,
    pub panes: usize,
    pub report: AssemblyReport,
}

impl PageOutcome {
    pub fn score(&self) -> f64 {
        score(&self.report)
    }
}

fn score(report: &AssemblyReport) -> f64 {
    report.rows() as f64 - report.skip_rate()
}

/// One classify→cluster→partition→assemble pass with fixed parameters
fn attempt_page(
    page: usize,
    tokens: &[Token],
    game: &GameSpec,
    attempt: usize,
    params: &TunerParams,
) -> PageOutcome {
    let (cluster, panes_params, tolerances) = params.for_attempt(attempt);
    let columns = cluster_columns(tokens, &cluster);

    if non_noise_count(&columns) < 2 {
        return PageOutcome {
            page,
            attempt,
            columns: columns.len(),
            panes: 0,
            report: AssemblyReport::default(),
        };
    }

    let panes = partition_panes(&columns, &panes_params);
    let report = RowAssembler::new(game, tolerances).assemble(&panes);
    PageOutcome {
        page,
        attempt,
        columns: columns.len(),
        panes: panes.len(),
        report,
    }
}

/// Run up to `max_attempts` passes over one page and keep the best
pub fn tune_page(page: usize, tokens: &[Token], game: &GameSpec, params: &TunerParams) -> PageOutcome {
    let mut best: Option<PageOutcome> = None;

    for attempt in 1..=params.max_attempts.max(1) {
        let outcome = attempt_page(page, tokens, game, attempt, params);
        let skip_rate = outcome.report.skip_rate();
        debug!(
            page,
            attempt,
            rows = outcome.report.rows(),
            skips = outcome.report.skips.len(),
            skip_rate,
            "assembly attempt"
        );

        let better = best.as_ref().map_or(true, |b| outcome.score() > b.score());
        if better {
            best = Some(outcome);
        }

        if skip_rate <= params.target_skip_rate {
            break;
        }
    }

    let best = best.unwrap_or(PageOutcome {
        page,
        attempt: 1,
        columns: 0,
        panes: 0,
        report: AssemblyReport::default(),
    });

    if best.report.rows() == 0 {
        warn!(page, columns = best.columns, "page yielded zero rows");
    }
    best
}

/// Outcome of every page of one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentOutcome {
    pub pages: Vec<PageOutcome>,
}

impl DocumentOutcome {
    pub fn records(&self) -> Vec<DrawRecord> {
        self.pages
            .iter()
            .flat_map(|p| p.report.records.iter().cloned())
            .collect()
    }

    pub fn rows(&self) -> usize {
        self.pages.iter().map(|p| p.report.rows()).sum()
    }

    pub fn skips(&self) -> usize {
        self.pages.iter().map(|p| p.report.skips.len()).sum()
    }

    /// Merge every page report into one
    pub fn combined_report(&self) -> AssemblyReport {
        let mut combined = AssemblyReport::default();
        for p in &self.pages {
            combined.extend(p.report.clone());
        }
        combined
    }
}

/// Tune every page of a classified document independently
pub fn assemble_document(tokens: &[Token], game: &GameSpec, params: &TunerParams) -> DocumentOutcome {
    let pages = tokens_by_page(tokens)
        .into_iter()
        .map(|(page, page_tokens)| tune_page(page, &page_tokens, game, params))
        .collect();
    DocumentOutcome { pages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Session;
    use crate::token::TokenKind;

    fn pick3() -> GameSpec {
        GameSpec::new("pick3", 3)
            .with_session("M", Session::Midday)
            .with_session("E", Session::Evening)
    }

    fn t(page: usize, x: f64, y: f64, text: &str, kind: TokenKind) -> Token {
        Token::new(page, x, y, text, kind)
    }

    /// Rows 20pt apart whose dates sit `drift` points below the session baseline
    fn drifting_page(page: usize, drift: f64) -> Vec<Token> {
        let mut tokens = Vec::new();
        for (i, y) in [700.0, 680.0, 660.0, 640.0].iter().enumerate() {
            let session = if i % 2 == 0 { "E" } else { "M" };
            tokens.push(t(page, 10.0, y - drift, "Jun 1, 2024", TokenKind::Date));
            tokens.push(t(page, 60.0, *y, session, TokenKind::Session));
            for (j, x) in [75.0, 85.0, 95.0].iter().enumerate() {
                tokens.push(t(page, *x, *y, &j.to_string(), TokenKind::Digit));
            }
        }
        tokens
    }

    #[test]
    fn test_clean_page_stops_after_first_attempt() {
        let outcome = tune_page(0, &drifting_page(0, 0.0), &pick3(), &TunerParams::default());
        assert_eq!(outcome.attempt, 1);
        assert_eq!(outcome.report.rows(), 4);
    }

    #[test]
    fn test_widened_tolerance_recovers_drifting_dates() {
        // pitch 20 → baseline y_tol 7.0; dates 9pt off need the widened 10.5
        let outcome = tune_page(0, &drifting_page(0, 9.0), &pick3(), &TunerParams::default());
        assert_eq!(outcome.attempt, 2);
        assert_eq!(outcome.report.rows(), 4);
        assert!(outcome.report.skips.is_empty());
    }

    #[test]
    fn test_page_without_columns_yields_zero_rows() {
        let tokens = vec![t(0, 10.0, 700.0, "Lottery results", TokenKind::Noise)];
        let outcome = tune_page(0, &tokens, &pick3(), &TunerParams::default());
        assert_eq!(outcome.report.rows(), 0);
        assert_eq!(outcome.panes, 0);
    }

    #[test]
    fn test_document_pages_are_tuned_independently() {
        let mut tokens = drifting_page(0, 0.0);
        tokens.extend(drifting_page(1, 9.0));
        let doc = assemble_document(&tokens, &pick3(), &TunerParams::default());
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].attempt, 1);
        assert_eq!(doc.pages[1].attempt, 2);
        assert_eq!(doc.rows(), 8);
        assert_eq!(doc.records().len(), 8);
        assert_eq!(doc.skips(), 0);
    }
}
