// 📏 Column Clusterer - group tokens sharing an x position into vertical columns
// Adaptive gap threshold: a clamped fraction of the median spacing between distinct x values

use crate::token::{Token, TokenKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub center_x: f64,
    pub kind: TokenKind,
    /// Sorted by y descending (top of page first)
    pub tokens: Vec<Token>,
}

impl Column {
    pub fn is_noise(&self) -> bool {
        self.kind == TokenKind::Noise
    }

    /// Tokens of one kind in this column
    pub fn tokens_of(&self, kind: TokenKind) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(move |t| t.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Epsilon as a fraction of the median gap (default: 0.35)
    pub eps_fraction: f64,

    /// Lower clamp for epsilon in points (default: 2.0)
    pub eps_min: f64,

    /// Upper clamp for epsilon in points (default: 18.0)
    pub eps_max: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            eps_fraction: 0.35,
            eps_min: 2.0,
            eps_max: 18.0,
        }
    }
}

impl ClusterParams {
    /// Looser clustering used by the last tuner attempt
    pub fn widened(&self, factor: f64) -> Self {
        ClusterParams {
            eps_fraction: self.eps_fraction * factor,
            eps_min: self.eps_min,
            eps_max: self.eps_max * factor,
        }
    }
}

/// Median of an unsorted slice; None when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Distinct x values rounded to whole points, ascending
fn distinct_xs(tokens: &[Token]) -> Vec<f64> {
    let mut xs: Vec<f64> = tokens.iter().map(|t| t.x.round()).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    xs.dedup();
    xs
}

/// Adaptive epsilon for a set of sorted distinct x values
pub fn adaptive_epsilon(xs: &[f64], params: &ClusterParams) -> f64 {
    let gaps: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let median_gap = median(&gaps).unwrap_or(params.eps_max);
    (median_gap * params.eps_fraction).clamp(params.eps_min, params.eps_max)
}

/// Cluster one page's tokens into columns, left to right
pub fn cluster_columns(tokens: &[Token], params: &ClusterParams) -> Vec<Column> {
    let xs = distinct_xs(tokens);
    if xs.is_empty() {
        return Vec::new();
    }

    let eps = adaptive_epsilon(&xs, params);

    // Sweep: a gap wider than eps starts a new column
    let mut groups: Vec<Vec<f64>> = vec![vec![xs[0]]];
    for pair in xs.windows(2) {
        if pair[1] - pair[0] > eps {
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(pair[1]);
        }
    }

    let centers: Vec<f64> = groups
        .iter()
        .map(|g| g.iter().sum::<f64>() / g.len() as f64)
        .collect();

    let mut buckets: Vec<Vec<Token>> = vec![Vec::new(); centers.len()];
    for token in tokens {
        let nearest = centers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (token.x - **a).abs().total_cmp(&(token.x - **b).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        buckets[nearest].push(token.clone());
    }

    centers
        .into_iter()
        .zip(buckets)
        .filter(|(_, tokens)| !tokens.is_empty())
        .map(|(center_x, mut tokens)| {
            tokens.sort_by(|a, b| b.y.total_cmp(&a.y));
            let kind = tokens
                .iter()
                .map(|t| t.kind)
                .min_by_key(|k| k.priority())
                .unwrap_or(TokenKind::Noise);
            Column {
                center_x,
                kind,
                tokens,
            }
        })
        .collect()
}

/// Count of columns a row assembler can use
pub fn non_noise_count(columns: &[Column]) -> usize {
    columns.iter().filter(|c| !c.is_noise()).count()
}
