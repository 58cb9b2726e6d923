// 🪟 Pane Partitioner - split a page's columns into side-by-side mini-tables
// Anchors on date columns; falls back to 1-D k-means when dates are too few

use crate::columns::Column;
use crate::token::{Token, TokenKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Pane {
    pub index: usize,
    pub min_x: f64,
    pub max_x: f64,
    pub columns: Vec<Column>,
}

impl Pane {
    /// All tokens of one kind across the pane's columns
    pub fn tokens_of(&self, kind: TokenKind) -> impl Iterator<Item = &Token> {
        self.columns
            .iter()
            .flat_map(move |c| c.tokens.iter().filter(move |t| t.kind == kind))
    }

    pub fn digit_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.kind == TokenKind::Digit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaneParams {
    /// Expected panes per page (default: 3)
    pub pane_count: usize,

    /// Anchors closer than this are the same pane (default: 40pt)
    pub min_pane_gap: f64,

    /// k-means iteration cap (default: 50)
    pub max_iterations: usize,
}

impl Default for PaneParams {
    fn default() -> Self {
        PaneParams {
            pane_count: 3,
            min_pane_gap: 40.0,
            max_iterations: 50,
        }
    }
}

impl PaneParams {
    pub fn with_pane_count(mut self, count: usize) -> Self {
        self.pane_count = count.max(1);
        self
    }

    /// Smaller pane gap, used by the last tuner attempt
    pub fn shrunk(&self, factor: f64) -> Self {
        PaneParams {
            min_pane_gap: self.min_pane_gap * factor,
            ..*self
        }
    }
}

// ============================================================================
// ANCHORS
// ============================================================================

fn sorted_distinct(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.map(|x| x.round()).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup();
    v
}

/// Leftmost, rightmost, then greedily the center farthest (in min-distance) from those chosen
pub fn choose_date_anchors(centers: &[f64], k: usize) -> Vec<f64> {
    if centers.is_empty() || k == 0 {
        return Vec::new();
    }
    if k == 1 {
        return vec![centers[0]];
    }

    let mut chosen = vec![centers[0], centers[centers.len() - 1]];
    while chosen.len() < k {
        let next = centers
            .iter()
            .filter(|c| !chosen.contains(c))
            .map(|c| {
                let d = chosen
                    .iter()
                    .map(|a| (c - a).abs())
                    .fold(f64::INFINITY, f64::min);
                (*c, d)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match next {
            Some((c, _)) => chosen.push(c),
            None => break,
        }
    }

    chosen.sort_by(|a, b| a.total_cmp(b));
    chosen.dedup();
    chosen
}

/// Deterministic 1-D k-means with quantile seeding. Returns sorted centers.
pub fn kmeans_1d(values: &[f64], k: usize, max_iterations: usize) -> Vec<f64> {
    if values.len() <= k {
        return values.to_vec();
    }
    let n = values.len();
    let mut centers: Vec<f64> = if k == 1 {
        vec![values.iter().sum::<f64>() / n as f64]
    } else {
        (0..k).map(|i| values[i * (n - 1) / (k - 1)]).collect()
    };

    let nearest = |centers: &[f64], v: f64| -> usize {
        centers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (v - **a).abs().total_cmp(&(v - **b).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };

    let mut assignment: Vec<usize> = values.iter().map(|v| nearest(&centers, *v)).collect();
    for iteration in 0..max_iterations {
        for (ci, center) in centers.iter_mut().enumerate() {
            let members: Vec<f64> = values
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == ci)
                .map(|(v, _)| *v)
                .collect();
            if !members.is_empty() {
                *center = members.iter().sum::<f64>() / members.len() as f64;
            }
        }

        let next: Vec<usize> = values.iter().map(|v| nearest(&centers, *v)).collect();
        if next == assignment {
            debug!(iterations = iteration + 1, "k-means converged");
            break;
        }
        assignment = next;
    }

    centers.sort_by(|a, b| a.total_cmp(b));
    centers
}

fn merge_close_anchors(anchors: Vec<f64>, min_gap: f64) -> Vec<f64> {
    let mut merged: Vec<f64> = Vec::with_capacity(anchors.len());
    for a in anchors {
        match merged.last() {
            Some(last) if a - last < min_gap => {}
            _ => merged.push(a),
        }
    }
    merged
}

fn boundaries_of(anchors: &[f64]) -> Vec<f64> {
    anchors.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
}

fn bucket_index(boundaries: &[f64], x: f64) -> usize {
    boundaries.iter().filter(|b| x >= **b).count()
}

/// Drop anchors whose pane would own no date column; a dateless cluster is the
/// right-hand part of the pane to its left. Leaves the anchors alone if none own a date.
fn keep_date_owning(mut anchors: Vec<f64>, columns: &[&Column]) -> Vec<f64> {
    loop {
        let boundaries = boundaries_of(&anchors);
        let mut owns_date = vec![false; anchors.len()];
        for col in columns.iter().filter(|c| c.kind == TokenKind::Date) {
            owns_date[bucket_index(&boundaries, col.center_x)] = true;
        }
        if owns_date.iter().all(|o| *o) || !owns_date.iter().any(|o| *o) {
            return anchors;
        }
        anchors = anchors
            .into_iter()
            .zip(owns_date)
            .filter(|(_, owns)| *owns)
            .map(|(a, _)| a)
            .collect();
    }
}

// ============================================================================
// PARTITION
// ============================================================================

/// Partition the non-noise columns of a page into panes, left to right
pub fn partition_panes(columns: &[Column], params: &PaneParams) -> Vec<Pane> {
    let usable: Vec<&Column> = columns.iter().filter(|c| !c.is_noise()).collect();
    if usable.is_empty() {
        return Vec::new();
    }

    let k = params.pane_count.max(1);
    let date_centers = sorted_distinct(
        usable
            .iter()
            .filter(|c| c.kind == TokenKind::Date)
            .map(|c| c.center_x),
    );

    let anchors = if date_centers.len() >= k {
        choose_date_anchors(&date_centers, k)
    } else {
        let all_centers = sorted_distinct(usable.iter().map(|c| c.center_x));
        debug!(
            date_columns = date_centers.len(),
            "too few date anchors, falling back to k-means"
        );
        kmeans_1d(&all_centers, k, params.max_iterations)
    };
    let anchors = keep_date_owning(merge_close_anchors(anchors, params.min_pane_gap), &usable);

    let boundaries = boundaries_of(&anchors);
    let mut buckets: Vec<Vec<Column>> = vec![Vec::new(); boundaries.len() + 1];
    for col in usable {
        buckets[bucket_index(&boundaries, col.center_x)].push(col.clone());
    }

    buckets
        .into_iter()
        .filter(|cols| !cols.is_empty())
        .enumerate()
        .map(|(index, columns)| {
            let min_x = columns
                .iter()
                .map(|c| c.center_x)
                .fold(f64::INFINITY, f64::min);
            let max_x = columns
                .iter()
                .map(|c| c.center_x)
                .fold(f64::NEG_INFINITY, f64::max);
            Pane {
                index,
                min_x,
                max_x,
                columns,
            }
        })
        .collect()
}
