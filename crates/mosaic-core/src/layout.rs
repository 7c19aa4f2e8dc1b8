//! Grid layout search.
//!
//! A single divisor `i` drives both axes: `rows = height / i` and
//! `columns = width / i`. Candidates pass two filters in sequence. The first
//! uses the caller's tolerance during the sweep, the second keeps only cell
//! counts within [`SECONDARY_PAX_TOLERANCE`] of the target, whatever the
//! caller asked for.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{CoreError, ImageDimensions};

/// Fixed refinement band applied after the sweep.
pub const SECONDARY_PAX_TOLERANCE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutQuery {
    pub target_pax: i64,
    pub tolerance: i64,
}

impl LayoutQuery {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.target_pax < 0 {
            return Err(CoreError::InvalidInput(format!(
                "target pax must not be negative (received {})",
                self.target_pax
            )));
        }
        if self.tolerance < 0 {
            return Err(CoreError::InvalidInput(format!(
                "tolerance must not be negative (received {})",
                self.tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutCandidate {
    pub rows: u32,
    pub columns: u32,
    pub cell_width: f64,
    pub cell_height: f64,
    pub pax: u64,
}

/// Inclusive `[target - tolerance, target + tolerance]` check.
pub fn within_band(pax: u64, target: i64, tolerance: i64) -> bool {
    let pax = pax as i128;
    let target = target as i128;
    let tolerance = tolerance as i128;
    target - tolerance <= pax && pax <= target + tolerance
}

pub fn solve_layouts(dimensions: ImageDimensions, query: &LayoutQuery) -> Vec<LayoutCandidate> {
    solve_grid_layouts(dimensions.width, dimensions.height, query.target_pax, query.tolerance)
}

/// Enumerates distinct `(rows, columns)` partitions of a `width` x `height`
/// image whose cell count is near `target_pax`.
///
/// Output order follows the divisor that first produced each pair. An empty
/// vector means no layout fits. Zero dimensions yield an empty result.
pub fn solve_grid_layouts(width: u32, height: u32, target_pax: i64, tolerance: i64) -> Vec<LayoutCandidate> {
    let swept = sweep_divisors(width, height, target_pax, tolerance);
    apply_secondary_filter(swept, target_pax)
}

fn sweep_divisors(width: u32, height: u32, target_pax: i64, tolerance: i64) -> Vec<LayoutCandidate> {
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    let mut accepted = Vec::new();

    for i in 1..=width.min(height) {
        let rows = height / i;
        let columns = width / i;
        let pax = u64::from(rows) * u64::from(columns);

        if !within_band(pax, target_pax, tolerance) {
            continue;
        }
        if !seen.insert((rows, columns)) {
            continue;
        }
        accepted.push(LayoutCandidate {
            rows,
            columns,
            cell_width: f64::from(width) / f64::from(columns),
            cell_height: f64::from(height) / f64::from(rows),
            pax,
        });
    }
    accepted
}

fn apply_secondary_filter(candidates: Vec<LayoutCandidate>, target_pax: i64) -> Vec<LayoutCandidate> {
    candidates
        .into_iter()
        .filter(|candidate| within_band(candidate.pax, target_pax, SECONDARY_PAX_TOLERANCE))
        .collect()
}
