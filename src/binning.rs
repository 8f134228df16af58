// 📊 Quantile binning - equal-frequency buckets, pandas `qcut` semantics
//
// Reproduces `pd.qcut(x, q, labels=False)` exactly:
// - edges are the linearly interpolated i/q quantiles of the defined values
//   (numpy "linear" method, including its lerp formulation)
// - a value lands in the lowest bin whose upper edge is >= the value
//   (right-closed bins), and the minimum belongs to bin 0
// - repeated edges are an error (pandas `duplicates="raise"`)
// - undefined values get no bin and do not move the edges
//
// Deterministic: no randomness, ties resolve by value alone.

use crate::error::{PipelineError, Result};

/// Five equal-frequency bins
pub const QUINTILES: usize = 5;

/// Ten equal-frequency bins
pub const DECILES: usize = 10;

/// numpy's lerp: computed from whichever end is closer for accuracy
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    let diff = b - a;
    if t >= 0.5 {
        b - diff * (1.0 - t)
    } else {
        a + diff * t
    }
}

/// q + 1 bin edges over already sorted, finite values
pub fn quantile_edges(sorted: &[f64], q: usize) -> Vec<f64> {
    let n = sorted.len();
    if n == 0 || q == 0 {
        return Vec::new();
    }

    (0..=q)
        .map(|i| {
            let h = (n - 1) as f64 * (i as f64 / q as f64);
            let lo = h.floor() as usize;
            if lo + 1 >= n {
                sorted[n - 1]
            } else {
                lerp(sorted[lo], sorted[lo + 1], h - lo as f64)
            }
        })
        .collect()
}

/// Bin index of one value given edges (right-closed, lowest edge included)
fn bin_of(value: f64, edges: &[f64]) -> Option<usize> {
    let first = *edges.first()?;
    let last = *edges.last()?;
    if value < first || value > last {
        return None;
    }
    if value == first {
        return Some(0);
    }
    // first edge >= value
    let idx = edges.partition_point(|e| *e < value);
    Some(idx - 1)
}

/// Assign each value to one of `q` equal-frequency bins (0 = lowest)
///
/// Non-finite and missing values get None.
pub fn qcut(values: &[Option<f64>], q: usize) -> Result<Vec<Option<usize>>> {
    if q == 0 {
        return Err(PipelineError::Classification("number of bins must be positive".to_string()));
    }

    let mut sorted: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Ok(vec![None; values.len()]);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let edges = quantile_edges(&sorted, q);
    if edges.windows(2).any(|w| w[0] == w[1]) {
        return Err(PipelineError::Classification(format!(
            "bin edges must be unique: {:?} ({} values into {} bins)",
            edges,
            sorted.len(),
            q
        )));
    }

    Ok(values
        .iter()
        .map(|v| v.filter(|x| x.is_finite()).and_then(|x| bin_of(x, &edges)))
        .collect())
}
