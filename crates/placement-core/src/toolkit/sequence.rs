//! Recurring subsequence search using dynamic time warping
//!
//! Windows of the input series are compared with a banded DTW distance,
//! normalized by window length and by the value range of the series so a
//! single threshold works for any signal scale.

use serde::{Deserialize, Serialize};

/// Below this range the series is treated as flat
const FLAT_RANGE_EPSILON: f64 = 1e-12;

/// A subsequence that recurs at least twice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePattern {
    pub length: usize,
    /// Start offsets of non-overlapping occurrences, ascending
    pub occurrences: Vec<usize>,
    /// Mean normalized distance of the occurrences to the first one
    pub mean_distance: f64,
    /// Element-wise mean over all occurrences
    pub centroid: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SequenceMatcher {
    threshold: f64,
    band: Option<usize>,
}

impl SequenceMatcher {
    /// `threshold` is a normalized distance; `band` limits warping to a
    /// Sakoe-Chiba window of that many steps
    pub fn new(threshold: f64, band: Option<usize>) -> Self {
        Self { threshold, band }
    }

    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        dtw_distance(a, b, self.band)
    }

    /// Find recurring windows of length `min_len..=max_len`.
    ///
    /// For each length, windows are taken greedily left to right; a window
    /// becomes an anchor and collects every later non-overlapping window
    /// within the threshold. Anchors with fewer than two occurrences are
    /// discarded.
    pub fn discover_patterns(
        &self,
        series: &[f64],
        min_len: usize,
        max_len: usize,
    ) -> Vec<SequencePattern> {
        let n = series.len();
        let min_len = min_len.max(1);
        if n < 2 * min_len {
            return Vec::new();
        }

        let (lo, hi) = series
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = (hi - lo).max(FLAT_RANGE_EPSILON);

        let mut patterns = Vec::new();
        for len in min_len..=max_len.min(n / 2) {
            let mut claimed = vec![false; n];
            for anchor in 0..=n - len {
                if claimed[anchor..anchor + len].iter().any(|c| *c) {
                    continue;
                }
                let reference = &series[anchor..anchor + len];
                let mut occurrences = vec![anchor];
                let mut distances = Vec::new();
                let mut next_free = anchor + len;

                for start in anchor + len..=n - len {
                    if start < next_free || claimed[start..start + len].iter().any(|c| *c) {
                        continue;
                    }
                    let d = self.distance(reference, &series[start..start + len])
                        / (len as f64 * range);
                    if d <= self.threshold {
                        occurrences.push(start);
                        distances.push(d);
                        next_free = start + len;
                    }
                }

                if occurrences.len() < 2 {
                    continue;
                }
                for &start in &occurrences {
                    claimed[start..start + len].iter_mut().for_each(|c| *c = true);
                }
                let centroid = (0..len)
                    .map(|i| {
                        occurrences.iter().map(|&s| series[s + i]).sum::<f64>()
                            / occurrences.len() as f64
                    })
                    .collect();
                patterns.push(SequencePattern {
                    length: len,
                    mean_distance: distances.iter().sum::<f64>() / distances.len() as f64,
                    occurrences,
                    centroid,
                });
            }
        }
        patterns
    }
}

/// Banded DTW with absolute-difference cost
pub fn dtw_distance(a: &[f64], b: &[f64], band: Option<usize>) -> f64 {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return if n == m { 0.0 } else { f64::INFINITY };
    }
    let window = band.map_or(usize::MAX, |w| w.max(n.abs_diff(m)));

    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr.iter_mut().for_each(|c| *c = f64::INFINITY);
        let j_lo = if window == usize::MAX { 1 } else { i.saturating_sub(window).max(1) };
        let j_hi = if window == usize::MAX { m } else { (i + window).min(m) };
        for j in j_lo..=j_hi {
            let cost = (a[i - 1] - b[j - 1]).abs();
            curr[j] = cost + prev[j].min(curr[j - 1]).min(prev[j - 1]);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}
