//! Block metrics and the ternary regime classifier (§4.4).
//!
//! Every rule here is authoritative and fixed — it is never tuned per
//! dataset or made configurable, so the classifier's output is as
//! deterministic as the codecs it feeds.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Ordered,
    Chaotic,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockMetrics {
    pub unique_ratio: f64,
    pub zero_ratio: f64,
    pub sign_flip_rate: f64,
    pub monotonicity: f64,
    pub mean_abs_delta: f64,
    pub p90_abs_delta: f64,
    pub mean_abs_dod: f64,
    pub p90_abs_dod: f64,
    pub zero_dod_ratio: f64,
    pub unique_delta_ratio: f64,
    pub unique_dod_ratio: f64,
    pub outlier_ratio: f64,
    pub regime: Regime,
}

impl BlockMetrics {
    /// Metrics for an empty block: all zero, regime Ordered (vacuously —
    /// `unique_ratio < 0.05` holds for an empty set by convention here).
    pub fn empty() -> Self {
        BlockMetrics {
            unique_ratio: 0.0,
            zero_ratio: 0.0,
            sign_flip_rate: 0.0,
            monotonicity: 0.0,
            mean_abs_delta: 0.0,
            p90_abs_delta: 0.0,
            mean_abs_dod: 0.0,
            p90_abs_dod: 0.0,
            zero_dod_ratio: 0.0,
            unique_delta_ratio: 0.0,
            unique_dod_ratio: 0.0,
            outlier_ratio: 0.0,
            regime: Regime::Ordered,
        }
    }
}

fn p90(sorted_abs: &[i64]) -> f64 {
    if sorted_abs.is_empty() {
        return 0.0;
    }
    let idx = ((sorted_abs.len() as f64) * 0.9).floor() as usize;
    let idx = idx.min(sorted_abs.len() - 1);
    sorted_abs[idx] as f64
}

/// Compute the full metrics set over one block in a single conceptual pass
/// (the implementation makes a small, fixed number of linear scans over the
/// block and its derived delta/DoD sequences, not per-element repeated work).
pub fn compute_metrics(raw: &[i64]) -> BlockMetrics {
    let n = raw.len();
    if n == 0 {
        return BlockMetrics::empty();
    }

    let unique: HashSet<i64> = raw.iter().copied().collect();
    let unique_ratio = unique.len() as f64 / n as f64;
    let zero_count = raw.iter().filter(|&&v| v == 0).count();
    let zero_ratio = zero_count as f64 / n as f64;

    let deltas: Vec<i64> = raw.windows(2).map(|w| w[1].wrapping_sub(w[0])).collect();
    let dod: Vec<i64> = deltas.windows(2).map(|w| w[1].wrapping_sub(w[0])).collect();

    let sign_flip_count = deltas
        .windows(2)
        .filter(|w| (w[0] > 0 && w[1] < 0) || (w[0] < 0 && w[1] > 0))
        .count();
    let sign_flip_rate = if deltas.len() > 1 { sign_flip_count as f64 / (deltas.len() - 1) as f64 } else { 0.0 };

    let non_decreasing = deltas.iter().filter(|&&d| d >= 0).count();
    let non_increasing = deltas.iter().filter(|&&d| d <= 0).count();
    let monotonicity = if deltas.is_empty() {
        0.0
    } else {
        non_decreasing.max(non_increasing) as f64 / deltas.len() as f64
    };

    let abs_deltas: Vec<i64> = deltas.iter().map(|d| d.unsigned_abs() as i64).collect();
    let mean_abs_delta = if abs_deltas.is_empty() {
        0.0
    } else {
        abs_deltas.iter().sum::<i64>() as f64 / abs_deltas.len() as f64
    };
    let mut sorted_abs_delta = abs_deltas.clone();
    sorted_abs_delta.sort_unstable();
    let p90_abs_delta = p90(&sorted_abs_delta);

    let abs_dod: Vec<i64> = dod.iter().map(|d| d.unsigned_abs() as i64).collect();
    let mean_abs_dod = if abs_dod.is_empty() {
        0.0
    } else {
        abs_dod.iter().sum::<i64>() as f64 / abs_dod.len() as f64
    };
    let mut sorted_abs_dod = abs_dod.clone();
    sorted_abs_dod.sort_unstable();
    let p90_abs_dod = p90(&sorted_abs_dod);

    let zero_dod_count = dod.iter().filter(|&&d| d == 0).count();
    let zero_dod_ratio = if dod.is_empty() { 0.0 } else { zero_dod_count as f64 / dod.len() as f64 };

    let unique_delta: HashSet<i64> = deltas.iter().copied().collect();
    let unique_delta_ratio = if deltas.is_empty() { 0.0 } else { unique_delta.len() as f64 / deltas.len() as f64 };

    let unique_dod: HashSet<i64> = dod.iter().copied().collect();
    let unique_dod_ratio = if dod.is_empty() { 0.0 } else { unique_dod.len() as f64 / dod.len() as f64 };

    let outlier_count = if mean_abs_delta > 0.0 {
        abs_deltas.iter().filter(|&&d| (d as f64) > 5.0 * mean_abs_delta).count()
    } else {
        0
    };
    let outlier_ratio = if abs_deltas.is_empty() { 0.0 } else { outlier_count as f64 / abs_deltas.len() as f64 };

    let regime = classify_regime(unique_ratio, monotonicity, sign_flip_rate, outlier_ratio);

    BlockMetrics {
        unique_ratio,
        zero_ratio,
        sign_flip_rate,
        monotonicity,
        mean_abs_delta,
        p90_abs_delta,
        mean_abs_dod,
        p90_abs_dod,
        zero_dod_ratio,
        unique_delta_ratio,
        unique_dod_ratio,
        outlier_ratio,
        regime,
    }
}

/// Ternary classification, authoritative per §4.4:
/// ORDERED if monotonicity>0.9 or unique_ratio<0.05;
/// CHAOTIC if (sign_flip_rate>0.4 and unique_ratio>0.8) or outlier_ratio>0.1;
/// MIXED otherwise.
fn classify_regime(unique_ratio: f64, monotonicity: f64, sign_flip_rate: f64, outlier_ratio: f64) -> Regime {
    if monotonicity > 0.9 || unique_ratio < 0.05 {
        Regime::Ordered
    } else if (sign_flip_rate > 0.4 && unique_ratio > 0.8) || outlier_ratio > 0.1 {
        Regime::Chaotic
    } else {
        Regime::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_is_zero_metrics() {
        let m = compute_metrics(&[]);
        assert_eq!(m, BlockMetrics::empty());
    }

    #[test]
    fn linear_trend_is_ordered() {
        let raw: Vec<i64> = (0..1000).map(|i| 1000 + 10 * i).collect();
        let m = compute_metrics(&raw);
        assert_eq!(m.regime, Regime::Ordered);
        assert!(m.monotonicity > 0.9);
    }

    #[test]
    fn constant_block_is_ordered_by_low_unique_ratio() {
        let raw = vec![42i64; 500];
        let m = compute_metrics(&raw);
        assert_eq!(m.regime, Regime::Ordered);
        assert!(m.unique_ratio < 0.05);
    }

    #[test]
    fn high_entropy_alternating_is_chaotic_or_mixed() {
        // Alternating +1/-1 deltas around a wide spread of values: high
        // sign-flip rate and high uniqueness should land in CHAOTIC.
        let mut raw = Vec::new();
        let mut v = 0i64;
        for i in 0..1000 {
            v += if i % 2 == 0 { 1_000_003 } else { -999_999 };
            raw.push(v);
        }
        let m = compute_metrics(&raw);
        assert!(matches!(m.regime, Regime::Chaotic | Regime::Mixed));
    }

    #[test]
    fn zero_dod_ratio_high_for_constant_delta() {
        let raw: Vec<i64> = (0..100).map(|i| i * 7).collect();
        let m = compute_metrics(&raw);
        assert!(m.zero_dod_ratio > 0.9);
    }
}
