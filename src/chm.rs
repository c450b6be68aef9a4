//! Compression Health Monitor — the two-state machine that routes each
//! block to CORE or QUARANTINE based on entropy and compression-ratio
//! anomalies, and trains the EMA baselines that future decisions use
//! (§4.6).
//!
//! One `CompressionHealthMonitor` per stream. `update` is the single writer
//! of all monitor state; `decide_route` is read-mostly except for the
//! recovery counter it advances while probing during quarantine.

use crate::metrics::BlockMetrics;

const EMA_ALPHA: f64 = 0.1;
const TRIGGER_K: f64 = 3.0;
const RECOVERY_K: f64 = 10.0;
const MIN_SIGMA: f64 = 0.1;

/// Per-block flags written into the manifest entry (§6 "Block flags").
pub mod block_flags {
    pub const NONE: u8 = 0;
    pub const ANOMALY_START: u8 = 1;
    pub const ANOMALY_MID: u8 = 2;
    pub const ANOMALY_END: u8 = 4;
    pub const HEALTH_WARN: u8 = 8;
    pub const HEALTH_QUAR: u8 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChmState {
    Normal,
    QuarantineActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineReason {
    EntropyGate,
    RatioDrop,
    EntropyBurst,
    StillQuarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Core,
    Quarantine(QuarantineReason),
}

impl Route {
    pub fn is_quarantine(&self) -> bool {
        matches!(self, Route::Quarantine(_))
    }
}

/// The portable slice of monitor state a caller can carry across encoder
/// runs when operating in explicit continuity mode (§9). Deliberately does
/// not implement the shared-singleton pattern the source used: the caller
/// owns this value and threads it through by hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChmContinuity {
    pub state: ChmState,
    pub baseline_ratio: f64,
    pub baseline_dev: f64,
    pub baseline_entropy: f64,
    pub frozen_ratio: f64,
    pub recovery_counter: u32,
}

#[derive(Debug, Clone)]
pub struct AnomalySegment {
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub reason: QuarantineReason,
    pub min_ratio_observed: f64,
    pub max_unique_ratio_observed: f64,
    pub probe_attempts: u32,
    pub probe_successes: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ChmStats {
    pub core_input_bytes: u64,
    pub core_output_bytes: u64,
    pub core_block_count: u64,
    pub quar_input_bytes: u64,
    pub quar_output_bytes: u64,
    pub quar_block_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct WorstBlock {
    block_index: u64,
    ratio: f64,
}

/// Structured output of a finished (or in-progress) monitoring run (§4.6
/// "Reporting").
#[derive(Debug, Clone)]
pub struct ChmReport {
    pub run_id: String,
    pub format_version: u8,
    pub anomaly_segments: Vec<AnomalySegment>,
    pub worst_blocks: Vec<(u64, f64)>,
}

pub struct CompressionHealthMonitor {
    state: ChmState,
    baseline_ratio: f64,
    baseline_dev: f64,
    baseline_entropy: f64,
    frozen_ratio: f64,
    probe_interval: u64,
    recovery_counter: u32,
    stats: ChmStats,
    anomaly_history: Vec<AnomalySegment>,
    current_anomaly: Option<AnomalySegment>,
    worst_blocks: Vec<WorstBlock>,
    run_id: String,
    format_version: u8,
}

/// Recovery target (§4.6 "recovery count M = 3").
pub const RECOVERY_COUNT_TARGET: u32 = 3;

impl CompressionHealthMonitor {
    pub fn new(probe_interval: u64, run_id: String, format_version: u8) -> Self {
        CompressionHealthMonitor {
            state: ChmState::Normal,
            baseline_ratio: 2.0,
            baseline_dev: 0.5,
            baseline_entropy: 0.5,
            frozen_ratio: 2.0,
            probe_interval: probe_interval.max(1),
            recovery_counter: 0,
            stats: ChmStats::default(),
            anomaly_history: Vec::new(),
            current_anomaly: None,
            worst_blocks: Vec::new(),
            run_id,
            format_version,
        }
    }

    pub fn state(&self) -> ChmState {
        self.state
    }

    pub fn stats(&self) -> &ChmStats {
        &self.stats
    }

    /// Entropy proxy fed into the EMA and burst test: the mean of the
    /// block's raw-value and delta uniqueness ratios. Neither `spec.md` nor
    /// the original source defines "entropy" as a standalone `BlockMetrics`
    /// field, so this combines the two uniqueness signals the entropy gate
    /// already consults into one scalar (documented as an open-question
    /// resolution).
    fn entropy_of(metrics: &BlockMetrics) -> f64 {
        (metrics.unique_ratio + metrics.unique_delta_ratio) / 2.0
    }

    /// Effective sigma: `max(baseline_dev, 0.1)`, capped so that
    /// `3 * sigma' <= 0.9 * baseline_ratio`.
    fn effective_sigma(&self) -> f64 {
        let sigma = self.baseline_dev.max(MIN_SIGMA);
        let cap = 0.3 * self.baseline_ratio;
        sigma.min(cap.max(0.0))
    }

    /// Decide CORE vs QUARANTINE for one block (§4.6 "Per-block operation").
    ///
    /// `probe_ratio` is the caller's ratio for the candidate encoding under
    /// evaluation this call: the real candidate while NORMAL, or a dry-run
    /// re-encode under a cloned context while QUARANTINE_ACTIVE and
    /// `block_index` falls on a probe boundary.
    pub fn decide_route(&mut self, metrics: &BlockMetrics, probe_ratio: f64, block_index: u64) -> Route {
        if metrics.unique_ratio > 0.85 && metrics.unique_delta_ratio > 0.85 {
            return Route::Quarantine(QuarantineReason::EntropyGate);
        }

        match self.state {
            ChmState::Normal => {
                let sigma_prime = self.effective_sigma();
                let entropy = Self::entropy_of(metrics);
                if probe_ratio < self.baseline_ratio - TRIGGER_K * sigma_prime {
                    Route::Quarantine(QuarantineReason::RatioDrop)
                } else if entropy > 1.5 * self.baseline_entropy
                    && entropy > 0.5
                    && probe_ratio < self.baseline_ratio
                {
                    Route::Quarantine(QuarantineReason::EntropyBurst)
                } else {
                    Route::Core
                }
            }
            ChmState::QuarantineActive => {
                if block_index % self.probe_interval != 0 {
                    return Route::Quarantine(QuarantineReason::StillQuarantine);
                }
                let sigma_prime = self.effective_sigma();
                if let Some(seg) = self.current_anomaly.as_mut() {
                    seg.probe_attempts += 1;
                }
                if probe_ratio >= self.frozen_ratio - RECOVERY_K * sigma_prime {
                    self.recovery_counter += 1;
                    if let Some(seg) = self.current_anomaly.as_mut() {
                        seg.probe_successes += 1;
                    }
                    if self.recovery_counter >= RECOVERY_COUNT_TARGET {
                        Route::Core
                    } else {
                        Route::Quarantine(QuarantineReason::StillQuarantine)
                    }
                } else {
                    self.recovery_counter = 0;
                    Route::Quarantine(QuarantineReason::StillQuarantine)
                }
            }
        }
    }

    /// Apply the effects of a routing decision: track stats, manage the
    /// anomaly-segment timeline, compute the block's flag byte, and train
    /// baselines when eligible (§4.6 "Per-block `update`").
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        route: Route,
        metrics: &BlockMetrics,
        probe_ratio: f64,
        block_index: u64,
        input_bytes: u64,
        output_bytes: u64,
    ) -> u8 {
        let mut flags = block_flags::NONE;
        let entropy = Self::entropy_of(metrics);

        match route {
            Route::Quarantine(reason) => {
                self.stats.quar_input_bytes += input_bytes;
                self.stats.quar_output_bytes += output_bytes;
                self.stats.quar_block_count += 1;
                flags |= block_flags::HEALTH_QUAR;

                if self.current_anomaly.is_none() {
                    self.frozen_ratio = self.baseline_ratio;
                    self.recovery_counter = 0;
                    self.current_anomaly = Some(AnomalySegment {
                        start_block: block_index,
                        end_block: None,
                        reason,
                        min_ratio_observed: probe_ratio,
                        max_unique_ratio_observed: metrics.unique_ratio,
                        probe_attempts: 0,
                        probe_successes: 0,
                    });
                    flags |= block_flags::ANOMALY_START;
                } else {
                    flags |= block_flags::ANOMALY_MID;
                }
                if let Some(seg) = self.current_anomaly.as_mut() {
                    seg.min_ratio_observed = seg.min_ratio_observed.min(probe_ratio);
                    seg.max_unique_ratio_observed = seg.max_unique_ratio_observed.max(metrics.unique_ratio);
                }
                self.state = ChmState::QuarantineActive;
            }
            Route::Core => {
                self.stats.core_input_bytes += input_bytes;
                self.stats.core_output_bytes += output_bytes;
                self.stats.core_block_count += 1;

                let was_quarantined = self.current_anomaly.is_some();
                if was_quarantined {
                    if let Some(mut seg) = self.current_anomaly.take() {
                        seg.end_block = Some(block_index);
                        self.anomaly_history.push(seg);
                    }
                    flags |= block_flags::ANOMALY_END;
                    self.recovery_counter = 0;
                }
                self.state = ChmState::Normal;

                let sigma_prime = self.effective_sigma();
                let near_trigger = probe_ratio < self.baseline_ratio - 0.5 * TRIGGER_K * sigma_prime;
                if near_trigger {
                    flags |= block_flags::HEALTH_WARN;
                }

                if !was_quarantined && entropy <= 0.8 {
                    self.baseline_ratio = EMA_ALPHA * probe_ratio + (1.0 - EMA_ALPHA) * self.baseline_ratio;
                    let dev = (probe_ratio - self.baseline_ratio).abs();
                    self.baseline_dev = EMA_ALPHA * dev + (1.0 - EMA_ALPHA) * self.baseline_dev;
                    self.baseline_entropy = EMA_ALPHA * entropy + (1.0 - EMA_ALPHA) * self.baseline_entropy;
                }
            }
        }

        self.track_worst_block(block_index, probe_ratio);
        flags
    }

    fn track_worst_block(&mut self, block_index: u64, ratio: f64) {
        self.worst_blocks.push(WorstBlock { block_index, ratio });
        self.worst_blocks.sort_by(|a, b| a.ratio.partial_cmp(&b.ratio).unwrap());
        self.worst_blocks.truncate(10);
    }

    /// Export the EMA baselines and machine state needed to resume this
    /// monitor on a later encoder run (§9 "model 'continuity' explicitly by
    /// passing a `StreamState` value... in and out of each encoder run").
    /// Per-run bookkeeping (stats, anomaly history, worst-block list) is
    /// intentionally excluded — continuity carries the *decision* state
    /// forward, not the telemetry of the run that produced it.
    pub fn export_continuity(&self) -> ChmContinuity {
        ChmContinuity {
            state: self.state,
            baseline_ratio: self.baseline_ratio,
            baseline_dev: self.baseline_dev,
            baseline_entropy: self.baseline_entropy,
            frozen_ratio: self.frozen_ratio,
            recovery_counter: self.recovery_counter,
        }
    }

    /// Rebuild a monitor from a previously exported [`ChmContinuity`],
    /// starting a fresh telemetry run (`run_id`/`stats`/history reset).
    pub fn from_continuity(continuity: ChmContinuity, probe_interval: u64, run_id: String, format_version: u8) -> Self {
        CompressionHealthMonitor {
            state: continuity.state,
            baseline_ratio: continuity.baseline_ratio,
            baseline_dev: continuity.baseline_dev,
            baseline_entropy: continuity.baseline_entropy,
            frozen_ratio: continuity.frozen_ratio,
            probe_interval: probe_interval.max(1),
            recovery_counter: continuity.recovery_counter,
            stats: ChmStats::default(),
            anomaly_history: Vec::new(),
            current_anomaly: None,
            worst_blocks: Vec::new(),
            run_id,
            format_version,
        }
    }

    pub fn report(&self) -> ChmReport {
        let mut segments = self.anomaly_history.clone();
        if let Some(current) = &self.current_anomaly {
            segments.push(current.clone());
        }
        ChmReport {
            run_id: self.run_id.clone(),
            format_version: self.format_version,
            anomaly_segments: segments,
            worst_blocks: self.worst_blocks.iter().map(|w| (w.block_index, w.ratio)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::compute_metrics;

    fn stable_metrics() -> BlockMetrics {
        let raw: Vec<i64> = (0..1000).map(|i| 1000 + 10 * i).collect();
        compute_metrics(&raw)
    }

    fn chaotic_metrics() -> BlockMetrics {
        let mut raw = Vec::new();
        let mut v = 0i64;
        for i in 0..1000 {
            v += if i % 2 == 0 { 1_000_003 } else { -999_999 };
            raw.push(v);
        }
        compute_metrics(&raw)
    }

    #[test]
    fn stable_blocks_stay_core() {
        let mut chm = CompressionHealthMonitor::new(4, "test".to_string(), 1);
        let metrics = stable_metrics();
        for i in 0..20u64 {
            let route = chm.decide_route(&metrics, 100.0, i);
            assert_eq!(route, Route::Core);
            chm.update(route, &metrics, 100.0, i, 8000, 80);
        }
        assert_eq!(chm.state(), ChmState::Normal);
    }

    #[test]
    fn entropy_gate_triggers_quarantine_immediately() {
        let mut chm = CompressionHealthMonitor::new(4, "test".to_string(), 1);
        let metrics = chaotic_metrics();
        let route = chm.decide_route(&metrics, 1.0, 0);
        assert!(route.is_quarantine());
    }

    #[test]
    fn quarantine_does_not_update_baseline() {
        let mut chm = CompressionHealthMonitor::new(4, "test".to_string(), 1);
        let metrics = chaotic_metrics();
        let baseline_before = chm.baseline_ratio;
        let route = chm.decide_route(&metrics, 1.0, 0);
        chm.update(route, &metrics, 1.0, 0, 8000, 8000);
        assert_eq!(chm.baseline_ratio, baseline_before);
    }

    #[test]
    fn recovery_requires_m_consecutive_probe_successes() {
        let mut chm = CompressionHealthMonitor::new(4, "test".to_string(), 1);
        let bad = chaotic_metrics();
        let good = stable_metrics();

        // Enter quarantine.
        let route = chm.decide_route(&bad, 1.0, 0);
        chm.update(route, &bad, 1.0, 0, 8000, 8000);
        assert_eq!(chm.state(), ChmState::QuarantineActive);

        // Blocks not on a probe boundary stay quarantined regardless of metrics.
        for i in 1..4u64 {
            let route = chm.decide_route(&good, 100.0, i);
            assert!(route.is_quarantine());
            chm.update(route, &good, 100.0, i, 8000, 80);
        }

        // Probe boundaries (multiples of 4): need 3 consecutive successes.
        let r1 = chm.decide_route(&good, 100.0, 4);
        assert!(r1.is_quarantine());
        chm.update(r1, &good, 100.0, 4, 8000, 80);

        for i in 5..8u64 {
            let route = chm.decide_route(&good, 100.0, i);
            chm.update(route, &good, 100.0, i, 8000, 80);
        }
        let r2 = chm.decide_route(&good, 100.0, 8);
        assert!(r2.is_quarantine());
        chm.update(r2, &good, 100.0, 8, 8000, 80);

        for i in 9..12u64 {
            let route = chm.decide_route(&good, 100.0, i);
            chm.update(route, &good, 100.0, i, 8000, 80);
        }
        let r3 = chm.decide_route(&good, 100.0, 12);
        assert_eq!(r3, Route::Core);
    }

    #[test]
    fn report_lists_anomaly_segments() {
        let mut chm = CompressionHealthMonitor::new(4, "run-1".to_string(), 1);
        let bad = chaotic_metrics();
        let route = chm.decide_route(&bad, 1.0, 0);
        chm.update(route, &bad, 1.0, 0, 8000, 8000);
        let report = chm.report();
        assert_eq!(report.run_id, "run-1");
        assert_eq!(report.anomaly_segments.len(), 1);
    }
}
