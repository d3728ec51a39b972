use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use consensus_core::{
    ConsensusError, ConsensusResult, EstimateRecord, EstimateRepository, Metric,
    OptimizationMode, Result, SectorThresholds, Signal, StockSnapshot, UniverseMember,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::consensus::ConsensusCalculator;
use crate::ranker::SignalRanker;
use crate::scoring::{score_confidence, ScoreInputs, ScoringWeights};
use crate::thresholds::ThresholdPolicy;

/// Default lower bound on the dispersion ratio. Perfect agreement usually
/// means one source was duplicated, not that analysts independently agree.
pub const DEFAULT_MIN_DISPERSION_FLOOR: f64 = 0.001;

/// Why a stock did not produce a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    InsufficientCoverage {
        metric: Metric,
        analyst_count: usize,
        required: usize,
    },
    MarketCapBelowMinimum {
        market_cap: f64,
        required: f64,
    },
    DispersionAboveThreshold {
        metric: Metric,
        ratio: f64,
        threshold: f64,
    },
    DispersionBelowFloor {
        metric: Metric,
        ratio: f64,
        floor: f64,
    },
}

/// Full outcome of evaluating one stock
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub signal: Option<Signal>,
    pub rejection: Option<RejectionReason>,
    /// The sector was unknown and default thresholds were used
    pub sector_fallback: bool,
}

impl Evaluation {
    fn rejected(reason: RejectionReason, sector_fallback: bool) -> Self {
        Self {
            signal: None,
            rejection: Some(reason),
            sector_fallback,
        }
    }
}

/// A symbol skipped during a scan because its input was malformed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanExclusion {
    pub symbol: String,
    pub reason: String,
}

/// Result of evaluating a whole universe at one point in time
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Ranked, deduplicated signals
    pub signals: Vec<Signal>,
    pub rejections: Vec<(String, RejectionReason)>,
    pub exclusions: Vec<ScanExclusion>,
    pub sector_fallbacks: usize,
    /// Records the repository returned from after the scan date
    pub look_ahead_filtered: usize,
}

/// Decides whether a stock's analyst consensus qualifies as a signal.
pub struct SignalGenerator {
    policy: ThresholdPolicy,
    weights: ScoringWeights,
    min_dispersion_floor: f64,
}

impl SignalGenerator {
    pub fn new(policy: ThresholdPolicy, weights: ScoringWeights, min_dispersion_floor: f64) -> Self {
        Self {
            policy,
            weights,
            min_dispersion_floor,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.build_policy()?,
            config.scoring.clone(),
            config.min_dispersion_floor,
        ))
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// Evaluate one stock now. `Ok(None)` means it did not qualify.
    pub fn evaluate(&self, snapshot: &StockSnapshot, mode: OptimizationMode) -> Result<Option<Signal>> {
        self.evaluate_at(snapshot, mode, Utc::now())
    }

    /// Evaluate one stock as of a given instant.
    pub fn evaluate_at(
        &self,
        snapshot: &StockSnapshot,
        mode: OptimizationMode,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Signal>> {
        Ok(self.evaluate_detailed(snapshot, mode, as_of)?.signal)
    }

    /// Evaluate one stock and report why it was rejected, if it was.
    pub fn evaluate_detailed(
        &self,
        snapshot: &StockSnapshot,
        mode: OptimizationMode,
        as_of: DateTime<Utc>,
    ) -> Result<Evaluation> {
        if !(snapshot.market_cap >= 0.0) {
            return Err(ConsensusError::NegativeMarketCap {
                symbol: snapshot.symbol.clone(),
                market_cap: snapshot.market_cap,
            });
        }

        // Input errors take precedence over coverage rejections
        validate_batch(snapshot, &snapshot.eps_estimates, Metric::Eps)?;
        validate_batch(snapshot, &snapshot.revenue_estimates, Metric::Revenue)?;

        let (thresholds, fallback) = self.policy.resolve_with_fallback(&snapshot.sector, mode);

        let eps = match self.metric_consensus(&snapshot.eps_estimates, Metric::Eps)? {
            Some(result) => result,
            None => return Ok(Evaluation::rejected(no_coverage(Metric::Eps, thresholds), fallback)),
        };
        let revenue =
            match self.metric_consensus(&snapshot.revenue_estimates, Metric::Revenue)? {
                Some(result) => result,
                None => {
                    return Ok(Evaluation::rejected(
                        no_coverage(Metric::Revenue, thresholds),
                        fallback,
                    ))
                }
            };

        if let Some(reason) = self.check(&eps, &revenue, snapshot.market_cap, thresholds) {
            tracing::debug!(symbol = %snapshot.symbol, ?reason, "No signal");
            return Ok(Evaluation::rejected(reason, fallback));
        }

        let confidence_score = score_confidence(
            &ScoreInputs {
                eps_ratio: eps.dispersion_ratio,
                eps_threshold: thresholds.eps_threshold,
                revenue_ratio: revenue.dispersion_ratio,
                revenue_threshold: thresholds.revenue_threshold,
                analyst_count: eps.analyst_count.min(revenue.analyst_count),
                required_coverage: thresholds.min_analyst_coverage,
            },
            &self.weights,
        );

        let earnings_date = next_earnings_date(snapshot.eps_estimates.iter(), as_of.date_naive());

        Ok(Evaluation {
            signal: Some(Signal {
                symbol: snapshot.symbol.clone(),
                sector: snapshot.sector.clone(),
                eps_consensus: eps,
                revenue_consensus: revenue,
                confidence_score,
                earnings_date,
                generated_at: as_of,
            }),
            rejection: None,
            sector_fallback: fallback,
        })
    }

    /// Evaluate every universe member against the estimates visible on
    /// `as_of`, in parallel. Malformed inputs exclude only their own symbol.
    pub fn scan(
        &self,
        universe: &[UniverseMember],
        repository: &dyn EstimateRepository,
        as_of: NaiveDate,
        mode: OptimizationMode,
    ) -> ScanReport {
        let as_of_instant = as_of.and_time(NaiveTime::MIN).and_utc();

        let outcomes: Vec<(String, usize, Result<Evaluation>)> = universe
            .par_iter()
            .map(|member| {
                let (eps_estimates, eps_hidden) =
                    visible(repository.fetch(&member.symbol, Metric::Eps, as_of), as_of);
                let (revenue_estimates, revenue_hidden) =
                    visible(repository.fetch(&member.symbol, Metric::Revenue, as_of), as_of);
                let snapshot = StockSnapshot {
                    symbol: member.symbol.clone(),
                    sector: member.sector.clone(),
                    market_cap: member.market_cap,
                    eps_estimates,
                    revenue_estimates,
                };
                let outcome = self.evaluate_detailed(&snapshot, mode, as_of_instant);
                (member.symbol.clone(), eps_hidden + revenue_hidden, outcome)
            })
            .collect();

        let mut report = ScanReport::default();
        let mut signals = Vec::new();
        for (symbol, hidden, outcome) in outcomes {
            report.look_ahead_filtered += hidden;
            match outcome {
                Ok(evaluation) => {
                    if evaluation.sector_fallback {
                        report.sector_fallbacks += 1;
                    }
                    if let Some(signal) = evaluation.signal {
                        signals.push(signal);
                    }
                    if let Some(reason) = evaluation.rejection {
                        report.rejections.push((symbol, reason));
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Skipping symbol with invalid input");
                    report.exclusions.push(ScanExclusion {
                        symbol,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.signals = SignalRanker::rank(signals);
        report
    }

    /// Consensus for one metric, or `None` when no analyst covers it.
    fn metric_consensus(
        &self,
        estimates: &[EstimateRecord],
        metric: Metric,
    ) -> Result<Option<ConsensusResult>> {
        if estimates.is_empty() {
            return Ok(None);
        }
        ConsensusCalculator::compute(estimates, metric).map(Some)
    }

    fn check(
        &self,
        eps: &ConsensusResult,
        revenue: &ConsensusResult,
        market_cap: f64,
        thresholds: &SectorThresholds,
    ) -> Option<RejectionReason> {
        for result in [eps, revenue] {
            if result.analyst_count < thresholds.min_analyst_coverage {
                return Some(RejectionReason::InsufficientCoverage {
                    metric: result.metric,
                    analyst_count: result.analyst_count,
                    required: thresholds.min_analyst_coverage,
                });
            }
        }

        if market_cap < thresholds.min_market_cap {
            return Some(RejectionReason::MarketCapBelowMinimum {
                market_cap,
                required: thresholds.min_market_cap,
            });
        }

        for result in [eps, revenue] {
            let threshold = thresholds.threshold_for(result.metric);
            if !(result.dispersion_ratio <= threshold) {
                return Some(RejectionReason::DispersionAboveThreshold {
                    metric: result.metric,
                    ratio: result.dispersion_ratio,
                    threshold,
                });
            }
        }

        for result in [eps, revenue] {
            if result.dispersion_ratio < self.min_dispersion_floor {
                return Some(RejectionReason::DispersionBelowFloor {
                    metric: result.metric,
                    ratio: result.dispersion_ratio,
                    floor: self.min_dispersion_floor,
                });
            }
        }

        None
    }
}

/// Every record must belong to the snapshot's symbol and the expected metric
/// and carry a finite value.
fn validate_batch(snapshot: &StockSnapshot, estimates: &[EstimateRecord], metric: Metric) -> Result<()> {
    for record in estimates {
        if record.symbol != snapshot.symbol || record.metric != metric {
            return Err(ConsensusError::MixedBatch {
                expected: format!("{} {}", snapshot.symbol, metric),
                found: format!("{} {}", record.symbol, record.metric),
            });
        }
        if !record.value.is_finite() {
            return Err(ConsensusError::InvalidEstimate {
                symbol: record.symbol.clone(),
                analyst_id: record.analyst_id.clone(),
                value: record.value,
            });
        }
    }
    Ok(())
}

fn no_coverage(metric: Metric, thresholds: &SectorThresholds) -> RejectionReason {
    RejectionReason::InsufficientCoverage {
        metric,
        analyst_count: 0,
        required: thresholds.min_analyst_coverage,
    }
}

/// Drops records published after `as_of`, returning how many were dropped.
fn visible(records: Vec<EstimateRecord>, as_of: NaiveDate) -> (Vec<EstimateRecord>, usize) {
    let total = records.len();
    let kept: Vec<EstimateRecord> = records
        .into_iter()
        .filter(|r| r.estimate_date <= as_of)
        .collect();
    let hidden = total - kept.len();
    (kept, hidden)
}

/// Earliest earnings date on or after `as_of`, else the latest one known.
fn next_earnings_date<'a>(
    records: impl Iterator<Item = &'a EstimateRecord>,
    as_of: NaiveDate,
) -> Option<NaiveDate> {
    let mut upcoming: Option<NaiveDate> = None;
    let mut latest: Option<NaiveDate> = None;
    for record in records {
        let date = record.earnings_date;
        latest = latest.max(Some(date));
        if date >= as_of {
            upcoming = Some(upcoming.map_or(date, |d| d.min(date)));
        }
    }
    upcoming.or(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{SectorTable, ThresholdOverrides};
    use consensus_core::InMemoryEstimateRepository;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn records(symbol: &str, metric: Metric, values: &[f64]) -> Vec<EstimateRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| EstimateRecord {
                symbol: symbol.to_string(),
                metric,
                analyst_id: format!("analyst-{}", i),
                value: *v,
                estimate_date: date("2024-01-10"),
                earnings_date: date("2024-02-01"),
            })
            .collect()
    }

    fn snapshot(eps: &[f64], revenue: &[f64]) -> StockSnapshot {
        StockSnapshot {
            symbol: "X".to_string(),
            sector: "Technology".to_string(),
            market_cap: 50.0e9,
            eps_estimates: records("X", Metric::Eps, eps),
            revenue_estimates: records("X", Metric::Revenue, revenue),
        }
    }

    fn generator() -> SignalGenerator {
        SignalGenerator::new(
            ThresholdPolicy::builtin(),
            ScoringWeights::default(),
            DEFAULT_MIN_DISPERSION_FLOOR,
        )
    }

    fn at(s: &str) -> DateTime<Utc> {
        date(s).and_time(NaiveTime::MIN).and_utc()
    }

    const TIGHT_REVENUE: [f64; 3] = [100.0, 101.0, 99.0];

    #[test]
    fn test_tight_consensus_qualifies() {
        let signal = generator()
            .evaluate_at(
                &snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE),
                OptimizationMode::Adaptive,
                at("2024-01-15"),
            )
            .unwrap()
            .expect("tight consensus should qualify");

        assert!((signal.eps_consensus.dispersion_ratio - 0.02).abs() < 1e-9);
        assert!(signal.confidence_score > 85.0);
        assert!(signal.confidence_score <= 100.0);
        assert_eq!(signal.earnings_date, Some(date("2024-02-01")));
        assert_eq!(signal.generated_at, at("2024-01-15"));
    }

    #[test]
    fn test_wide_disagreement_rejected() {
        let evaluation = generator()
            .evaluate_detailed(
                &snapshot(&[10.0, 20.0, 15.0], &TIGHT_REVENUE),
                OptimizationMode::Adaptive,
                at("2024-01-15"),
            )
            .unwrap();
        assert!(evaluation.signal.is_none());
        assert!(matches!(
            evaluation.rejection,
            Some(RejectionReason::DispersionAboveThreshold {
                metric: Metric::Eps,
                ..
            })
        ));
    }

    #[test]
    fn test_two_wide_analysts_rejected() {
        let signal = generator()
            .evaluate_at(
                &snapshot(&[10.0, 20.0], &TIGHT_REVENUE),
                OptimizationMode::Emergency,
                at("2024-01-15"),
            )
            .unwrap();
        assert!(signal.is_none());
    }

    #[test]
    fn test_single_analyst_rejected_for_coverage() {
        for mode in OptimizationMode::ALL {
            let evaluation = generator()
                .evaluate_detailed(&snapshot(&[10.0], &TIGHT_REVENUE), mode, at("2024-01-15"))
                .unwrap();
            assert!(matches!(
                evaluation.rejection,
                Some(RejectionReason::InsufficientCoverage {
                    metric: Metric::Eps,
                    analyst_count: 1,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_missing_metric_is_sparsity_not_error() {
        let evaluation = generator()
            .evaluate_detailed(
                &snapshot(&[10.0, 10.1, 9.9], &[]),
                OptimizationMode::Adaptive,
                at("2024-01-15"),
            )
            .unwrap();
        assert!(matches!(
            evaluation.rejection,
            Some(RejectionReason::InsufficientCoverage {
                metric: Metric::Revenue,
                analyst_count: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_identical_estimates_rejected_below_floor() {
        let evaluation = generator()
            .evaluate_detailed(
                &snapshot(&[10.0, 10.0, 10.0], &TIGHT_REVENUE),
                OptimizationMode::Adaptive,
                at("2024-01-15"),
            )
            .unwrap();
        assert!(matches!(
            evaluation.rejection,
            Some(RejectionReason::DispersionBelowFloor { .. })
        ));
    }

    #[test]
    fn test_small_cap_rejected() {
        let mut snap = snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE);
        snap.market_cap = 1.0e9;
        let evaluation = generator()
            .evaluate_detailed(&snap, OptimizationMode::Adaptive, at("2024-01-15"))
            .unwrap();
        assert!(matches!(
            evaluation.rejection,
            Some(RejectionReason::MarketCapBelowMinimum { .. })
        ));
    }

    #[test]
    fn test_negative_market_cap_is_input_error() {
        let mut snap = snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE);
        snap.market_cap = -1.0;
        let err = generator()
            .evaluate(&snap, OptimizationMode::Adaptive)
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_foreign_symbol_is_input_error() {
        let mut snap = snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE);
        snap.revenue_estimates = records("Y", Metric::Revenue, &TIGHT_REVENUE);
        let err = generator()
            .evaluate(&snap, OptimizationMode::Adaptive)
            .unwrap_err();
        assert!(matches!(err, ConsensusError::MixedBatch { .. }));
    }

    #[test]
    fn test_bad_revenue_batch_not_masked_by_missing_eps() {
        let mut snap = snapshot(&[], &[]);
        snap.revenue_estimates = records("Y", Metric::Eps, &[100.0]);
        let err = generator()
            .evaluate_detailed(&snap, OptimizationMode::Adaptive, at("2024-01-15"))
            .unwrap_err();
        assert!(matches!(err, ConsensusError::MixedBatch { .. }));

        let mut snap = snapshot(&[], &TIGHT_REVENUE);
        snap.revenue_estimates[1].value = f64::INFINITY;
        let err = generator()
            .evaluate_detailed(&snap, OptimizationMode::Adaptive, at("2024-01-15"))
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidEstimate { .. }));
    }

    #[test]
    fn test_earnings_date_comes_from_eps_estimates() {
        let mut snap = snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE);
        for record in &mut snap.revenue_estimates {
            record.earnings_date = date("2024-01-20");
        }
        let signal = generator()
            .evaluate_at(&snap, OptimizationMode::Adaptive, at("2024-01-15"))
            .unwrap()
            .unwrap();
        assert_eq!(signal.earnings_date, Some(date("2024-02-01")));
    }

    #[test]
    fn test_unknown_sector_flags_fallback() {
        let mut snap = snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE);
        snap.sector = "Space Tourism".to_string();
        let evaluation = generator()
            .evaluate_detailed(&snap, OptimizationMode::Adaptive, at("2024-01-15"))
            .unwrap();
        assert!(evaluation.sector_fallback);
        assert!(evaluation.signal.is_some());
    }

    #[test]
    fn test_lower_dispersion_scores_higher() {
        let tight = generator()
            .evaluate_at(
                &snapshot(&[10.0, 10.2, 9.8], &TIGHT_REVENUE),
                OptimizationMode::Adaptive,
                at("2024-01-15"),
            )
            .unwrap()
            .unwrap();
        let looser = generator()
            .evaluate_at(
                &snapshot(&[10.0, 11.0, 9.0], &TIGHT_REVENUE),
                OptimizationMode::Adaptive,
                at("2024-01-15"),
            )
            .unwrap()
            .unwrap();
        assert!(tight.confidence_score >= looser.confidence_score);
    }

    #[test]
    fn test_tightening_threshold_never_adds_signals() {
        let universe: Vec<StockSnapshot> = [
            [10.0, 10.2, 9.8],
            [10.0, 11.0, 9.0],
            [10.0, 12.0, 8.5],
            [10.0, 13.0, 7.0],
            [5.0, 5.05, 4.9],
        ]
        .iter()
        .map(|eps| snapshot(eps, &TIGHT_REVENUE))
        .collect();

        let count_for = |eps_threshold: f64| {
            let mut table = SectorTable::builtin();
            for row in table.sectors.iter_mut() {
                row.eps_threshold = eps_threshold;
            }
            let generator = SignalGenerator::new(
                ThresholdPolicy::new(table, &ThresholdOverrides::default()).unwrap(),
                ScoringWeights::default(),
                DEFAULT_MIN_DISPERSION_FLOOR,
            );
            universe
                .iter()
                .filter(|s| {
                    generator
                        .evaluate_at(s, OptimizationMode::Adaptive, at("2024-01-15"))
                        .unwrap()
                        .is_some()
                })
                .count()
        };

        let mut previous = usize::MAX;
        for threshold in [0.40, 0.30, 0.20, 0.15, 0.10, 0.05, 0.01] {
            let count = count_for(threshold);
            assert!(count <= previous, "threshold {} produced {}", threshold, count);
            previous = count;
        }
        assert_eq!(count_for(0.01), 0);
    }

    #[test]
    fn test_scan_ranks_and_records_outcomes() {
        let mut all = Vec::new();
        all.extend(records("AAA", Metric::Eps, &[10.0, 10.2, 9.8]));
        all.extend(records("AAA", Metric::Revenue, &TIGHT_REVENUE));
        all.extend(records("BBB", Metric::Eps, &[4.0, 4.01, 3.99, 4.02]));
        all.extend(records("BBB", Metric::Revenue, &TIGHT_REVENUE));
        all.extend(records("CCC", Metric::Eps, &[1.0, 3.0]));
        all.extend(records("CCC", Metric::Revenue, &TIGHT_REVENUE));
        all.extend(records("DDD", Metric::Eps, &[-1.0, 1.0, 0.0]));
        all.extend(records("DDD", Metric::Revenue, &TIGHT_REVENUE));
        let repo = InMemoryEstimateRepository::from_records(all);

        let member = |symbol: &str| UniverseMember {
            symbol: symbol.to_string(),
            sector: "Technology".to_string(),
            market_cap: 10.0e9,
        };
        let universe = vec![member("AAA"), member("BBB"), member("CCC"), member("DDD")];

        let report = generator().scan(&universe, &repo, date("2024-01-15"), OptimizationMode::Adaptive);

        let symbols: Vec<&str> = report.signals.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBB", "AAA"]);
        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].0, "CCC");
        assert_eq!(report.exclusions.len(), 1);
        assert_eq!(report.exclusions[0].symbol, "DDD");
    }

    #[test]
    fn test_scan_sees_no_future_estimates() {
        let mut all = records("AAA", Metric::Eps, &[10.0, 10.2, 9.8]);
        all.extend(records("AAA", Metric::Revenue, &TIGHT_REVENUE));
        let repo = InMemoryEstimateRepository::from_records(all);
        let universe = vec![UniverseMember {
            symbol: "AAA".to_string(),
            sector: "Technology".to_string(),
            market_cap: 10.0e9,
        }];

        // Estimates are published on 2024-01-10
        let before = generator().scan(&universe, &repo, date("2024-01-09"), OptimizationMode::Adaptive);
        assert!(before.signals.is_empty());
        let after = generator().scan(&universe, &repo, date("2024-01-10"), OptimizationMode::Adaptive);
        assert_eq!(after.signals.len(), 1);
        assert_eq!(after.signals[0].eps_consensus.analyst_count, 3);
    }

    #[test]
    fn test_next_earnings_date() {
        let mut recs = records("X", Metric::Eps, &[1.0, 1.1]);
        recs[0].earnings_date = date("2023-11-01");
        recs[1].earnings_date = date("2024-02-01");
        assert_eq!(
            next_earnings_date(recs.iter(), date("2024-01-15")),
            Some(date("2024-02-01"))
        );
        assert_eq!(
            next_earnings_date(recs.iter(), date("2024-03-01")),
            Some(date("2024-02-01"))
        );
        assert_eq!(next_earnings_date(std::iter::empty(), date("2024-03-01")), None);
    }
}
