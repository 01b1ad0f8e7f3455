//! Phased Parameter Optimizer: evaluates candidate parameter sets against
//! one full backtest run each, streaming progress through an observer, and
//! narrows the search across an exhaustive grid phase followed by a
//! terminal multi-stage refinement phase.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;

use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;

/// A candidate parameter assignment. Keyed by the same names used in
/// `SignalConfig`/`ExposureConfig`/etc field tables, deliberately untyped
/// here so one optimizer drives any subset of them.
pub type ParamSet = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Sharpe,
    TotalPnl,
    WinRate,
    ProfitFactor,
    Composite,
}

/// Composite score blending normalized Sharpe, win rate, and a capped
/// profit factor: `S = 0.6*norm(Sharpe,/3) + 0.3*win_rate + 0.1*min(profit_factor,5)/5`.
pub fn composite_score(metrics: &Metrics) -> f64 {
    let norm_sharpe = (metrics.sharpe / 3.0).clamp(-1.0, 1.0);
    let capped_pf = metrics.profit_factor.min(5.0) / 5.0;
    0.6 * norm_sharpe + 0.3 * metrics.win_rate + 0.1 * capped_pf
}

pub fn metric_value(metrics: &Metrics, kind: MetricKind) -> f64 {
    match kind {
        MetricKind::Sharpe => metrics.sharpe,
        MetricKind::TotalPnl => metrics.total_pnl,
        MetricKind::WinRate => metrics.win_rate,
        MetricKind::ProfitFactor => metrics.profit_factor,
        MetricKind::Composite => composite_score(metrics),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    /// Enumerates the discrete values in `[min, max]` stepped by `step`,
    /// counting by index rather than repeated addition to avoid float
    /// drift accumulating over many steps.
    pub fn values(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max < self.min {
            return vec![self.min];
        }
        let n = ((self.max - self.min) / self.step).round() as i64;
        (0..=n).map(|i| self.min + i as f64 * self.step).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Exhaustive,
    MultiStage,
}

/// One phase of the optimizer: a bounded parameter sweep with its own
/// scoring metric, constraints, and combination cap.
pub struct Phase {
    pub phase_no: u32,
    pub name: String,
    pub parameter_ranges: Vec<(String, ParameterRange)>,
    pub optimize_metric: MetricKind,
    pub constraints: Vec<Box<dyn Fn(&ParamSet) -> bool>>,
    pub top_n: usize,
    pub early_stop_threshold: Option<f64>,
    pub skip_if_negative: bool,
    pub algorithm: Algorithm,
    pub max_combinations: usize,
}

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub params: ParamSet,
    pub metrics: Metrics,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct PhaseSummary {
    pub phase_no: u32,
    pub name: String,
    pub skipped: bool,
    pub evaluated: usize,
    pub top: Vec<EvalResult>,
}

/// Progress subscriber (SPEC_FULL.md §4.12 "streams progress updates ...
/// to any subscribed observer").
pub trait OptimizerObserver {
    fn on_progress(&mut self, overall_pct: f64, phase_name: &str, current_best: Option<&EvalResult>);
}

/// An observer that does nothing; the default for headless runs.
pub struct NullObserver;
impl OptimizerObserver for NullObserver {
    fn on_progress(&mut self, _overall_pct: f64, _phase_name: &str, _current_best: Option<&EvalResult>) {}
}

fn combination_count(ranges: &[(String, ParameterRange)]) -> usize {
    ranges.iter().map(|(_, r)| r.values().len().max(1)).product()
}

/// Cartesian product of each range's values, merged onto `base` for keys
/// the phase doesn't vary.
fn cartesian(ranges: &[(String, ParameterRange)], base: &ParamSet) -> Vec<ParamSet> {
    let mut result = vec![base.clone()];
    for (name, range) in ranges {
        let values = range.values();
        let mut next = Vec::with_capacity(result.len() * values.len());
        for partial in &result {
            for v in &values {
                let mut p = partial.clone();
                p.insert(name.clone(), *v);
                next.push(p);
            }
        }
        result = next;
    }
    result
}

fn best_so_far(results: &[EvalResult]) -> Option<&EvalResult> {
    results.iter().max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
}

/// Runs one exhaustive phase (SPEC_FULL.md §4.12 "Execution rules").
/// Combination count is bounded by `phase.max_combinations`; exceeding it
/// aborts with `OptimizerCombinationCap`.
pub fn run_phase(
    phase: &Phase,
    base: &ParamSet,
    evaluate: &mut dyn FnMut(&ParamSet) -> Metrics,
    observer: &mut dyn OptimizerObserver,
) -> AppResult<PhaseSummary> {
    let count = combination_count(&phase.parameter_ranges);
    if count > phase.max_combinations {
        return Err(AppError::OptimizerCombinationCap {
            phase: phase.name.clone(),
            count,
            cap: phase.max_combinations,
        });
    }

    let mut combos = cartesian(&phase.parameter_ranges, base);
    combos.retain(|c| phase.constraints.iter().all(|pred| pred(c)));

    let mut results: Vec<EvalResult> = Vec::new();
    let total = combos.len().max(1);
    for (i, combo) in combos.iter().enumerate() {
        let metrics = evaluate(combo);
        let score = metric_value(&metrics, phase.optimize_metric);
        results.push(EvalResult {
            params: combo.clone(),
            metrics,
            score,
        });
        observer.on_progress((i + 1) as f64 / total as f64 * 100.0, &phase.name, best_so_far(&results));
        if let Some(threshold) = phase.early_stop_threshold {
            if score >= threshold {
                break;
            }
        }
    }

    if phase.skip_if_negative && !results.is_empty() && results.iter().all(|r| r.metrics.sharpe < 0.0) {
        return Ok(PhaseSummary {
            phase_no: phase.phase_no,
            name: phase.name.clone(),
            skipped: true,
            evaluated: results.len(),
            top: Vec::new(),
        });
    }

    let evaluated = results.len();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(phase.top_n.max(1));

    Ok(PhaseSummary {
        phase_no: phase.phase_no,
        name: phase.name.clone(),
        skipped: false,
        evaluated,
        top: results,
    })
}

fn param_differs(base: &ParamSet, name: &str, value: f64) -> bool {
    (base.get(name).copied().unwrap_or(value) - value).abs() > 1e-12
}

/// Runs the terminal multi-stage phase (SPEC_FULL.md §4.12 "Terminal
/// (multi-stage) phase"): baseline, sensitivity, pairs, random, operating
/// over the union of top-3 per-parameter values from all prior phases,
/// within a shared `phase.max_combinations` budget.
pub fn run_multi_stage_phase(
    phase: &Phase,
    candidate_values: &HashMap<String, Vec<f64>>,
    base: &ParamSet,
    evaluate: &mut dyn FnMut(&ParamSet) -> Metrics,
    observer: &mut dyn OptimizerObserver,
) -> AppResult<PhaseSummary> {
    let mut budget = phase.max_combinations;
    let mut results: Vec<EvalResult> = Vec::new();
    let passes_constraints = |c: &ParamSet| phase.constraints.iter().all(|pred| pred(c));

    // Stage 1: baseline (SPEC_FULL.md §4.12 step 1).
    let baseline_metrics = evaluate(base);
    let baseline_score = metric_value(&baseline_metrics, phase.optimize_metric);
    results.push(EvalResult {
        params: base.clone(),
        metrics: baseline_metrics,
        score: baseline_score,
    });
    budget = budget.saturating_sub(1);
    observer.on_progress(5.0, &phase.name, best_so_far(&results));

    // Stage 2: sensitivity. DESIGN.md decision: the baseline stays fixed
    // for the whole stage (no rolling update mid-stage).
    let mut sensitivity: Vec<(String, f64)> = Vec::new();
    'sensitivity: for (name, values) in candidate_values {
        let mut best_improvement = f64::NEG_INFINITY;
        for v in values {
            if budget == 0 {
                break 'sensitivity;
            }
            if !param_differs(base, name, *v) {
                continue;
            }
            let mut candidate = base.clone();
            candidate.insert(name.clone(), *v);
            if !passes_constraints(&candidate) {
                continue;
            }
            let metrics = evaluate(&candidate);
            let score = metric_value(&metrics, phase.optimize_metric);
            budget -= 1;
            best_improvement = best_improvement.max(score - baseline_score);
            results.push(EvalResult {
                params: candidate,
                metrics,
                score,
            });
        }
        if best_improvement > f64::NEG_INFINITY {
            sensitivity.push((name.clone(), best_improvement));
        }
    }
    observer.on_progress(30.0, &phase.name, best_so_far(&results));

    sensitivity.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_params: Vec<String> = sensitivity.iter().take(7).map(|(n, _)| n.clone()).collect();

    // Stage 3: pairs, most-sensitive pairs first.
    'pairs: for i in 0..top_params.len() {
        for j in (i + 1)..top_params.len() {
            if budget == 0 {
                break 'pairs;
            }
            let pname = &top_params[i];
            let qname = &top_params[j];
            let empty = Vec::new();
            let pvals = candidate_values.get(pname).unwrap_or(&empty);
            let qvals = candidate_values.get(qname).unwrap_or(&empty);
            for pv in pvals {
                for qv in qvals {
                    if budget == 0 {
                        break 'pairs;
                    }
                    if !param_differs(base, pname, *pv) && !param_differs(base, qname, *qv) {
                        continue; // excludes the baseline combination
                    }
                    let mut candidate = base.clone();
                    candidate.insert(pname.clone(), *pv);
                    candidate.insert(qname.clone(), *qv);
                    if !passes_constraints(&candidate) {
                        continue;
                    }
                    let metrics = evaluate(&candidate);
                    let score = metric_value(&metrics, phase.optimize_metric);
                    budget -= 1;
                    results.push(EvalResult {
                        params: candidate,
                        metrics,
                        score,
                    });
                }
            }
        }
    }
    observer.on_progress(70.0, &phase.name, best_so_far(&results));

    // Stage 4: random sampling without replacement from the discrete grid.
    if budget > 0 {
        let mut rng = rand::thread_rng();
        let keys: Vec<String> = candidate_values.keys().cloned().collect();
        let mut seen: HashSet<String> = HashSet::new();
        let max_attempts = budget.saturating_mul(20).max(20);
        let mut attempts = 0;
        while budget > 0 && attempts < max_attempts {
            attempts += 1;
            let mut candidate = base.clone();
            for k in &keys {
                if let Some(values) = candidate_values.get(k) {
                    if let Some(v) = values.choose(&mut rng) {
                        candidate.insert(k.clone(), *v);
                    }
                }
            }
            let fingerprint = fingerprint(&candidate);
            if !seen.insert(fingerprint) {
                continue;
            }
            if !passes_constraints(&candidate) {
                continue;
            }
            let metrics = evaluate(&candidate);
            let score = metric_value(&metrics, phase.optimize_metric);
            budget -= 1;
            results.push(EvalResult {
                params: candidate,
                metrics,
                score,
            });
        }
    }
    observer.on_progress(100.0, &phase.name, best_so_far(&results));

    let evaluated = results.len();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(phase.top_n.max(1));

    Ok(PhaseSummary {
        phase_no: phase.phase_no,
        name: phase.name.clone(),
        skipped: false,
        evaluated,
        top: results,
    })
}

fn fingerprint(params: &ParamSet) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    keys.iter().map(|k| format!("{}={:.6}", k, params[*k])).collect::<Vec<_>>().join(",")
}

/// The union of each prior phase's top-3 value, per parameter
/// (SPEC_FULL.md §4.12 "Terminal phase operates over the union of top-3
/// values-per-parameter from all prior phases").
fn union_top3(summaries: &[PhaseSummary]) -> HashMap<String, Vec<f64>> {
    let mut map: HashMap<String, Vec<f64>> = HashMap::new();
    for summary in summaries {
        for result in summary.top.iter().take(3) {
            for (k, v) in &result.params {
                let entry = map.entry(k.clone()).or_default();
                if !entry.iter().any(|x: &f64| (x - v).abs() < 1e-9) {
                    entry.push(*v);
                }
            }
        }
    }
    map
}

/// Runs every phase in sequence, carrying the best parameters forward as
/// the base for the next phase (SPEC_FULL.md §4.12 "Execution rules").
pub fn run_optimizer(
    phases: &[Phase],
    initial_base: ParamSet,
    mut evaluate: impl FnMut(&ParamSet) -> Metrics,
    observer: &mut dyn OptimizerObserver,
) -> AppResult<Vec<PhaseSummary>> {
    let mut base = initial_base;
    let mut summaries: Vec<PhaseSummary> = Vec::new();

    for (i, phase) in phases.iter().enumerate() {
        let overall_pct = i as f64 / phases.len().max(1) as f64 * 100.0;
        observer.on_progress(overall_pct, &phase.name, None);

        let summary = match phase.algorithm {
            Algorithm::Exhaustive => run_phase(phase, &base, &mut evaluate, observer)?,
            Algorithm::MultiStage => {
                let candidates = union_top3(&summaries);
                run_multi_stage_phase(phase, &candidates, &base, &mut evaluate, observer)?
            }
        };

        if !summary.skipped {
            if let Some(best) = summary.top.first() {
                base = best.params.clone();
            }
        }
        summaries.push(summary);
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_with(sharpe: f64, win_rate: f64, profit_factor: f64) -> Metrics {
        Metrics {
            sharpe,
            win_rate,
            profit_factor,
            ..Metrics::default()
        }
    }

    /// Scenario: Sharpe=3, win_rate=1.0, profit_factor=10 (capped at 5).
    /// Expected: composite score equals 0.6 + 0.3 + 0.1 = 1.0.
    #[test]
    fn test_composite_score_formula() {
        let m = metrics_with(3.0, 1.0, 10.0);
        assert!((composite_score(&m) - 1.0).abs() < 1e-9);
    }

    /// Scenario: a phase whose single parameter range generates more
    /// combinations than its max_combinations cap.
    /// Expected: run_phase aborts with OptimizerCombinationCap.
    #[test]
    fn test_combination_cap_aborts_phase() {
        let phase = Phase {
            phase_no: 1,
            name: "too_big".to_string(),
            parameter_ranges: vec![(
                "e_enter".to_string(),
                ParameterRange {
                    min: 0.0,
                    max: 100.0,
                    step: 0.01,
                },
            )],
            optimize_metric: MetricKind::Sharpe,
            constraints: vec![],
            top_n: 5,
            early_stop_threshold: None,
            skip_if_negative: false,
            algorithm: Algorithm::Exhaustive,
            max_combinations: 10,
        };
        let base = ParamSet::new();
        let mut observer = NullObserver;
        let result = run_phase(&phase, &base, &mut |_| Metrics::default(), &mut observer);
        assert!(matches!(result, Err(AppError::OptimizerCombinationCap { .. })));
    }

    /// Scenario: a small exhaustive phase over one parameter where a higher
    /// value always scores higher.
    /// Expected: the top result is the highest candidate value.
    #[test]
    fn test_exhaustive_phase_picks_best_candidate() {
        let phase = Phase {
            phase_no: 1,
            name: "single_param".to_string(),
            parameter_ranges: vec![(
                "k".to_string(),
                ParameterRange {
                    min: 1.0,
                    max: 3.0,
                    step: 1.0,
                },
            )],
            optimize_metric: MetricKind::Sharpe,
            constraints: vec![],
            top_n: 1,
            early_stop_threshold: None,
            skip_if_negative: false,
            algorithm: Algorithm::Exhaustive,
            max_combinations: 100,
        };
        let base = ParamSet::new();
        let mut observer = NullObserver;
        let summary = run_phase(&phase, &base, &mut |p| metrics_with(p["k"], 0.5, 1.0), &mut observer).unwrap();
        assert_eq!(summary.top.len(), 1);
        assert_eq!(summary.top[0].params["k"], 3.0);
    }

    /// Scenario: every candidate in a phase scores a negative Sharpe and
    /// skip_if_negative is set.
    /// Expected: the phase summary is marked skipped with no top results.
    #[test]
    fn test_skip_if_negative_marks_phase_skipped() {
        let phase = Phase {
            phase_no: 1,
            name: "all_bad".to_string(),
            parameter_ranges: vec![(
                "k".to_string(),
                ParameterRange {
                    min: 1.0,
                    max: 2.0,
                    step: 1.0,
                },
            )],
            optimize_metric: MetricKind::Sharpe,
            constraints: vec![],
            top_n: 1,
            early_stop_threshold: None,
            skip_if_negative: true,
            algorithm: Algorithm::Exhaustive,
            max_combinations: 100,
        };
        let base = ParamSet::new();
        let mut observer = NullObserver;
        let summary = run_phase(&phase, &base, &mut |_| metrics_with(-1.0, 0.2, 0.5), &mut observer).unwrap();
        assert!(summary.skipped);
        assert!(summary.top.is_empty());
    }

    /// Scenario: a two-phase optimizer run where the second phase is
    /// multi-stage, budget-capped at 10 evaluations.
    /// Expected: the multi-stage phase never exceeds its evaluation budget.
    #[test]
    fn test_multi_stage_respects_budget() {
        let phase1 = Phase {
            phase_no: 1,
            name: "baseline_phase".to_string(),
            parameter_ranges: vec![(
                "k".to_string(),
                ParameterRange {
                    min: 1.0,
                    max: 3.0,
                    step: 1.0,
                },
            )],
            optimize_metric: MetricKind::Sharpe,
            constraints: vec![],
            top_n: 3,
            early_stop_threshold: None,
            skip_if_negative: false,
            algorithm: Algorithm::Exhaustive,
            max_combinations: 100,
        };
        let phase2 = Phase {
            phase_no: 2,
            name: "terminal".to_string(),
            parameter_ranges: vec![],
            optimize_metric: MetricKind::Sharpe,
            constraints: vec![],
            top_n: 3,
            early_stop_threshold: None,
            skip_if_negative: false,
            algorithm: Algorithm::MultiStage,
            max_combinations: 10,
        };
        let mut observer = NullObserver;
        let summaries = run_optimizer(
            &[phase1, phase2],
            ParamSet::new(),
            |p| metrics_with(p.get("k").copied().unwrap_or(0.0), 0.5, 1.0),
            &mut observer,
        )
        .unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[1].evaluated <= 10);
    }
}
