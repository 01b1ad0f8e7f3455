//! Exposure Manager, SPEC_FULL.md §4.3. Generalizes the teacher's
//! sizing-helper shape (`strategies::kelly`) into the spec's own
//! gamma-weighted, hysteresis-gated target-exposure formula.

use crate::config::ExposureConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureResult {
    pub q_star: f64,
    pub q_current: f64,
    pub dq: f64,
    pub should_act: bool,
    pub is_expanding: bool,
    pub e_eff: f64,
}

/// Gamma weight, peaks at 1 when p=0.5, zero at the endpoints.
fn gamma_weight(p: f64) -> f64 {
    4.0 * p * (1.0 - p)
}

/// Computes the target net exposure and whether the bot should act on it
/// (SPEC_FULL.md §4.3).
pub fn compute_exposure(
    cfg: &ExposureConfig,
    edge: f64,
    p: f64,
    inv_yes: f64,
    inv_no: f64,
    time_to_resolution_minutes: f64,
) -> ExposureResult {
    let q_current = inv_yes - inv_no;

    let e_eff = if edge.abs() < cfg.e_exit {
        0.0
    } else if time_to_resolution_minutes < cfg.t_flat && edge.abs() < cfg.e_override {
        0.0
    } else {
        edge
    };

    let q_star_raw = cfg.q_max * gamma_weight(p) * (cfg.k * e_eff).tanh();

    let in_gray_zone = edge.abs() >= cfg.e_exit && edge.abs() < cfg.e_enter;
    let is_expansion_vs_current = q_star_raw.abs() > q_current.abs();

    let q_star = if in_gray_zone && is_expansion_vs_current {
        q_current
    } else {
        q_star_raw
    };

    let dq = q_star - q_current;
    let should_act = dq.abs() >= cfg.q_step;
    let is_expanding = q_star.abs() > q_current.abs();

    ExposureResult {
        q_star,
        q_current,
        dq,
        should_act,
        is_expanding,
        e_eff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ExposureConfig {
        ExposureConfig::default()
    }

    /// Scenario: edge below e_exit threshold.
    /// Expected: e_eff is flattened to zero, and the target exposure collapses toward zero.
    #[test]
    fn test_small_edge_flattens_exposure() {
        let c = cfg();
        let res = compute_exposure(&c, 0.05, 0.5, 0.0, 0.0, 10.0);
        assert_eq!(res.e_eff, 0.0);
        assert_eq!(res.q_star, 0.0);
    }

    /// Scenario: time to resolution below t_flat with an edge below e_override.
    /// Expected: exposure is flattened even though the edge alone would not trigger e_exit.
    #[test]
    fn test_near_resolution_flattens_moderate_edge() {
        let c = cfg();
        let res = compute_exposure(&c, 0.20, 0.5, 0.0, 0.0, 0.5);
        assert_eq!(res.e_eff, 0.0);
    }

    /// Scenario: strong positive edge at p=0.5 (max gamma weight) with no current position.
    /// Expected: q_star is positive and should_act is true once dq exceeds q_step.
    #[test]
    fn test_strong_edge_drives_positive_target() {
        let c = cfg();
        let res = compute_exposure(&c, 0.40, 0.5, 0.0, 0.0, 10.0);
        assert!(res.q_star > 0.0);
        assert!(res.should_act);
        assert!(res.is_expanding);
    }

    /// Scenario: edge in the gray zone (between e_exit and e_enter) while the raw target
    /// would expand beyond the current held exposure.
    /// Expected: q_star is clamped to q_current (hold, no expansion).
    #[test]
    fn test_gray_zone_holds_current_exposure() {
        let c = cfg();
        // e_exit=0.10, e_enter=0.18; pick an edge in between.
        let res = compute_exposure(&c, 0.14, 0.5, 20.0, 0.0, 10.0);
        assert_eq!(res.q_star, 20.0);
    }
}
