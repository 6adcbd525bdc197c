//! Constrained mean-variance optimizer.
//!
//! Universes of up to three assets without sector caps are solved in closed
//! form when the analytic weights land inside the bounds. Everything else goes
//! through a projected gradient search: each step moves against the objective
//! gradient and is projected back onto
//! `{ sum(w) = 1, min <= w_i <= max, sector sums <= cap }`.
//!
//! The projection is exact. For a shift `t` every free asset gets
//! `clamp(v_i - t)`, every sector member `clamp(v_i - t - s_k)` where the
//! sector's own shift `s_k >= 0` is found by bisection whenever the sector
//! would otherwise overflow its cap, and `t` itself is bisected until the
//! weights sum to one.
//!
//! Risk parity and maximum Sharpe are not convex in general; the search
//! returns the best point it observed, not a certified global optimum.

use tracing::debug;

use super::error::{LinalgError, OptimizeError};
use super::linalg::{CovarianceMatrix, Matrix, Vector};
use super::types::{Constraints, Objective, OptimizationResult};

const FEASIBILITY_EPS: f64 = 1e-9;
const BISECTION_STEPS: u32 = 80;
const MAX_BACKTRACKS: u32 = 60;
const MAX_STEP: f64 = 1e6;
const SIGMA_FLOOR: f64 = 1e-9;
const CLOSED_FORM_MAX_ASSETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    pub max_iterations: u32,
    /// Stop once the objective improves by less than this (relative).
    pub objective_tolerance: f64,
    /// Stop once no weight moves by more than this.
    pub weight_tolerance: f64,
    /// Allowed gap between achieved and requested return for `target_return`.
    pub return_tolerance: f64,
    /// Multiplier updates for the `target_return` penalty.
    pub penalty_rounds: u32,
    /// Gradient steps allowed across all penalty rounds of one
    /// `target_return` solve.
    pub max_total_iterations: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5_000,
            objective_tolerance: 1e-14,
            weight_tolerance: 1e-10,
            return_tolerance: 1e-4,
            penalty_rounds: 40,
            max_total_iterations: 20_000,
        }
    }
}

#[derive(Debug, Clone)]
struct Sector {
    limit: f64,
    members: Vec<usize>,
}

#[derive(Debug, Clone)]
struct FeasibleSet {
    n: usize,
    lo: f64,
    hi: f64,
    sectors: Vec<Sector>,
    sector_of: Vec<Option<usize>>,
    unsectored: Vec<usize>,
}

impl FeasibleSet {
    fn new(constraints: &Constraints, n: usize) -> Result<Self, OptimizeError> {
        let lo = constraints.min_weight;
        let hi = constraints.max_weight;
        if !lo.is_finite() || !hi.is_finite() {
            return Err(OptimizeError::InvalidConstraints(
                "weight bounds must be finite".to_string(),
            ));
        }
        if lo > hi {
            return Err(OptimizeError::InvalidConstraints(format!(
                "minWeight {lo} exceeds maxWeight {hi}"
            )));
        }
        if lo < 0.0 || hi > 1.0 {
            return Err(OptimizeError::InvalidConstraints(
                "weight bounds must lie within [0, 1]".to_string(),
            ));
        }

        let limit_total: f64 = constraints.sector_limits.iter().map(|s| s.max_weight).sum();
        if limit_total > 1.0 + FEASIBILITY_EPS {
            return Err(OptimizeError::InvalidConstraints(format!(
                "sector limits sum to {limit_total}, which exceeds 1.0"
            )));
        }

        let mut sector_of = vec![None; n];
        let mut sectors = Vec::with_capacity(constraints.sector_limits.len());
        for (k, limit) in constraints.sector_limits.iter().enumerate() {
            if !limit.max_weight.is_finite() || !(0.0..=1.0).contains(&limit.max_weight) {
                return Err(OptimizeError::InvalidConstraints(format!(
                    "sector '{}' limit must lie within [0, 1]",
                    limit.sector
                )));
            }
            for &i in &limit.members {
                if i >= n {
                    return Err(OptimizeError::InvalidConstraints(format!(
                        "sector '{}' references asset {i} but the universe has {n} assets",
                        limit.sector
                    )));
                }
                if sector_of[i].is_some() {
                    return Err(OptimizeError::InvalidConstraints(format!(
                        "asset {i} is assigned to more than one sector"
                    )));
                }
                sector_of[i] = Some(k);
            }
            let floor = limit.members.len() as f64 * lo;
            if floor > limit.max_weight + FEASIBILITY_EPS {
                return Err(OptimizeError::InvalidConstraints(format!(
                    "sector '{}' minimum holdings {floor} exceed its limit {}",
                    limit.sector, limit.max_weight
                )));
            }
            sectors.push(Sector {
                limit: limit.max_weight,
                members: limit.members.clone(),
            });
        }

        if n as f64 * lo > 1.0 + FEASIBILITY_EPS {
            return Err(OptimizeError::InvalidConstraints(format!(
                "minWeight {lo} across {n} assets exceeds a fully invested portfolio"
            )));
        }

        let unsectored: Vec<usize> = (0..n).filter(|&i| sector_of[i].is_none()).collect();
        let capacity = unsectored.len() as f64 * hi
            + sectors
                .iter()
                .map(|s| s.limit.min(s.members.len() as f64 * hi))
                .sum::<f64>();
        if capacity < 1.0 - FEASIBILITY_EPS {
            return Err(OptimizeError::InvalidConstraints(format!(
                "bounds and sector limits allow at most {capacity} to be invested"
            )));
        }

        Ok(Self {
            n,
            lo,
            hi,
            sectors,
            sector_of,
            unsectored,
        })
    }

    fn has_sectors(&self) -> bool {
        !self.sectors.is_empty()
    }

    fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.lo, self.hi)
    }

    fn project(&self, v: &[f64]) -> Vec<f64> {
        let vmin = v.iter().copied().fold(f64::INFINITY, f64::min);
        let vmax = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // Every weight sits at its upper bound at `low` and at its lower
        // bound at `high`.
        let mut low = vmin - self.hi - 1.0;
        let mut high = vmax - self.lo + 1.0;
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (low + high);
            if self.total_at(v, mid) > 1.0 {
                low = mid;
            } else {
                high = mid;
            }
            if high - low <= f64::EPSILON * (1.0 + mid.abs()) {
                break;
            }
        }
        self.weights_at(v, 0.5 * (low + high))
    }

    /// Invested total after shifting by `shift`. A sector that would
    /// overflow contributes exactly its cap, so no per-sector search is
    /// needed until the shift is known.
    fn total_at(&self, v: &[f64], shift: f64) -> f64 {
        let free: f64 = self
            .unsectored
            .iter()
            .map(|&i| self.clamp(v[i] - shift))
            .sum();
        let capped: f64 = self
            .sectors
            .iter()
            .map(|s| {
                s.members
                    .iter()
                    .map(|&i| self.clamp(v[i] - shift))
                    .sum::<f64>()
                    .min(s.limit)
            })
            .sum();
        free + capped
    }

    fn weights_at(&self, v: &[f64], shift: f64) -> Vec<f64> {
        let mut w = vec![0.0; self.n];
        for &i in &self.unsectored {
            w[i] = self.clamp(v[i] - shift);
        }
        for sector in &self.sectors {
            let extra = self.sector_shift(v, shift, sector);
            for &i in &sector.members {
                w[i] = self.clamp(v[i] - shift - extra);
            }
        }
        w
    }

    fn sector_shift(&self, v: &[f64], shift: f64, sector: &Sector) -> f64 {
        let sum_at = |extra: f64| -> f64 {
            sector
                .members
                .iter()
                .map(|&i| self.clamp(v[i] - shift - extra))
                .sum()
        };
        if sum_at(0.0) <= sector.limit {
            return 0.0;
        }
        let vmax = sector
            .members
            .iter()
            .map(|&i| v[i])
            .fold(f64::NEG_INFINITY, f64::max);
        let mut low = 0.0;
        let mut high = (vmax - shift - self.lo).max(0.0) + 1.0;
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (low + high);
            if sum_at(mid) > sector.limit {
                low = mid;
            } else {
                high = mid;
            }
            if high - low <= f64::EPSILON * (1.0 + high) {
                break;
            }
        }
        high
    }

    /// Greedy fill in score order; exact for box bounds plus disjoint sector
    /// caps.
    fn extreme(&self, scores: &[f64], maximize: bool) -> Vec<f64> {
        let mut order: Vec<usize> = (0..self.n).collect();
        if maximize {
            order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        } else {
            order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        }

        let mut w = vec![self.lo; self.n];
        let mut remaining = 1.0 - self.n as f64 * self.lo;
        let mut room: Vec<f64> = self
            .sectors
            .iter()
            .map(|s| s.limit - s.members.len() as f64 * self.lo)
            .collect();
        for i in order {
            if remaining <= 0.0 {
                break;
            }
            let mut cap = self.hi - self.lo;
            if let Some(k) = self.sector_of[i] {
                cap = cap.min(room[k].max(0.0));
            }
            let take = cap.min(remaining);
            w[i] += take;
            remaining -= take;
            if let Some(k) = self.sector_of[i] {
                room[k] -= take;
            }
        }
        w
    }

    fn contains(&self, w: &[f64]) -> bool {
        w.iter()
            .all(|&x| x >= self.lo - FEASIBILITY_EPS && x <= self.hi + FEASIBILITY_EPS)
            && self.sectors.iter().all(|s| {
                s.members.iter().map(|&i| w[i]).sum::<f64>() <= s.limit + FEASIBILITY_EPS
            })
    }
}

#[derive(Debug, Clone, Copy)]
enum Goal {
    Variance,
    NegativeSharpe,
    PenalizedVariance {
        target: f64,
        multiplier: f64,
        rho: f64,
    },
    RiskParity,
}

/// Solution of a neighbouring `target_return` problem, used to seed the
/// next solve in a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmStart {
    pub weights: Vector,
    pub multiplier: f64,
}

#[derive(Debug)]
struct Descent {
    weights: Vector,
    iterations: u32,
    converged: bool,
}

pub struct PortfolioOptimizer<'a> {
    returns: &'a [f64],
    covariance: &'a Matrix,
    risk_free_rate: f64,
    feasible: FeasibleSet,
    config: OptimizerConfig,
}

impl<'a> PortfolioOptimizer<'a> {
    /// Validates the universe and constraints up front; no search runs for
    /// an invalid problem.
    pub fn new(
        returns: &'a [f64],
        covariance: &'a CovarianceMatrix,
        constraints: &Constraints,
        risk_free_rate: f64,
    ) -> Result<Self, OptimizeError> {
        if returns.is_empty() {
            return Err(OptimizeError::EmptyUniverse);
        }
        if covariance.dim() != returns.len() {
            return Err(LinalgError::length(returns.len(), covariance.dim()).into());
        }
        if let Some(i) = returns.iter().position(|r| !r.is_finite()) {
            return Err(OptimizeError::InvalidParameters(format!(
                "expected return of asset {i} is not finite"
            )));
        }
        if !risk_free_rate.is_finite() {
            return Err(OptimizeError::InvalidParameters(
                "risk-free rate must be finite".to_string(),
            ));
        }
        let feasible = FeasibleSet::new(constraints, returns.len())?;

        Ok(Self {
            returns,
            covariance: covariance.matrix(),
            risk_free_rate,
            feasible,
            config: OptimizerConfig::default(),
        })
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn asset_count(&self) -> usize {
        self.returns.len()
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub fn optimize(
        &self,
        objective: Objective,
        target_return: Option<f64>,
    ) -> Result<OptimizationResult, OptimizeError> {
        let result = match objective {
            Objective::MinVariance => self.min_variance(),
            Objective::MaxSharpe => self.max_sharpe(),
            Objective::RiskParity => self.risk_parity(),
            Objective::TargetReturn => {
                let target = target_return.ok_or_else(|| {
                    OptimizeError::InvalidParameters(
                        "target_return objective requires a target return".to_string(),
                    )
                })?;
                self.optimize_target_return(target, None)?.0
            }
        };
        debug!(
            ?objective,
            iterations = result.iterations,
            converged = result.converged,
            expected_return = result.expected_return,
            volatility = result.volatility,
            "portfolio optimized"
        );
        Ok(result)
    }

    /// Lowest and highest expected return of any feasible portfolio.
    pub fn achievable_return_range(&self) -> (f64, f64) {
        let low = self.feasible.extreme(self.returns, false);
        let high = self.feasible.extreme(self.returns, true);
        (self.expected_return(&low), self.expected_return(&high))
    }

    pub fn evaluate(&self, weights: &[f64]) -> Result<OptimizationResult, OptimizeError> {
        if weights.len() != self.asset_count() {
            return Err(LinalgError::length(self.asset_count(), weights.len()).into());
        }
        Ok(self.build_result(weights.to_vec(), 0, true))
    }

    fn min_variance(&self) -> OptimizationResult {
        if let Some(w) = self.closed_form(&vec![1.0; self.asset_count()]) {
            return self.build_result(w, 0, true);
        }
        let d = self.descend(Goal::Variance, self.uniform_start(), self.config.max_iterations);
        self.build_result(d.weights, d.iterations, d.converged)
    }

    fn max_sharpe(&self) -> OptimizationResult {
        let excess: Vec<f64> = self
            .returns
            .iter()
            .map(|r| r - self.risk_free_rate)
            .collect();
        if let Some(w) = self.closed_form(&excess) {
            return self.build_result(w, 0, true);
        }
        let d = self.descend(
            Goal::NegativeSharpe,
            self.uniform_start(),
            self.config.max_iterations,
        );
        self.build_result(d.weights, d.iterations, d.converged)
    }

    fn risk_parity(&self) -> OptimizationResult {
        let n = self.asset_count();
        let start = if (0..n).all(|i| self.covariance.get(i, i) > 0.0) {
            let inv_vol: Vec<f64> = (0..n)
                .map(|i| 1.0 / self.covariance.get(i, i).sqrt())
                .collect();
            let total: f64 = inv_vol.iter().sum();
            self.feasible
                .project(&inv_vol.iter().map(|v| v / total).collect::<Vec<_>>())
        } else {
            self.uniform_start()
        };
        let d = self.descend(Goal::RiskParity, start, self.config.max_iterations);
        self.build_result(d.weights, d.iterations, d.converged)
    }

    /// Minimum-variance portfolio earning `target`, optionally seeded from
    /// a neighbouring solve. Returns the state to seed the next target with.
    pub fn optimize_target_return(
        &self,
        target: f64,
        warm: Option<&WarmStart>,
    ) -> Result<(OptimizationResult, WarmStart), OptimizeError> {
        if !target.is_finite() {
            return Err(OptimizeError::InvalidParameters(
                "target return must be finite".to_string(),
            ));
        }
        let (min_achievable, max_achievable) = self.achievable_return_range();
        let tol = self.config.return_tolerance;
        let infeasible = || OptimizeError::InfeasibleTarget {
            target,
            min_achievable,
            max_achievable,
        };
        if target < min_achievable - tol || target > max_achievable + tol {
            return Err(infeasible());
        }

        let carried = warm.map_or(0.0, |w| w.multiplier);
        let settled = |result: OptimizationResult| {
            let next = WarmStart {
                weights: result.weights.clone(),
                multiplier: carried,
            };
            (result, next)
        };

        let spread = max_achievable - min_achievable;
        if spread <= tol {
            // Every feasible portfolio earns the same return.
            return Ok(settled(self.min_variance()));
        }
        let edge = 1e-12 * (1.0 + target.abs());
        if target >= max_achievable - edge {
            let w = self.feasible.extreme(self.returns, true);
            return Ok(settled(self.build_result(w, 0, true)));
        }
        if target <= min_achievable + edge {
            let w = self.feasible.extreme(self.returns, false);
            return Ok(settled(self.build_result(w, 0, true)));
        }

        let scale = (0..self.asset_count())
            .map(|i| self.covariance.get(i, i))
            .fold(1e-8, f64::max);
        let mut rho = 50.0 * scale / (spread * spread);
        let mut multiplier = carried;
        let mut weights = match warm {
            Some(w) if w.weights.len() == self.asset_count() => w.weights.clone(),
            _ => self.uniform_start(),
        };
        let budget = self.config.max_total_iterations.max(1);
        let mut iterations = 0_u32;
        let mut converged = true;
        let mut last_residual = f64::INFINITY;

        for _ in 0..self.config.penalty_rounds.max(1) {
            let remaining = budget.saturating_sub(iterations);
            if remaining == 0 {
                converged = false;
                break;
            }
            let d = self.descend(
                Goal::PenalizedVariance {
                    target,
                    multiplier,
                    rho,
                },
                weights,
                remaining.min(self.config.max_iterations),
            );
            weights = d.weights;
            iterations = iterations.saturating_add(d.iterations);
            converged &= d.converged;

            let residual = self.expected_return(&weights) - target;
            if residual.abs() <= tol * 1e-3 {
                break;
            }
            multiplier += rho * residual;
            if residual.abs() > 0.25 * last_residual {
                rho *= 4.0;
            }
            last_residual = residual.abs();
        }

        let residual = self.expected_return(&weights) - target;
        if residual.abs() > tol {
            return Err(infeasible());
        }
        let next = WarmStart {
            weights: weights.clone(),
            multiplier,
        };
        Ok((self.build_result(weights, iterations, converged), next))
    }

    /// `w ∝ Σ⁻¹b` for small universes, kept only when it is feasible as is.
    fn closed_form(&self, b: &[f64]) -> Option<Vec<f64>> {
        let n = self.asset_count();
        if n > CLOSED_FORM_MAX_ASSETS || self.feasible.has_sectors() {
            return None;
        }
        let inverse = self.covariance.inverse().ok()?;
        let raw = inverse.mul_vec(b).ok()?;
        let total: f64 = raw.iter().sum();
        if total <= 1e-12 || !total.is_finite() {
            return None;
        }
        let w: Vec<f64> = raw.iter().map(|v| v / total).collect();
        if !self.feasible.contains(&w) {
            return None;
        }
        Some(
            w.into_iter()
                .map(|x| x.clamp(self.feasible.lo, self.feasible.hi))
                .collect(),
        )
    }

    fn uniform_start(&self) -> Vector {
        let n = self.asset_count();
        self.feasible.project(&vec![1.0 / n as f64; n])
    }

    fn descend(&self, goal: Goal, start: Vector, max_iterations: u32) -> Descent {
        let mut w = self.feasible.project(&start);
        let mut f = self.value(goal, &w);
        let mut step = 1.0;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < max_iterations {
            iterations += 1;
            let g = self.gradient(goal, &w);

            let mut accepted = None;
            let mut trial = step;
            for _ in 0..MAX_BACKTRACKS {
                let moved: Vec<f64> = w.iter().zip(&g).map(|(x, d)| x - trial * d).collect();
                let candidate = self.feasible.project(&moved);
                let fc = self.value(goal, &candidate);
                let mut linear = 0.0;
                let mut dist_sq = 0.0;
                for ((c, x), d) in candidate.iter().zip(&w).zip(&g) {
                    linear += d * (c - x);
                    dist_sq += (c - x) * (c - x);
                }
                if fc.is_finite() && fc <= f && fc <= f + linear + dist_sq / (2.0 * trial) {
                    accepted = Some((candidate, fc, trial));
                    break;
                }
                trial *= 0.5;
            }

            let Some((candidate, fc, used)) = accepted else {
                converged = true;
                break;
            };

            let max_move = candidate
                .iter()
                .zip(&w)
                .map(|(c, x)| (c - x).abs())
                .fold(0.0, f64::max);
            let improvement = f - fc;
            w = candidate;
            f = fc;
            step = (used * 2.0).min(MAX_STEP);

            if max_move <= self.config.weight_tolerance
                || improvement <= self.config.objective_tolerance * (1.0 + f.abs())
            {
                converged = true;
                break;
            }
        }

        Descent {
            weights: w,
            iterations,
            converged,
        }
    }

    fn value(&self, goal: Goal, w: &[f64]) -> f64 {
        let sw = self.sigma_times(w);
        let variance = dot_unchecked(w, &sw);
        match goal {
            Goal::Variance => variance,
            Goal::NegativeSharpe => {
                let sigma = variance.max(0.0).sqrt().max(SIGMA_FLOOR);
                -(self.expected_return(w) - self.risk_free_rate) / sigma
            }
            Goal::PenalizedVariance {
                target,
                multiplier,
                rho,
            } => {
                let r = self.expected_return(w) - target;
                variance + multiplier * r + 0.5 * rho * r * r
            }
            Goal::RiskParity => {
                if variance <= 1e-20 {
                    return 0.0;
                }
                let fair = variance / w.len() as f64;
                let dispersion: f64 = w
                    .iter()
                    .zip(&sw)
                    .map(|(x, s)| {
                        let d = x * s - fair;
                        d * d
                    })
                    .sum();
                dispersion / (variance * variance)
            }
        }
    }

    fn gradient(&self, goal: Goal, w: &[f64]) -> Vec<f64> {
        let sw = self.sigma_times(w);
        match goal {
            Goal::Variance => sw.iter().map(|s| 2.0 * s).collect(),
            Goal::NegativeSharpe => {
                let variance = dot_unchecked(w, &sw).max(0.0);
                let sigma = variance.sqrt().max(SIGMA_FLOOR);
                let excess = self.expected_return(w) - self.risk_free_rate;
                let sigma3 = sigma * sigma * sigma;
                self.returns
                    .iter()
                    .zip(&sw)
                    .map(|(mu, s)| -mu / sigma + excess * s / sigma3)
                    .collect()
            }
            Goal::PenalizedVariance {
                target,
                multiplier,
                rho,
            } => {
                let r = self.expected_return(w) - target;
                let coeff = multiplier + rho * r;
                sw.iter()
                    .zip(self.returns)
                    .map(|(s, mu)| 2.0 * s + coeff * mu)
                    .collect()
            }
            Goal::RiskParity => {
                let variance = dot_unchecked(w, &sw);
                if variance <= 1e-20 {
                    return vec![0.0; w.len()];
                }
                let fair = variance / w.len() as f64;
                let d: Vec<f64> = w.iter().zip(&sw).map(|(x, s)| x * s - fair).collect();
                let dispersion: f64 = d.iter().map(|v| v * v).sum();
                let dw: Vec<f64> = d.iter().zip(w).map(|(a, b)| a * b).collect();
                let sdw = self.sigma_times(&dw);
                let v2 = variance * variance;
                (0..w.len())
                    .map(|k| {
                        let grad_dispersion = 2.0 * (d[k] * sw[k] + sdw[k]);
                        let grad_variance = 2.0 * sw[k];
                        (grad_dispersion - 2.0 * (dispersion / variance) * grad_variance) / v2
                    })
                    .collect()
            }
        }
    }

    fn sigma_times(&self, w: &[f64]) -> Vec<f64> {
        (0..w.len())
            .map(|i| dot_unchecked(self.covariance.row(i), w))
            .collect()
    }

    fn expected_return(&self, w: &[f64]) -> f64 {
        dot_unchecked(self.returns, w)
    }

    fn build_result(&self, weights: Vec<f64>, iterations: u32, converged: bool) -> OptimizationResult {
        let sw = self.sigma_times(&weights);
        let risk_contributions: Vec<f64> = weights.iter().zip(&sw).map(|(w, s)| w * s).collect();
        let variance = risk_contributions.iter().sum::<f64>().max(0.0);
        let volatility = variance.sqrt();
        let expected_return = self.expected_return(&weights);
        let sharpe_ratio = if volatility > 1e-12 {
            (expected_return - self.risk_free_rate) / volatility
        } else {
            0.0
        };
        OptimizationResult {
            weights,
            expected_return,
            variance,
            volatility,
            sharpe_ratio,
            risk_contributions,
            iterations,
            converged,
        }
    }
}

fn dot_unchecked(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn optimize(
    returns: &[f64],
    covariance: &CovarianceMatrix,
    constraints: &Constraints,
    objective: Objective,
    risk_free_rate: f64,
    target_return: Option<f64>,
) -> Result<OptimizationResult, OptimizeError> {
    PortfolioOptimizer::new(returns, covariance, constraints, risk_free_rate)?
        .optimize(objective, target_return)
}

/// Return, risk and Sharpe ratio of an arbitrary weight vector.
pub fn portfolio_stats(
    weights: &[f64],
    returns: &[f64],
    covariance: &CovarianceMatrix,
    risk_free_rate: f64,
) -> Result<OptimizationResult, OptimizeError> {
    PortfolioOptimizer::new(returns, covariance, &Constraints::default(), risk_free_rate)?
        .evaluate(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SectorLimit;
    use proptest::prelude::{prop, prop_assert, proptest};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn cov(rows: &[&[f64]]) -> CovarianceMatrix {
        CovarianceMatrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>())
            .expect("valid covariance")
    }

    fn four_asset_universe() -> (Vec<f64>, CovarianceMatrix) {
        let returns = vec![0.03, 0.06, 0.08, 0.11];
        let covariance = cov(&[
            &[0.0100, 0.0020, 0.0010, 0.0005],
            &[0.0020, 0.0300, 0.0080, 0.0060],
            &[0.0010, 0.0080, 0.0500, 0.0150],
            &[0.0005, 0.0060, 0.0150, 0.0900],
        ]);
        (returns, covariance)
    }

    fn assert_feasible(result: &OptimizationResult, constraints: &Constraints) {
        let total: f64 = result.weights.iter().sum();
        assert_close(total, 1.0, 1e-6);
        for &w in &result.weights {
            assert!(
                w >= constraints.min_weight - 1e-9 && w <= constraints.max_weight + 1e-9,
                "weight {w} outside bounds"
            );
        }
        for sector in &constraints.sector_limits {
            let sum: f64 = sector.members.iter().map(|&i| result.weights[i]).sum();
            assert!(sum <= sector.max_weight + 1e-9, "sector {} at {sum}", sector.sector);
        }
    }

    #[test]
    fn two_asset_min_variance_matches_closed_form() {
        let returns = [0.05, 0.08];
        let covariance = cov(&[&[0.04, 0.0], &[0.0, 0.09]]);
        let result = optimize(
            &returns,
            &covariance,
            &Constraints::default(),
            Objective::MinVariance,
            0.045,
            None,
        )
        .expect("solvable");
        assert_close(result.weights[0], 0.09 / 0.13, 1e-9);
        assert_close(result.weights[1], 0.04 / 0.13, 1e-9);
        assert_close(result.variance, 0.04 * 0.09 / 0.13, 1e-12);
    }

    #[test]
    fn iterative_min_variance_agrees_with_closed_form_on_three_assets() {
        let returns = [0.04, 0.06, 0.09];
        let covariance = cov(&[
            &[0.02, 0.004, 0.002],
            &[0.004, 0.04, 0.01],
            &[0.002, 0.01, 0.08],
        ]);
        let exact = optimize(
            &returns,
            &covariance,
            &Constraints::default(),
            Objective::MinVariance,
            0.0,
            None,
        )
        .unwrap();
        assert_eq!(exact.iterations, 0);

        // A per-asset cap of 0.99 does not bind but still goes through the
        // closed form; forcing a sector cap sends it down the iterative path.
        let constraints = Constraints {
            sector_limits: vec![SectorLimit {
                sector: "all".to_string(),
                max_weight: 1.0,
                members: vec![0, 1, 2],
            }],
            ..Constraints::default()
        };
        let iterative = optimize(
            &returns,
            &covariance,
            &constraints,
            Objective::MinVariance,
            0.0,
            None,
        )
        .unwrap();
        assert!(iterative.iterations > 0);
        for (a, b) in exact.weights.iter().zip(&iterative.weights) {
            assert_close(*a, *b, 1e-4);
        }
        assert_close(iterative.variance, exact.variance, 1e-8);
    }

    #[test]
    fn min_variance_respects_binding_upper_bound() {
        let (returns, covariance) = four_asset_universe();
        let constraints = Constraints {
            max_weight: 0.4,
            ..Constraints::default()
        };
        let result = optimize(
            &returns,
            &covariance,
            &constraints,
            Objective::MinVariance,
            0.0,
            None,
        )
        .unwrap();
        assert_feasible(&result, &constraints);
        assert_close(result.weights[0], 0.4, 1e-6);
    }

    #[test]
    fn sector_limits_are_enforced() {
        let (returns, covariance) = four_asset_universe();
        let constraints = Constraints {
            min_weight: 0.05,
            max_weight: 0.6,
            sector_limits: vec![
                SectorLimit {
                    sector: "equity".to_string(),
                    max_weight: 0.3,
                    members: vec![2, 3],
                },
                SectorLimit {
                    sector: "bonds".to_string(),
                    max_weight: 0.65,
                    members: vec![0],
                },
            ],
        };
        for objective in [
            Objective::MinVariance,
            Objective::MaxSharpe,
            Objective::RiskParity,
        ] {
            let result =
                optimize(&returns, &covariance, &constraints, objective, 0.02, None).unwrap();
            assert_feasible(&result, &constraints);
        }
        let max_sharpe = optimize(
            &returns,
            &covariance,
            &constraints,
            Objective::MaxSharpe,
            0.02,
            None,
        )
        .unwrap();
        let equity: f64 = max_sharpe.weights[2] + max_sharpe.weights[3];
        assert!(equity <= 0.3 + 1e-9);
    }

    #[test]
    fn sector_limits_above_one_are_rejected_before_search() {
        let (returns, covariance) = four_asset_universe();
        let constraints = Constraints {
            sector_limits: vec![
                SectorLimit {
                    sector: "a".to_string(),
                    max_weight: 0.7,
                    members: vec![0, 1],
                },
                SectorLimit {
                    sector: "b".to_string(),
                    max_weight: 0.5,
                    members: vec![2, 3],
                },
            ],
            ..Constraints::default()
        };
        let err = PortfolioOptimizer::new(&returns, &covariance, &constraints, 0.0)
            .err()
            .expect("must reject");
        assert!(matches!(err, OptimizeError::InvalidConstraints(_)));
    }

    #[test]
    fn inverted_bounds_and_empty_universe_are_rejected() {
        let (returns, covariance) = four_asset_universe();
        let inverted = Constraints {
            min_weight: 0.5,
            max_weight: 0.2,
            ..Constraints::default()
        };
        assert!(matches!(
            optimize(&returns, &covariance, &inverted, Objective::MinVariance, 0.0, None),
            Err(OptimizeError::InvalidConstraints(_))
        ));

        let tight = Constraints {
            min_weight: 0.3,
            ..Constraints::default()
        };
        assert!(matches!(
            optimize(&returns, &covariance, &tight, Objective::MinVariance, 0.0, None),
            Err(OptimizeError::InvalidConstraints(_))
        ));

        let empty = CovarianceMatrix::from_rows(&[]).unwrap();
        assert_eq!(
            optimize(&[], &empty, &Constraints::default(), Objective::MinVariance, 0.0, None),
            Err(OptimizeError::EmptyUniverse)
        );
    }

    #[test]
    fn mismatched_return_vector_is_a_dimension_error() {
        let (_, covariance) = four_asset_universe();
        assert!(matches!(
            optimize(
                &[0.1, 0.2],
                &covariance,
                &Constraints::default(),
                Objective::MinVariance,
                0.0,
                None
            ),
            Err(OptimizeError::Linalg(LinalgError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn target_return_hits_requested_return() {
        let (returns, covariance) = four_asset_universe();
        let constraints = Constraints::default();
        let result = optimize(
            &returns,
            &covariance,
            &constraints,
            Objective::TargetReturn,
            0.0,
            Some(0.07),
        )
        .unwrap();
        assert_feasible(&result, &constraints);
        assert_close(result.expected_return, 0.07, 1e-4);

        let min_var = optimize(
            &returns,
            &covariance,
            &constraints,
            Objective::MinVariance,
            0.0,
            None,
        )
        .unwrap();
        assert!(result.variance >= min_var.variance - 1e-10);
    }

    #[test]
    fn target_return_outside_achievable_range_is_infeasible() {
        let (returns, covariance) = four_asset_universe();
        for target in [0.02, 0.12] {
            let err = optimize(
                &returns,
                &covariance,
                &Constraints::default(),
                Objective::TargetReturn,
                0.0,
                Some(target),
            )
            .unwrap_err();
            assert!(matches!(err, OptimizeError::InfeasibleTarget { .. }));
        }

        let capped = Constraints {
            max_weight: 0.5,
            ..Constraints::default()
        };
        let optimizer = PortfolioOptimizer::new(&returns, &covariance, &capped, 0.0).unwrap();
        let (low, high) = optimizer.achievable_return_range();
        assert_close(low, 0.045, 1e-12);
        assert_close(high, 0.095, 1e-12);
        assert!(matches!(
            optimizer.optimize(Objective::TargetReturn, Some(0.10)),
            Err(OptimizeError::InfeasibleTarget { .. })
        ));
    }

    #[test]
    fn target_return_requires_a_target() {
        let (returns, covariance) = four_asset_universe();
        assert!(matches!(
            optimize(
                &returns,
                &covariance,
                &Constraints::default(),
                Objective::TargetReturn,
                0.0,
                None
            ),
            Err(OptimizeError::InvalidParameters(_))
        ));
    }

    #[test]
    fn max_sharpe_beats_min_variance_and_equal_weight_on_sharpe() {
        let (returns, covariance) = four_asset_universe();
        let rf = 0.02;
        let optimizer =
            PortfolioOptimizer::new(&returns, &covariance, &Constraints::default(), rf).unwrap();
        let best = optimizer.optimize(Objective::MaxSharpe, None).unwrap();
        let min_var = optimizer.optimize(Objective::MinVariance, None).unwrap();
        let equal = optimizer.evaluate(&[0.25; 4]).unwrap();
        assert!(best.sharpe_ratio >= min_var.sharpe_ratio - 1e-9);
        assert!(best.sharpe_ratio >= equal.sharpe_ratio - 1e-9);
    }

    #[test]
    fn two_asset_max_sharpe_matches_tangency_formula() {
        let returns = [0.05, 0.08];
        let covariance = cov(&[&[0.04, 0.0], &[0.0, 0.09]]);
        let rf = 0.02;
        let result = optimize(
            &returns,
            &covariance,
            &Constraints::default(),
            Objective::MaxSharpe,
            rf,
            None,
        )
        .unwrap();
        let a = (0.05 - rf) / 0.04;
        let b = (0.08 - rf) / 0.09;
        assert_close(result.weights[0], a / (a + b), 1e-9);
    }

    #[test]
    fn risk_parity_equalizes_risk_contributions() {
        let (returns, covariance) = four_asset_universe();
        let result = optimize(
            &returns,
            &covariance,
            &Constraints::default(),
            Objective::RiskParity,
            0.0,
            None,
        )
        .unwrap();
        let fair = result.variance / 4.0;
        for rc in &result.risk_contributions {
            assert_close(*rc / fair, 1.0, 1e-3);
        }
        let total: f64 = result.risk_contributions.iter().sum();
        assert_close(total, result.variance, 1e-15);
    }

    #[test]
    fn risk_parity_on_uncorrelated_assets_is_inverse_volatility() {
        let returns = [0.05, 0.07, 0.09, 0.04, 0.06];
        let vols = [0.1, 0.15, 0.2, 0.05, 0.12];
        let rows: Vec<Vec<f64>> = (0..5)
            .map(|i| {
                (0..5)
                    .map(|j| if i == j { vols[i] * vols[i] } else { 0.0 })
                    .collect()
            })
            .collect();
        let covariance = CovarianceMatrix::from_rows(&rows).unwrap();
        let result = optimize(
            &returns,
            &covariance,
            &Constraints::default(),
            Objective::RiskParity,
            0.0,
            None,
        )
        .unwrap();
        let inv_total: f64 = vols.iter().map(|v| 1.0 / v).sum();
        for (w, v) in result.weights.iter().zip(vols) {
            assert_close(*w, (1.0 / v) / inv_total, 1e-6);
        }
    }

    #[test]
    fn projection_lands_in_feasible_set() {
        let constraints = Constraints {
            min_weight: 0.05,
            max_weight: 0.5,
            sector_limits: vec![SectorLimit {
                sector: "tech".to_string(),
                max_weight: 0.35,
                members: vec![0, 1],
            }],
        };
        let set = FeasibleSet::new(&constraints, 4).unwrap();
        let w = set.project(&[3.0, 2.0, -1.0, 0.1]);
        assert_close(w.iter().sum::<f64>(), 1.0, 1e-12);
        assert!(set.contains(&w));
        assert!(w[0] + w[1] <= 0.35 + 1e-12);
    }

    #[test]
    fn portfolio_stats_reports_sharpe() {
        let returns = [0.05, 0.08];
        let covariance = cov(&[&[0.04, 0.0], &[0.0, 0.09]]);
        let stats = portfolio_stats(&[0.5, 0.5], &returns, &covariance, 0.045).unwrap();
        let vol = (0.25 * 0.04 + 0.25 * 0.09_f64).sqrt();
        assert_close(stats.expected_return, 0.065, 1e-15);
        assert_close(stats.volatility, vol, 1e-12);
        assert_close(stats.sharpe_ratio, (0.065 - 0.045) / vol, 1e-12);
        assert!(portfolio_stats(&[1.0], &returns, &covariance, 0.0).is_err());
    }

    fn twenty_asset_universe() -> (Vec<f64>, CovarianceMatrix, Constraints) {
        let n = 20;
        let vols: Vec<f64> = (0..n).map(|i| 0.10 + 0.01 * i as f64).collect();
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        let c = if i == j { 1.0 } else { 0.2 };
                        c * vols[i] * vols[j]
                    })
                    .collect()
            })
            .collect();
        let returns = (0..n).map(|i| 0.03 + 0.004 * i as f64).collect();
        let constraints = Constraints {
            min_weight: 0.0,
            max_weight: 0.3,
            sector_limits: vec![
                SectorLimit {
                    sector: "defensive".to_string(),
                    max_weight: 0.35,
                    members: (0..5).collect(),
                },
                SectorLimit {
                    sector: "growth".to_string(),
                    max_weight: 0.35,
                    members: (15..20).collect(),
                },
            ],
        };
        (returns, cov_owned(rows), constraints)
    }

    fn cov_owned(rows: Vec<Vec<f64>>) -> CovarianceMatrix {
        CovarianceMatrix::from_rows(&rows).expect("valid covariance")
    }

    #[test]
    fn target_return_respects_total_iteration_budget() {
        let (returns, covariance, constraints) = twenty_asset_universe();
        let config = OptimizerConfig {
            max_total_iterations: 50,
            ..OptimizerConfig::default()
        };
        let optimizer = PortfolioOptimizer::new(&returns, &covariance, &constraints, 0.02)
            .expect("valid problem")
            .with_config(config);
        let (low, high) = optimizer.achievable_return_range();
        match optimizer.optimize_target_return(0.5 * (low + high), None) {
            Ok((result, _)) => assert!(result.iterations <= 50, "{}", result.iterations),
            Err(e) => assert!(matches!(e, OptimizeError::InfeasibleTarget { .. })),
        }
    }

    #[test]
    fn warm_started_target_matches_cold_solve() {
        let (returns, covariance, constraints) = twenty_asset_universe();
        let optimizer = PortfolioOptimizer::new(&returns, &covariance, &constraints, 0.02)
            .expect("valid problem");
        let (low, high) = optimizer.achievable_return_range();
        let first = low + 0.40 * (high - low);
        let second = low + 0.42 * (high - low);

        let (_, warm) = optimizer
            .optimize_target_return(first, None)
            .expect("reachable");
        let (seeded, _) = optimizer
            .optimize_target_return(second, Some(&warm))
            .expect("reachable");
        let (cold, _) = optimizer
            .optimize_target_return(second, None)
            .expect("reachable");

        assert_feasible(&seeded, &constraints);
        assert_close(seeded.expected_return, second, 1e-4);
        assert_close(seeded.variance, cold.variance, 1e-5);
        assert_close(
            seeded.variance,
            covariance.portfolio_variance(&seeded.weights).expect("aligned"),
            1e-12,
        );
    }

    #[test]
    fn projection_lands_on_sector_capped_simplex() {
        let (returns, covariance, constraints) = twenty_asset_universe();
        let optimizer = PortfolioOptimizer::new(&returns, &covariance, &constraints, 0.02)
            .expect("valid problem");
        let raw: Vec<f64> = (0..20).map(|i| if i < 5 { 0.5 } else { 0.01 }).collect();
        let projected = optimizer.feasible.project(&raw);
        let result = optimizer.evaluate(&projected).expect("aligned");
        assert_feasible(&result, &constraints);
        let defensive: f64 = projected[..5].iter().sum();
        assert_close(defensive, 0.35, 1e-9);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_weights_sum_to_one_within_bounds(
            vols in prop::collection::vec(0.05f64..0.4, 2..6),
            corr in 0.0f64..0.6,
            min_bp in 0u32..10,
            max_pct in 50u32..101,
            objective_idx in 0usize..3,
        ) {
            let n = vols.len();
            let returns: Vec<f64> = (0..n).map(|i| 0.03 + 0.01 * i as f64).collect();
            let rows: Vec<Vec<f64>> = (0..n)
                .map(|i| {
                    (0..n)
                        .map(|j| {
                            let c = if i == j { 1.0 } else { corr };
                            c * vols[i] * vols[j]
                        })
                        .collect()
                })
                .collect();
            let covariance = CovarianceMatrix::from_rows(&rows).unwrap();
            let constraints = Constraints {
                min_weight: min_bp as f64 / 100.0,
                max_weight: max_pct as f64 / 100.0,
                sector_limits: Vec::new(),
            };
            let objective = [
                Objective::MinVariance,
                Objective::MaxSharpe,
                Objective::RiskParity,
            ][objective_idx];
            let result = optimize(&returns, &covariance, &constraints, objective, 0.02, None)
                .unwrap();
            let total: f64 = result.weights.iter().sum();
            prop_assert!((total - 1.0).abs() <= 1e-6);
            for &w in &result.weights {
                prop_assert!(w >= constraints.min_weight - 1e-9);
                prop_assert!(w <= constraints.max_weight + 1e-9);
            }
        }
    }
}
