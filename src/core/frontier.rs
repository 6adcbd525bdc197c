use tracing::{debug, warn};

use super::error::OptimizeError;
use super::linalg::CovarianceMatrix;
use super::optimizer::{OptimizerConfig, PortfolioOptimizer, WarmStart};
use super::types::{
    Constraints, DEFAULT_FRONTIER_POINTS, DEFAULT_RISK_FREE_RATE, EfficientFrontier,
    FrontierPoint, MAX_FRONTIER_POINTS, MIN_FRONTIER_POINTS, Objective,
};

/// Traces the efficient frontier by sweeping target returns from the
/// minimum-variance portfolio up to the highest achievable return.
///
/// Pure function of its inputs; nothing is cached between builds.
#[derive(Debug, Clone)]
pub struct EfficientFrontierBuilder {
    risk_free_rate: f64,
    num_points: usize,
    constraints: Constraints,
    optimizer: OptimizerConfig,
}

impl Default for EfficientFrontierBuilder {
    fn default() -> Self {
        Self {
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            num_points: DEFAULT_FRONTIER_POINTS,
            constraints: Constraints::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl EfficientFrontierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn num_points(mut self, num_points: usize) -> Self {
        self.num_points = num_points;
        self
    }

    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn optimizer_config(mut self, config: OptimizerConfig) -> Self {
        self.optimizer = config;
        self
    }

    pub fn build(
        &self,
        returns: &[f64],
        covariance: &CovarianceMatrix,
    ) -> Result<EfficientFrontier, OptimizeError> {
        if !(MIN_FRONTIER_POINTS..=MAX_FRONTIER_POINTS).contains(&self.num_points) {
            return Err(OptimizeError::InvalidParameters(format!(
                "numPoints must be between {MIN_FRONTIER_POINTS} and {MAX_FRONTIER_POINTS}, got {}",
                self.num_points
            )));
        }

        let optimizer =
            PortfolioOptimizer::new(returns, covariance, &self.constraints, self.risk_free_rate)?
                .with_config(self.optimizer);
        let min_variance = optimizer.optimize(Objective::MinVariance, None)?;
        let tangency = optimizer.optimize(Objective::MaxSharpe, None)?;
        let (_, max_return) = optimizer.achievable_return_range();
        let low = min_variance.expected_return.min(max_return);
        let step = (max_return - low) / (self.num_points - 1) as f64;

        // Each target is seeded from the previous target's solution.
        let mut warm = WarmStart {
            weights: min_variance.weights.clone(),
            multiplier: 0.0,
        };
        let mut points = Vec::with_capacity(self.num_points);
        let mut gaps = Vec::new();
        for k in 0..self.num_points {
            let target = if k + 1 == self.num_points {
                max_return
            } else {
                low + step * k as f64
            };
            match optimizer.optimize_target_return(target, Some(&warm)) {
                Ok((result, next)) => {
                    warm = next;
                    points.push(FrontierPoint {
                        target_return: target,
                        achieved_return: result.expected_return,
                        achieved_risk: result.volatility,
                        sharpe_ratio: result.sharpe_ratio,
                        weights: result.weights,
                    });
                }
                Err(OptimizeError::InfeasibleTarget { .. }) => {
                    warn!(target, "frontier point skipped: target not reachable");
                    gaps.push(target);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            points = points.len(),
            gaps = gaps.len(),
            low,
            high = max_return,
            "efficient frontier built"
        );

        Ok(EfficientFrontier {
            points,
            gaps,
            min_variance,
            tangency,
        })
    }
}

pub fn build_frontier(
    returns: &[f64],
    covariance: &CovarianceMatrix,
    risk_free_rate: f64,
    num_points: usize,
) -> Result<EfficientFrontier, OptimizeError> {
    EfficientFrontierBuilder::new()
        .risk_free_rate(risk_free_rate)
        .num_points(num_points)
        .build(returns, covariance)
}

pub fn build_frontier_with_constraints(
    returns: &[f64],
    covariance: &CovarianceMatrix,
    constraints: &Constraints,
    risk_free_rate: f64,
    num_points: usize,
) -> Result<EfficientFrontier, OptimizeError> {
    EfficientFrontierBuilder::new()
        .risk_free_rate(risk_free_rate)
        .num_points(num_points)
        .constraints(constraints.clone())
        .build(returns, covariance)
}
