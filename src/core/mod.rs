mod engine;
mod error;
mod frontier;
mod jobs;
mod linalg;
mod optimizer;
mod stats;
mod types;

pub use engine::{MonteCarloEngine, SimulationLimits, simulate};
pub use error::{JobError, LinalgError, OptimizeError, SimulationError};
pub use frontier::{EfficientFrontierBuilder, build_frontier, build_frontier_with_constraints};
pub use jobs::{
    CoordinatorConfig, InMemoryJobStore, JobStore, PollConfig, SimulationJobCoordinator,
    poll_until_settled,
};
pub use linalg::{CovarianceMatrix, Matrix, Vector, dot};
pub use optimizer::{OptimizerConfig, PortfolioOptimizer, WarmStart, optimize, portfolio_stats};
pub use stats::{
    Regression, VarianceKind, annualize_return, annualize_volatility, correlation,
    correlation_matrix, covariance, covariance_matrix, cumulative_return, downside_deviation,
    linear_regression, max_drawdown, mean, percentile, sharpe_ratio, sortino_ratio,
    standard_deviation, variance,
};
pub use types::{
    Constraints, DEFAULT_FRONTIER_POINTS, DEFAULT_RISK_FREE_RATE, EfficientFrontier,
    FrontierPoint, JobStatus, MAX_FRONTIER_POINTS, MIN_FRONTIER_POINTS, Objective,
    OptimizationResult, PercentileBand, SectorLimit, SimulationJob, SimulationParams,
    SimulationResult, SimulationSummary, YearPercentiles,
};
