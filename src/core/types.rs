use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RISK_FREE_RATE: f64 = 0.045;
pub const DEFAULT_FRONTIER_POINTS: usize = 50;
pub const MIN_FRONTIER_POINTS: usize = 10;
pub const MAX_FRONTIER_POINTS: usize = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MinVariance,
    MaxSharpe,
    TargetReturn,
    RiskParity,
}

/// Cap on the combined weight of the assets listed in `members` (indices
/// into the return vector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorLimit {
    pub sector: String,
    pub max_weight: f64,
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Constraints {
    pub min_weight: f64,
    pub max_weight: f64,
    pub sector_limits: Vec<SectorLimit>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_weight: 0.0,
            max_weight: 1.0,
            sector_limits: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub variance: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Per-asset share of portfolio variance, `w_i * (Σw)_i`; sums to
    /// `variance`.
    pub risk_contributions: Vec<f64>,
    pub iterations: u32,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierPoint {
    pub target_return: f64,
    pub achieved_return: f64,
    pub achieved_risk: f64,
    pub sharpe_ratio: f64,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficientFrontier {
    pub points: Vec<FrontierPoint>,
    /// Sweep targets that had no feasible portfolio.
    pub gaps: Vec<f64>,
    pub min_variance: OptimizationResult,
    pub tangency: OptimizationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub start_value: f64,
    pub monthly_contribution: f64,
    /// Annualized.
    pub expected_return: f64,
    /// Annualized.
    pub volatility: f64,
    pub years: u32,
    pub iterations: u32,
    #[serde(default)]
    pub goal_amount: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearPercentiles {
    pub year: u32,
    pub percentiles: PercentileBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub mean_final: f64,
    pub median_final: f64,
    pub min_final: f64,
    pub max_final: f64,
    pub total_invested: f64,
    /// Fraction of paths ending below `total_invested`.
    pub probability_of_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub year_by_year: Vec<YearPercentiles>,
    pub goal_probability: Option<f64>,
    pub summary: SimulationSummary,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationJob {
    pub job_id: String,
    pub status: JobStatus,
    pub params: Option<SimulationParams>,
    pub result: Option<SimulationResult>,
    pub error_message: Option<String>,
}
