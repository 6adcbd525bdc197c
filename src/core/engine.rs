use std::f64::consts::PI;
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use tracing::debug;

use super::error::SimulationError;
use super::stats::percentile_sorted;
use super::types::{
    PercentileBand, SimulationParams, SimulationResult, SimulationSummary, YearPercentiles,
};

const MONTHS_PER_YEAR: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationLimits {
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub max_years: u32,
}

impl Default for SimulationLimits {
    fn default() -> Self {
        Self {
            min_iterations: 100,
            max_iterations: 10_000,
            max_years: 100,
        }
    }
}

/// Month-by-month wealth projection over many independent random paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonteCarloEngine {
    limits: SimulationLimits,
}

impl MonteCarloEngine {
    pub fn new(limits: SimulationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SimulationLimits {
        self.limits
    }

    pub fn validate(&self, params: &SimulationParams) -> Result<(), SimulationError> {
        let invalid = |msg: String| Err(SimulationError::InvalidParameters(msg));

        if !params.start_value.is_finite() || params.start_value < 0.0 {
            return invalid("startValue must be a finite amount >= 0".to_string());
        }
        if !params.monthly_contribution.is_finite() || params.monthly_contribution < 0.0 {
            return invalid("monthlyContribution must be a finite amount >= 0".to_string());
        }
        if !params.expected_return.is_finite() {
            return invalid("expectedReturn must be finite".to_string());
        }
        if !params.volatility.is_finite() || params.volatility < 0.0 {
            return invalid("volatility must be >= 0".to_string());
        }
        if params.years < 1 || params.years > self.limits.max_years {
            return invalid(format!(
                "years must be between 1 and {}, got {}",
                self.limits.max_years, params.years
            ));
        }
        if params.iterations < self.limits.min_iterations.max(1)
            || params.iterations > self.limits.max_iterations
        {
            return invalid(format!(
                "iterations must be between {} and {}, got {}",
                self.limits.min_iterations, self.limits.max_iterations, params.iterations
            ));
        }
        if let Some(goal) = params.goal_amount {
            if !goal.is_finite() || goal < 0.0 {
                return invalid("goalAmount must be a finite amount >= 0".to_string());
            }
        }
        Ok(())
    }

    pub fn run(&self, params: &SimulationParams) -> Result<SimulationResult, SimulationError> {
        self.validate(params)?;

        let base_seed = params.seed.unwrap_or_else(clock_seed);
        let years = params.years as usize;

        let paths: Vec<Vec<f64>> = (0..params.iterations)
            .into_par_iter()
            .map(|path_id| {
                let mut rng = Rng::new(derive_seed(base_seed, path_id));
                simulate_path(params, &mut rng)
            })
            .collect();

        let mut year_by_year = Vec::with_capacity(years);
        let mut column = Vec::with_capacity(paths.len());
        for year in 0..years {
            column.clear();
            column.extend(paths.iter().map(|p| p[year]));
            column.sort_by(|a, b| a.total_cmp(b));
            year_by_year.push(YearPercentiles {
                year: year as u32 + 1,
                percentiles: band(&column),
            });
        }

        // `column` now holds the sorted final-year values.
        let finals = column;
        let n = finals.len() as f64;
        let goal_probability = params
            .goal_amount
            .map(|goal| finals.iter().filter(|&&v| v >= goal).count() as f64 / n);

        let total_invested = params.start_value
            + params.monthly_contribution * (MONTHS_PER_YEAR as f64) * params.years as f64;
        let summary = SimulationSummary {
            mean_final: finals.iter().sum::<f64>() / n,
            median_final: percentile_sorted(&finals, 50.0),
            min_final: finals.first().copied().unwrap_or(0.0),
            max_final: finals.last().copied().unwrap_or(0.0),
            total_invested,
            probability_of_loss: finals.iter().filter(|&&v| v < total_invested).count() as f64
                / n,
        };

        debug!(
            iterations = params.iterations,
            years = params.years,
            median_final = summary.median_final,
            ?goal_probability,
            "monte carlo run finished"
        );

        Ok(SimulationResult {
            year_by_year,
            goal_probability,
            summary,
        })
    }
}

pub fn simulate(params: &SimulationParams) -> Result<SimulationResult, SimulationError> {
    MonteCarloEngine::default().run(params)
}

fn band(sorted: &[f64]) -> PercentileBand {
    PercentileBand {
        p10: percentile_sorted(sorted, 10.0),
        p25: percentile_sorted(sorted, 25.0),
        p50: percentile_sorted(sorted, 50.0),
        p75: percentile_sorted(sorted, 75.0),
        p90: percentile_sorted(sorted, 90.0),
    }
}

/// One path: returns the balance at the end of each year.
fn simulate_path(params: &SimulationParams, rng: &mut Rng) -> Vec<f64> {
    let monthly_return = params.expected_return / MONTHS_PER_YEAR as f64;
    let monthly_vol = params.volatility / (MONTHS_PER_YEAR as f64).sqrt();
    let mut balance = params.start_value;
    let mut yearly = Vec::with_capacity(params.years as usize);

    for month in 1..=params.years * MONTHS_PER_YEAR {
        let shock = if monthly_vol > 0.0 {
            monthly_vol * rng.standard_normal()
        } else {
            0.0
        };
        balance = (balance * (1.0 + monthly_return + shock)).max(0.0);
        balance += params.monthly_contribution;
        if month % MONTHS_PER_YEAR == 0 {
            yearly.push(balance);
        }
    }
    yearly
}

fn clock_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    splitmix64(nanos)
}

fn derive_seed(base_seed: u64, path_id: u32) -> u64 {
    splitmix64(base_seed ^ (((path_id as u64) << 32) | path_id as u64))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    /// Box-Muller; the second variate of each pair is cached.
    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}
