use axum::{
    Router,
    extract::{Json, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    Constraints, CoordinatorConfig, CovarianceMatrix, DEFAULT_FRONTIER_POINTS,
    DEFAULT_RISK_FREE_RATE, EfficientFrontierBuilder, JobError, Objective, SectorLimit,
    SimulationJobCoordinator, SimulationLimits, SimulationParams, optimize, simulate,
};

const DEFAULT_SIMULATION_ITERATIONS: u32 = 1_000;
// A status record must outlive the longest run the iteration and year caps
// allow, or a live job would read as not found.
const MIN_STATUS_TTL_SECS: u64 = 300;

#[derive(Parser, Debug)]
#[command(
    name = "fincore",
    about = "Portfolio optimization, efficient frontiers and Monte Carlo wealth projections"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Run one projection in the foreground and print it as JSON.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(
        long,
        default_value_t = 3_600,
        help = "Seconds a job status record is retained"
    )]
    pub status_ttl_secs: u64,
    #[arg(
        long,
        default_value_t = 86_400,
        help = "Seconds a simulation result is retained"
    )]
    pub result_ttl_secs: u64,
    #[arg(long, default_value_t = 10_000)]
    pub max_simulation_iterations: u32,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long)]
    pub start_value: f64,
    #[arg(long, default_value_t = 0.0)]
    pub monthly_contribution: f64,
    #[arg(long, help = "Annual expected return in percent")]
    pub expected_return: f64,
    #[arg(long, help = "Annual volatility in percent")]
    pub volatility: f64,
    #[arg(long)]
    pub years: u32,
    #[arg(long, default_value_t = DEFAULT_SIMULATION_ITERATIONS)]
    pub iterations: u32,
    #[arg(long)]
    pub goal_amount: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
}

fn build_coordinator_config(args: &ServeArgs) -> Result<CoordinatorConfig, String> {
    if args.status_ttl_secs < MIN_STATUS_TTL_SECS {
        return Err(format!(
            "--status-ttl-secs must be >= {MIN_STATUS_TTL_SECS}"
        ));
    }

    if args.result_ttl_secs < args.status_ttl_secs {
        return Err("--result-ttl-secs must be >= --status-ttl-secs".to_string());
    }

    let defaults = SimulationLimits::default();
    if args.max_simulation_iterations < defaults.min_iterations {
        return Err(format!(
            "--max-simulation-iterations must be >= {}",
            defaults.min_iterations
        ));
    }

    Ok(CoordinatorConfig {
        status_ttl: Duration::from_secs(args.status_ttl_secs),
        result_ttl: Duration::from_secs(args.result_ttl_secs),
        limits: SimulationLimits {
            max_iterations: args.max_simulation_iterations,
            ..defaults
        },
    })
}

fn build_simulation_params(args: SimulateArgs) -> Result<SimulationParams, String> {
    if !args.start_value.is_finite() || args.start_value < 0.0 {
        return Err("--start-value must be >= 0".to_string());
    }

    if !args.monthly_contribution.is_finite() || args.monthly_contribution < 0.0 {
        return Err("--monthly-contribution must be >= 0".to_string());
    }

    if !args.expected_return.is_finite() || args.expected_return <= -100.0 {
        return Err("--expected-return must be > -100".to_string());
    }

    if !args.volatility.is_finite() || args.volatility < 0.0 {
        return Err("--volatility must be >= 0".to_string());
    }

    if args.years == 0 {
        return Err("--years must be > 0".to_string());
    }

    Ok(SimulationParams {
        start_value: args.start_value,
        monthly_contribution: args.monthly_contribution,
        expected_return: args.expected_return / 100.0,
        volatility: args.volatility / 100.0,
        years: args.years,
        iterations: args.iterations,
        goal_amount: args.goal_amount,
        seed: args.seed,
    })
}

/// Runs a projection synchronously and renders it as pretty JSON.
pub fn run_cli_simulation(args: SimulateArgs) -> Result<String, String> {
    let params = build_simulation_params(args)?;
    let result = simulate(&params).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiObjective {
    #[serde(alias = "minVariance", alias = "min_variance")]
    MinVariance,
    #[serde(alias = "maxSharpe", alias = "max_sharpe")]
    MaxSharpe,
    #[serde(alias = "targetReturn", alias = "target_return")]
    TargetReturn,
    #[serde(alias = "riskParity", alias = "risk_parity")]
    RiskParity,
}

impl From<ApiObjective> for Objective {
    fn from(value: ApiObjective) -> Self {
        match value {
            ApiObjective::MinVariance => Objective::MinVariance,
            ApiObjective::MaxSharpe => Objective::MaxSharpe,
            ApiObjective::TargetReturn => Objective::TargetReturn,
            ApiObjective::RiskParity => Objective::RiskParity,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConstraintsPayload {
    min_weight: Option<f64>,
    max_weight: Option<f64>,
    sector_limits: Option<Vec<SectorLimit>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizePayload {
    expected_returns: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    objective: ApiObjective,
    #[serde(default)]
    constraints: Option<ConstraintsPayload>,
    #[serde(default)]
    risk_free_rate: Option<f64>,
    #[serde(default)]
    target_return: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrontierPayload {
    expected_returns: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    #[serde(default)]
    constraints: Option<ConstraintsPayload>,
    #[serde(default)]
    risk_free_rate: Option<f64>,
    #[serde(default)]
    num_points: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationPayload {
    #[serde(default)]
    job_id: Option<String>,
    start_value: f64,
    #[serde(default)]
    monthly_contribution: f64,
    expected_return: f64,
    volatility: f64,
    years: u32,
    #[serde(default)]
    iterations: Option<u32>,
    #[serde(default)]
    goal_amount: Option<f64>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    job_id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

struct MarketInputs {
    returns: Vec<f64>,
    covariance: CovarianceMatrix,
    constraints: Constraints,
    risk_free_rate: f64,
}

fn market_inputs(
    expected_returns: Vec<f64>,
    covariance: &[Vec<f64>],
    constraints: Option<ConstraintsPayload>,
    risk_free_rate: Option<f64>,
) -> Result<MarketInputs, String> {
    if expected_returns.is_empty() {
        return Err("expectedReturns must not be empty".to_string());
    }

    if expected_returns.iter().any(|r| !r.is_finite()) {
        return Err("expectedReturns must be finite".to_string());
    }

    let covariance = CovarianceMatrix::from_rows(covariance).map_err(|e| e.to_string())?;

    let risk_free_rate = risk_free_rate.unwrap_or(DEFAULT_RISK_FREE_RATE);
    if !risk_free_rate.is_finite() {
        return Err("riskFreeRate must be finite".to_string());
    }

    let mut resolved = Constraints::default();
    if let Some(payload) = constraints {
        if let Some(v) = payload.min_weight {
            resolved.min_weight = v;
        }
        if let Some(v) = payload.max_weight {
            resolved.max_weight = v;
        }
        if let Some(v) = payload.sector_limits {
            resolved.sector_limits = v;
        }
    }

    Ok(MarketInputs {
        returns: expected_returns,
        covariance,
        constraints: resolved,
        risk_free_rate,
    })
}

fn simulation_request(payload: SimulationPayload) -> (Option<String>, SimulationParams) {
    let params = SimulationParams {
        start_value: payload.start_value,
        monthly_contribution: payload.monthly_contribution,
        expected_return: payload.expected_return,
        volatility: payload.volatility,
        years: payload.years,
        iterations: payload
            .iterations
            .unwrap_or(DEFAULT_SIMULATION_ITERATIONS),
        goal_amount: payload.goal_amount,
        seed: payload.seed,
    };
    let job_id = payload.job_id.filter(|id| !id.trim().is_empty());
    (job_id, params)
}

pub fn router(coordinator: SimulationJobCoordinator) -> Router {
    Router::new()
        .route("/api/optimize", post(optimize_handler))
        .route("/api/frontier", post(frontier_handler))
        .route("/api/simulations", post(submit_simulation_handler))
        .route("/api/simulations/:id/status", get(simulation_status_handler))
        .route("/api/simulations/:id/result", get(simulation_result_handler))
        .fallback(not_found_handler)
        .with_state(coordinator)
}

pub async fn run_http_server(args: ServeArgs) -> std::io::Result<()> {
    let config = build_coordinator_config(&args)
        .map_err(|msg| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))?;
    let coordinator = SimulationJobCoordinator::in_memory(config);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "fincore HTTP API listening");

    axum::serve(listener, router(coordinator)).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn optimize_handler(Json(payload): Json<OptimizePayload>) -> Response {
    run_blocking(move || optimize_response(payload)).await
}

async fn frontier_handler(Json(payload): Json<FrontierPayload>) -> Response {
    run_blocking(move || frontier_response(payload)).await
}

/// Runs optimizer work on the blocking pool.
async fn run_blocking<F>(work: F) -> Response
where
    F: FnOnce() -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(response) => response,
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("computation aborted: {e}"),
        ),
    }
}

fn optimize_response(payload: OptimizePayload) -> Response {
    let inputs = match market_inputs(
        payload.expected_returns,
        &payload.covariance,
        payload.constraints,
        payload.risk_free_rate,
    ) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match optimize(
        &inputs.returns,
        &inputs.covariance,
        &inputs.constraints,
        payload.objective.into(),
        inputs.risk_free_rate,
        payload.target_return,
    ) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn frontier_response(payload: FrontierPayload) -> Response {
    let inputs = match market_inputs(
        payload.expected_returns,
        &payload.covariance,
        payload.constraints,
        payload.risk_free_rate,
    ) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let frontier = EfficientFrontierBuilder::new()
        .risk_free_rate(inputs.risk_free_rate)
        .num_points(payload.num_points.unwrap_or(DEFAULT_FRONTIER_POINTS))
        .constraints(inputs.constraints)
        .build(&inputs.returns, &inputs.covariance);

    match frontier {
        Ok(frontier) => json_response(StatusCode::OK, frontier),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn submit_simulation_handler(
    State(coordinator): State<SimulationJobCoordinator>,
    Json(payload): Json<SimulationPayload>,
) -> Response {
    let (job_id, params) = simulation_request(payload);
    match coordinator.submit(job_id, params) {
        Ok(job_id) => json_response(StatusCode::ACCEPTED, SubmittedResponse { job_id }),
        Err(e) => job_error_response(&e),
    }
}

async fn simulation_status_handler(
    State(coordinator): State<SimulationJobCoordinator>,
    Path(job_id): Path<String>,
) -> Response {
    match coordinator.get_status(&job_id) {
        Ok(Some(status)) => json_response(
            StatusCode::OK,
            StatusResponse {
                job_id,
                status: status.to_string(),
            },
        ),
        Ok(None) => json_response(
            StatusCode::NOT_FOUND,
            StatusResponse {
                job_id,
                status: "not_found".to_string(),
            },
        ),
        Err(e) => job_error_response(&e),
    }
}

async fn simulation_result_handler(
    State(coordinator): State<SimulationJobCoordinator>,
    Path(job_id): Path<String>,
) -> Response {
    match coordinator.get_result(&job_id) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => job_error_response(&e),
    }
}

fn job_error_response(err: &JobError) -> Response {
    let status = match err {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::DuplicateJob(_) | JobError::NotReady { .. } => StatusCode::CONFLICT,
        JobError::JobFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        JobError::NoRuntime | JobError::PollTimeout { .. } | JobError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
