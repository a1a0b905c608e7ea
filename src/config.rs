//! Engine configuration with environment overrides.

use std::env;
use std::str::FromStr;

use crate::model::TrafficWeights;

/// Which solver the optimizer dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverMode {
    /// CVRPTW solver with capacity/time-window constraints and dropping.
    Constrained,
    /// Best-effort greedy heuristic, no constraint enforcement.
    Greedy,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the external table/matrix routing service.
    pub routing_base_url: String,
    pub routing_profile: String,
    pub routing_timeout_sec: u64,
    /// Point-count ceiling of the routing service (local precondition).
    pub matrix_max_points: usize,
    /// Fall back to great-circle estimates when the routing service fails.
    pub fallback_geometric: bool,
    /// Average speed used to derive durations in the geometric fallback.
    pub fallback_speed_kmph: f64,

    pub solver_mode: SolverMode,
    pub solver_time_limit_sec: u64,
    pub solver_seed: u64,
    /// Objective penalty (minutes) per dropped stop.
    pub drop_penalty_min: f64,
    /// Maximum wait before a time window opens.
    pub wait_allowance_min: f64,
    pub max_route_duration_min: f64,

    pub cluster_radius_km: f64,
    pub cluster_min_size: usize,
    /// Batches above this stop count are pre-clustered.
    pub cluster_threshold: usize,

    pub reroute_enabled: bool,
    pub reroute_interval_sec: u64,
    /// Live positions older than this fall back to the persisted start.
    pub live_position_max_age_sec: i64,

    pub traffic_weights: TrafficWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing_base_url: "http://localhost:5001".into(),
            routing_profile: "driving".into(),
            routing_timeout_sec: 10,
            matrix_max_points: 100,
            fallback_geometric: true,
            fallback_speed_kmph: 30.0,
            solver_mode: SolverMode::Constrained,
            solver_time_limit_sec: 10,
            solver_seed: 42,
            drop_penalty_min: 1000.0,
            wait_allowance_min: 5.0,
            max_route_duration_min: 600.0,
            cluster_radius_km: 2.0,
            cluster_min_size: 3,
            cluster_threshold: 50,
            reroute_enabled: true,
            reroute_interval_sec: 60,
            live_position_max_age_sec: 300,
            traffic_weights: TrafficWeights::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

impl EngineConfig {
    /// Builds a config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            routing_base_url: env::var("ROUTING_BASE_URL").unwrap_or(defaults.routing_base_url),
            routing_profile: env::var("ROUTING_PROFILE").unwrap_or(defaults.routing_profile),
            routing_timeout_sec: env_parse("ROUTING_TIMEOUT_SEC", defaults.routing_timeout_sec),
            matrix_max_points: env_parse("ROUTING_MAX_POINTS", defaults.matrix_max_points),
            fallback_geometric: env_bool("ROUTING_FALLBACK_HAVERSINE", defaults.fallback_geometric),
            fallback_speed_kmph: env_parse("REROUTE_AVG_SPEED_KMPH", defaults.fallback_speed_kmph),
            solver_mode: match env::var("SOLVER_MODE").as_deref() {
                Ok("greedy") => SolverMode::Greedy,
                _ => SolverMode::Constrained,
            },
            solver_time_limit_sec: env_parse("SOLVER_TIME_LIMIT_SEC", defaults.solver_time_limit_sec),
            solver_seed: env_parse("SOLVER_SEED", defaults.solver_seed),
            drop_penalty_min: env_parse("SOLVER_DROP_PENALTY_MIN", defaults.drop_penalty_min),
            wait_allowance_min: env_parse("SOLVER_WAIT_ALLOWANCE_MIN", defaults.wait_allowance_min),
            max_route_duration_min: env_parse(
                "SOLVER_MAX_ROUTE_DURATION_MIN",
                defaults.max_route_duration_min,
            ),
            cluster_radius_km: env_parse("CLUSTER_RADIUS_KM", defaults.cluster_radius_km),
            cluster_min_size: env_parse("CLUSTER_MIN_SIZE", defaults.cluster_min_size),
            cluster_threshold: env_parse("CLUSTER_THRESHOLD", defaults.cluster_threshold),
            reroute_enabled: env_bool("REROUTE_ENABLED", defaults.reroute_enabled),
            reroute_interval_sec: env_parse("REROUTE_INTERVAL_SEC", defaults.reroute_interval_sec),
            live_position_max_age_sec: env_parse(
                "LIVE_POSITION_MAX_AGE_SEC",
                defaults.live_position_max_age_sec,
            ),
            traffic_weights: defaults.traffic_weights,
        }
    }
}
