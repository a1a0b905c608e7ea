//! Domain model: stops, vehicles, depots, routes, and solve outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Point;

pub type StopId = String;

/// A service time window in minutes since the shared reference time.
///
/// Arrival may be no later than `due`; arriving before `ready` means
/// waiting until the window opens (callers bound how long).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    ready_min: f64,
    due_min: f64,
}

impl TimeWindow {
    /// Returns `None` if `ready > due` or either bound is non-finite.
    pub fn new(ready_min: f64, due_min: f64) -> Option<Self> {
        if !ready_min.is_finite() || !due_min.is_finite() || ready_min > due_min {
            return None;
        }
        Some(Self { ready_min, due_min })
    }

    pub fn ready(&self) -> f64 {
        self.ready_min
    }

    pub fn due(&self) -> f64 {
        self.due_min
    }

    /// Waiting time if arriving at `arrival`; zero once the window is open.
    pub fn waiting_time(&self, arrival: f64) -> f64 {
        (self.ready_min - arrival).max(0.0)
    }

    pub fn is_violated(&self, arrival: f64) -> bool {
        arrival > self.due_min
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.ready_min && time <= self.due_min
    }
}

/// Relative congestion on the approach to a stop, weighting greedy priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

/// Priority multipliers per traffic level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrafficWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for TrafficWeights {
    fn default() -> Self {
        Self {
            low: 0.8,
            medium: 1.0,
            high: 1.3,
        }
    }
}

impl TrafficWeights {
    pub fn weight(&self, level: Option<TrafficLevel>) -> f64 {
        match level {
            Some(TrafficLevel::Low) => self.low,
            Some(TrafficLevel::Medium) => self.medium,
            Some(TrafficLevel::High) => self.high,
            None => 1.0,
        }
    }
}

/// One delivery demand, snapshotted from a pending order at cycle start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub location: Point,
    pub demand: u32,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    /// Fixed on-site service duration in minutes.
    #[serde(default)]
    pub service_min: f64,
    #[serde(default)]
    pub traffic: Option<TrafficLevel>,
    #[serde(default)]
    pub depot_id: Option<String>,
}

impl Stop {
    pub fn new(id: impl Into<StopId>, location: Point, demand: u32) -> Self {
        Self {
            id: id.into(),
            location,
            demand,
            time_window: None,
            service_min: 0.0,
            traffic: None,
            depot_id: None,
        }
    }

    pub fn with_time_window(mut self, tw: TimeWindow) -> Self {
        self.time_window = Some(tw);
        self
    }

    pub fn with_depot(mut self, depot_id: impl Into<String>) -> Self {
        self.depot_id = Some(depot_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub capacity: u32,
    /// Starting point: the shared depot, or the live position when known.
    pub start: Point,
    #[serde(default)]
    pub shift: Option<TimeWindow>,
    /// Depot the vehicle dispatches from. `None` places it in the
    /// depot-less pool.
    #[serde(default)]
    pub depot_id: Option<String>,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, capacity: u32, start: Point) -> Self {
        Self {
            id: id.into(),
            capacity,
            start,
            shift: None,
            depot_id: None,
        }
    }

    pub fn with_depot(mut self, depot_id: impl Into<String>) -> Self {
        self.depot_id = Some(depot_id.into());
        self
    }
}

/// A shared origin/destination for all vehicles dispatched from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depot {
    pub id: String,
    pub location: Point,
}

impl Depot {
    pub fn new(id: impl Into<String>, location: Point) -> Self {
        Self {
            id: id.into(),
            location,
        }
    }
}

/// How vehicle start/end nodes are modeled for one solve.
#[derive(Debug, Clone)]
pub enum DepotModel {
    /// All vehicles leave from and return to a single shared depot.
    Warehouse(Depot),
    /// Legacy depot-less demand: each vehicle starts and ends at its own
    /// current position.
    VehicleStarts,
}

/// Which solving path produced an outcome (fallback provenance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverUsed {
    Constrained,
    ConstrainedClustered,
    Greedy,
    GreedyFallback,
}

/// An ordered visit plan for one vehicle within one optimization cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub vehicle_id: String,
    pub stop_ids: Vec<StopId>,
    pub distance_km: f64,
    pub duration_min: f64,
}

/// Result of one `optimize` call. Unassigned stops are always surfaced,
/// never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeOutcome {
    pub routes: Vec<PlannedRoute>,
    pub unassigned: Vec<StopId>,
    pub solver_used: SolverUsed,
}

impl OptimizeOutcome {
    pub fn empty(solver_used: SolverUsed) -> Self {
        Self {
            routes: Vec::new(),
            unassigned: Vec::new(),
            solver_used,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Planned,
    Active,
    Superseded,
    Completed,
}

/// A persisted route. Routes are only ever status-transitioned, never
/// deleted, so superseded plans remain as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRoute {
    pub id: u64,
    pub tenant_id: String,
    pub depot_id: Option<String>,
    pub vehicle_id: String,
    pub stop_ids: Vec<StopId>,
    pub distance_km: f64,
    pub duration_min: f64,
    pub status: RouteStatus,
    /// Snapshot of the depot coordinates used for this plan, so historical
    /// routes stay interpretable if the depot later moves.
    pub depot_location: Option<Point>,
    pub solver_used: SolverUsed,
    pub plan_fingerprint: String,
    pub generated_at: DateTime<Utc>,
}
