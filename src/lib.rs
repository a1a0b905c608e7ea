//! Route optimization and dynamic dispatch engine.
//!
//! Plans capacitated, time-windowed delivery routes over a travel matrix
//! from an external routing service (great-circle fallback included),
//! degrades to a greedy heuristic when the constrained solver cannot, and
//! periodically re-plans each tenant's open demand against live vehicle
//! positions.

pub mod cluster;
pub mod config;
pub mod error;
pub mod geo;
pub mod live;
pub mod matrix;
pub mod model;
pub mod optimize;
pub mod predictor;
pub mod scheduler;
pub mod solver;
pub mod store;

pub use config::{EngineConfig, SolverMode};
pub use error::{DispatchError, MatrixError, SolverError, StoreError};
pub use geo::{haversine_km, Point};
pub use live::{LiveLocationStore, LivePosition};
pub use matrix::{MatrixProvider, TravelMatrix};
pub use model::{
    Depot, DepotModel, OptimizeOutcome, PlannedRoute, RouteStatus, SolverUsed, Stop, StoredRoute,
    TimeWindow, TrafficLevel, Vehicle,
};
pub use optimize::{ConstrainedBackend, RouteOptimizer};
pub use scheduler::{DepotOutcome, RerouteScheduler, TenantReport};
pub use store::{InMemoryRepository, RouteRepository};
