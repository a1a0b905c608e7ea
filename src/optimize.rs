//! Optimization pipeline: validation, clustering, matrix acquisition,
//! constrained solve, and the greedy fallback.
//!
//! Every outcome carries `SolverUsed` provenance so callers can tell a
//! constrained plan from a best-effort one without inspecting routes.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::cluster_stops;
use crate::config::{EngineConfig, SolverMode};
use crate::error::DispatchError;
use crate::geo::{centroid, haversine_km, Point};
use crate::matrix::MatrixProvider;
use crate::model::{
    DepotModel, OptimizeOutcome, PlannedRoute, SolverUsed, Stop, Vehicle,
};
use crate::predictor::{DelayPredictor, NoDelay};
use crate::solver::cvrptw::{self, SolverConstraints, SolverInstance, SolverSolution};
use crate::solver::greedy;

/// Seam for the constrained solver so tests (and future engines) can swap
/// the implementation without touching the pipeline.
pub trait ConstrainedBackend: Send + Sync {
    fn solve(
        &self,
        instance: &SolverInstance<'_>,
    ) -> Result<SolverSolution, crate::error::SolverError>;
}

/// Default backend: the in-process CVRPTW solver.
#[derive(Debug, Default)]
pub struct CvrptwBackend;

impl ConstrainedBackend for CvrptwBackend {
    fn solve(
        &self,
        instance: &SolverInstance<'_>,
    ) -> Result<SolverSolution, crate::error::SolverError> {
        cvrptw::solve(instance)
    }
}

pub struct RouteOptimizer {
    config: EngineConfig,
    provider: MatrixProvider,
    backend: Box<dyn ConstrainedBackend>,
    predictor: Box<dyn DelayPredictor>,
}

impl RouteOptimizer {
    pub fn new(config: EngineConfig) -> Result<Self, DispatchError> {
        let provider = MatrixProvider::new(&config)?;
        Ok(Self {
            config,
            provider,
            backend: Box::new(CvrptwBackend),
            predictor: Box::new(NoDelay),
        })
    }

    pub fn with_backend(mut self, backend: Box<dyn ConstrainedBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_predictor(mut self, predictor: Box<dyn DelayPredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Plans routes for one batch of stops.
    ///
    /// Matrix acquisition failures propagate (they are retryable next
    /// cycle); a constrained-solver failure degrades to the greedy
    /// heuristic, tagged `GreedyFallback`, rather than failing dispatch.
    pub async fn optimize(
        &self,
        stops: &[Stop],
        vehicles: &[Vehicle],
        depot_model: &DepotModel,
    ) -> Result<OptimizeOutcome, DispatchError> {
        self.validate(stops, vehicles, depot_model)?;
        if stops.is_empty() {
            return Ok(OptimizeOutcome::empty(match self.config.solver_mode {
                SolverMode::Constrained => SolverUsed::Constrained,
                SolverMode::Greedy => SolverUsed::Greedy,
            }));
        }

        if self.config.solver_mode == SolverMode::Greedy {
            return Ok(self.greedy_outcome(stops, vehicles, depot_model, SolverUsed::Greedy));
        }

        let partitions = self.partition(stops, vehicles.len());
        let clustered = partitions.len() > 1;
        let allocation = split_vehicles(&partitions, vehicles.len());

        let mut routes = Vec::new();
        let mut unassigned = Vec::new();
        let mut vehicle_cursor = 0usize;

        for (partition, vehicle_count) in partitions.iter().zip(allocation.iter()) {
            let pool = &vehicles[vehicle_cursor..vehicle_cursor + vehicle_count];
            vehicle_cursor += vehicle_count;

            match self.solve_partition(partition, pool, depot_model).await {
                Ok((mut planned, mut dropped)) => {
                    routes.append(&mut planned);
                    unassigned.append(&mut dropped);
                }
                Err(PartitionError::Matrix(err)) => return Err(DispatchError::Matrix(err)),
                Err(PartitionError::Solver(err)) => {
                    warn!("constrained solve failed ({err}); degrading to greedy assignment");
                    return Ok(self.greedy_outcome(
                        stops,
                        vehicles,
                        depot_model,
                        SolverUsed::GreedyFallback,
                    ));
                }
            }
        }

        let solver_used = if clustered {
            SolverUsed::ConstrainedClustered
        } else {
            SolverUsed::Constrained
        };
        info!(
            routes = routes.len(),
            unassigned = unassigned.len(),
            clustered,
            "optimization complete"
        );
        Ok(OptimizeOutcome {
            routes,
            unassigned,
            solver_used,
        })
    }

    fn validate(
        &self,
        stops: &[Stop],
        vehicles: &[Vehicle],
        depot_model: &DepotModel,
    ) -> Result<(), DispatchError> {
        if vehicles.is_empty() && !stops.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "no vehicles available".into(),
            ));
        }
        for stop in stops {
            if !stop.location.is_finite() {
                return Err(DispatchError::InvalidRequest(format!(
                    "stop {} has non-finite coordinates",
                    stop.id
                )));
            }
        }
        for vehicle in vehicles {
            if !vehicle.start.is_finite() {
                return Err(DispatchError::InvalidRequest(format!(
                    "vehicle {} has non-finite coordinates",
                    vehicle.id
                )));
            }
        }
        if let DepotModel::Warehouse(depot) = depot_model {
            if !depot.location.is_finite() {
                return Err(DispatchError::InvalidRequest(format!(
                    "depot {} has non-finite coordinates",
                    depot.id
                )));
            }
        }
        Ok(())
    }

    /// Splits a large batch geographically. Clustering is bypassed when it
    /// would produce more partitions than there are vehicles, since each
    /// partition needs at least one.
    fn partition(&self, stops: &[Stop], vehicle_count: usize) -> Vec<Vec<Stop>> {
        if stops.len() <= self.config.cluster_threshold {
            return vec![stops.to_vec()];
        }
        let clusters: BTreeMap<usize, Vec<Stop>> = cluster_stops(
            stops,
            self.config.cluster_radius_km,
            self.config.cluster_min_size,
        );
        if clusters.len() > vehicle_count {
            warn!(
                clusters = clusters.len(),
                vehicles = vehicle_count,
                "more clusters than vehicles; solving unclustered"
            );
            return vec![stops.to_vec()];
        }
        clusters.into_values().collect()
    }

    async fn solve_partition(
        &self,
        stops: &[Stop],
        vehicles: &[Vehicle],
        depot_model: &DepotModel,
    ) -> Result<(Vec<PlannedRoute>, Vec<String>), PartitionError> {
        // Node list layout depends on the depot model: a shared warehouse is
        // node 0 for every vehicle, while legacy depot-less demand gives each
        // vehicle its own start node.
        let (points, starts, stop_nodes) = match depot_model {
            DepotModel::Warehouse(depot) => {
                let mut points = vec![depot.location];
                points.extend(stops.iter().map(|s| s.location));
                let starts = vec![0; vehicles.len()];
                let stop_nodes: Vec<usize> = (1..=stops.len()).collect();
                (points, starts, stop_nodes)
            }
            DepotModel::VehicleStarts => {
                let mut points: Vec<Point> = vehicles.iter().map(|v| v.start).collect();
                points.extend(stops.iter().map(|s| s.location));
                let starts: Vec<usize> = (0..vehicles.len()).collect();
                let stop_nodes: Vec<usize> =
                    (vehicles.len()..vehicles.len() + stops.len()).collect();
                (points, starts, stop_nodes)
            }
        };

        let matrix = self
            .provider
            .matrix(&points)
            .await
            .map_err(PartitionError::Matrix)?;

        let constraints = SolverConstraints {
            wait_allowance_min: self.config.wait_allowance_min,
            max_route_duration_min: self.config.max_route_duration_min,
            drop_penalty_min: self.config.drop_penalty_min,
            time_limit: Duration::from_secs(self.config.solver_time_limit_sec),
            seed: self.config.solver_seed,
        };
        let instance = SolverInstance {
            stops,
            vehicles,
            matrix: &matrix,
            starts: &starts,
            stop_nodes: &stop_nodes,
            constraints: &constraints,
        };
        let solution = self
            .backend
            .solve(&instance)
            .map_err(PartitionError::Solver)?;

        let routes = solution
            .routes
            .into_iter()
            .filter(|r| !r.stops.is_empty())
            .map(|r| PlannedRoute {
                vehicle_id: vehicles[r.vehicle_index].id.clone(),
                stop_ids: r.stops.iter().map(|&i| stops[i].id.clone()).collect(),
                distance_km: r.distance_km,
                duration_min: r.duration_min,
            })
            .collect();
        let unassigned = solution
            .unassigned
            .into_iter()
            .map(|i| stops[i].id.clone())
            .collect();
        Ok((routes, unassigned))
    }

    /// Best-effort greedy assignment: no capacity or window enforcement, so
    /// nothing is ever dropped and nothing can panic.
    fn greedy_outcome(
        &self,
        stops: &[Stop],
        vehicles: &[Vehicle],
        depot_model: &DepotModel,
        solver_used: SolverUsed,
    ) -> OptimizeOutcome {
        let reference = match depot_model {
            DepotModel::Warehouse(depot) => depot.location,
            DepotModel::VehicleStarts => {
                let starts: Vec<Point> = vehicles.iter().map(|v| v.start).collect();
                centroid(&starts).unwrap_or(Point::new(0.0, 0.0))
            }
        };

        // A prediction failure downgrades to zero delays; greedy output is
        // advisory either way.
        let delays = match self.predictor.predict(stops) {
            Ok(delays) if delays.len() == stops.len() => Some(delays),
            Ok(_) => {
                warn!("delay prediction length mismatch; ignoring predictions");
                None
            }
            Err(err) => {
                warn!("delay prediction failed ({err}); ignoring predictions");
                None
            }
        };

        let loads = greedy::assign(
            stops,
            reference,
            vehicles.len(),
            delays.as_deref(),
            &self.config.traffic_weights,
        );

        let by_id: BTreeMap<&str, Point> =
            stops.iter().map(|s| (s.id.as_str(), s.location)).collect();
        let routes = loads
            .into_iter()
            .filter(|l| !l.stop_ids.is_empty())
            .map(|l| {
                let origin = vehicles[l.vehicle_index].start;
                let mut distance = 0.0;
                let mut prev = origin;
                for id in &l.stop_ids {
                    if let Some(&loc) = by_id.get(id.as_str()) {
                        distance += haversine_km(prev, loc);
                        prev = loc;
                    }
                }
                distance += haversine_km(prev, origin);
                let duration_min = if self.config.fallback_speed_kmph > 0.0 {
                    distance / self.config.fallback_speed_kmph * 60.0
                } else {
                    distance
                };
                PlannedRoute {
                    vehicle_id: vehicles[l.vehicle_index].id.clone(),
                    stop_ids: l.stop_ids,
                    distance_km: distance,
                    duration_min,
                }
            })
            .collect();

        OptimizeOutcome {
            routes,
            unassigned: Vec::new(),
            solver_used,
        }
    }
}

enum PartitionError {
    Matrix(crate::error::MatrixError),
    Solver(crate::error::SolverError),
}

/// Allocates the vehicle pool across partitions proportionally to demand,
/// at least one vehicle each, totalling exactly the pool size.
fn split_vehicles(partitions: &[Vec<Stop>], total_vehicles: usize) -> Vec<usize> {
    let n = partitions.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![total_vehicles];
    }

    let demands: Vec<u64> = partitions
        .iter()
        .map(|p| p.iter().map(|s| u64::from(s.demand.max(1))).sum())
        .collect();
    let total_demand: u64 = demands.iter().sum();

    let mut alloc = vec![1usize; n];
    let mut spare = total_vehicles - n;

    // Largest-remainder apportionment of the spare vehicles.
    let mut shares: Vec<(usize, usize, f64)> = demands
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let exact = d as f64 / total_demand as f64 * spare as f64;
            (i, exact.floor() as usize, exact - exact.floor())
        })
        .collect();
    for &(i, whole, _) in &shares {
        alloc[i] += whole;
        spare -= whole;
    }
    shares.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    for &(i, _, _) in shares.iter().take(spare) {
        alloc[i] += 1;
    }
    alloc
}
