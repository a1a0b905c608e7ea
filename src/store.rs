//! Route and demand persistence.
//!
//! `RouteRepository` is the storage seam for the reroute scheduler; the
//! in-memory implementation backs tests and single-node deployments.
//! Committing a plan supersedes the previous one for the same depot and
//! inserts the new routes under a single lock, so readers never observe a
//! depot with both plans active. Routes are only ever status-transitioned,
//! never deleted. Demand stays in the reroute backlog until delivered:
//! assigned-but-undelivered stops are re-planned every cycle alongside new
//! pending ones, so superseding a plan never orphans in-flight stops.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::geo::Point;
use crate::model::{
    Depot, OptimizeOutcome, RouteStatus, SolverUsed, Stop, StoredRoute, Vehicle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// Waiting for a first assignment.
    Pending,
    /// On an active route, not yet delivered; still re-planned each cycle.
    Assigned,
    /// Service completed; out of the backlog for good.
    Delivered,
}

impl StopStatus {
    /// Open demand: anything not yet delivered.
    pub fn is_open(self) -> bool {
        !matches!(self, StopStatus::Delivered)
    }
}

#[derive(Debug, Clone)]
pub struct StopRecord {
    pub stop: Stop,
    pub status: StopStatus,
}

pub trait RouteRepository: Send + Sync {
    fn tenants(&self) -> Result<Vec<String>, StoreError>;

    /// Depots of a tenant that currently have open (undelivered) demand.
    fn depots_with_demand(&self, tenant_id: &str) -> Result<Vec<Depot>, StoreError>;

    /// Open stops (pending plus assigned-undelivered) scoped to one depot,
    /// or the depot-less backlog when `depot_id` is `None`.
    fn open_stops(
        &self,
        tenant_id: &str,
        depot_id: Option<&str>,
    ) -> Result<Vec<Stop>, StoreError>;

    /// Vehicles dispatching from one depot, or the depot-less pool when
    /// `depot_id` is `None`. A vehicle belongs to exactly one scope, so two
    /// depots never plan the same vehicle in one cycle.
    fn available_vehicles(
        &self,
        tenant_id: &str,
        depot_id: Option<&str>,
    ) -> Result<Vec<Vehicle>, StoreError>;

    /// Overwrites vehicle start positions with live reports before a solve.
    fn update_vehicle_positions(
        &self,
        tenant_id: &str,
        positions: &HashMap<String, Point>,
    ) -> Result<(), StoreError>;

    /// Atomically supersedes the depot's current plan and inserts the new
    /// routes as `Planned`. Routed stops become `Assigned`; open stops the
    /// plan dropped fall back to `Pending` for the next cycle. Delivered
    /// stops are untouched. Returns the new route ids.
    fn commit_plan(
        &self,
        tenant_id: &str,
        depot: Option<&Depot>,
        outcome: &OptimizeOutcome,
    ) -> Result<Vec<u64>, StoreError>;

    /// Routes currently `Planned` or `Active` for a tenant.
    fn active_routes(&self, tenant_id: &str) -> Result<Vec<StoredRoute>, StoreError>;
}

/// Content fingerprint of a plan: same depot, vehicles, and stop orderings
/// hash identically regardless of when the plan was generated.
pub fn plan_fingerprint(
    tenant_id: &str,
    depot_id: Option<&str>,
    outcome: &OptimizeOutcome,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(depot_id.unwrap_or("-").as_bytes());
    for route in &outcome.routes {
        hasher.update(b"\x1e");
        hasher.update(route.vehicle_id.as_bytes());
        for stop_id in &route.stop_ids {
            hasher.update(b"\x1f");
            hasher.update(stop_id.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Default)]
struct TenantState {
    depots: Vec<Depot>,
    vehicles: Vec<Vehicle>,
    stops: Vec<StopRecord>,
    routes: Vec<StoredRoute>,
}

#[derive(Debug, Default)]
struct RepoState {
    tenants: HashMap<String, TenantState>,
    next_route_id: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<RepoState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tenant(&self, tenant_id: &str) {
        self.state
            .lock()
            .tenants
            .entry(tenant_id.to_string())
            .or_default();
    }

    pub fn add_depot(&self, tenant_id: &str, depot: Depot) {
        self.state
            .lock()
            .tenants
            .entry(tenant_id.to_string())
            .or_default()
            .depots
            .push(depot);
    }

    pub fn add_vehicle(&self, tenant_id: &str, vehicle: Vehicle) {
        self.state
            .lock()
            .tenants
            .entry(tenant_id.to_string())
            .or_default()
            .vehicles
            .push(vehicle);
    }

    pub fn add_stop(&self, tenant_id: &str, stop: Stop) {
        self.state
            .lock()
            .tenants
            .entry(tenant_id.to_string())
            .or_default()
            .stops
            .push(StopRecord {
                stop,
                status: StopStatus::Pending,
            });
    }

    /// Marks a stop delivered, removing it from the reroute backlog.
    pub fn mark_delivered(&self, tenant_id: &str, stop_id: &str) {
        let mut guard = self.state.lock();
        if let Some(tenant) = guard.tenants.get_mut(tenant_id) {
            for record in &mut tenant.stops {
                if record.stop.id == stop_id {
                    record.status = StopStatus::Delivered;
                }
            }
        }
    }

    /// Every route ever committed for a tenant, including superseded ones.
    pub fn all_routes(&self, tenant_id: &str) -> Vec<StoredRoute> {
        self.state
            .lock()
            .tenants
            .get(tenant_id)
            .map(|t| t.routes.clone())
            .unwrap_or_default()
    }
}

fn with_tenant<T>(
    state: &Mutex<RepoState>,
    tenant_id: &str,
    f: impl FnOnce(&mut RepoState, &str) -> T,
) -> Result<T, StoreError> {
    let mut guard = state.lock();
    if !guard.tenants.contains_key(tenant_id) {
        return Err(StoreError::UnknownTenant(tenant_id.to_string()));
    }
    Ok(f(&mut guard, tenant_id))
}

impl RouteRepository for InMemoryRepository {
    fn tenants(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.state.lock().tenants.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn depots_with_demand(&self, tenant_id: &str) -> Result<Vec<Depot>, StoreError> {
        with_tenant(&self.state, tenant_id, |state, tid| {
            let tenant = &state.tenants[tid];
            tenant
                .depots
                .iter()
                .filter(|d| {
                    tenant.stops.iter().any(|r| {
                        r.status.is_open() && r.stop.depot_id.as_deref() == Some(&d.id)
                    })
                })
                .cloned()
                .collect()
        })
    }

    fn open_stops(
        &self,
        tenant_id: &str,
        depot_id: Option<&str>,
    ) -> Result<Vec<Stop>, StoreError> {
        with_tenant(&self.state, tenant_id, |state, tid| {
            state.tenants[tid]
                .stops
                .iter()
                .filter(|r| r.status.is_open() && r.stop.depot_id.as_deref() == depot_id)
                .map(|r| r.stop.clone())
                .collect()
        })
    }

    fn available_vehicles(
        &self,
        tenant_id: &str,
        depot_id: Option<&str>,
    ) -> Result<Vec<Vehicle>, StoreError> {
        with_tenant(&self.state, tenant_id, |state, tid| {
            state.tenants[tid]
                .vehicles
                .iter()
                .filter(|v| v.depot_id.as_deref() == depot_id)
                .cloned()
                .collect()
        })
    }

    fn update_vehicle_positions(
        &self,
        tenant_id: &str,
        positions: &HashMap<String, Point>,
    ) -> Result<(), StoreError> {
        with_tenant(&self.state, tenant_id, |state, tid| {
            let tenant = state.tenants.get_mut(tid).expect("checked above");
            for vehicle in &mut tenant.vehicles {
                if let Some(&location) = positions.get(&vehicle.id) {
                    vehicle.start = location;
                }
            }
        })
    }

    fn commit_plan(
        &self,
        tenant_id: &str,
        depot: Option<&Depot>,
        outcome: &OptimizeOutcome,
    ) -> Result<Vec<u64>, StoreError> {
        let depot_id = depot.map(|d| d.id.as_str());
        let fingerprint = plan_fingerprint(tenant_id, depot_id, outcome);
        with_tenant(&self.state, tenant_id, |state, tid| {
            let RepoState {
                tenants,
                next_route_id,
            } = state;
            let tenant = tenants.get_mut(tid).expect("checked above");

            // Supersede only this depot's current plan; other depots keep
            // theirs.
            for route in &mut tenant.routes {
                if route.depot_id.as_deref() == depot_id
                    && matches!(route.status, RouteStatus::Planned | RouteStatus::Active)
                {
                    route.status = RouteStatus::Superseded;
                }
            }

            let generated_at = Utc::now();
            let mut ids = Vec::with_capacity(outcome.routes.len());
            for planned in &outcome.routes {
                let id = *next_route_id;
                *next_route_id += 1;
                ids.push(id);
                tenant.routes.push(StoredRoute {
                    id,
                    tenant_id: tid.to_string(),
                    depot_id: depot_id.map(str::to_string),
                    vehicle_id: planned.vehicle_id.clone(),
                    stop_ids: planned.stop_ids.clone(),
                    distance_km: planned.distance_km,
                    duration_min: planned.duration_min,
                    status: RouteStatus::Planned,
                    depot_location: depot.map(|d| d.location),
                    solver_used: outcome.solver_used,
                    plan_fingerprint: fingerprint.clone(),
                    generated_at,
                });
            }

            let routed: Vec<&str> = outcome
                .routes
                .iter()
                .flat_map(|r| r.stop_ids.iter().map(String::as_str))
                .collect();
            for record in &mut tenant.stops {
                if record.stop.depot_id.as_deref() == depot_id && record.status.is_open() {
                    record.status = if routed.contains(&record.stop.id.as_str()) {
                        StopStatus::Assigned
                    } else {
                        StopStatus::Pending
                    };
                }
            }

            ids
        })
    }

    fn active_routes(&self, tenant_id: &str) -> Result<Vec<StoredRoute>, StoreError> {
        with_tenant(&self.state, tenant_id, |state, tid| {
            state.tenants[tid]
                .routes
                .iter()
                .filter(|r| matches!(r.status, RouteStatus::Planned | RouteStatus::Active))
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlannedRoute;

    fn outcome(vehicle_id: &str, stop_ids: &[&str]) -> OptimizeOutcome {
        OptimizeOutcome {
            routes: vec![PlannedRoute {
                vehicle_id: vehicle_id.into(),
                stop_ids: stop_ids.iter().map(|s| s.to_string()).collect(),
                distance_km: 5.0,
                duration_min: 12.0,
            }],
            unassigned: Vec::new(),
            solver_used: SolverUsed::Constrained,
        }
    }

    fn seeded() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.add_depot("t1", Depot::new("d1", Point::new(12.9, 77.6)));
        repo.add_depot("t1", Depot::new("d2", Point::new(13.1, 77.6)));
        repo.add_vehicle("t1", Vehicle::new("v1", 10, Point::new(12.9, 77.6)).with_depot("d1"));
        repo.add_stop("t1", Stop::new("s1", Point::new(12.91, 77.6), 1).with_depot("d1"));
        repo.add_stop("t1", Stop::new("s2", Point::new(13.11, 77.6), 1).with_depot("d2"));
        repo
    }

    #[test]
    fn unknown_tenant_is_an_error() {
        let repo = InMemoryRepository::new();
        assert!(matches!(
            repo.open_stops("ghost", None),
            Err(StoreError::UnknownTenant(_))
        ));
    }

    #[test]
    fn demand_is_scoped_per_depot() {
        let repo = seeded();
        let depots = repo.depots_with_demand("t1").expect("tenant");
        assert_eq!(depots.len(), 2);
        let d1 = repo.open_stops("t1", Some("d1")).expect("tenant");
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].id, "s1");
        assert!(repo.open_stops("t1", None).expect("tenant").is_empty());
    }

    #[test]
    fn vehicles_are_scoped_per_depot() {
        let repo = seeded();
        repo.add_vehicle("t1", Vehicle::new("v2", 10, Point::new(13.1, 77.6)).with_depot("d2"));
        repo.add_vehicle("t1", Vehicle::new("v3", 10, Point::new(13.0, 77.6)));

        let d1 = repo.available_vehicles("t1", Some("d1")).expect("tenant");
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].id, "v1");
        let d2 = repo.available_vehicles("t1", Some("d2")).expect("tenant");
        assert_eq!(d2.len(), 1);
        assert_eq!(d2[0].id, "v2");
        // Unaffiliated vehicles form the depot-less pool.
        let pool = repo.available_vehicles("t1", None).expect("tenant");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, "v3");
    }

    #[test]
    fn commit_supersedes_only_the_same_depot() {
        let repo = seeded();
        let d1 = Depot::new("d1", Point::new(12.9, 77.6));
        let d2 = Depot::new("d2", Point::new(13.1, 77.6));
        repo.commit_plan("t1", Some(&d1), &outcome("v1", &["s1"])).expect("commit");
        repo.commit_plan("t1", Some(&d2), &outcome("v2", &["s2"])).expect("commit");

        // Recommitting d1 supersedes its old plan but leaves d2 active.
        repo.commit_plan("t1", Some(&d1), &outcome("v1", &["s1"])).expect("commit");

        let active = repo.active_routes("t1").expect("tenant");
        assert_eq!(active.len(), 2);
        let all = repo.all_routes("t1");
        assert_eq!(all.len(), 3);
        let superseded: Vec<_> = all
            .iter()
            .filter(|r| r.status == RouteStatus::Superseded)
            .collect();
        assert_eq!(superseded.len(), 1);
        assert_eq!(superseded[0].depot_id.as_deref(), Some("d1"));
    }

    #[test]
    fn assigned_stops_stay_in_the_backlog_until_delivered() {
        let repo = seeded();
        let d1 = Depot::new("d1", Point::new(12.9, 77.6));
        repo.commit_plan("t1", Some(&d1), &outcome("v1", &["s1"])).expect("commit");

        // In-flight demand is still re-planned next cycle.
        let open = repo.open_stops("t1", Some("d1")).expect("tenant");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "s1");
        let depots = repo.depots_with_demand("t1").expect("tenant");
        assert!(depots.iter().any(|d| d.id == "d1"));

        // Delivery is what removes it.
        repo.mark_delivered("t1", "s1");
        assert!(repo.open_stops("t1", Some("d1")).expect("tenant").is_empty());
        let depots = repo.depots_with_demand("t1").expect("tenant");
        assert!(!depots.iter().any(|d| d.id == "d1"));
    }

    #[test]
    fn recommit_covers_in_flight_and_new_stops_together() {
        let repo = seeded();
        let d1 = Depot::new("d1", Point::new(12.9, 77.6));
        repo.commit_plan("t1", Some(&d1), &outcome("v1", &["s1"])).expect("commit");
        repo.add_stop("t1", Stop::new("s3", Point::new(12.92, 77.6), 1).with_depot("d1"));

        let open = repo.open_stops("t1", Some("d1")).expect("tenant");
        let mut ids: Vec<&str> = open.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s3"]);

        repo.commit_plan("t1", Some(&d1), &outcome("v1", &["s1", "s3"])).expect("commit");
        let active = repo.active_routes("t1").expect("tenant");
        assert_eq!(active.len(), 1);
        assert!(active[0].stop_ids.contains(&"s1".to_string()));
        assert!(active[0].stop_ids.contains(&"s3".to_string()));
    }

    #[test]
    fn dropped_open_stops_fall_back_to_pending() {
        let repo = seeded();
        let d1 = Depot::new("d1", Point::new(12.9, 77.6));
        repo.commit_plan("t1", Some(&d1), &outcome("v1", &["s1"])).expect("commit");

        // A later plan that drops s1 demotes it to pending, not delivered.
        let mut plan = outcome("v1", &[]);
        plan.routes.clear();
        plan.unassigned = vec!["s1".into()];
        repo.commit_plan("t1", Some(&d1), &plan).expect("commit");
        let open = repo.open_stops("t1", Some("d1")).expect("tenant");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "s1");
    }

    #[test]
    fn routes_carry_depot_snapshot_and_fingerprint() {
        let repo = seeded();
        let d1 = Depot::new("d1", Point::new(12.9, 77.6));
        let plan = outcome("v1", &["s1"]);
        repo.commit_plan("t1", Some(&d1), &plan).expect("commit");
        let routes = repo.active_routes("t1").expect("tenant");
        assert_eq!(routes[0].depot_location, Some(Point::new(12.9, 77.6)));
        assert_eq!(
            routes[0].plan_fingerprint,
            plan_fingerprint("t1", Some("d1"), &plan)
        );
        assert_eq!(routes[0].solver_used, SolverUsed::Constrained);
    }

    #[test]
    fn fingerprint_is_content_addressed() {
        let a = plan_fingerprint("t1", Some("d1"), &outcome("v1", &["s1", "s2"]));
        let b = plan_fingerprint("t1", Some("d1"), &outcome("v1", &["s1", "s2"]));
        let c = plan_fingerprint("t1", Some("d1"), &outcome("v1", &["s2", "s1"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn position_updates_apply_to_known_vehicles_only() {
        let repo = seeded();
        let mut positions = HashMap::new();
        positions.insert("v1".to_string(), Point::new(12.95, 77.65));
        positions.insert("ghost".to_string(), Point::new(0.0, 0.0));
        repo.update_vehicle_positions("t1", &positions).expect("tenant");
        let vehicles = repo.available_vehicles("t1", Some("d1")).expect("tenant");
        assert_eq!(vehicles[0].start, Point::new(12.95, 77.65));
    }
}
