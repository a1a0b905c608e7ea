//! Periodic dynamic rerouting.
//!
//! Every tick the scheduler syncs fresh live positions into the repository,
//! then re-plans each tenant's open demand depot by depot. Open demand
//! includes assigned-but-undelivered stops, so superseding a plan never
//! strands in-flight work. Each depot plans with its own vehicle pool, so a
//! vehicle is committed to at most one depot per cycle. One depot's failure
//! never blocks another's commit, and an empty plan never supersedes an
//! existing one. A watch channel stops the loop between ticks for clean
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::DispatchError;
use crate::geo::Point;
use crate::live::LiveLocationStore;
use crate::model::{Depot, DepotModel};
use crate::optimize::RouteOptimizer;
use crate::store::RouteRepository;

/// What happened to one depot (or the depot-less backlog) in one cycle.
#[derive(Debug)]
pub enum DepotOutcome {
    /// A plan was committed; carries the number of routes.
    Committed { depot_id: Option<String>, routes: usize },
    /// Nothing to plan, no vehicles, or an empty plan; the previous plan
    /// stands.
    Skipped { depot_id: Option<String> },
    Failed { depot_id: Option<String>, reason: String },
}

#[derive(Debug)]
pub struct TenantReport {
    pub tenant_id: String,
    pub outcomes: Vec<DepotOutcome>,
}

impl TenantReport {
    pub fn committed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DepotOutcome::Committed { .. }))
            .count()
    }
}

pub struct RerouteScheduler {
    repo: Arc<dyn RouteRepository>,
    optimizer: Arc<RouteOptimizer>,
    live: Arc<LiveLocationStore>,
    interval: Duration,
    live_position_max_age_sec: i64,
}

impl RerouteScheduler {
    pub fn new(
        repo: Arc<dyn RouteRepository>,
        optimizer: Arc<RouteOptimizer>,
        live: Arc<LiveLocationStore>,
    ) -> Self {
        let config = optimizer.config();
        let interval = Duration::from_secs(config.reroute_interval_sec.max(1));
        let live_position_max_age_sec = config.live_position_max_age_sec;
        Self {
            repo,
            optimizer,
            live,
            interval,
            live_position_max_age_sec,
        }
    }

    /// Runs the reroute loop until the shutdown channel flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_sec = self.interval.as_secs(), "reroute scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reroute scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One full cycle over every tenant. A tenant's failure is logged and
    /// isolated; the others still get their cycle.
    pub async fn tick(&self) {
        let tenants = match self.repo.tenants() {
            Ok(tenants) => tenants,
            Err(err) => {
                error!("cannot enumerate tenants: {err}");
                return;
            }
        };
        for tenant_id in tenants {
            match self.reroute_tenant(&tenant_id).await {
                Ok(report) => {
                    if report.committed() > 0 {
                        info!(
                            tenant = %tenant_id,
                            committed = report.committed(),
                            "reroute cycle committed new plans"
                        );
                    }
                }
                Err(err) => {
                    warn!(tenant = %tenant_id, retryable = err.is_retryable(), "reroute cycle failed: {err}");
                }
            }
        }
    }

    /// Re-plans one tenant now. Also serves manual reroute triggers.
    pub async fn reroute_tenant(&self, tenant_id: &str) -> Result<TenantReport, DispatchError> {
        self.sync_live_positions(tenant_id)?;

        let mut outcomes = Vec::new();

        for depot in self.repo.depots_with_demand(tenant_id)? {
            let stops = self.repo.open_stops(tenant_id, Some(&depot.id))?;
            if stops.is_empty() {
                outcomes.push(DepotOutcome::Skipped {
                    depot_id: Some(depot.id),
                });
                continue;
            }
            let vehicles = self.repo.available_vehicles(tenant_id, Some(&depot.id))?;
            if vehicles.is_empty() {
                warn!(tenant = %tenant_id, depot = %depot.id, "open demand but no vehicles");
                outcomes.push(DepotOutcome::Skipped {
                    depot_id: Some(depot.id),
                });
                continue;
            }
            let model = DepotModel::Warehouse(depot.clone());
            outcomes.push(self.plan_and_commit(tenant_id, Some(&depot), &stops, &vehicles, &model).await);
        }

        // Legacy depot-less backlog: the unaffiliated vehicle pool plans
        // from its own positions.
        let orphan_stops = self.repo.open_stops(tenant_id, None)?;
        if !orphan_stops.is_empty() {
            let pool = self.repo.available_vehicles(tenant_id, None)?;
            if pool.is_empty() {
                warn!(tenant = %tenant_id, "depot-less demand but no unaffiliated vehicles");
                outcomes.push(DepotOutcome::Skipped { depot_id: None });
            } else {
                outcomes.push(
                    self.plan_and_commit(
                        tenant_id,
                        None,
                        &orphan_stops,
                        &pool,
                        &DepotModel::VehicleStarts,
                    )
                    .await,
                );
            }
        }

        Ok(TenantReport {
            tenant_id: tenant_id.to_string(),
            outcomes,
        })
    }

    fn sync_live_positions(&self, tenant_id: &str) -> Result<(), DispatchError> {
        let fresh = self
            .live
            .fresh_snapshot(tenant_id, self.live_position_max_age_sec);
        if fresh.is_empty() {
            return Ok(());
        }
        let positions: HashMap<String, Point> = fresh
            .into_iter()
            .map(|(vehicle_id, p)| (vehicle_id, p.location))
            .collect();
        self.repo.update_vehicle_positions(tenant_id, &positions)?;
        Ok(())
    }

    /// Optimizes one scope and commits the result. Failures are captured in
    /// the outcome rather than propagated, so sibling depots still plan.
    async fn plan_and_commit(
        &self,
        tenant_id: &str,
        depot: Option<&Depot>,
        stops: &[crate::model::Stop],
        vehicles: &[crate::model::Vehicle],
        model: &DepotModel,
    ) -> DepotOutcome {
        let depot_id = depot.map(|d| d.id.clone());
        let outcome = match self.optimizer.optimize(stops, vehicles, model).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    tenant = %tenant_id,
                    depot = depot_id.as_deref().unwrap_or("-"),
                    "planning failed: {err}"
                );
                return DepotOutcome::Failed {
                    depot_id,
                    reason: err.to_string(),
                };
            }
        };
        if outcome.routes.is_empty() {
            // Never supersede a live plan with nothing.
            return DepotOutcome::Skipped { depot_id };
        }
        match self.repo.commit_plan(tenant_id, depot, &outcome) {
            Ok(ids) => DepotOutcome::Committed {
                depot_id,
                routes: ids.len(),
            },
            Err(err) => {
                warn!(
                    tenant = %tenant_id,
                    depot = depot_id.as_deref().unwrap_or("-"),
                    "commit failed: {err}"
                );
                DepotOutcome::Failed {
                    depot_id,
                    reason: err.to_string(),
                }
            }
        }
    }
}
