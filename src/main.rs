use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{error, info};

use fleet_dispatch::scheduler::DepotOutcome;
use fleet_dispatch::{
    Depot, DepotModel, DispatchError, EngineConfig, InMemoryRepository, LiveLocationStore,
    MatrixError, OptimizeOutcome, Point, RerouteScheduler, RouteOptimizer, RouteRepository, Stop,
    Vehicle,
};

#[derive(Clone)]
struct AppState {
    optimizer: Arc<RouteOptimizer>,
    scheduler: Arc<RerouteScheduler>,
    live: Arc<LiveLocationStore>,
    repo: Arc<InMemoryRepository>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = EngineConfig::from_env();
    let reroute_enabled = config.reroute_enabled;

    let optimizer = match RouteOptimizer::new(config) {
        Ok(optimizer) => Arc::new(optimizer),
        Err(err) => {
            error!("cannot initialize optimizer: {err}");
            std::process::exit(1);
        }
    };
    let repo = Arc::new(InMemoryRepository::new());
    let live = Arc::new(LiveLocationStore::new());
    let scheduler = Arc::new(RerouteScheduler::new(
        Arc::clone(&repo) as Arc<dyn RouteRepository>,
        Arc::clone(&optimizer),
        Arc::clone(&live),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = if reroute_enabled {
        Some(tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx)))
    } else {
        info!("periodic rerouting disabled");
        None
    };

    let state = AppState {
        optimizer,
        scheduler,
        live,
        repo,
    };
    let app = Router::new()
        .route("/optimize", post(run_optimization))
        .route("/reroute/:tenant", post(trigger_reroute))
        .route("/live/:tenant/:vehicle", post(report_position))
        .route("/live/:tenant", get(live_snapshot))
        .route("/routes/:tenant", get(active_routes))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("listening on http://{addr}");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });
    if let Err(err) = serve.await {
        error!("server error: {err}");
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }
}

#[derive(Debug, Deserialize)]
struct OptimizeRequest {
    stops: Vec<Stop>,
    vehicles: Vec<Vehicle>,
    #[serde(default)]
    depot: Option<Depot>,
}

async fn run_optimization(
    State(state): State<AppState>,
    Json(request): Json<OptimizeRequest>,
) -> Result<Json<OptimizeOutcome>, (StatusCode, Json<Value>)> {
    let model = match request.depot {
        Some(depot) => DepotModel::Warehouse(depot),
        None => DepotModel::VehicleStarts,
    };
    let outcome = state
        .optimizer
        .optimize(&request.stops, &request.vehicles, &model)
        .await
        .map_err(error_response)?;
    Ok(Json(outcome))
}

async fn trigger_reroute(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let report = state
        .scheduler
        .reroute_tenant(&tenant)
        .await
        .map_err(error_response)?;
    let outcomes: Vec<Value> = report
        .outcomes
        .iter()
        .map(|o| match o {
            DepotOutcome::Committed { depot_id, routes } => json!({
                "depot_id": depot_id,
                "status": "committed",
                "routes": routes,
            }),
            DepotOutcome::Skipped { depot_id } => json!({
                "depot_id": depot_id,
                "status": "skipped",
            }),
            DepotOutcome::Failed { depot_id, reason } => json!({
                "depot_id": depot_id,
                "status": "failed",
                "reason": reason,
            }),
        })
        .collect();
    Ok(Json(json!({
        "tenant_id": report.tenant_id,
        "committed": report.committed(),
        "outcomes": outcomes,
    })))
}

#[derive(Debug, Deserialize)]
struct PositionReport {
    lat: f64,
    lon: f64,
    #[serde(default)]
    speed_kmph: Option<f64>,
}

async fn report_position(
    State(state): State<AppState>,
    Path((tenant, vehicle)): Path<(String, String)>,
    Json(report): Json<PositionReport>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let location = Point::new(report.lat, report.lon);
    if !location.is_finite() {
        return Err(error_response(DispatchError::InvalidRequest(
            "non-finite coordinates".into(),
        )));
    }
    state.live.update(&tenant, &vehicle, location, report.speed_kmph);
    Ok(StatusCode::NO_CONTENT)
}

async fn live_snapshot(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Json<Value> {
    let snapshot = state.live.snapshot(&tenant);
    Json(json!({ "tenant_id": tenant, "vehicles": snapshot }))
}

async fn active_routes(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let routes = state
        .repo
        .active_routes(&tenant)
        .map_err(|err| error_response(DispatchError::Store(err)))?;
    Ok(Json(json!({ "tenant_id": tenant, "routes": routes })))
}

fn error_response(err: DispatchError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        DispatchError::Matrix(MatrixError::CapacityExceeded { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DispatchError::Matrix(_) => StatusCode::BAD_GATEWAY,
        DispatchError::Store(fleet_dispatch::StoreError::UnknownTenant(_)) => {
            StatusCode::NOT_FOUND
        }
        DispatchError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "retryable": err.is_retryable(),
        })),
    )
}
