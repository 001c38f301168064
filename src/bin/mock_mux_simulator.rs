//! Mock mux simulator server for testing muxsim
//!
//! `mock-mux-simulator --port 0 --vmset vms1-2 --ports 8`
//!
//! Serves the `/mux/{vmset}/...` API for one vmset, keeping per-port active
//! side, passing directions and flap counter in memory.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use clap::Parser;
use muxsim::{
    ActiveSideRequest, ClearFlapCounterRequest, DirectionSet, MuxStatus, OutSidesRequest, Side,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mock-mux-simulator")]
#[command(about = "Mock mux simulator server for testing")]
struct Args {
    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// VM set served under /mux/{vmset}
    #[arg(long, default_value = "vms1-2")]
    vmset: String,

    /// Number of mux ports, indexed from 0
    #[arg(long, default_value = "4")]
    ports: u16,
}

#[derive(Debug, Clone)]
struct PortState {
    active_side: Side,
    passing: BTreeSet<Side>,
    flap_counter: u64,
}

impl Default for PortState {
    fn default() -> Self {
        Self {
            active_side: Side::UpperTor,
            passing: DirectionSet::all().iter().collect(),
            flap_counter: 0,
        }
    }
}

impl PortState {
    fn set_active(&mut self, side: Side) {
        if self.active_side != side {
            self.active_side = side;
            self.flap_counter += 1;
        }
    }

    fn status(&self) -> MuxStatus {
        MuxStatus {
            active_side: self.active_side,
            out_sides: DirectionSet::new(self.passing.iter().copied()).ok(),
            flap_counter: Some(self.flap_counter),
        }
    }
}

/// Server state
struct MockState {
    vmset: String,
    ports: RwLock<BTreeMap<u16, PortState>>,
    /// Requests seen on /mux routes
    request_count: AtomicU64,
    /// When true, every /mux route returns 500
    fail_requests: AtomicBool,
}

type SharedState = Arc<MockState>;
type Rejection = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("mock_mux_simulator=debug")
        .init();

    let args = Args::parse();

    let state = Arc::new(MockState {
        vmset: args.vmset.clone(),
        ports: RwLock::new((0..args.ports).map(|i| (i, PortState::default())).collect()),
        request_count: AtomicU64::new(0),
        fail_requests: AtomicBool::new(false),
    });

    let app = Router::new()
        .route("/mux/{vmset}", get(all_status).post(toggle_all))
        .route("/mux/{vmset}/flap_counter", get(all_flap_counters))
        .route("/mux/{vmset}/clear_flap_counter", post(clear_flap_counter))
        .route("/mux/{vmset}/reset", post(reset_all))
        .route("/mux/{vmset}/{port}", get(port_status).post(toggle_port))
        .route("/mux/{vmset}/{port}/drop", post(drop_directions))
        .route("/mux/{vmset}/{port}/output", post(output_directions))
        .route("/mux/{vmset}/{port}/flap_counter", get(port_flap_counter))
        .route("/mux/{vmset}/{port}/reset", post(reset_port))
        .route("/control/fail-requests", post(control_fail_requests))
        .route("/stats", get(stats))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;

    // Get the actual port (important when port=0 for dynamic allocation)
    let actual_port = listener.local_addr()?.port();

    info!(
        vmset = %args.vmset,
        ports = args.ports,
        port = actual_port,
        "Mock mux simulator listening"
    );

    // Signal readiness to stdout for test harness
    // Format: "READY <port>" on its own line
    println!("READY {}", actual_port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Count the request and apply the failure switch and vmset check.
fn admit(state: &MockState, vmset: &str) -> Result<(), Rejection> {
    state.request_count.fetch_add(1, Ordering::SeqCst);
    if state.fail_requests.load(Ordering::SeqCst) {
        warn!("Request forced to fail via /control/fail-requests");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "forced failure".to_string(),
        ));
    }
    if vmset != state.vmset {
        return Err((StatusCode::NOT_FOUND, format!("unknown vmset {vmset}")));
    }
    Ok(())
}

fn unknown_port(port: u16) -> Rejection {
    (StatusCode::NOT_FOUND, format!("unknown port {port}"))
}

fn random_side() -> Side {
    if std::collections::hash_map::RandomState::new().hash_one(0u8) & 1 == 0 {
        Side::UpperTor
    } else {
        Side::LowerTor
    }
}

async fn all_status(
    State(state): State<SharedState>,
    Path(vmset): Path<String>,
) -> Result<Json<BTreeMap<u16, MuxStatus>>, Rejection> {
    admit(&state, &vmset)?;
    let ports = state.ports.read().await;
    Ok(Json(
        ports.iter().map(|(i, port)| (*i, port.status())).collect(),
    ))
}

async fn toggle_all(
    State(state): State<SharedState>,
    Path(vmset): Path<String>,
    Json(body): Json<ActiveSideRequest>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    info!(side = %body.active_side, "Toggling all ports");
    let mut ports = state.ports.write().await;
    for port in ports.values_mut() {
        let target = match body.active_side {
            Side::UpperTor | Side::LowerTor => body.active_side,
            Side::Toggle if port.active_side == Side::UpperTor => Side::LowerTor,
            Side::Toggle => Side::UpperTor,
            Side::Random => random_side(),
            Side::Nic => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "nic is not a toggle target".to_string(),
                ));
            }
        };
        port.set_active(target);
    }
    Ok(StatusCode::OK)
}

async fn port_status(
    State(state): State<SharedState>,
    Path((vmset, port)): Path<(String, u16)>,
) -> Result<Json<MuxStatus>, Rejection> {
    admit(&state, &vmset)?;
    let ports = state.ports.read().await;
    let entry = ports.get(&port).ok_or_else(|| unknown_port(port))?;
    Ok(Json(entry.status()))
}

async fn toggle_port(
    State(state): State<SharedState>,
    Path((vmset, port)): Path<(String, u16)>,
    Json(body): Json<ActiveSideRequest>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    if !body.active_side.is_port_toggle_target() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("cannot toggle a single port to {}", body.active_side),
        ));
    }
    let mut ports = state.ports.write().await;
    let entry = ports.get_mut(&port).ok_or_else(|| unknown_port(port))?;
    info!(port, side = %body.active_side, "Toggling port");
    entry.set_active(body.active_side);
    Ok(StatusCode::OK)
}

async fn drop_directions(
    State(state): State<SharedState>,
    Path((vmset, port)): Path<(String, u16)>,
    Json(body): Json<OutSidesRequest>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    let mut ports = state.ports.write().await;
    let entry = ports.get_mut(&port).ok_or_else(|| unknown_port(port))?;
    info!(port, out_sides = %body.out_sides, "Dropping traffic");
    for side in body.out_sides.iter() {
        entry.passing.remove(&side);
    }
    Ok(StatusCode::OK)
}

async fn output_directions(
    State(state): State<SharedState>,
    Path((vmset, port)): Path<(String, u16)>,
    Json(body): Json<OutSidesRequest>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    let mut ports = state.ports.write().await;
    let entry = ports.get_mut(&port).ok_or_else(|| unknown_port(port))?;
    info!(port, out_sides = %body.out_sides, "Restoring traffic");
    entry.passing.extend(body.out_sides.iter());
    Ok(StatusCode::OK)
}

async fn port_flap_counter(
    State(state): State<SharedState>,
    Path((vmset, port)): Path<(String, u16)>,
) -> Result<Json<BTreeMap<String, u64>>, Rejection> {
    admit(&state, &vmset)?;
    let ports = state.ports.read().await;
    let entry = ports.get(&port).ok_or_else(|| unknown_port(port))?;
    Ok(Json(BTreeMap::from([(port.to_string(), entry.flap_counter)])))
}

async fn all_flap_counters(
    State(state): State<SharedState>,
    Path(vmset): Path<String>,
) -> Result<Json<BTreeMap<u16, u64>>, Rejection> {
    admit(&state, &vmset)?;
    let ports = state.ports.read().await;
    Ok(Json(
        ports.iter().map(|(i, port)| (*i, port.flap_counter)).collect(),
    ))
}

async fn clear_flap_counter(
    State(state): State<SharedState>,
    Path(vmset): Path<String>,
    Json(body): Json<ClearFlapCounterRequest>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    let mut ports = state.ports.write().await;
    if body.port_to_clear == "all" {
        info!("Clearing flap counters on all ports");
        ports.values_mut().for_each(|port| port.flap_counter = 0);
        return Ok(StatusCode::OK);
    }

    let port: u16 = body.port_to_clear.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid port_to_clear: {}", body.port_to_clear),
        )
    })?;
    let entry = ports.get_mut(&port).ok_or_else(|| unknown_port(port))?;
    info!(port, "Clearing flap counter");
    entry.flap_counter = 0;
    Ok(StatusCode::OK)
}

async fn reset_all(
    State(state): State<SharedState>,
    Path(vmset): Path<String>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    warn!("Resetting all ports");
    let mut ports = state.ports.write().await;
    for port in ports.values_mut() {
        port.set_active(Side::UpperTor);
        port.passing = DirectionSet::all().iter().collect();
    }
    Ok(StatusCode::OK)
}

async fn reset_port(
    State(state): State<SharedState>,
    Path((vmset, port)): Path<(String, u16)>,
) -> Result<StatusCode, Rejection> {
    admit(&state, &vmset)?;
    let mut ports = state.ports.write().await;
    let entry = ports.get_mut(&port).ok_or_else(|| unknown_port(port))?;
    warn!(port, "Resetting port");
    entry.set_active(Side::UpperTor);
    entry.passing = DirectionSet::all().iter().collect();
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct ControlFailRequests {
    enabled: bool,
}

/// Control endpoint: make every /mux route return 500
async fn control_fail_requests(
    State(state): State<SharedState>,
    Json(body): Json<ControlFailRequests>,
) -> StatusCode {
    info!(enabled = body.enabled, "Setting fail_requests");
    state.fail_requests.store(body.enabled, Ordering::SeqCst);
    StatusCode::OK
}

#[derive(Serialize)]
struct StatsResponse {
    vmset: String,
    request_count: u64,
    fail_requests: bool,
}

/// Stats endpoint for testing inspection
async fn stats(State(state): State<SharedState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        vmset: state.vmset.clone(),
        request_count: state.request_count.load(Ordering::SeqCst),
        fail_requests: state.fail_requests.load(Ordering::SeqCst),
    })
}
