//! HTTP API surface (§1, §6): the network-facing half of the service.
//!
//! The teacher is a CLI, not a service — this module is enrichment grounded
//! on `isobox`'s "Secure Code Execution API" manifest (actix-web + serde +
//! uuid + thiserror, the same stack already adopted in `error.rs`/`types.rs`),
//! with handler bodies written in the teacher's terse, `tracing`-logged
//! style rather than isobox's own (isobox's handlers were not in the
//! retrieved pack, only its Cargo.toml).
//!
//! Dataset-collaborator endpoints (`/submit`, `/get_prompts`, and similar)
//! named in the original system are out of this crate's core scope (§1
//! Non-goals) and are not implemented here.

use std::sync::Arc;

use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use serde::Serialize;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::isolation::netns::SubnetPool;
use crate::types::{EvaluatorConfig, RunRequest, StdioCase};
use crate::{evaluator, orchestrator};

pub struct AppState {
    pub config: EngineConfig,
    pub subnet_pool: Arc<SubnetPool>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// `POST /run_code` — run one submission through up to two phases
/// (compile, run) and return the composed `RunResult` (§3, §4.3).
#[post("/run_code")]
async fn run_code(state: web::Data<AppState>, request: web::Json<RunRequest>) -> HttpResponse {
    match orchestrator::run(&state.config, &state.subnet_pool, request.into_inner()).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            error!(error = %e, "run_code failed");
            HttpResponse::InternalServerError().json(ErrorBody { error: format!("{e:#}") })
        }
    }
}

#[derive(serde::Deserialize)]
struct CheckStdioRequest {
    request: RunRequest,
    cases: Vec<StdioCase>,
    #[serde(default)]
    run_all_cases: bool,
    #[serde(default)]
    max_runner_concurrency: usize,
}

/// `POST /check_stdio_cases` — run one submission against many stdin/stdout
/// cases (§4.6).
#[post("/check_stdio_cases")]
async fn check_stdio_cases(state: web::Data<AppState>, body: web::Json<CheckStdioRequest>) -> HttpResponse {
    let body = body.into_inner();
    let evaluator_config = EvaluatorConfig {
        run_timeout: None,
        max_runner_concurrency: body.max_runner_concurrency,
        run_all_cases: body.run_all_cases,
    };
    match evaluator::check_stdio_cases(&state.config, &state.subnet_pool, &evaluator_config, &body.request, &body.cases).await {
        Ok(outcomes) => HttpResponse::Ok().json(outcomes),
        Err(e) => {
            error!(error = %e, "check_stdio_cases failed");
            HttpResponse::InternalServerError().json(ErrorBody { error: format!("{e:#}") })
        }
    }
}

/// `POST /run_jupyter` — execute a sequence of cells against a Jupyter
/// kernel (§4.5).
#[derive(serde::Deserialize)]
struct RunJupyterRequest {
    connection: crate::jupyter::ConnectionInfo,
    cells: Vec<String>,
    #[serde(default = "default_per_cell_timeout")]
    per_cell_timeout_secs: u64,
    #[serde(default = "default_total_timeout")]
    total_timeout_secs: u64,
}

fn default_per_cell_timeout() -> u64 {
    30
}

fn default_total_timeout() -> u64 {
    120
}

#[post("/run_jupyter")]
async fn run_jupyter(body: web::Json<RunJupyterRequest>) -> HttpResponse {
    let body = body.into_inner();
    let per_cell = std::time::Duration::from_secs(body.per_cell_timeout_secs);
    let total = std::time::Duration::from_secs(body.total_timeout_secs);
    match crate::jupyter::run_cells(&body.connection, &body.cells, per_cell, total).await {
        Ok(outputs) => HttpResponse::Ok().json(outputs),
        Err(e) => {
            error!(error = %e, "run_jupyter failed");
            HttpResponse::InternalServerError().json(ErrorBody { error: format!("{e:#}") })
        }
    }
}

/// `GET /v1/ping` — liveness probe (§6).
#[get("/v1/ping")]
async fn ping() -> HttpResponse {
    HttpResponse::Ok().body("pong")
}

/// `GET /` — redirect to docs, matching the original service's root route.
#[get("/")]
async fn index() -> HttpResponse {
    HttpResponse::Found().insert_header(("Location", "/docs")).finish()
}

pub async fn serve(config: EngineConfig, port: u16) -> std::io::Result<()> {
    let worker_offset = EngineConfig::worker_slice();
    let subnet_pool = Arc::new(SubnetPool::new(&config.subnet_base, config.subnet_prefix_len, worker_offset));
    let state = web::Data::new(AppState { config, subnet_pool });

    info!(port, "starting sandbox-engine HTTP server");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(ping)
            .service(index)
            .service(run_code)
            .service(check_stdio_cases)
            .service(run_jupyter)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
