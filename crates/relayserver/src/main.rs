use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use relaycore::OrchestratorError;
use relayproviders::{build_orchestrator, OrchestratorConfig, ProviderOracle};
use relayruntime::Orchestrator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    orchestrator: Arc<Orchestrator>,
    oracle: Option<ProviderOracle>,
}

/// Request body for workflow submission
#[derive(Debug, Deserialize)]
struct StartRequest {
    workflow_type: String,
    #[serde(default)]
    initial_data: serde_json::Value,
}

/// Request body for planned workflows
#[derive(Debug, Deserialize)]
struct PlanBody {
    task: String,
    #[serde(default)]
    available_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: Uuid,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: &OrchestratorError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };
    match err {
        OrchestratorError::UnknownWorkflowType(_)
        | OrchestratorError::InvalidInput(_)
        | OrchestratorError::PlanValidation(_) => HttpResponse::BadRequest().json(body),
        OrchestratorError::NotFound(_) => HttpResponse::NotFound().json(body),
        OrchestratorError::ShutDown => HttpResponse::ServiceUnavailable().json(body),
        _ => {
            error!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "relay"
    }))
}

#[post("/api/workflows")]
async fn start_workflow(
    data: web::Data<AppState>,
    req: web::Json<StartRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    match data
        .orchestrator
        .start_workflow(&req.workflow_type, req.initial_data)
        .await
    {
        Ok(id) => {
            info!("Started {} workflow {}", req.workflow_type, id);
            Ok(HttpResponse::Created().json(WorkflowResponse {
                id,
                message: "Workflow started".to_string(),
            }))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// Ask the configured planner for a plan and run it
#[post("/api/workflows/plan")]
async fn start_planned_workflow(
    data: web::Data<AppState>,
    req: web::Json<PlanBody>,
) -> ActixResult<impl Responder> {
    let Some(oracle) = data.oracle.as_ref() else {
        return Ok(HttpResponse::NotImplemented().json(ErrorResponse {
            error: "No planner configured".to_string(),
        }));
    };

    let req = req.into_inner();
    match data
        .orchestrator
        .start_planned_workflow(&req.task, req.available_data, oracle)
        .await
    {
        Ok(id) => Ok(HttpResponse::Created().json(WorkflowResponse {
            id,
            message: "Planned workflow started".to_string(),
        })),
        Err(e) => Ok(error_response(&e)),
    }
}

#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.orchestrator.list_workflows().await))
}

#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.orchestrator.workflow_status(path.into_inner()).await {
        Ok(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        Err(e) => Ok(error_response(&e)),
    }
}

#[get("/api/workflows/{id}/results")]
async fn get_results(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.orchestrator.workflow_results(path.into_inner()).await {
        Ok(results) => Ok(HttpResponse::Ok().json(results)),
        Err(e) => Ok(error_response(&e)),
    }
}

#[get("/api/providers")]
async fn list_providers(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.orchestrator.registry();
    let providers: Vec<_> = registry
        .summaries()
        .into_iter()
        .map(|summary| {
            let metadata = registry.get_metadata(&summary.name);
            serde_json::json!({
                "name": summary.name,
                "operations": summary.operations,
                "transport": metadata.as_ref().map(|m| m.transport.clone()).unwrap_or_default(),
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "connected": registry.is_connected(&summary.name),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(providers))
}

/// WebSocket stream of status notices
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");
    let mut notices = data.orchestrator.subscribe();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                notice = notices.recv() => {
                    match notice {
                        Ok(notice) => {
                            if let Ok(json) = serde_json::to_string(&notice) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} notices dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(start_planned_workflow)
        .service(start_workflow)
        .service(list_workflows)
        .service(get_results)
        .service(get_workflow)
        .service(list_providers)
        .service(websocket_events);
}

fn load_config() -> anyhow::Result<OrchestratorConfig> {
    match std::env::var("RELAY_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            Ok(OrchestratorConfig::load(&path)?)
        }
        Err(_) => {
            info!("RELAY_CONFIG not set, using built-in providers");
            Ok(OrchestratorConfig::default())
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting relay server");

    let config = load_config()?;
    let (orchestrator, oracle) = build_orchestrator(&config)?;
    orchestrator.start().await;

    info!(
        "Orchestrator ready with providers: {}",
        orchestrator.registry().list_providers().join(", ")
    );
    if oracle.is_none() {
        info!("No planner configured; /api/workflows/plan is disabled");
    }

    let app_state = web::Data::new(AppState {
        orchestrator: orchestrator.clone(),
        oracle,
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    orchestrator.shutdown().await;
    Ok(())
}
