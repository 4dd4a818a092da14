use super::handlers::{execution, health, ws};
use super::middleware::cors::add_cors;
use crate::services::{ExecutionService, NotificationHub};
use axum::{
    Router,
    routing::{get, post},
};

#[derive(Clone)]
pub struct AppState {
    pub execution_service: ExecutionService,
    pub hub: NotificationHub,
}

pub fn create_router(execution_service: ExecutionService, hub: NotificationHub) -> Router {
    let state = AppState {
        execution_service,
        hub,
    };

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Execution
        .route("/api/executions", post(execution::start_execution))
        .route("/api/executions", get(execution::list_executions))
        .route("/api/executions/{id}", get(execution::get_execution))
        .route("/api/executions/{id}/console", get(execution::console_output))
        .route("/api/executions/{id}/logs", get(execution::list_logs))
        // Live events
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    add_cors(api_routes)
}
