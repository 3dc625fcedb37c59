use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "available",
        system_info: SystemInfo {
            environment: state.config.environment.as_str(),
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}
