use actix_web::{HttpResponse, get, web};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::gateway::Gateway;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub environment: String,
}

#[get("/")]
pub async fn index(info: web::Data<ServiceInfo>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "title": "PV Site Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": info.environment,
    }))
}

/// Latest platform status; no credential required
#[get("/api_status")]
pub async fn api_status(gateway: web::Data<Gateway>) -> Result<HttpResponse, GatewayError> {
    let status = gateway.api_status().await?;
    Ok(HttpResponse::Ok().json(status))
}
