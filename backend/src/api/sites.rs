use actix_web::{HttpResponse, delete, get, post, put, web};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::Caller;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::models::{Site, SiteChanges, SiteInput};

#[derive(Serialize, Deserialize)]
pub struct SiteList {
    pub site_list: Vec<Site>,
}

/// Register a new site for the caller
#[post("/sites")]
pub async fn register_site(
    gateway: web::Data<Gateway>,
    caller: Caller,
    body: web::Json<SiteInput>,
) -> Result<HttpResponse, GatewayError> {
    let site = gateway.register_site(&caller.0, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(site))
}

/// List the caller's sites, oldest first
#[get("/sites")]
pub async fn list_sites(
    gateway: web::Data<Gateway>,
    caller: Caller,
) -> Result<HttpResponse, GatewayError> {
    let site_list = gateway.list_sites(&caller.0).await?;
    Ok(HttpResponse::Ok().json(SiteList { site_list }))
}

#[get("/sites/{site_uuid}")]
pub async fn get_site(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GatewayError> {
    let site = gateway.get_site(&caller.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(site))
}

#[put("/sites/{site_uuid}")]
pub async fn update_site(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
    body: web::Json<SiteChanges>,
) -> Result<HttpResponse, GatewayError> {
    let site = gateway
        .update_site(&caller.0, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(site))
}

/// Soft-retire a site
#[delete("/sites/{site_uuid}")]
pub async fn retire_site(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GatewayError> {
    gateway.retire_site(&caller.0, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
