use actix_web::{HttpResponse, get, web};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::auth::Caller;
use crate::error::GatewayError;
use crate::gateway::Gateway;

#[derive(Deserialize)]
pub struct ForecastQuery {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct SiteUuidsQuery {
    pub site_uuids: String,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// Parse a comma-separated list of site ids.
pub fn parse_site_uuids(raw: &str) -> Result<Vec<Uuid>, GatewayError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| GatewayError::invalid("site_uuids", format!("{:?} is not a UUID", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(GatewayError::invalid("site_uuids", "must not be empty"));
    }
    Ok(ids)
}

/// Latest complete forecast for one site, clipped to the capacity ceiling
#[get("/sites/{site_uuid}/pv_forecast")]
pub async fn get_forecast(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
    query: web::Query<ForecastQuery>,
) -> Result<HttpResponse, GatewayError> {
    let forecast = gateway
        .get_forecast(&caller.0, path.into_inner(), query.as_of)
        .await?;
    Ok(HttpResponse::Ok().json(forecast))
}

#[get("/sites/pv_forecast")]
pub async fn get_forecasts(
    gateway: web::Data<Gateway>,
    caller: Caller,
    query: web::Query<SiteUuidsQuery>,
) -> Result<HttpResponse, GatewayError> {
    let site_uuids = parse_site_uuids(&query.site_uuids)?;
    let forecasts = gateway
        .get_forecasts(&caller.0, site_uuids, query.as_of)
        .await?;
    Ok(HttpResponse::Ok().json(forecasts))
}

#[get("/sites/{site_uuid}/clearsky_estimate")]
pub async fn get_clearsky_estimate(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GatewayError> {
    let estimate = gateway
        .clearsky_estimate(&caller.0, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(estimate))
}
