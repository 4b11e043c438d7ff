use actix_web::{HttpResponse, get, post, web};
use uuid::Uuid;

use crate::api::auth::Caller;
use crate::api::forecast::{SiteUuidsQuery, parse_site_uuids};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::services::telemetry::MultiplePVActual;

/// Submit measured generation for a site. Suspect readings are stored and
/// flagged in the 200 response.
#[post("/sites/{site_uuid}/pv_actual")]
pub async fn submit_actuals(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
    body: web::Json<MultiplePVActual>,
) -> Result<HttpResponse, GatewayError> {
    let site_uuid = path.into_inner();
    let body = body.into_inner();
    if let Some(body_site) = body.site_uuid {
        if body_site != site_uuid {
            return Err(GatewayError::invalid(
                "site_uuid",
                "does not match the site in the path",
            ));
        }
    }

    let receipt = gateway
        .submit_actuals(&caller.0, site_uuid, body.pv_actual_values)
        .await?;
    Ok(HttpResponse::Ok().json(receipt))
}

/// Readings for one site since yesterday's UTC midnight
#[get("/sites/{site_uuid}/pv_actual")]
pub async fn get_actuals(
    gateway: web::Data<Gateway>,
    caller: Caller,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GatewayError> {
    let actuals = gateway
        .get_actuals(&caller.0, vec![path.into_inner()])
        .await?
        .into_iter()
        .next()
        .ok_or(GatewayError::Forbidden)?;
    Ok(HttpResponse::Ok().json(actuals))
}

#[get("/sites/pv_actual")]
pub async fn get_many_actuals(
    gateway: web::Data<Gateway>,
    caller: Caller,
    query: web::Query<SiteUuidsQuery>,
) -> Result<HttpResponse, GatewayError> {
    let site_uuids = parse_site_uuids(&query.site_uuids)?;
    let actuals = gateway.get_actuals(&caller.0, site_uuids).await?;
    Ok(HttpResponse::Ok().json(actuals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_pv_actual_deserialization() {
        let json = r#"{
            "pv_actual_values": [
                {"datetime_utc": "2024-06-21T12:00:00Z", "actual_generation_kw": 0.05},
                {"datetime_utc": "2024-06-21T12:15:00", "actual_generation_kw": 0}
            ]
        }"#;
        let body: MultiplePVActual = serde_json::from_str(json).unwrap();

        assert_eq!(body.site_uuid, None);
        assert_eq!(body.pv_actual_values.len(), 2);
        assert_eq!(body.pv_actual_values[1].actual_generation_kw, 0.0);
    }

    #[test]
    fn test_multiple_pv_actual_requires_values() {
        let result: Result<MultiplePVActual, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }
}
