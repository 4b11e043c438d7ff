use actix_web::web;

use crate::error::GatewayError;

pub mod actuals;
pub mod auth;
pub mod forecast;
pub mod sites;
pub mod status;

pub fn config(cfg: &mut web::ServiceConfig) {
    // Extractor failures answer with the same JSON error body as everything else
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        GatewayError::invalid("body", err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        GatewayError::invalid("query", err.to_string()).into()
    }))
    .app_data(
        web::PathConfig::default().error_handler(|_err, _req| GatewayError::site_not_found().into()),
    );

    // Public routes
    cfg.service(status::index).service(status::api_status);

    // Multi-site routes before `/sites/{site_uuid}` so they are not shadowed
    cfg.service(forecast::get_forecasts)
        .service(actuals::get_many_actuals);

    // Site routes (protected)
    cfg.service(sites::register_site)
        .service(sites::list_sites)
        .service(sites::get_site)
        .service(sites::update_site)
        .service(sites::retire_site);

    // Forecast and telemetry routes (protected)
    cfg.service(forecast::get_forecast)
        .service(forecast::get_clearsky_estimate)
        .service(actuals::submit_actuals)
        .service(actuals::get_actuals);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, http::StatusCode, test};
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::api::status::ServiceInfo;
    use crate::config::{CallPolicy, SuspectPolicy};
    use crate::gateway::Gateway;
    use crate::services::auth::{JwtIdentityProvider, create_jwt};
    use crate::services::capacity::ClearSkyCapacityModel;
    use crate::store::MemoryStore;

    const SECRET: &str = "http-test-secret";

    fn gateway(store: Arc<MemoryStore>) -> Gateway {
        Gateway::new(
            store,
            Arc::new(JwtIdentityProvider::new(SECRET, None)),
            Arc::new(ClearSkyCapacityModel::default()),
            SuspectPolicy::default(),
            CallPolicy::default(),
        )
    }

    fn bearer(subject: &str) -> (&'static str, String) {
        (
            "Authorization",
            format!("Bearer {}", create_jwt(subject, SECRET, None).unwrap()),
        )
    }

    fn rochdale() -> Value {
        json!({
            "client_site_id": "1",
            "client_site_name": "the site name",
            "orientation": 15.0,
            "tilt": 35.0,
            "latitude": 53.68,
            "longitude": -2.00,
            "inverter_capacity_kw": 4.0,
            "module_capacity_kw": 4.0
        })
    }

    macro_rules! app {
        ($store:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(gateway(Arc::clone(&$store))))
                    .app_data(web::Data::new(ServiceInfo {
                        environment: "test".to_string(),
                    }))
                    .configure(config),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn test_index_and_status_are_public() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::get().uri("/").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["environment"], "test");

        let req = test::TestRequest::get().uri("/api_status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
    }

    #[actix_rt::test]
    async fn test_missing_token_is_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::get().uri("/sites").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "unauthorized");
    }

    #[actix_rt::test]
    async fn test_register_list_and_get() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .set_json(rochdale())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let site_uuid = created["site_uuid"].as_str().unwrap().to_string();
        assert!(created.get("owner_subject").is_none());

        let req = test::TestRequest::get()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed["site_list"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::get()
            .uri(&format!("/sites/{}", site_uuid))
            .insert_header(bearer("alice"))
            .to_request();
        let fetched: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched, created);
    }

    #[actix_rt::test]
    async fn test_invalid_site_is_bad_request() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let mut site = rochdale();
        site["tilt"] = json!(91);
        site["orientation"] = json!(400);
        let req = test::TestRequest::post()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .set_json(site)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "invalid_argument");
        let fields: Vec<&str> = body["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["orientation", "tilt"]);
    }

    #[actix_rt::test]
    async fn test_foreign_and_missing_sites_look_the_same() {
        let store = Arc::new(MemoryStore::new());
        let theirs = store.seed_demo("bob").unwrap();
        let app = app!(store);

        let mut bodies = Vec::new();
        for uri in [
            format!("/sites/{}", theirs.site_uuid),
            format!("/sites/{}", Uuid::new_v4()),
            format!("/sites/{}/pv_forecast", theirs.site_uuid),
        ] {
            let req = test::TestRequest::get()
                .uri(&uri)
                .insert_header(bearer("alice"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            let body: Value = test::read_body_json(resp).await;
            bodies.push(body);
        }
        assert_eq!(bodies[0], bodies[1]);
        assert_eq!(bodies[1], bodies[2]);
    }

    #[actix_rt::test]
    async fn test_forecast_for_demo_site() {
        let store = Arc::new(MemoryStore::new());
        let site = store.seed_demo("alice").unwrap();
        let app = app!(store);

        let req = test::TestRequest::get()
            .uri(&format!("/sites/{}/pv_forecast", site.site_uuid))
            .insert_header(bearer("alice"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["site_uuid"], site.site_uuid.to_string());
        assert_eq!(body["forecast_values"].as_array().unwrap().len(), 16);

        let req = test::TestRequest::get()
            .uri(&format!("/sites/pv_forecast?site_uuids={}", site.site_uuid))
            .insert_header(bearer("alice"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn test_night_forecast_is_clipped() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .set_json(rochdale())
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let site_uuid = Uuid::parse_str(created["site_uuid"].as_str().unwrap()).unwrap();

        let midnight = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        store
            .add_forecast_run(site_uuid, midnight, true, &[(midnight, 3.0)])
            .unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/sites/{}/pv_forecast", site_uuid))
            .insert_header(bearer("alice"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["forecast_values"][0]["expected_generation_kw"], 0.0);
    }

    #[actix_rt::test]
    async fn test_forecast_without_complete_run_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .set_json(rochdale())
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/sites/{}/pv_forecast",
                created["site_uuid"].as_str().unwrap()
            ))
            .insert_header(bearer("alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "no forecast available yet");
    }

    #[actix_rt::test]
    async fn test_submit_actuals_flags_suspect_readings() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .set_json(rochdale())
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let site_uuid = created["site_uuid"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/sites/{}/pv_actual", site_uuid))
            .insert_header(bearer("alice"))
            .set_json(json!({
                "pv_actual_values": [
                    {"datetime_utc": "2024-06-21T12:00:00Z", "actual_generation_kw": 0.05},
                    {"datetime_utc": "2024-06-21T12:15:00Z", "actual_generation_kw": 50}
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["outcome"], "inserted");
        assert_eq!(results[0]["suspect"], false);
        assert_eq!(results[1]["outcome"], "inserted");
        assert_eq!(results[1]["suspect"], true);
    }

    #[actix_rt::test]
    async fn test_submit_actuals_rejects_negative_batch() {
        let store = Arc::new(MemoryStore::new());
        let site = store.seed_demo("alice").unwrap();
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri(&format!("/sites/{}/pv_actual", site.site_uuid))
            .insert_header(bearer("alice"))
            .set_json(json!({
                "pv_actual_values": [
                    {"datetime_utc": "2024-06-21T12:00:00Z", "actual_generation_kw": -1}
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body["fields"][0]["field"],
            "pv_actual_values[0].actual_generation_kw"
        );
    }

    #[actix_rt::test]
    async fn test_malformed_json_is_bad_request() {
        let store = Arc::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri("/sites")
            .insert_header(bearer("alice"))
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "invalid_argument");
    }

    #[actix_rt::test]
    async fn test_retired_site_disappears() {
        let store = Arc::new(MemoryStore::new());
        let site = store.seed_demo("alice").unwrap();
        let app = app!(store);

        let req = test::TestRequest::delete()
            .uri(&format!("/sites/{}", site.site_uuid))
            .insert_header(bearer("alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri(&format!("/sites/{}", site.site_uuid))
            .insert_header(bearer("alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
