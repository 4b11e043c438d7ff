use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};

use pv_site_gateway::api::{self, status::ServiceInfo};
use pv_site_gateway::config::GatewayConfig;
use pv_site_gateway::db;
use pv_site_gateway::gateway::Gateway;
use pv_site_gateway::services::auth::{IdentityProvider, JwksIdentityProvider, JwtIdentityProvider};
use pv_site_gateway::services::capacity::ClearSkyCapacityModel;
use pv_site_gateway::store::{MemoryStore, PgStore, Store};

/// Owner of the demo site seeded in FAKE mode.
const DEMO_SUBJECT: &str = "demo";

fn startup_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

fn build_store(config: &GatewayConfig) -> std::io::Result<Arc<dyn Store>> {
    if config.fake {
        let store = MemoryStore::new();
        let site = store.seed_demo(DEMO_SUBJECT).map_err(startup_error)?;
        log::info!(
            "FAKE mode: serving from memory with demo site {}",
            site.site_uuid
        );
        return Ok(Arc::new(store));
    }

    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| startup_error("DATABASE_URL must be set"))?;
    let pool = db::init_pool(database_url, config.db_pool_size).map_err(startup_error)?;
    Ok(Arc::new(PgStore::new(pool)))
}

fn build_identity(config: &GatewayConfig) -> Arc<dyn IdentityProvider> {
    match config.auth.auth0_domain {
        Some(ref domain) => {
            log::info!("Verifying RS256 tokens issued by {}", domain);
            Arc::new(JwksIdentityProvider::new(
                domain.clone(),
                config.auth.audience.clone(),
            ))
        }
        None => Arc::new(JwtIdentityProvider::new(
            config.auth.jwt_secret.clone(),
            config.auth.audience.clone(),
        )),
    }
}

fn build_cors(origins: &[String]) -> Cors {
    if origins.iter().any(|o| o == "*") {
        return Cors::permissive();
    }
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = GatewayConfig::from_env().map_err(startup_error)?;

    let gateway = Gateway::new(
        build_store(&config)?,
        build_identity(&config),
        Arc::new(ClearSkyCapacityModel::default()),
        config.suspect,
        config.calls,
    );
    let info = ServiceInfo {
        environment: config.environment.clone(),
    };

    log::info!(
        "Starting PV Site Gateway ({}) at http://{}:{}",
        config.environment,
        config.bind_address,
        config.port
    );

    let origins = config.cors_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&origins))
            .wrap(middleware::Logger::default())
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(info.clone()))
            .configure(api::config)
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await
}
