//! Issue Token - development helper
//!
//! Prints an HS256 bearer token for a caller, signed with the same secret the
//! gateway verifies against. Useful with `FAKE=1`, whose demo site belongs to
//! the `demo` subject.
//!
//! Usage:
//!   issue_token [SUBJECT]
//!
//! Environment variables:
//!   JWT_SECRET         - HS256 shared secret (default "secret")
//!   AUTH0_API_AUDIENCE - `aud` claim to embed (optional)

use std::env;

use pv_site_gateway::services::auth::create_jwt;

fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let subject = env::args().nth(1).unwrap_or_else(|| "demo".to_string());
    let secret = env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string());
    let audience = env::var("AUTH0_API_AUDIENCE").ok();

    if env::var("AUTH0_DOMAIN").is_ok() {
        log::warn!("AUTH0_DOMAIN is set; the gateway will not accept HS256 tokens");
    }

    match create_jwt(&subject, &secret, audience.as_deref()) {
        Ok(token) => println!("{}", token),
        Err(e) => {
            log::error!("Failed to issue token: {}", e);
            std::process::exit(1);
        }
    }
}
