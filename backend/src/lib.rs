//! PV Site Gateway Library
//!
//! Site-scoped API for photovoltaic installations, including:
//! - Site registration and management, isolated per caller
//! - Selection of the latest complete forecast run, clipped to a clear-sky
//!   capacity ceiling
//! - Idempotent ingestion of measured generation with plausibility flags
//! - Bearer-token verification (shared secret or Auth0 JWKS)

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod schema;
pub mod services;
pub mod store;
