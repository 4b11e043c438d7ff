use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{
    ApiStatus, ForecastRun, ForecastValue, NewPVActualValue, NewSite, PVActualValue, Site,
    SiteChanges, UpsertOutcome,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Failures reported by the persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection could not be obtained or was lost; safe to retry reads.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record not found")]
    NotFound,
    /// A constraint rejected the write.
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error("store query failed: {0}")]
    Query(String),
}

impl From<StoreError> for GatewayError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(msg) => GatewayError::Unavailable(msg),
            StoreError::NotFound => GatewayError::site_not_found(),
            StoreError::Conflict(msg) => GatewayError::invalid("site", msg),
            StoreError::Query(msg) => GatewayError::Internal(msg),
        }
    }
}

/// Persistence collaborator.
///
/// Implementations must expose a forecast run's values and its completeness
/// flag atomically: a run reported with `is_complete = true` has all of its
/// values readable.
pub trait Store: Send + Sync {
    /// Persist a new site. The id and creation time are already assigned.
    fn insert_site(&self, site: NewSite) -> Result<Site, StoreError>;

    fn update_site(&self, site_uuid: Uuid, changes: &SiteChanges) -> Result<Site, StoreError>;

    /// Soft-retire a site; rows referencing it are kept.
    fn retire_site(&self, site_uuid: Uuid) -> Result<(), StoreError>;

    /// Active sites owned by `owner`.
    fn owned_site_uuids(&self, owner: &str) -> Result<Vec<Uuid>, StoreError>;

    /// Active sites among `site_uuids`, ordered by creation time then id.
    fn sites_by_uuids(&self, site_uuids: &[Uuid]) -> Result<Vec<Site>, StoreError>;

    /// Candidate forecast runs for a site.
    ///
    /// May pre-filter to complete runs created at or before `as_of`, newest
    /// first; callers still apply their own ordering.
    fn forecast_runs(
        &self,
        site_uuid: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForecastRun>, StoreError>;

    fn forecast_values(&self, forecast_run_id: i64) -> Result<Vec<ForecastValue>, StoreError>;

    /// Upsert readings keyed by (site, start_utc) in a single transaction that
    /// excludes concurrent writers for the same site. Outcomes are returned in
    /// input order.
    fn upsert_actuals(
        &self,
        site_uuid: Uuid,
        readings: &[NewPVActualValue],
    ) -> Result<Vec<UpsertOutcome>, StoreError>;

    /// Readings at or after `start_utc`, ordered by site then time.
    fn actuals_since(
        &self,
        site_uuids: &[Uuid],
        start_utc: DateTime<Utc>,
    ) -> Result<Vec<PVActualValue>, StoreError>;

    fn latest_status(&self) -> Result<Option<ApiStatus>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            GatewayError::from(StoreError::Unavailable("pool".into())).kind(),
            "unavailable"
        );
        assert_eq!(GatewayError::from(StoreError::NotFound).kind(), "not_found");
        assert_eq!(
            GatewayError::from(StoreError::Conflict("dup".into())).kind(),
            "invalid_argument"
        );
        assert_eq!(
            GatewayError::from(StoreError::Query("syntax".into())).kind(),
            "internal"
        );
    }
}
