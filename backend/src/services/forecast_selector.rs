use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{ForecastRun, Site};
use crate::services::auth::AccessGrant;
use crate::services::capacity::{CapacityModel, SiteGeometry};
use crate::services::{floor_kw, round_kw};
use crate::services::site_registry::{visible_site, visible_sites};
use crate::store::Store;

pub const NO_FORECAST_YET: &str = "no forecast available yet";

/// Quarter-hour steps in a clear-sky estimate: four days.
const CLEARSKY_STEPS: i64 = 384;
const CLEARSKY_STEP_MINUTES: i64 = 15;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub target_datetime_utc: DateTime<Utc>,
    pub expected_generation_kw: f64,
}

/// A site's forecast as served to callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SiteForecast {
    pub forecast_uuid: Uuid,
    pub site_uuid: Uuid,
    /// Creation time of the selected run, not of the response.
    pub forecast_creation_datetime: DateTime<Utc>,
    pub forecast_version: String,
    pub forecast_values: Vec<ForecastPoint>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClearskyPoint {
    pub target_datetime_utc: DateTime<Utc>,
    pub clearsky_generation_kw: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClearskyEstimate {
    pub site_uuid: Uuid,
    pub clearsky_estimate: Vec<ClearskyPoint>,
}

/// Pick the run to serve: complete runs only, created at or before `as_of`,
/// latest creation time first, higher run id on ties.
pub fn select_run(runs: &[ForecastRun], as_of: Option<DateTime<Utc>>) -> Option<&ForecastRun> {
    runs.iter()
        .filter(|run| run.is_complete)
        .filter(|run| as_of.map_or(true, |limit| run.created_utc <= limit))
        .max_by_key(|run| (run.created_utc, run.id))
}

/// Round a predicted value to 3 decimals, clipped to the ceiling. A value at
/// or under the ceiling keeps its rounded form.
pub fn clip_to_ceiling(predicted_kw: f64, ceiling_kw: f64) -> f64 {
    let rounded = round_kw(predicted_kw);
    if rounded > ceiling_kw {
        floor_kw(ceiling_kw)
    } else {
        rounded
    }
}

pub struct ForecastSelector<'a> {
    store: &'a dyn Store,
    capacity: &'a dyn CapacityModel,
}

impl<'a> ForecastSelector<'a> {
    pub fn new(store: &'a dyn Store, capacity: &'a dyn CapacityModel) -> Self {
        Self { store, capacity }
    }

    /// Serve the selected run for one site, or `NotFound` when the site has
    /// no complete run yet.
    pub fn get_forecast(
        &self,
        grant: &AccessGrant,
        site_uuid: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<SiteForecast, GatewayError> {
        let site = visible_site(self.store, grant, site_uuid)?;

        self.forecast_for_site(&site, as_of)?
            .ok_or_else(|| GatewayError::NotFound(NO_FORECAST_YET.to_string()))
    }

    /// Batch form of [`get_forecast`](Self::get_forecast). Every id must be in
    /// the grant; sites without a complete run are left out.
    pub fn get_forecasts(
        &self,
        grant: &AccessGrant,
        site_uuids: &[Uuid],
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<SiteForecast>, GatewayError> {
        let sites = visible_sites(self.store, grant, site_uuids)?;

        let mut forecasts = Vec::with_capacity(sites.len());
        for site in &sites {
            if let Some(forecast) = self.forecast_for_site(site, as_of)? {
                forecasts.push(forecast);
            }
        }
        Ok(forecasts)
    }

    /// Clear-sky estimate in quarter-hour steps starting at `start`.
    pub fn clearsky_estimate(
        &self,
        grant: &AccessGrant,
        site_uuid: Uuid,
        start: DateTime<Utc>,
    ) -> Result<ClearskyEstimate, GatewayError> {
        let site = visible_site(self.store, grant, site_uuid)?;
        let geometry = SiteGeometry::from(&site);

        let clearsky_estimate = (0..CLEARSKY_STEPS)
            .map(|step| {
                let at = start + Duration::minutes(step * CLEARSKY_STEP_MINUTES);
                ClearskyPoint {
                    target_datetime_utc: at,
                    clearsky_generation_kw: floor_kw(self.capacity.clearsky_kw(&geometry, at)),
                }
            })
            .collect();

        Ok(ClearskyEstimate {
            site_uuid,
            clearsky_estimate,
        })
    }

    fn forecast_for_site(
        &self,
        site: &Site,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<SiteForecast>, GatewayError> {
        let runs = self.store.forecast_runs(site.site_uuid, as_of)?;
        let run = match select_run(&runs, as_of) {
            Some(run) => run,
            None => {
                debug!("No complete forecast run for site {}", site.site_uuid);
                return Ok(None);
            }
        };

        let mut values = self.store.forecast_values(run.id)?;
        values.sort_by_key(|v| v.start_utc);
        values.dedup_by_key(|v| v.start_utc);

        let geometry = SiteGeometry::from(site);
        let mut clipped = 0;
        let forecast_values = values
            .iter()
            .map(|value| {
                let ceiling = self.capacity.ceiling_kw(&geometry, value.start_utc);
                if value.forecast_power_kw > ceiling {
                    clipped += 1;
                }
                ForecastPoint {
                    target_datetime_utc: value.start_utc,
                    expected_generation_kw: clip_to_ceiling(value.forecast_power_kw, ceiling),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Selected run {} for site {} ({} values, {} clipped)",
            run.id,
            site.site_uuid,
            forecast_values.len(),
            clipped
        );

        Ok(Some(SiteForecast {
            forecast_uuid: run.forecast_uuid,
            site_uuid: site.site_uuid,
            forecast_creation_datetime: run.created_utc,
            forecast_version: run.forecast_version.clone(),
            forecast_values,
        }))
    }
}
