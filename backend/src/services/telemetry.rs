use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SuspectPolicy;
use crate::error::{FieldError, GatewayError};
use crate::models::{NewPVActualValue, UpsertOutcome};
use crate::services::auth::AccessGrant;
use crate::services::capacity::{CapacityModel, SiteGeometry};
use crate::services::round_kw;
use crate::services::site_registry::{visible_site, visible_sites};
use crate::store::Store;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PVActualReading {
    /// RFC 3339, or a naive timestamp taken as UTC.
    pub datetime_utc: String,
    pub actual_generation_kw: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MultiplePVActual {
    /// Optional echo of the path id; must match it when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_uuid: Option<Uuid>,
    pub pv_actual_values: Vec<PVActualReading>,
}

/// Per-reading result of a submitted batch, in submission order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadingResult {
    pub datetime_utc: DateTime<Utc>,
    pub outcome: UpsertOutcome,
    pub suspect: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActualsReceipt {
    pub site_uuid: Uuid,
    pub results: Vec<ReadingResult>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActualPoint {
    pub datetime_utc: DateTime<Utc>,
    pub actual_generation_kw: f64,
    pub suspect: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SiteActuals {
    pub site_uuid: Uuid,
    pub pv_actual_values: Vec<ActualPoint>,
}

/// Parse a submitted timestamp into UTC, truncated to microseconds (the
/// precision of `timestamptz`).
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let parsed = match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| naive.and_utc()),
    };
    parsed.map(|dt| dt.trunc_subsecs(6))
}

/// Validate a whole batch before anything is written. Every offending reading
/// is reported; a single failure rejects the batch.
pub fn validate_batch(
    readings: &[PVActualReading],
) -> Result<Vec<(DateTime<Utc>, f64)>, GatewayError> {
    let mut errors = Vec::new();
    let mut seen: HashMap<DateTime<Utc>, usize> = HashMap::new();
    let mut parsed = Vec::with_capacity(readings.len());

    for (i, reading) in readings.iter().enumerate() {
        let raw = reading.actual_generation_kw;
        let kw = round_kw(raw);
        if !kw.is_finite() {
            errors.push(FieldError::new(
                format!("pv_actual_values[{}].actual_generation_kw", i),
                "must be a finite number",
            ));
        } else if raw < 0.0 {
            errors.push(FieldError::new(
                format!("pv_actual_values[{}].actual_generation_kw", i),
                "must not be negative",
            ));
        }

        match parse_utc(&reading.datetime_utc) {
            Some(at) => {
                if let Some(first) = seen.insert(at, i) {
                    errors.push(FieldError::new(
                        format!("pv_actual_values[{}].datetime_utc", i),
                        format!("duplicates pv_actual_values[{}]", first),
                    ));
                }
                parsed.push((at, kw));
            }
            None => errors.push(FieldError::new(
                format!("pv_actual_values[{}].datetime_utc", i),
                "is not a valid UTC timestamp",
            )),
        }
    }

    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(GatewayError::InvalidArgument(errors))
    }
}

/// Validate, flag and upsert caller-submitted generation readings
pub struct TelemetryIngestor<'a> {
    store: &'a dyn Store,
    capacity: &'a dyn CapacityModel,
    suspect: SuspectPolicy,
}

impl<'a> TelemetryIngestor<'a> {
    pub fn new(
        store: &'a dyn Store,
        capacity: &'a dyn CapacityModel,
        suspect: SuspectPolicy,
    ) -> Self {
        Self {
            store,
            capacity,
            suspect,
        }
    }

    pub fn submit(
        &self,
        grant: &AccessGrant,
        site_uuid: Uuid,
        readings: &[PVActualReading],
    ) -> Result<ActualsReceipt, GatewayError> {
        grant.require(site_uuid)?;
        let parsed = validate_batch(readings)?;
        let site = visible_site(self.store, grant, site_uuid)?;

        if parsed.is_empty() {
            return Ok(ActualsReceipt {
                site_uuid,
                results: Vec::new(),
            });
        }

        let geometry = SiteGeometry::from(&site);
        let now = Utc::now();
        let rows: Vec<NewPVActualValue> = parsed
            .iter()
            .map(|&(start_utc, kw)| {
                let ceiling = self.capacity.ceiling_kw(&geometry, start_utc);
                let is_suspect = kw > self.suspect.threshold_kw(ceiling);
                if is_suspect {
                    warn!(
                        "Suspect reading for site {} at {}: {} kW against a ceiling of {:.3} kW",
                        site_uuid, start_utc, kw, ceiling
                    );
                }
                NewPVActualValue {
                    site_uuid,
                    start_utc,
                    generation_power_kw: kw,
                    is_suspect,
                    updated_utc: now,
                }
            })
            .collect();

        let outcomes = self.store.upsert_actuals(site_uuid, &rows)?;
        if outcomes.len() != rows.len() {
            return Err(GatewayError::Internal(format!(
                "store returned {} outcomes for {} readings",
                outcomes.len(),
                rows.len()
            )));
        }

        let results: Vec<ReadingResult> = rows
            .iter()
            .zip(outcomes)
            .map(|(row, outcome)| ReadingResult {
                datetime_utc: row.start_utc,
                outcome,
                suspect: row.is_suspect,
            })
            .collect();

        let inserted = results
            .iter()
            .filter(|r| r.outcome == UpsertOutcome::Inserted)
            .count();
        let suspect = results.iter().filter(|r| r.suspect).count();
        info!(
            "Ingested {} readings for site {} ({} inserted, {} updated, {} suspect)",
            results.len(),
            site_uuid,
            inserted,
            results.len() - inserted,
            suspect
        );

        Ok(ActualsReceipt { site_uuid, results })
    }

    /// Stored readings since `since` for each requested site, oldest first.
    /// Every requested site gets an entry, possibly empty.
    pub fn get_actuals(
        &self,
        grant: &AccessGrant,
        site_uuids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<SiteActuals>, GatewayError> {
        let sites = visible_sites(self.store, grant, site_uuids)?;
        if sites.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = sites.iter().map(|s| s.site_uuid).collect();
        let mut by_site: HashMap<Uuid, Vec<ActualPoint>> = HashMap::new();
        for value in self.store.actuals_since(&ids, since)? {
            by_site.entry(value.site_uuid).or_default().push(ActualPoint {
                datetime_utc: value.start_utc,
                actual_generation_kw: value.generation_power_kw,
                suspect: value.is_suspect,
            });
        }

        Ok(sites
            .iter()
            .map(|site| {
                let mut pv_actual_values = by_site.remove(&site.site_uuid).unwrap_or_default();
                pv_actual_values.sort_by_key(|p| p.datetime_utc);
                SiteActuals {
                    site_uuid: site.site_uuid,
                    pv_actual_values,
                }
            })
            .collect())
    }
}
