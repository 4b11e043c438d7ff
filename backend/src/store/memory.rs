use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Timelike, Utc};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::{
    ApiStatus, ForecastRun, ForecastValue, NewPVActualValue, NewSite, PVActualValue, Site,
    SiteChanges, UpsertOutcome,
};

#[derive(Default)]
struct Inner {
    sites: Vec<Site>,
    runs: Vec<ForecastRun>,
    values: Vec<ForecastValue>,
    actuals: BTreeMap<(Uuid, DateTime<Utc>), PVActualValue>,
    statuses: Vec<ApiStatus>,
    next_run_id: i64,
    next_value_id: i64,
}

/// In-process store used for fake mode and tests.
///
/// A single mutex serializes every call, which also gives the per-site write
/// exclusion the telemetry upsert requires.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failures_remaining: AtomicU32,
    latency_ms: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with `Unavailable`.
    pub fn fail_next_calls(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u32, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency as u64));
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }

        self.inner
            .lock()
            .map_err(|_| StoreError::Query("memory store lock poisoned".to_string()))
    }

    /// Store a forecast run as the external producer would: values first,
    /// then the run header, all under one lock.
    pub fn add_forecast_run(
        &self,
        site_uuid: Uuid,
        created_utc: DateTime<Utc>,
        is_complete: bool,
        values: &[(DateTime<Utc>, f64)],
    ) -> Result<ForecastRun, StoreError> {
        let mut inner = self.lock()?;
        inner.next_run_id += 1;
        let run = ForecastRun {
            id: inner.next_run_id,
            forecast_uuid: Uuid::new_v4(),
            site_uuid,
            created_utc,
            forecast_version: "0.0.1".to_string(),
            is_complete,
        };

        for (start_utc, power_kw) in values {
            inner.next_value_id += 1;
            let value = ForecastValue {
                id: inner.next_value_id,
                forecast_run_id: run.id,
                start_utc: *start_utc,
                forecast_power_kw: *power_kw,
            };
            inner.values.push(value);
        }
        inner.runs.push(run.clone());

        Ok(run)
    }

    pub fn mark_run_complete(&self, forecast_run_id: i64) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == forecast_run_id)
            .ok_or(StoreError::NotFound)?;
        run.is_complete = true;
        Ok(())
    }

    pub fn set_status(&self, status: &str, message: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let id = inner.statuses.len() as i32 + 1;
        inner.statuses.push(ApiStatus {
            id,
            status: status.to_string(),
            message: message.to_string(),
            created_utc: Utc::now(),
        });
        Ok(())
    }

    /// Seed one site for `owner` with a complete half-hourly forecast covering
    /// the next eight hours, shaped like a clear day.
    pub fn seed_demo(&self, owner: &str) -> Result<Site, StoreError> {
        let now = Utc::now();
        let site = self.insert_site(NewSite {
            site_uuid: Uuid::new_v4(),
            owner_subject: owner.to_string(),
            client_site_id: "demo-1".to_string(),
            client_site_name: "Demo site".to_string(),
            region: Some("demo".to_string()),
            orientation: 180.0,
            tilt: 35.0,
            latitude: 51.5,
            longitude: -0.12,
            inverter_capacity_kw: 4.0,
            module_capacity_kw: 4.5,
            active: true,
            created_utc: now,
        })?;

        let start = now
            .duration_trunc(ChronoDuration::minutes(30))
            .unwrap_or(now);
        let values: Vec<(DateTime<Utc>, f64)> = (0..16)
            .map(|i| {
                let at = start + ChronoDuration::minutes(30 * i);
                (at, 4.0 * daylight_intensity(at))
            })
            .collect();
        self.add_forecast_run(site.site_uuid, now, true, &values)?;

        Ok(site)
    }
}

/// cos² bump between 06:00 and 18:00 UTC, zero at night.
fn daylight_intensity(at: DateTime<Utc>) -> f64 {
    let fraction_of_day = (at.hour() * 60 + at.minute()) as f64 / (24.0 * 60.0);
    if fraction_of_day > 0.25 && fraction_of_day < 0.75 {
        (2.0 * std::f64::consts::PI * fraction_of_day).cos().powi(2)
    } else {
        0.0
    }
}

impl Store for MemoryStore {
    fn insert_site(&self, site: NewSite) -> Result<Site, StoreError> {
        let mut inner = self.lock()?;
        if inner.sites.iter().any(|s| s.site_uuid == site.site_uuid) {
            return Err(StoreError::Conflict("duplicate site_uuid".to_string()));
        }
        let site = site.into_site();
        inner.sites.push(site.clone());
        Ok(site)
    }

    fn update_site(&self, site_uuid: Uuid, changes: &SiteChanges) -> Result<Site, StoreError> {
        let mut inner = self.lock()?;
        let site = inner
            .sites
            .iter_mut()
            .find(|s| s.site_uuid == site_uuid && s.active)
            .ok_or(StoreError::NotFound)?;
        changes.apply_to(site);
        Ok(site.clone())
    }

    fn retire_site(&self, site_uuid: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let site = inner
            .sites
            .iter_mut()
            .find(|s| s.site_uuid == site_uuid && s.active)
            .ok_or(StoreError::NotFound)?;
        site.active = false;
        Ok(())
    }

    fn owned_site_uuids(&self, owner: &str) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .sites
            .iter()
            .filter(|s| s.active && s.owner_subject == owner)
            .map(|s| s.site_uuid)
            .collect())
    }

    fn sites_by_uuids(&self, site_uuids: &[Uuid]) -> Result<Vec<Site>, StoreError> {
        let inner = self.lock()?;
        let mut sites: Vec<Site> = inner
            .sites
            .iter()
            .filter(|s| s.active && site_uuids.contains(&s.site_uuid))
            .cloned()
            .collect();
        sites.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.site_uuid.cmp(&b.site_uuid))
        });
        Ok(sites)
    }

    // Returns every run for the site unfiltered; selection is the caller's job.
    fn forecast_runs(
        &self,
        site_uuid: Uuid,
        _as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForecastRun>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .runs
            .iter()
            .filter(|r| r.site_uuid == site_uuid)
            .cloned()
            .collect())
    }

    // Insertion order, not time order.
    fn forecast_values(&self, forecast_run_id: i64) -> Result<Vec<ForecastValue>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .values
            .iter()
            .filter(|v| v.forecast_run_id == forecast_run_id)
            .cloned()
            .collect())
    }

    fn upsert_actuals(
        &self,
        site_uuid: Uuid,
        readings: &[NewPVActualValue],
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let mut inner = self.lock()?;
        if !inner
            .sites
            .iter()
            .any(|s| s.site_uuid == site_uuid && s.active)
        {
            return Err(StoreError::NotFound);
        }

        let outcomes = readings
            .iter()
            .map(|reading| {
                let key = (site_uuid, reading.start_utc);
                let previous = inner.actuals.insert(
                    key,
                    PVActualValue {
                        site_uuid,
                        start_utc: reading.start_utc,
                        generation_power_kw: reading.generation_power_kw,
                        is_suspect: reading.is_suspect,
                        updated_utc: reading.updated_utc,
                    },
                );
                match previous {
                    Some(_) => UpsertOutcome::Updated,
                    None => UpsertOutcome::Inserted,
                }
            })
            .collect();

        Ok(outcomes)
    }

    fn actuals_since(
        &self,
        site_uuids: &[Uuid],
        start_utc: DateTime<Utc>,
    ) -> Result<Vec<PVActualValue>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .actuals
            .values()
            .filter(|v| site_uuids.contains(&v.site_uuid) && v.start_utc >= start_utc)
            .cloned()
            .collect())
    }

    fn latest_status(&self) -> Result<Option<ApiStatus>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.statuses.last().cloned())
    }
}
