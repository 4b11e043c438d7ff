use chrono::{DateTime, SubsecRound, Utc};
use diesel::prelude::*;
use diesel::r2d2::PoolError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::upsert::excluded;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::db::DbPool;
use crate::models::{
    ApiStatus, ForecastRun, ForecastValue, NewPVActualValue, NewSite, PVActualValue, Site,
    SiteChanges, UpsertOutcome,
};
use crate::schema::{forecast_runs, forecast_values, pv_actual_values, sites, statuses};

/// How many complete runs to hand to the selector for tie-breaking.
const RUN_CANDIDATES: i64 = 4;

impl From<DieselError> for StoreError {
    fn from(error: DieselError) -> Self {
        match error {
            DieselError::NotFound => StoreError::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::CheckViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation => {
                    StoreError::Conflict(info.message().to_string())
                }
                DatabaseErrorKind::ClosedConnection => {
                    StoreError::Unavailable(info.message().to_string())
                }
                _ => StoreError::Query(info.message().to_string()),
            },
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(error: PoolError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

/// Diesel-backed store over the r2d2 pool
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl Store for PgStore {
    fn insert_site(&self, site: NewSite) -> Result<Site, StoreError> {
        let mut conn = self.pool.get()?;

        let site = diesel::insert_into(sites::table)
            .values(&site)
            .returning(Site::as_returning())
            .get_result(&mut conn)?;

        Ok(site)
    }

    fn update_site(&self, site_uuid: Uuid, changes: &SiteChanges) -> Result<Site, StoreError> {
        let mut conn = self.pool.get()?;

        // Diesel rejects an empty changeset
        if changes.is_empty() {
            return sites::table
                .filter(sites::site_uuid.eq(site_uuid))
                .filter(sites::active.eq(true))
                .select(Site::as_select())
                .first(&mut conn)
                .map_err(StoreError::from);
        }

        diesel::update(
            sites::table
                .filter(sites::site_uuid.eq(site_uuid))
                .filter(sites::active.eq(true)),
        )
        .set(changes)
        .returning(Site::as_returning())
        .get_result(&mut conn)
        .map_err(StoreError::from)
    }

    fn retire_site(&self, site_uuid: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;

        let rows = diesel::update(
            sites::table
                .filter(sites::site_uuid.eq(site_uuid))
                .filter(sites::active.eq(true)),
        )
        .set(sites::active.eq(false))
        .execute(&mut conn)?;

        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn owned_site_uuids(&self, owner: &str) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.pool.get()?;

        let ids = sites::table
            .filter(sites::owner_subject.eq(owner))
            .filter(sites::active.eq(true))
            .order(sites::created_utc.asc())
            .select(sites::site_uuid)
            .load(&mut conn)?;

        Ok(ids)
    }

    fn sites_by_uuids(&self, site_uuids: &[Uuid]) -> Result<Vec<Site>, StoreError> {
        let mut conn = self.pool.get()?;

        let results = sites::table
            .filter(sites::site_uuid.eq_any(site_uuids))
            .filter(sites::active.eq(true))
            .order((sites::created_utc.asc(), sites::site_uuid.asc()))
            .select(Site::as_select())
            .load(&mut conn)?;

        Ok(results)
    }

    fn forecast_runs(
        &self,
        site_uuid: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForecastRun>, StoreError> {
        let mut conn = self.pool.get()?;

        let mut query = forecast_runs::table
            .filter(forecast_runs::site_uuid.eq(site_uuid))
            .filter(forecast_runs::is_complete.eq(true))
            .into_boxed();
        if let Some(as_of) = as_of {
            query = query.filter(forecast_runs::created_utc.le(as_of));
        }

        let runs = query
            .order((forecast_runs::created_utc.desc(), forecast_runs::id.desc()))
            .limit(RUN_CANDIDATES)
            .select(ForecastRun::as_select())
            .load(&mut conn)?;

        Ok(runs)
    }

    fn forecast_values(&self, forecast_run_id: i64) -> Result<Vec<ForecastValue>, StoreError> {
        let mut conn = self.pool.get()?;

        let values = forecast_values::table
            .filter(forecast_values::forecast_run_id.eq(forecast_run_id))
            .order(forecast_values::start_utc.asc())
            .select(ForecastValue::as_select())
            .load(&mut conn)?;

        Ok(values)
    }

    fn upsert_actuals(
        &self,
        site_uuid: Uuid,
        readings: &[NewPVActualValue],
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, StoreError, _>(|conn| {
            // Row lock on the site serializes concurrent batches for it
            sites::table
                .filter(sites::site_uuid.eq(site_uuid))
                .filter(sites::active.eq(true))
                .select(sites::site_uuid)
                .for_update()
                .first::<Uuid>(conn)?;

            if readings.is_empty() {
                return Ok(Vec::new());
            }

            let timestamps: Vec<DateTime<Utc>> = readings.iter().map(|r| r.start_utc).collect();
            let existing: Vec<DateTime<Utc>> = pv_actual_values::table
                .filter(pv_actual_values::site_uuid.eq(site_uuid))
                .filter(pv_actual_values::start_utc.eq_any(&timestamps))
                .select(pv_actual_values::start_utc)
                .load(conn)?;

            diesel::insert_into(pv_actual_values::table)
                .values(readings)
                .on_conflict((pv_actual_values::site_uuid, pv_actual_values::start_utc))
                .do_update()
                .set((
                    pv_actual_values::generation_power_kw
                        .eq(excluded(pv_actual_values::generation_power_kw)),
                    pv_actual_values::is_suspect.eq(excluded(pv_actual_values::is_suspect)),
                    pv_actual_values::updated_utc.eq(excluded(pv_actual_values::updated_utc)),
                ))
                .execute(conn)?;

            Ok(readings
                .iter()
                .map(|r| {
                    if existing.contains(&r.start_utc.trunc_subsecs(6)) {
                        UpsertOutcome::Updated
                    } else {
                        UpsertOutcome::Inserted
                    }
                })
                .collect())
        })
    }

    fn actuals_since(
        &self,
        site_uuids: &[Uuid],
        start_utc: DateTime<Utc>,
    ) -> Result<Vec<PVActualValue>, StoreError> {
        let mut conn = self.pool.get()?;

        let values = pv_actual_values::table
            .filter(pv_actual_values::site_uuid.eq_any(site_uuids))
            .filter(pv_actual_values::start_utc.ge(start_utc))
            .order((
                pv_actual_values::site_uuid.asc(),
                pv_actual_values::start_utc.asc(),
            ))
            .select(PVActualValue::as_select())
            .load(&mut conn)?;

        Ok(values)
    }

    fn latest_status(&self) -> Result<Option<ApiStatus>, StoreError> {
        let mut conn = self.pool.get()?;

        let status = statuses::table
            .order(statuses::id.desc())
            .select(ApiStatus::as_select())
            .first(&mut conn)
            .optional()?;

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    /// Needs a scratch database: `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`
    fn test_store() -> PgStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        PgStore::new(db::init_pool(&url, 8).unwrap())
    }

    fn new_site() -> NewSite {
        NewSite {
            site_uuid: Uuid::new_v4(),
            owner_subject: "alice".to_string(),
            client_site_id: "1".to_string(),
            client_site_name: "the site name".to_string(),
            region: None,
            orientation: 180.0,
            tilt: 30.0,
            latitude: 50.0,
            longitude: 0.0,
            inverter_capacity_kw: 4.0,
            module_capacity_kw: 4.0,
            active: true,
            created_utc: Utc::now(),
        }
    }

    fn row(site_uuid: Uuid, start_utc: DateTime<Utc>, kw: f64) -> NewPVActualValue {
        NewPVActualValue {
            site_uuid,
            start_utc,
            generation_power_kw: kw,
            is_suspect: false,
            updated_utc: Utc::now(),
        }
    }

    #[test]
    #[ignore]
    fn test_upsert_reports_insert_then_update() {
        let store = test_store();
        let site = store.insert_site(new_site()).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let first = store
            .upsert_actuals(site.site_uuid, &[row(site.site_uuid, at, 1.0)])
            .unwrap();
        let second = store
            .upsert_actuals(
                site.site_uuid,
                &[
                    row(site.site_uuid, at, 2.0),
                    row(site.site_uuid, at + Duration::minutes(15), 3.0),
                ],
            )
            .unwrap();

        assert_eq!(first, vec![UpsertOutcome::Inserted]);
        assert_eq!(second, vec![UpsertOutcome::Updated, UpsertOutcome::Inserted]);

        let stored = store.actuals_since(&[site.site_uuid], at).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].generation_power_kw, 2.0);
    }

    #[test]
    #[ignore]
    fn test_upsert_on_retired_site_is_not_found() {
        let store = test_store();
        let site = store.insert_site(new_site()).unwrap();
        store.retire_site(site.site_uuid).unwrap();

        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert!(matches!(
            store.upsert_actuals(site.site_uuid, &[row(site.site_uuid, at, 1.0)]),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    #[ignore]
    fn test_concurrent_batches_for_one_site() {
        let store = Arc::new(test_store());
        let site_uuid = store.insert_site(new_site()).unwrap().site_uuid;
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        let handles: Vec<_> = (0..4i64)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let rows: Vec<NewPVActualValue> = (worker..worker + 6)
                        .map(|step| row(site_uuid, base + Duration::minutes(15 * step), worker as f64))
                        .collect();
                    let outcomes = store.upsert_actuals(site_uuid, &rows).unwrap();
                    rows.into_iter()
                        .map(|r| r.start_utc)
                        .zip(outcomes)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut inserted: HashMap<DateTime<Utc>, usize> = HashMap::new();
        for handle in handles {
            for (at, outcome) in handle.join().unwrap() {
                if outcome == UpsertOutcome::Inserted {
                    *inserted.entry(at).or_default() += 1;
                }
            }
        }

        // The site row lock lets exactly one batch insert each timestamp
        assert_eq!(inserted.len(), 9);
        assert!(inserted.values().all(|&count| count == 1));
        assert_eq!(store.actuals_since(&[site_uuid], base).unwrap().len(), 9);
    }
}
