use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::sites)]
pub struct Site {
    pub site_uuid: Uuid,
    #[serde(skip)]
    pub owner_subject: String,
    pub client_site_id: String,
    pub client_site_name: String,
    pub region: Option<String>,
    pub orientation: f64,
    pub tilt: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub inverter_capacity_kw: f64,
    pub module_capacity_kw: f64,
    #[serde(skip)]
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Candidate site as submitted by a caller, before validation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SiteInput {
    pub client_site_id: String,
    pub client_site_name: String,
    #[serde(default)]
    pub region: Option<String>,
    pub orientation: f64,
    pub tilt: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub inverter_capacity_kw: f64,
    pub module_capacity_kw: f64,
}

/// Partial update; absent fields are left untouched.
#[derive(Deserialize, Serialize, AsChangeset, Debug, Clone, Default, PartialEq)]
#[diesel(table_name = crate::schema::sites)]
pub struct SiteChanges {
    pub client_site_id: Option<String>,
    pub client_site_name: Option<String>,
    pub region: Option<String>,
    pub orientation: Option<f64>,
    pub tilt: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub inverter_capacity_kw: Option<f64>,
    pub module_capacity_kw: Option<f64>,
}

impl SiteChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, site: &mut Site) {
        if let Some(ref v) = self.client_site_id {
            site.client_site_id = v.clone();
        }
        if let Some(ref v) = self.client_site_name {
            site.client_site_name = v.clone();
        }
        if let Some(ref v) = self.region {
            site.region = Some(v.clone());
        }
        if let Some(v) = self.orientation {
            site.orientation = v;
        }
        if let Some(v) = self.tilt {
            site.tilt = v;
        }
        if let Some(v) = self.latitude {
            site.latitude = v;
        }
        if let Some(v) = self.longitude {
            site.longitude = v;
        }
        if let Some(v) = self.inverter_capacity_kw {
            site.inverter_capacity_kw = v;
        }
        if let Some(v) = self.module_capacity_kw {
            site.module_capacity_kw = v;
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::sites)]
pub struct NewSite {
    pub site_uuid: Uuid,
    pub owner_subject: String,
    pub client_site_id: String,
    pub client_site_name: String,
    pub region: Option<String>,
    pub orientation: f64,
    pub tilt: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub inverter_capacity_kw: f64,
    pub module_capacity_kw: f64,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

impl NewSite {
    pub fn into_site(self) -> Site {
        Site {
            site_uuid: self.site_uuid,
            owner_subject: self.owner_subject,
            client_site_id: self.client_site_id,
            client_site_name: self.client_site_name,
            region: self.region,
            orientation: self.orientation,
            tilt: self.tilt,
            latitude: self.latitude,
            longitude: self.longitude,
            inverter_capacity_kw: self.inverter_capacity_kw,
            module_capacity_kw: self.module_capacity_kw,
            active: self.active,
            created_utc: self.created_utc,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::forecast_runs)]
pub struct ForecastRun {
    pub id: i64,
    pub forecast_uuid: Uuid,
    pub site_uuid: Uuid,
    pub created_utc: DateTime<Utc>,
    pub forecast_version: String,
    pub is_complete: bool,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::forecast_values)]
pub struct ForecastValue {
    pub id: i64,
    pub forecast_run_id: i64,
    pub start_utc: DateTime<Utc>,
    pub forecast_power_kw: f64,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::pv_actual_values)]
pub struct PVActualValue {
    pub site_uuid: Uuid,
    pub start_utc: DateTime<Utc>,
    pub generation_power_kw: f64,
    pub is_suspect: bool,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::pv_actual_values)]
pub struct NewPVActualValue {
    pub site_uuid: Uuid,
    pub start_utc: DateTime<Utc>,
    pub generation_power_kw: f64,
    pub is_suspect: bool,
    pub updated_utc: DateTime<Utc>,
}

/// Whether an upserted reading created a row or replaced one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::statuses)]
pub struct ApiStatus {
    #[serde(skip)]
    pub id: i32,
    pub status: String,
    pub message: String,
    #[serde(skip)]
    pub created_utc: DateTime<Utc>,
}
