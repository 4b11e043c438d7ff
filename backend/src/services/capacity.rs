//! Capacity model: the highest generation a site can plausibly produce at a
//! given instant, derived from sun position, panel geometry and nameplate
//! capacities under a clear sky.

use crate::models::Site;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Top-of-atmosphere irradiance in W/m².
const SOLAR_CONSTANT: f64 = 1367.0;
/// Irradiance at which module nameplate capacity is rated (STC), W/m².
const STC_IRRADIANCE: f64 = 1000.0;
const DIFFUSE_FRACTION: f64 = 0.1;
const GROUND_ALBEDO: f64 = 0.2;
/// Multiplier on clear-sky DC output allowed before the ceiling binds.
const DEFAULT_HEADROOM: f64 = 1.5;

/// Geometry and nameplate data the capacity model needs from a site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteGeometry {
    /// Panel azimuth in degrees from north; 180 faces south.
    pub orientation: f64,
    /// Panel tilt in degrees; 90 is vertical.
    pub tilt: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub inverter_capacity_kw: f64,
    pub module_capacity_kw: f64,
}

impl From<&Site> for SiteGeometry {
    fn from(site: &Site) -> Self {
        Self {
            orientation: site.orientation,
            tilt: site.tilt,
            latitude: site.latitude,
            longitude: site.longitude,
            inverter_capacity_kw: site.inverter_capacity_kw,
            module_capacity_kw: site.module_capacity_kw,
        }
    }
}

/// Pure, deterministic mapping from site + instant to kW.
pub trait CapacityModel: Send + Sync {
    /// Maximum plausible AC generation. Never negative, never above the
    /// inverter capacity.
    fn ceiling_kw(&self, site: &SiteGeometry, at: DateTime<Utc>) -> f64;

    /// Expected AC generation under a clear sky.
    fn clearsky_kw(&self, site: &SiteGeometry, at: DateTime<Utc>) -> f64;
}

/// Sun position as seen from a location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    /// Degrees above the horizon.
    pub elevation_deg: f64,
    /// Degrees from north, clockwise.
    pub azimuth_deg: f64,
}

/// Solar position for a UTC instant.
///
/// Uses the Cooper declination approximation and local mean solar time; good
/// to about a degree, which is plenty for a plausibility bound.
pub fn solar_position(latitude_deg: f64, longitude_deg: f64, at: DateTime<Utc>) -> SolarPosition {
    let day_of_year = at.ordinal() as f64;
    let hour = at.hour() as f64 + at.minute() as f64 / 60.0 + at.second() as f64 / 3600.0;

    let declination_rad = (23.45 * (360.0 / 365.0 * (day_of_year + 284.0)).to_radians().sin())
        .to_radians();
    let latitude_rad = latitude_deg.to_radians();

    let solar_time = hour + longitude_deg / 15.0;
    let hour_angle_deg = normalize_angle(15.0 * (solar_time - 12.0));
    let hour_angle_rad = hour_angle_deg.to_radians();

    let elevation_sin = latitude_rad.sin() * declination_rad.sin()
        + latitude_rad.cos() * declination_rad.cos() * hour_angle_rad.cos();
    let elevation_rad = elevation_sin.clamp(-1.0, 1.0).asin();

    let denominator = latitude_rad.cos() * elevation_rad.cos();
    let mut azimuth_deg = if denominator.abs() < 1e-9 {
        180.0
    } else {
        ((declination_rad.sin() - latitude_rad.sin() * elevation_rad.sin()) / denominator)
            .clamp(-1.0, 1.0)
            .acos()
            .to_degrees()
    };

    // Afternoon: sun is in the western half of the sky
    if hour_angle_deg > 0.0 {
        azimuth_deg = 360.0 - azimuth_deg;
    }

    SolarPosition {
        elevation_deg: elevation_rad.to_degrees(),
        azimuth_deg,
    }
}

/// Map an angle in degrees into (-180, 180].
fn normalize_angle(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// Clear-sky model with Kasten-Young style attenuation and an isotropic
/// diffuse sky.
#[derive(Debug, Clone, Copy)]
pub struct ClearSkyCapacityModel {
    headroom: f64,
}

impl Default for ClearSkyCapacityModel {
    fn default() -> Self {
        Self {
            headroom: DEFAULT_HEADROOM,
        }
    }
}

impl ClearSkyCapacityModel {
    pub fn new(headroom: f64) -> Self {
        Self { headroom }
    }

    /// Plane-of-array irradiance in W/m² for a clear sky.
    pub fn plane_of_array_irradiance(&self, site: &SiteGeometry, at: DateTime<Utc>) -> f64 {
        let sun = solar_position(site.latitude, site.longitude, at);
        if sun.elevation_deg <= 0.0 {
            return 0.0;
        }

        let elevation_rad = sun.elevation_deg.to_radians();
        let air_mass = if sun.elevation_deg > 5.0 {
            1.0 / elevation_rad.sin()
        } else {
            // Avoid the singularity near the horizon
            12.0 - sun.elevation_deg / 5.0
        };

        let dni = SOLAR_CONSTANT * 0.7_f64.powf(air_mass.powf(0.678));
        let beam_horizontal = dni * elevation_rad.sin();
        let dhi = beam_horizontal * DIFFUSE_FRACTION / (1.0 - DIFFUSE_FRACTION);
        let ghi = beam_horizontal + dhi;

        let zenith_rad = PI / 2.0 - elevation_rad;
        let tilt_rad = site.tilt.to_radians();
        let cos_incidence = zenith_rad.cos() * tilt_rad.cos()
            + zenith_rad.sin()
                * tilt_rad.sin()
                * (sun.azimuth_deg - site.orientation).to_radians().cos();

        let beam = dni * cos_incidence.max(0.0);
        let sky_diffuse = dhi * (1.0 + tilt_rad.cos()) / 2.0;
        let ground = ghi * GROUND_ALBEDO * (1.0 - tilt_rad.cos()) / 2.0;

        (beam + sky_diffuse + ground).max(0.0)
    }

    fn clearsky_dc_kw(&self, site: &SiteGeometry, at: DateTime<Utc>) -> f64 {
        site.module_capacity_kw * self.plane_of_array_irradiance(site, at) / STC_IRRADIANCE
    }
}

impl CapacityModel for ClearSkyCapacityModel {
    fn ceiling_kw(&self, site: &SiteGeometry, at: DateTime<Utc>) -> f64 {
        (self.clearsky_dc_kw(site, at) * self.headroom)
            .min(site.inverter_capacity_kw)
            .max(0.0)
    }

    fn clearsky_kw(&self, site: &SiteGeometry, at: DateTime<Utc>) -> f64 {
        self.clearsky_dc_kw(site, at)
            .min(site.inverter_capacity_kw)
            .max(0.0)
    }
}
