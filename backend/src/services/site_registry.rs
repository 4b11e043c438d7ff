use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::error::{FieldError, GatewayError};
use crate::models::{NewSite, Site, SiteChanges, SiteInput};
use crate::services::auth::AccessGrant;
use crate::store::Store;

const MAX_TEXT_LEN: usize = 255;

/// Create, read, update and retire sites within a caller's grant
pub struct SiteRegistry<'a> {
    store: &'a dyn Store,
}

impl<'a> SiteRegistry<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Validate and persist a new site owned by the caller.
    pub fn register(&self, grant: &AccessGrant, input: SiteInput) -> Result<Site, GatewayError> {
        validate_input(&input)?;

        let new_site = NewSite {
            site_uuid: Uuid::new_v4(),
            owner_subject: grant.subject().to_string(),
            client_site_id: input.client_site_id.trim().to_string(),
            client_site_name: input.client_site_name.trim().to_string(),
            region: input.region.map(|r| r.trim().to_string()),
            orientation: input.orientation,
            tilt: input.tilt,
            latitude: input.latitude,
            longitude: input.longitude,
            inverter_capacity_kw: input.inverter_capacity_kw,
            module_capacity_kw: input.module_capacity_kw,
            active: true,
            created_utc: Utc::now(),
        };

        let site = self.store.insert_site(new_site)?;
        info!(
            "Registered site {} (client_site_id={}) for {}",
            site.site_uuid,
            site.client_site_id,
            grant.subject()
        );
        Ok(site)
    }

    /// All sites in the grant, oldest first.
    pub fn list(&self, grant: &AccessGrant) -> Result<Vec<Site>, GatewayError> {
        let site_uuids = grant.site_uuids();
        if site_uuids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sites = self.store.sites_by_uuids(&site_uuids)?;
        sites.retain(|s| grant.contains(s.site_uuid));
        sites.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.site_uuid.cmp(&b.site_uuid))
        });
        Ok(sites)
    }

    /// One site, or `NotFound` whether it is missing or outside the grant.
    pub fn get(&self, grant: &AccessGrant, site_uuid: Uuid) -> Result<Site, GatewayError> {
        visible_site(self.store, grant, site_uuid)
    }

    pub fn update(
        &self,
        grant: &AccessGrant,
        site_uuid: Uuid,
        mut changes: SiteChanges,
    ) -> Result<Site, GatewayError> {
        if !grant.contains(site_uuid) {
            return Err(GatewayError::site_not_found());
        }
        validate_changes(&changes)?;
        trim_text_fields(&mut changes);

        let site = self.store.update_site(site_uuid, &changes)?;
        info!("Updated site {} for {}", site_uuid, grant.subject());
        Ok(site)
    }

    /// Soft-retire a site. Its forecasts and telemetry stay in the store.
    pub fn retire(&self, grant: &AccessGrant, site_uuid: Uuid) -> Result<(), GatewayError> {
        if !grant.contains(site_uuid) {
            return Err(GatewayError::site_not_found());
        }

        self.store.retire_site(site_uuid)?;
        info!("Retired site {} for {}", site_uuid, grant.subject());
        Ok(())
    }
}

/// Look up one site in the grant. Missing, retired and foreign sites all
/// answer the same way.
pub fn visible_site(
    store: &dyn Store,
    grant: &AccessGrant,
    site_uuid: Uuid,
) -> Result<Site, GatewayError> {
    grant.require(site_uuid)?;
    store
        .sites_by_uuids(&[site_uuid])?
        .into_iter()
        .next()
        .ok_or(GatewayError::Forbidden)
}

/// Resolve a list of requested ids to visible sites, failing if any of them
/// is outside the grant or no longer active. Duplicates are collapsed.
pub fn visible_sites(
    store: &dyn Store,
    grant: &AccessGrant,
    site_uuids: &[Uuid],
) -> Result<Vec<Site>, GatewayError> {
    let mut requested = site_uuids.to_vec();
    requested.sort();
    requested.dedup();
    for site_uuid in &requested {
        grant.require(*site_uuid)?;
    }
    if requested.is_empty() {
        return Ok(Vec::new());
    }

    let sites = store.sites_by_uuids(&requested)?;
    if sites.len() != requested.len() {
        return Err(GatewayError::Forbidden);
    }
    Ok(sites)
}

fn trim_text_fields(changes: &mut SiteChanges) {
    for value in [
        &mut changes.client_site_id,
        &mut changes.client_site_name,
        &mut changes.region,
    ]
    .into_iter()
    .flatten()
    {
        *value = value.trim().to_string();
    }
}

// Length is counted in characters after trimming, as stored.
fn check_text(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    } else if value.chars().count() > MAX_TEXT_LEN {
        errors.push(FieldError::new(
            field,
            format!("must be at most {} characters", MAX_TEXT_LEN),
        ));
    }
}

fn check_range(errors: &mut Vec<FieldError>, field: &str, value: f64, min: f64, max: f64) {
    if !value.is_finite() || value < min || value > max {
        errors.push(FieldError::new(
            field,
            format!("must be within [{}, {}]", min, max),
        ));
    }
}

fn check_orientation(errors: &mut Vec<FieldError>, value: f64) {
    if !value.is_finite() || !(0.0..360.0).contains(&value) {
        errors.push(FieldError::new("orientation", "must be within [0, 360)"));
    }
}

fn check_capacity(errors: &mut Vec<FieldError>, field: &str, value: f64) {
    if !value.is_finite() || value <= 0.0 {
        errors.push(FieldError::new(field, "must be greater than 0"));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), GatewayError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::InvalidArgument(errors))
    }
}

/// Check every geometry and capacity constraint, reporting all offending fields.
pub fn validate_input(input: &SiteInput) -> Result<(), GatewayError> {
    let mut errors = Vec::new();

    check_text(&mut errors, "client_site_id", &input.client_site_id);
    check_text(&mut errors, "client_site_name", &input.client_site_name);
    if let Some(ref region) = input.region {
        check_text(&mut errors, "region", region);
    }
    check_orientation(&mut errors, input.orientation);
    check_range(&mut errors, "tilt", input.tilt, 0.0, 90.0);
    check_range(&mut errors, "latitude", input.latitude, -90.0, 90.0);
    check_range(&mut errors, "longitude", input.longitude, -180.0, 180.0);
    check_capacity(&mut errors, "inverter_capacity_kw", input.inverter_capacity_kw);
    check_capacity(&mut errors, "module_capacity_kw", input.module_capacity_kw);

    finish(errors)
}

/// Same rules as [`validate_input`], applied to the fields present.
pub fn validate_changes(changes: &SiteChanges) -> Result<(), GatewayError> {
    let mut errors = Vec::new();

    if let Some(ref v) = changes.client_site_id {
        check_text(&mut errors, "client_site_id", v);
    }
    if let Some(ref v) = changes.client_site_name {
        check_text(&mut errors, "client_site_name", v);
    }
    if let Some(ref v) = changes.region {
        check_text(&mut errors, "region", v);
    }
    if let Some(v) = changes.orientation {
        check_orientation(&mut errors, v);
    }
    if let Some(v) = changes.tilt {
        check_range(&mut errors, "tilt", v, 0.0, 90.0);
    }
    if let Some(v) = changes.latitude {
        check_range(&mut errors, "latitude", v, -90.0, 90.0);
    }
    if let Some(v) = changes.longitude {
        check_range(&mut errors, "longitude", v, -180.0, 180.0);
    }
    if let Some(v) = changes.inverter_capacity_kw {
        check_capacity(&mut errors, "inverter_capacity_kw", v);
    }
    if let Some(v) = changes.module_capacity_kw {
        check_capacity(&mut errors, "module_capacity_kw", v);
    }

    finish(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::CallerIdentity;
    use crate::store::MemoryStore;

    fn valid_input() -> SiteInput {
        SiteInput {
            client_site_id: "1".to_string(),
            client_site_name: "the site name".to_string(),
            region: None,
            orientation: 15.0,
            tilt: 35.0,
            latitude: 53.68,
            longitude: -2.00,
            inverter_capacity_kw: 4.0,
            module_capacity_kw: 4.0,
        }
    }

    fn grant_for(store: &MemoryStore, subject: &str) -> AccessGrant {
        AccessGrant::new(
            CallerIdentity {
                subject: subject.to_string(),
            },
            store.owned_site_uuids(subject).unwrap(),
        )
    }

    fn fields_of(err: GatewayError) -> Vec<String> {
        match err {
            GatewayError::InvalidArgument(fields) => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_register_then_get_returns_identical_record() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);

        let site = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();
        let fetched = registry
            .get(&grant_for(&store, "alice"), site.site_uuid)
            .unwrap();

        assert_eq!(site, fetched);
        assert_eq!(fetched.orientation, 15.0);
        assert_eq!(fetched.inverter_capacity_kw, 4.0);
    }

    #[test]
    fn test_register_accepts_boundary_values() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let input = SiteInput {
            orientation: 0.0,
            tilt: 90.0,
            latitude: -90.0,
            longitude: 180.0,
            inverter_capacity_kw: 0.001,
            ..valid_input()
        };

        assert!(registry.register(&grant_for(&store, "alice"), input).is_ok());
    }

    #[test]
    fn test_register_rejects_tilt_91() {
        let input = SiteInput {
            tilt: 91.0,
            ..valid_input()
        };
        assert_eq!(fields_of(validate_input(&input).unwrap_err()), vec!["tilt"]);
    }

    #[test]
    fn test_register_rejects_orientation_400_and_360() {
        for orientation in [400.0, 360.0, -1.0] {
            let input = SiteInput {
                orientation,
                ..valid_input()
            };
            assert_eq!(
                fields_of(validate_input(&input).unwrap_err()),
                vec!["orientation"]
            );
        }
    }

    #[test]
    fn test_register_rejects_zero_and_negative_capacity() {
        let input = SiteInput {
            inverter_capacity_kw: 0.0,
            module_capacity_kw: -1.0,
            ..valid_input()
        };
        assert_eq!(
            fields_of(validate_input(&input).unwrap_err()),
            vec!["inverter_capacity_kw", "module_capacity_kw"]
        );
    }

    #[test]
    fn test_register_rejects_non_finite_values() {
        let input = SiteInput {
            latitude: f64::NAN,
            longitude: f64::INFINITY,
            ..valid_input()
        };
        assert_eq!(
            fields_of(validate_input(&input).unwrap_err()),
            vec!["latitude", "longitude"]
        );
    }

    #[test]
    fn test_invalid_register_touches_nothing() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let input = SiteInput {
            tilt: 91.0,
            ..valid_input()
        };

        assert!(registry.register(&grant_for(&store, "alice"), input).is_err());
        assert!(store.owned_site_uuids("alice").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_external_ids_are_distinct_sites() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);

        let a = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();
        let b = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();

        assert_ne!(a.site_uuid, b.site_uuid);
        assert_eq!(registry.list(&grant_for(&store, "alice")).unwrap().len(), 2);
    }

    #[test]
    fn test_list_and_get_are_isolated_between_callers() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let site_a = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();
        let site_b = registry
            .register(&grant_for(&store, "bob"), valid_input())
            .unwrap();

        let alice = grant_for(&store, "alice");
        let listed: Vec<Uuid> = registry
            .list(&alice)
            .unwrap()
            .into_iter()
            .map(|s| s.site_uuid)
            .collect();
        assert_eq!(listed, vec![site_a.site_uuid]);

        let err = registry.get(&alice, site_b.site_uuid).unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let missing = registry.get(&alice, Uuid::new_v4()).unwrap_err();
        assert_eq!(err.to_string(), missing.to_string());
    }

    #[test]
    fn test_list_is_in_creation_order() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        for _ in 0..3 {
            registry
                .register(&grant_for(&store, "alice"), valid_input())
                .unwrap();
        }

        let listed = registry.list(&grant_for(&store, "alice")).unwrap();
        assert_eq!(listed.len(), 3);
        for pair in listed.windows(2) {
            assert!(
                (pair[0].created_utc, pair[0].site_uuid) < (pair[1].created_utc, pair[1].site_uuid)
            );
        }
        assert_eq!(listed, registry.list(&grant_for(&store, "alice")).unwrap());
    }

    #[test]
    fn test_update_validates_and_applies() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let site = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();
        let alice = grant_for(&store, "alice");

        let bad = SiteChanges {
            tilt: Some(120.0),
            ..SiteChanges::default()
        };
        assert_eq!(
            fields_of(registry.update(&alice, site.site_uuid, bad).unwrap_err()),
            vec!["tilt"]
        );

        let good = SiteChanges {
            orientation: Some(100.0),
            ..SiteChanges::default()
        };
        let updated = registry.update(&alice, site.site_uuid, good).unwrap();
        assert_eq!(updated.orientation, 100.0);
        assert_eq!(updated.tilt, 35.0);
    }

    #[test]
    fn test_update_trims_text_like_register() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let site = registry
            .register(
                &grant_for(&store, "alice"),
                SiteInput {
                    client_site_name: "  roof  ".to_string(),
                    region: Some(" north ".to_string()),
                    ..valid_input()
                },
            )
            .unwrap();
        assert_eq!(site.client_site_name, "roof");
        assert_eq!(site.region.as_deref(), Some("north"));

        let changes = SiteChanges {
            client_site_id: Some("  42 ".to_string()),
            client_site_name: Some("\tbarn\n".to_string()),
            ..SiteChanges::default()
        };
        let updated = registry
            .update(&grant_for(&store, "alice"), site.site_uuid, changes)
            .unwrap();
        assert_eq!(updated.client_site_id, "42");
        assert_eq!(updated.client_site_name, "barn");
    }

    #[test]
    fn test_text_length_counts_characters() {
        let at_limit = SiteInput {
            client_site_name: "é".repeat(MAX_TEXT_LEN),
            ..valid_input()
        };
        assert!(validate_input(&at_limit).is_ok());

        let padded = SiteInput {
            client_site_name: format!("  {}  ", "a".repeat(MAX_TEXT_LEN)),
            ..valid_input()
        };
        assert!(validate_input(&padded).is_ok());

        let too_long = SiteInput {
            client_site_name: "é".repeat(MAX_TEXT_LEN + 1),
            ..valid_input()
        };
        assert_eq!(
            fields_of(validate_input(&too_long).unwrap_err()),
            vec!["client_site_name"]
        );
    }

    #[test]
    fn test_update_by_other_caller_is_not_found() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let site = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();

        let err = registry
            .update(&grant_for(&store, "bob"), site.site_uuid, SiteChanges::default())
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_retire_hides_site() {
        let store = MemoryStore::new();
        let registry = SiteRegistry::new(&store);
        let site = registry
            .register(&grant_for(&store, "alice"), valid_input())
            .unwrap();

        registry
            .retire(&grant_for(&store, "alice"), site.site_uuid)
            .unwrap();

        let alice = grant_for(&store, "alice");
        assert!(registry.list(&alice).unwrap().is_empty());
        assert_eq!(
            registry.get(&alice, site.site_uuid).unwrap_err().kind(),
            "not_found"
        );
    }
}
