use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use log::{debug, warn};
use rand::Rng;
use uuid::Uuid;

use crate::config::{CallPolicy, SuspectPolicy};
use crate::error::GatewayError;
use crate::models::{ApiStatus, Site, SiteChanges, SiteInput};
use crate::services::auth::{AccessGrant, IdentityProvider};
use crate::services::capacity::CapacityModel;
use crate::services::forecast_selector::{ClearskyEstimate, ForecastSelector, SiteForecast};
use crate::services::site_registry::SiteRegistry;
use crate::services::telemetry::{ActualsReceipt, PVActualReading, SiteActuals, TelemetryIngestor};
use crate::store::Store;

/// An authorized request: the resolved grant and the instant by which every
/// collaborator call must have finished.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub grant: AccessGrant,
    pub deadline: Instant,
}

/// Start of yesterday in UTC.
pub fn yesterday_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    (now - ChronoDuration::days(1))
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Entry point for every request. Owns the collaborators, runs blocking store
/// work off the reactor under the caller's deadline and retries idempotent
/// reads.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityProvider>,
    capacity: Arc<dyn CapacityModel>,
    suspect: SuspectPolicy,
    calls: CallPolicy,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        capacity: Arc<dyn CapacityModel>,
        suspect: SuspectPolicy,
        calls: CallPolicy,
    ) -> Self {
        Self {
            store,
            identity,
            capacity,
            suspect,
            calls,
        }
    }

    pub fn calls(&self) -> &CallPolicy {
        &self.calls
    }

    /// Verify the bearer token and resolve the caller's grant.
    pub async fn authorize(
        &self,
        token: &str,
        requested_timeout: Option<Duration>,
    ) -> Result<RequestContext, GatewayError> {
        let deadline = deadline_after(self.calls.effective_timeout(requested_timeout));

        let caller = tokio::time::timeout(remaining(deadline), self.identity.verify(token))
            .await
            .map_err(|_| GatewayError::Timeout("identity provider".to_string()))??;

        let subject = caller.subject.clone();
        let site_uuids = self
            .read(deadline, "site grant", move |store, _| {
                Ok(store.owned_site_uuids(&subject)?)
            })
            .await?;
        debug!(
            "Resolved grant for {} ({} sites)",
            caller.subject,
            site_uuids.len()
        );

        Ok(RequestContext {
            grant: AccessGrant::new(caller, site_uuids),
            deadline,
        })
    }

    pub async fn register_site(
        &self,
        ctx: &RequestContext,
        input: SiteInput,
    ) -> Result<Site, GatewayError> {
        let grant = ctx.grant.clone();
        self.write(ctx.deadline, "site registration", move |store, _| {
            SiteRegistry::new(store).register(&grant, input)
        })
        .await
    }

    pub async fn list_sites(&self, ctx: &RequestContext) -> Result<Vec<Site>, GatewayError> {
        let grant = ctx.grant.clone();
        self.read(ctx.deadline, "site list", move |store, _| {
            SiteRegistry::new(store).list(&grant)
        })
        .await
    }

    pub async fn get_site(
        &self,
        ctx: &RequestContext,
        site_uuid: Uuid,
    ) -> Result<Site, GatewayError> {
        let grant = ctx.grant.clone();
        self.read(ctx.deadline, "site", move |store, _| {
            SiteRegistry::new(store).get(&grant, site_uuid)
        })
        .await
    }

    pub async fn update_site(
        &self,
        ctx: &RequestContext,
        site_uuid: Uuid,
        changes: SiteChanges,
    ) -> Result<Site, GatewayError> {
        let grant = ctx.grant.clone();
        self.write(ctx.deadline, "site update", move |store, _| {
            SiteRegistry::new(store).update(&grant, site_uuid, changes)
        })
        .await
    }

    pub async fn retire_site(
        &self,
        ctx: &RequestContext,
        site_uuid: Uuid,
    ) -> Result<(), GatewayError> {
        let grant = ctx.grant.clone();
        self.write(ctx.deadline, "site retirement", move |store, _| {
            SiteRegistry::new(store).retire(&grant, site_uuid)
        })
        .await
    }

    pub async fn get_forecast(
        &self,
        ctx: &RequestContext,
        site_uuid: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<SiteForecast, GatewayError> {
        let grant = ctx.grant.clone();
        self.read(ctx.deadline, "forecast", move |store, capacity| {
            ForecastSelector::new(store, capacity).get_forecast(&grant, site_uuid, as_of)
        })
        .await
    }

    pub async fn get_forecasts(
        &self,
        ctx: &RequestContext,
        site_uuids: Vec<Uuid>,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<SiteForecast>, GatewayError> {
        let grant = ctx.grant.clone();
        self.read(ctx.deadline, "forecasts", move |store, capacity| {
            ForecastSelector::new(store, capacity).get_forecasts(&grant, &site_uuids, as_of)
        })
        .await
    }

    pub async fn clearsky_estimate(
        &self,
        ctx: &RequestContext,
        site_uuid: Uuid,
    ) -> Result<ClearskyEstimate, GatewayError> {
        let grant = ctx.grant.clone();
        let start = yesterday_midnight(Utc::now());
        self.read(ctx.deadline, "clearsky estimate", move |store, capacity| {
            ForecastSelector::new(store, capacity).clearsky_estimate(&grant, site_uuid, start)
        })
        .await
    }

    /// Ingest a batch. Runs once: a caller that retries relies on the upsert
    /// being idempotent.
    pub async fn submit_actuals(
        &self,
        ctx: &RequestContext,
        site_uuid: Uuid,
        readings: Vec<PVActualReading>,
    ) -> Result<ActualsReceipt, GatewayError> {
        let grant = ctx.grant.clone();
        let suspect = self.suspect;
        self.write(ctx.deadline, "telemetry upsert", move |store, capacity| {
            TelemetryIngestor::new(store, capacity, suspect).submit(&grant, site_uuid, &readings)
        })
        .await
    }

    pub async fn get_actuals(
        &self,
        ctx: &RequestContext,
        site_uuids: Vec<Uuid>,
    ) -> Result<Vec<SiteActuals>, GatewayError> {
        let grant = ctx.grant.clone();
        let suspect = self.suspect;
        let since = yesterday_midnight(Utc::now());
        self.read(ctx.deadline, "actuals", move |store, capacity| {
            TelemetryIngestor::new(store, capacity, suspect).get_actuals(&grant, &site_uuids, since)
        })
        .await
    }

    /// Latest platform status, or a default `ok` when none has been recorded.
    pub async fn api_status(&self) -> Result<ApiStatus, GatewayError> {
        let deadline = deadline_after(self.calls.default_timeout);
        let status = self
            .read(deadline, "api status", |store, _| Ok(store.latest_status()?))
            .await?;

        Ok(status.unwrap_or_else(|| ApiStatus {
            id: 0,
            status: "ok".to_string(),
            message: "The API is up and running".to_string(),
            created_utc: Utc::now(),
        }))
    }

    async fn run_blocking<T, F>(
        &self,
        deadline: Instant,
        what: &str,
        f: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(&dyn Store, &dyn CapacityModel) -> Result<T, GatewayError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let capacity = Arc::clone(&self.capacity);
        let task = tokio::task::spawn_blocking(move || f(store.as_ref(), capacity.as_ref()));

        match tokio::time::timeout(remaining(deadline), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(GatewayError::Internal(format!("{} task failed: {}", what, e))),
            Err(_) => Err(GatewayError::Timeout(what.to_string())),
        }
    }

    /// Idempotent read: retried on `Unavailable` with exponential backoff
    /// while the deadline allows.
    async fn read<T, F>(&self, deadline: Instant, what: &str, f: F) -> Result<T, GatewayError>
    where
        F: Fn(&dyn Store, &dyn CapacityModel) -> Result<T, GatewayError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 0;
        loop {
            let call = Arc::clone(&f);
            match self
                .run_blocking(deadline, what, move |store, capacity| call(store, capacity))
                .await
            {
                Err(e) if e.is_retryable() && attempt < self.calls.read_retries => {
                    let delay = self.backoff(attempt);
                    if remaining(deadline) <= delay {
                        return Err(GatewayError::Timeout(what.to_string()));
                    }
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        what, e, attempt, self.calls.read_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn write<T, F>(&self, deadline: Instant, what: &str, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&dyn Store, &dyn CapacityModel) -> Result<T, GatewayError> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(deadline, what, f).await
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.calls.retry_backoff.saturating_mul(1 << attempt.min(16));
        let jitter_ms = (self.calls.retry_backoff.as_millis() as u64 / 2).max(1);
        base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(CallPolicy::TIMEOUT_LIMIT)
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
