//! Subscription entity and lifecycle.
//!
//! A [`Subscription`] pairs a persisted [`SubscriptionRecord`] with the account that owns it.
//! Its state is never stored: trial, grace period and validity are recomputed from `ends_at`
//! and `trial_ends_at` against the clock on every call.
//!
//! # States
//!
//! | status        | condition                                                 |
//! |---------------|-----------------------------------------------------------|
//! | `GracePeriod` | `ends_at` is in the future                                |
//! | `Trial`       | otherwise, `trial_ends_at` is after the start of today    |
//! | `Ended`       | otherwise, `ends_at` is set                               |
//! | `Active`      | otherwise                                                 |
//!
//! `cancel` moves to `GracePeriod`, `cancel_now` to `Ended` (or `Trial` while the trial
//! lasts), `resume` and `swap` back to `Active` or `Trial`.
//!
//! Mutating operations call the gateway first and touch the local record only after it
//! succeeds, so a refused remote change never leaks into local state.

use std::{fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    account::{BillableAccount, OwnerLookup},
    clock::{Clock, SystemClock},
    config::SubscriptionSchema,
    error::{PaymentError, Result},
    gateway::{GatewaySubscription, GatewaySubscriptionProxy, SimulationOutcome},
    store::{SubscriptionRow, SubscriptionStore},
};

/// Projection of the derived subscription state at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    /// Before `trial_ends_at`.
    Trial,
    /// Not scheduled to end.
    Active,
    /// Cancelled, usable until `ends_at`.
    GracePeriod,
    /// Cancelled and past `ends_at`.
    Ended,
}

impl SubscriptionStatus {
    /// Returns true for every state in which the subscription is usable.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Ended)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::GracePeriod => "grace_period",
            Self::Ended => "ended",
        })
    }
}

/// Persisted subscription fields.
///
/// `trial_ends_at` is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    id: Option<i64>,
    owner_id: i64,
    name: String,
    remote_id: Option<String>,
    plan: Option<String>,
    trial_ends_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Creates an unsaved record.
    #[must_use]
    pub fn new(owner_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id,
            name: name.into(),
            remote_id: None,
            plan: None,
            trial_ends_at: None,
            ends_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the remote subscription id.
    #[must_use]
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Sets the plan identifier.
    #[must_use]
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    /// Sets the end of the trial.
    #[must_use]
    pub fn with_trial_ends_at(mut self, trial_ends_at: DateTime<Utc>) -> Self {
        self.trial_ends_at = Some(trial_ends_at);
        self
    }

    /// Sets the scheduled end.
    #[must_use]
    pub fn with_ends_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    /// Local primary key.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Owning account id.
    #[must_use]
    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }

    /// Subscription name, e.g. `main`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote subscription id.
    #[must_use]
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    /// Plan identifier mirrored from the gateway.
    #[must_use]
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    /// End of the trial.
    #[must_use]
    pub fn trial_ends_at(&self) -> Option<DateTime<Utc>> {
        self.trial_ends_at
    }

    /// Scheduled or past end; `None` if not cancelled.
    #[must_use]
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    /// Insert time.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Last write time.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Flattens the record using the configured column names.
    #[must_use]
    pub fn to_row(&self, schema: &SubscriptionSchema) -> SubscriptionRow {
        let mut row = SubscriptionRow::new(schema.table.clone());
        row.id = self.id;
        row.set(schema.owner_foreign_key.clone(), Value::from(self.owner_id));
        row.set("name", Value::String(self.name.clone()));
        row.set(schema.remote_id_column.clone(), optional_string(self.remote_id.as_deref()));
        row.set(schema.plan_column.clone(), optional_string(self.plan.as_deref()));
        row.set("trial_ends_at", timestamp(self.trial_ends_at));
        row.set("ends_at", timestamp(self.ends_at));
        row.set("created_at", timestamp(self.created_at));
        row.set("updated_at", timestamp(self.updated_at));
        row
    }

    /// Rebuilds a record from a stored row.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Store`] if the row belongs to another table or a column holds
    /// a value of the wrong type.
    pub fn from_row(row: &SubscriptionRow, schema: &SubscriptionSchema) -> Result<Self> {
        if row.table != schema.table {
            return Err(PaymentError::Store(format!(
                "row from table '{}' is not a subscription of '{}'",
                row.table, schema.table
            )));
        }

        Ok(Self {
            id: row.id,
            owner_id: column(row, &schema.owner_foreign_key)?,
            name: column(row, "name")?,
            remote_id: column(row, &schema.remote_id_column)?,
            plan: column(row, &schema.plan_column)?,
            trial_ends_at: column(row, "trial_ends_at")?,
            ends_at: column(row, "ends_at")?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }
}

fn optional_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_owned()))
}

fn timestamp(value: Option<DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, |t| Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
}

fn column<T: DeserializeOwned>(row: &SubscriptionRow, name: &str) -> Result<T> {
    let value = row.get(name).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| PaymentError::Store(format!("column '{name}' has an unexpected value: {e}")))
}

/// Attribute changes applied by [`Subscription::fill`].
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    remote_id: Option<String>,
    plan: Option<String>,
    ends_at: Option<Option<DateTime<Utc>>>,
}

impl SubscriptionChanges {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote subscription id.
    #[must_use]
    pub fn remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Sets the plan identifier.
    #[must_use]
    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    /// Sets `ends_at`; `None` clears it.
    #[must_use]
    pub fn ends_at(mut self, ends_at: Option<DateTime<Utc>>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }
}

/// A subscription bound to its owner, store and clock.
///
/// Holds at most one resolved gateway resource. Mutating operations always resolve a fresh
/// resource and replace it; [`as_gateway_subscription`](Self::as_gateway_subscription) with
/// `use_cache` reuses it.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # {
/// use std::sync::Arc;
///
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use gu_payment::{
///     Subscription, SubscriptionRecord, SubscriptionSchema, SubscriptionStatus,
///     clock::{Clock, FixedClock},
///     store::InMemoryStore,
///     testing::{MockAccount, MockGatewaySubscription},
/// };
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
/// let account = MockAccount::new().with_remote(MockGatewaySubscription::default());
/// let record = SubscriptionRecord::new(1, "main")
///     .with_remote_id("SUB1")
///     .with_trial_ends_at(clock.now() + TimeDelta::days(7));
///
/// let mut subscription = Subscription::new(
///     record,
///     Arc::new(account),
///     Arc::new(InMemoryStore::new()),
///     Arc::new(SubscriptionSchema::default()),
/// )
/// .with_clock(Arc::new(clock.clone()));
///
/// subscription.cancel().await.unwrap();
/// assert_eq!(subscription.status(), SubscriptionStatus::GracePeriod);
/// # });
/// # }
/// ```
pub struct Subscription<A: BillableAccount, S> {
    record: SubscriptionRecord,
    schema: Arc<SubscriptionSchema>,
    owner: Arc<A>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    cached: Option<A::Subscription>,
}

impl<A: BillableAccount, S> fmt::Debug for Subscription<A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("record", &self.record)
            .field("table", &self.schema.table)
            .field("clock", &self.clock)
            .field("cached", &self.cached.is_some())
            .finish_non_exhaustive()
    }
}

impl<A, S> Subscription<A, S>
where
    A: BillableAccount,
    S: SubscriptionStore,
{
    /// Binds `record` to its owner and store, using the system clock.
    #[must_use]
    pub fn new(
        record: SubscriptionRecord,
        owner: Arc<A>,
        store: Arc<S>,
        schema: Arc<SubscriptionSchema>,
    ) -> Self {
        Self { record, schema, owner, store, clock: Arc::new(SystemClock), cached: None }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persisted fields.
    #[must_use]
    pub fn record(&self) -> &SubscriptionRecord {
        &self.record
    }

    /// Owning account.
    #[must_use]
    pub fn owner(&self) -> &Arc<A> {
        &self.owner
    }

    /// Column mapping in use.
    #[must_use]
    pub fn schema(&self) -> &SubscriptionSchema {
        &self.schema
    }

    /// Returns true if the subscription is active, on trial, or within its grace period.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.active() || self.on_trial() || self.on_grace_period()
    }

    /// Returns true if the subscription is not scheduled to end, or has not ended yet.
    #[must_use]
    pub fn active(&self) -> bool {
        self.record.ends_at.is_none() || self.on_grace_period()
    }

    /// Returns true once an end has been scheduled, even if it is in the future.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.record.ends_at.is_some()
    }

    /// Returns true if the trial ends after the start of today.
    #[must_use]
    pub fn on_trial(&self) -> bool {
        self.record
            .trial_ends_at
            .is_some_and(|trial_ends_at| self.clock.start_of_today() < trial_ends_at)
    }

    /// Returns true if the subscription is cancelled but `ends_at` has not passed.
    #[must_use]
    pub fn on_grace_period(&self) -> bool {
        self.record.ends_at.is_some_and(|ends_at| self.clock.now() < ends_at)
    }

    /// Current derived state.
    ///
    /// `status().is_valid()` always agrees with [`valid`](Self::valid).
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        if self.on_grace_period() {
            SubscriptionStatus::GracePeriod
        } else if self.on_trial() {
            SubscriptionStatus::Trial
        } else if self.cancelled() {
            SubscriptionStatus::Ended
        } else {
            SubscriptionStatus::Active
        }
    }

    /// Reads a persisted attribute by column name, using the configured schema.
    ///
    /// `id` returns the primary key. Unknown columns return `None`.
    #[must_use]
    pub fn attribute(&self, column: &str) -> Option<Value> {
        if column == "id" {
            return self.record.id.map(Value::from);
        }
        self.record.to_row(&self.schema).columns.remove(column)
    }

    /// Describes how to load the owning account.
    ///
    /// Trashed owners are included when the account type soft-deletes.
    #[must_use]
    pub fn owner_lookup(&self) -> OwnerLookup {
        OwnerLookup::new(&self.schema, self.record.owner_id, A::SOFT_DELETES)
    }

    /// Applies attribute changes in memory.
    pub fn fill(&mut self, changes: SubscriptionChanges) -> &mut Self {
        if let Some(remote_id) = changes.remote_id {
            self.record.remote_id = Some(remote_id);
        }
        if let Some(plan) = changes.plan {
            self.record.plan = Some(plan);
        }
        if let Some(ends_at) = changes.ends_at {
            self.record.ends_at = ends_at;
        }
        self
    }

    /// Writes the record to the store, stamping `created_at` and `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Store`] if the store rejects the write.
    #[instrument(skip(self), fields(table = %self.schema.table, subscription_id = ?self.record.id))]
    pub async fn save(&mut self) -> Result<()> {
        let now = self.clock.now();
        if self.record.created_at.is_none() {
            self.record.created_at = Some(now);
        }
        self.record.updated_at = Some(now);

        let id = self.store.save(&self.record.to_row(&self.schema)).await?;
        self.record.id = Some(id);
        debug!(id, "subscription record saved");
        Ok(())
    }

    /// Replaces the held gateway resource.
    pub fn set_cached_gateway_subscription(&mut self, resource: A::Subscription) {
        self.cached = Some(resource);
    }

    /// Drops the held gateway resource, returning it.
    pub fn clear_cached_gateway_subscription(&mut self) -> Option<A::Subscription> {
        self.cached.take()
    }

    /// Held gateway resource, if any.
    #[must_use]
    pub fn cached_gateway_subscription(&self) -> Option<&A::Subscription> {
        self.cached.as_ref()
    }

    /// Returns the gateway resource for this subscription.
    ///
    /// With `use_cache` and a held resource, returns it without a remote call. Otherwise
    /// resolves it through the owner and holds the result. On failure the previously held
    /// resource is kept.
    ///
    /// # Errors
    ///
    /// Returns whatever the owner raises while resolving, e.g. for a missing remote id.
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn as_gateway_subscription(&mut self, use_cache: bool) -> Result<&mut A::Subscription> {
        match self.cached.take() {
            Some(resource) if use_cache => {
                debug!("using held gateway subscription");
                Ok(self.cached.insert(resource))
            }
            previous => match self.owner.gateway_subscription(self.record.remote_id.as_deref()).await {
                Ok(resource) => Ok(self.cached.insert(resource)),
                Err(e) => {
                    self.cached = previous;
                    Err(e)
                }
            },
        }
    }

    /// Asks the gateway what a change to `plan` would cost, without applying it.
    ///
    /// Never fails: an unresolvable resource is reported as
    /// [`SimulationOutcome::Unavailable`].
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn swap_plan_simulation(&mut self, plan: Option<&str>) -> SimulationOutcome {
        let owner = Arc::clone(&self.owner);
        let resource = match self.as_gateway_subscription(false).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!(error = %e, "cannot resolve gateway subscription for simulation");
                return SimulationOutcome::Unavailable(e.to_string());
            }
        };

        GatewaySubscriptionProxy::new(resource, owner.gateway_transport())
            .change_plan_simulation(plan)
            .await
    }

    /// Moves the subscription to `plan` and clears any scheduled end.
    ///
    /// With `skip_charge` the new plan is staged and saved on the gateway without billing;
    /// otherwise the gateway's plan change is used, which may bill immediately.
    ///
    /// # Errors
    ///
    /// Returns the gateway error before any local change, or [`PaymentError::Store`] if the
    /// record cannot be saved afterwards.
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn swap(&mut self, plan: &str, skip_charge: bool) -> Result<&mut Self> {
        let resource = self.as_gateway_subscription(false).await?;
        if skip_charge {
            resource.set_plan_identifier(plan);
            resource.set_skip_charge(true);
            resource.save().await?;
        } else {
            resource.change_plan(plan).await?;
        }
        info!(plan, skip_charge, "gateway plan changed");

        self.fill(SubscriptionChanges::new().plan(plan).ends_at(None));
        self.persist_after_remote("swap").await?;
        Ok(self)
    }

    /// Suspends the gateway subscription at the end of the current period.
    ///
    /// On trial, `ends_at` becomes `trial_ends_at`. Otherwise it is the gateway's period end
    /// date at the current time of day, or now if the gateway reports none.
    ///
    /// # Errors
    ///
    /// Returns the gateway error before any local change, or [`PaymentError::Store`] if the
    /// record cannot be saved afterwards.
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn cancel(&mut self) -> Result<&mut Self> {
        let resource = self.as_gateway_subscription(false).await?;
        resource.suspend().await?;
        let expires_at = resource.expires_at();

        let ends_at = match self.record.trial_ends_at {
            Some(trial_ends_at) if self.on_trial() => trial_ends_at,
            _ => {
                let now = self.clock.now();
                expires_at.map_or(now, |date| date.and_time(now.time()).and_utc())
            }
        };
        info!(%ends_at, "subscription cancelled");

        self.fill(SubscriptionChanges::new().ends_at(Some(ends_at)));
        self.persist_after_remote("cancel").await?;
        Ok(self)
    }

    /// Suspends the gateway subscription and ends it immediately.
    ///
    /// # Errors
    ///
    /// Returns the gateway error before any local change, or [`PaymentError::Store`] if the
    /// record cannot be saved afterwards.
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn cancel_now(&mut self) -> Result<&mut Self> {
        self.as_gateway_subscription(false).await?.suspend().await?;
        info!("subscription cancelled immediately");

        let now = self.clock.now();
        self.fill(SubscriptionChanges::new().ends_at(Some(now)));
        self.persist_after_remote("cancel_now").await?;
        Ok(self)
    }

    /// Ends the subscription now without contacting the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Store`] if the record cannot be saved.
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn mark_as_cancelled(&mut self) -> Result<()> {
        let now = self.clock.now();
        info!(ends_at = %now, "subscription marked as cancelled");
        self.fill(SubscriptionChanges::new().ends_at(Some(now))).save().await
    }

    /// Reactivates the gateway subscription and clears the scheduled end.
    ///
    /// # Errors
    ///
    /// Returns the gateway error before any local change, or [`PaymentError::Store`] if the
    /// record cannot be saved afterwards.
    #[instrument(skip(self), fields(subscription_id = ?self.record.id))]
    pub async fn resume(&mut self) -> Result<&mut Self> {
        self.as_gateway_subscription(false).await?.activate().await?;
        info!("subscription resumed");

        self.fill(SubscriptionChanges::new().ends_at(None));
        self.persist_after_remote("resume").await?;
        Ok(self)
    }

    async fn persist_after_remote(&mut self, operation: &'static str) -> Result<()> {
        self.save().await.inspect_err(|e| {
            warn!(operation, error = %e, "gateway changed but local record was not saved");
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::{
        clock::FixedClock,
        invoice::InvoiceOptions,
        store::InMemoryStore,
        testing::{MockAccount, MockGatewaySubscription, MockTransport},
    };

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 15, 30, 0).unwrap())
    }

    fn subscription(
        record: SubscriptionRecord,
        clock: &FixedClock,
    ) -> Subscription<MockAccount, InMemoryStore> {
        let account = MockAccount::new().with_remote(MockGatewaySubscription::default());
        Subscription::new(
            record,
            Arc::new(account),
            Arc::new(InMemoryStore::new()),
            Arc::new(SubscriptionSchema::default()),
        )
        .with_clock(Arc::new(clock.clone()))
    }

    #[test]
    fn test_fresh_subscription_is_active() {
        let clock = clock();
        let sub = subscription(SubscriptionRecord::new(1, "main"), &clock);

        assert!(sub.active());
        assert!(!sub.cancelled());
        assert!(!sub.on_trial());
        assert!(!sub.on_grace_period());
        assert!(sub.valid());
        assert_eq!(sub.status(), SubscriptionStatus::Active);
    }

    #[test]
    fn test_trial_compares_against_start_of_today() {
        let clock = clock();
        // Ended earlier today: still counts as on trial for the rest of the day
        let earlier_today = Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap();
        let sub = subscription(
            SubscriptionRecord::new(1, "main").with_trial_ends_at(earlier_today),
            &clock,
        );
        assert!(sub.on_trial());

        let midnight = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
        let sub =
            subscription(SubscriptionRecord::new(1, "main").with_trial_ends_at(midnight), &clock);
        assert!(!sub.on_trial());
    }

    #[test]
    fn test_grace_period_boundary() {
        let clock = clock();
        let ends_at = clock.now() + TimeDelta::seconds(1);
        let sub = subscription(SubscriptionRecord::new(1, "main").with_ends_at(ends_at), &clock);

        assert!(sub.on_grace_period());
        assert_eq!(sub.status(), SubscriptionStatus::GracePeriod);

        clock.set(ends_at);
        assert!(!sub.on_grace_period());
        assert!(!sub.active());
        assert!(!sub.valid());
        assert_eq!(sub.status(), SubscriptionStatus::Ended);
    }

    #[test]
    fn test_ended_but_on_trial_is_valid() {
        let clock = clock();
        let record = SubscriptionRecord::new(1, "main")
            .with_trial_ends_at(clock.now() + TimeDelta::days(3))
            .with_ends_at(clock.now() - TimeDelta::hours(1));
        let sub = subscription(record, &clock);

        assert!(!sub.active());
        assert!(sub.valid());
        assert_eq!(sub.status(), SubscriptionStatus::Trial);
    }

    #[test]
    fn test_attribute_uses_configured_columns() {
        let clock = clock();
        let record = SubscriptionRecord::new(9, "main").with_remote_id("SUB1").with_plan("gold");
        let account = MockAccount::new();
        let schema = SubscriptionSchema {
            remote_id_column: "gateway_id".to_owned(),
            plan_column: "gateway_plan".to_owned(),
            owner_foreign_key: "account_id".to_owned(),
            ..SubscriptionSchema::default()
        };
        let sub = Subscription::new(
            record,
            Arc::new(account),
            Arc::new(InMemoryStore::new()),
            Arc::new(schema),
        )
        .with_clock(Arc::new(clock));

        assert_eq!(sub.attribute("gateway_id"), Some(Value::from("SUB1")));
        assert_eq!(sub.attribute("gateway_plan"), Some(Value::from("gold")));
        assert_eq!(sub.attribute("account_id"), Some(Value::from(9)));
        assert_eq!(sub.attribute("ends_at"), Some(Value::Null));
        assert_eq!(sub.attribute("iugu_id"), None);
        assert_eq!(sub.attribute("id"), None);
    }

    #[test]
    fn test_row_round_trip_preserves_timestamps() {
        let schema = SubscriptionSchema::default();
        let mut record = SubscriptionRecord::new(3, "main")
            .with_remote_id("SUB1")
            .with_trial_ends_at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
            .with_ends_at(Utc.timestamp_opt(1_717_243_200, 123_456_789).unwrap());
        record.id = Some(5);

        let restored = SubscriptionRecord::from_row(&record.to_row(&schema), &schema).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_from_row_rejects_other_table() {
        let schema = SubscriptionSchema::default();
        let row = SubscriptionRow::new("invoices");
        let err = SubscriptionRecord::from_row(&row, &schema).unwrap_err();
        assert!(matches!(err, PaymentError::Store(_)));
    }

    #[test]
    fn test_from_row_rejects_bad_column() {
        let schema = SubscriptionSchema::default();
        let mut row = SubscriptionRecord::new(1, "main").to_row(&schema);
        row.set("ends_at", Value::from(42));

        let err = SubscriptionRecord::from_row(&row, &schema).unwrap_err();
        assert!(err.to_string().contains("ends_at"));
    }

    #[test]
    fn test_fill_leaves_unset_fields() {
        let clock = clock();
        let ends_at = clock.now();
        let mut sub = subscription(
            SubscriptionRecord::new(1, "main").with_plan("gold").with_ends_at(ends_at),
            &clock,
        );

        sub.fill(SubscriptionChanges::new().remote_id("SUB2"));

        assert_eq!(sub.record().remote_id(), Some("SUB2"));
        assert_eq!(sub.record().plan(), Some("gold"));
        assert_eq!(sub.record().ends_at(), Some(ends_at));
    }

    #[tokio::test]
    async fn test_save_stamps_timestamps() {
        let clock = clock();
        let mut sub = subscription(SubscriptionRecord::new(1, "main"), &clock);

        sub.save().await.unwrap();
        let created = sub.record().created_at();
        assert_eq!(created, Some(clock.now()));
        assert_eq!(sub.record().id(), Some(1));

        clock.advance(TimeDelta::minutes(5));
        sub.save().await.unwrap();
        assert_eq!(sub.record().created_at(), created);
        assert_eq!(sub.record().updated_at(), Some(clock.now()));
        assert_eq!(sub.record().id(), Some(1));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let clock = clock();
        let mut sub =
            subscription(SubscriptionRecord::new(1, "main").with_remote_id("SUB1"), &clock);
        let ledger = sub.owner().ledger().clone();

        sub.as_gateway_subscription(true).await.unwrap();
        sub.as_gateway_subscription(true).await.unwrap();

        assert_eq!(ledger.calls().len(), 1);
        assert!(sub.cached_gateway_subscription().is_some());
    }

    #[tokio::test]
    async fn test_injected_resource_used_with_cache() {
        let clock = clock();
        let mut sub =
            subscription(SubscriptionRecord::new(1, "main").with_remote_id("SUB1"), &clock);
        let ledger = sub.owner().ledger().clone();

        sub.set_cached_gateway_subscription(
            MockGatewaySubscription::new(ledger.clone()).with_id("INJECTED"),
        );
        let resource = sub.as_gateway_subscription(true).await.unwrap();

        assert_eq!(resource.id(), Some("INJECTED"));
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_without_cache_always_fetches() {
        let clock = clock();
        let mut sub =
            subscription(SubscriptionRecord::new(1, "main").with_remote_id("SUB1"), &clock);
        let ledger = sub.owner().ledger().clone();
        sub.set_cached_gateway_subscription(MockGatewaySubscription::default().with_id("OLD"));

        let resource = sub.as_gateway_subscription(false).await.unwrap();

        assert_eq!(resource.id(), Some("SUB1"));
        assert_eq!(ledger.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_held_resource() {
        let clock = clock();
        let account = MockAccount::new().failing_fetch("gateway down");
        let mut sub = Subscription::new(
            SubscriptionRecord::new(1, "main").with_remote_id("SUB1"),
            Arc::new(account),
            Arc::new(InMemoryStore::new()),
            Arc::new(SubscriptionSchema::default()),
        )
        .with_clock(Arc::new(clock));
        sub.set_cached_gateway_subscription(MockGatewaySubscription::default().with_id("OLD"));

        assert!(sub.as_gateway_subscription(false).await.is_err());
        assert_eq!(sub.cached_gateway_subscription().and_then(MockGatewaySubscription::id), Some("OLD"));
    }

    #[tokio::test]
    async fn test_clear_cache_forces_fetch() {
        let clock = clock();
        let mut sub =
            subscription(SubscriptionRecord::new(1, "main").with_remote_id("SUB1"), &clock);
        let ledger = sub.owner().ledger().clone();

        sub.as_gateway_subscription(true).await.unwrap();
        assert!(sub.clear_cached_gateway_subscription().is_some());
        sub.as_gateway_subscription(true).await.unwrap();

        assert_eq!(ledger.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_simulation_unresolvable_resource() {
        let clock = clock();
        let mut sub = subscription(SubscriptionRecord::new(1, "main"), &clock);

        let outcome = sub.swap_plan_simulation(Some("gold")).await;

        assert!(matches!(outcome, SimulationOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_mark_as_cancelled_is_local_only() {
        let clock = clock();
        let mut sub =
            subscription(SubscriptionRecord::new(1, "main").with_remote_id("SUB1"), &clock);
        let ledger = sub.owner().ledger().clone();

        sub.mark_as_cancelled().await.unwrap();

        assert_eq!(sub.record().ends_at(), Some(clock.now()));
        assert!(ledger.calls().is_empty());
        assert!(sub.record().id().is_some());
        assert_eq!(sub.status(), SubscriptionStatus::Ended);
    }

    #[derive(Debug)]
    struct TrashableAccount(MockAccount);

    impl BillableAccount for TrashableAccount {
        type Invoice = Value;
        type Subscription = MockGatewaySubscription;
        type Transport = MockTransport;

        const SOFT_DELETES: bool = true;

        fn remote_customer_id(&self) -> Option<&str> {
            self.0.remote_customer_id()
        }

        fn gateway_transport(&self) -> &Self::Transport {
            self.0.gateway_transport()
        }

        async fn gateway_subscription(
            &self,
            remote_id: Option<&str>,
        ) -> Result<Self::Subscription> {
            self.0.gateway_subscription(remote_id).await
        }

        async fn create_remote_invoice(&self, options: InvoiceOptions) -> Result<Self::Invoice> {
            self.0.create_remote_invoice(options).await
        }
    }

    #[test]
    fn test_owner_lookup_follows_soft_delete_capability() {
        let clock = clock();
        let plain = subscription(SubscriptionRecord::new(4, "main"), &clock);
        assert!(!plain.owner_lookup().with_trashed);

        let trashable: Subscription<TrashableAccount, InMemoryStore> = Subscription::new(
            SubscriptionRecord::new(4, "main"),
            Arc::new(TrashableAccount(MockAccount::new())),
            Arc::new(InMemoryStore::new()),
            Arc::new(SubscriptionSchema::default()),
        );
        let lookup = trashable.owner_lookup();
        assert!(lookup.with_trashed);
        assert_eq!(lookup.owner_id, 4);
        assert_eq!(lookup.foreign_key, "user_id");
        assert_eq!(lookup.model, "User");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SubscriptionStatus::GracePeriod.to_string(), "grace_period");
        assert!(!SubscriptionStatus::Ended.is_valid());
        assert!(SubscriptionStatus::Trial.is_valid());
    }
}
