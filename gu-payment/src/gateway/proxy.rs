//! Forwarding wrapper around a remote subscription resource.

use std::fmt;

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{GatewayResponse, GatewaySubscription, GatewayTransport, HttpMethod};
use crate::error::Result;

/// Path suffix of the plan-change simulation endpoint.
const SIMULATION_SEGMENT: &str = "change_plan_simulation";

/// Why a simulation was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotApplicableReason {
    /// The resource has not been created on the gateway.
    UnsavedResource,
    /// No plan identifier was given.
    MissingPlan,
}

impl fmt::Display for NotApplicableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsavedResource => f.write_str("resource has not been saved"),
            Self::MissingPlan => f.write_str("plan identifier is missing"),
        }
    }
}

/// Result of a plan-change simulation.
///
/// Simulation never fails with an error. Callers that only care whether a simulation is
/// available use [`simulation`](Self::simulation), which collapses every other variant to
/// `None`; the variants keep the cause for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutcome {
    /// The gateway simulated the change.
    Simulated(GatewayResponse),
    /// The simulation was not attempted.
    NotApplicable(NotApplicableReason),
    /// The gateway answered with an `errors` payload.
    Rejected(serde_json::Value),
    /// The request could not be completed.
    Unavailable(String),
}

impl SimulationOutcome {
    /// Returns the simulation, discarding the reason it is missing.
    #[must_use]
    pub fn simulation(self) -> Option<GatewayResponse> {
        match self {
            Self::Simulated(response) => Some(response),
            _ => None,
        }
    }

    /// Returns a reference to the simulation if there is one.
    #[must_use]
    pub fn as_simulation(&self) -> Option<&GatewayResponse> {
        match self {
            Self::Simulated(response) => Some(response),
            _ => None,
        }
    }

    /// Returns true if the gateway produced a simulation.
    #[must_use]
    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }
}

/// A remote subscription resource paired with the transport that reaches it.
///
/// The proxy implements [`GatewaySubscription`] by delegating every call to the wrapped
/// resource, so it can stand in wherever the resource is expected, and adds
/// [`change_plan_simulation`](Self::change_plan_simulation).
pub struct GatewaySubscriptionProxy<'a, G, T> {
    subscription: &'a mut G,
    transport: &'a T,
}

impl<G, T> fmt::Debug for GatewaySubscriptionProxy<'_, G, T>
where
    G: GatewaySubscription,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySubscriptionProxy")
            .field("url", &self.subscription.url())
            .field("is_new", &self.subscription.is_new())
            .finish_non_exhaustive()
    }
}

impl<'a, G, T> GatewaySubscriptionProxy<'a, G, T>
where
    G: GatewaySubscription,
    T: GatewayTransport,
{
    /// Wraps `subscription`, issuing extra requests through `transport`.
    #[must_use]
    pub fn new(subscription: &'a mut G, transport: &'a T) -> Self {
        Self { subscription, transport }
    }

    /// Returns the wrapped resource.
    #[must_use]
    pub fn inner(&self) -> &G {
        self.subscription
    }

    /// Returns the wrapped resource mutably.
    pub fn inner_mut(&mut self) -> &mut G {
        self.subscription
    }

    /// Simulates a change to `plan` without applying it.
    ///
    /// Issues `GET {resource url}/change_plan_simulation/{plan}`. Returns
    /// [`SimulationOutcome::NotApplicable`] for an unsaved resource or an empty plan, and
    /// never returns an error: rejected payloads and transport failures become
    /// [`SimulationOutcome::Rejected`] and [`SimulationOutcome::Unavailable`].
    #[instrument(skip(self), fields(resource = %self.subscription.url()))]
    pub async fn change_plan_simulation(&self, plan: Option<&str>) -> SimulationOutcome {
        if self.subscription.is_new() {
            debug!("simulation skipped for unsaved resource");
            return SimulationOutcome::NotApplicable(NotApplicableReason::UnsavedResource);
        }

        let Some(plan) = plan.filter(|plan| !plan.is_empty()) else {
            debug!("simulation skipped without plan");
            return SimulationOutcome::NotApplicable(NotApplicableReason::MissingPlan);
        };

        let url = match self.simulation_url(plan) {
            Ok(url) => url,
            Err(reason) => {
                warn!(%reason, "cannot build simulation url");
                return SimulationOutcome::Unavailable(reason);
            }
        };

        match self.transport.request(HttpMethod::Get, url.as_str()).await {
            Ok(response) => match response.errors() {
                Some(errors) => {
                    warn!(%errors, "gateway rejected plan change simulation");
                    SimulationOutcome::Rejected(errors.clone())
                }
                None => SimulationOutcome::Simulated(response),
            },
            Err(e) => {
                warn!(error = %e, "plan change simulation request failed");
                SimulationOutcome::Unavailable(e.to_string())
            }
        }
    }

    /// Rebuilds a resource of the wrapped type from a raw response.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Serialization`](crate::PaymentError::Serialization) if the body
    /// does not describe a `G`.
    pub fn create_from_response(&self, response: &GatewayResponse) -> Result<G>
    where
        G: DeserializeOwned,
    {
        response.deserialize()
    }

    fn simulation_url(&self, plan: &str) -> std::result::Result<Url, String> {
        let base = self.subscription.url();
        let mut url = Url::parse(&base).map_err(|e| format!("invalid resource url '{base}': {e}"))?;
        url.path_segments_mut()
            .map_err(|()| format!("resource url cannot take a path: {base}"))?
            .pop_if_empty()
            .push(SIMULATION_SEGMENT)
            .push(plan);
        Ok(url)
    }
}

impl<G, T> GatewaySubscription for GatewaySubscriptionProxy<'_, G, T>
where
    G: GatewaySubscription,
    T: GatewayTransport,
{
    fn url(&self) -> String {
        self.subscription.url()
    }

    fn is_new(&self) -> bool {
        self.subscription.is_new()
    }

    fn plan_identifier(&self) -> Option<&str> {
        self.subscription.plan_identifier()
    }

    fn set_plan_identifier(&mut self, plan: &str) {
        self.subscription.set_plan_identifier(plan);
    }

    fn set_skip_charge(&mut self, skip: bool) {
        self.subscription.set_skip_charge(skip);
    }

    fn expires_at(&self) -> Option<NaiveDate> {
        self.subscription.expires_at()
    }

    fn change_plan(&mut self, plan: &str) -> impl Future<Output = Result<()>> + Send {
        self.subscription.change_plan(plan)
    }

    fn suspend(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.subscription.suspend()
    }

    fn activate(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.subscription.activate()
    }

    fn save(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.subscription.save()
    }
}
