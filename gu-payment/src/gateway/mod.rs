//! Remote gateway abstraction.
//!
//! The gateway is the authority for plan, billing cycle and suspension state. This module
//! defines the two capabilities the subscription lifecycle consumes:
//!
//! - [`GatewaySubscription`]: a remote subscription resource with its lifecycle operations
//! - [`GatewayTransport`]: raw requests against the gateway API, used for read-only queries
//!   such as plan-change simulation
//!
//! [`GatewaySubscriptionProxy`] wraps a resource, forwards the whole capability, and adds the
//! plan-change simulation. [`iugu`] provides an HTTP implementation of both traits.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::error::Result;

pub mod iugu;
pub mod proxy;

pub use proxy::{GatewaySubscriptionProxy, NotApplicableReason, SimulationOutcome};

/// HTTP method of a raw gateway request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
}

impl HttpMethod {
    /// Returns the method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded body of a gateway response.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    body: serde_json::Value,
}

impl GatewayResponse {
    /// Wraps a decoded JSON body.
    #[must_use]
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }

    /// Decodes a raw body.
    ///
    /// An empty body decodes to `null`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Serialization`](crate::PaymentError::Serialization) if the bytes
    /// are not JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(serde_json::Value::Null));
        }
        Ok(Self::new(serde_json::from_slice(bytes)?))
    }

    /// Returns the `errors` field when the gateway reported one.
    ///
    /// A `null` field is treated as absent.
    #[must_use]
    pub fn errors(&self) -> Option<&serde_json::Value> {
        self.body.get("errors").filter(|errors| !errors.is_null())
    }

    /// Returns a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.body.get(key)
    }

    /// Returns the whole body.
    #[must_use]
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Consumes the response, returning the body.
    #[must_use]
    pub fn into_body(self) -> serde_json::Value {
        self.body
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Serialization`](crate::PaymentError::Serialization) if the body
    /// does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }
}

/// A remote subscription resource.
///
/// Setters only stage changes; [`save`](Self::save) sends them. The lifecycle operations
/// (`change_plan`, `suspend`, `activate`) are immediate remote calls and must report gateway
/// refusals as errors, since callers update local state only after they succeed.
pub trait GatewaySubscription: Send + Sync {
    /// Canonical URL of the resource, e.g. `https://api.iugu.com/v1/subscriptions/ABC`.
    fn url(&self) -> String;

    /// Returns true if the resource has not been created on the gateway yet.
    fn is_new(&self) -> bool;

    /// Current plan identifier.
    fn plan_identifier(&self) -> Option<&str>;

    /// Stages a new plan identifier.
    fn set_plan_identifier(&mut self, plan: &str);

    /// Stages the skip-charge flag, applying the next save without billing.
    fn set_skip_charge(&mut self, skip: bool);

    /// End of the current billing period, if the gateway reports one.
    fn expires_at(&self) -> Option<NaiveDate>;

    /// Changes the plan, possibly billing the customer immediately.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses the change or cannot be reached.
    fn change_plan(&mut self, plan: &str) -> impl Future<Output = Result<()>> + Send;

    /// Suspends the subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached.
    fn suspend(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Reactivates a suspended subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached.
    fn activate(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Sends staged changes.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached.
    fn save(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Raw request capability of the gateway API.
pub trait GatewayTransport: Send + Sync {
    /// Issues a request without a body.
    ///
    /// Gateway error payloads are returned as a successful [`GatewayResponse`] carrying an
    /// `errors` field; only transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or the body cannot be decoded.
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
    ) -> impl Future<Output = Result<GatewayResponse>> + Send;
}
