//! Iugu REST API adapter.
//!
//! [`IuguClient`] authenticates with HTTP basic auth (API token as user, empty password) and
//! implements [`GatewayTransport`]. [`IuguSubscription`] is the remote subscription resource,
//! deserialized from the API and bound to the client that fetched it.
//!
//! # Endpoints
//!
//! | operation     | request                                           |
//! |---------------|---------------------------------------------------|
//! | fetch         | `GET /subscriptions/{id}`                         |
//! | change plan   | `POST /subscriptions/{id}/change_plan/{plan}`     |
//! | suspend       | `POST /subscriptions/{id}/suspend`                |
//! | activate      | `POST /subscriptions/{id}/activate`               |
//! | save          | `PUT /subscriptions/{id}` or `POST /subscriptions` |
//! | invoice       | `POST /invoices`                                  |

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{GatewayResponse, GatewaySubscription, GatewayTransport, HttpMethod};
use crate::{
    error::{PaymentError, Result},
    invoice::InvoiceOptions,
};

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://api.iugu.com/v1";

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

/// Iugu API settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IuguConfig {
    /// API root, e.g. `https://api.iugu.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API token used as the basic-auth user.
    #[serde(default)]
    pub api_token: String,

    /// Total request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for IuguConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: String::new(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl IuguConfig {
    /// Creates settings for the production API with the given token.
    #[must_use]
    pub fn new(api_token: impl Into<String>) -> Self {
        Self { api_token: api_token.into(), ..Self::default() }
    }

    /// Returns the total request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the connection timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if the base URL is not an absolute HTTPS URL, the token
    /// is empty, or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        parse_base_url(&self.base_url)?;

        if self.api_token.trim().is_empty() {
            return Err(PaymentError::Config("gateway api_token cannot be empty".to_owned()));
        }

        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(PaymentError::Config("gateway timeouts must be positive".to_owned()));
        }

        Ok(())
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url)
        .map_err(|e| PaymentError::Config(format!("invalid gateway base_url '{base_url}': {e}")))?;

    if url.scheme() != "https" {
        return Err(PaymentError::Config(format!(
            "gateway base_url must use HTTPS, got: {}",
            url.scheme()
        )));
    }

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(PaymentError::Config(format!("gateway base_url has no host: {base_url}")));
    }

    Ok(url)
}

/// Renders an `errors` payload as a message.
///
/// Iugu reports errors either as a string or as an object mapping fields to messages.
fn describe_errors(errors: &Value) -> String {
    match errors {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// HTTP client for the Iugu API.
#[derive(Debug, Clone)]
pub struct IuguClient {
    http: Client,
    base_url: Url,
    api_token: String,
}

impl IuguClient {
    /// Creates a client with connection pooling.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if the settings are invalid, or
    /// [`PaymentError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &IuguConfig) -> Result<Self> {
        config.validate()?;
        let base_url = parse_base_url(&config.base_url)?;

        let http = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(PaymentError::Http)?;

        Ok(Self { http, base_url, api_token: config.api_token.clone() })
    }

    /// Returns the API root.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `{base_url}/{segments...}`, percent-encoding each segment.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if the base URL cannot take path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PaymentError::Config(format!("invalid gateway base_url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetches a subscription and binds it to this client.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Gateway`] if the gateway reports an error, or a transport error.
    #[instrument(skip(self))]
    pub async fn fetch_subscription(self: &Arc<Self>, id: &str) -> Result<IuguSubscription> {
        let url = self.endpoint(&["subscriptions", id])?;
        let response = expect_success(self.send(HttpMethod::Get, url.as_str(), None).await?)?;

        let mut subscription: IuguSubscription = response.deserialize()?;
        subscription.client = Some(Arc::clone(self));
        debug!(plan = ?subscription.plan_identifier, "fetched subscription");
        Ok(subscription)
    }

    /// Creates an invoice.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Gateway`] if the gateway reports an error, or a transport error.
    #[instrument(skip(self, options), fields(customer_id = ?options.get("customer_id")))]
    pub async fn create_invoice(&self, options: &InvoiceOptions) -> Result<GatewayResponse> {
        let url = self.endpoint(&["invoices"])?;
        let body = Value::Object(options.clone());
        expect_success(self.send(HttpMethod::Post, url.as_str(), Some(&body)).await?)
    }

    #[instrument(skip(self, body))]
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<GatewayResponse> {
        let request = match method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url),
            HttpMethod::Put => self.http.put(url),
        };

        let request = request.basic_auth(&self.api_token, Some(""));
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        match GatewayResponse::from_slice(&bytes) {
            // Error payloads are answers, not transport failures.
            Ok(decoded) if status.is_success() || decoded.errors().is_some() => Ok(decoded),
            Ok(_) => Err(PaymentError::Gateway(format!("gateway returned status {status}"))),
            Err(e) if status.is_success() => Err(e),
            Err(_) => Err(PaymentError::Gateway(format!("gateway returned status {status}"))),
        }
    }
}

impl GatewayTransport for IuguClient {
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
    ) -> impl Future<Output = Result<GatewayResponse>> + Send {
        self.send(method, url, None)
    }
}

fn expect_success(response: GatewayResponse) -> Result<GatewayResponse> {
    match response.errors() {
        Some(errors) => {
            let message = describe_errors(errors);
            warn!(%message, "gateway rejected request");
            Err(PaymentError::Gateway(message))
        }
        None => Ok(response),
    }
}

/// A subscription resource on Iugu.
///
/// Only the fields the lifecycle needs are modeled; the rest of the API payload is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IuguSubscription {
    /// Remote id, absent until the subscription is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Plan identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_identifier: Option<String>,

    /// Owning customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    /// End of the current billing period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<NaiveDate>,

    /// Whether billing is suspended.
    #[serde(default)]
    pub suspended: bool,

    /// Whether the subscription is active.
    #[serde(default)]
    pub active: bool,

    /// Apply the next save without billing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_charge: bool,

    #[serde(skip)]
    client: Option<Arc<IuguClient>>,
}

impl IuguSubscription {
    /// Creates an unsaved subscription bound to `client`.
    #[must_use]
    pub fn new(client: Arc<IuguClient>) -> Self {
        Self { client: Some(client), ..Self::default() }
    }

    /// Binds the resource to `client`.
    #[must_use]
    pub fn with_client(mut self, client: Arc<IuguClient>) -> Self {
        self.client = Some(client);
        self
    }

    fn client(&self) -> Result<&Arc<IuguClient>> {
        self.client
            .as_ref()
            .ok_or_else(|| PaymentError::Config("subscription is not bound to a client".to_owned()))
    }

    fn member_url(&self, action: &[&str]) -> Result<Url> {
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| PaymentError::InvalidInput("subscription has no remote id".to_owned()))?;
        let mut segments = vec!["subscriptions", id];
        segments.extend_from_slice(action);
        self.client()?.endpoint(&segments)
    }

    /// Sends a member action and refreshes from the answer.
    async fn post_action(&mut self, action: &[&str]) -> Result<()> {
        let url = self.member_url(action)?;
        let client = Arc::clone(self.client()?);
        let response = expect_success(client.send(HttpMethod::Post, url.as_str(), None).await?)?;
        self.refresh(&response);
        Ok(())
    }

    /// Body sent by [`save`](GatewaySubscription::save).
    ///
    /// Fields owned by the gateway (`expires_at`, `suspended`, `active`) are never written
    /// back. `customer_id` is sent only when creating.
    fn write_body(&self) -> Result<Value> {
        let customer_id = if self.is_new() { self.customer_id.as_deref() } else { None };
        let update = SubscriptionWrite {
            plan_identifier: self.plan_identifier.as_deref(),
            customer_id,
            skip_charge: self.skip_charge,
        };
        Ok(serde_json::to_value(update)?)
    }

    fn refresh(&mut self, response: &GatewayResponse) {
        match response.deserialize::<Self>() {
            Ok(fresh) if fresh.id.is_some() => {
                let client = self.client.take();
                *self = Self { client, ..fresh };
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "response does not describe a subscription"),
        }
    }
}

#[derive(Serialize)]
struct SubscriptionWrite<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_identifier: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    skip_charge: bool,
}

impl GatewaySubscription for IuguSubscription {
    fn url(&self) -> String {
        let base = self
            .client
            .as_ref()
            .map_or(DEFAULT_BASE_URL, |client| client.base_url().as_str())
            .trim_end_matches('/');
        match self.id.as_deref() {
            Some(id) => format!("{base}/subscriptions/{id}"),
            None => format!("{base}/subscriptions"),
        }
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }

    fn plan_identifier(&self) -> Option<&str> {
        self.plan_identifier.as_deref()
    }

    fn set_plan_identifier(&mut self, plan: &str) {
        self.plan_identifier = Some(plan.to_owned());
    }

    fn set_skip_charge(&mut self, skip: bool) {
        self.skip_charge = skip;
    }

    fn expires_at(&self) -> Option<NaiveDate> {
        self.expires_at
    }

    fn change_plan(&mut self, plan: &str) -> impl Future<Output = Result<()>> + Send {
        let plan = plan.to_owned();
        async move { self.post_action(&["change_plan", plan.as_str()]).await }
    }

    fn suspend(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.post_action(&["suspend"])
    }

    fn activate(&mut self) -> impl Future<Output = Result<()>> + Send {
        self.post_action(&["activate"])
    }

    fn save(&mut self) -> impl Future<Output = Result<()>> + Send {
        async move {
            let client = Arc::clone(self.client()?);
            let body = self.write_body()?;

            let (method, url) = if self.is_new() {
                (HttpMethod::Post, client.endpoint(&["subscriptions"])?)
            } else {
                (HttpMethod::Put, self.member_url(&[])?)
            };

            let response = expect_success(client.send(method, url.as_str(), Some(&body)).await?)?;
            self.refresh(&response);
            self.skip_charge = false;
            Ok(())
        }
    }
}
