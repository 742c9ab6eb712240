//! In-memory doubles for the gateway and the billable account.
//!
//! Every remote interaction is appended to a shared [`GatewayLedger`], so tests can assert
//! which calls were made and in what order. Each double can be configured to fail to exercise
//! error paths.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    account::BillableAccount,
    error::{PaymentError, Result},
    gateway::{GatewayResponse, GatewaySubscription, GatewayTransport, HttpMethod},
    invoice::InvoiceOptions,
};

/// API root used by the doubles.
pub const MOCK_BASE_URL: &str = "https://gateway.test/v1";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A recorded remote interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// The account resolved a subscription by remote id.
    Fetch(Option<String>),
    /// `change_plan` on a resource.
    ChangePlan(String),
    /// `suspend` on a resource.
    Suspend,
    /// `activate` on a resource.
    Activate,
    /// `save` on a resource, with the staged values.
    Save {
        /// Staged plan identifier.
        plan: Option<String>,
        /// Staged skip-charge flag.
        skip_charge: bool,
    },
    /// A raw transport request.
    Request {
        /// HTTP method.
        method: HttpMethod,
        /// Full URL.
        url: String,
    },
    /// The account created an invoice.
    CreateInvoice,
}

/// Shared, ordered log of remote interactions.
#[derive(Debug, Clone, Default)]
pub struct GatewayLedger {
    calls: Arc<Mutex<Vec<GatewayCall>>>,
}

impl GatewayLedger {
    /// Appends a call.
    pub fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }

    /// Returns every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Forgets every call.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

/// Remote subscription double.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockGatewaySubscription {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    plan_identifier: Option<String>,
    #[serde(default)]
    expires_at: Option<NaiveDate>,
    #[serde(default)]
    suspended: bool,
    #[serde(skip)]
    skip_charge: bool,
    #[serde(skip)]
    failure: Option<String>,
    #[serde(skip)]
    ledger: GatewayLedger,
}

impl MockGatewaySubscription {
    /// Creates an unsaved resource recording into `ledger`.
    #[must_use]
    pub fn new(ledger: GatewayLedger) -> Self {
        Self { ledger, ..Self::default() }
    }

    /// Sets the remote id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the plan identifier.
    #[must_use]
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan_identifier = Some(plan.into());
        self
    }

    /// Sets the end of the billing period.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: NaiveDate) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Makes every remote operation fail with `message` after being recorded.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Records into `ledger` from now on.
    #[must_use]
    pub fn with_ledger(mut self, ledger: GatewayLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Remote id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether `suspend` succeeded more recently than `activate`.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Staged skip-charge flag.
    #[must_use]
    pub fn skip_charge(&self) -> bool {
        self.skip_charge
    }

    fn check(&self, call: GatewayCall) -> Result<()> {
        self.ledger.record(call);
        match &self.failure {
            Some(message) => Err(PaymentError::Gateway(message.clone())),
            None => Ok(()),
        }
    }
}

impl GatewaySubscription for MockGatewaySubscription {
    fn url(&self) -> String {
        match &self.id {
            Some(id) => format!("{MOCK_BASE_URL}/subscriptions/{id}"),
            None => format!("{MOCK_BASE_URL}/subscriptions"),
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

    async fn change_plan(&mut self, plan: &str) -> Result<()> {
        self.check(GatewayCall::ChangePlan(plan.to_owned()))?;
        self.plan_identifier = Some(plan.to_owned());
        Ok(())
    }

    async fn suspend(&mut self) -> Result<()> {
        self.check(GatewayCall::Suspend)?;
        self.suspended = true;
        Ok(())
    }

    async fn activate(&mut self) -> Result<()> {
        self.check(GatewayCall::Activate)?;
        self.suspended = false;
        Ok(())
    }

    async fn save(&mut self) -> Result<()> {
        self.check(GatewayCall::Save {
            plan: self.plan_identifier.clone(),
            skip_charge: self.skip_charge,
        })?;
        if self.id.is_none() {
            self.id = Some("MOCK-SUBSCRIPTION".to_owned());
        }
        self.skip_charge = false;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Value),
    Fail(String),
}

/// Raw transport double answering every request the same way.
#[derive(Debug, Clone)]
pub struct MockTransport {
    reply: Reply,
    ledger: GatewayLedger,
}

impl MockTransport {
    /// Answers every request with `body`.
    #[must_use]
    pub fn responding(ledger: GatewayLedger, body: Value) -> Self {
        Self { reply: Reply::Body(body), ledger }
    }

    /// Fails every request with `message`.
    #[must_use]
    pub fn failing(ledger: GatewayLedger, message: impl Into<String>) -> Self {
        Self { reply: Reply::Fail(message.into()), ledger }
    }
}

impl GatewayTransport for MockTransport {
    async fn request(&self, method: HttpMethod, url: &str) -> Result<GatewayResponse> {
        self.ledger.record(GatewayCall::Request { method, url: url.to_owned() });
        match &self.reply {
            Reply::Body(body) => Ok(GatewayResponse::new(body.clone())),
            Reply::Fail(message) => Err(PaymentError::Gateway(message.clone())),
        }
    }
}

/// Billable account double.
///
/// Resolving a subscription returns a copy of the configured remote resource with the
/// requested id. Created invoices are kept and echoed back with an id.
#[derive(Debug)]
pub struct MockAccount {
    customer_id: Option<String>,
    remote: MockGatewaySubscription,
    transport: MockTransport,
    ledger: GatewayLedger,
    fetch_failure: Option<String>,
    invoice_failure: Option<String>,
    invoices: Mutex<Vec<InvoiceOptions>>,
}

impl Default for MockAccount {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAccount {
    /// Creates an account without a remote customer, whose transport answers `{}`.
    #[must_use]
    pub fn new() -> Self {
        let ledger = GatewayLedger::default();
        Self {
            customer_id: None,
            remote: MockGatewaySubscription::new(ledger.clone()),
            transport: MockTransport::responding(ledger.clone(), Value::Object(InvoiceOptions::new())),
            ledger,
            fetch_failure: None,
            invoice_failure: None,
            invoices: Mutex::new(Vec::new()),
        }
    }

    /// Sets the remote customer id.
    #[must_use]
    pub fn with_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Sets the remote resource returned by resolution.
    #[must_use]
    pub fn with_remote(mut self, remote: MockGatewaySubscription) -> Self {
        self.remote = remote.with_ledger(self.ledger.clone());
        self
    }

    /// Answers transport requests with `body`.
    #[must_use]
    pub fn with_transport_reply(mut self, body: Value) -> Self {
        self.transport = MockTransport::responding(self.ledger.clone(), body);
        self
    }

    /// Fails transport requests with `message`.
    #[must_use]
    pub fn with_unreachable_transport(mut self, message: impl Into<String>) -> Self {
        self.transport = MockTransport::failing(self.ledger.clone(), message);
        self
    }

    /// Fails subscription resolution with `message`.
    #[must_use]
    pub fn failing_fetch(mut self, message: impl Into<String>) -> Self {
        self.fetch_failure = Some(message.into());
        self
    }

    /// Fails invoice creation with `message`.
    #[must_use]
    pub fn failing_invoices(mut self, message: impl Into<String>) -> Self {
        self.invoice_failure = Some(message.into());
        self
    }

    /// Log shared by the account, its resources and its transport.
    #[must_use]
    pub fn ledger(&self) -> &GatewayLedger {
        &self.ledger
    }

    /// Options of every invoice created so far.
    #[must_use]
    pub fn invoices(&self) -> Vec<InvoiceOptions> {
        lock(&self.invoices).clone()
    }
}

impl BillableAccount for MockAccount {
    type Invoice = Value;
    type Subscription = MockGatewaySubscription;
    type Transport = MockTransport;

    fn remote_customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    fn gateway_transport(&self) -> &Self::Transport {
        &self.transport
    }

    async fn gateway_subscription(&self, remote_id: Option<&str>) -> Result<Self::Subscription> {
        self.ledger.record(GatewayCall::Fetch(remote_id.map(str::to_owned)));

        if let Some(message) = &self.fetch_failure {
            return Err(PaymentError::Gateway(message.clone()));
        }

        let id = remote_id
            .ok_or_else(|| PaymentError::Gateway("subscription id is missing".to_owned()))?;
        Ok(self.remote.clone().with_id(id))
    }

    async fn create_remote_invoice(&self, mut options: InvoiceOptions) -> Result<Self::Invoice> {
        self.ledger.record(GatewayCall::CreateInvoice);

        if let Some(message) = &self.invoice_failure {
            return Err(PaymentError::Gateway(message.clone()));
        }

        let mut invoices = lock(&self.invoices);
        invoices.push(options.clone());
        options.insert("id".to_owned(), Value::String(format!("INV{}", invoices.len())));
        Ok(Value::Object(options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_binds_requested_id() {
        let account = MockAccount::new()
            .with_remote(MockGatewaySubscription::default().with_plan("gold"));

        let remote = account.gateway_subscription(Some("SUB1")).await.unwrap();

        assert_eq!(remote.id(), Some("SUB1"));
        assert_eq!(remote.plan_identifier(), Some("gold"));
        assert_eq!(account.ledger().calls(), vec![GatewayCall::Fetch(Some("SUB1".to_owned()))]);
    }

    #[tokio::test]
    async fn test_fetch_without_id_fails() {
        let account = MockAccount::new();
        assert!(account.gateway_subscription(None).await.is_err());
    }

    #[tokio::test]
    async fn test_remote_records_into_account_ledger() {
        let account = MockAccount::new().with_remote(MockGatewaySubscription::default());
        let mut remote = account.gateway_subscription(Some("SUB1")).await.unwrap();

        remote.suspend().await.unwrap();

        assert!(remote.is_suspended());
        assert_eq!(account.ledger().calls().last(), Some(&GatewayCall::Suspend));
    }

    #[tokio::test]
    async fn test_failing_remote_records_then_fails() {
        let ledger = GatewayLedger::default();
        let mut remote = MockGatewaySubscription::new(ledger.clone()).with_id("S").failing("down");

        assert!(remote.activate().await.is_err());
        assert_eq!(ledger.calls(), vec![GatewayCall::Activate]);
    }

    #[tokio::test]
    async fn test_invoices_get_sequential_ids() {
        let account = MockAccount::new();
        let first = account.create_remote_invoice(InvoiceOptions::new()).await.unwrap();
        let second = account.create_remote_invoice(InvoiceOptions::new()).await.unwrap();

        assert_eq!(first["id"], "INV1");
        assert_eq!(second["id"], "INV2");
        assert_eq!(account.invoices().len(), 2);
    }
}
