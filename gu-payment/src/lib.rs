//! gu-payment: Subscription Billing Synchronised with the Iugu Gateway
//!
//! A library that keeps locally persisted subscriptions in step with their remote
//! counterparts on a payment gateway, and builds one-off invoices.
//!
//! # What is gu-payment?
//!
//! The gateway is authoritative for plans, billing periods and suspension; the application
//! keeps a local record to answer "may this account use the product right now?" without a
//! remote call. gu-payment provides:
//!
//! - **Lifecycle operations**: swap, cancel, cancel now and resume, each applied on the gateway
//!   first and persisted locally only after the gateway accepts it
//! - **Derived state**: trial, grace period and validity recomputed against a [`Clock`]
//! - **Plan-change simulation**: a read-only query that never fails, reporting why a
//!   simulation is unavailable
//! - **Invoice builder**: line items plus due date, with the customer filled in from the account
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐       ┌──────────────────────────┐
//! │    Subscription    │──────►│    SubscriptionStore     │  local record
//! │  (record + clock)  │       └──────────────────────────┘
//! └─────────┬──────────┘
//!           │ resolves via BillableAccount
//! ┌─────────▼──────────┐       ┌──────────────────────────┐
//! │ GatewaySubscription│◄──────│ GatewaySubscriptionProxy │  + change_plan_simulation
//! └─────────┬──────────┘       └────────────┬─────────────┘
//!           │                               │ GatewayTransport
//! ┌─────────▼───────────────────────────────▼─────────────┐
//! │                 Iugu REST API (HTTPS)                 │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gu_payment::{
//!     BillableAccount, GuPaymentConfig, InvoiceOptions, Subscription, SubscriptionRecord,
//!     gateway::{
//!         GatewayResponse,
//!         iugu::{IuguClient, IuguSubscription},
//!     },
//!     store::InMemoryStore,
//! };
//!
//! #[derive(Debug)]
//! struct Account {
//!     customer_id: Option<String>,
//!     client: Arc<IuguClient>,
//! }
//!
//! impl BillableAccount for Account {
//!     type Invoice = GatewayResponse;
//!     type Subscription = IuguSubscription;
//!     type Transport = IuguClient;
//!
//!     fn remote_customer_id(&self) -> Option<&str> {
//!         self.customer_id.as_deref()
//!     }
//!
//!     fn gateway_transport(&self) -> &IuguClient {
//!         &self.client
//!     }
//!
//!     async fn gateway_subscription(
//!         &self,
//!         remote_id: Option<&str>,
//!     ) -> gu_payment::Result<IuguSubscription> {
//!         let id = remote_id.ok_or_else(|| {
//!             gu_payment::PaymentError::InvalidInput("subscription has no remote id".into())
//!         })?;
//!         self.client.fetch_subscription(id).await
//!     }
//!
//!     async fn create_remote_invoice(
//!         &self,
//!         options: InvoiceOptions,
//!     ) -> gu_payment::Result<GatewayResponse> {
//!         self.client.create_invoice(&options).await
//!     }
//! }
//!
//! # async fn example() -> gu_payment::Result<()> {
//! let config = GuPaymentConfig::from_file("gu-payment.toml")?.with_env_overrides();
//! config.validate()?;
//! let gateway = config.gateway.clone().unwrap_or_default();
//!
//! let account = Arc::new(Account {
//!     customer_id: Some("CUSTOMER".to_owned()),
//!     client: Arc::new(IuguClient::new(&gateway)?),
//! });
//!
//! let record = SubscriptionRecord::new(1, "main").with_remote_id("SUBSCRIPTION");
//! let mut subscription =
//!     Subscription::new(record, account, Arc::new(InMemoryStore::new()), Arc::new(config.schema()?));
//!
//! if let Some(simulation) = subscription.swap_plan_simulation(Some("gold")).await.simulation() {
//!     println!("swap would cost: {}", simulation.body());
//! }
//! subscription.swap("gold", false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`subscription`]: the subscription entity and its lifecycle operations
//! - [`gateway`]: remote resource and transport traits, the simulation proxy, the Iugu client
//! - [`invoice`]: one-off invoice builder
//! - [`account`]: capabilities required from the owning account
//! - [`store`]: local record persistence
//! - [`config`]: table and column names, gateway settings
//! - [`clock`]: time source for derived state
//! - [`observability`]: tracing subscriber setup
//! - `testing`: in-memory doubles for the gateway and the account (`test-util` feature)
//! - [`error`]: error types with recovery guidance
//!
//! # Consistency
//!
//! Each lifecycle operation performs at most one remote call followed by at most one local
//! write, in that order, without a cross-resource transaction. A gateway refusal leaves the
//! local record untouched. A store failure after a successful remote call is returned as
//! [`PaymentError::Store`]; the in-memory record already holds the new values and can be
//! saved again with [`Subscription::save`].
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, PaymentError>`](error::Result):
//!
//! ```rust
//! use gu_payment::PaymentError;
//!
//! fn describe(err: &PaymentError) -> &'static str {
//!     match err {
//!         PaymentError::Gateway(_) => "gateway refused, local state unchanged",
//!         PaymentError::Http(_) => "gateway unreachable, retry later",
//!         PaymentError::Store(_) => "gateway changed, save the record again",
//!         _ => "fix input or configuration",
//!     }
//! }
//!
//! assert_eq!(describe(&PaymentError::Store("locked".into())), "gateway changed, save the record again");
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and tracing-subscriber"
)]

pub mod account;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod invoice;
pub mod observability;
pub mod store;
pub mod subscription;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use account::{BillableAccount, OwnerLookup};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{GuPaymentConfig, SubscriptionSchema, SubscriptionSettings};
pub use error::{PaymentError, Result};
pub use gateway::{
    GatewayResponse, GatewaySubscription, GatewaySubscriptionProxy, GatewayTransport, HttpMethod,
    NotApplicableReason, SimulationOutcome,
};
pub use invoice::{InvoiceBuilder, InvoiceItem, InvoiceOptions};
pub use store::{InMemoryStore, SubscriptionRow, SubscriptionStore};
pub use subscription::{Subscription, SubscriptionChanges, SubscriptionRecord, SubscriptionStatus};
