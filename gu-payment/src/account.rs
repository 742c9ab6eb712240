//! Capabilities required from the account that owns subscriptions.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use crate::{
    config::SubscriptionSchema,
    error::Result,
    gateway::{GatewaySubscription, GatewayTransport},
    invoice::InvoiceOptions,
};

/// A billable account.
///
/// The account resolves remote subscription resources, creates remote invoices and exposes the
/// transport used for read-only gateway queries.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # {
/// use gu_payment::{BillableAccount, testing::MockAccount};
///
/// let account = MockAccount::new().with_customer_id("CUST1");
/// assert!(account.has_remote_customer_id());
/// assert_eq!(account.remote_customer_id(), Some("CUST1"));
/// # }
/// ```
pub trait BillableAccount: Send + Sync {
    /// Remote subscription resource type.
    type Subscription: GatewaySubscription;

    /// Raw request transport.
    type Transport: GatewayTransport;

    /// Remote invoice returned by [`create_remote_invoice`](Self::create_remote_invoice).
    type Invoice: Send;

    /// Whether the owning model soft-deletes rows, in which case owner lookups must include
    /// trashed rows.
    const SOFT_DELETES: bool = false;

    /// Customer id on the gateway, if the account has one.
    fn remote_customer_id(&self) -> Option<&str>;

    /// Returns true if the account has a customer id on the gateway.
    fn has_remote_customer_id(&self) -> bool {
        self.remote_customer_id().is_some()
    }

    /// Returns the transport used for raw gateway requests.
    fn gateway_transport(&self) -> &Self::Transport;

    /// Resolves the remote subscription resource with the given id.
    ///
    /// # Errors
    ///
    /// Returns error if the id is absent or unknown, or the gateway cannot be reached.
    fn gateway_subscription(
        &self,
        remote_id: Option<&str>,
    ) -> impl Future<Output = Result<Self::Subscription>> + Send;

    /// Creates an invoice on the gateway from fully built options.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses the invoice or cannot be reached.
    fn create_remote_invoice(
        &self,
        options: InvoiceOptions,
    ) -> impl Future<Output = Result<Self::Invoice>> + Send;
}

/// How to load the owner of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLookup {
    /// Owning model identifier.
    pub model: String,
    /// Foreign-key column on the subscription record.
    pub foreign_key: String,
    /// Value of the foreign key.
    pub owner_id: i64,
    /// Include soft-deleted owners.
    pub with_trashed: bool,
}

impl OwnerLookup {
    /// Builds a lookup from the configured schema.
    #[must_use]
    pub fn new(schema: &SubscriptionSchema, owner_id: i64, with_trashed: bool) -> Self {
        Self {
            model: schema.owner_model.clone(),
            foreign_key: schema.owner_foreign_key.clone(),
            owner_id,
            with_trashed,
        }
    }
}
