//! One-off invoices.
//!
//! [`InvoiceBuilder`] accumulates line items for an account and submits them with a due date.
//! The builder owns `due_date` and `items`: values supplied by the caller under those keys are
//! always replaced. `customer_id` is filled from the account only when the caller left it out.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::{
    account::BillableAccount,
    clock::Clock,
    error::{PaymentError, Result},
};

/// Extra invoice fields, passed through to the gateway.
pub type InvoiceOptions = serde_json::Map<String, Value>;

/// Description used when an item is added without one.
pub const DEFAULT_ITEM_DESCRIPTION: &str = "Nova fatura";

/// A line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    /// Free-text description.
    pub description: String,
    /// Number of units.
    pub quantity: u32,
    /// Unit price in cents.
    pub price_cents: u64,
}

impl InvoiceItem {
    /// Line total in cents.
    #[must_use]
    pub fn total_cents(&self) -> u64 {
        self.price_cents.saturating_mul(u64::from(self.quantity))
    }
}

/// Builds and submits an invoice for an account.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # {
/// use chrono::NaiveDate;
/// use gu_payment::{InvoiceBuilder, testing::MockAccount};
///
/// # tokio_test_block(async {
/// let account = MockAccount::new().with_customer_id("CUST1");
/// let due_date = NaiveDate::from_ymd_opt(2024, 2, 3).unwrap();
/// let mut builder = InvoiceBuilder::new(&account, due_date);
/// builder.add_item(1000).add_item_with(250, "Setup", 2);
/// assert_eq!(builder.total_cents(), 1500);
///
/// let invoice = builder.create(Default::default()).await.unwrap();
/// assert_eq!(invoice["customer_id"], "CUST1");
/// assert_eq!(invoice["due_date"], "2024-02-03");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// # }
/// ```
#[derive(Debug)]
pub struct InvoiceBuilder<'a, A> {
    account: &'a A,
    due_date: NaiveDate,
    items: Vec<InvoiceItem>,
}

impl<'a, A: BillableAccount> InvoiceBuilder<'a, A> {
    /// Starts an empty invoice for `account`, due on `due_date`.
    #[must_use]
    pub fn new(account: &'a A, due_date: NaiveDate) -> Self {
        Self { account, due_date, items: Vec::new() }
    }

    /// Starts an empty invoice due `days` days after the current date of `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidInput`] if the due date falls outside the calendar range.
    pub fn due_in(account: &'a A, days: u32, clock: &dyn Clock) -> Result<Self> {
        let today = clock.today();
        let due_date = today.checked_add_days(Days::new(u64::from(days))).ok_or_else(|| {
            PaymentError::InvalidInput(format!("due date {days} days after {today} is out of range"))
        })?;
        Ok(Self::new(account, due_date))
    }

    /// Adds one unit priced at `price_cents` with the default description.
    pub fn add_item(&mut self, price_cents: u64) -> &mut Self {
        self.add_item_with(price_cents, DEFAULT_ITEM_DESCRIPTION, 1)
    }

    /// Adds an item.
    pub fn add_item_with(
        &mut self,
        price_cents: u64,
        description: impl Into<String>,
        quantity: u32,
    ) -> &mut Self {
        self.items.push(InvoiceItem { description: description.into(), quantity, price_cents });
        self
    }

    /// Items added so far, in insertion order.
    #[must_use]
    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    /// Due date sent with the invoice.
    #[must_use]
    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    /// Sum of all line totals in cents.
    #[must_use]
    pub fn total_cents(&self) -> u64 {
        self.items.iter().map(InvoiceItem::total_cents).fold(0, u64::saturating_add)
    }

    /// Builds the final option map without submitting it.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Serialization`](PaymentError::Serialization) if the items
    /// cannot be encoded.
    pub fn build_options(&self, mut options: InvoiceOptions) -> Result<InvoiceOptions> {
        options.insert(
            "due_date".to_owned(),
            Value::String(self.due_date.format("%Y-%m-%d").to_string()),
        );
        options.insert("items".to_owned(), serde_json::to_value(&self.items)?);

        if !options.contains_key("customer_id")
            && self.account.has_remote_customer_id()
            && let Some(customer_id) = self.account.remote_customer_id()
        {
            options.insert("customer_id".to_owned(), Value::String(customer_id.to_owned()));
        }

        Ok(options)
    }

    /// Submits the invoice.
    ///
    /// An empty item list is submitted as is; the gateway decides whether to accept it.
    ///
    /// # Errors
    ///
    /// Returns the account's error if the gateway refuses the invoice.
    #[instrument(skip(self, options), fields(items = self.items.len(), due_date = %self.due_date))]
    pub async fn create(&self, options: InvoiceOptions) -> Result<A::Invoice> {
        let options = self.build_options(options)?;
        info!(total_cents = self.total_cents(), "creating invoice");
        self.account.create_remote_invoice(options).await
    }
}
