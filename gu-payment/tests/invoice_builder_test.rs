//! Integration tests for one-off invoices.

use chrono::{NaiveDate, TimeZone, Utc};
use gu_payment::{
    FixedClock, InvoiceBuilder, InvoiceOptions,
    testing::{GatewayCall, MockAccount},
};
use serde_json::json;

fn due_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 9).unwrap()
}

fn options(pairs: &[(&str, serde_json::Value)]) -> InvoiceOptions {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[tokio::test]
async fn test_create_overwrites_due_date_and_items() {
    let account = MockAccount::new();
    let mut builder = InvoiceBuilder::new(&account, due_date());
    builder.add_item(1990).add_item_with(500, "Extra seat", 3);

    let invoice = builder
        .create(options(&[
            ("due_date", json!("2000-01-01")),
            ("items", json!([{"description": "forged", "quantity": 1, "price_cents": 1}])),
            ("email", json!("billing@example.com")),
        ]))
        .await
        .expect("invoice should be created");

    assert_eq!(invoice["due_date"], json!("2024-07-09"));
    assert_eq!(
        invoice["items"],
        json!([
            {"description": "Nova fatura", "quantity": 1, "price_cents": 1990},
            {"description": "Extra seat", "quantity": 3, "price_cents": 500},
        ])
    );
    assert_eq!(invoice["email"], json!("billing@example.com"));
    assert_eq!(invoice["id"], json!("INV1"));
}

#[tokio::test]
async fn test_customer_id_injection_rules() {
    // Absent in options, account has one: injected
    let account = MockAccount::new().with_customer_id("CUST-9");
    let builder = InvoiceBuilder::new(&account, due_date());
    let invoice = builder.create(InvoiceOptions::new()).await.unwrap();
    assert_eq!(invoice["customer_id"], json!("CUST-9"));

    // Present in options: kept
    let invoice =
        builder.create(options(&[("customer_id", json!("PAYER-1"))])).await.unwrap();
    assert_eq!(invoice["customer_id"], json!("PAYER-1"));

    // Account without one: not injected
    let account = MockAccount::new();
    let builder = InvoiceBuilder::new(&account, due_date());
    let invoice = builder.create(InvoiceOptions::new()).await.unwrap();
    assert!(invoice.get("customer_id").is_none());
}

#[tokio::test]
async fn test_empty_invoice_is_submitted() {
    let account = MockAccount::new();
    let builder = InvoiceBuilder::new(&account, due_date());

    let invoice = builder.create(InvoiceOptions::new()).await.unwrap();

    assert_eq!(invoice["items"], json!([]));
    assert_eq!(account.ledger().calls(), vec![GatewayCall::CreateInvoice]);
}

#[tokio::test]
async fn test_gateway_refusal_is_returned() {
    let account = MockAccount::new().failing_invoices("due date in the past");
    let mut builder = InvoiceBuilder::new(&account, due_date());
    builder.add_item(100);

    let err = builder.create(InvoiceOptions::new()).await.unwrap_err();

    assert_eq!(err.to_string(), "gateway error: due date in the past");
    assert!(account.invoices().is_empty());
}

#[test]
fn test_due_in_counts_from_clock_date() {
    let account = MockAccount::new();
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 12, 28, 23, 59, 59).unwrap());

    let builder = InvoiceBuilder::due_in(&account, 5, &clock).unwrap();

    assert_eq!(builder.due_date(), NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
}
