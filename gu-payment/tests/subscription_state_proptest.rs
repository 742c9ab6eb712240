//! Property tests for derived subscription state.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use gu_payment::{
    FixedClock, InMemoryStore, Subscription, SubscriptionRecord, SubscriptionSchema,
    testing::MockAccount,
};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn subscription(
    record: SubscriptionRecord,
    now: DateTime<Utc>,
) -> Subscription<MockAccount, InMemoryStore> {
    Subscription::new(
        record,
        Arc::new(MockAccount::new()),
        Arc::new(InMemoryStore::new()),
        Arc::new(SubscriptionSchema::default()),
    )
    .with_clock(Arc::new(FixedClock::new(now)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn test_without_end_always_active(
        now_offset in 0i64..10_000_000,
        trial_offset in proptest::option::of(-10_000_000i64..10_000_000),
    ) {
        let now = base() + TimeDelta::seconds(now_offset);
        let mut record = SubscriptionRecord::new(1, "main");
        if let Some(offset) = trial_offset {
            record = record.with_trial_ends_at(now + TimeDelta::seconds(offset));
        }

        let sub = subscription(record, now);

        prop_assert!(!sub.cancelled());
        prop_assert!(sub.active());
        prop_assert!(sub.valid());
    }

    #[test]
    fn test_future_trial_is_valid(
        now_offset in 0i64..10_000_000,
        trial_offset in 1i64..10_000_000,
        ends_offset in proptest::option::of(-10_000_000i64..10_000_000),
    ) {
        let now = base() + TimeDelta::seconds(now_offset);
        let mut record =
            SubscriptionRecord::new(1, "main").with_trial_ends_at(now + TimeDelta::seconds(trial_offset));
        if let Some(offset) = ends_offset {
            record = record.with_ends_at(now + TimeDelta::seconds(offset));
        }

        let sub = subscription(record, now);

        prop_assert!(sub.on_trial());
        prop_assert!(sub.valid());
    }

    #[test]
    fn test_status_agrees_with_valid(
        now_offset in 0i64..10_000_000,
        trial_offset in proptest::option::of(-10_000_000i64..10_000_000),
        ends_offset in proptest::option::of(-10_000_000i64..10_000_000),
    ) {
        let now = base() + TimeDelta::seconds(now_offset);
        let mut record = SubscriptionRecord::new(1, "main");
        if let Some(offset) = trial_offset {
            record = record.with_trial_ends_at(now + TimeDelta::seconds(offset));
        }
        if let Some(offset) = ends_offset {
            record = record.with_ends_at(now + TimeDelta::seconds(offset));
        }

        let sub = subscription(record, now);

        prop_assert_eq!(sub.status().is_valid(), sub.valid());
        prop_assert_eq!(sub.active(), sub.record().ends_at().is_none() || sub.on_grace_period());
    }
}
