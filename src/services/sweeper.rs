use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tokio::task::JoinHandle;

use crate::models::time::facility_now;
use crate::services::booking::BookingManager;

/// Periodically releases Held reservations whose TTL has lapsed, judged
/// against the facility's wall clock.
pub fn spawn_hold_sweeper(
    bookings: Arc<BookingManager>,
    every: Duration,
    offset: FixedOffset,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let bookings = Arc::clone(&bookings);
            let swept = tokio::task::spawn_blocking(move || {
                bookings.expire_holds(facility_now(&offset))
            })
            .await;

            match swept {
                Ok(Ok(0)) => {}
                Ok(Ok(released)) => tracing::info!(released, "expired holds released"),
                Ok(Err(e)) => tracing::error!(error = %e, "hold sweep failed"),
                Err(e) => tracing::error!(error = %e, "hold sweep task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDateTime, Offset, Utc};

    use super::*;
    use crate::config::AppConfig;
    use crate::db::{queries, Store};
    use crate::models::{BookingStatus, Customer, TimeSlot};
    use crate::services::booking::HoldRequest;
    use crate::services::locks::KeyedLocks;

    #[tokio::test]
    async fn test_sweeper_releases_lapsed_hold() {
        let store = Store::open(":memory:").unwrap();
        store
            .atomically(|tx| {
                queries::insert_customer(
                    tx,
                    &Customer {
                        id: "alice".to_string(),
                        name: "Alice".to_string(),
                        phone: None,
                    },
                )
            })
            .unwrap();
        let bookings = Arc::new(
            BookingManager::new(store, Arc::new(KeyedLocks::new()), &AppConfig::default()).unwrap(),
        );

        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap();
        // held a day ago, so its TTL is long gone by the first tick
        let held = bookings
            .hold(
                HoldRequest {
                    court_id: "B1".to_string(),
                    customer_id: "alice".to_string(),
                    slots: vec![TimeSlot {
                        start: at("2025-06-16 10:00"),
                        end: at("2025-06-16 11:00"),
                    }],
                },
                facility_now(&Utc.fix()) - chrono::Duration::days(1),
            )
            .unwrap();

        let handle = spawn_hold_sweeper(Arc::clone(&bookings), Duration::from_millis(10), Utc.fix());
        let mut status = BookingStatus::Held;
        for _ in 0..100 {
            status = bookings.get(&held.id).unwrap().status;
            if status == BookingStatus::Cancelled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(status, BookingStatus::Cancelled);
    }
}
