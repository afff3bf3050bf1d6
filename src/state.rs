use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::config::AppConfig;
use crate::db::Store;
use crate::errors::AppResult;
use crate::models::time::facility_now;
use crate::services::booking::BookingManager;
use crate::services::invoice::InvoiceManager;
use crate::services::locks::KeyedLocks;

pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub bookings: Arc<BookingManager>,
    pub invoices: InvoiceManager,
}

impl AppState {
    /// Wires both managers to one store and one lock registry.
    pub fn new(config: AppConfig, store: Store) -> AppResult<Self> {
        let locks = Arc::new(KeyedLocks::new());
        let bookings = Arc::new(BookingManager::new(store.clone(), Arc::clone(&locks), &config)?);
        let invoices = InvoiceManager::new(
            store.clone(),
            locks,
            Arc::clone(&bookings),
            config.deposit_policy(),
            config.discount_policy(),
        )?;

        Ok(Self {
            config,
            store,
            bookings,
            invoices,
        })
    }

    /// Current facility wall-clock time, the clock slot times are written in.
    pub fn now(&self) -> NaiveDateTime {
        facility_now(&self.config.facility_utc_offset)
    }
}
