//! The chat service shared by every request handler.
//!
//! [`ChatService`] owns the database handle behind a mutex, the event hub and
//! the time source.  Operations are implemented in the `commands` modules as
//! further `impl ChatService` blocks.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use parley_shared::ChangeEvent;
use parley_store::Database;

use crate::clock::{Clock, SystemClock, Ticker};
use crate::error::{ChatError, Result};
use crate::events::{Changes, EventHub};
use crate::settings::ChatSettings;

pub struct ChatService {
    db: Mutex<Database>,
    ticker: Ticker,
    hub: EventHub,
    settings: ChatSettings,
}

impl ChatService {
    /// Wrap an opened database.
    pub fn new(db: Database, clock: Arc<dyn Clock>, settings: ChatSettings) -> Result<Self> {
        let floor = db.latest_write_time()?;
        Ok(Self {
            db: Mutex::new(db),
            ticker: Ticker::new(clock, floor),
            hub: EventHub::default(),
            settings,
        })
    }

    /// In-memory store on the wall clock with default settings.
    pub fn in_memory() -> Result<Self> {
        Self::new(
            Database::open_in_memory()?,
            Arc::new(SystemClock),
            ChatSettings::default(),
        )
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Receive every change event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.hub.subscribe()
    }

    /// Run a read-only query.
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database, DateTime<Utc>) -> Result<T>,
    {
        let db = self.db.lock().map_err(|_| ChatError::Poisoned)?;
        let now = self.ticker.tick();
        f(&*db, now)
    }

    /// Run a mutation in one transaction and publish its changes after commit.
    pub(crate) fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database, DateTime<Utc>, &mut Changes) -> Result<T>,
    {
        let (value, changes) = {
            let db = self.db.lock().map_err(|_| ChatError::Poisoned)?;
            let now = self.ticker.tick();
            db.atomic(|db| {
                let mut changes = Changes::new(now);
                let value = f(db, now, &mut changes)?;
                Ok::<_, ChatError>((value, changes))
            })?
        };
        self.hub.publish(changes.into_events());
        Ok(value)
    }
}
