use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CounterStore, CounterTick};
use crate::error::Result;
use crate::memory::{Availability, Expiry};

#[derive(Debug, Clone)]
enum Value {
    Count(i64),
    Owner(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expiry: Expiry,
}

/// Process-local [`CounterStore`].
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    availability: Availability,
}

impl fmt::Debug for InMemoryCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCounterStore")
            .field("keys", &self.entries.lock().len())
            .field("available", &self.availability.is_available())
            .finish()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_availability(availability: Availability) -> Self {
        Self {
            entries: Arc::default(),
            availability,
        }
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    /// Drops the expiry of `key`, reproducing a lost expire call.
    pub fn strip_ttl(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.expiry = Expiry::never();
        }
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.expiry.is_expired()) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<CounterTick> {
        self.availability.check("incr_with_ttl")?;
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(entry) => {
                let count = match &mut entry.value {
                    Value::Count(n) => {
                        *n += 1;
                        *n
                    }
                    other => {
                        *other = Value::Count(1);
                        1
                    }
                };
                let ttl_repaired = count > 1 && !entry.expiry.is_set();
                if count == 1 || ttl_repaired {
                    entry.expiry = Expiry::after(ttl);
                }
                Ok(CounterTick { count, ttl_repaired })
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Count(1),
                        expiry: Expiry::after(ttl),
                    },
                );
                Ok(CounterTick {
                    count: 1,
                    ttl_repaired: false,
                })
            }
        }
    }

    async fn get_count(&self, key: &str) -> Result<i64> {
        self.availability.check("get_count")?;
        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::Count(n),
                ..
            }) => *n,
            _ => 0,
        })
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.availability.check("reset")?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.availability.check("ttl")?;
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key).and_then(|e| e.expiry.remaining()))
    }

    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.availability.check("try_acquire")?;
        let mut entries = self.entries.lock();
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Owner(owner.to_string()),
                expiry: Expiry::after(ttl),
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        self.availability.check("release")?;
        let mut entries = self.entries.lock();
        let held = matches!(
            Self::live(&mut entries, key),
            Some(Entry { value: Value::Owner(current), .. }) if current.as_str() == owner
        );
        if held {
            entries.remove(key);
        }
        Ok(held)
    }
}
