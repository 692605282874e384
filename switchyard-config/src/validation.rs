use std::fmt;

/// Non-fatal configuration findings surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No Redis URL; stores are process-local and not shared across
    /// replicas.
    InMemoryStores,
    /// The rebuild lock can expire before a store call times out.
    LockTtlBelowStoreTimeout,
    /// The outbox batch size is outside the sensible range and was clamped.
    BatchSizeClamped { requested: i64, effective: i64 },
    /// An error rule without any usable keyword never matches.
    RuleWithoutKeywords { index: usize },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::InMemoryStores => f.write_str(
                "REDIS_URL is not set; using in-memory stores (single replica only)",
            ),
            ConfigWarning::LockTtlBelowStoreTimeout => {
                f.write_str("scheduler.rebuild_lock_ttl is shorter than scheduler.store_timeout")
            }
            ConfigWarning::BatchSizeClamped {
                requested,
                effective,
            } => write!(
                f,
                "scheduler.outbox_batch_size {requested} clamped to {effective}"
            ),
            ConfigWarning::RuleWithoutKeywords { index } => {
                write!(f, "temp_unsched.rules[{index}] has no keywords and never matches")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, warning: ConfigWarning) {
        self.items.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn contains(&self, warning: &ConfigWarning) -> bool {
        self.items.contains(warning)
    }

    /// Emits every warning through `tracing`.
    pub fn log(&self) {
        for warning in &self.items {
            tracing::warn!("configuration: {warning}");
        }
    }
}
