//! PostgreSQL system-of-record adapter.

use std::fmt;

use sqlx::PgPool;

mod accounts;
mod admin;
mod outbox;

pub use admin::GroupUpdate;
pub use outbox::enqueue_outbox;

/// Account, group and outbox access backed by a shared pool.
#[derive(Clone)]
pub struct PostgresSchedulerStore {
    pool: PgPool,
}

impl PostgresSchedulerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl fmt::Debug for PostgresSchedulerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSchedulerStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}
