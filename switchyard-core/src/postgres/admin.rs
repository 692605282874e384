//! Administrative writes. Every change that affects scheduling eligibility
//! appends its outbox event inside the same transaction as the row update.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use switchyard_model::{
    AccountId, AccountStatus, GroupId, GroupStatus, NewOutboxEvent, SchedulerMode,
};
use tracing::info;

use super::PostgresSchedulerStore;
use super::outbox::enqueue_outbox;
use crate::error::Result;

/// Partial update of a group's scheduling attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub platform: Option<String>,
    pub mode: Option<SchedulerMode>,
    pub status: Option<GroupStatus>,
}

impl PostgresSchedulerStore {
    /// Returns `false` when the account does not exist.
    pub async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        schedulable: bool,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET status = $2, schedulable = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(schedulable)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        enqueue_outbox(&mut *tx, &NewOutboxEvent::account_changed(id)).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Replaces the account's memberships with `groups` (`(group, priority)`).
    /// The event lists both old and new group IDs so groups the account left
    /// are rebuilt too.
    pub async fn set_account_groups(
        &self,
        account_id: AccountId,
        groups: &[(GroupId, i32)],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let previous: Vec<(i64,)> =
            sqlx::query_as("SELECT group_id FROM account_groups WHERE account_id = $1")
                .bind(account_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM account_groups WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        for (group_id, priority) in groups {
            sqlx::query(
                "INSERT INTO account_groups (account_id, group_id, priority) VALUES ($1, $2, $3)",
            )
            .bind(account_id)
            .bind(group_id)
            .bind(priority)
            .execute(&mut *tx)
            .await?;
        }

        let affected: BTreeSet<GroupId> = previous
            .into_iter()
            .map(|(id,)| id)
            .chain(groups.iter().map(|(id, _)| *id))
            .collect();
        enqueue_outbox(
            &mut *tx,
            &NewOutboxEvent::account_groups_changed(account_id, affected),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deletes the account; its former groups travel in the event payload.
    pub async fn delete_account(&self, account_id: AccountId) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let previous: Vec<(i64,)> =
            sqlx::query_as("SELECT group_id FROM account_groups WHERE account_id = $1")
                .bind(account_id)
                .fetch_all(&mut *tx)
                .await?;
        let deleted = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let event = NewOutboxEvent::account_groups_changed(
            account_id,
            previous.into_iter().map(|(id,)| id),
        );
        enqueue_outbox(&mut *tx, &event).await?;
        tx.commit().await?;
        info!(account_id, "account deleted");
        Ok(true)
    }

    /// Persists last-used timestamps (never moving one backwards) and records
    /// them for the cache in a single event.
    pub async fn record_last_used(
        &self,
        updates: &HashMap<AccountId, DateTime<Utc>>,
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;
        for (id, at) in updates {
            sqlx::query(
                r#"
                UPDATE accounts
                SET last_used_at = GREATEST(COALESCE(last_used_at, $2), $2)
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }
        enqueue_outbox(&mut *tx, &NewOutboxEvent::last_used(updates)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Returns `false` when the group does not exist.
    pub async fn update_group(&self, group_id: GroupId, update: &GroupUpdate) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE groups
            SET platform = COALESCE($2, platform),
                mode = COALESCE($3, mode),
                status = COALESCE($4, status),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(update.platform.as_deref())
        .bind(update.mode.map(SchedulerMode::as_str))
        .bind(update.status.map(GroupStatus::as_str))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        enqueue_outbox(&mut *tx, &NewOutboxEvent::group_changed(group_id)).await?;
        tx.commit().await?;
        Ok(true)
    }
}
