use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use switchyard_model::{
    Account, AccountGroup, AccountId, AccountStatus, Group, GroupId, GroupStatus,
    SchedulerBucket, SchedulerMode,
};
use tracing::warn;

use super::PostgresSchedulerStore;
use crate::error::{Result, SchedulerError};
use crate::ports::AccountRepository;

const ACCOUNT_COLUMNS: &str = r#"
    a.id,
    a.name,
    a.platform,
    a.concurrency,
    a.priority,
    a.status,
    a.schedulable,
    a.has_error,
    a.rate_limit_reset_at,
    a.temp_unschedulable_until,
    a.temp_unschedulable_reason,
    a.last_used_at
"#;

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    name: String,
    platform: String,
    concurrency: i32,
    priority: i32,
    status: String,
    schedulable: bool,
    has_error: bool,
    rate_limit_reset_at: Option<DateTime<Utc>>,
    temp_unschedulable_until: Option<DateTime<Utc>>,
    temp_unschedulable_reason: Option<String>,
    last_used_at: Option<DateTime<Utc>>,
}

impl AccountRow {
    fn into_account(self, groups: Vec<AccountGroup>) -> Result<Account> {
        Ok(Account {
            id: self.id,
            name: self.name,
            platform: self.platform,
            concurrency: self.concurrency,
            priority: self.priority,
            status: self.status.parse::<AccountStatus>()?,
            schedulable: self.schedulable,
            groups,
            has_error: self.has_error,
            rate_limit_reset_at: self.rate_limit_reset_at,
            temp_unschedulable_until: self.temp_unschedulable_until,
            temp_unschedulable_reason: self.temp_unschedulable_reason,
            last_used_at: self.last_used_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    account_id: i64,
    group_id: i64,
    name: String,
    platform: String,
    priority: i32,
}

#[derive(Debug, FromRow)]
struct GroupRow {
    id: i64,
    name: String,
    platform: String,
    mode: String,
    status: String,
}

impl GroupRow {
    fn into_group(self) -> Result<Group> {
        Ok(Group {
            id: self.id,
            name: self.name,
            platform: self.platform,
            mode: self.mode.parse::<SchedulerMode>()?,
            status: self.status.parse::<GroupStatus>()?,
        })
    }
}

impl PostgresSchedulerStore {
    async fn memberships(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, Vec<AccountGroup>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT ag.account_id, ag.group_id, g.name, g.platform, ag.priority
            FROM account_groups ag
            JOIN groups g ON g.id = ag.group_id
            WHERE ag.account_id = ANY($1)
            ORDER BY ag.account_id, ag.group_id
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await?;

        let mut out: HashMap<AccountId, Vec<AccountGroup>> = HashMap::new();
        for row in rows {
            out.entry(row.account_id).or_default().push(AccountGroup {
                group_id: row.group_id,
                name: row.name,
                platform: row.platform,
                priority: row.priority,
            });
        }
        Ok(out)
    }

    async fn hydrate(&self, rows: Vec<AccountRow>) -> Result<Vec<Account>> {
        let ids: Vec<AccountId> = rows.iter().map(|r| r.id).collect();
        let mut memberships = self.memberships(&ids).await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_account(memberships.remove(&id).unwrap_or_default()) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(account_id = id, error = %e, "skipping unreadable account row"),
            }
        }
        Ok(accounts)
    }
}

#[async_trait]
impl AccountRepository for PostgresSchedulerStore {
    async fn list_schedulable_accounts(&self, bucket: &SchedulerBucket) -> Result<Vec<Account>> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts a
            JOIN account_groups ag ON ag.account_id = a.id
            JOIN groups g ON g.id = ag.group_id
            WHERE ag.group_id = $1
              AND a.platform = $2
              AND a.status = 'active'
              AND a.schedulable
              AND g.status = 'active'
            ORDER BY a.id
            "#
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(bucket.group_id)
            .bind(&bucket.platform)
            .fetch_all(self.pool())
            .await?;
        self.hydrate(rows).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts a WHERE a.id = $1");
        let Some(row) = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
        else {
            return Ok(None);
        };
        let groups = self.memberships(&[id]).await?.remove(&id).unwrap_or_default();
        row.into_account(groups).map(Some)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, platform, mode, status FROM groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .map(GroupRow::into_group)
        .transpose()
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, platform, mode, status FROM groups ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(GroupRow::into_group)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| SchedulerError::Internal(format!("unreadable group row: {e}")))
    }
}
