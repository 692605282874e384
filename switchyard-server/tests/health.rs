use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use switchyard_core::cache::InMemorySchedulerCache;
use switchyard_core::ports::{AccountRepository, OutboxRepository};
use switchyard_core::scheduler::{OutboxConsumer, SchedulerSnapshotService};
use switchyard_core::{Result, SchedulerError};
use switchyard_model::{Account, AccountId, Group, GroupId, OutboxEvent, SchedulerBucket};
use switchyard_server::{AppState, create_app};
use tower::ServiceExt;

/// Empty system of record that can be switched off.
#[derive(Default)]
struct EmptySource {
    offline: AtomicBool,
}

impl EmptySource {
    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SchedulerError::Internal("database offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountRepository for EmptySource {
    async fn list_schedulable_accounts(&self, _bucket: &SchedulerBucket) -> Result<Vec<Account>> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn get_account(&self, _id: AccountId) -> Result<Option<Account>> {
        self.check()?;
        Ok(None)
    }

    async fn get_group(&self, _id: GroupId) -> Result<Option<Group>> {
        self.check()?;
        Ok(None)
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.check()?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl OutboxRepository for EmptySource {
    async fn list_after(&self, _after_id: i64, _limit: i64) -> Result<Vec<OutboxEvent>> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn max_id(&self) -> Result<i64> {
        self.check()?;
        Ok(0)
    }
}

fn consumer(source: Arc<EmptySource>) -> OutboxConsumer {
    let snapshots =
        SchedulerSnapshotService::new(Arc::new(InMemorySchedulerCache::new()), source.clone());
    OutboxConsumer::new(snapshots, source)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_store_kind() {
    let app = create_app(AppState::new(consumer(Arc::default()), "memory"));

    let (status, body) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["stores"], "memory");
}

#[tokio::test]
async fn outbox_health_tracks_consumer_cycles() {
    let source = Arc::new(EmptySource::default());
    let consumer = consumer(source.clone());
    let app = create_app(AppState::new(consumer.clone(), "memory"));

    consumer.poll_once().await.unwrap();
    let (status, body) = get_json(app.clone(), "/health/outbox").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["watermark"], 0);
    assert_eq!(body["lag"], 0);

    source.offline.store(true, Ordering::SeqCst);
    assert!(consumer.poll_once().await.is_err());
    let (status, body) = get_json(app, "/health/outbox").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["last_error"].is_string());
}
