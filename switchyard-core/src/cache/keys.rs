use switchyard_model::{AccountId, SchedulerBucket};

/// Key layout of the scheduler cache in the shared store.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerKeys;

impl SchedulerKeys {
    pub fn bucket_seq(bucket: &SchedulerBucket) -> String {
        format!("sched:bucket:{bucket}:seq")
    }

    /// Manifest key prefix; append the version number.
    pub fn manifest_prefix(bucket: &SchedulerBucket) -> String {
        format!("sched:bucket:{bucket}:v")
    }

    pub fn manifest(bucket: &SchedulerBucket, version: u64) -> String {
        format!("sched:bucket:{bucket}:v{version}")
    }

    pub fn active(bucket: &SchedulerBucket) -> String {
        format!("sched:bucket:{bucket}:active")
    }

    pub fn buckets() -> String {
        "sched:buckets".to_string()
    }

    pub fn account(id: AccountId) -> String {
        format!("sched:acc:{id}")
    }

    pub fn account_patch(id: AccountId) -> String {
        format!("sched:acc:{id}:patch")
    }

    /// Sequence shared by snapshot versions and account patches.
    pub fn write_seq() -> String {
        "sched:seq".to_string()
    }

    pub fn last_used() -> String {
        "sched:last_used".to_string()
    }

    pub fn lock(bucket: &SchedulerBucket) -> String {
        format!("sched:lock:{bucket}")
    }

    pub fn outbox_watermark() -> String {
        "sched:outbox:watermark".to_string()
    }
}
