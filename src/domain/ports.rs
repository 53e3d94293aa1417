use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value store with TTL-on-write, the only shared mutable resource in
/// this crate. Values are opaque bytes so one store serves both serialized
/// record lists and raw document bodies. Implementations must provide
/// atomic get/set/delete per key; no cross-key transactions are required.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
}
