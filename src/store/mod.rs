//! Key-value store clients.
//!
//! The telemetry loop publishes every calibrated channel under
//! `<namespace>::read::<quantity>::<location>` and polls the operator's logging flag at
//! `<namespace>::logging::start`. Both operations go through [`KeyValueStore`], so the
//! loop runs the same against a Redis server or the in-process [`InMemoryStore`].
//!
//! # Available Stores
//!
//! - [`RedisStore`]: RESP2 client over TCP. Batches are sent as one `MSET`.
//! - [`InMemoryStore`]: process-local map, for tests and bench setups without a server.

pub mod memory;
pub mod redis;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

use crate::data::channel::Channel;
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A string key-value store shared by the telemetry context.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write all `entries` as one batch, giving up after `timeout`.
    ///
    /// A batch either completes or reports an error; callers do not retry partial
    /// writes.
    async fn batch_write(
        &self,
        entries: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), StoreError>;

    /// Current value of `key`, `None` if the key does not exist.
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn batch_write(
        &self,
        entries: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), StoreError> {
        (**self).batch_write(entries, timeout).await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).read(key).await
    }
}

/// Key names under one namespace, built once at startup.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    measurements: [String; Channel::COUNT],
    control: String,
}

impl StoreKeys {
    /// Keys under `namespace`, e.g. `utec`.
    pub fn new(namespace: &str) -> Self {
        Self {
            measurements: Channel::ALL.map(|channel| {
                format!(
                    "{namespace}::read::{}::{}",
                    channel.quantity(),
                    channel.location()
                )
            }),
            control: format!("{namespace}::logging::start"),
        }
    }

    /// Key a channel's calibrated value is published under.
    pub fn measurement(&self, channel: Channel) -> &str {
        &self.measurements[channel.index()]
    }

    /// Key of the operator's logging flag.
    pub fn control(&self) -> &str {
        &self.control
    }
}
