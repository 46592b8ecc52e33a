use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Error,
    model::{Added, Subscription},
};

/// Durable subscription records keyed by (hub, topic) and by id.
///
/// Implementations apply `add`, `set` and `del` for one (hub, topic)
/// atomically with respect to each other. Storage errors are returned
/// unchanged; retry policy belongs to the caller.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn all(&self) -> Result<Vec<Subscription>, Error>;

    /// Creates the row for a new pair or rebases an existing one onto
    /// `base_callback_url`. A rebased row loses its lease.
    async fn add(
        &self,
        hub: &str,
        topic: &str,
        base_callback_url: &str,
    ) -> Result<Added, Error>;

    async fn get(
        &self,
        hub: &str,
        topic: &str,
    ) -> Result<Option<Subscription>, Error>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Subscription>, Error>;

    /// Records a confirmed lease. Called once per successful handshake.
    async fn set(
        &self,
        hub: &str,
        topic: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    async fn del(&self, hub: &str, topic: &str) -> Result<(), Error>;
}
