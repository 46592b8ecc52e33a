use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::Error,
    model::{make_callback_url, Added, Subscription},
};

use super::SubscriptionStore;

#[derive(Debug, Default)]
struct Rows {
    by_key: HashMap<(String, String), Subscription>,
    by_id: HashMap<String, (String, String)>,
}

/// Store kept in process memory, for nodes running without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

fn key(hub: &str, topic: &str) -> (String, String) {
    (hub.to_owned(), topic.to_owned())
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn all(&self) -> Result<Vec<Subscription>, Error> {
        let rows = self.rows.lock().await;
        Ok(rows.by_key.values().cloned().collect())
    }

    async fn add(
        &self,
        hub: &str,
        topic: &str,
        base_callback_url: &str,
    ) -> Result<Added, Error> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();

        if let Some(item) = rows.by_key.get_mut(&key(hub, topic)) {
            let callback_url = make_callback_url(base_callback_url, &item.id);
            let mut previous_callback_url = None;

            if item.callback_url != callback_url {
                previous_callback_url = Some(std::mem::replace(
                    &mut item.callback_url,
                    callback_url.to_owned(),
                ));
                item.updated_at = now;
                item.expires_at = None;
            }

            return Ok(Added {
                id: item.id.to_owned(),
                callback_url,
                previous_callback_url,
                created: false,
            });
        }

        let id = Uuid::new_v4().to_string();
        let callback_url = make_callback_url(base_callback_url, &id);
        let item = Subscription {
            id: id.to_owned(),
            hub: hub.to_owned(),
            topic: topic.to_owned(),
            callback_url: callback_url.to_owned(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        };

        rows.by_id.insert(id.to_owned(), key(hub, topic));
        rows.by_key.insert(key(hub, topic), item);

        Ok(Added {
            id,
            callback_url,
            previous_callback_url: None,
            created: true,
        })
    }

    async fn get(
        &self,
        hub: &str,
        topic: &str,
    ) -> Result<Option<Subscription>, Error> {
        let rows = self.rows.lock().await;
        Ok(rows.by_key.get(&key(hub, topic)).cloned())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Subscription>, Error> {
        let rows = self.rows.lock().await;
        let item = rows
            .by_id
            .get(id)
            .and_then(|pair| rows.by_key.get(pair))
            .cloned();

        Ok(item)
    }

    async fn set(
        &self,
        hub: &str,
        topic: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;

        if let Some(item) = rows.by_key.get_mut(&key(hub, topic)) {
            item.updated_at = Utc::now();
            item.expires_at = Some(expires_at);
        }

        Ok(())
    }

    async fn del(&self, hub: &str, topic: &str) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;

        if let Some(item) = rows.by_key.remove(&key(hub, topic)) {
            rows.by_id.remove(&item.id);
        }

        Ok(())
    }
}
