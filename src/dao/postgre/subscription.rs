use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Error;
use uuid::Uuid;

use crate::{
    dao::SubscriptionStore,
    error,
    model::{make_callback_url, Added, Subscription, Table},
};

use super::QueryResult;

impl Table<Subscription> {
    pub async fn get_all(&self) -> Result<Vec<Subscription>, Error> {
        sqlx::query_as(
            r#"
            SELECT
                id, hub, topic, callback_url, created_at, updated_at, expires_at
            FROM "subscription"
            "#,
        )
        .persistent(true)
        .fetch_all(&self.pool)
        .await
    }

    /// Inserts a row for a new pair, or moves an existing row onto the
    /// callback url derived from `base_url`, in one transaction.
    pub async fn insert_or_rebase(
        &self,
        hub: &str,
        topic: &str,
        base_url: &str,
    ) -> Result<Added, Error> {
        let mut transaction = self.pool.begin().await?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let callback_url = make_callback_url(base_url, &id);

        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO "subscription" (id, hub, topic, callback_url, created_at, updated_at)
            VALUES($1, $2, $3, $4, $5, $5)
            ON CONFLICT (hub, topic) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&id)
        .bind(hub)
        .bind(topic)
        .bind(&callback_url)
        .bind(now)
        .fetch_optional(&mut *transaction)
        .await?;

        if inserted.is_some() {
            transaction.commit().await?;

            return Ok(Added {
                id,
                callback_url,
                previous_callback_url: None,
                created: true,
            });
        }

        let (id, stored_callback_url): (String, String) = sqlx::query_as(
            r#"
            SELECT id, callback_url
            FROM "subscription"
            WHERE hub = $1 AND topic = $2
            FOR UPDATE
            "#,
        )
        .bind(hub)
        .bind(topic)
        .fetch_one(&mut *transaction)
        .await?;

        let callback_url = make_callback_url(base_url, &id);
        let mut previous_callback_url = None;

        if callback_url != stored_callback_url {
            sqlx::query(
                r#"
                UPDATE "subscription"
                SET callback_url = $1, updated_at = $2, expires_at = NULL
                WHERE id = $3
                "#,
            )
            .bind(&callback_url)
            .bind(now)
            .bind(&id)
            .execute(&mut *transaction)
            .await?;

            previous_callback_url = Some(stored_callback_url);
        }

        transaction.commit().await?;

        Ok(Added {
            id,
            callback_url,
            previous_callback_url,
            created: false,
        })
    }

    pub async fn get_one(
        &self,
        hub: &str,
        topic: &str,
    ) -> Result<Option<Subscription>, Error> {
        sqlx::query_as(
            r#"
            SELECT
                id, hub, topic, callback_url, created_at, updated_at, expires_at
            FROM "subscription"
            WHERE
                hub = $1
            AND
                topic = $2
            "#,
        )
        .bind(hub)
        .bind(topic)
        .persistent(true)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_one_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Subscription>, Error> {
        sqlx::query_as(
            r#"
            SELECT
                id, hub, topic, callback_url, created_at, updated_at, expires_at
            FROM "subscription"
            WHERE id = $1
            "#,
        )
        .bind(id)
        .persistent(true)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn update_expiration(
        &self,
        hub: &str,
        topic: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<QueryResult, Error> {
        sqlx::query(
            r#"
            UPDATE "subscription"
            SET updated_at = $1, expires_at = $2
            WHERE hub = $3 AND topic = $4
            "#,
        )
        .bind(Utc::now())
        .bind(expires_at)
        .bind(hub)
        .bind(topic)
        .execute(&self.pool)
        .await
    }

    pub async fn delete(
        &self,
        hub: &str,
        topic: &str,
    ) -> Result<QueryResult, Error> {
        sqlx::query(
            r#"
            DELETE FROM "subscription" WHERE hub = $1 AND topic = $2
            "#,
        )
        .bind(hub)
        .bind(topic)
        .execute(&self.pool)
        .await
    }
}

#[async_trait]
impl SubscriptionStore for Table<Subscription> {
    async fn all(&self) -> Result<Vec<Subscription>, error::Error> {
        Ok(self.get_all().await?)
    }

    async fn add(
        &self,
        hub: &str,
        topic: &str,
        base_callback_url: &str,
    ) -> Result<Added, error::Error> {
        Ok(self.insert_or_rebase(hub, topic, base_callback_url).await?)
    }

    async fn get(
        &self,
        hub: &str,
        topic: &str,
    ) -> Result<Option<Subscription>, error::Error> {
        Ok(self.get_one(hub, topic).await?)
    }

    async fn get_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Subscription>, error::Error> {
        Ok(self.get_one_by_id(id).await?)
    }

    async fn set(
        &self,
        hub: &str,
        topic: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), error::Error> {
        self.update_expiration(hub, topic, expires_at).await?;
        Ok(())
    }

    async fn del(&self, hub: &str, topic: &str) -> Result<(), error::Error> {
        self.delete(hub, topic).await?;
        Ok(())
    }
}
