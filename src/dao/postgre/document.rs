use sqlx::Error;

use crate::model::{Document, Table};

use super::QueryResult;

impl Table<Document> {
    pub async fn insert(&self, document: Document) -> Result<QueryResult, Error> {
        sqlx::query(
            r#"
            INSERT INTO "document" (subscription_id, topic, created_at, body)
            VALUES($1, $2, $3, $4)
            "#,
        )
        .bind(&document.subscription_id)
        .bind(&document.topic)
        .bind(document.created_at)
        .bind(&document.body)
        .execute(&self.pool)
        .await
    }
}
