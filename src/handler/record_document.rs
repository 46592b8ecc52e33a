use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};

use crate::model::{Document, Table};

use super::{Delivery, MessageHandler};

/// Keeps the raw body of every delivery for a known subscription, then
/// passes the delivery on.
pub struct RecordDocumentHandler {
    table: Table<Document>,
    next: Arc<dyn MessageHandler>,
}

impl RecordDocumentHandler {
    pub fn new(
        table: Table<Document>,
        next: Arc<dyn MessageHandler>,
    ) -> RecordDocumentHandler {
        RecordDocumentHandler { table, next }
    }
}

fn to_document(delivery: &Delivery) -> Option<Document> {
    delivery.subscription.as_ref()?;

    let topic = if delivery.topic.is_empty() {
        None
    } else {
        Some(delivery.topic.to_owned())
    };

    Some(Document {
        subscription_id: delivery.id.to_owned(),
        topic,
        created_at: Utc::now(),
        body: String::from_utf8_lossy(&delivery.body).into_owned(),
    })
}

#[async_trait]
impl MessageHandler for RecordDocumentHandler {
    async fn on_message(&self, delivery: Delivery) {
        match to_document(&delivery) {
            Some(document) => {
                if let Err(e) = self.table.insert(document).await {
                    error!(id = %delivery.id, error = %e, "pubsub: couldn't record document");
                }
            },
            None => {
                debug!(id = %delivery.id, "pubsub: not recording document for unknown subscription");
            },
        }

        self.next.on_message(delivery).await;
    }
}
