use async_trait::async_trait;
use tracing::{info, warn};

use super::{Delivery, MessageHandler};

#[derive(Debug, Default)]
pub struct LogMessageHandler;

#[async_trait]
impl MessageHandler for LogMessageHandler {
    async fn on_message(&self, delivery: Delivery) {
        match &delivery.subscription {
            Some(subscription) => info!(
                id = %delivery.id,
                hub = %subscription.hub,
                topic = %delivery.topic,
                size = delivery.body.len(),
                "pubsub: message received"
            ),
            None => warn!(
                id = %delivery.id,
                topic = %delivery.topic,
                size = delivery.body.len(),
                "pubsub: message received for unknown subscription"
            ),
        }
    }
}
