use actix_web::web::Bytes;
use async_trait::async_trait;

use crate::model::Subscription;

pub use self::{
    log_message::LogMessageHandler, record_document::RecordDocumentHandler,
    refresh_task::refresh_task,
};

mod log_message;
mod record_document;
mod refresh_task;

/// One push received on the callback endpoint.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Last path segment of the callback url.
    pub id: String,
    /// Row the id resolved to, if any.
    pub subscription: Option<Subscription>,
    /// Url of the delivery's `rel="self"` link, empty when there is none.
    pub topic: String,
    pub body: Bytes,
}

/// Consumer of pushed content.
///
/// Called after the hub has already been answered, so there is nobody to
/// report a failure to; implementations log their own errors.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, delivery: Delivery);
}
