use chrono::{DateTime, Utc};

/// Raw delivery body as received on the callback endpoint.
#[derive(Debug)]
pub struct Document {
    pub subscription_id: String,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub body: String,
}
