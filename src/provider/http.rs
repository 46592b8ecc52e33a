use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::{error::Error, model::Mode};

const USER_AGENT: &str = concat!("websub/", env!("CARGO_PKG_VERSION"));

/// Lease requested from hubs on every subscribe, in seconds (7 days).
const LEASE_SECONDS: u64 = 604800;

/// Hub side of the protocol: asks a hub to start or stop pushing a topic.
///
/// A successful call only means the hub accepted the request. Confirmation
/// arrives later as a challenge on the callback url.
#[derive(Debug, Clone)]
pub struct HTTP {
    pub http: Client,
    pub timeout: Duration,
}

impl HTTP {
    pub fn new(timeout: Duration) -> Result<HTTP, Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(HTTP { http, timeout })
    }

    pub async fn alter(
        &self,
        hub: &str,
        topic: &str,
        callback_url: &str,
        mode: Mode,
    ) -> Result<(), Error> {
        let lease_seconds = LEASE_SECONDS.to_string();
        let form = [
            ("hub.callback", callback_url),
            ("hub.mode", mode.as_str()),
            ("hub.topic", topic),
            ("hub.verify", "async"),
            ("hub.lease_seconds", lease_seconds.as_str()),
        ];

        debug!(hub, topic, callback_url, %mode, "pubsub: sending hub request");

        let response = self.http.post(hub).form(&form).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::HubStatus {
                hub: hub.to_owned(),
                mode: mode.into(),
                status: status.as_u16(),
            });
        }

        Ok(())
    }

    pub async fn subscribe(
        &self,
        hub: &str,
        topic: &str,
        callback_url: &str,
    ) -> Result<(), Error> {
        self.alter(hub, topic, callback_url, Mode::Subscribe).await
    }

    pub async fn unsubscribe(
        &self,
        hub: &str,
        topic: &str,
        callback_url: &str,
    ) -> Result<(), Error> {
        self.alter(hub, topic, callback_url, Mode::Unsubscribe).await
    }
}
