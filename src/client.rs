//! Subscription client
//!
//! Keeps (hub, topic) leases alive: [`Client::subscribe`] and
//! [`Client::unsubscribe`] drive the hub protocol against the store,
//! [`Client::refresh`] decides which leases are due and renews them through
//! a bounded worker group, rate limited per hub host. The callback side of
//! the handshake lands in [`Client::on_challenge`] and [`Client::on_message`].

use std::{sync::Arc, time::Duration};

use actix_web::web::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, debug_span, warn, Instrument};

use crate::{
    dao::SubscriptionStore,
    error::Error,
    handler::{Delivery, MessageHandler},
    model::{make_callback_url, Subscription},
    provider::HTTP,
    rate_limit::{host_of, RateLimiter},
    worker_group::WorkerGroup,
};

#[derive(Clone)]
pub struct Client {
    base_callback_url: String,
    store: Arc<dyn SubscriptionStore>,
    http: HTTP,
    limiter: Arc<RateLimiter>,
    max_workers: usize,
    on_message: Arc<dyn MessageHandler>,
}

impl Client {
    pub fn new(
        base_callback_url: &str,
        store: Arc<dyn SubscriptionStore>,
        http: HTTP,
        limiter: Arc<RateLimiter>,
        max_workers: usize,
        on_message: Arc<dyn MessageHandler>,
    ) -> Client {
        Client {
            base_callback_url: base_callback_url.trim_end_matches('/').to_owned(),
            store,
            http,
            limiter,
            max_workers,
            on_message,
        }
    }

    pub fn base_callback_url(&self) -> &str {
        &self.base_callback_url
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    pub fn expected_callback_url(&self, id: &str) -> String {
        make_callback_url(&self.base_callback_url, id)
    }

    /// Registers interest in `topic` at `hub`.
    ///
    /// Talks to the hub only when the row is new or its callback url moved;
    /// a moved row is unsubscribed at its old address first.
    pub async fn subscribe(&self, hub: &str, topic: &str) -> Result<(), Error> {
        self.alter_subscription(hub, topic, false).await
    }

    /// Re-issues the hub subscribe for an existing lease.
    pub async fn renew(&self, hub: &str, topic: &str) -> Result<(), Error> {
        self.alter_subscription(hub, topic, true).await
    }

    async fn alter_subscription(
        &self,
        hub: &str,
        topic: &str,
        renew: bool,
    ) -> Result<(), Error> {
        debug!(hub, topic, renew, "pubsub: subscribing");

        let added = self.store.add(hub, topic, &self.base_callback_url).await?;

        if !renew && !added.needs_hub_request() {
            debug!(id = %added.id, "pubsub: already subscribed");
            return Ok(());
        }

        if let Some(old_callback_url) = &added.previous_callback_url {
            debug!(
                id = %added.id,
                callback_url = %old_callback_url,
                new_callback_url = %added.callback_url,
                "pubsub: dropping old callback url"
            );
            // Best effort, the row already points at the new callback.
            if let Err(e) =
                self.http.unsubscribe(hub, topic, old_callback_url).await
            {
                warn!(
                    id = %added.id,
                    callback_url = %old_callback_url,
                    error = %e,
                    "pubsub: couldn't drop old callback url"
                );
            }
        }

        self.http.subscribe(hub, topic, &added.callback_url).await
    }

    /// Stops pushes for `topic` at `hub` and forgets the row. Unknown pairs
    /// are ignored.
    pub async fn unsubscribe(&self, hub: &str, topic: &str) -> Result<(), Error> {
        debug!(hub, topic, "pubsub: unsubscribing");

        let item = match self.store.get(hub, topic).await? {
            Some(item) => item,
            None => return Ok(()),
        };

        self.http
            .unsubscribe(&item.hub, &item.topic, &item.callback_url)
            .await?;
        self.store.del(&item.hub, &item.topic).await
    }

    /// Renews every verified lease that expires within `interval`, or all
    /// of them when `force_update` is set, plus any row whose callback url
    /// no longer matches the configured base.
    ///
    /// Renewals are rate limited per hub host; a renewal that cannot get a
    /// token in time is left for the next pass. Failures of individual
    /// renewals are collected into one aggregate error.
    pub async fn refresh(
        &self,
        force_update: bool,
        interval: Duration,
    ) -> Result<(), Error> {
        let items = self.store.all().await?;
        let now = Utc::now();
        let margin = TimeDelta::from_std(interval)?;
        let max_wait = interval.saturating_sub(self.http.timeout);

        debug!(count = items.len(), "pubsub: got subscriptions to refresh");

        let mut group = WorkerGroup::new();
        let mut failures = Vec::new();

        for item in items {
            let expected_callback_url = self.expected_callback_url(&item.id);
            let span = debug_span!(
                "refresh",
                id = %item.id,
                hub = %item.hub,
                topic = %item.topic,
                callback_url = %item.callback_url,
                new_callback_url = %expected_callback_url,
                expires_at = ?item.expires_at,
                force_update,
            );

            if !item.is_verified() {
                debug!(
                    parent: &span,
                    "pubsub: not refreshing subscription which has never been verified"
                );
                continue;
            }

            if !item.needs_renewal(
                now,
                margin,
                &expected_callback_url,
                force_update,
            ) {
                continue;
            }

            let host = match host_of(&item.hub) {
                Ok(host) => host,
                Err(e) => {
                    warn!(parent: &span, error = %e, "pubsub: couldn't parse hub url");
                    failures.push(e);
                    continue;
                },
            };

            let wait = match self.limiter.take_max_duration(&host, 1, max_wait).await
            {
                Some(wait) => wait,
                None => {
                    debug!(
                        parent: &span,
                        %host,
                        "pubsub: skipping renewing for now as we'd have to wait too long"
                    );
                    continue;
                },
            };

            group.add(self.clone().renewal(item, wait).instrument(span));
        }

        let result = group.run(self.max_workers).await;

        match (result, failures.is_empty()) {
            (Ok(()), true) => Ok(()),
            (Ok(()), false) => Err(Error::Aggregate(failures.into())),
            (Err(Error::Aggregate(errors)), _) => {
                failures.extend(errors.into_inner());
                Err(Error::Aggregate(failures.into()))
            },
            (Err(e), _) => {
                failures.push(e);
                Err(Error::Aggregate(failures.into()))
            },
        }
    }

    async fn renewal(
        self,
        item: Subscription,
        wait: Duration,
    ) -> Result<(), Error> {
        if !wait.is_zero() {
            debug!(duration = ?wait, "pubsub: waiting so as not to overwhelm the endpoint");
            tokio::time::sleep(wait).await;
        }

        debug!("pubsub: refreshing subscription");

        if let Err(e) = self.renew(&item.hub, &item.topic).await {
            warn!(error = %e, "pubsub: couldn't subscribe to topic");
            return Err(e);
        }

        debug!("pubsub: subscribed successfully");

        Ok(())
    }

    /// Confirms a hub's verification request for subscription `id` and
    /// records the granted lease.
    pub async fn on_challenge(
        &self,
        id: &str,
        topic: &str,
        mode: &str,
        lease_time: TimeDelta,
    ) -> Result<(), Error> {
        debug!(id, topic, mode, lease_time = %lease_time, "pubsub: received challenge");

        let item = match self.store.get_by_id(id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(id, "pubsub: subscription not found during challenge");
                return Err(Error::SubscriptionNotFound(id.to_owned()));
            },
            Err(e) => {
                warn!(id, error = %e, "pubsub: error fetching subscription during challenge");
                return Err(e);
            },
        };

        let expires_at = Utc::now()
            .checked_add_signed(lease_time)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.store.set(&item.hub, &item.topic, expires_at).await
    }

    /// Hands a pushed document to the message handler. Lookup failures drop
    /// the delivery; the hub has already been told it was accepted.
    pub async fn on_message(&self, id: &str, topic: &str, body: Bytes) {
        debug!(id, topic, size = body.len(), "pubsub: received message");

        let subscription = match self.store.get_by_id(id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(id, error = %e, "pubsub: error fetching subscription during reception");
                return;
            },
        };

        self.on_message
            .on_message(Delivery {
                id: id.to_owned(),
                subscription,
                topic: topic.to_owned(),
                body,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::dao::MemoryStore;

    const TOPIC: &str = "https://feed.example/atom";
    const BASE: &str = "https://node.example/pubsub";
    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct Recorder {
        deliveries: Mutex<Vec<Delivery>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, delivery: Delivery) {
            self.deliveries.lock().unwrap().push(delivery);
        }
    }

    fn client_with(
        base: &str,
        store: Arc<dyn SubscriptionStore>,
        limiter: Arc<RateLimiter>,
        on_message: Arc<dyn MessageHandler>,
    ) -> Client {
        let http = HTTP::new(Duration::from_secs(5)).unwrap();
        Client::new(base, store, http, limiter, 20, on_message)
    }

    fn client(base: &str, store: Arc<dyn SubscriptionStore>) -> Client {
        client_with(
            base,
            store,
            Arc::new(RateLimiter::new(4, MINUTE)),
            Arc::new(Recorder::default()),
        )
    }

    async fn accepting_hub() -> MockServer {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&hub)
            .await;
        hub
    }

    fn form_requests(bodies: &[wiremock::Request]) -> Vec<String> {
        bodies
            .iter()
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect()
    }

    fn encoded(value: &str) -> String {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }

    #[tokio::test]
    async fn repeated_subscribe_talks_to_hub_once() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("hub.mode=subscribe"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&hub)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());

        client.subscribe(&hub.uri(), TOPIC).await.unwrap();
        let first = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();

        client.subscribe(&hub.uri(), TOPIC).await.unwrap();
        let second = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.callback_url, second.callback_url);
        assert_eq!(second.callback_url, format!("{}/{}", BASE, second.id));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn base_url_change_moves_callback() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let old = client("https://old.example/pubsub", store.clone());

        old.subscribe(&hub.uri(), TOPIC).await.unwrap();
        let item = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();
        old.on_challenge(&item.id, TOPIC, "subscribe", TimeDelta::hours(1))
            .await
            .unwrap();
        assert!(store.get(&hub.uri(), TOPIC).await.unwrap().unwrap().is_verified());

        let new = client("https://new.example/pubsub/", store.clone());
        new.subscribe(&hub.uri(), TOPIC).await.unwrap();

        let moved = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();
        assert_eq!(moved.id, item.id);
        assert_eq!(
            moved.callback_url,
            format!("https://new.example/pubsub/{}", item.id)
        );
        assert_eq!(moved.expires_at, None);

        let requests = form_requests(&hub.received_requests().await.unwrap());
        assert_eq!(requests.len(), 3);
        assert!(requests[1].contains("hub.mode=unsubscribe"));
        assert!(requests[1].contains(&encoded(&item.callback_url)));
        assert!(requests[2].contains("hub.mode=subscribe"));
        assert!(requests[2].contains(&encoded(&moved.callback_url)));
    }

    #[tokio::test]
    async fn failed_old_callback_unsubscribe_still_subscribes_new_one() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("hub.mode=unsubscribe"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&hub)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("hub.mode=subscribe"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&hub)
            .await;

        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let old = client("https://old.example/pubsub", store.clone());

        old.subscribe(&hub.uri(), TOPIC).await.unwrap();
        let item = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();
        old.on_challenge(&item.id, TOPIC, "subscribe", TimeDelta::hours(1))
            .await
            .unwrap();

        let new = client("https://new.example/pubsub", store.clone());
        new.subscribe(&hub.uri(), TOPIC).await.unwrap();

        let moved = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();
        assert_eq!(
            moved.callback_url,
            format!("https://new.example/pubsub/{}", item.id)
        );

        let requests = form_requests(&hub.received_requests().await.unwrap());
        assert_eq!(requests.len(), 3);
        assert!(requests[1].contains("hub.mode=unsubscribe"));
        assert!(requests[2].contains("hub.mode=subscribe"));
        assert!(requests[2].contains(&encoded(&moved.callback_url)));
    }

    #[tokio::test]
    async fn unsubscribe_removes_row() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());

        client.subscribe(&hub.uri(), TOPIC).await.unwrap();
        let item = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();

        client.unsubscribe(&hub.uri(), TOPIC).await.unwrap();

        assert_eq!(store.get(&hub.uri(), TOPIC).await.unwrap(), None);

        let requests = form_requests(&hub.received_requests().await.unwrap());
        assert_eq!(requests.len(), 2);
        assert!(requests[1].contains("hub.mode=unsubscribe"));
        assert!(requests[1].contains(&encoded(&item.callback_url)));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_pair_is_noop() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&hub)
            .await;

        let client = client(BASE, Arc::new(MemoryStore::new()));

        client.unsubscribe(&hub.uri(), TOPIC).await.unwrap();
    }

    #[tokio::test]
    async fn hub_failure_is_returned() {
        let hub = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&hub)
            .await;

        let client = client(BASE, Arc::new(MemoryStore::new()));

        assert!(matches!(
            client.subscribe(&hub.uri(), TOPIC).await,
            Err(Error::HubStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn refresh_selects_only_due_leases() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());
        let now = Utc::now();

        let never = format!("{}/never", TOPIC);
        let soon = format!("{}/soon", TOPIC);
        let later = format!("{}/later", TOPIC);

        for topic in [&never, &soon, &later] {
            store.add(&hub.uri(), topic, BASE).await.unwrap();
        }
        store
            .set(&hub.uri(), &soon, now + TimeDelta::seconds(10))
            .await
            .unwrap();
        store
            .set(&hub.uri(), &later, now + TimeDelta::hours(1))
            .await
            .unwrap();

        client.refresh(false, MINUTE).await.unwrap();

        let requests = form_requests(&hub.received_requests().await.unwrap());
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains(&encoded(&soon)));

        assert_eq!(
            store.get(&hub.uri(), &never).await.unwrap().unwrap().expires_at,
            None
        );
    }

    #[tokio::test]
    async fn forced_refresh_renews_every_verified_lease() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());

        for i in 0..3 {
            let topic = format!("{}/{}", TOPIC, i);
            store.add(&hub.uri(), &topic, BASE).await.unwrap();
            store
                .set(&hub.uri(), &topic, Utc::now() + TimeDelta::days(3))
                .await
                .unwrap();
        }
        store.add(&hub.uri(), TOPIC, BASE).await.unwrap();

        client.refresh(true, MINUTE).await.unwrap();

        assert_eq!(hub.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn refresh_follows_moved_base_url() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());

        store.add(&hub.uri(), TOPIC, "https://old.example/pubsub").await.unwrap();
        store
            .set(&hub.uri(), TOPIC, Utc::now() + TimeDelta::days(3))
            .await
            .unwrap();

        let client = client(BASE, store.clone());
        client.refresh(false, MINUTE).await.unwrap();

        let item = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();
        assert_eq!(item.callback_url, client.expected_callback_url(&item.id));
        assert_eq!(item.expires_at, None);

        let requests = form_requests(&hub.received_requests().await.unwrap());
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("hub.mode=unsubscribe"));
        assert!(requests[1].contains("hub.mode=subscribe"));
    }

    #[tokio::test]
    async fn refresh_isolates_failing_hub() {
        let good = accepting_hub().await;
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad)
            .await;

        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());
        let soon = Utc::now() + TimeDelta::seconds(10);

        for hub in [good.uri(), bad.uri()] {
            store.add(&hub, TOPIC, BASE).await.unwrap();
            store.set(&hub, TOPIC, soon).await.unwrap();
        }

        let result = client.refresh(false, MINUTE).await;

        match result {
            Err(Error::Aggregate(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors.to_string().contains("got 500"));
            },
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(good.received_requests().await.unwrap().len(), 1);

        // The hub that accepted the renewal confirms it later.
        let item = store.get(&good.uri(), TOPIC).await.unwrap().unwrap();
        client
            .on_challenge(&item.id, TOPIC, "subscribe", TimeDelta::days(7))
            .await
            .unwrap();
        let renewed = store.get(&good.uri(), TOPIC).await.unwrap().unwrap();
        assert!(renewed.expires_at.unwrap() > soon);
    }

    #[tokio::test]
    async fn refresh_is_rate_limited_per_host() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());
        let soon = Utc::now() + TimeDelta::seconds(10);

        for i in 0..5 {
            let topic = format!("{}/{}", TOPIC, i);
            store.add(&hub.uri(), &topic, BASE).await.unwrap();
            store.set(&hub.uri(), &topic, soon).await.unwrap();
        }

        client.refresh(false, MINUTE).await.unwrap();

        assert_eq!(hub.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn refresh_reports_bad_hub_urls_without_aborting() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());
        let soon = Utc::now() + TimeDelta::seconds(10);

        for hub in [hub.uri(), String::from("mailto:hub@example.com")] {
            store.add(&hub, TOPIC, BASE).await.unwrap();
            store.set(&hub, TOPIC, soon).await.unwrap();
        }

        let result = client.refresh(false, MINUTE).await;

        assert!(matches!(result, Err(Error::Aggregate(ref e)) if e.len() == 1));
        assert_eq!(hub.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn challenge_for_unknown_id_writes_nothing() {
        let hub = "https://hub.example/";
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let client = client(BASE, store.clone());

        store.add(hub, TOPIC, BASE).await.unwrap();
        store
            .set(hub, TOPIC, Utc::now() + TimeDelta::days(3))
            .await
            .unwrap();
        let seeded = store.get(hub, TOPIC).await.unwrap().unwrap();

        let result = client
            .on_challenge("missing", TOPIC, "subscribe", TimeDelta::hours(1))
            .await;

        assert!(matches!(result, Err(Error::SubscriptionNotFound(_))));

        let item = store.get(hub, TOPIC).await.unwrap().unwrap();
        assert_eq!(item.expires_at, seeded.expires_at);
        assert_eq!(item.updated_at, seeded.updated_at);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_reaches_handler_with_subscription() {
        let hub = accepting_hub().await;
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let client = client_with(
            BASE,
            store.clone(),
            Arc::new(RateLimiter::new(4, MINUTE)),
            recorder.clone(),
        );

        client.subscribe(&hub.uri(), TOPIC).await.unwrap();
        let item = store.get(&hub.uri(), TOPIC).await.unwrap().unwrap();

        client
            .on_message(&item.id, TOPIC, Bytes::from_static(b"<feed/>"))
            .await;
        client
            .on_message("missing", "", Bytes::from_static(b"<feed/>"))
            .await;

        let deliveries = recorder.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].subscription.as_ref(), Some(&item));
        assert_eq!(deliveries[0].topic, TOPIC);
        assert_eq!(&deliveries[0].body[..], b"<feed/>");
        assert_eq!(deliveries[1].id, "missing");
        assert_eq!(deliveries[1].subscription, None);
    }
}
