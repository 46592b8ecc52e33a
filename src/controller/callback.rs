//! Callback endpoint hubs talk to.
//!
//! `GET` with `hub.challenge` verifies a (un)subscription, `POST` delivers
//! content. The subscription id is the last segment of the request path.

use actix_web::{
    get, http::header::ContentType, post, web, HttpRequest, HttpResponse,
    Scope,
};
use tracing::debug;

use crate::{
    configuration::{AppState, State},
    helpers::{parse_lease, self_link},
};

pub fn scope(path: &str, max_body_size: usize) -> Scope {
    web::scope(path)
        .app_data(web::PayloadConfig::new(max_body_size))
        .service(challenge)
        .service(delivery)
        .default_service(web::to(method_not_allowed))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub challenge: Option<String>,
    pub topic: Option<String>,
    pub mode: Option<String>,
    pub lease_seconds: Option<String>,
}

impl Query {
    /// Picks the `hub.*` parameters out of a query string. A repeated key
    /// keeps its first value.
    pub fn parse(query: &str) -> Query {
        let mut parsed = Query::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "hub.challenge" => &mut parsed.challenge,
                "hub.topic" => &mut parsed.topic,
                "hub.mode" => &mut parsed.mode,
                "hub.lease_seconds" => &mut parsed.lease_seconds,
                _ => continue,
            };

            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        parsed
    }
}

fn subscription_id(tail: &str) -> &str {
    tail.rsplit('/').next().unwrap_or_default()
}

#[get("/{tail:.*}")]
pub async fn challenge(
    state: web::Data<AppState<State>>,
    tail: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let query = Query::parse(req.query_string());

    let echo = match query.challenge {
        Some(value) if !value.is_empty() => value,
        _ => return method_not_allowed().await,
    };

    let id = subscription_id(&tail);
    let topic = query.topic.unwrap_or_default();
    let mode = query.mode.unwrap_or_default();
    let lease_time = parse_lease(query.lease_seconds.as_deref());

    if let Err(e) = state
        .client
        .on_challenge(id, &topic, &mode, lease_time)
        .await
    {
        debug!(id, error = %e, "pubsub: rejecting challenge");
        return HttpResponse::NotFound().finish();
    }

    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(echo)
}

#[post("/{tail:.*}")]
pub async fn delivery(
    state: web::Data<AppState<State>>,
    tail: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let id = subscription_id(&tail).to_owned();
    let topic = self_link(req.headers()).unwrap_or_default();
    let client = state.client.clone();

    tokio::spawn(async move {
        client.on_message(&id, &topic, body).await;
    });

    HttpResponse::Accepted().finish()
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}
