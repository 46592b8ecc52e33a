use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    configuration::{AppState, State},
    error::Error,
    model::Subscription,
};

#[get("/subscriptions")]
pub async fn index(
    state: web::Data<AppState<State>>,
) -> Result<impl Responder, Error> {
    let mut items = state.client.store().all().await?;
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    Ok(web::Json(items))
}

#[post("/subscriptions")]
pub async fn subscribe(
    state: web::Data<AppState<State>>,
    data: web::Json<Request>,
) -> Result<HttpResponse, Error> {
    data.validate()?;

    state.client.subscribe(&data.hub, &data.topic).await?;

    let subscription = state.client.store().get(&data.hub, &data.topic).await?;

    Ok(HttpResponse::Accepted().json(Response { subscription }))
}

#[delete("/subscriptions")]
pub async fn unsubscribe(
    state: web::Data<AppState<State>>,
    data: web::Json<Request>,
) -> Result<HttpResponse, Error> {
    state.client.unsubscribe(&data.hub, &data.topic).await?;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub hub: String,
    pub topic: String,
}

impl Request {
    fn validate(&self) -> Result<(), Error> {
        Url::parse(&self.hub)?;
        Url::parse(&self.topic)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub subscription: Option<Subscription>,
}
