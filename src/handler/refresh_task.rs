//! Background lease refresh
//!
//! Runs one pass at startup, forced when `FORCE_REFRESH_ON_START` is set,
//! then one pass per refresh interval. Failed renewals are logged and picked
//! up again by a later pass.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::{
    client::Client,
    configuration::{AppState, State},
    error::Error,
};

pub async fn refresh_task(app_state: AppState<State>) -> Result<(), Error> {
    let period = app_state.config.refresh_interval();
    let mut force_update = app_state.config.force_refresh_on_start;

    info!(
        interval = ?period,
        force_update,
        "Starting subscription refresh background task"
    );

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        refresh_pass(&app_state.client, force_update, period).await;
        force_update = false;
    }
}

async fn refresh_pass(client: &Client, force_update: bool, period: Duration) {
    match client.refresh(force_update, period).await {
        Ok(()) => info!("pubsub: refresh pass complete"),
        Err(Error::Aggregate(errors)) => {
            for e in errors.iter() {
                error!(error = %e, "pubsub: renewal failed");
            }
            error!("pubsub: refresh pass finished with {}", errors);
        },
        Err(e) => error!(error = %e, "pubsub: refresh pass failed"),
    }
}
