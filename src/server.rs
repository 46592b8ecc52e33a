use actix_web::{dev::Server, web, App, HttpServer};
use tracing::info;

use crate::{
    configuration::{AppState, State},
    controller::{callback, subscriptions},
    error::Error,
};

pub async fn server_task(app_state: &AppState<State>) -> Result<(), Error> {
    let app = app_state.clone();
    tokio::spawn(async move {
        let server = init_server(app)?;
        server.await?;
        Ok(())
    })
    .await?
}

fn init_server(app_state: AppState<State>) -> Result<Server, Error> {
    let host = app_state.config.server_host.to_owned();
    let port = app_state.config.port;

    info!(
        %host,
        port,
        callback_url = %app_state.config.callback_url(),
        "Starting server"
    );

    let server = HttpServer::new(move || {
        let callback_path = app_state.config.callback_path.to_owned();
        let max_body_size = app_state.config.max_body_size;

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().limit(4096))
            .service(
                web::scope("/api")
                    .service(subscriptions::index)
                    .service(subscriptions::subscribe)
                    .service(subscriptions::unsubscribe),
            )
            .service(callback::scope(&callback_path, max_body_size))
    })
    .bind((host, port))?
    .disable_signals()
    .run();
    Ok(server)
}
