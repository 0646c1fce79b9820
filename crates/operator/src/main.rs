//! Operator entrypoint

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware, web::Data,
};
use kube::Client;
use labelkeeper::{Settings, State, lease, run, telemetry};
use tokio::sync::watch;
use tracing::{info, instrument};

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
#[instrument(level = "info", target = "operator::main", name = "main")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    telemetry::init(&settings)?;

    let client = Client::try_default().await?;
    info!("kubernetes client initialized successfully");

    let (leader_tx, leader_rx) = watch::channel(false);
    tokio::spawn(lease::run_leader_election(
        client.clone(),
        settings.lease_name.clone(),
        leader_tx,
    ));

    let state = State::default();
    let controller = run(state.clone(), client, settings.clone(), leader_rx);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(index)
    })
    .bind(&settings.bind_address)?
    .shutdown_timeout(5)
    .run();
    let server_handle = server.handle();

    tokio::select! {
        result = controller => {
            server_handle.stop(true).await;
            result?;
        }
        result = server => result?,
    }

    Ok(())
}
