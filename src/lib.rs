use std::net::TcpListener;
use std::sync::Arc;

use actix_web::{dev::Server, get, web, App, HttpResponse, HttpServer, Responder};
use tracing_actix_web::TracingLogger;

use crate::store::Store;

pub mod broker;
pub mod configuration;
pub mod consumer;
pub mod model;
pub mod producer;
pub mod routes;
pub mod store;
pub mod telemetry;

#[get("/")]
async fn health() -> impl Responder {
    HttpResponse::Ok()
}

pub fn run(listener: TcpListener, store: Arc<Store>) -> Result<Server, std::io::Error> {
    let store = web::Data::from(store);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(store.clone())
            .service(routes::get_transactions)
            .service(health)
    })
    // Shutdown is coordinated by the supervisor, not per-server handlers
    .disable_signals()
    .listen(listener)?
    .run();

    Ok(server)
}
