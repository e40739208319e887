use std::net::TcpListener;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use transaction_pipeline::broker::BrokerConnection;
use transaction_pipeline::configuration::get_configuration;
use transaction_pipeline::consumer::run_consumer;
use transaction_pipeline::producer::run_producer;
use transaction_pipeline::run;
use transaction_pipeline::store::Store;
use transaction_pipeline::telemetry::{get_subscriber, init_subscriber};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber(
        "transaction-pipeline".to_string(),
        "info".to_string(),
        std::io::stdout,
    );
    init_subscriber(subscriber);

    let settings = get_configuration()?;

    // Both wrappers are constructed exactly once and shared by reference;
    // a constructor failure here is fatal to startup.
    let broker = Arc::new(
        BrokerConnection::connect(&settings.broker.uri, &settings.broker.queue_name).await?,
    );
    let store = Arc::new(
        Store::open(
            &settings.database.connection_string(),
            &settings.database.schema_name,
        )
        .await?,
    );

    let listener = TcpListener::bind(("127.0.0.1", settings.application_port))?;
    tracing::info!("Listening on port {}", settings.application_port);

    let server = run(listener, store.clone())?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let cancel = CancellationToken::new();
    let producer_task = tokio::spawn(run_producer(
        broker.clone(),
        settings.producer.clone(),
        cancel.clone(),
    ));
    let consumer_task = tokio::spawn(run_consumer(broker, store, cancel.clone()));

    tracing::info!("Press CTRL+C to exit");
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping tasks");

    cancel.cancel();
    server_handle.stop(true).await;

    if let Err(e) = producer_task.await {
        tracing::error!("Producer task panicked: {e}");
    }
    match consumer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Consumer task failed: {e}"),
        Err(e) => tracing::error!("Consumer task panicked: {e}"),
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server error: {e}"),
        Err(e) => tracing::error!("Server task panicked: {e}"),
    }

    tracing::info!("All tasks finished, exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
