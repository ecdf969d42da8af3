use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::*;

pub use addon_discovery_operator::{self, controllers::MAX_REQUEUE_INTERVAL, telemetry, State};

const MAX_REQUEUE_SECONDS: u64 = MAX_REQUEUE_INTERVAL.as_secs();

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Domain of the `feature.<domain>/addon-<name>` labels written to ManagedClusters
    #[arg(
        long = "label-domain",
        env = "ADDON_LABEL_DOMAIN",
        value_name = "DOMAIN",
        default_value = "open-cluster-management.io"
    )]
    label_domain: String,

    /// Number of objects each controller reconciles concurrently
    #[arg(
        long = "workers",
        env = "ADDON_DISCOVERY_WORKERS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    workers: u16,

    #[arg(
        long = "bind-address",
        env = "ADDON_DISCOVERY_BIND_ADDRESS",
        default_value = "0.0.0.0:8080"
    )]
    bind_address: String,

    /// Upper bound of the per-key retry backoff
    #[arg(
        long = "max-retry-backoff-seconds",
        env = "ADDON_DISCOVERY_MAX_RETRY_BACKOFF_SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(..=MAX_REQUEUE_SECONDS)
    )]
    max_retry_backoff_seconds: u64,

    /// Period of the full resync of every ManagedCluster
    #[arg(
        long = "resync-interval-seconds",
        env = "ADDON_DISCOVERY_RESYNC_INTERVAL_SECONDS",
        default_value_t = 600,
        value_parser = clap::value_parser!(u64).range(1..=MAX_REQUEUE_SECONDS)
    )]
    resync_interval_seconds: u64,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args: Arguments = Arguments::parse();

    // Initiatilize Kubernetes controller state
    let state = State::new(
        args.label_domain,
        args.workers,
        Duration::from_secs(args.max_retry_backoff_seconds),
        Duration::from_secs(args.resync_interval_seconds),
    );
    let shutdown = CancellationToken::new();

    // Start web server
    let server = HttpServer::new({
        let state = state.clone();
        move || {
            App::new()
                .app_data(Data::new(state.clone()))
                .wrap(middleware::Logger::default().exclude("/health"))
                .service(index)
                .service(health)
                .service(metrics)
        }
    })
    .bind(&args.bind_address)?
    .shutdown_timeout(5)
    .disable_signals()
    .run();
    let server_handle = server.handle();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    let controller = {
        let shutdown = shutdown.clone();
        async move {
            let res = addon_discovery_operator::run(state, shutdown.clone()).await;
            // the web server has nothing left to report once the controller is gone
            shutdown.cancel();
            server_handle.stop(true).await;
            res
        }
    };

    // Both runtimes implement graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server?;
    Ok(())
}
