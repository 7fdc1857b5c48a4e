use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use gatekeeper::config::CorsConfig;
use gatekeeper::scheduler::{self, Job};
use gatekeeper::{configure, AppState, Settings};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // Same-origin only
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
    };

    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new().context("loading configuration")?;
    info!(environment = %config.environment, "Configuration loaded successfully");

    let state = AppState::new(config.clone())
        .await
        .context("initializing application state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut jobs = vec![scheduler::spawn(
        state.promoter.clone() as Arc<dyn Job>,
        Duration::from_secs(config.waiting_list.promotion_interval_secs),
        shutdown_rx.clone(),
    )];
    if config.subscription.sweep_enabled {
        jobs.push(scheduler::spawn(
            state.sweeper.clone() as Arc<dyn Job>,
            Duration::from_secs(config.subscription.sweep_interval_secs),
            shutdown_rx,
        ));
    }

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
        .context("binding listener")?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let state = web::Data::new(state);
    let server_config = config.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(cors(&server_config.cors))
            .app_data(state.clone())
            .configure(|cfg| configure(cfg, &server_config.auth.internal_token))
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await?;

    info!("Server stopped, waiting for background jobs");
    shutdown_tx.send(true).ok();
    for job in jobs {
        job.await.ok();
    }

    Ok(())
}
