mod classifier;
mod config;
mod error;
mod handlers;
mod models;
mod prediction;
mod preprocess;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::info;
use std::sync::Arc;

use crate::classifier::OnnxClassifier;
use crate::config::{AppConfig, ConfigSource};
use crate::preprocess::ImageSize;
use crate::state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, source) = AppConfig::load().context("failed to load configuration")?;
    match &source {
        ConfigSource::File(path) => info!("Using configuration from {}", path.display()),
        ConfigSource::Defaults => info!("No config file found, using built-in defaults"),
    }

    // Refuse to serve without a working model.
    let image_size = ImageSize::new(config.model.image_width, config.model.image_height);
    let model = OnnxClassifier::load(&config.model.path, image_size, config.classes.len())
        .with_context(|| format!("could not load model from {}", config.model.path.display()))?;

    let state = web::Data::new(AppState::new(Arc::new(model), &config));
    let origins = config.cors.allowed_origins.clone();

    let mut server = HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    let (host, port) = config.bind_address();
    info!("Server running at http://{}:{}", host, port);

    server
        .bind((host.as_str(), port))
        .with_context(|| format!("could not bind {}:{}", host, port))?
        .run()
        .await?;

    Ok(())
}
