#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the pine beetle prediction pipeline.
//!
//! Exposes the two pipeline entry points (`run all` and `run state+year`)
//! plus filterable read access to the summarized geography-year data for
//! researchers. Ingestion, CSV upload/download, and authentication live in
//! separate collaborating services.

mod handlers;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use pine_beetle_database::{db, run_migrations};
use pine_beetle_rmodel::ModelConfig;
use std::sync::Arc;
use switchy_database::Database;

/// Shared application state.
pub struct AppState {
    /// Database connection.
    pub db: Arc<dyn Database>,
    /// R script locations and subprocess settings.
    pub model: ModelConfig,
}

/// Starts the pipeline API server.
///
/// Connects to the database, runs migrations, and serves the HTTP API.
/// This is a regular async function — the caller provides the async
/// runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the database connection or migrations fail at startup.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env()
        .await
        .expect("Failed to connect to database");

    log::info!("Running migrations...");
    run_migrations(db_conn.as_ref())
        .await
        .expect("Failed to run migrations");

    let state = web::Data::new(AppState {
        db: Arc::from(db_conn),
        model: ModelConfig::from_env(),
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/pipeline", web::get().to(handlers::run_pipeline))
                    .route(
                        "/summarized-counties",
                        web::get().to(handlers::summarized_counties),
                    )
                    .route(
                        "/summarized-rangerdistricts",
                        web::get().to(handlers::summarized_ranger_districts),
                    ),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
