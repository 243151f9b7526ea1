use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use edutalks_flows::api::handlers::WsBroker;
use edutalks_flows::api::{configure_routes, AppState};
use edutalks_flows::{banner, config, pending};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Print the startup banner
    banner::print_banner();

    if let Err(e) = dotenvy::dotenv() {
        eprintln!("⚠️  Warning: Could not load .env file: {}", e);
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let app_config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load app configuration: {}", e);
            return Err(std::io::Error::other(e.to_string()));
        }
    };

    let pool = pending::init_db(&app_config.database_url)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to open database: {e}")))?;
    let store = Arc::new(pending::SqlitePendingStore::new(pool));

    let bind_addr = app_config.bind_addr.clone();
    let state = AppState::new(app_config, store)
        .map_err(|e| std::io::Error::other(format!("Failed to build HTTP client: {e}")))?;
    let broker = WsBroker::new();

    log::info!("🚀 Starting server on {}", bind_addr);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(broker.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}
