// src/api/routes.rs
use actix_web::web;
use super::handlers;

/// Recorded paragraphs are a few hundred KB; leave room for long takes.
const MAX_AUDIO_BYTES: usize = 16 * 1024 * 1024;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_AUDIO_BYTES))
        .route("/ws", web::get().to(handlers::ws_handler))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(handlers::health_check))
                .route("/assessments/{paragraph_id}", web::post().to(handlers::submit_assessment))
                .service(
                    web::scope("/subscriptions")
                        .route("/checkout", web::post().to(handlers::checkout))
                        .route("/current", web::get().to(handlers::current_subscription))
                )
                .service(
                    web::scope("/payments")
                        .route("/return", web::get().to(handlers::payment_return))
                        .route("/pending", web::get().to(handlers::pending_payment))
                        .route("/{transaction_id}/watch", web::delete().to(handlers::cancel_watch))
                )
        );
}
