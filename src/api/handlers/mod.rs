// src/api/handlers/mod.rs
mod health;
mod assessments;
mod payments;
pub mod ws;

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use serde_json::json;

use crate::errors::FlowError;

pub use health::health_check;
pub use assessments::submit_assessment;
pub use payments::{cancel_watch, checkout, current_subscription, payment_return, pending_payment};
pub use ws::{forward_ticks, ws_handler, FlowUpdate, WsBroker};

fn error_response(e: &FlowError) -> HttpResponse {
    let status = match e {
        FlowError::NoPendingPayment => StatusCode::NOT_FOUND,
        FlowError::AlreadyWatching(_) => StatusCode::CONFLICT,
        FlowError::InvalidTransition { .. } | FlowError::Config(_) => StatusCode::BAD_REQUEST,
        // upstream rejections keep their status so the UI can tell 402/403 apart
        FlowError::ApiError { status, .. } if (400..500).contains(status) => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        FlowError::ApiError { .. } | FlowError::Request(_) | FlowError::UnexpectedResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    HttpResponse::build(status).json(json!({
        "error": e.to_string(),
        "codes": e.api_codes(),
    }))
}
