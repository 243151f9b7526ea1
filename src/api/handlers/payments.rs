// src/api/handlers/payments.rs
use actix_web::{web, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;

use super::error_response;
use super::ws::{forward_ticks, FlowUpdate, WsBroker};
use crate::api::AppState;

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub plan_id: String,
    pub coupon_code: Option<String>,
}

#[derive(Deserialize)]
pub struct ReturnQuery {
    #[serde(rename = "transactionId", alias = "transaction_id")]
    pub transaction_id: Option<String>,
}

/// POST /api/v1/subscriptions/checkout - Start a purchase
pub async fn checkout(
    state: web::Data<AppState>,
    broker: web::Data<WsBroker>,
    req: web::Json<CheckoutRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let mut flow = state.subscription_flow();

    match flow.begin_checkout(&req.plan_id, req.coupon_code.as_deref()).await {
        Ok(checkout) => {
            broker
                .broadcast(FlowUpdate::new(checkout.transaction_id.to_string(), "payment", "submitted"))
                .await;
            Ok(HttpResponse::Ok().json(checkout))
        }
        Err(e) => {
            log::error!("Checkout for plan {} failed: {}", req.plan_id, e);
            Ok(error_response(&e))
        }
    }
}

/// GET /api/v1/subscriptions/current - Cached subscription, fetched on first use
pub async fn current_subscription(state: web::Data<AppState>) -> Result<HttpResponse> {
    if let Some(snapshot) = state.subscription.current().await {
        return Ok(HttpResponse::Ok().json(snapshot));
    }

    match state.subscription_flow().refresh_subscription().await {
        Ok(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        Err(e) => {
            log::error!("Failed to fetch current subscription: {}", e);
            Ok(error_response(&e))
        }
    }
}

/// GET /api/v1/payments/return - Landing point after the payment redirect.
/// Verification continues in the background and reports over the WebSocket.
pub async fn payment_return(
    state: web::Data<AppState>,
    broker: web::Data<WsBroker>,
    query: web::Query<ReturnQuery>,
) -> Result<HttpResponse> {
    let flow = state.subscription_flow();
    let (transaction_id, context) = match flow.recover(query.transaction_id.as_deref()).await {
        Ok(recovered) => recovered,
        Err(e) => return Ok(error_response(&e)),
    };

    let watch_key = transaction_id.to_string();
    let (token, cancel) = match state.watch(&watch_key).await {
        Ok(registered) => registered,
        Err(e) => return Ok(error_response(&e)),
    };

    let (ticks_tx, ticks_rx) = futures::channel::mpsc::unbounded();
    forward_ticks(broker.get_ref().clone(), watch_key.clone(), "payment", ticks_rx);

    let mut flow = flow.with_progress(ticks_tx).with_cancel(cancel);
    let plan_name = context.as_ref().and_then(|c| c.plan_name.clone());
    let state = state.get_ref().clone();
    let broker = broker.get_ref().clone();
    let task_key = watch_key.clone();
    let task_transaction = transaction_id.clone();

    actix_web::rt::spawn(async move {
        let outcome = flow.verify(task_transaction, context).await;
        drop(flow);
        state.finish_watch(&task_key, token).await;

        let detail = serde_json::to_string(&outcome).unwrap_or_default();
        broker
            .broadcast(FlowUpdate::new(task_key, "payment", outcome.status()).with_detail(detail))
            .await;
    });

    Ok(HttpResponse::Accepted().json(json!({
        "transaction_id": transaction_id,
        "status": "verifying_payment",
        "plan_name": plan_name,
    })))
}

/// GET /api/v1/payments/pending - The record kept across the redirect
pub async fn pending_payment(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.store.load().await {
        Ok(Some(record)) => Ok(HttpResponse::Ok().json(record)),
        Ok(None) => Ok(HttpResponse::NotFound().json(json!({
            "error": "No pending payment"
        }))),
        Err(e) => {
            log::error!("Failed to read pending payment: {}", e);
            Ok(error_response(&e))
        }
    }
}

/// DELETE /api/v1/payments/{transaction_id}/watch - Stop verifying (view closed)
pub async fn cancel_watch(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let transaction_id = path.into_inner();
    if state.unwatch(&transaction_id).await {
        log::info!("Stopped verifying payment {}", transaction_id);
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(HttpResponse::NotFound().json(json!({
            "error": format!("Payment {} is not being verified", transaction_id)
        })))
    }
}
