// src/api/handlers/assessments.rs
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::error_response;
use super::ws::{forward_ticks, FlowUpdate, WsBroker};
use crate::api::AppState;
use crate::assessment::{AssessmentOutcome, PronunciationRecorder};
use crate::models::AudioClip;

#[derive(Serialize)]
pub struct AssessmentResponse {
    pub id: String,
    pub paragraph_id: String,
    pub status: &'static str,
    pub outcome: AssessmentOutcome,
}

fn clip_from_request(req: &HttpRequest, paragraph_id: &str, body: web::Bytes) -> AudioClip {
    let mime_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with("audio/"))
        .unwrap_or("audio/webm")
        .to_string();
    let extension = mime_type
        .trim_start_matches("audio/")
        .split(';')
        .next()
        .unwrap_or("webm")
        .to_string();

    AudioClip {
        bytes: body.to_vec(),
        file_name: format!("{paragraph_id}.{extension}"),
        mime_type,
    }
}

/// POST /api/v1/assessments/{paragraph_id} - Assess a recorded paragraph
pub async fn submit_assessment(
    state: web::Data<AppState>,
    broker: web::Data<WsBroker>,
    path: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let paragraph_id = path.into_inner();
    if body.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "No audio recorded"
        })));
    }

    let id = Uuid::new_v4().to_string();
    let clip = clip_from_request(&req, &paragraph_id, body);

    let (ticks_tx, ticks_rx) = futures::channel::mpsc::unbounded();
    forward_ticks(broker.get_ref().clone(), id.clone(), "assessment", ticks_rx);

    // the browser captured the audio; replay the capture steps before submitting
    let mut recorder = PronunciationRecorder::new(state.client.clone(), state.config.poll.assessment.clone())
        .with_progress(ticks_tx);
    let submitted = match recorder
        .start_recording()
        .and_then(|_| recorder.stop_recording(Some(clip)))
    {
        Ok(()) => recorder.submit(&paragraph_id).await,
        Err(e) => Err(e),
    };

    match submitted {
        Ok(outcome) => {
            let status = outcome.status();
            broker
                .broadcast(FlowUpdate::new(id.clone(), "assessment", status))
                .await;

            Ok(HttpResponse::Ok().json(AssessmentResponse {
                id,
                paragraph_id,
                status,
                outcome,
            }))
        }
        Err(e) => {
            log::error!("Assessment for paragraph {} failed: {}", paragraph_id, e);
            broker
                .broadcast(FlowUpdate::new(id, "assessment", "error").with_detail(e.to_string()))
                .await;
            Ok(error_response(&e))
        }
    }
}
