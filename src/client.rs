// src/client.rs

use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;

use crate::config::ApiConfig;
use crate::errors::{FlowError, Result};
use crate::models::{AttemptId, AudioClip, TransactionId};
use crate::normalizer;

/// Remote calls of the pronunciation-assessment flow.
///
/// Responses are returned as raw JSON; the normalizer decides what they mean.
pub trait AssessmentApi: Send + Sync {
    /// Uploads recorded audio for a paragraph. The backend answers with a
    /// bare attempt id or with a full attempt record.
    fn submit_assessment(&self, paragraph_id: &str, audio: AudioClip) -> impl Future<Output = Result<Value>> + Send;

    fn get_attempt_details(&self, attempt_id: &AttemptId) -> impl Future<Output = Result<Value>> + Send;
}

/// Remote calls of the payment and subscription flow.
pub trait BillingApi: Send + Sync {
    fn subscribe(&self, plan_id: &str, coupon_code: Option<&str>) -> impl Future<Output = Result<Value>> + Send;

    fn check_payment_status(&self, transaction_id: &TransactionId) -> impl Future<Output = Result<Value>> + Send;

    fn get_current_subscription(&self) -> impl Future<Output = Result<Value>> + Send;
}

/// reqwest-backed client for the EduTalks API.
#[derive(Clone)]
pub struct EduTalksClient {
    client: Client,
    config: ApiConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    plan_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    coupon_code: Option<&'a str>,
}

impl EduTalksClient {
    pub fn new(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    /// Builds the HTTP client with the configured per-request timeout.
    pub fn from_config(config: ApiConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::new(client, config))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let request = match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let start = Instant::now();
        let resp = request.send().await?;
        let status = resp.status();
        debug!("📥 {} response status: {} ({}ms)", what, status, start.elapsed().as_millis());

        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(FlowError::ApiError {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(FlowError::UnexpectedResponse(format!("{what} returned an empty body")));
        }
        // some endpoints answer with a bare id instead of JSON
        let value = serde_json::from_str(&body).unwrap_or_else(|_| Value::String(body.trim().to_string()));
        Ok(normalizer::unwrap_envelope(value))
    }
}

impl AssessmentApi for EduTalksClient {
    async fn submit_assessment(&self, paragraph_id: &str, audio: AudioClip) -> Result<Value> {
        let url = self.url(&format!("api/pronunciation/paragraphs/{paragraph_id}/assess"));
        debug!("📡 Submitting {} bytes of audio to {}", audio.bytes.len(), url);

        let part = Part::bytes(audio.bytes)
            .file_name(audio.file_name)
            .mime_str(&audio.mime_type)?;
        let form = Form::new().text("paragraphId", paragraph_id.to_string()).part("audio", part);

        self.send(self.client.post(&url).multipart(form), "submit assessment").await
    }

    async fn get_attempt_details(&self, attempt_id: &AttemptId) -> Result<Value> {
        let url = self.url(&format!("api/pronunciation/attempts/{attempt_id}"));
        self.send(self.client.get(&url), "attempt details").await
    }
}

impl BillingApi for EduTalksClient {
    async fn subscribe(&self, plan_id: &str, coupon_code: Option<&str>) -> Result<Value> {
        let url = self.url("api/subscriptions/subscribe");
        debug!("📡 Subscribing to plan {} via {}", plan_id, url);
        let body = SubscribeRequest { plan_id, coupon_code };
        self.send(self.client.post(&url).json(&body), "subscribe").await
    }

    async fn check_payment_status(&self, transaction_id: &TransactionId) -> Result<Value> {
        let url = self.url(&format!("api/payments/status/{transaction_id}"));
        self.send(self.client.get(&url), "payment status").await
    }

    async fn get_current_subscription(&self) -> Result<Value> {
        let url = self.url("api/subscriptions/current");
        self.send(self.client.get(&url), "current subscription").await
    }
}
