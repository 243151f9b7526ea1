// src/models.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of one pronunciation-assessment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

/// Handle of one payment transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl AttemptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a remote operation ended in failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Every error code the backend reported, in the order found.
    #[serde(default)]
    pub codes: Vec<String>,
    pub reason: String,
}

impl Failure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { codes: Vec::new(), reason: reason.into() }
    }

    pub fn with_code(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::with_codes(vec![code.into()], reason)
    }

    pub fn with_codes(codes: Vec<String>, reason: impl Into<String>) -> Self {
        Self { codes, reason: reason.into() }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

/// Canonical pronunciation scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub accuracy: f64,
    pub fluency: f64,
    pub overall: f64,
    pub mistakes: Vec<String>,
    pub word_feedback: Vec<WordFeedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordFeedback {
    pub word: String,
    pub accuracy_score: f64,
    pub error_type: Option<String>,
}

/// Settled payment as reported by the payment-status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub status: String,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub status: String,
    pub plan: Option<String>,
    pub renewal_date: Option<String>,
}

/// Response of the subscribe call: where to send the user and what to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkout {
    pub transaction_id: TransactionId,
    pub redirect_url: String,
    pub plan_name: Option<String>,
    pub amount_charged: Option<f64>,
    pub status: Option<String>,
}

/// The record that survives the external payment redirect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub transaction_id: TransactionId,
    pub plan_name: Option<String>,
    pub amount: Option<f64>,
    pub created_at: String,
}

impl PendingPayment {
    pub fn from_checkout(checkout: &Checkout) -> Self {
        Self {
            transaction_id: checkout.transaction_id.clone(),
            plan_name: checkout.plan_name.clone(),
            amount: checkout.amount_charged,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Captured audio ready for upload.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl AudioClip {
    pub fn webm(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "audio/webm".to_string(),
            file_name: "recording.webm".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_code_matches_any_reported_code() {
        let failure = Failure::with_codes(
            vec!["INVALID_AUDIO".to_string(), "SUBSCRIPTION_REQUIRED".to_string()],
            "rejected",
        );
        assert!(failure.has_code("SUBSCRIPTION_REQUIRED"));
        assert!(failure.has_code("INVALID_AUDIO"));
        assert!(!failure.has_code("E403"));
        assert!(!Failure::new("rejected").has_code("SUBSCRIPTION_REQUIRED"));
    }
}
