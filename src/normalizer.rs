// src/normalizer.rs

//! Collapses the backend's many response shapes into canonical records.
//!
//! The same concept shows up under different casings and nestings
//! (`accuracy`, `pronunciationAccuracy`, `scores.accuracy`, ...), so every
//! canonical field is resolved from a static, ordered list of candidate key
//! paths. The first path that is present and non-null wins.
//!
//! Everything here is pure: no I/O, never panics on missing fields, and
//! classifying the same value twice yields the same verdict.

use serde_json::Value;

use crate::models::{
    AttemptId, Checkout, Failure, PaymentReceipt, ScoreCard, SubscriptionSnapshot, TransactionId,
    WordFeedback,
};
use crate::poller::Verdict;

pub const ACCURACY_PATHS: &[&str] = &[
    "scores.accuracy",
    "accuracy",
    "pronunciationAccuracy",
    "PronunciationAccuracy",
    "accuracyScore",
    "AccuracyScore",
    "scores.pronunciationAccuracy",
];

pub const FLUENCY_PATHS: &[&str] = &[
    "scores.fluency",
    "fluency",
    "fluencyScore",
    "FluencyScore",
    "scores.fluencyScore",
];

pub const OVERALL_PATHS: &[&str] = &[
    "scores.overall",
    "overall",
    "overallScore",
    "OverallScore",
    "pronunciationScore",
    "scores.overallScore",
];

const ATTEMPT_ID_PATHS: &[&str] = &["id", "attemptId", "Id", "AttemptId", "attempt.id"];
const PROCESSING_STATUS_PATHS: &[&str] = &["processing.status", "status", "Processing.Status", "processingStatus"];
const PENDING_FLAG_PATHS: &[&str] = &[
    "processing.isPending",
    "processing.isProcessing",
    "isPending",
    "isProcessing",
];
const COMPLETED_FLAG_PATHS: &[&str] = &["processing.isCompleted", "isCompleted"];
const MISTAKES_PATHS: &[&str] = &["mistakes", "Mistakes", "scores.mistakes"];
const WORD_FEEDBACK_PATHS: &[&str] = &["wordLevelFeedback", "WordLevelFeedback", "words"];
const FAILURE_REASON_PATHS: &[&str] = &[
    "failureReason",
    "processing.error",
    "processing.errorMessage",
    "errorMessage",
    "error",
    "message",
];

const PAYMENT_STATUS_PATHS: &[&str] = &["status", "paymentStatus", "Status"];
const PAYMENT_AMOUNT_PATHS: &[&str] = &["amount", "amountCharged", "Amount"];

const SUBSCRIPTION_STATUS_PATHS: &[&str] = &["status", "subscription.status", "Status"];
const SUBSCRIPTION_PLAN_PATHS: &[&str] = &["plan.name", "planName", "subscription.plan.name", "plan"];
const RENEWAL_DATE_PATHS: &[&str] = &["renewalDate", "currentPeriodEnd", "nextBillingDate", "subscription.renewalDate"];

const TRANSACTION_ID_PATHS: &[&str] = &["transactionId", "transaction_id", "TransactionId", "merchantTransactionId"];
const REDIRECT_URL_PATHS: &[&str] = &["redirectUrl", "redirect_url", "paymentUrl", "url"];
const PLAN_NAME_PATHS: &[&str] = &["planName", "plan.name", "plan"];
const AMOUNT_CHARGED_PATHS: &[&str] = &["amountCharged", "amount", "finalAmount"];

const ERROR_CODE_PATHS: &[&str] = &["errorCode", "code", "error"];

/// Subscription states that count as confirmed activation.
pub const ACTIVE_SUBSCRIPTION_STATES: &[&str] = &["active", "trialing", "succeeded"];

/// Walks a dotted key path.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// First candidate path that is present and non-null.
pub fn resolve<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).filter(|v| !v.is_null()))
}

fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

pub fn resolve_number(value: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(as_number))
}

pub fn resolve_str<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a str> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(Value::as_str))
}

/// True if any candidate path holds `true`.
pub fn resolve_flag(value: &Value, paths: &[&str]) -> bool {
    paths
        .iter()
        .any(|path| lookup(value, path).and_then(Value::as_bool) == Some(true))
}

/// Strips the `{ data, isSuccess | success | message }` wrapper most endpoints use.
pub fn unwrap_envelope(value: Value) -> Value {
    let is_envelope = value.as_object().is_some_and(|obj| {
        obj.contains_key("data")
            && ["isSuccess", "success", "message", "succeeded"]
                .iter()
                .any(|key| obj.contains_key(*key))
    });

    match value {
        Value::Object(mut obj) if is_envelope => obj.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

// --- assessment -----------------------------------------------------------

pub fn has_scores(record: &Value) -> bool {
    resolve_number(record, ACCURACY_PATHS).is_some()
        || resolve_number(record, FLUENCY_PATHS).is_some()
        || resolve_number(record, OVERALL_PATHS).is_some()
}

pub fn attempt_id(record: &Value) -> Option<AttemptId> {
    match record {
        Value::String(id) if !id.trim().is_empty() => Some(AttemptId::new(id.trim())),
        _ => resolve(record, ATTEMPT_ID_PATHS).and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(AttemptId::new(s.clone())),
            Value::Number(n) => Some(AttemptId::new(n.to_string())),
            _ => None,
        }),
    }
}

fn processing_status(record: &Value) -> Option<String> {
    resolve_str(record, PROCESSING_STATUS_PATHS).map(str::to_ascii_lowercase)
}

fn has_terminal_marker(record: &Value) -> bool {
    resolve_flag(record, COMPLETED_FLAG_PATHS)
        || matches!(
            processing_status(record).as_deref(),
            Some("completed" | "complete" | "succeeded" | "failed" | "error")
        )
}

/// Pending if the backend says so, or if it handed back an id with no scores
/// and no terminal marker (a bare submission acknowledgement).
pub fn is_assessment_pending(record: &Value) -> bool {
    if matches!(processing_status(record).as_deref(), Some("pending" | "processing")) {
        return true;
    }
    if resolve_flag(record, PENDING_FLAG_PATHS) {
        return true;
    }
    attempt_id(record).is_some() && !has_scores(record) && !has_terminal_marker(record)
}

pub fn is_assessment_failed(record: &Value) -> bool {
    matches!(processing_status(record).as_deref(), Some("failed" | "error"))
}

fn failure_from(record: &Value, fallback: &str) -> Failure {
    let reason = resolve_str(record, FAILURE_REASON_PATHS).unwrap_or(fallback).to_string();
    Failure::with_codes(error_codes(record), reason)
}

pub fn assessment_scores(record: &Value) -> ScoreCard {
    let mistakes = resolve(record, MISTAKES_PATHS)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let word_feedback = resolve(record, WORD_FEEDBACK_PATHS)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let word = resolve_str(item, &["word", "Word"])?;
                    Some(WordFeedback {
                        word: word.to_string(),
                        accuracy_score: resolve_number(item, &["accuracyScore", "AccuracyScore", "accuracy"])
                            .unwrap_or(0.0),
                        error_type: resolve_str(item, &["errorType", "ErrorType"])
                            .filter(|e| !e.eq_ignore_ascii_case("none"))
                            .map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ScoreCard {
        accuracy: resolve_number(record, ACCURACY_PATHS).unwrap_or(0.0),
        fluency: resolve_number(record, FLUENCY_PATHS).unwrap_or(0.0),
        overall: resolve_number(record, OVERALL_PATHS).unwrap_or(0.0),
        mistakes,
        word_feedback,
    }
}

pub fn classify_assessment(record: &Value) -> Verdict<ScoreCard> {
    if is_assessment_failed(record) {
        return Verdict::Failed(failure_from(record, "Assessment failed"));
    }
    if is_assessment_pending(record) {
        return Verdict::Pending;
    }
    if has_scores(record) || has_terminal_marker(record) {
        return Verdict::Succeeded(assessment_scores(record));
    }
    Verdict::Pending
}

// --- payment --------------------------------------------------------------

pub fn payment_status(response: &Value) -> String {
    resolve_str(response, PAYMENT_STATUS_PATHS)
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default()
}

pub fn classify_payment(response: &Value) -> Verdict<PaymentReceipt> {
    let status = payment_status(response);
    match status.as_str() {
        "COMPLETED" | "SUCCESS" => Verdict::Succeeded(PaymentReceipt {
            status,
            amount: resolve_number(response, PAYMENT_AMOUNT_PATHS),
        }),
        "FAILED" => {
            let reason = resolve_str(response, FAILURE_REASON_PATHS).unwrap_or("Payment failed");
            Verdict::Failed(Failure::with_code("FAILED", reason))
        }
        _ => Verdict::Pending,
    }
}

// --- subscription ---------------------------------------------------------

pub fn subscription_snapshot(response: &Value) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        status: resolve_str(response, SUBSCRIPTION_STATUS_PATHS)
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default(),
        plan: resolve_str(response, SUBSCRIPTION_PLAN_PATHS).map(str::to_string),
        renewal_date: resolve_str(response, RENEWAL_DATE_PATHS).map(str::to_string),
    }
}

pub fn classify_subscription(response: &Value) -> Verdict<SubscriptionSnapshot> {
    let snapshot = subscription_snapshot(response);
    if ACTIVE_SUBSCRIPTION_STATES.contains(&snapshot.status.as_str()) {
        Verdict::Succeeded(snapshot)
    } else {
        Verdict::Pending
    }
}

// --- checkout -------------------------------------------------------------

/// Reads a subscribe response. `None` if it lacks a transaction id or redirect URL.
pub fn checkout(response: &Value) -> Option<Checkout> {
    let transaction_id = match resolve(response, TRANSACTION_ID_PATHS)? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let redirect_url = resolve_str(response, REDIRECT_URL_PATHS)?.to_string();

    Some(Checkout {
        transaction_id: TransactionId::new(transaction_id),
        redirect_url,
        plan_name: resolve_str(response, PLAN_NAME_PATHS).map(str::to_string),
        amount_charged: resolve_number(response, AMOUNT_CHARGED_PATHS),
        status: resolve_str(response, &["status"]).map(str::to_string),
    })
}

// --- errors ---------------------------------------------------------------

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Error codes from a rejected response body, `validationErrors` first.
pub fn error_codes(body: &Value) -> Vec<String> {
    let mut codes = Vec::new();
    if let Some(errors) = resolve(body, &["validationErrors", "ValidationErrors"]) {
        collect_strings(errors, &mut codes);
    }
    for path in ERROR_CODE_PATHS {
        if let Some(code) = lookup(body, path).and_then(Value::as_str) {
            if !code.is_empty() && !codes.iter().any(|c| c == code) {
                codes.push(code.to_string());
            }
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accuracy_resolves_from_every_known_variant() {
        let variants = [
            json!({ "accuracy": 82 }),
            json!({ "pronunciationAccuracy": 82 }),
            json!({ "scores": { "accuracy": 82 } }),
        ];
        for record in &variants {
            assert_eq!(assessment_scores(record).accuracy, 82.0, "variant {record}");
        }
    }

    #[test]
    fn test_missing_scores_default_to_zero() {
        let scores = assessment_scores(&json!({ "id": "a1" }));
        assert_eq!(scores.accuracy, 0.0);
        assert_eq!(scores.fluency, 0.0);
        assert_eq!(scores.overall, 0.0);
        assert!(scores.mistakes.is_empty());
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let scores = assessment_scores(&json!({ "fluencyScore": "71.5", "overallScore": 70 }));
        assert_eq!(scores.fluency, 71.5);
        assert_eq!(scores.overall, 70.0);
    }

    #[test]
    fn test_bare_id_is_pending() {
        assert!(is_assessment_pending(&json!({ "id": "a1" })));
        assert!(matches!(classify_assessment(&json!({ "id": "a1" })), Verdict::Pending));
    }

    #[test]
    fn test_processing_flags_mark_pending() {
        assert!(is_assessment_pending(&json!({ "processing": { "status": "Processing" } })));
        assert!(is_assessment_pending(&json!({ "processing": { "isPending": true }, "accuracy": 10 })));
        assert!(!is_assessment_pending(&json!({ "id": "a1", "processing": { "isCompleted": true } })));
    }

    #[test]
    fn test_completed_record_classifies_as_success() {
        let record = json!({
            "id": "a1",
            "processing": { "status": "Completed" },
            "scores": { "accuracy": 82, "fluency": 75, "overall": 78 },
            "mistakes": ["th", "r"],
            "wordLevelFeedback": [
                { "word": "three", "accuracyScore": 40, "errorType": "Mispronunciation" },
                { "word": "cats", "accuracyScore": 95, "errorType": "None" }
            ]
        });
        match classify_assessment(&record) {
            Verdict::Succeeded(scores) => {
                assert_eq!((scores.accuracy, scores.fluency, scores.overall), (82.0, 75.0, 78.0));
                assert_eq!(scores.mistakes, vec!["th", "r"]);
                assert_eq!(scores.word_feedback.len(), 2);
                assert_eq!(scores.word_feedback[0].error_type.as_deref(), Some("Mispronunciation"));
                assert_eq!(scores.word_feedback[1].error_type, None);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_record_carries_reason_and_code() {
        let record = json!({
            "processing": { "status": "Failed", "error": "audio too short" },
            "validationErrors": ["SUBSCRIPTION_REQUIRED"]
        });
        match classify_assessment(&record) {
            Verdict::Failed(failure) => {
                assert_eq!(failure.reason, "audio too short");
                assert!(failure.has_code("SUBSCRIPTION_REQUIRED"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_shape_keeps_polling() {
        assert!(matches!(classify_assessment(&json!({})), Verdict::Pending));
        assert!(matches!(classify_assessment(&Value::Null), Verdict::Pending));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let record = json!({ "id": "a1", "processing": { "status": "Completed" }, "accuracy": 90 });
        let first = classify_assessment(&record);
        let second = classify_assessment(&record);
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }

    #[test]
    fn test_payment_status_classification() {
        assert!(matches!(classify_payment(&json!({ "status": "completed" })), Verdict::Succeeded(_)));
        assert!(matches!(classify_payment(&json!({ "status": "SUCCESS", "amount": 499 })), Verdict::Succeeded(r) if r.amount == Some(499.0)));
        assert!(matches!(classify_payment(&json!({ "status": "PENDING" })), Verdict::Pending));
        assert!(matches!(classify_payment(&json!({ "status": "initiated" })), Verdict::Pending));
        assert!(matches!(classify_payment(&json!({})), Verdict::Pending));
        match classify_payment(&json!({ "status": "FAILED", "failureReason": "card declined" })) {
            Verdict::Failed(failure) => assert_eq!(failure.reason, "card declined"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_subscription_activation_states() {
        for status in ["active", "Trialing", "SUCCEEDED"] {
            assert!(matches!(classify_subscription(&json!({ "status": status })), Verdict::Succeeded(_)));
        }
        assert!(matches!(classify_subscription(&json!({ "status": "incomplete" })), Verdict::Pending));

        let snapshot = subscription_snapshot(&json!({
            "status": "active",
            "plan": { "name": "Pro" },
            "renewalDate": "2026-11-18"
        }));
        assert_eq!(snapshot.plan.as_deref(), Some("Pro"));
        assert_eq!(snapshot.renewal_date.as_deref(), Some("2026-11-18"));
    }

    #[test]
    fn test_checkout_requires_id_and_redirect() {
        let parsed = checkout(&json!({
            "transactionId": "t1",
            "redirectUrl": "https://pay.example/t1",
            "planName": "Pro",
            "amountCharged": 499
        }))
        .expect("checkout");
        assert_eq!(parsed.transaction_id.as_str(), "t1");
        assert_eq!(parsed.amount_charged, Some(499.0));

        assert!(checkout(&json!({ "redirectUrl": "https://pay.example" })).is_none());
        assert!(checkout(&json!({ "transactionId": "t1" })).is_none());
    }

    #[test]
    fn test_envelope_is_unwrapped() {
        let wrapped = json!({ "isSuccess": true, "data": { "status": "COMPLETED" } });
        assert_eq!(unwrap_envelope(wrapped), json!({ "status": "COMPLETED" }));

        let plain = json!({ "data": 1 });
        assert_eq!(unwrap_envelope(plain.clone()), plain);
    }

    #[test]
    fn test_error_codes_from_object_validation_errors() {
        let body = json!({ "validationErrors": { "plan": ["SUBSCRIPTION_REQUIRED"] }, "code": "E403" });
        assert_eq!(error_codes(&body), vec!["SUBSCRIPTION_REQUIRED", "E403"]);
    }
}
