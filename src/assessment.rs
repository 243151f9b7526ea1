// src/assessment.rs

//! Pronunciation recorder: capture, upload, and wait for the assessment.

use futures::channel::mpsc::UnboundedSender;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::client::AssessmentApi;
use crate::config::FixedPollSettings;
use crate::errors::{FlowError, Result};
use crate::models::{AttemptId, AudioClip, ScoreCard};
use crate::normalizer;
use crate::poller::{CancelSignal, OperationResult, PollTick, Poller, Submitted, Verdict};

/// Accuracy needed to unlock the next step of a lesson.
pub const PASS_THRESHOLD: f64 = 75.0;

/// Failure code the backend uses when the learner has no assessments left.
pub const SUBSCRIPTION_REQUIRED: &str = "SUBSCRIPTION_REQUIRED";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped { has_audio: bool },
    Submitting,
    /// `attempt` is the status check in flight; 0 while waiting for the first.
    Polling { attempt: u32 },
    Completed,
    Failed,
}

impl RecorderState {
    fn name(&self) -> String {
        match self {
            RecorderState::Idle => "idle".to_string(),
            RecorderState::Recording => "recording".to_string(),
            RecorderState::Stopped { has_audio: true } => "stopped with audio".to_string(),
            RecorderState::Stopped { has_audio: false } => "stopped without audio".to_string(),
            RecorderState::Submitting => "submitting".to_string(),
            RecorderState::Polling { attempt } => format!("polling (check {attempt})"),
            RecorderState::Completed => "completed".to_string(),
            RecorderState::Failed => "failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssessmentOutcome {
    Scored { scores: ScoreCard, passed: bool },
    /// Budget ran out; these are the scores of the last record seen.
    Partial { scores: ScoreCard, record: Value },
    /// No assessments left on the plan; route to an upgrade prompt.
    EntitlementExhausted,
    Failed { reason: String, timed_out: bool },
    Cancelled,
}

impl AssessmentOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            AssessmentOutcome::Scored { passed: true, .. } => "passed",
            AssessmentOutcome::Scored { passed: false, .. } => "completed",
            AssessmentOutcome::Partial { .. } => "timeout",
            AssessmentOutcome::EntitlementExhausted => "subscription_required",
            AssessmentOutcome::Failed { timed_out: true, .. } => "timeout",
            AssessmentOutcome::Failed { .. } => "error",
            AssessmentOutcome::Cancelled => "cancelled",
        }
    }
}

pub struct PronunciationRecorder<A: AssessmentApi> {
    api: A,
    settings: FixedPollSettings,
    state: watch::Sender<RecorderState>,
    audio: Option<AudioClip>,
    progress: Option<UnboundedSender<PollTick>>,
    cancel: Option<CancelSignal>,
}

impl<A: AssessmentApi> PronunciationRecorder<A> {
    pub fn new(api: A, settings: FixedPollSettings) -> Self {
        Self {
            api,
            settings,
            state: watch::Sender::new(RecorderState::Idle),
            audio: None,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<PollTick>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state.borrow().clone()
    }

    /// Follows state changes while a submission is running.
    pub fn watch_state(&self) -> watch::Receiver<RecorderState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RecorderState) {
        self.state.send_replace(state);
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition { action, state: self.state.borrow().name() }
    }

    pub fn start_recording(&mut self) -> Result<()> {
        match self.state() {
            RecorderState::Idle | RecorderState::Stopped { .. } | RecorderState::Completed | RecorderState::Failed => {
                self.audio = None;
                self.set_state(RecorderState::Recording);
                Ok(())
            }
            _ => Err(self.invalid("start recording")),
        }
    }

    pub fn stop_recording(&mut self, audio: Option<AudioClip>) -> Result<()> {
        if self.state() != RecorderState::Recording {
            return Err(self.invalid("stop recording"));
        }
        self.audio = audio.filter(|clip| !clip.is_empty());
        self.set_state(RecorderState::Stopped { has_audio: self.audio.is_some() });
        Ok(())
    }

    pub fn reset(&mut self) {
        self.audio = None;
        self.set_state(RecorderState::Idle);
    }

    /// Uploads the recorded audio and waits for the assessment to finish.
    pub async fn submit(&mut self, paragraph_id: &str) -> Result<AssessmentOutcome> {
        if self.state() != (RecorderState::Stopped { has_audio: true }) {
            return Err(self.invalid("submit"));
        }
        let audio = self.audio.take().ok_or_else(|| self.invalid("submit"))?;
        self.set_state(RecorderState::Submitting);
        let submitted = submit_audio(&self.api, paragraph_id, audio).await;
        if matches!(submitted, Ok(Submitted::Handle(_))) {
            self.set_state(RecorderState::Polling { attempt: 0 });
        }

        let mut poller = Poller::from_fixed("assessment", &self.settings);
        if let Some(progress) = self.progress.clone() {
            poller = poller.observe(progress);
        }
        if let Some(cancel) = self.cancel.clone() {
            poller = poller.cancel_on(cancel);
        }

        let api = &self.api;
        let state = &self.state;
        let mut attempt = 0;
        let result = poller
            .run(
                std::future::ready(submitted),
                move |attempt_id: AttemptId| {
                    attempt += 1;
                    state.send_replace(RecorderState::Polling { attempt });
                    async move { api.get_attempt_details(&attempt_id).await }
                },
                normalizer::classify_assessment,
            )
            .await;

        let outcome = outcome_from(result);
        self.set_state(match outcome {
            AssessmentOutcome::Scored { .. } | AssessmentOutcome::Partial { .. } => RecorderState::Completed,
            AssessmentOutcome::Cancelled => RecorderState::Idle,
            _ => RecorderState::Failed,
        });
        info!("🎯 Assessment for paragraph {} finished: {}", paragraph_id, outcome.status());
        Ok(outcome)
    }
}

/// Sends the audio. A bare attempt id is materialized with one status call.
async fn submit_audio<A: AssessmentApi>(
    api: &A,
    paragraph_id: &str,
    audio: AudioClip,
) -> Result<Submitted<AttemptId, ScoreCard>> {
    let response = api.submit_assessment(paragraph_id, audio).await?;

    let (record, known_id) = match response {
        Value::String(id) => {
            let attempt_id = AttemptId::new(id);
            match api.get_attempt_details(&attempt_id).await {
                Ok(record) => (record, Some(attempt_id)),
                Err(e) => {
                    warn!("Could not load attempt {} right after submission: {}", attempt_id, e);
                    return Ok(Submitted::Handle(attempt_id));
                }
            }
        }
        record => (record, None),
    };

    match normalizer::classify_assessment(&record) {
        Verdict::Succeeded(scores) => Ok(Submitted::Inline(scores)),
        Verdict::Failed(failure) => Ok(Submitted::Rejected(failure)),
        // status records often omit the id the backend already handed out
        Verdict::Pending => normalizer::attempt_id(&record)
            .or(known_id)
            .map(Submitted::Handle)
            .ok_or_else(|| FlowError::UnexpectedResponse("assessment submission returned no attempt id".to_string())),
    }
}

fn outcome_from(result: OperationResult<ScoreCard, Value>) -> AssessmentOutcome {
    match result {
        OperationResult::Succeeded(scores) => {
            let passed = scores.accuracy >= PASS_THRESHOLD;
            AssessmentOutcome::Scored { scores, passed }
        }
        OperationResult::Failed(failure) if failure.has_code(SUBSCRIPTION_REQUIRED) => {
            AssessmentOutcome::EntitlementExhausted
        }
        OperationResult::Failed(failure) => AssessmentOutcome::Failed { reason: failure.reason, timed_out: false },
        OperationResult::TimedOut { last: Some(record), .. } => AssessmentOutcome::Partial {
            scores: normalizer::assessment_scores(&record),
            record,
        },
        OperationResult::TimedOut { attempts, last: None } => AssessmentOutcome::Failed {
            reason: format!("Assessment did not finish after {attempts} status checks"),
            timed_out: true,
        },
        OperationResult::Cancelled => AssessmentOutcome::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Failure;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct SlowUpload {
        details: Mutex<VecDeque<Value>>,
    }

    impl AssessmentApi for SlowUpload {
        async fn submit_assessment(&self, _paragraph_id: &str, _audio: AudioClip) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(json!({ "id": "a1" }))
        }

        async fn get_attempt_details(&self, _attempt_id: &AttemptId) -> Result<Value> {
            Ok(self.details.lock().unwrap().pop_front().unwrap_or(json!({ "processing": { "status": "Pending" } })))
        }
    }

    async fn collect_states(mut rx: watch::Receiver<RecorderState>) -> Vec<RecorderState> {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let done = matches!(state, RecorderState::Completed | RecorderState::Failed);
            seen.push(state);
            if done {
                break;
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_states_move_through_submitting_and_polling() {
        let api = SlowUpload {
            details: Mutex::new(VecDeque::from([
                json!({ "processing": { "status": "Pending" } }),
                json!({ "processing": { "status": "Pending" } }),
                json!({ "processing": { "status": "Completed" }, "scores": { "accuracy": 90 } }),
            ])),
        };
        let mut recorder = PronunciationRecorder::new(api, FixedPollSettings { max_attempts: 10, interval_ms: 2_000 });
        recorder.start_recording().unwrap();
        recorder.stop_recording(Some(AudioClip::webm(vec![1, 2, 3]))).unwrap();

        let states = recorder.watch_state();
        let (outcome, seen) = tokio::join!(recorder.submit("p-1"), collect_states(states));

        assert!(matches!(outcome.unwrap(), AssessmentOutcome::Scored { passed: true, .. }));
        assert_eq!(seen.first(), Some(&RecorderState::Submitting));
        assert!(seen.contains(&RecorderState::Polling { attempt: 0 }));
        assert!(seen.contains(&RecorderState::Polling { attempt: 2 }));
        assert_eq!(seen.last(), Some(&RecorderState::Completed));
    }

    #[test]
    fn test_pass_threshold_is_inclusive() {
        let scored = |accuracy| {
            outcome_from(OperationResult::Succeeded(ScoreCard { accuracy, ..ScoreCard::default() }))
        };
        assert!(matches!(scored(75.0), AssessmentOutcome::Scored { passed: true, .. }));
        assert!(matches!(scored(74.9), AssessmentOutcome::Scored { passed: false, .. }));
    }

    #[test]
    fn test_subscription_required_maps_to_entitlement() {
        let outcome = outcome_from(OperationResult::Failed(Failure::with_code(SUBSCRIPTION_REQUIRED, "upgrade")));
        assert_eq!(outcome, AssessmentOutcome::EntitlementExhausted);
        assert_eq!(outcome.status(), "subscription_required");
    }

    #[test]
    fn test_timeout_surfaces_last_record() {
        let record = json!({ "id": "a1", "processing": { "status": "Processing" }, "fluencyScore": 60 });
        match outcome_from(OperationResult::TimedOut { attempts: 10, last: Some(record) }) {
            AssessmentOutcome::Partial { scores, .. } => assert_eq!(scores.fluency, 60.0),
            other => panic!("expected partial, got {other:?}"),
        }

        let outcome = outcome_from(OperationResult::TimedOut { attempts: 10, last: None });
        assert!(matches!(outcome, AssessmentOutcome::Failed { timed_out: true, .. }));
    }
}
