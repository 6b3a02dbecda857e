//! Provider callbacks, parsed at the boundary and applied to interview state.  Every handler is
//! idempotent: the provider delivers at least once and in no particular order.

use crate::call_session::VoiceScript;
use crate::db_types::{
    Answer, InterviewQuestion, InterviewStatus, RecordingPatch, VoiceCall, VoiceCallStatus,
};
use crate::error::{AppError, AppResult};
use crate::twilio_types::{
    CallStatus, RecordActionPayload, RecordingCallbackPayload, StatusCallbackPayload,
    TranscriptionCallbackPayload,
};
use crate::types::AppState;
use crate::utils::form_to_json;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATUS_LOOKUP_ATTEMPTS: u32 = 3;
const STATUS_LOOKUP_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, PartialEq)]
pub struct StatusEvent {
    pub call_sid: String,
    pub provider_status: CallStatus,
    pub duration: Option<i32>,
    pub raw: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordingEvent {
    pub call_sid: String,
    pub recording: RecordingPatch,
    pub raw: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptionEvent {
    pub call_sid: String,
    pub question_index: usize,
    /// `None` when the provider sent no text, typically because transcription failed.
    pub text: Option<String>,
    pub transcription_status: Option<String>,
    pub recording_url: Option<String>,
    pub raw: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NextQuestionEvent {
    pub call_sid: String,
    /// Index of the question to ask next; the answer just recorded belongs to the one before.
    pub question_index: usize,
    pub recording_url: Option<String>,
    pub recording_duration: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WebhookEvent {
    Status(StatusEvent),
    Recording(RecordingEvent),
    Transcription(TranscriptionEvent),
    NextQuestion(NextQuestionEvent),
}

/// What the provider gets back.
#[derive(Clone, Debug, PartialEq)]
pub enum WebhookReply {
    Script(VoiceScript),
    Ack,
}

fn parse_form<T: DeserializeOwned>(body: &str, kind: &'static str) -> AppResult<T> {
    serde_urlencoded::from_str::<T>(body).map_err(|e| {
        warn!(error=%e, kind, "failed to deserialize webhook form");
        AppError::validation(format!("malformed {kind} webhook: {e}"))
    })
}

impl WebhookEvent {
    pub fn status(body: &str) -> AppResult<Self> {
        let payload: StatusCallbackPayload = parse_form(body, "status")?;
        Ok(Self::Status(StatusEvent {
            call_sid: payload.call_sid,
            provider_status: payload.call_status,
            duration: payload.call_duration,
            raw: form_to_json(body),
        }))
    }

    pub fn recording(body: &str) -> AppResult<Self> {
        let payload: RecordingCallbackPayload = parse_form(body, "recording")?;
        Ok(Self::Recording(RecordingEvent {
            call_sid: payload.call_sid,
            recording: RecordingPatch {
                recording_url: Some(payload.recording_url).filter(|u| !u.is_empty()),
                recording_sid: payload.recording_sid.filter(|s| !s.is_empty()),
                duration: payload.recording_duration,
            },
            raw: form_to_json(body),
        }))
    }

    pub fn transcription(question_index: usize, body: &str) -> AppResult<Self> {
        let payload: TranscriptionCallbackPayload = parse_form(body, "transcription")?;
        Ok(Self::Transcription(TranscriptionEvent {
            call_sid: payload.call_sid,
            question_index,
            text: payload.transcription_text,
            transcription_status: payload.transcription_status,
            recording_url: payload.recording_url.filter(|u| !u.is_empty()),
            raw: form_to_json(body),
        }))
    }

    pub fn next_question(question_index: usize, body: &str) -> AppResult<Self> {
        let payload: RecordActionPayload = parse_form(body, "next-question")?;
        Ok(Self::NextQuestion(NextQuestionEvent {
            call_sid: payload.call_sid,
            question_index,
            recording_url: payload.recording_url.filter(|u| !u.is_empty()),
            recording_duration: payload.recording_duration,
        }))
    }

    pub fn call_sid(&self) -> &str {
        match self {
            WebhookEvent::Status(e) => &e.call_sid,
            WebhookEvent::Recording(e) => &e.call_sid,
            WebhookEvent::Transcription(e) => &e.call_sid,
            WebhookEvent::NextQuestion(e) => &e.call_sid,
        }
    }
}

/// Provider status vocabulary folded into ours.  Queued calls have not rung yet; a canceled call
/// never connected.
pub fn voice_call_status(status: CallStatus) -> VoiceCallStatus {
    match status {
        CallStatus::Queued | CallStatus::Initiated => VoiceCallStatus::Initiated,
        CallStatus::Ringing => VoiceCallStatus::Ringing,
        CallStatus::InProgress => VoiceCallStatus::InProgress,
        CallStatus::Completed => VoiceCallStatus::Completed,
        CallStatus::Busy => VoiceCallStatus::Busy,
        CallStatus::NoAnswer => VoiceCallStatus::NoAnswer,
        CallStatus::Failed | CallStatus::Canceled => VoiceCallStatus::Failed,
    }
}

pub struct WebhookEventRouter<'a> {
    state: &'a AppState,
}

impl<'a> WebhookEventRouter<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    pub async fn route(&self, event: WebhookEvent) -> AppResult<WebhookReply> {
        match event {
            WebhookEvent::Status(e) => self.on_status(e).await.map(|_| WebhookReply::Ack),
            WebhookEvent::Recording(e) => self.on_recording(e).await.map(|_| WebhookReply::Ack),
            WebhookEvent::Transcription(e) => {
                self.on_transcription(e).await.map(|_| WebhookReply::Ack)
            }
            WebhookEvent::NextQuestion(e) => {
                self.on_next_question(e).await.map(WebhookReply::Script)
            }
        }
    }

    /// Script fetched when the callee picks up, or replayed for an explicit question index.
    pub async fn interview_script(
        &self,
        interview_id: Uuid,
        current_question: usize,
    ) -> AppResult<VoiceScript> {
        let interview = self
            .state
            .store
            .get_interview(interview_id)
            .await?
            .ok_or_else(|| {
                warn!(%interview_id, "script requested for unknown interview");
                AppError::not_found(format!("interview {interview_id}"))
            })?;
        let questions = self.state.store.list_questions(interview.job_id).await?;
        debug!(%interview_id, current_question, questions=questions.len(), "serving interview script");
        Ok(self.script_for(&questions, current_question))
    }

    fn script_for(&self, questions: &[InterviewQuestion], index: usize) -> VoiceScript {
        let texts: Vec<&str> = questions.iter().map(|q| q.question_text.as_str()).collect();
        self.state.controller.next_instruction(&texts, index)
    }

    async fn known_call(&self, call_sid: &str) -> AppResult<VoiceCall> {
        self.state
            .store
            .get_voice_call_by_sid(call_sid)
            .await?
            .ok_or_else(|| {
                warn!(call_sid=%call_sid, "webhook for unknown call");
                AppError::not_found(format!("voice call {call_sid}"))
            })
    }

    /// Early status callbacks can land before the trigger has stored the call it just placed.
    async fn call_for_status(&self, call_sid: &str) -> AppResult<VoiceCall> {
        for attempt in 1..STATUS_LOOKUP_ATTEMPTS {
            if let Some(call) = self.state.store.get_voice_call_by_sid(call_sid).await? {
                return Ok(call);
            }
            info!(call_sid=%call_sid, attempt, "status callback ahead of its call; retrying lookup");
            tokio::time::sleep(STATUS_LOOKUP_BACKOFF).await;
        }
        self.known_call(call_sid).await
    }

    async fn on_status(&self, event: StatusEvent) -> AppResult<()> {
        let call = self.call_for_status(&event.call_sid).await?;
        let store = &self.state.store;
        let event_type = format!("call_{}", event.provider_status.as_str());
        store.append_call_event(call.id, &event_type, event.raw).await?;

        let status = voice_call_status(event.provider_status);
        let current = match store
            .advance_call_status(&event.call_sid, status, event.duration)
            .await?
        {
            Some(updated) => {
                info!(call_sid=%event.call_sid, status=%status.as_str(), "call status advanced");
                updated
            }
            None => {
                debug!(call_sid=%event.call_sid, status=%status.as_str(), current=%call.status.as_str(), "stale call status ignored");
                store
                    .get_voice_call_by_sid(&event.call_sid)
                    .await?
                    .unwrap_or(call)
            }
        };
        // Settle from the stored status so replays converge even after a partial failure.
        if let Some(outcome) = current.status.interview_outcome() {
            self.settle_interview(current.interview_id, outcome).await?;
        }
        Ok(())
    }

    async fn on_recording(&self, event: RecordingEvent) -> AppResult<()> {
        let call = self.known_call(&event.call_sid).await?;
        self.state
            .store
            .record_call_recording(&event.call_sid, event.recording)
            .await?;
        self.state
            .store
            .append_call_event(call.id, "recording_available", event.raw)
            .await?;
        info!(call_sid=%event.call_sid, "call recording stored");
        Ok(())
    }

    async fn on_next_question(&self, event: NextQuestionEvent) -> AppResult<VoiceScript> {
        let call = match self.known_call(&event.call_sid).await {
            Ok(call) => call,
            Err(AppError::NotFound(_)) => return Ok(VoiceScript::closing()),
            Err(e) => return Err(e),
        };
        let store = &self.state.store;
        let interview_id = call.interview_id;
        let interview = store
            .get_interview(interview_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?;
        let questions = store.list_questions(interview.job_id).await?;

        let answered = event
            .question_index
            .checked_sub(1)
            .and_then(|i| questions.get(i));
        match answered {
            Some(question)
                if event.recording_url.is_some() || event.recording_duration.is_some() =>
            {
                self.state
                    .answers
                    .record_audio(
                        interview_id,
                        question.id,
                        event.recording_url,
                        event.recording_duration,
                    )
                    .await?;
            }
            Some(question) => {
                debug!(%interview_id, question_id=%question.id, "record action without a recording")
            }
            None => (),
        }

        let script = self.script_for(&questions, event.question_index);
        if script.ends_call() {
            info!(%interview_id, "last question answered");
            self.settle_interview(interview_id, InterviewStatus::Completed)
                .await?;
        }
        Ok(script)
    }

    async fn on_transcription(&self, event: TranscriptionEvent) -> AppResult<()> {
        let call = self.known_call(&event.call_sid).await?;
        let store = &self.state.store;
        let interview_id = call.interview_id;
        let interview = store
            .get_interview(interview_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?;
        let questions = store.list_questions(interview.job_id).await?;
        let question = questions.get(event.question_index).ok_or_else(|| {
            warn!(%interview_id, index=event.question_index, "transcription for unknown question index");
            AppError::not_found(format!("question index {}", event.question_index))
        })?;

        if event.text.is_none() {
            warn!(
                call_sid=%event.call_sid,
                status=?event.transcription_status,
                "transcription arrived without text"
            );
        }
        let text = event.text.as_deref().unwrap_or_default();
        let answer = self
            .state
            .answers
            .record_transcript(interview_id, question.id, text, event.recording_url)
            .await?;
        store
            .append_call_event(call.id, "transcription_available", event.raw)
            .await?;

        if answer.has_transcript_text() && answer.score.is_none() {
            self.score_inline(&answer, question).await;
        }

        let interview = store.get_interview(interview_id).await?.unwrap_or(interview);
        if interview.status == InterviewStatus::Completed && interview.total_score.is_none() {
            self.state.enqueue_scoring(interview_id);
        }
        Ok(())
    }

    /// Best effort; anything that does not finish in time is left to the pipeline.
    async fn score_inline(&self, answer: &Answer, question: &InterviewQuestion) {
        let transcript = answer.transcript.as_deref().unwrap_or_default();
        let scoring = self.state.evaluator.score_answer(
            &question.question_text,
            transcript,
            &question.expected_keywords,
        );
        match tokio::time::timeout(self.state.config.scoring.inline_timeout, scoring).await {
            Ok(Ok(result)) => match self.state.answers.record_score(answer.id, &result).await {
                Ok(stored) => {
                    debug!(answer_id=%answer.id, score=?stored.score, "answer scored inline")
                }
                Err(e) => warn!(answer_id=%answer.id, error=%e, "failed to store inline score"),
            },
            Ok(Err(e)) => warn!(answer_id=%answer.id, error=%e, "inline scoring failed"),
            Err(_) => warn!(answer_id=%answer.id, "inline scoring timed out"),
        }
    }

    /// Move the interview to its terminal status once; completed interviews without a total are
    /// handed to the scoring worker.
    async fn settle_interview(&self, interview_id: Uuid, outcome: InterviewStatus) -> AppResult<()> {
        let store = &self.state.store;
        let interview = match store.finish_interview(interview_id, outcome).await? {
            Some(interview) => {
                info!(%interview_id, status=%outcome.as_str(), "interview finished");
                interview
            }
            None => store
                .get_interview(interview_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?,
        };
        if interview.status == InterviewStatus::Completed && interview.total_score.is_none() {
            self.state.enqueue_scoring(interview_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoringReport;
    use crate::store::InterviewStore;
    use crate::testing::{Fixture, Harness, ScriptedEvaluator};

    use std::sync::Arc;
    use std::time::Duration;

    const SID: &str = "CA00000000000000000000000000000001";

    async fn started(questions: &[&str], evaluator: ScriptedEvaluator) -> (Fixture, Harness) {
        let fx = Fixture::new(questions).await;
        let harness = fx.harness(Arc::new(evaluator));
        fx.start_call(SID).await;
        (fx, harness)
    }

    fn status(sid: &str, call_status: &str) -> WebhookEvent {
        WebhookEvent::status(&format!("CallSid={sid}&CallStatus={call_status}&CallDuration=42"))
            .unwrap()
    }

    fn next_question(index: usize, recording: &str) -> WebhookEvent {
        WebhookEvent::next_question(
            index,
            &format!("CallSid={SID}&RecordingUrl={recording}&RecordingDuration=11"),
        )
        .unwrap()
    }

    fn transcription(index: usize, text: &str) -> WebhookEvent {
        let body = serde_urlencoded::to_string(vec![
            ("CallSid", SID),
            ("TranscriptionText", text),
            ("TranscriptionStatus", "completed"),
        ])
        .unwrap();
        WebhookEvent::transcription(index, &body).unwrap()
    }

    #[test]
    fn provider_statuses_fold_into_call_statuses() {
        assert_eq!(voice_call_status(CallStatus::Queued), VoiceCallStatus::Initiated);
        assert_eq!(voice_call_status(CallStatus::InProgress), VoiceCallStatus::InProgress);
        assert_eq!(voice_call_status(CallStatus::Canceled), VoiceCallStatus::Failed);
        assert_eq!(voice_call_status(CallStatus::NoAnswer), VoiceCallStatus::NoAnswer);
    }

    #[test]
    fn status_form_without_call_sid_is_a_validation_error() {
        let res = WebhookEvent::status("CallStatus=ringing");
        assert!(matches!(res, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn completed_status_completes_interview_and_enqueues_scoring() {
        let (fx, mut h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
        let router = WebhookEventRouter::new(&h.state);

        router.route(status(SID, "in-progress")).await.unwrap();
        let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
        assert_eq!(interview.status, InterviewStatus::InProgress);

        router.route(status(SID, "completed")).await.unwrap();
        let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
        assert_eq!(interview.status, InterviewStatus::Completed);
        assert!(interview.completed_at.is_some());
        let call = fx.store.get_voice_call_by_sid(SID).await.unwrap().unwrap();
        assert_eq!(call.status, VoiceCallStatus::Completed);
        assert_eq!(call.duration, Some(42));
        assert_eq!(h.jobs.try_recv().unwrap().interview_id, fx.interview_id);
    }

    #[tokio::test]
    async fn unanswered_calls_fail_the_interview() {
        for provider_status in ["failed", "no-answer", "busy", "canceled"] {
            let (fx, mut h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
            let router = WebhookEventRouter::new(&h.state);
            router.route(status(SID, provider_status)).await.unwrap();
            let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
            assert_eq!(interview.status, InterviewStatus::Failed, "{provider_status}");
            assert!(h.jobs.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn non_terminal_statuses_leave_the_interview_alone() {
        let (fx, h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        for provider_status in ["queued", "initiated", "ringing", "in-progress"] {
            router.route(status(SID, provider_status)).await.unwrap();
        }
        let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
        assert_eq!(interview.status, InterviewStatus::InProgress);
    }

    #[tokio::test]
    async fn stale_status_is_logged_but_does_not_regress() {
        let (fx, h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        router.route(status(SID, "completed")).await.unwrap();
        router.route(status(SID, "ringing")).await.unwrap();
        router.route(status(SID, "busy")).await.unwrap();

        let call = fx.store.get_voice_call_by_sid(SID).await.unwrap().unwrap();
        assert_eq!(call.status, VoiceCallStatus::Completed);
        let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
        assert_eq!(interview.status, InterviewStatus::Completed);
        let events: Vec<String> = fx
            .store
            .list_call_events(call.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(events, vec!["call_completed", "call_ringing", "call_busy"]);
    }

    #[tokio::test]
    async fn unknown_call_sid_is_not_found() {
        let (_fx, h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        let res = router.route(status("CAunknown", "completed")).await;
        assert!(matches!(res, Err(AppError::NotFound(_))));
        let recording =
            WebhookEvent::recording("CallSid=CAunknown&RecordingUrl=https%3A%2F%2Fr").unwrap();
        let res = router.route(recording).await;
        assert!(matches!(res, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn status_arriving_before_the_call_is_stored_is_kept() {
        let fx = Fixture::new(&["Q1"]).await;
        let h = fx.harness(Arc::new(ScriptedEvaluator::new(5.0)));
        let router = WebhookEventRouter::new(&h.state);

        let (routed, _) = tokio::join!(router.route(status(SID, "ringing")), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.start_call(SID).await
        });
        routed.unwrap();

        let call = fx.store.get_voice_call_by_sid(SID).await.unwrap().unwrap();
        assert_eq!(call.status, VoiceCallStatus::Ringing);
        let events = fx.store.list_call_events(call.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "call_ringing");
    }

    #[tokio::test]
    async fn unknown_call_on_next_question_closes_the_call() {
        let (_fx, h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        let event = WebhookEvent::next_question(1, "CallSid=CAunknown").unwrap();
        let reply = router.route(event).await.unwrap();
        assert_eq!(reply, WebhookReply::Script(VoiceScript::closing()));
    }

    #[tokio::test]
    async fn recording_callback_merges_metadata() {
        let (fx, h) = started(&["Q1"], ScriptedEvaluator::new(5.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        let event = WebhookEvent::recording(&format!(
            "CallSid={SID}&RecordingUrl=https%3A%2F%2Frec%2Ffull&RecordingSid=RE1&RecordingDuration=95"
        ))
        .unwrap();
        router.route(event.clone()).await.unwrap();
        router.route(event).await.unwrap();

        let call = fx.store.get_voice_call_by_sid(SID).await.unwrap().unwrap();
        assert_eq!(call.recording_url.as_deref(), Some("https://rec/full"));
        assert_eq!(call.recording_sid.as_deref(), Some("RE1"));
        let events = fx.store.list_call_events(call.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "recording_available");
        assert_eq!(events[0].payload["RecordingSid"], "RE1");
    }

    #[tokio::test]
    async fn duplicate_answer_webhooks_converge_to_one_row() {
        let (fx, h) = started(&["Q1", "Q2"], ScriptedEvaluator::new(6.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        for _ in 0..2 {
            router.route(next_question(1, "https%3A%2F%2Frec%2Fq1")).await.unwrap();
            router.route(transcription(0, "My answer")).await.unwrap();
        }
        let answers = fx.store.list_answers(fx.interview_id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].audio_url.as_deref(), Some("https://rec/q1"));
        assert_eq!(answers[0].audio_duration, Some(11.0));
        assert_eq!(answers[0].transcript.as_deref(), Some("My answer"));
        assert_eq!(answers[0].score, Some(6.0));
    }

    #[tokio::test]
    async fn inline_scoring_timeout_leaves_answer_unscored() {
        let evaluator = ScriptedEvaluator::new(9.0).with_delay(Duration::from_secs(5));
        let (fx, h) = started(&["Q1"], evaluator).await;
        let router = WebhookEventRouter::new(&h.state);
        router.route(transcription(0, "slow")).await.unwrap();
        let answers = fx.store.list_answers(fx.interview_id).await.unwrap();
        assert_eq!(answers[0].transcript.as_deref(), Some("slow"));
        assert!(answers[0].score.is_none());
    }

    #[tokio::test]
    async fn empty_transcription_is_recorded_and_not_scored() {
        let (fx, h) = started(&["Q1"], ScriptedEvaluator::new(9.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        let event =
            WebhookEvent::transcription(0, &format!("CallSid={SID}&TranscriptionStatus=failed"))
                .unwrap();
        router.route(event).await.unwrap();
        let answers = fx.store.list_answers(fx.interview_id).await.unwrap();
        assert_eq!(answers[0].transcript.as_deref(), Some(""));
        assert!(!answers[0].awaiting_transcript());
        assert_eq!(h.evaluator.score_calls(), 0);
    }

    #[tokio::test]
    async fn failed_transcription_after_real_text_keeps_text_and_score() {
        let (fx, h) = started(&["Q1"], ScriptedEvaluator::new(6.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        router.route(transcription(0, "Real answer")).await.unwrap();
        let failed =
            WebhookEvent::transcription(0, &format!("CallSid={SID}&TranscriptionStatus=failed"))
                .unwrap();
        router.route(failed).await.unwrap();

        let answers = fx.store.list_answers(fx.interview_id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].transcript.as_deref(), Some("Real answer"));
        assert_eq!(answers[0].score, Some(6.0));
        assert_eq!(h.evaluator.score_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_record_action_and_transcription_keep_both_fields() {
        let (fx, h) = started(&["Q1", "Q2"], ScriptedEvaluator::new(7.0)).await;
        let router = WebhookEventRouter::new(&h.state);
        let (a, b) = tokio::join!(
            router.route(next_question(1, "https%3A%2F%2Frec%2Fq1")),
            router.route(transcription(0, "Concurrent answer")),
        );
        a.unwrap();
        b.unwrap();
        let answers = fx.store.list_answers(fx.interview_id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].audio_url.as_deref(), Some("https://rec/q1"));
        assert_eq!(answers[0].transcript.as_deref(), Some("Concurrent answer"));
    }

    #[tokio::test]
    async fn three_question_interview_end_to_end() {
        let evaluator = ScriptedEvaluator::new(5.0)
            .with_score("answer one", 6.0)
            .with_score("answer two", 8.0)
            .with_score("answer three", 10.0);
        let (fx, mut h) = started(&["Q1", "Q2", "Q3"], evaluator).await;
        let router = WebhookEventRouter::new(&h.state);

        let script = router.interview_script(fx.interview_id, 0).await.unwrap();
        assert!(!script.ends_call());
        router.route(status(SID, "in-progress")).await.unwrap();

        for (idx, text) in ["answer one", "answer two", "answer three"].iter().enumerate() {
            let reply = router
                .route(next_question(idx + 1, &format!("https%3A%2F%2Frec%2F{idx}")))
                .await
                .unwrap();
            let WebhookReply::Script(script) = reply else {
                panic!("expected a script reply");
            };
            assert_eq!(script.ends_call(), idx == 2);
            router.route(transcription(idx, text)).await.unwrap();
        }
        router.route(status(SID, "completed")).await.unwrap();

        let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
        assert_eq!(interview.status, InterviewStatus::Completed);
        assert!(h.jobs.try_recv().is_ok());

        let report = h
            .state
            .scoring_pipeline()
            .run(fx.interview_id, false)
            .await
            .unwrap();
        // every answer was scored inline already
        assert_eq!(
            report,
            ScoringReport::Scored {
                total_score: 8.0,
                newly_scored: 0
            }
        );
        let interview = fx.store.get_interview(fx.interview_id).await.unwrap().unwrap();
        assert_eq!(interview.total_score, Some(8.0));
        assert!(interview.recommendation.is_some());
        assert_eq!(h.evaluator.score_calls(), 3);
    }
}
