use crate::db_types::{Answer, AnswerPatch};
use crate::error::AppResult;
use crate::evaluator::ScoreResult;
use crate::store::InterviewStore;

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Idempotent writes of per-question answer data.  Whichever webhook arrives first creates the
/// row; later ones merge their non-empty fields into it.
#[derive(Clone)]
pub struct AnswerRecorder {
    store: Arc<dyn InterviewStore>,
}

impl AnswerRecorder {
    pub fn new(store: Arc<dyn InterviewStore>) -> Self {
        Self { store }
    }

    pub async fn upsert(
        &self,
        interview_id: Uuid,
        question_id: Uuid,
        patch: AnswerPatch,
    ) -> AppResult<Answer> {
        let answer = self
            .store
            .upsert_answer(interview_id, question_id, patch)
            .await?;
        debug!(
            answer_id=%answer.id,
            %interview_id,
            %question_id,
            has_audio=answer.audio_url.is_some(),
            has_transcript=answer.transcript.is_some(),
            "answer upserted"
        );
        Ok(answer)
    }

    pub async fn record_audio(
        &self,
        interview_id: Uuid,
        question_id: Uuid,
        audio_url: Option<String>,
        audio_duration: Option<f64>,
    ) -> AppResult<Answer> {
        let patch = AnswerPatch {
            audio_url: audio_url.filter(|u| !u.trim().is_empty()),
            audio_duration,
            ..Default::default()
        };
        self.upsert(interview_id, question_id, patch).await
    }

    /// Store a transcription.  An empty text is still recorded so the answer stops waiting for
    /// one, but it never replaces text that already arrived.
    pub async fn record_transcript(
        &self,
        interview_id: Uuid,
        question_id: Uuid,
        text: &str,
        recording_url: Option<String>,
    ) -> AppResult<Answer> {
        let patch = AnswerPatch {
            transcript: Some(text.trim().to_string()),
            audio_url: recording_url.filter(|u| !u.trim().is_empty()),
            ..Default::default()
        };
        self.upsert(interview_id, question_id, patch).await
    }

    /// First score wins; returns the row as stored.
    pub async fn record_score(&self, answer_id: Uuid, result: &ScoreResult) -> AppResult<Answer> {
        self.store
            .fill_answer_score(answer_id, result.score, &result.feedback)
            .await
    }
}
