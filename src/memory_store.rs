use crate::db_types::{
    Answer, AnswerPatch, AnswerScore, CallEvent, Candidate, Difficulty, Interview,
    InterviewQuestion, InterviewStatus, Job, NewVoiceCall, RecordingPatch, VoiceCall,
    VoiceCallStatus,
};
use crate::error::{AppError, AppResult};
use crate::store::{InterviewStore, DIAL_CLAIM_TTL};

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::types::time::OffsetDateTime;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    candidates: HashMap<Uuid, Candidate>,
    jobs: HashMap<Uuid, Job>,
    // question => insertion sequence, used as the last ordering tie-break
    questions: Vec<(u64, InterviewQuestion)>,
    interviews: HashMap<Uuid, Interview>,
    voice_calls: HashMap<String, VoiceCall>,
    call_events: Vec<CallEvent>,
    answers: HashMap<(Uuid, Uuid), Answer>,
    seq: u64,
}

impl MemoryState {
    fn ordered_questions(&self, job_id: Uuid) -> Vec<InterviewQuestion> {
        let mut questions: Vec<&(u64, InterviewQuestion)> = self
            .questions
            .iter()
            .filter(|(_, q)| q.job_id == job_id)
            .collect();
        questions.sort_by_key(|(seq, q)| (q.order, q.created_at, *seq));
        questions.into_iter().map(|(_, q)| q.clone()).collect()
    }

    fn answer_by_id(&mut self, answer_id: Uuid) -> Option<&mut Answer> {
        self.answers.values_mut().find(|a| a.id == answer_id)
    }
}

/// Process-local store.  Used for development without a database and as the store behind tests.
/// A single lock makes every operation atomic, matching the per-statement guarantees of
/// [`crate::store::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

/// Seed data for the read-only side (candidates, jobs, questions).
#[derive(Deserialize, Default)]
pub struct Seed {
    #[serde(default)]
    pub candidates: Vec<SeedCandidate>,
    #[serde(default)]
    pub jobs: Vec<SeedJob>,
}

#[derive(Deserialize)]
pub struct SeedCandidate {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Deserialize)]
pub struct SeedJob {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<SeedQuestion>,
}

#[derive(Deserialize)]
pub struct SeedQuestion {
    pub text: String,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub order: Option<i32>,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!(error=%e, path=%path.display(), "failed to read seed file");
            AppError::Config(format!("cannot read seed file {}", path.display()))
        })?;
        let seed: Seed = serde_json::from_str(&raw).map_err(|e| {
            error!(error=%e, "failed to deserialize seed file");
            AppError::Config(format!("invalid seed file: {e}"))
        })?;
        let store = Self::new();
        store.load_seed(seed).await?;
        Ok(store)
    }

    pub async fn load_seed(&self, seed: Seed) -> AppResult<()> {
        let (mut candidates, mut questions) = (0, 0);
        for c in seed.candidates {
            self.insert_candidate(Candidate {
                id: c.id,
                name: c.name,
                phone: c.phone,
            })
            .await;
            candidates += 1;
        }
        for job in seed.jobs {
            self.insert_job(Job {
                id: job.id,
                title: job.title,
            })
            .await;
            for (idx, q) in job.questions.into_iter().enumerate() {
                let difficulty = Difficulty::try_from(q.difficulty)?;
                self.insert_question(
                    job.id,
                    &q.text,
                    q.expected_keywords,
                    difficulty,
                    q.order.unwrap_or(idx as i32 + 1),
                )
                .await;
                questions += 1;
            }
        }
        info!(candidates, questions, "loaded seed data into memory store");
        Ok(())
    }

    pub async fn insert_candidate(&self, candidate: Candidate) {
        let mut state = self.state.lock().await;
        state.candidates.insert(candidate.id, candidate);
    }

    pub async fn insert_job(&self, job: Job) {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id, job);
    }

    pub async fn insert_question(
        &self,
        job_id: Uuid,
        text: &str,
        expected_keywords: Vec<String>,
        difficulty: Difficulty,
        order: i32,
    ) -> InterviewQuestion {
        let mut state = self.state.lock().await;
        state.seq += 1;
        let seq = state.seq;
        let question = InterviewQuestion {
            id: Uuid::new_v4(),
            job_id,
            question_text: text.to_string(),
            expected_keywords,
            difficulty,
            order,
            created_at: OffsetDateTime::now_utc(),
        };
        state.questions.push((seq, question.clone()));
        question
    }
}

#[async_trait]
impl InterviewStore for MemoryStore {
    async fn get_candidate(&self, id: Uuid) -> AppResult<Option<Candidate>> {
        Ok(self.state.lock().await.candidates.get(&id).cloned())
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn list_questions(&self, job_id: Uuid) -> AppResult<Vec<InterviewQuestion>> {
        Ok(self.state.lock().await.ordered_questions(job_id))
    }

    async fn create_interview(&self, candidate_id: Uuid, job_id: Uuid) -> AppResult<Interview> {
        let mut state = self.state.lock().await;
        if !state.candidates.contains_key(&candidate_id) {
            return Err(AppError::not_found(format!("candidate {candidate_id}")));
        }
        if !state.jobs.contains_key(&job_id) {
            return Err(AppError::not_found(format!("job {job_id}")));
        }
        let interview = Interview {
            id: Uuid::new_v4(),
            candidate_id,
            job_id,
            status: InterviewStatus::Pending,
            call_sid: None,
            started_at: None,
            completed_at: None,
            total_score: None,
            recommendation: None,
            dial_claimed_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        state.interviews.insert(interview.id, interview.clone());
        Ok(interview)
    }

    async fn get_interview(&self, id: Uuid) -> AppResult<Option<Interview>> {
        Ok(self.state.lock().await.interviews.get(&id).cloned())
    }

    async fn claim_dial(&self, id: Uuid) -> AppResult<Option<Interview>> {
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();
        match state.interviews.get_mut(&id) {
            Some(i)
                if i.status == InterviewStatus::Pending
                    && i.dial_claimed_at.map_or(true, |at| now - at >= DIAL_CLAIM_TTL) =>
            {
                i.dial_claimed_at = Some(now);
                Ok(Some(i.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_dial(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(i) = state.interviews.get_mut(&id) {
            if i.status == InterviewStatus::Pending {
                i.dial_claimed_at = None;
            }
        }
        Ok(())
    }

    async fn start_interview(&self, call: NewVoiceCall) -> AppResult<Option<(Interview, VoiceCall)>> {
        let mut state = self.state.lock().await;
        if state.voice_calls.contains_key(&call.call_sid)
            || state
                .voice_calls
                .values()
                .any(|vc| vc.interview_id == call.interview_id)
        {
            return Err(AppError::validation(format!(
                "voice call already exists for interview {}",
                call.interview_id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let interview = match state.interviews.get_mut(&call.interview_id) {
            Some(i) if i.status == InterviewStatus::Pending => {
                i.status = InterviewStatus::InProgress;
                i.call_sid = Some(call.call_sid.clone());
                i.started_at = Some(now);
                i.clone()
            }
            _ => return Ok(None),
        };
        let voice_call = VoiceCall {
            id: Uuid::new_v4(),
            interview_id: call.interview_id,
            call_sid: call.call_sid,
            to_phone: call.to_phone,
            from_phone: call.from_phone,
            status: VoiceCallStatus::Initiated,
            duration: None,
            recording_url: None,
            recording_sid: None,
            started_at: None,
            ended_at: None,
            created_at: now,
        };
        state
            .voice_calls
            .insert(voice_call.call_sid.clone(), voice_call.clone());
        Ok(Some((interview, voice_call)))
    }

    async fn finish_interview(
        &self,
        id: Uuid,
        outcome: InterviewStatus,
    ) -> AppResult<Option<Interview>> {
        let mut state = self.state.lock().await;
        match state.interviews.get_mut(&id) {
            Some(i) if !i.status.is_terminal() => {
                i.status = outcome;
                i.completed_at.get_or_insert_with(OffsetDateTime::now_utc);
                Ok(Some(i.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn get_voice_call_by_sid(&self, call_sid: &str) -> AppResult<Option<VoiceCall>> {
        Ok(self.state.lock().await.voice_calls.get(call_sid).cloned())
    }

    async fn get_voice_call_for_interview(
        &self,
        interview_id: Uuid,
    ) -> AppResult<Option<VoiceCall>> {
        Ok(self
            .state
            .lock()
            .await
            .voice_calls
            .values()
            .find(|vc| vc.interview_id == interview_id)
            .cloned())
    }

    async fn advance_call_status(
        &self,
        call_sid: &str,
        status: VoiceCallStatus,
        duration: Option<i32>,
    ) -> AppResult<Option<VoiceCall>> {
        let mut state = self.state.lock().await;
        let Some(call) = state.voice_calls.get_mut(call_sid) else {
            return Ok(None);
        };
        if call.status.rank() >= status.rank() {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        call.status = status;
        if status == VoiceCallStatus::InProgress {
            call.started_at.get_or_insert(now);
        }
        if status.is_terminal() {
            call.ended_at.get_or_insert(now);
        }
        if duration.is_some() {
            call.duration = duration;
        }
        Ok(Some(call.clone()))
    }

    async fn record_call_recording(
        &self,
        call_sid: &str,
        patch: RecordingPatch,
    ) -> AppResult<Option<VoiceCall>> {
        let mut state = self.state.lock().await;
        let Some(call) = state.voice_calls.get_mut(call_sid) else {
            return Ok(None);
        };
        if patch.recording_url.is_some() {
            call.recording_url = patch.recording_url;
        }
        if patch.recording_sid.is_some() {
            call.recording_sid = patch.recording_sid;
        }
        if patch.duration.is_some() {
            call.duration = patch.duration;
        }
        Ok(Some(call.clone()))
    }

    async fn append_call_event(
        &self,
        voice_call_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> AppResult<CallEvent> {
        let event = CallEvent {
            id: Uuid::new_v4(),
            voice_call_id,
            event_type: event_type.to_string(),
            payload,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().await.call_events.push(event.clone());
        Ok(event)
    }

    async fn list_call_events(&self, voice_call_id: Uuid) -> AppResult<Vec<CallEvent>> {
        Ok(self
            .state
            .lock()
            .await
            .call_events
            .iter()
            .filter(|e| e.voice_call_id == voice_call_id)
            .cloned()
            .collect())
    }

    async fn upsert_answer(
        &self,
        interview_id: Uuid,
        question_id: Uuid,
        patch: AnswerPatch,
    ) -> AppResult<Answer> {
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();
        let answer = state
            .answers
            .entry((interview_id, question_id))
            .or_insert_with(|| Answer {
                id: Uuid::new_v4(),
                interview_id,
                question_id,
                transcript: None,
                audio_url: None,
                audio_duration: None,
                score: None,
                feedback: None,
                created_at: now,
                updated_at: now,
            });
        match patch.transcript {
            Some(text) if text.is_empty() => {
                answer.transcript.get_or_insert(text);
            }
            Some(text) => answer.transcript = Some(text),
            None => (),
        }
        if patch.audio_url.is_some() {
            answer.audio_url = patch.audio_url;
        }
        if patch.audio_duration.is_some() {
            answer.audio_duration = patch.audio_duration;
        }
        answer.updated_at = now;
        Ok(answer.clone())
    }

    async fn fill_answer_score(
        &self,
        answer_id: Uuid,
        score: f64,
        feedback: &str,
    ) -> AppResult<Answer> {
        let mut state = self.state.lock().await;
        let answer = state
            .answer_by_id(answer_id)
            .ok_or_else(|| AppError::not_found(format!("answer {answer_id}")))?;
        if answer.score.is_none() {
            answer.score = Some(score);
            answer.feedback = Some(feedback.to_string());
            answer.updated_at = OffsetDateTime::now_utc();
        }
        Ok(answer.clone())
    }

    async fn list_answers(&self, interview_id: Uuid) -> AppResult<Vec<Answer>> {
        let state = self.state.lock().await;
        let Some(interview) = state.interviews.get(&interview_id) else {
            return Ok(vec![]);
        };
        Ok(state
            .ordered_questions(interview.job_id)
            .iter()
            .filter_map(|q| state.answers.get(&(interview_id, q.id)).cloned())
            .collect())
    }

    async fn finalize_scoring(
        &self,
        interview_id: Uuid,
        scores: &[AnswerScore],
        recommendation: &str,
    ) -> AppResult<Option<Interview>> {
        let mut state = self.state.lock().await;
        match state.interviews.get(&interview_id) {
            Some(i) if i.total_score.is_none() => (),
            _ => return Ok(None),
        }
        let now = OffsetDateTime::now_utc();
        for s in scores {
            if let Some(answer) = state.answer_by_id(s.answer_id) {
                if answer.score.is_none() {
                    answer.score = Some(s.score);
                    answer.feedback = Some(s.feedback.clone());
                    answer.updated_at = now;
                }
            }
        }
        let stored: Vec<f64> = state
            .answers
            .values()
            .filter(|a| a.interview_id == interview_id)
            .filter_map(|a| a.score)
            .collect();
        let total = (!stored.is_empty()).then(|| stored.iter().sum::<f64>() / stored.len() as f64);
        let interview = state
            .interviews
            .get_mut(&interview_id)
            .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?;
        interview.total_score = total;
        interview.recommendation = Some(recommendation.to_string());
        Ok(Some(interview.clone()))
    }
}
