//! Deterministic doubles and fixtures shared by the test modules.

use crate::call_session::VoiceScript;
use crate::config::{Config, OpenAIConfig, ScoringConfig, TwilioConfig};
use crate::db_types::{Candidate, Difficulty, InterviewQuestion, Job, NewVoiceCall, VoiceCall};
use crate::error::{AppError, AppResult};
use crate::evaluator::{Evaluator, RecommendationRequest, ScoreResult};
use crate::memory_store::MemoryStore;
use crate::store::InterviewStore;
use crate::tasks::{scoring_channel, ScoringJob};
use crate::telephony::{render_twiml, OutboundCall, PlacedCall, TelephonyGateway};
use crate::types::AppState;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_PHONE: &str = "+14155552671";
pub const TEST_FROM: &str = "+15005550006";

pub fn test_config() -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        public_base_url: "https://interviews.example.com".to_string(),
        database_url: None,
        twilio: TwilioConfig {
            account_sid: "ACtest".to_string(),
            auth_token: "token".to_string(),
            phone_number: TEST_FROM.to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            whitelisted_numbers: HashSet::from([TEST_PHONE.to_string()]),
        },
        openai: OpenAIConfig {
            api_key: "sk-test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            model: "test-model".to_string(),
        },
        scoring: ScoringConfig {
            inline_timeout: Duration::from_millis(200),
            transcript_grace: Duration::from_millis(10),
            max_deferrals: 2,
        },
    }
}

#[derive(Default)]
pub struct FakeTelephony {
    placed: Mutex<Vec<OutboundCall>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeTelephony {
    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold every call request for `delay` before answering.
    pub fn delay_calls(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn placed_calls(&self) -> Vec<OutboundCall> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelephonyGateway for FakeTelephony {
    async fn place_call(&self, call: &OutboundCall) -> AppResult<PlacedCall> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::external("twilio rejected call request: 503"));
        }
        let mut placed = self.placed.lock().unwrap();
        placed.push(call.clone());
        Ok(PlacedCall {
            call_sid: format!("CA{:032}", placed.len()),
            from: TEST_FROM.to_string(),
            status: "queued".to_string(),
        })
    }

    fn render(&self, script: &VoiceScript) -> String {
        render_twiml(script)
    }
}

/// Evaluator with canned scores keyed by transcript.
pub struct ScriptedEvaluator {
    default_score: f64,
    scores: HashMap<String, f64>,
    failing: HashSet<String>,
    fail_recommendation: bool,
    delay: Option<Duration>,
    score_calls: AtomicUsize,
    recommendation_calls: AtomicUsize,
    last_request: Mutex<Option<RecommendationRequest>>,
}

impl ScriptedEvaluator {
    pub fn new(default_score: f64) -> Self {
        Self {
            default_score,
            scores: HashMap::new(),
            failing: HashSet::new(),
            fail_recommendation: false,
            delay: None,
            score_calls: AtomicUsize::new(0),
            recommendation_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_score(mut self, transcript: &str, score: f64) -> Self {
        self.scores.insert(transcript.to_string(), score);
        self
    }

    pub fn failing_on(mut self, transcript: &str) -> Self {
        self.failing.insert(transcript.to_string());
        self
    }

    pub fn failing_recommendation(mut self) -> Self {
        self.fail_recommendation = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }

    pub fn recommendation_calls(&self) -> usize {
        self.recommendation_calls.load(Ordering::SeqCst)
    }

    pub fn last_recommendation_request(&self) -> Option<RecommendationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn score_answer(
        &self,
        question: &str,
        transcript: &str,
        _expected_keywords: &[String],
    ) -> AppResult<ScoreResult> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(transcript) {
            return Err(AppError::external("OpenAI returned 500 Internal Server Error"));
        }
        let score = self
            .scores
            .get(transcript)
            .copied()
            .unwrap_or(self.default_score);
        Ok(ScoreResult {
            score,
            feedback: format!("scored answer to '{question}'"),
        })
    }

    async fn generate_recommendation(&self, request: &RecommendationRequest) -> AppResult<String> {
        self.recommendation_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail_recommendation {
            return Err(AppError::external("OpenAI returned an empty recommendation"));
        }
        Ok(format!(
            "Hire: {} scored {:.1}/10",
            request.candidate_name, request.total_score
        ))
    }
}

/// One candidate, one job with the given questions and one pending interview.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub candidate: Candidate,
    pub job_id: Uuid,
    pub questions: Vec<InterviewQuestion>,
    pub interview_id: Uuid,
}

/// App state wired to the fixture's store, plus the doubles and the scoring queue.
pub struct Harness {
    pub state: Arc<AppState>,
    pub telephony: Arc<FakeTelephony>,
    pub evaluator: Arc<ScriptedEvaluator>,
    pub jobs: mpsc::UnboundedReceiver<ScoringJob>,
}

impl Fixture {
    pub async fn new(question_texts: &[&str]) -> Self {
        Self::with_phone(question_texts, TEST_PHONE).await
    }

    pub async fn with_phone(question_texts: &[&str], phone: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        let candidate = Candidate {
            id: Uuid::new_v4(),
            name: "Ada Lovelace".to_string(),
            phone: phone.to_string(),
        };
        let job_id = Uuid::new_v4();
        store.insert_candidate(candidate.clone()).await;
        store
            .insert_job(Job {
                id: job_id,
                title: "Backend Engineer".to_string(),
            })
            .await;
        let mut questions = Vec::with_capacity(question_texts.len());
        for (idx, text) in question_texts.iter().enumerate() {
            let question = store
                .insert_question(
                    job_id,
                    text,
                    vec!["rust".to_string()],
                    Difficulty::Medium,
                    idx as i32 + 1,
                )
                .await;
            questions.push(question);
        }
        let interview = store.create_interview(candidate.id, job_id).await.unwrap();
        Self {
            store,
            candidate,
            job_id,
            questions,
            interview_id: interview.id,
        }
    }

    pub fn harness(&self, evaluator: Arc<ScriptedEvaluator>) -> Harness {
        let telephony = Arc::new(FakeTelephony::default());
        let (tx, jobs) = scoring_channel();
        let state = Arc::new(AppState::new(
            test_config(),
            self.store.clone(),
            telephony.clone(),
            evaluator.clone(),
            tx,
        ));
        Harness {
            state,
            telephony,
            evaluator,
            jobs,
        }
    }

    /// Put the interview in progress as if its call had just been placed.
    pub async fn start_call(&self, call_sid: &str) -> VoiceCall {
        let (_, call) = self
            .store
            .start_interview(NewVoiceCall {
                interview_id: self.interview_id,
                call_sid: call_sid.to_string(),
                to_phone: self.candidate.phone.clone(),
                from_phone: TEST_FROM.to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        call
    }
}
