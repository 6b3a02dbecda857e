use crate::consts::{
    FALLBACK_RECOMMENDATION, NEUTRAL_SCORE, QA_SUMMARY_ANSWER_CHARS, SCORING_UNAVAILABLE_FEEDBACK,
};
use crate::db_types::{Answer, AnswerScore, InterviewQuestion};
use crate::error::{AppError, AppResult};
use crate::evaluator::{Evaluator, RecommendationRequest, ScoreResult};
use crate::store::InterviewStore;
use crate::utils::truncate_chars;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum ScoringReport {
    /// The interview already carries a total score; nothing was touched.
    AlreadyScored,
    /// Some recorded answers still wait for their transcription.
    Deferred { pending: usize },
    /// No answer had transcript text, so no total and no recommendation.
    NothingToScore,
    Scored { total_score: f64, newly_scored: usize },
}

/// Turns transcribed answers into scores, a total and a hiring recommendation.
pub struct ScoringPipeline {
    store: Arc<dyn InterviewStore>,
    evaluator: Arc<dyn Evaluator>,
}

impl ScoringPipeline {
    pub fn new(store: Arc<dyn InterviewStore>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Score whatever is unscored and finalize the interview.  With `force` unset the run is
    /// deferred while transcriptions are outstanding.
    pub async fn run(&self, interview_id: Uuid, force: bool) -> AppResult<ScoringReport> {
        let interview = self
            .store
            .get_interview(interview_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?;
        if interview.total_score.is_some() {
            debug!(%interview_id, "interview already scored");
            return Ok(ScoringReport::AlreadyScored);
        }

        let answers = self.store.list_answers(interview_id).await?;
        let pending = answers.iter().filter(|a| a.awaiting_transcript()).count();
        if pending > 0 && !force {
            info!(%interview_id, pending, "transcriptions outstanding; deferring scoring");
            return Ok(ScoringReport::Deferred { pending });
        }

        let transcribed: Vec<&Answer> = answers.iter().filter(|a| a.has_transcript_text()).collect();
        if transcribed.is_empty() {
            info!(%interview_id, answers=answers.len(), "no transcribed answers to score");
            return Ok(ScoringReport::NothingToScore);
        }

        let questions: HashMap<Uuid, InterviewQuestion> = self
            .store
            .list_questions(interview.job_id)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();

        let mut new_scores = Vec::new();
        let mut individual_scores = Vec::with_capacity(transcribed.len());
        for answer in &transcribed {
            if let Some(score) = answer.score {
                individual_scores.push(score);
                continue;
            }
            let result = self
                .score_one(answer, questions.get(&answer.question_id))
                .await;
            individual_scores.push(result.score);
            new_scores.push(AnswerScore {
                answer_id: answer.id,
                score: result.score,
                feedback: result.feedback,
            });
        }
        let total_score = individual_scores.iter().sum::<f64>() / individual_scores.len() as f64;

        let candidate_name = self
            .store
            .get_candidate(interview.candidate_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_else(|| "Candidate".to_string());
        let request = RecommendationRequest {
            candidate_name,
            total_score,
            individual_scores,
            qa_summary: qa_summary(&transcribed, &questions),
        };
        let recommendation = match self.evaluator.generate_recommendation(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%interview_id, error=%e, "recommendation failed; storing fallback");
                FALLBACK_RECOMMENDATION.to_string()
            }
        };

        let newly_scored = new_scores.len();
        match self
            .store
            .finalize_scoring(interview_id, &new_scores, &recommendation)
            .await?
        {
            Some(stored) => {
                // The stored mean wins over ours when an inline score landed in between.
                let total_score = stored.total_score.unwrap_or(total_score);
                info!(%interview_id, total_score, newly_scored, "interview scored");
                Ok(ScoringReport::Scored {
                    total_score,
                    newly_scored,
                })
            }
            None => {
                debug!(%interview_id, "interview was scored concurrently");
                Ok(ScoringReport::AlreadyScored)
            }
        }
    }

    async fn score_one(&self, answer: &Answer, question: Option<&InterviewQuestion>) -> ScoreResult {
        let transcript = answer.transcript.as_deref().unwrap_or_default();
        let res = match question {
            Some(q) => {
                self.evaluator
                    .score_answer(&q.question_text, transcript, &q.expected_keywords)
                    .await
            }
            None => Err(AppError::not_found(format!("question {}", answer.question_id))),
        };
        res.unwrap_or_else(|e| {
            warn!(answer_id=%answer.id, error=%e, "answer scoring failed; using neutral score");
            ScoreResult {
                score: NEUTRAL_SCORE,
                feedback: SCORING_UNAVAILABLE_FEEDBACK.to_string(),
            }
        })
    }
}

fn qa_summary(answers: &[&Answer], questions: &HashMap<Uuid, InterviewQuestion>) -> String {
    answers
        .iter()
        .map(|a| {
            let question = questions
                .get(&a.question_id)
                .map(|q| q.question_text.as_str())
                .unwrap_or_default();
            let transcript = a.transcript.as_deref().unwrap_or_default();
            format!(
                "Q: {question}\nA: {}",
                truncate_chars(transcript, QA_SUMMARY_ANSWER_CHARS)
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}
