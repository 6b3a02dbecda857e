use crate::config::OpenAIConfig;
use crate::error::{AppError, AppResult};
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload, ScoreReply};

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const MAX_SCORE: f64 = 10.0;

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreResult {
    pub score: f64,
    pub feedback: String,
}

/// Aggregate interview data handed to the evaluator for the final recommendation.
#[derive(Clone, Debug, PartialEq)]
pub struct RecommendationRequest {
    pub candidate_name: String,
    pub total_score: f64,
    pub individual_scores: Vec<f64>,
    pub qa_summary: String,
}

/// Scores answers and writes recommendations.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn score_answer(
        &self,
        question: &str,
        transcript: &str,
        expected_keywords: &[String],
    ) -> AppResult<ScoreResult>;

    async fn generate_recommendation(&self, request: &RecommendationRequest) -> AppResult<String>;
}

/// Evaluator backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAIEvaluator {
    http_client: reqwest::Client,
    config: OpenAIConfig,
    request_timeout: Duration,
}

impl OpenAIEvaluator {
    pub fn new(http_client: reqwest::Client, config: OpenAIConfig) -> Self {
        Self {
            http_client,
            config,
            request_timeout: Duration::from_secs(30),
        }
    }

    async fn complete(
        &self,
        messages: Vec<OpenAIMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let key = self.config.api_key.as_str();
        let payload = OpenAIPayload {
            model: self.config.model.clone(),
            messages,
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };
        let resp = self
            .http_client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send request to OpenAI");
                AppError::external("failed to send request to OpenAI")
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            error!(%status, "OpenAI returned an error status");
            return Err(AppError::external(format!("OpenAI returned {status}")));
        }
        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize openai completion response");
            AppError::external("malformed OpenAI response")
        })?;
        if let Some(usage) = &resp.usage {
            debug!(
                id=%resp.id,
                model=%resp.model,
                prompt_tokens=usage.prompt_tokens,
                completion_tokens=usage.completion_tokens,
                total_tokens=usage.total_tokens,
                "openai completion"
            );
        }
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::external("OpenAI response had no choices"))?;
        if choice.finish_reason.as_deref() == Some("length") {
            warn!(index = choice.index, "OpenAI reply was cut off at max_tokens");
        }
        Ok(choice.message.content)
    }
}

#[async_trait]
impl Evaluator for OpenAIEvaluator {
    async fn score_answer(
        &self,
        question: &str,
        transcript: &str,
        expected_keywords: &[String],
    ) -> AppResult<ScoreResult> {
        let prompt = vec![
            OpenAIMessage::system(
                "You are an expert technical interviewer. Provide fair and constructive scoring.",
            ),
            OpenAIMessage::user(score_prompt(question, transcript, expected_keywords)),
        ];
        let content = self.complete(prompt, 0.3, 500).await?;
        parse_score_reply(&content)
    }

    async fn generate_recommendation(&self, request: &RecommendationRequest) -> AppResult<String> {
        let prompt = vec![
            OpenAIMessage::system(
                "You are an experienced hiring manager providing final interview recommendations.",
            ),
            OpenAIMessage::user(recommendation_prompt(request)),
        ];
        let content = self.complete(prompt, 0.5, 800).await?;
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::external("OpenAI returned an empty recommendation"));
        }
        Ok(content.to_string())
    }
}

pub fn score_prompt(question: &str, transcript: &str, expected_keywords: &[String]) -> String {
    format!(
        "Question: {question}\n\
         Answer: {transcript}\n\
         Expected Keywords: {keywords}\n\n\
         Please score this interview answer on a scale of 0-10 and provide feedback.\n\
         Consider:\n\
         1. Relevance to the question (0-3 points)\n\
         2. Technical accuracy (0-3 points)\n\
         3. Communication clarity (0-2 points)\n\
         4. Use of expected keywords (0-2 points)\n\n\
         Return response as JSON:\n\
         {{\"score\": 7.5, \"feedback\": \"Detailed feedback here\", \
         \"strengths\": [\"strength1\"], \"improvements\": [\"improvement1\"]}}",
        keywords = expected_keywords.join(", "),
    )
}

pub fn recommendation_prompt(request: &RecommendationRequest) -> String {
    let scores = request
        .individual_scores
        .iter()
        .map(|s| format!("{s:.1}"))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "Based on the following interview performance data, provide a hiring recommendation:\n\n\
         Candidate: {name}\n\
         Total Score: {total:.1}/10\n\
         Individual Scores: [{scores}]\n\n\
         Questions and Answers:\n{qa}\n\n\
         Please provide:\n\
         1. Overall recommendation (Hire/Maybe/Reject)\n\
         2. Key strengths\n\
         3. Areas of concern\n\
         4. Suggested next steps\n\n\
         Keep it professional and constructive.",
        name = request.candidate_name,
        total = request.total_score,
        qa = request.qa_summary,
    )
}

/// Models like to wrap JSON in prose or code fences; take the outermost object.
fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

pub fn parse_score_reply(content: &str) -> AppResult<ScoreResult> {
    let json = extract_json_object(content).ok_or_else(|| {
        warn!(content=%content, "score reply contained no JSON object");
        AppError::external("score reply contained no JSON object")
    })?;
    let reply: ScoreReply = serde_json::from_str(json).map_err(|e| {
        warn!(error=%e, content=%content, "failed to deserialize score reply");
        AppError::external("malformed score reply")
    })?;
    if !reply.score.is_finite() {
        return Err(AppError::external("score reply had a non-finite score"));
    }

    let mut feedback = reply.feedback.trim().to_string();
    if !reply.strengths.is_empty() {
        feedback.push_str(&format!("\nStrengths: {}", reply.strengths.join("; ")));
    }
    if !reply.improvements.is_empty() {
        feedback.push_str(&format!("\nImprovements: {}", reply.improvements.join("; ")));
    }
    Ok(ScoreResult {
        score: reply.score.clamp(0.0, MAX_SCORE),
        feedback: feedback.trim().to_string(),
    })
}
