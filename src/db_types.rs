use crate::error::AppError;

use serde::{Deserialize, Serialize};
use sqlx::types::time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStatus::Pending => "pending",
            InterviewStatus::InProgress => "in_progress",
            InterviewStatus::Completed => "completed",
            InterviewStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InterviewStatus::Completed | InterviewStatus::Failed)
    }
}

impl TryFrom<String> for InterviewStatus {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "pending" => Ok(InterviewStatus::Pending),
            "in_progress" => Ok(InterviewStatus::InProgress),
            "completed" => Ok(InterviewStatus::Completed),
            "failed" => Ok(InterviewStatus::Failed),
            other => Err(AppError::validation(format!(
                "unknown interview status '{other}'"
            ))),
        }
    }
}

/// Status of a single call leg.  Ordered by rank; the last four are terminal and share the top
/// rank, so none of them can replace another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceCallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
}

impl VoiceCallStatus {
    pub const ALL: [VoiceCallStatus; 7] = [
        VoiceCallStatus::Initiated,
        VoiceCallStatus::Ringing,
        VoiceCallStatus::InProgress,
        VoiceCallStatus::Completed,
        VoiceCallStatus::Failed,
        VoiceCallStatus::NoAnswer,
        VoiceCallStatus::Busy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceCallStatus::Initiated => "initiated",
            VoiceCallStatus::Ringing => "ringing",
            VoiceCallStatus::InProgress => "in_progress",
            VoiceCallStatus::Completed => "completed",
            VoiceCallStatus::Failed => "failed",
            VoiceCallStatus::NoAnswer => "no_answer",
            VoiceCallStatus::Busy => "busy",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            VoiceCallStatus::Initiated => 0,
            VoiceCallStatus::Ringing => 1,
            VoiceCallStatus::InProgress => 2,
            _ => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Statuses a call may currently be in for a transition to `self` to be a forward move.
    pub fn predecessors(&self) -> Vec<VoiceCallStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.rank() < self.rank())
            .collect()
    }

    /// The interview status a terminal call status settles on.
    pub fn interview_outcome(&self) -> Option<InterviewStatus> {
        match self {
            VoiceCallStatus::Completed => Some(InterviewStatus::Completed),
            VoiceCallStatus::Failed | VoiceCallStatus::NoAnswer | VoiceCallStatus::Busy => {
                Some(InterviewStatus::Failed)
            }
            _ => None,
        }
    }
}

impl TryFrom<String> for VoiceCallStatus {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("unknown call status '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl TryFrom<String> for Difficulty {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(AppError::validation(format!("unknown difficulty '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub title: String,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct InterviewQuestion {
    pub id: Uuid,
    pub job_id: Uuid,
    pub question_text: String,
    pub expected_keywords: Vec<String>,
    #[sqlx(try_from = "String")]
    pub difficulty: Difficulty,
    #[sqlx(rename = "question_order")]
    pub order: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Interview {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: InterviewStatus,
    pub call_sid: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub total_score: Option<f64>,
    pub recommendation: Option<String>,
    /// Set while a trigger holds the right to dial this interview.
    #[serde(with = "time::serde::rfc3339::option")]
    pub dial_claimed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct VoiceCall {
    pub id: Uuid,
    pub interview_id: Uuid,
    pub call_sid: String,
    pub to_phone: String,
    pub from_phone: String,
    #[sqlx(try_from = "String")]
    pub status: VoiceCallStatus,
    /// Seconds
    pub duration: Option<i32>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct CallEvent {
    pub id: Uuid,
    pub voice_call_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub interview_id: Uuid,
    pub question_id: Uuid,
    /// `Some("")` means the provider reported an empty or failed transcription.
    pub transcript: Option<String>,
    pub audio_url: Option<String>,
    pub audio_duration: Option<f64>,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Answer {
    pub fn has_transcript_text(&self) -> bool {
        self.transcript
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    /// Audio was captured but the provider has not delivered a transcription yet.
    pub fn awaiting_transcript(&self) -> bool {
        self.audio_url.is_some() && self.transcript.is_none()
    }
}

/// Partial answer data carried by a single webhook.  `None` fields leave the stored value alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnswerPatch {
    pub transcript: Option<String>,
    pub audio_url: Option<String>,
    pub audio_duration: Option<f64>,
}

/// Partial call-level recording metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordingPatch {
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub duration: Option<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewVoiceCall {
    pub interview_id: Uuid,
    pub call_sid: String,
    pub to_phone: String,
    pub from_phone: String,
}

/// A score decided by the scoring pipeline, not yet persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct AnswerScore {
    pub answer_id: Uuid,
    pub score: f64,
    pub feedback: String,
}
