use crate::call_session::{interview_path, RECORDING_PATH, STATUS_PATH};
use crate::db_types::{
    Answer, CallEvent, Candidate, Interview, InterviewQuestion, InterviewStatus, Job, NewVoiceCall,
    VoiceCall,
};
use crate::error::{AppError, AppResult};
use crate::telephony::OutboundCall;
use crate::types::AppState;
use crate::utils::validate_phone_number;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Deserialize, Debug)]
pub struct CreateInterviewRequest {
    pub candidate_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct TriggerResponse {
    pub call_sid: String,
    pub interview_id: Uuid,
    pub status: InterviewStatus,
}

#[derive(Serialize, Debug)]
pub struct QuestionResult {
    pub question: InterviewQuestion,
    pub answer: Option<Answer>,
}

#[derive(Serialize, Debug)]
pub struct InterviewResults {
    pub interview: Interview,
    pub candidate: Option<Candidate>,
    pub job: Option<Job>,
    pub voice_call: Option<VoiceCall>,
    pub call_events: Vec<CallEvent>,
    pub questions: Vec<QuestionResult>,
}

pub async fn create_interview(
    state: &AppState,
    request: CreateInterviewRequest,
) -> AppResult<Interview> {
    let store = &state.store;
    if store.get_candidate(request.candidate_id).await?.is_none() {
        return Err(AppError::not_found(format!("candidate {}", request.candidate_id)));
    }
    if store.get_job(request.job_id).await?.is_none() {
        return Err(AppError::not_found(format!("job {}", request.job_id)));
    }
    let interview = store
        .create_interview(request.candidate_id, request.job_id)
        .await?;
    info!(interview_id=%interview.id, candidate_id=%request.candidate_id, job_id=%request.job_id, "interview created");
    Ok(interview)
}

/// Place the interview call.  Everything that can be checked locally is checked before the
/// provider is contacted, and the interview is claimed atomically so concurrent triggers dial at
/// most once.
pub async fn trigger_interview(state: &AppState, interview_id: Uuid) -> AppResult<TriggerResponse> {
    let store = &state.store;
    let interview = store
        .get_interview(interview_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?;
    if interview.status != InterviewStatus::Pending {
        return Err(not_pending(&interview));
    }
    let candidate = store
        .get_candidate(interview.candidate_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("candidate {}", interview.candidate_id)))?;
    validate_phone_number(&candidate.phone, &state.config.twilio.whitelisted_numbers)?;

    if store.claim_dial(interview_id).await?.is_none() {
        warn!(%interview_id, "interview is already being dialed");
        return Err(AppError::validation("interview is already being dialed"));
    }

    let controller = &state.controller;
    let call = OutboundCall {
        to: candidate.phone.clone(),
        script_url: controller.url(&interview_path(interview_id)),
        status_callback: controller.url(STATUS_PATH),
        recording_status_callback: controller.url(RECORDING_PATH),
    };
    let placed = match state.telephony.place_call(&call).await {
        Ok(placed) => placed,
        Err(e) => {
            if let Err(release) = store.release_dial(interview_id).await {
                error!(%interview_id, error=%release, "failed to release dial claim");
            }
            return Err(e);
        }
    };

    let started = store
        .start_interview(NewVoiceCall {
            interview_id,
            call_sid: placed.call_sid.clone(),
            to_phone: candidate.phone,
            from_phone: placed.from,
        })
        .await?;
    match started {
        Some((interview, voice_call)) => {
            info!(%interview_id, call_sid=%voice_call.call_sid, "interview call placed");
            Ok(TriggerResponse {
                call_sid: voice_call.call_sid,
                interview_id,
                status: interview.status,
            })
        }
        None => {
            error!(%interview_id, call_sid=%placed.call_sid, "claimed interview left pending while the call was placed");
            Err(AppError::validation("interview is no longer pending"))
        }
    }
}

fn not_pending(interview: &Interview) -> AppError {
    AppError::validation(format!(
        "interview is {}, not pending",
        interview.status.as_str()
    ))
}

pub async fn interview_results(state: &AppState, interview_id: Uuid) -> AppResult<InterviewResults> {
    let store = &state.store;
    let interview = store
        .get_interview(interview_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("interview {interview_id}")))?;
    let candidate = store.get_candidate(interview.candidate_id).await?;
    let job = store.get_job(interview.job_id).await?;
    let voice_call = store.get_voice_call_for_interview(interview_id).await?;
    let call_events = match &voice_call {
        Some(call) => store.list_call_events(call.id).await?,
        None => vec![],
    };
    let mut answers: HashMap<Uuid, Answer> = store
        .list_answers(interview_id)
        .await?
        .into_iter()
        .map(|a| (a.question_id, a))
        .collect();
    let questions = store
        .list_questions(interview.job_id)
        .await?
        .into_iter()
        .map(|question| QuestionResult {
            answer: answers.remove(&question.id),
            question,
        })
        .collect();
    Ok(InterviewResults {
        interview,
        candidate,
        job,
        voice_call,
        call_events,
        questions,
    })
}
