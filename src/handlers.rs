use crate::call_session::{VoiceScript, RECORDING_PATH, STATUS_PATH};
use crate::db_types::Interview;
use crate::error::{AppError, AppResult};
use crate::interviews::{self, CreateInterviewRequest, InterviewResults, TriggerResponse};
use crate::twilio_types::InterviewScriptPayload;
use crate::types::AppState;
use crate::webhooks::{WebhookEvent, WebhookEventRouter, WebhookReply};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/interview/:interview_id", post(interview_twiml))
        .route("/webhook/next-question/:question_index", post(next_question_twiml))
        .route("/webhook/transcription/:question_index", post(transcription_webhook))
        .route(STATUS_PATH, post(status_webhook))
        .route(RECORDING_PATH, post(recording_webhook))
        .route("/interviews", post(create_interview))
        .route("/interviews/:interview_id/trigger", post(trigger_interview))
        .route("/interviews/:interview_id/results", get(interview_results))
        .route("/healthz", get(|| async { "OK" }))
        .with_state(app_state)
}

fn twiml_response(app_state: &AppState, script: &VoiceScript) -> (StatusCode, HeaderMap, String) {
    let twiml = app_state.telephony.render(script);
    trace!("twiml: '{}'", twiml);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(app_state.telephony.content_type()),
    );
    (StatusCode::OK, headers, twiml)
}

/// The provider only understands markup on these endpoints, so every failure is answered with the
/// apology script.
fn script_or_fallback(
    app_state: &AppState,
    result: AppResult<VoiceScript>,
) -> (StatusCode, HeaderMap, String) {
    let script = result.unwrap_or_else(|e| {
        error!(error=%e, "failed to build voice script; serving fallback");
        VoiceScript::fallback()
    });
    twiml_response(app_state, &script)
}

/// Acknowledge a webhook.  Unknown entities are acknowledged too, since retrying cannot fix them.
fn ack(result: AppResult<WebhookReply>) -> Response {
    match result {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(AppError::NotFound(what)) => {
            warn!(not_found=%what, "acknowledging webhook for unknown entity");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e @ AppError::Validation(_)) => {
            warn!(error=%e, "rejecting malformed webhook");
            (StatusCode::BAD_REQUEST, "Bad request").into_response()
        }
        Err(e) => {
            error!(error=%e, "failed to handle webhook");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

fn parse_index(raw: &str) -> AppResult<usize> {
    raw.parse::<usize>()
        .map_err(|_| AppError::validation(format!("invalid question index '{raw}'")))
}

async fn route_event(app_state: &AppState, event: AppResult<WebhookEvent>) -> AppResult<WebhookReply> {
    let event = event?;
    debug!(call_sid=%event.call_sid(), "routing webhook event");
    WebhookEventRouter::new(app_state).route(event).await
}

async fn interview_script(
    app_state: &AppState,
    interview_id: &str,
    body: &str,
) -> AppResult<VoiceScript> {
    let interview_id = Uuid::parse_str(interview_id)
        .map_err(|_| AppError::validation(format!("invalid interview id '{interview_id}'")))?;
    let payload = serde_urlencoded::from_str::<InterviewScriptPayload>(body).map_err(|e| {
        error!(error=%e, "failed to deserialize interview script payload");
        AppError::validation("malformed interview script request")
    })?;
    WebhookEventRouter::new(app_state)
        .interview_script(interview_id, payload.current_question.unwrap_or(0))
        .await
}

pub async fn interview_twiml(
    Path(interview_id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "interview script request body");
    let result = interview_script(&app_state, &interview_id, &body).await;
    script_or_fallback(&app_state, result)
}

pub async fn next_question_twiml(
    Path(question_index): Path<String>,
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "next question request body");
    let event = parse_index(&question_index).and_then(|i| WebhookEvent::next_question(i, &body));
    let result = match route_event(&app_state, event).await {
        Ok(WebhookReply::Script(script)) => Ok(script),
        Ok(WebhookReply::Ack) => Ok(VoiceScript::closing()),
        Err(e) => Err(e),
    };
    script_or_fallback(&app_state, result)
}

pub async fn transcription_webhook(
    Path(question_index): Path<String>,
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Response {
    trace!(body=%body, "transcription callback body");
    let event = parse_index(&question_index).and_then(|i| WebhookEvent::transcription(i, &body));
    ack(route_event(&app_state, event).await)
}

pub async fn status_webhook(State(app_state): State<Arc<AppState>>, body: String) -> Response {
    trace!(body=%body, "status callback body");
    ack(route_event(&app_state, WebhookEvent::status(&body)).await)
}

pub async fn recording_webhook(State(app_state): State<Arc<AppState>>, body: String) -> Response {
    trace!(body=%body, "recording callback body");
    ack(route_event(&app_state, WebhookEvent::recording(&body)).await)
}

pub async fn create_interview(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<CreateInterviewRequest>,
) -> AppResult<(StatusCode, Json<Interview>)> {
    let interview = interviews::create_interview(&app_state, request).await?;
    Ok((StatusCode::CREATED, Json(interview)))
}

pub async fn trigger_interview(
    Path(interview_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
) -> AppResult<Json<TriggerResponse>> {
    let res = interviews::trigger_interview(&app_state, interview_id).await?;
    Ok(Json(res))
}

pub async fn interview_results(
    Path(interview_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
) -> AppResult<Json<InterviewResults>> {
    let res = interviews::interview_results(&app_state, interview_id).await?;
    Ok(Json(res))
}
