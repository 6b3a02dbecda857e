use crate::call_session::{ScriptStep, VoiceScript};
use crate::config::TwilioConfig;
use crate::consts::{CALL_RING_TIMEOUT_SECS, TWIML_VOICE};
use crate::error::{AppError, AppResult};
use crate::twilio_types::{
    wrap_twiml, CallResource, HangupAction, HttpMethod, RecordAction, Response, ResponseAction,
    SayAction, TwilioApiError, TwimlBool,
};

use async_trait::async_trait;
use tracing::{error, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundCall {
    pub to: String,
    /// Fetched by the provider once the callee answers; returns the first script.
    pub script_url: String,
    pub status_callback: String,
    /// Receives the whole-call recording once the provider has stored it.
    pub recording_status_callback: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedCall {
    pub call_sid: String,
    pub from: String,
    pub status: String,
}

/// Outbound calling and voice markup for one telephony provider.
#[async_trait]
pub trait TelephonyGateway: Send + Sync {
    async fn place_call(&self, call: &OutboundCall) -> AppResult<PlacedCall>;

    /// Render a script into the provider's markup document.
    fn render(&self, script: &VoiceScript) -> String;

    fn content_type(&self) -> &'static str {
        "application/xml"
    }
}

pub struct TwilioGateway {
    http_client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioGateway {
    pub fn new(http_client: reqwest::Client, config: TwilioConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

pub fn render_twiml(script: &VoiceScript) -> String {
    let actions = script
        .steps
        .iter()
        .map(|step| match step {
            ScriptStep::Say(text) => ResponseAction::Say(SayAction {
                text: text.clone(),
                voice: Some(TWIML_VOICE.to_string()),
                ..Default::default()
            }),
            ScriptStep::Record {
                max_length_secs,
                finish_on_key,
                transcribe_callback,
                action,
            } => ResponseAction::Record(RecordAction {
                action: Some(action.clone()),
                method: Some(HttpMethod::Post),
                max_length: Some(*max_length_secs),
                finish_on_key: Some(finish_on_key.clone()),
                play_beep: Some(TwimlBool::True),
                transcribe: Some(TwimlBool::True),
                transcribe_callback: Some(transcribe_callback.clone()),
            }),
            ScriptStep::Hangup => ResponseAction::Hangup(HangupAction {}),
        })
        .collect();
    wrap_twiml(xmlserde::xml_serialize(Response { actions }))
}

#[async_trait]
impl TelephonyGateway for TwilioGateway {
    async fn place_call(&self, call: &OutboundCall) -> AppResult<PlacedCall> {
        let account_sid = &self.config.account_sid;
        let url = format!(
            "{}/2010-04-01/Accounts/{account_sid}/Calls.json",
            self.config.api_base
        );
        let timeout = CALL_RING_TIMEOUT_SECS.to_string();
        let form = [
            ("To", call.to.as_str()),
            ("From", self.config.phone_number.as_str()),
            ("Url", call.script_url.as_str()),
            ("Method", "POST"),
            ("StatusCallback", call.status_callback.as_str()),
            ("StatusCallbackMethod", "POST"),
            ("StatusCallbackEvent", "initiated"),
            ("StatusCallbackEvent", "ringing"),
            ("StatusCallbackEvent", "answered"),
            ("StatusCallbackEvent", "completed"),
            ("Record", "true"),
            ("RecordingStatusCallback", call.recording_status_callback.as_str()),
            ("RecordingStatusCallbackMethod", "POST"),
            ("Timeout", timeout.as_str()),
        ];
        let resp = self
            .http_client
            .post(url)
            .basic_auth(account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send call request to twilio");
                AppError::external("twilio calls api unreachable")
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp
                .json::<TwilioApiError>()
                .await
                .map(|e| format!("{} ({:?})", e.message, e.code))
                .unwrap_or_else(|_| "no error body".to_string());
            error!(%status, detail=%detail, "twilio rejected call request");
            return Err(AppError::external(format!(
                "twilio rejected call request: {status}"
            )));
        }
        let resource = resp.json::<CallResource>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize twilio call resource");
            AppError::external("malformed twilio call response")
        })?;
        info!(call_sid=%resource.sid, to=%call.to, "call initiated");

        Ok(PlacedCall {
            call_sid: resource.sid,
            from: self.config.phone_number.clone(),
            status: resource.status,
        })
    }

    fn render(&self, script: &VoiceScript) -> String {
        render_twiml(script)
    }
}
