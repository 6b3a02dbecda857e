pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde::xml_serde_enum;
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Record")]
        Record(RecordAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"loop", ty = "attr")]
        pub lp: Option<u16>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct RecordAction {
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<HttpMethod>,
        #[xmlserde(name = b"maxLength", ty = "attr")]
        pub max_length: Option<u32>,
        #[xmlserde(name = b"finishOnKey", ty = "attr")]
        pub finish_on_key: Option<String>,
        #[xmlserde(name = b"playBeep", ty = "attr")]
        pub play_beep: Option<TwimlBool>,
        #[xmlserde(name = b"transcribe", ty = "attr")]
        pub transcribe: Option<TwimlBool>,
        #[xmlserde(name = b"transcribeCallback", ty = "attr")]
        pub transcribe_callback: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {}

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        HttpMethod {
            Get => "GET",
            Post => "POST",
        }
    }

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        TwimlBool {
            True => "true",
            False => "false",
        }
    }
}
pub use twiml::*;

mod callbacks {
    use serde::{Deserialize, Deserializer};

    /// Twilio sends numeric fields as strings and sometimes as empty strings.
    fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: std::str::FromStr,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<T>().ok()))
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "kebab-case")]
    pub enum CallStatus {
        Queued,
        Initiated,
        Ringing,
        InProgress,
        Completed,
        Busy,
        Failed,
        NoAnswer,
        Canceled,
    }

    impl CallStatus {
        pub fn as_str(&self) -> &'static str {
            match self {
                CallStatus::Queued => "queued",
                CallStatus::Initiated => "initiated",
                CallStatus::Ringing => "ringing",
                CallStatus::InProgress => "in-progress",
                CallStatus::Completed => "completed",
                CallStatus::Busy => "busy",
                CallStatus::Failed => "failed",
                CallStatus::NoAnswer => "no-answer",
                CallStatus::Canceled => "canceled",
            }
        }
    }

    /// Body of `POST /webhook/interview/:id`.  The question index travels as a form field.
    #[derive(Deserialize, Debug, Default)]
    pub struct InterviewScriptPayload {
        #[serde(default, deserialize_with = "lenient_number")]
        pub current_question: Option<usize>,
    }

    /// Call progress callback (`StatusCallback`).
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct StatusCallbackPayload {
        pub call_sid: String,
        pub call_status: CallStatus,
        #[serde(default, deserialize_with = "lenient_number")]
        pub call_duration: Option<i32>,
    }

    /// Call-level recording callback.
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct RecordingCallbackPayload {
        pub call_sid: String,
        pub recording_url: String,
        #[serde(default)]
        pub recording_sid: Option<String>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub recording_duration: Option<i32>,
    }

    /// `action` callback of a `<Record>` verb.
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct RecordActionPayload {
        pub call_sid: String,
        #[serde(default)]
        pub recording_url: Option<String>,
        #[serde(default, deserialize_with = "lenient_number")]
        pub recording_duration: Option<f64>,
    }

    /// `transcribeCallback` of a `<Record>` verb.
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct TranscriptionCallbackPayload {
        pub call_sid: String,
        #[serde(default)]
        pub transcription_text: Option<String>,
        #[serde(default)]
        pub transcription_status: Option<String>,
        #[serde(default)]
        pub recording_url: Option<String>,
    }

    /// The subset of the Calls REST resource we read back after placing a call.
    #[derive(Deserialize, Debug)]
    pub struct CallResource {
        pub sid: String,
        pub status: String,
    }

    /// Error body returned by the Twilio REST API.
    #[derive(Deserialize, Debug)]
    pub struct TwilioApiError {
        #[serde(default)]
        pub code: Option<u32>,
        pub message: String,
    }
}
pub use callbacks::*;
