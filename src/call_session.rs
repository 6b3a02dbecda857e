//! Decides what the caller hears next.  Everything needed to pick the next step travels in the
//! callback URLs, so a restarted server resumes from the next callback alone.

pub const WELCOME_MESSAGE: &str = "Hello! Thank you for participating in this AI-powered interview. \
     I will ask you several questions. Please answer clearly after each beep. \
     Let's begin with the first question.";
pub const CLOSING_MESSAGE: &str = "Thank you for completing the interview. \
     We will review your responses and get back to you soon. Have a great day!";
pub const ERROR_MESSAGE: &str = "Sorry, there was an error. Please try again later.";

pub const MAX_ANSWER_SECS: u32 = 120;
pub const FINISH_ON_KEY: &str = "#";

/// Provider-neutral call instructions, rendered to markup by the telephony gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    Say(String),
    Record {
        max_length_secs: u32,
        finish_on_key: String,
        /// Where the provider posts the transcription of this recording.
        transcribe_callback: String,
        /// Where the provider posts once recording ends; the response continues the call.
        action: String,
    },
    Hangup,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoiceScript {
    pub steps: Vec<ScriptStep>,
}

impl VoiceScript {
    pub fn ends_call(&self) -> bool {
        matches!(self.steps.last(), Some(ScriptStep::Hangup))
    }

    /// Spoken apology followed by hangup; what the callee hears when a handler fails.
    pub fn fallback() -> Self {
        Self {
            steps: vec![
                ScriptStep::Say(ERROR_MESSAGE.to_string()),
                ScriptStep::Hangup,
            ],
        }
    }

    pub fn closing() -> Self {
        Self {
            steps: vec![
                ScriptStep::Say(CLOSING_MESSAGE.to_string()),
                ScriptStep::Hangup,
            ],
        }
    }
}

pub fn next_question_path(question_index: usize) -> String {
    format!("/webhook/next-question/{question_index}")
}

pub fn transcription_path(question_index: usize) -> String {
    format!("/webhook/transcription/{question_index}")
}

pub fn interview_path(interview_id: uuid::Uuid) -> String {
    format!("/webhook/interview/{interview_id}")
}

pub const STATUS_PATH: &str = "/webhook/status";
pub const RECORDING_PATH: &str = "/webhook/recording";

pub struct CallSessionController {
    base_url: String,
}

impl CallSessionController {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Script for the step at `question_index`, given the ordered question texts.
    pub fn next_instruction<S: AsRef<str>>(
        &self,
        questions: &[S],
        question_index: usize,
    ) -> VoiceScript {
        let Some(question) = questions.get(question_index) else {
            return VoiceScript::closing();
        };

        let mut steps = Vec::with_capacity(3);
        if question_index == 0 {
            steps.push(ScriptStep::Say(WELCOME_MESSAGE.to_string()));
        }
        steps.push(ScriptStep::Say(question.as_ref().to_string()));
        steps.push(ScriptStep::Record {
            max_length_secs: MAX_ANSWER_SECS,
            finish_on_key: FINISH_ON_KEY.to_string(),
            transcribe_callback: self.url(&transcription_path(question_index)),
            action: self.url(&next_question_path(question_index + 1)),
        });
        VoiceScript { steps }
    }
}
