use crate::error::AppError;

use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// Process-wide settings, read once at startup and immutable afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    /// Externally reachable base URL; used to build the absolute callback URLs in TwiML.
    pub public_base_url: String,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub twilio: TwilioConfig,
    pub openai: OpenAIConfig,
    pub scoring: ScoringConfig,
}

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
    pub api_base: String,
    pub whitelisted_numbers: HashSet<String>,
}

#[derive(Clone, Debug)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct ScoringConfig {
    /// Upper bound on the best-effort scoring done inside the transcription webhook.
    pub inline_timeout: Duration,
    /// Delay before the pipeline re-checks for transcriptions that have not arrived yet.
    pub transcript_grace: Duration,
    pub max_deferrals: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            inline_timeout: Duration::from_millis(3_000),
            transcript_grace: Duration::from_secs(20),
            max_deferrals: 3,
        }
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config(format!("{key} not set!")))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Comma separated list of E.164 numbers; blanks are ignored.
pub fn parse_whitelist(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            inline_timeout: Duration::from_millis(parsed(
                "INLINE_SCORING_TIMEOUT_MS",
                defaults.inline_timeout.as_millis() as u64,
            )?),
            transcript_grace: Duration::from_secs(parsed(
                "SCORING_GRACE_SECS",
                defaults.transcript_grace.as_secs(),
            )?),
            max_deferrals: parsed("SCORING_MAX_DEFERRALS", defaults.max_deferrals)?,
        };

        Ok(Self {
            listen_addr: optional("LISTEN_ADDR", "0.0.0.0:3000"),
            public_base_url: required("PUBLIC_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            twilio: TwilioConfig {
                account_sid: required("TWILIO_ACCOUNT_SID")?,
                auth_token: required("TWILIO_AUTH_TOKEN")?,
                phone_number: required("TWILIO_PHONE_NUMBER")?,
                api_base: optional("TWILIO_API_BASE", "https://api.twilio.com"),
                whitelisted_numbers: parse_whitelist(&optional("WHITELISTED_PHONE_NUMBERS", "")),
            },
            openai: OpenAIConfig {
                api_key: required("OPENAI_API_KEY")?,
                base_url: optional("OPENAI_BASE_URL", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                model: optional("OPENAI_MODEL", "gpt-4o-mini"),
            },
            scoring,
        })
    }
}
