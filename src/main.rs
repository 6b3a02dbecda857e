mod answers;
mod call_session;
mod config;
mod db_types;
mod error;
mod evaluator;
mod handlers;
mod interviews;
mod memory_store;
mod openai_types;
mod scoring;
mod store;
mod tasks;
mod telephony;
#[cfg(test)]
mod testing;
mod twilio_types;
mod types;
mod utils;
mod webhooks;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::evaluator::OpenAIEvaluator;
use crate::memory_store::MemoryStore;
use crate::store::{InterviewStore, PgStore};
use crate::telephony::TwilioGateway;
use crate::types::AppState;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const TWIML_VOICE: &str = "alice";
    pub const CALL_RING_TIMEOUT_SECS: u32 = 30;
    pub const NEUTRAL_SCORE: f64 = 5.0;
    pub const SCORING_UNAVAILABLE_FEEDBACK: &str = "Scoring unavailable";
    pub const FALLBACK_RECOMMENDATION: &str =
        "Unable to generate recommendation due to technical issues.";
    pub const QA_SUMMARY_ANSWER_CHARS: usize = 200;
}

async fn open_store(config: &Config) -> AppResult<Arc<dyn InterviewStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; interviews are kept in memory only");
            let store = match env::var("SEED_FILE") {
                Ok(path) => MemoryStore::from_seed_file(path).await?,
                Err(_) => MemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("no .env file loaded: {e}");
    }
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("sqlx", tracing_subscriber::filter::LevelFilter::WARN),
            ("interview_rs", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Config(format!("failed to install tracing subscriber: {e}")))?;

    let config = Config::from_env()?;
    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|_| AppError::Config(format!("invalid LISTEN_ADDR '{}'", config.listen_addr)))?;

    let store = open_store(&config).await?;
    let http_client = reqwest::Client::new();
    let telephony = Arc::new(TwilioGateway::new(
        http_client.clone(),
        config.twilio.clone(),
    ));
    let evaluator = Arc::new(OpenAIEvaluator::new(http_client, config.openai.clone()));

    let (scoring_tx, scoring_rx) = tasks::scoring_channel();
    let app_state = Arc::new(AppState::new(
        config,
        store,
        telephony,
        evaluator,
        scoring_tx,
    ));
    tokio::spawn(tasks::run_scoring_worker(
        scoring_rx,
        app_state.scoring_pipeline(),
        app_state.config.scoring.clone(),
    ));

    let app = handlers::router(app_state);
    info!(%listen_addr, "interview service listening");
    axum::Server::bind(&listen_addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| AppError::Config(format!("server error: {e}")))?;
    Ok(())
}
