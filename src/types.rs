use crate::answers::AnswerRecorder;
use crate::call_session::CallSessionController;
use crate::config::Config;
use crate::evaluator::Evaluator;
use crate::scoring::ScoringPipeline;
use crate::store::InterviewStore;
use crate::tasks::ScoringJob;
use crate::telephony::TelephonyGateway;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn InterviewStore>,
    pub telephony: Arc<dyn TelephonyGateway>,
    pub evaluator: Arc<dyn Evaluator>,
    pub controller: CallSessionController,
    pub answers: AnswerRecorder,
    // consumed by the scoring worker
    pub scoring_tx: mpsc::UnboundedSender<ScoringJob>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn InterviewStore>,
        telephony: Arc<dyn TelephonyGateway>,
        evaluator: Arc<dyn Evaluator>,
        scoring_tx: mpsc::UnboundedSender<ScoringJob>,
    ) -> Self {
        let controller = CallSessionController::new(&config.public_base_url);
        let answers = AnswerRecorder::new(store.clone());
        Self {
            config,
            store,
            telephony,
            evaluator,
            controller,
            answers,
            scoring_tx,
        }
    }

    pub fn scoring_pipeline(&self) -> ScoringPipeline {
        ScoringPipeline::new(self.store.clone(), self.evaluator.clone())
    }

    /// Hand an interview to the scoring worker.  Safe to call more than once per interview.
    pub fn enqueue_scoring(&self, interview_id: Uuid) {
        match self.scoring_tx.send(ScoringJob::new(interview_id)) {
            Ok(()) => debug!(%interview_id, "scoring job enqueued"),
            Err(e) => error!(%interview_id, error=%e, "scoring worker is gone; job dropped"),
        }
    }
}
