use crate::config::ScoringConfig;
use crate::scoring::{ScoringPipeline, ScoringReport};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoringJob {
    pub interview_id: Uuid,
    /// How many times this job has already been deferred.
    pub attempt: u32,
}

impl ScoringJob {
    pub fn new(interview_id: Uuid) -> Self {
        Self {
            interview_id,
            attempt: 0,
        }
    }

    fn retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

pub fn scoring_channel() -> (
    mpsc::UnboundedSender<ScoringJob>,
    mpsc::UnboundedReceiver<ScoringJob>,
) {
    mpsc::unbounded_channel()
}

/// Task that runs the scoring pipeline for every enqueued interview.  Each job runs on its own
/// task so a slow evaluator holds up only its interview.  Deferred jobs retry after the transcript
/// grace period; the last allowed attempt forces a run with whatever transcripts have arrived.
/// Returns once every sender is gone and the running jobs have finished.
pub async fn run_scoring_worker(
    mut jobs: mpsc::UnboundedReceiver<ScoringJob>,
    pipeline: ScoringPipeline,
    config: ScoringConfig,
) {
    info!("scoring worker started");
    let pipeline = Arc::new(pipeline);
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => {
                    running.spawn(score_interview(job, pipeline.clone(), config.clone()));
                }
                None => break,
            },
            Some(finished) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = finished {
                    error!(error=%e, "scoring task aborted");
                }
            }
        }
    }
    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            error!(error=%e, "scoring task aborted");
        }
    }
    info!("scoring worker stopped");
}

async fn score_interview(mut job: ScoringJob, pipeline: Arc<ScoringPipeline>, config: ScoringConfig) {
    loop {
        let force = job.attempt >= config.max_deferrals;
        match pipeline.run(job.interview_id, force).await {
            Ok(ScoringReport::Deferred { pending }) => {
                job = job.retry();
                debug!(interview_id=%job.interview_id, pending, attempt=job.attempt, "scoring deferred");
                tokio::time::sleep(config.transcript_grace).await;
            }
            Ok(report) => {
                debug!(interview_id=%job.interview_id, report=?report, "scoring job finished");
                return;
            }
            Err(e) => {
                error!(interview_id=%job.interview_id, error=%e, "scoring job failed");
                return;
            }
        }
    }
}
