use crate::db_types::{
    Answer, AnswerPatch, AnswerScore, CallEvent, Candidate, Interview, InterviewQuestion,
    InterviewStatus, Job, NewVoiceCall, RecordingPatch, VoiceCall, VoiceCallStatus,
};
use crate::error::{AppError, AppResult};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::{error, info};
use uuid::Uuid;

/// Everything the interview core reads and writes.  Each mutating operation is atomic on its own;
/// callers never read-then-write.
#[async_trait]
pub trait InterviewStore: Send + Sync {
    async fn get_candidate(&self, id: Uuid) -> AppResult<Option<Candidate>>;

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Questions for a job, ordered by their `order` field and then by creation.
    async fn list_questions(&self, job_id: Uuid) -> AppResult<Vec<InterviewQuestion>>;

    async fn create_interview(&self, candidate_id: Uuid, job_id: Uuid) -> AppResult<Interview>;

    async fn get_interview(&self, id: Uuid) -> AppResult<Option<Interview>>;

    /// Reserve a pending interview for dialing.  `None` when it is not pending or another trigger
    /// holds an unexpired claim.
    async fn claim_dial(&self, id: Uuid) -> AppResult<Option<Interview>>;

    /// Drop the dial claim of an interview that is still pending.
    async fn release_dial(&self, id: Uuid) -> AppResult<()>;

    /// Move a `pending` interview to `in_progress` and create its voice call in the same step.
    /// `None` when the interview was no longer pending.
    async fn start_interview(&self, call: NewVoiceCall) -> AppResult<Option<(Interview, VoiceCall)>>;

    /// Move a non-terminal interview to `outcome`.  `None` when it was already terminal.
    async fn finish_interview(
        &self,
        id: Uuid,
        outcome: InterviewStatus,
    ) -> AppResult<Option<Interview>>;

    async fn get_voice_call_by_sid(&self, call_sid: &str) -> AppResult<Option<VoiceCall>>;

    async fn get_voice_call_for_interview(&self, interview_id: Uuid)
        -> AppResult<Option<VoiceCall>>;

    /// Forward-only status transition.  `None` when the call is unknown or the transition would
    /// not move the call forward.
    async fn advance_call_status(
        &self,
        call_sid: &str,
        status: VoiceCallStatus,
        duration: Option<i32>,
    ) -> AppResult<Option<VoiceCall>>;

    async fn record_call_recording(
        &self,
        call_sid: &str,
        patch: RecordingPatch,
    ) -> AppResult<Option<VoiceCall>>;

    async fn append_call_event(
        &self,
        voice_call_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> AppResult<CallEvent>;

    async fn list_call_events(&self, voice_call_id: Uuid) -> AppResult<Vec<CallEvent>>;

    /// Insert-or-merge keyed by (interview, question).  Non-null patch fields overwrite, null
    /// fields keep what is stored.  An empty transcript only fills a missing one.
    async fn upsert_answer(
        &self,
        interview_id: Uuid,
        question_id: Uuid,
        patch: AnswerPatch,
    ) -> AppResult<Answer>;

    /// Set score and feedback only if the answer has no score yet.  Returns the stored row.
    async fn fill_answer_score(&self, answer_id: Uuid, score: f64, feedback: &str)
        -> AppResult<Answer>;

    async fn list_answers(&self, interview_id: Uuid) -> AppResult<Vec<Answer>>;

    /// Persist the remaining answer scores, the mean of all stored scores and the recommendation
    /// in one transaction.  `None` when the interview already had a total score.
    async fn finalize_scoring(
        &self,
        interview_id: Uuid,
        scores: &[AnswerScore],
        recommendation: &str,
    ) -> AppResult<Option<Interview>>;
}

/// A dial claim older than this is treated as abandoned.
pub const DIAL_CLAIM_TTL: time::Duration = time::Duration::minutes(5);

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        error!(error=%e, "{context}");
        AppError::Database(e)
    }
}

pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(db_err("failed to connect to postgres"))?;
        sqlx::migrate!().run(&pool).await?;
        info!("database migrations applied");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl InterviewStore for PgStore {
    async fn get_candidate(&self, id: Uuid) -> AppResult<Option<Candidate>> {
        sqlx::query_as::<_, Candidate>("select id, name, phone from candidates where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("failed to select candidate"))
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("select id, title from jobs where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("failed to select job"))
    }

    async fn list_questions(&self, job_id: Uuid) -> AppResult<Vec<InterviewQuestion>> {
        sqlx::query_as::<_, InterviewQuestion>(
            "
            select *
            from interview_questions
            where job_id = $1
            order by question_order, created_at, id
            ",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("failed to select interview questions"))
    }

    async fn create_interview(&self, candidate_id: Uuid, job_id: Uuid) -> AppResult<Interview> {
        sqlx::query_as::<_, Interview>(
            "
            insert into interviews (
              id,
              candidate_id,
              job_id,
              status
            ) values (
              $1,
              $2,
              $3,
              'pending'
            )
            returning *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(candidate_id)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("failed to insert interview row"))
    }

    async fn get_interview(&self, id: Uuid) -> AppResult<Option<Interview>> {
        sqlx::query_as::<_, Interview>("select * from interviews where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("failed to select interview"))
    }

    async fn claim_dial(&self, id: Uuid) -> AppResult<Option<Interview>> {
        sqlx::query_as::<_, Interview>(
            "
            update interviews
            set dial_claimed_at = now()
            where id = $1
              and status = 'pending'
              and (dial_claimed_at is null or dial_claimed_at < now() - make_interval(secs => $2))
            returning *
            ",
        )
        .bind(id)
        .bind(DIAL_CLAIM_TTL.as_seconds_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("failed to claim interview for dialing"))
    }

    async fn release_dial(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "
            update interviews
            set dial_claimed_at = null
            where id = $1
              and status = 'pending'
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to release dial claim"))?;
        Ok(())
    }

    async fn start_interview(&self, call: NewVoiceCall) -> AppResult<Option<(Interview, VoiceCall)>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("failed to begin transaction"))?;
        let interview = sqlx::query_as::<_, Interview>(
            "
            update interviews
            set status = 'in_progress',
                call_sid = $2,
                started_at = now()
            where id = $1
              and status = 'pending'
            returning *
            ",
        )
        .bind(call.interview_id)
        .bind(&call.call_sid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("failed to mark interview in progress"))?;
        let Some(interview) = interview else {
            // Dropping the transaction rolls it back.
            return Ok(None);
        };
        let voice_call = sqlx::query_as::<_, VoiceCall>(
            "
            insert into voice_calls (
              id,
              interview_id,
              call_sid,
              to_phone,
              from_phone,
              status
            ) values (
              $1,
              $2,
              $3,
              $4,
              $5,
              'initiated'
            )
            returning *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(call.interview_id)
        .bind(&call.call_sid)
        .bind(&call.to_phone)
        .bind(&call.from_phone)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("failed to insert voice call row"))?;
        tx.commit().await.map_err(db_err("db error"))?;

        Ok(Some((interview, voice_call)))
    }

    async fn finish_interview(
        &self,
        id: Uuid,
        outcome: InterviewStatus,
    ) -> AppResult<Option<Interview>> {
        sqlx::query_as::<_, Interview>(
            "
            update interviews
            set status = $2,
                completed_at = coalesce(completed_at, now())
            where id = $1
              and status in ('pending', 'in_progress')
            returning *
            ",
        )
        .bind(id)
        .bind(outcome.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("failed to finish interview"))
    }

    async fn get_voice_call_by_sid(&self, call_sid: &str) -> AppResult<Option<VoiceCall>> {
        sqlx::query_as::<_, VoiceCall>("select * from voice_calls where call_sid = $1")
            .bind(call_sid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("failed to select voice call"))
    }

    async fn get_voice_call_for_interview(
        &self,
        interview_id: Uuid,
    ) -> AppResult<Option<VoiceCall>> {
        sqlx::query_as::<_, VoiceCall>("select * from voice_calls where interview_id = $1")
            .bind(interview_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("failed to select voice call"))
    }

    async fn advance_call_status(
        &self,
        call_sid: &str,
        status: VoiceCallStatus,
        duration: Option<i32>,
    ) -> AppResult<Option<VoiceCall>> {
        let from: Vec<String> = status
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        sqlx::query_as::<_, VoiceCall>(
            "
            update voice_calls
            set status = $2,
                started_at = case when $2 = 'in_progress' then coalesce(started_at, now()) else started_at end,
                ended_at = case when $3 then coalesce(ended_at, now()) else ended_at end,
                duration = coalesce($4, duration)
            where call_sid = $1
              and status = any($5)
            returning *
            ",
        )
        .bind(call_sid)
        .bind(status.as_str())
        .bind(status.is_terminal())
        .bind(duration)
        .bind(from)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("failed to advance call status"))
    }

    async fn record_call_recording(
        &self,
        call_sid: &str,
        patch: RecordingPatch,
    ) -> AppResult<Option<VoiceCall>> {
        sqlx::query_as::<_, VoiceCall>(
            "
            update voice_calls
            set recording_url = coalesce($2, recording_url),
                recording_sid = coalesce($3, recording_sid),
                duration = coalesce($4, duration)
            where call_sid = $1
            returning *
            ",
        )
        .bind(call_sid)
        .bind(patch.recording_url)
        .bind(patch.recording_sid)
        .bind(patch.duration)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("failed to update call recording"))
    }

    async fn append_call_event(
        &self,
        voice_call_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> AppResult<CallEvent> {
        sqlx::query_as::<_, CallEvent>(
            "
            insert into call_events (
              id,
              voice_call_id,
              event_type,
              payload
            ) values (
              $1,
              $2,
              $3,
              $4
            )
            returning *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(voice_call_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("failed to insert call event"))
    }

    async fn list_call_events(&self, voice_call_id: Uuid) -> AppResult<Vec<CallEvent>> {
        sqlx::query_as::<_, CallEvent>(
            "select * from call_events where voice_call_id = $1 order by created_at, id",
        )
        .bind(voice_call_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("failed to select call events"))
    }

    async fn upsert_answer(
        &self,
        interview_id: Uuid,
        question_id: Uuid,
        patch: AnswerPatch,
    ) -> AppResult<Answer> {
        sqlx::query_as::<_, Answer>(
            "
            insert into answers (
              id,
              interview_id,
              question_id,
              transcript,
              audio_url,
              audio_duration
            ) values (
              $1,
              $2,
              $3,
              $4,
              $5,
              $6
            )
            on conflict (interview_id, question_id) do update
            set transcript = case
                  when excluded.transcript = '' then coalesce(answers.transcript, '')
                  else coalesce(excluded.transcript, answers.transcript)
                end,
                audio_url = coalesce(excluded.audio_url, answers.audio_url),
                audio_duration = coalesce(excluded.audio_duration, answers.audio_duration),
                updated_at = now()
            returning *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(interview_id)
        .bind(question_id)
        .bind(patch.transcript)
        .bind(patch.audio_url)
        .bind(patch.audio_duration)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("failed to upsert answer"))
    }

    async fn fill_answer_score(
        &self,
        answer_id: Uuid,
        score: f64,
        feedback: &str,
    ) -> AppResult<Answer> {
        // The no-op `set` still returns the row when a score is already present.
        sqlx::query_as::<_, Answer>(
            "
            update answers
            set score = coalesce(score, $2),
                feedback = case when score is null then $3 else feedback end,
                updated_at = case when score is null then now() else updated_at end
            where id = $1
            returning *
            ",
        )
        .bind(answer_id)
        .bind(score)
        .bind(feedback)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("failed to fill answer score"))?
        .ok_or_else(|| AppError::not_found(format!("answer {answer_id}")))
    }

    async fn list_answers(&self, interview_id: Uuid) -> AppResult<Vec<Answer>> {
        sqlx::query_as::<_, Answer>(
            "
            select a.*
            from answers a
            join interview_questions q on q.id = a.question_id
            where a.interview_id = $1
            order by q.question_order, q.created_at, q.id
            ",
        )
        .bind(interview_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("failed to select answers"))
    }

    async fn finalize_scoring(
        &self,
        interview_id: Uuid,
        scores: &[AnswerScore],
        recommendation: &str,
    ) -> AppResult<Option<Interview>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("failed to begin transaction"))?;
        let answer_ids: Vec<Uuid> = scores.iter().map(|s| s.answer_id).collect();
        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let feedback: Vec<String> = scores.iter().map(|s| s.feedback.clone()).collect();
        sqlx::query(
            "
            update answers a
            set score = s.score,
                feedback = s.feedback,
                updated_at = now()
            from unnest (
              $1::uuid[],
              $2::double precision[],
              $3::text[]
            ) as s (id, score, feedback)
            where a.id = s.id
              and a.score is null
            ",
        )
        .bind(&answer_ids)
        .bind(&values)
        .bind(&feedback)
        .execute(&mut *tx)
        .await
        .map_err(db_err("failed to batch update answer scores"))?;

        let interview = sqlx::query_as::<_, Interview>(
            "
            update interviews
            set total_score = (
                  select avg(score)
                  from answers
                  where interview_id = $1
                    and score is not null
                ),
                recommendation = $2
            where id = $1
              and total_score is null
            returning *
            ",
        )
        .bind(interview_id)
        .bind(recommendation)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("failed to store interview total score"))?;

        tx.commit().await.map_err(db_err("db error"))?;

        Ok(interview)
    }
}

/// These run against a scratch database: `DATABASE_URL=postgres://… cargo test -- --ignored`.
/// Every test seeds its own rows, so they can share one database.
#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    async fn pg() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch db");
        PgStore::connect(&url).await.unwrap()
    }

    /// One candidate, a job with two questions and a pending interview.
    async fn seed(store: &PgStore) -> (Uuid, Vec<Uuid>) {
        let candidate_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        sqlx::query("insert into candidates (id, name, phone) values ($1, 'Ada', '+14155552671')")
            .bind(candidate_id)
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("insert into jobs (id, title) values ($1, 'Engineer')")
            .bind(job_id)
            .execute(&store.pool)
            .await
            .unwrap();
        let mut questions = vec![];
        for order in 1..=2 {
            let id = Uuid::new_v4();
            sqlx::query(
                "
                insert into interview_questions (id, job_id, question_text, question_order)
                values ($1, $2, $3, $4)
                ",
            )
            .bind(id)
            .bind(job_id)
            .bind(format!("Question {order}"))
            .bind(order)
            .execute(&store.pool)
            .await
            .unwrap();
            questions.push(id);
        }
        let interview = store.create_interview(candidate_id, job_id).await.unwrap();
        (interview.id, questions)
    }

    fn transcript(text: &str) -> AnswerPatch {
        AnswerPatch {
            transcript: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn replayed_upserts_merge_into_one_row() {
        let store = pg().await;
        let (interview_id, questions) = seed(&store).await;
        let q = questions[0];
        store.upsert_answer(interview_id, q, transcript("spoken")).await.unwrap();
        let audio = AnswerPatch {
            audio_url: Some("https://rec/1".into()),
            audio_duration: Some(12.5),
            ..Default::default()
        };
        store.upsert_answer(interview_id, q, audio.clone()).await.unwrap();
        store.upsert_answer(interview_id, q, audio).await.unwrap();
        let kept = store.upsert_answer(interview_id, q, transcript("")).await.unwrap();

        assert_eq!(kept.transcript.as_deref(), Some("spoken"));
        assert_eq!(kept.audio_url.as_deref(), Some("https://rec/1"));
        assert_eq!(kept.audio_duration, Some(12.5));
        assert_eq!(store.list_answers(interview_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_upserts_keep_both_fields() {
        let store = Arc::new(pg().await);
        let (interview_id, questions) = seed(&store).await;
        let q = questions[0];
        let audio = {
            let store = store.clone();
            tokio::spawn(async move {
                let patch = AnswerPatch {
                    audio_url: Some("https://rec/q1".into()),
                    ..Default::default()
                };
                store.upsert_answer(interview_id, q, patch).await
            })
        };
        let text = {
            let store = store.clone();
            tokio::spawn(async move { store.upsert_answer(interview_id, q, transcript("both")).await })
        };
        let (a, t) = tokio::join!(audio, text);
        a.unwrap().unwrap();
        t.unwrap().unwrap();

        let answers = store.list_answers(interview_id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].audio_url.as_deref(), Some("https://rec/q1"));
        assert_eq!(answers[0].transcript.as_deref(), Some("both"));
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn stale_status_does_not_regress() {
        let store = pg().await;
        let (interview_id, _) = seed(&store).await;
        let call_sid = format!("CA{}", Uuid::new_v4().simple());
        store.claim_dial(interview_id).await.unwrap().unwrap();
        store
            .start_interview(NewVoiceCall {
                interview_id,
                call_sid: call_sid.clone(),
                to_phone: "+14155552671".into(),
                from_phone: "+15005550006".into(),
            })
            .await
            .unwrap()
            .unwrap();

        let done = store
            .advance_call_status(&call_sid, VoiceCallStatus::Completed, Some(61))
            .await
            .unwrap()
            .unwrap();
        assert!(done.ended_at.is_some());
        let stale = store
            .advance_call_status(&call_sid, VoiceCallStatus::Ringing, None)
            .await
            .unwrap();
        assert!(stale.is_none());

        let call = store.get_voice_call_by_sid(&call_sid).await.unwrap().unwrap();
        assert_eq!(call.status, VoiceCallStatus::Completed);
        assert_eq!(call.duration, Some(61));
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn dial_claim_is_exclusive() {
        let store = pg().await;
        let (interview_id, _) = seed(&store).await;
        let (a, b) = tokio::join!(store.claim_dial(interview_id), store.claim_dial(interview_id));
        let claims = [a.unwrap(), b.unwrap()];
        assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);

        store.release_dial(interview_id).await.unwrap();
        assert!(store.claim_dial(interview_id).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn finalize_keeps_inline_scores_and_runs_once() {
        let store = pg().await;
        let (interview_id, questions) = seed(&store).await;
        let inline = store
            .upsert_answer(interview_id, questions[0], transcript("first"))
            .await
            .unwrap();
        let batch = store
            .upsert_answer(interview_id, questions[1], transcript("second"))
            .await
            .unwrap();
        store.fill_answer_score(inline.id, 6.0, "inline").await.unwrap();
        let again = store.fill_answer_score(inline.id, 1.0, "late").await.unwrap();
        assert_eq!(again.score, Some(6.0));

        let scores = vec![
            AnswerScore {
                answer_id: inline.id,
                score: 1.0,
                feedback: "batch".into(),
            },
            AnswerScore {
                answer_id: batch.id,
                score: 9.0,
                feedback: "batch".into(),
            },
        ];
        let done = store
            .finalize_scoring(interview_id, &scores, "Hire")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.total_score, Some(7.5));
        assert_eq!(done.recommendation.as_deref(), Some("Hire"));

        let answers = store.list_answers(interview_id).await.unwrap();
        assert_eq!(answers[0].score, Some(6.0));
        assert_eq!(answers[0].feedback.as_deref(), Some("inline"));
        assert_eq!(answers[1].score, Some(9.0));

        let second = store
            .finalize_scoring(interview_id, &[], "Reject")
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
