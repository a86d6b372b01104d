use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::store::{AssessmentStore, AttemptStore, Pagination};
use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::assessment::{
    Assessment, AssessmentDefinition, AssessmentSettings, AvailableAssessment,
};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::{Question, QuestionOption};
use crate::models::suspicious_activity::SuspiciousActivity;
use crate::models::user::User;
use crate::services::grading_service::{answers_by_question, GradeResult, GradingService};

const UPDATE_TERMINAL: &str = r#"
    UPDATE attempts
    SET submitted_at = $2, ended_at = $3, score = $4, duration_minutes = $5, status = $6
    WHERE id = $1 AND status = $7
    RETURNING *
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks the attempt row for the rest of the transaction and checks it
    /// still accepts answers.
    async fn lock_attempt_for_answer(
        tx: &mut Transaction<'_, Postgres>,
        attempt_id: Uuid,
    ) -> Result<()> {
        let status: Option<String> =
            sqlx::query_scalar(r#"SELECT status FROM attempts WHERE id = $1 FOR UPDATE"#)
                .bind(attempt_id)
                .fetch_optional(&mut **tx)
                .await?;
        match status.as_deref() {
            None => Err(Error::NotFound("attempt".to_string())),
            Some("in_progress") => Ok(()),
            Some(_) => Err(Error::PreconditionFailed("not in progress".to_string())),
        }
    }
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    id: Uuid,
    user_id: Uuid,
    assessment_id: Uuid,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    score: Option<f64>,
    duration_minutes: Option<i64>,
    status: String,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self> {
        Ok(Attempt {
            id: row.id,
            user_id: row.user_id,
            assessment_id: row.assessment_id,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            ended_at: row.ended_at,
            score: row.score,
            duration: row.duration_minutes,
            status: row.status.parse().map_err(Error::Internal)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnswerRow {
    id: Uuid,
    attempt_id: Uuid,
    question_id: Uuid,
    answer: String,
    is_correct: Option<bool>,
    answered_at: DateTime<Utc>,
}

impl From<AnswerRow> for Answer {
    fn from(row: AnswerRow) -> Self {
        Answer {
            id: row.id,
            attempt_id: row.attempt_id,
            question_id: row.question_id,
            answer: row.answer,
            is_correct: row.is_correct,
            answered_at: row.answered_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AssessmentRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    status: String,
    due_date: Option<DateTime<Utc>>,
    duration_minutes: i32,
    passing_score: f64,
    allow_retake: bool,
    max_attempts: i32,
    randomize_questions: bool,
    show_results: bool,
    teacher_id: Uuid,
}

impl TryFrom<AssessmentRow> for Assessment {
    type Error = Error;

    fn try_from(row: AssessmentRow) -> Result<Self> {
        Ok(Assessment {
            id: row.id,
            title: row.title,
            description: row.description,
            status: row.status.parse().map_err(Error::Internal)?,
            due_date: row.due_date,
            duration_minutes: row.duration_minutes,
            passing_score: row.passing_score,
            settings: AssessmentSettings {
                allow_retake: row.allow_retake,
                max_attempts: row.max_attempts,
                randomize_questions: row.randomize_questions,
                show_results: row.show_results,
            },
            teacher_id: row.teacher_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: Uuid,
    assessment_id: Uuid,
    question_type: String,
    prompt: String,
    points: f64,
    correct_answer: Option<String>,
    options: Json<Vec<QuestionOption>>,
}

impl TryFrom<QuestionRow> for Question {
    type Error = Error;

    fn try_from(row: QuestionRow) -> Result<Self> {
        Ok(Question {
            id: row.id,
            assessment_id: row.assessment_id,
            question_type: row.question_type.parse().map_err(Error::Internal)?,
            prompt: row.prompt,
            points: row.points,
            correct_answer: row.correct_answer,
            options: row.options.0,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    role: String,
    status: String,
}

#[derive(Debug, FromRow)]
struct AvailableRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    due_date: Option<DateTime<Utc>>,
    duration_minutes: i32,
    passing_score: f64,
    attempts_used: i64,
    max_attempts: i64,
}

fn to_attempts(rows: Vec<AttemptRow>) -> Result<Vec<Attempt>> {
    rows.into_iter().map(Attempt::try_from).collect()
}

// $1 = user, $2 = now
const ELIGIBLE_ASSESSMENTS: &str = r#"
    WITH usage AS (
        SELECT a.id, a.title, a.description, a.due_date, a.duration_minutes, a.passing_score,
               a.allow_retake,
               CASE WHEN a.allow_retake THEN GREATEST(a.max_attempts, 1) ELSE 1 END::bigint AS max_attempts,
               (SELECT COUNT(*) FROM attempts t
                 WHERE t.assessment_id = a.id AND t.user_id = $1) AS attempts_used,
               EXISTS (SELECT 1 FROM attempts t
                 WHERE t.assessment_id = a.id AND t.user_id = $1
                   AND t.status IN ('passed', 'failed')) AS completed
        FROM assessments a
        WHERE a.status = 'published'
          AND (a.due_date IS NULL OR a.due_date > $2)
    )
    SELECT id, title, description, due_date, duration_minutes, passing_score,
           attempts_used, max_attempts
    FROM usage
    WHERE (allow_retake AND attempts_used < max_attempts)
       OR (NOT allow_retake AND NOT completed)
"#;

#[async_trait]
impl AttemptStore for PgStore {
    async fn create_attempt(&self, attempt: &Attempt) -> Result<Attempt> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            INSERT INTO attempts (id, user_id, assessment_id, started_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.user_id)
        .bind(attempt.assessment_id)
        .bind(attempt.started_at)
        .bind(attempt.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn find_attempt(&self, id: Uuid) -> Result<Attempt> {
        sqlx::query_as::<_, AttemptRow>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("attempt".to_string()))?
            .try_into()
    }

    async fn update_attempt(&self, attempt: &Attempt, expected: AttemptStatus) -> Result<Attempt> {
        let row = sqlx::query_as::<_, AttemptRow>(UPDATE_TERMINAL)
            .bind(attempt.id)
            .bind(attempt.submitted_at)
            .bind(attempt.ended_at)
            .bind(attempt.score)
            .bind(attempt.duration)
            .bind(attempt.status.as_str())
            .bind(expected.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let current = self.find_attempt(attempt.id).await?;
                Err(Error::Conflict(format!(
                    "attempt status is {}, expected {}",
                    current.status, expected
                )))
            }
        }
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        definition: &AssessmentDefinition,
        at: DateTime<Utc>,
    ) -> Result<(Attempt, GradeResult)> {
        let mut tx = self.pool.begin().await?;
        let attempt: Attempt =
            sqlx::query_as::<_, AttemptRow>(r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#)
                .bind(attempt_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::NotFound("attempt".to_string()))?
                .try_into()?;
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::Conflict(format!(
                "attempt status is {}, expected {}",
                attempt.status,
                AttemptStatus::InProgress
            )));
        }

        let rows = sqlx::query_as::<_, AnswerRow>(r#"SELECT * FROM answers WHERE attempt_id = $1"#)
            .bind(attempt_id)
            .fetch_all(&mut *tx)
            .await?;
        let answers = answers_by_question(rows.into_iter().map(Answer::from).collect());
        let grade = GradingService::grade(
            &definition.questions,
            &answers,
            definition.assessment.passing_score,
        );
        let completed = attempt.finalized(at, grade.score_percent, grade.status);

        let row = sqlx::query_as::<_, AttemptRow>(UPDATE_TERMINAL)
            .bind(completed.id)
            .bind(completed.submitted_at)
            .bind(completed.ended_at)
            .bind(completed.score)
            .bind(completed.duration)
            .bind(completed.status.as_str())
            .bind(AttemptStatus::InProgress.as_str())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok((row.try_into()?, grade))
    }

    async fn save_answer(&self, answer: &Answer) -> Result<Answer> {
        let mut tx = self.pool.begin().await?;
        Self::lock_attempt_for_answer(&mut tx, answer.attempt_id).await?;
        let row = sqlx::query_as::<_, AnswerRow>(
            r#"
            INSERT INTO answers (id, attempt_id, question_id, answer, is_correct, answered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(answer.id)
        .bind(answer.attempt_id)
        .bind(answer.question_id)
        .bind(&answer.answer)
        .bind(answer.is_correct)
        .bind(answer.answered_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn update_answer(&self, answer: &Answer) -> Result<Answer> {
        let mut tx = self.pool.begin().await?;
        Self::lock_attempt_for_answer(&mut tx, answer.attempt_id).await?;
        let row = sqlx::query_as::<_, AnswerRow>(
            r#"
            UPDATE answers
            SET answer = $3, is_correct = $4, answered_at = $5
            WHERE attempt_id = $1 AND question_id = $2
            RETURNING *
            "#,
        )
        .bind(answer.attempt_id)
        .bind(answer.question_id)
        .bind(&answer.answer)
        .bind(answer.is_correct)
        .bind(answer.answered_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("answer".to_string()))?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn find_answer(&self, attempt_id: Uuid, question_id: Uuid) -> Result<Option<Answer>> {
        let row = sqlx::query_as::<_, AnswerRow>(
            r#"SELECT * FROM answers WHERE attempt_id = $1 AND question_id = $2"#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Answer::from))
    }

    async fn find_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>> {
        let rows = sqlx::query_as::<_, AnswerRow>(
            r#"SELECT * FROM answers WHERE attempt_id = $1 ORDER BY answered_at ASC"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Answer::from).collect())
    }

    async fn count_attempts(&self, user_id: Uuid, assessment_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM attempts WHERE user_id = $1 AND assessment_id = $2"#,
        )
        .bind(user_id)
        .bind(assessment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn has_completed_assessment(&self, user_id: Uuid, assessment_id: Uuid) -> Result<bool> {
        let completed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM attempts
                WHERE user_id = $1 AND assessment_id = $2 AND status IN ('passed', 'failed')
            )
            "#,
        )
        .bind(user_id)
        .bind(assessment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(completed)
    }

    async fn is_user_in_attempt(&self, user_id: Uuid) -> Result<bool> {
        let in_attempt: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM attempts WHERE user_id = $1 AND status = 'in_progress')"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(in_attempt)
    }

    async fn find_in_progress_attempt(&self, user_id: Uuid) -> Result<Option<Attempt>> {
        sqlx::query_as::<_, AttemptRow>(
            r#"SELECT * FROM attempts WHERE user_id = $1 AND status = 'in_progress'"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Attempt::try_from)
        .transpose()
    }

    async fn find_available_assessments(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        pagination: Pagination,
    ) -> Result<(Vec<AvailableAssessment>, i64)> {
        let page = pagination.normalized();
        let rows = sqlx::query_as::<_, AvailableRow>(&format!(
            "{} ORDER BY due_date ASC NULLS LAST, title ASC, id ASC LIMIT $3 OFFSET $4",
            ELIGIBLE_ASSESSMENTS
        ))
        .bind(user_id)
        .bind(now)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM ({}) eligible",
            ELIGIBLE_ASSESSMENTS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let rows = rows
            .into_iter()
            .map(|r| AvailableAssessment {
                id: r.id,
                title: r.title,
                description: r.description,
                due_date: r.due_date,
                duration_minutes: r.duration_minutes,
                passing_score: r.passing_score,
                attempts_used: r.attempts_used,
                max_attempts: r.max_attempts,
            })
            .collect();
        Ok((rows, total))
    }

    async fn find_completed_attempts_by_user_and_assessment(
        &self,
        user_id: Uuid,
        assessment_id: Uuid,
    ) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT * FROM attempts
            WHERE user_id = $1 AND assessment_id = $2 AND status IN ('passed', 'failed')
            ORDER BY started_at DESC
            "#,
        )
        .bind(user_id)
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;
        to_attempts(rows)
    }

    async fn expired_attempts(&self, now: DateTime<Utc>) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT t.*
            FROM attempts t
            JOIN assessments a ON a.id = t.assessment_id
            WHERE t.status = 'in_progress'
              AND t.started_at + make_interval(mins => a.duration_minutes) < $1
            ORDER BY t.started_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        to_attempts(rows)
    }

    async fn save_suspicious_activity(&self, activity: &SuspiciousActivity) -> Result<SuspiciousActivity> {
        sqlx::query(
            r#"
            INSERT INTO suspicious_activities (
                id, user_id, assessment_id, attempt_id, event_type, details, severity, image, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(activity.id)
        .bind(activity.user_id)
        .bind(activity.assessment_id)
        .bind(activity.attempt_id)
        .bind(&activity.event_type)
        .bind(&activity.details)
        .bind(activity.severity.as_str())
        .bind(activity.image.as_deref())
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(activity.clone())
    }
}

#[async_trait]
impl AssessmentStore for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(r#"SELECT id, role, status FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("user".to_string()))?;
        Ok(User {
            id: row.id,
            role: row.role.parse().map_err(Error::Internal)?,
            status: row.status.parse().map_err(Error::Internal)?,
        })
    }

    async fn find_assessment(&self, id: Uuid) -> Result<AssessmentDefinition> {
        let assessment: Assessment = sqlx::query_as::<_, AssessmentRow>(
            r#"
            SELECT id, title, description, status, due_date, duration_minutes, passing_score,
                   allow_retake, max_attempts, randomize_questions, show_results, teacher_id
            FROM assessments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("assessment".to_string()))?
        .try_into()?;

        let questions = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, assessment_id, question_type, prompt, points, correct_answer, options
            FROM questions WHERE assessment_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Question::try_from)
        .collect::<Result<Vec<_>>>()?;

        Ok(AssessmentDefinition {
            assessment,
            questions,
        })
    }

    async fn find_question(&self, id: Uuid) -> Result<Question> {
        sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, assessment_id, question_type, prompt, points, correct_answer, options
            FROM questions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("question".to_string()))?
        .try_into()
    }
}
