use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::database::store::{AssessmentStore, AttemptStore, Pagination};
use crate::dto::attempt_dto::{
    AssessmentSummary, AttemptStatusView, MonitorEventResult, StartedAttempt, SubmitResult,
};
use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::assessment::{AssessmentDefinition, AvailableAssessment};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::{Question, StudentQuestion};
use crate::models::suspicious_activity::{Severity, SuspiciousActivity};
use crate::services::grading_service::{answers_by_question, GradeResult, GradingService};
use crate::services::proctor_service::ProctorService;
use crate::utils::time::{seconds_until, Clock};

/// Drives an attempt from start to a terminal status.
///
/// ```text
/// [none] --start--> InProgress --submit---------> Passed | Failed
///                       |
///                       +--sweeper(expired)-----> Passed | Failed
/// ```
///
/// Terminal transitions go through `AttemptStore::finalize_attempt`, which
/// grades and closes the attempt under its lock and only from `InProgress`.
/// A live submit and the sweeper can never both finalize the same attempt,
/// and the grade always covers every stored answer.
#[derive(Clone)]
pub struct AttemptService {
    attempts: Arc<dyn AttemptStore>,
    assessments: Arc<dyn AssessmentStore>,
    clock: Arc<dyn Clock>,
}

impl AttemptService {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        assessments: Arc<dyn AssessmentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            attempts,
            assessments,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn list_available(
        &self,
        user_id: Uuid,
        pagination: Pagination,
    ) -> Result<(Vec<AvailableAssessment>, i64)> {
        self.assessments.find_user(user_id).await?;
        self.attempts
            .find_available_assessments(user_id, self.clock.now(), pagination.normalized())
            .await
    }

    pub async fn start(&self, user_id: Uuid, assessment_id: Uuid) -> Result<StartedAttempt> {
        self.assessments.find_user(user_id).await?;
        let definition = self.assessments.find_assessment(assessment_id).await?;
        let assessment = &definition.assessment;
        let now = self.clock.now();

        if !assessment.is_published() {
            return Err(Error::PreconditionFailed("not active".to_string()));
        }
        if assessment.is_past_due(now) {
            return Err(Error::PreconditionFailed("past due".to_string()));
        }

        if let Some(current) = self.attempts.find_in_progress_attempt(user_id).await? {
            let closed = if current.assessment_id == assessment_id {
                self.close_if_overdue(&current, &definition, now).await?
            } else {
                let other = self.assessments.find_assessment(current.assessment_id).await?;
                self.close_if_overdue(&current, &other, now).await?
            };
            if !closed {
                return Err(Error::PreconditionFailed("already in progress".to_string()));
            }
        }

        let used = self.attempts.count_attempts(user_id, assessment_id).await?;
        let completed = self
            .attempts
            .has_completed_assessment(user_id, assessment_id)
            .await?;
        assessment
            .settings
            .check_retake(used, completed)
            .map_err(|reason| Error::PreconditionFailed(reason.to_string()))?;

        let attempt = match self
            .attempts
            .create_attempt(&Attempt::begin(user_id, assessment_id, now))
            .await
        {
            Ok(attempt) => attempt,
            Err(Error::Conflict(_)) => {
                return Err(Error::PreconditionFailed("already in progress".to_string()))
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            attempt_id = %attempt.id,
            user_id = %user_id,
            assessment_id = %assessment_id,
            "attempt started"
        );
        Ok(Self::present(attempt, &definition))
    }

    /// Auto-submits an attempt the sweeper has not reached yet. Returns
    /// whether the attempt is now closed.
    async fn close_if_overdue(
        &self,
        attempt: &Attempt,
        definition: &AssessmentDefinition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let duration = definition.assessment.duration();
        if !attempt.is_expired(duration, now) {
            return Ok(false);
        }
        tracing::info!(attempt_id = %attempt.id, "closing overdue attempt before a new start");
        self.finalize(attempt, definition, attempt.deadline(duration)).await?;
        Ok(true)
    }

    /// Rebuilds the question list of an in-progress attempt in the order
    /// `start` produced.
    pub async fn resume(&self, attempt_id: Uuid, acting_user_id: Uuid) -> Result<StartedAttempt> {
        let attempt = self.owned_attempt(attempt_id, acting_user_id).await?;
        ensure_in_progress(&attempt)?;
        let definition = self.assessments.find_assessment(attempt.assessment_id).await?;
        Ok(Self::present(attempt, &definition))
    }

    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        raw_answer: &str,
        acting_user_id: Uuid,
    ) -> Result<Answer> {
        let attempt = self.owned_attempt(attempt_id, acting_user_id).await?;
        ensure_in_progress(&attempt)?;

        let definition = self.assessments.find_assessment(attempt.assessment_id).await?;
        let now = self.clock.now();
        let deadline = attempt.deadline(definition.assessment.duration());
        if now > deadline {
            tracing::warn!(attempt_id = %attempt.id, %deadline, "answer rejected after deadline");
            if let Err(e) = self.finalize(&attempt, &definition, deadline).await {
                tracing::warn!(attempt_id = %attempt.id, error = ?e, "auto-submit on expired save failed");
            }
            return Err(Error::PreconditionFailed("expired".to_string()));
        }

        let question = self.assessments.find_question(question_id).await?;
        if question.assessment_id != attempt.assessment_id {
            return Err(Error::BadRequest(
                "question does not belong to this assessment".to_string(),
            ));
        }
        let is_correct = question.evaluate(raw_answer).map_err(Error::BadRequest)?;

        let answer = Answer {
            id: Uuid::new_v4(),
            attempt_id: attempt.id,
            question_id,
            answer: raw_answer.to_string(),
            is_correct,
            answered_at: now,
        };
        self.upsert_answer(answer).await
    }

    /// Last write wins. A concurrent first save for the same question turns
    /// into an update.
    async fn upsert_answer(&self, answer: Answer) -> Result<Answer> {
        if self
            .attempts
            .find_answer(answer.attempt_id, answer.question_id)
            .await?
            .is_some()
        {
            return self.attempts.update_answer(&answer).await;
        }
        match self.attempts.save_answer(&answer).await {
            Err(Error::Conflict(_)) => self.attempts.update_answer(&answer).await,
            other => other,
        }
    }

    /// Grades and closes the attempt. Submitting an attempt that is already
    /// terminal returns its stored result unchanged.
    pub async fn submit(&self, attempt_id: Uuid, acting_user_id: Uuid) -> Result<SubmitResult> {
        let attempt = self.owned_attempt(attempt_id, acting_user_id).await?;
        let definition = self.assessments.find_assessment(attempt.assessment_id).await?;

        let (attempt, grade) = if attempt.status.is_terminal() {
            let grade = self.grade(&attempt, &definition).await?;
            (attempt, grade)
        } else {
            let deadline = attempt.deadline(definition.assessment.duration());
            let at = self.clock.now().min(deadline);
            self.finalize(&attempt, &definition, at).await?
        };

        Ok(Self::submit_result(&attempt, &definition, grade))
    }

    /// Auto-submits an overdue attempt as of its deadline. Used by the
    /// expiration sweeper; no ownership check.
    pub async fn expire(&self, attempt: &Attempt) -> Result<SubmitResult> {
        let definition = self.assessments.find_assessment(attempt.assessment_id).await?;
        let deadline = attempt.deadline(definition.assessment.duration());
        let (attempt, grade) = self.finalize(attempt, &definition, deadline).await?;
        Ok(Self::submit_result(&attempt, &definition, grade))
    }

    pub async fn expired_attempts(&self) -> Result<Vec<Attempt>> {
        self.attempts.expired_attempts(self.clock.now()).await
    }

    pub async fn submit_monitor_event(
        &self,
        attempt_id: Uuid,
        event_type: &str,
        details: &JsonValue,
        image: Option<Vec<u8>>,
        acting_user_id: Uuid,
    ) -> Result<MonitorEventResult> {
        let attempt = self.owned_attempt(attempt_id, acting_user_id).await?;
        ensure_in_progress(&attempt)?;

        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(Error::BadRequest("event type is required".to_string()));
        }

        let classification = ProctorService::classify(event_type, details);
        let activity = SuspiciousActivity {
            id: Uuid::new_v4(),
            user_id: attempt.user_id,
            assessment_id: attempt.assessment_id,
            attempt_id: attempt.id,
            event_type: event_type.to_string(),
            details: classification.details,
            severity: classification.severity,
            image,
            created_at: self.clock.now(),
        };
        self.attempts.save_suspicious_activity(&activity).await?;

        if classification.severity == Severity::Critical {
            tracing::warn!(
                attempt_id = %attempt.id,
                user_id = %attempt.user_id,
                event_type,
                "critical proctoring event"
            );
        }

        Ok(MonitorEventResult {
            received: true,
            severity: classification.severity,
            message: classification.message.to_string(),
        })
    }

    pub async fn status(&self, attempt_id: Uuid, acting_user_id: Uuid) -> Result<AttemptStatusView> {
        let attempt = self.owned_attempt(attempt_id, acting_user_id).await?;
        let definition = self.assessments.find_assessment(attempt.assessment_id).await?;
        let answered = self.attempts.find_answers(attempt.id).await?.len();
        let ends_at = attempt.deadline(definition.assessment.duration());
        let time_remaining_seconds = match attempt.status {
            AttemptStatus::InProgress => seconds_until(ends_at, self.clock.now()),
            _ => 0,
        };

        Ok(AttemptStatusView {
            attempt_id: attempt.id,
            assessment_id: attempt.assessment_id,
            title: definition.assessment.title,
            status: attempt.status,
            answered,
            total_questions: definition.questions.len(),
            time_remaining_seconds,
            ends_at,
        })
    }

    pub async fn history(&self, user_id: Uuid, assessment_id: Uuid) -> Result<Vec<Attempt>> {
        self.assessments.find_user(user_id).await?;
        self.assessments.find_assessment(assessment_id).await?;
        self.attempts
            .find_completed_attempts_by_user_and_assessment(user_id, assessment_id)
            .await
    }

    async fn owned_attempt(&self, attempt_id: Uuid, acting_user_id: Uuid) -> Result<Attempt> {
        let attempt = self.attempts.find_attempt(attempt_id).await?;
        if attempt.user_id != acting_user_id {
            return Err(Error::Unauthorized(
                "attempt belongs to another user".to_string(),
            ));
        }
        Ok(attempt)
    }

    async fn grade(&self, attempt: &Attempt, definition: &AssessmentDefinition) -> Result<GradeResult> {
        let answers = answers_by_question(self.attempts.find_answers(attempt.id).await?);
        Ok(GradingService::grade(
            &definition.questions,
            &answers,
            definition.assessment.passing_score,
        ))
    }

    /// Grades the attempt and writes the terminal record as of `at`. When
    /// another path finalized the attempt first, the stored record wins.
    async fn finalize(
        &self,
        attempt: &Attempt,
        definition: &AssessmentDefinition,
        at: DateTime<Utc>,
    ) -> Result<(Attempt, GradeResult)> {
        match self
            .attempts
            .finalize_attempt(attempt.id, definition, at)
            .await
        {
            Ok((saved, grade)) => {
                tracing::info!(
                    attempt_id = %saved.id,
                    status = %saved.status,
                    score = grade.score_percent,
                    "attempt finalized"
                );
                Ok((saved, grade))
            }
            Err(Error::Conflict(_)) => {
                let current = self.attempts.find_attempt(attempt.id).await?;
                tracing::debug!(attempt_id = %current.id, status = %current.status, "attempt already finalized");
                let grade = self.grade(&current, definition).await?;
                Ok((current, grade))
            }
            Err(e) => Err(e),
        }
    }

    fn submit_result(
        attempt: &Attempt,
        definition: &AssessmentDefinition,
        grade: GradeResult,
    ) -> SubmitResult {
        SubmitResult {
            attempt_id: attempt.id,
            assessment_id: attempt.assessment_id,
            status: attempt.status,
            score: attempt.score.unwrap_or(grade.score_percent),
            submitted_at: attempt.submitted_at,
            duration: attempt.duration,
            show_results: definition.assessment.settings.show_results,
            feedback: GradingService::feedback(&grade),
            grade,
        }
    }

    fn present(attempt: Attempt, definition: &AssessmentDefinition) -> StartedAttempt {
        let assessment = &definition.assessment;
        let mut questions: Vec<StudentQuestion> =
            definition.questions.iter().map(Question::sanitized).collect();
        if assessment.settings.randomize_questions {
            let mut rng = StdRng::seed_from_u64(attempt.shuffle_seed());
            questions.shuffle(&mut rng);
        }

        StartedAttempt {
            ends_at: attempt.deadline(assessment.duration()),
            attempt,
            questions,
            settings: assessment.settings.clone(),
            assessment: AssessmentSummary::from(assessment),
        }
    }
}

fn ensure_in_progress(attempt: &Attempt) -> Result<()> {
    if attempt.status != AttemptStatus::InProgress {
        return Err(Error::PreconditionFailed("not in progress".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::{MockAssessmentStore, MockAttemptStore};
    use crate::models::assessment::{Assessment, AssessmentSettings, AssessmentStatus};
    use crate::models::question::QuestionType;
    use crate::models::user::{User, UserRole, UserStatus};
    use crate::utils::time::ManualClock;
    use chrono::Duration;

    fn definition(id: Uuid) -> AssessmentDefinition {
        AssessmentDefinition {
            assessment: Assessment {
                id,
                title: "Quiz".into(),
                description: None,
                status: AssessmentStatus::Published,
                due_date: None,
                duration_minutes: 30,
                passing_score: 50.0,
                settings: AssessmentSettings::default(),
                teacher_id: Uuid::new_v4(),
            },
            questions: vec![Question {
                id: Uuid::new_v4(),
                assessment_id: id,
                question_type: QuestionType::TrueFalse,
                prompt: "Sky is blue".into(),
                points: 10.0,
                correct_answer: Some("true".into()),
                options: vec![],
            }],
        }
    }

    fn service(
        attempts: MockAttemptStore,
        assessments: MockAssessmentStore,
        now: DateTime<Utc>,
    ) -> AttemptService {
        AttemptService::new(
            Arc::new(attempts),
            Arc::new(assessments),
            Arc::new(ManualClock::new(now)),
        )
    }

    fn storage_error() -> Error {
        Error::Database(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test]
    async fn storage_errors_surface_to_the_caller() {
        let mut attempts = MockAttemptStore::new();
        attempts
            .expect_find_attempt()
            .returning(|_| Err(storage_error()));
        let svc = service(attempts, MockAssessmentStore::new(), Utc::now());

        let err = svc.submit(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn start_does_not_create_when_eligibility_read_fails() {
        let user = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        let def = definition(assessment_id);

        let mut assessments = MockAssessmentStore::new();
        assessments.expect_find_user().returning(move |id| {
            Ok(User {
                id,
                role: UserRole::Student,
                status: UserStatus::Active,
            })
        });
        assessments
            .expect_find_assessment()
            .returning(move |_| Ok(def.clone()));

        let mut attempts = MockAttemptStore::new();
        attempts
            .expect_find_in_progress_attempt()
            .returning(|_| Ok(None));
        attempts
            .expect_count_attempts()
            .returning(|_, _| Err(storage_error()));
        attempts.expect_create_attempt().never();

        let svc = service(attempts, assessments, Utc::now());
        assert!(svc.start(user, assessment_id).await.unwrap_err().is_storage());
    }

    #[tokio::test]
    async fn start_maps_in_progress_race_to_precondition() {
        let user = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        let def = definition(assessment_id);

        let mut assessments = MockAssessmentStore::new();
        assessments.expect_find_user().returning(move |id| {
            Ok(User {
                id,
                role: UserRole::Student,
                status: UserStatus::Active,
            })
        });
        assessments
            .expect_find_assessment()
            .returning(move |_| Ok(def.clone()));

        let mut attempts = MockAttemptStore::new();
        attempts.expect_count_attempts().returning(|_, _| Ok(0));
        attempts
            .expect_has_completed_assessment()
            .returning(|_, _| Ok(false));
        attempts
            .expect_find_in_progress_attempt()
            .returning(|_| Ok(None));
        attempts
            .expect_create_attempt()
            .times(1)
            .returning(|_| Err(Error::Conflict("unique violation".into())));

        let svc = service(attempts, assessments, Utc::now());
        match svc.start(user, assessment_id).await {
            Err(Error::PreconditionFailed(msg)) => assert_eq!(msg, "already in progress"),
            other => panic!("unexpected: {:?}", other.map(|s| s.attempt.id)),
        }
    }

    #[tokio::test]
    async fn lost_status_race_returns_the_stored_result() {
        let user = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        let def = definition(assessment_id);
        let start = Utc::now();
        let in_progress = Attempt::begin(user, assessment_id, start);
        let terminal = in_progress.finalized(start + Duration::minutes(30), 0.0, AttemptStatus::Failed);
        let expected = terminal.clone();

        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_find_assessment()
            .returning(move |_| Ok(def.clone()));

        let mut attempts = MockAttemptStore::new();
        let mut reads = 0;
        attempts
            .expect_find_attempt()
            .times(2)
            .returning(move |_| {
                reads += 1;
                if reads == 1 {
                    Ok(in_progress.clone())
                } else {
                    Ok(terminal.clone())
                }
            });
        attempts.expect_find_answers().returning(|_| Ok(vec![]));
        attempts
            .expect_finalize_attempt()
            .times(1)
            .returning(|_, _, _| Err(Error::Conflict("status changed".into())));

        let svc = service(attempts, assessments, start + Duration::minutes(5));
        let result = svc.submit(expected.id, user).await.unwrap();
        assert_eq!(result.status, AttemptStatus::Failed);
        assert_eq!(result.submitted_at, expected.submitted_at);
        assert_eq!(result.duration, Some(30));
    }

    #[tokio::test]
    async fn monitor_event_requires_an_event_type() {
        let user = Uuid::new_v4();
        let attempt = Attempt::begin(user, Uuid::new_v4(), Utc::now());
        let id = attempt.id;

        let mut attempts = MockAttemptStore::new();
        attempts
            .expect_find_attempt()
            .returning(move |_| Ok(attempt.clone()));
        attempts.expect_save_suspicious_activity().never();

        let svc = service(attempts, MockAssessmentStore::new(), Utc::now());
        let err = svc
            .submit_monitor_event(id, "  ", &JsonValue::Null, None, user)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn racing_first_save_turns_into_an_update() {
        let user = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        let def = definition(assessment_id);
        let question = def.questions[0].clone();
        let question_id = question.id;
        let attempt = Attempt::begin(user, assessment_id, Utc::now());
        let attempt_id = attempt.id;

        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_find_assessment()
            .returning(move |_| Ok(def.clone()));
        assessments
            .expect_find_question()
            .returning(move |_| Ok(question.clone()));

        let mut attempts = MockAttemptStore::new();
        attempts
            .expect_find_attempt()
            .returning(move |_| Ok(attempt.clone()));
        attempts.expect_find_answer().returning(|_, _| Ok(None));
        attempts
            .expect_save_answer()
            .times(1)
            .returning(|_| Err(Error::Conflict("answer already exists".into())));
        attempts
            .expect_update_answer()
            .times(1)
            .withf(|answer| answer.answer == "false" && answer.is_correct == Some(false))
            .returning(|answer| Ok(answer.clone()));

        let svc = service(attempts, assessments, Utc::now() + Duration::minutes(1));
        let saved = svc
            .save_answer(attempt_id, question_id, "false", user)
            .await
            .unwrap();
        assert_eq!(saved.question_id, question_id);
    }
}
