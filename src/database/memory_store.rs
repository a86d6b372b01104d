//! In-process store backend.
//!
//! Honors the same contract as the Postgres store: one in-progress attempt
//! per user, one answer per (attempt, question), answer writes rejected once
//! the attempt is terminal, and compare-and-swap on attempt status. A single
//! mutex serializes every operation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::store::{AssessmentStore, AttemptStore, Pagination};
use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::assessment::{Assessment, AssessmentDefinition, AvailableAssessment};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::Question;
use crate::models::suspicious_activity::SuspiciousActivity;
use crate::models::user::User;
use crate::services::grading_service::{answers_by_question, GradeResult, GradingService};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    assessments: HashMap<Uuid, Assessment>,
    questions: Vec<Question>,
    attempts: HashMap<Uuid, Attempt>,
    answers: HashMap<(Uuid, Uuid), Answer>,
    activities: Vec<SuspiciousActivity>,
}

impl MemoryState {
    fn attempt(&self, id: Uuid) -> Result<&Attempt> {
        self.attempts
            .get(&id)
            .ok_or_else(|| Error::NotFound("attempt".to_string()))
    }

    fn lock_for_answer(&self, attempt_id: Uuid) -> Result<()> {
        let attempt = self.attempt(attempt_id)?;
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::PreconditionFailed("not in progress".to_string()));
        }
        Ok(())
    }

    fn user_attempts(&self, user_id: Uuid, assessment_id: Uuid) -> impl Iterator<Item = &Attempt> {
        self.attempts
            .values()
            .filter(move |a| a.user_id == user_id && a.assessment_id == assessment_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_user(&self, user: User) {
        self.state().users.insert(user.id, user);
    }

    /// Replaces the assessment and its questions.
    pub fn insert_assessment(&self, definition: AssessmentDefinition) {
        let mut state = self.state();
        let id = definition.assessment.id;
        state.questions.retain(|q| q.assessment_id != id);
        state.questions.extend(definition.questions);
        state.assessments.insert(id, definition.assessment);
    }

    pub fn attempts_for_user(&self, user_id: Uuid) -> Vec<Attempt> {
        let mut attempts: Vec<Attempt> = self
            .state()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.started_at);
        attempts
    }

    pub fn activities_for_attempt(&self, attempt_id: Uuid) -> Vec<SuspiciousActivity> {
        self.state()
            .activities
            .iter()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect()
    }

    /// Removes an attempt with its answers and proctoring records.
    pub fn delete_attempt(&self, attempt_id: Uuid) -> Result<()> {
        let mut state = self.state();
        state
            .attempts
            .remove(&attempt_id)
            .ok_or_else(|| Error::NotFound("attempt".to_string()))?;
        state.answers.retain(|(a, _), _| *a != attempt_id);
        state.activities.retain(|s| s.attempt_id != attempt_id);
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create_attempt(&self, attempt: &Attempt) -> Result<Attempt> {
        let mut state = self.state();
        if attempt.status == AttemptStatus::InProgress
            && state
                .attempts
                .values()
                .any(|a| a.user_id == attempt.user_id && a.status == AttemptStatus::InProgress)
        {
            return Err(Error::Conflict("user already has an attempt in progress".to_string()));
        }
        if state.attempts.contains_key(&attempt.id) {
            return Err(Error::Conflict("attempt already exists".to_string()));
        }
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt.clone())
    }

    async fn find_attempt(&self, id: Uuid) -> Result<Attempt> {
        self.state().attempt(id).cloned()
    }

    async fn update_attempt(&self, attempt: &Attempt, expected: AttemptStatus) -> Result<Attempt> {
        let mut state = self.state();
        let stored = state
            .attempts
            .get_mut(&attempt.id)
            .ok_or_else(|| Error::NotFound("attempt".to_string()))?;
        if stored.status != expected {
            return Err(Error::Conflict(format!(
                "attempt status is {}, expected {}",
                stored.status, expected
            )));
        }
        *stored = attempt.clone();
        Ok(attempt.clone())
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        definition: &AssessmentDefinition,
        at: DateTime<Utc>,
    ) -> Result<(Attempt, GradeResult)> {
        let mut state = self.state();
        let attempt = state.attempt(attempt_id)?.clone();
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::Conflict(format!(
                "attempt status is {}, expected {}",
                attempt.status,
                AttemptStatus::InProgress
            )));
        }

        let answers = answers_by_question(
            state
                .answers
                .values()
                .filter(|a| a.attempt_id == attempt_id)
                .cloned()
                .collect(),
        );
        let grade = GradingService::grade(
            &definition.questions,
            &answers,
            definition.assessment.passing_score,
        );
        let completed = attempt.finalized(at, grade.score_percent, grade.status);
        state.attempts.insert(attempt_id, completed.clone());
        Ok((completed, grade))
    }

    async fn save_answer(&self, answer: &Answer) -> Result<Answer> {
        let mut state = self.state();
        state.lock_for_answer(answer.attempt_id)?;
        let key = (answer.attempt_id, answer.question_id);
        if state.answers.contains_key(&key) {
            return Err(Error::Conflict("answer already exists".to_string()));
        }
        state.answers.insert(key, answer.clone());
        Ok(answer.clone())
    }

    async fn update_answer(&self, answer: &Answer) -> Result<Answer> {
        let mut state = self.state();
        state.lock_for_answer(answer.attempt_id)?;
        let stored = state
            .answers
            .get_mut(&(answer.attempt_id, answer.question_id))
            .ok_or_else(|| Error::NotFound("answer".to_string()))?;
        stored.answer = answer.answer.clone();
        stored.is_correct = answer.is_correct;
        stored.answered_at = answer.answered_at;
        Ok(stored.clone())
    }

    async fn find_answer(&self, attempt_id: Uuid, question_id: Uuid) -> Result<Option<Answer>> {
        Ok(self.state().answers.get(&(attempt_id, question_id)).cloned())
    }

    async fn find_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>> {
        let mut answers: Vec<Answer> = self
            .state()
            .answers
            .values()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by_key(|a| a.answered_at);
        Ok(answers)
    }

    async fn count_attempts(&self, user_id: Uuid, assessment_id: Uuid) -> Result<i64> {
        Ok(self.state().user_attempts(user_id, assessment_id).count() as i64)
    }

    async fn has_completed_assessment(&self, user_id: Uuid, assessment_id: Uuid) -> Result<bool> {
        Ok(self
            .state()
            .user_attempts(user_id, assessment_id)
            .any(|a| a.status.is_completed()))
    }

    async fn is_user_in_attempt(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.find_in_progress_attempt(user_id).await?.is_some())
    }

    async fn find_in_progress_attempt(&self, user_id: Uuid) -> Result<Option<Attempt>> {
        Ok(self
            .state()
            .attempts
            .values()
            .find(|a| a.user_id == user_id && a.status == AttemptStatus::InProgress)
            .cloned())
    }

    async fn find_available_assessments(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        pagination: Pagination,
    ) -> Result<(Vec<AvailableAssessment>, i64)> {
        let state = self.state();
        let mut rows: Vec<AvailableAssessment> = state
            .assessments
            .values()
            .filter(|a| a.is_published() && !a.is_past_due(now))
            .filter_map(|a| {
                let used = state.user_attempts(user_id, a.id).count() as i64;
                let completed = state
                    .user_attempts(user_id, a.id)
                    .any(|t| t.status.is_completed());
                a.settings.check_retake(used, completed).ok()?;
                Some(AvailableAssessment {
                    id: a.id,
                    title: a.title.clone(),
                    description: a.description.clone(),
                    due_date: a.due_date,
                    duration_minutes: a.duration_minutes,
                    passing_score: a.passing_score,
                    attempts_used: used,
                    max_attempts: a.settings.effective_max_attempts(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.due_date.is_none(), a.due_date, &a.title, a.id)
                .cmp(&(b.due_date.is_none(), b.due_date, &b.title, b.id))
        });

        let total = rows.len() as i64;
        let page = pagination.normalized();
        let rows = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok((rows, total))
    }

    async fn find_completed_attempts_by_user_and_assessment(
        &self,
        user_id: Uuid,
        assessment_id: Uuid,
    ) -> Result<Vec<Attempt>> {
        let state = self.state();
        let mut attempts: Vec<Attempt> = state
            .user_attempts(user_id, assessment_id)
            .filter(|a| a.status.is_completed())
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(attempts)
    }

    async fn expired_attempts(&self, now: DateTime<Utc>) -> Result<Vec<Attempt>> {
        let state = self.state();
        let mut expired: Vec<Attempt> = state
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .filter(|a| {
                state
                    .assessments
                    .get(&a.assessment_id)
                    .is_some_and(|assessment| a.is_expired(assessment.duration(), now))
            })
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.started_at);
        Ok(expired)
    }

    async fn save_suspicious_activity(&self, activity: &SuspiciousActivity) -> Result<SuspiciousActivity> {
        let mut state = self.state();
        state.attempt(activity.attempt_id)?;
        state.activities.push(activity.clone());
        Ok(activity.clone())
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<User> {
        self.state()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound("user".to_string()))
    }

    async fn find_assessment(&self, id: Uuid) -> Result<AssessmentDefinition> {
        let state = self.state();
        let assessment = state
            .assessments
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound("assessment".to_string()))?;
        let questions = state
            .questions
            .iter()
            .filter(|q| q.assessment_id == id)
            .cloned()
            .collect();
        Ok(AssessmentDefinition {
            assessment,
            questions,
        })
    }

    async fn find_question(&self, id: Uuid) -> Result<Question> {
        self.state()
            .questions
            .iter()
            .find(|q| q.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound("question".to_string()))
    }
}
