use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::answer::Answer;
use crate::models::assessment::{AssessmentDefinition, AvailableAssessment};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::Question;
use crate::models::suspicious_activity::SuspiciousActivity;
use crate::models::user::User;
use crate::services::grading_service::GradeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Pagination {
    pub const MAX_PER_PAGE: i64 = 100;
    /// Keeps `offset()` representable for any `per_page`.
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_PER_PAGE;

    pub fn new(page: i64, per_page: i64) -> Self {
        Self { page, per_page }.normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            page: self.page.clamp(1, Self::MAX_PAGE),
            per_page: self.per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page.max(0))
    }
}

/// Durable storage of attempts, their answers and proctoring records.
///
/// Answer writes must be serialized per attempt and rejected once the attempt
/// has left `InProgress`. `update_attempt` is a compare-and-swap on status:
/// it fails with `Error::Conflict` when the stored status differs from
/// `expected`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Persists a new attempt. Fails with `Conflict` if the user already has
    /// an attempt in progress.
    async fn create_attempt(&self, attempt: &Attempt) -> Result<Attempt>;

    async fn find_attempt(&self, id: Uuid) -> Result<Attempt>;

    async fn update_attempt(&self, attempt: &Attempt, expected: AttemptStatus) -> Result<Attempt>;

    /// Grades and closes an in-progress attempt as one locked step: no answer
    /// can land between reading the answers and writing the terminal record.
    /// `Conflict` when the attempt is no longer in progress.
    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        definition: &AssessmentDefinition,
        at: DateTime<Utc>,
    ) -> Result<(Attempt, GradeResult)>;

    /// Inserts a new answer; `Conflict` if one exists for the same question.
    async fn save_answer(&self, answer: &Answer) -> Result<Answer>;

    async fn update_answer(&self, answer: &Answer) -> Result<Answer>;

    async fn find_answer(&self, attempt_id: Uuid, question_id: Uuid) -> Result<Option<Answer>>;

    async fn find_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>>;

    async fn count_attempts(&self, user_id: Uuid, assessment_id: Uuid) -> Result<i64>;

    async fn has_completed_assessment(&self, user_id: Uuid, assessment_id: Uuid) -> Result<bool>;

    async fn is_user_in_attempt(&self, user_id: Uuid) -> Result<bool>;

    async fn find_in_progress_attempt(&self, user_id: Uuid) -> Result<Option<Attempt>>;

    async fn find_available_assessments(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        pagination: Pagination,
    ) -> Result<(Vec<AvailableAssessment>, i64)>;

    async fn find_completed_attempts_by_user_and_assessment(
        &self,
        user_id: Uuid,
        assessment_id: Uuid,
    ) -> Result<Vec<Attempt>>;

    /// In-progress attempts whose deadline is strictly before `now`.
    async fn expired_attempts(&self, now: DateTime<Utc>) -> Result<Vec<Attempt>>;

    async fn save_suspicious_activity(&self, activity: &SuspiciousActivity) -> Result<SuspiciousActivity>;
}

/// Read-only access to users and authored assessments.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<User>;

    /// Assessment plus its questions in authoring order.
    async fn find_assessment(&self, id: Uuid) -> Result<AssessmentDefinition>;

    async fn find_question(&self, id: Uuid) -> Result<Question>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_are_object_safe() {
        fn _attempts(_: Box<dyn AttemptStore>) {}
        fn _assessments(_: Box<dyn AssessmentStore>) {}
    }

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination::new(0, 1000);
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, Pagination::MAX_PER_PAGE);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        let p = Pagination::new(i64::MAX, 100);
        assert_eq!(p.page, Pagination::MAX_PAGE);
        assert!(p.offset() > 0);

        let raw = Pagination {
            page: i64::MAX,
            per_page: i64::MAX,
        };
        assert_eq!(raw.offset(), i64::MAX);
        assert_eq!(raw.normalized().offset(), (Pagination::MAX_PAGE - 1) * 100);
    }
}
