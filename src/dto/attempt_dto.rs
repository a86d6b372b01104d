use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::models::assessment::{Assessment, AssessmentSettings, AvailableAssessment};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::StudentQuestion;
use crate::models::suspicious_activity::Severity;
use crate::services::grading_service::GradeResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub passing_score: f64,
    pub due_date: Option<DateTime<Utc>>,
}

impl From<&Assessment> for AssessmentSummary {
    fn from(a: &Assessment) -> Self {
        Self {
            id: a.id,
            title: a.title.clone(),
            description: a.description.clone(),
            duration_minutes: a.duration_minutes,
            passing_score: a.passing_score,
            due_date: a.due_date,
        }
    }
}

/// Returned by `start` and `resume`: the attempt plus the sanitized
/// questions in the order this attempt sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedAttempt {
    pub attempt: Attempt,
    pub questions: Vec<StudentQuestion>,
    pub settings: AssessmentSettings,
    pub assessment: AssessmentSummary,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub status: AttemptStatus,
    pub score: f64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub show_results: bool,
    pub grade: GradeResult,
    pub feedback: String,
}

/// Wire view of a submission. Grade details are withheld unless the
/// assessment shows results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub submitted_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub show_results: bool,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttemptStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<GradeResult>,
}

impl From<SubmitResult> for SubmitResponse {
    fn from(r: SubmitResult) -> Self {
        let show = r.show_results;
        Self {
            attempt_id: r.attempt_id,
            assessment_id: r.assessment_id,
            submitted_at: r.submitted_at,
            duration: r.duration,
            show_results: show,
            feedback: r.feedback,
            status: show.then_some(r.status),
            score: show.then_some(r.score),
            grade: show.then_some(r.grade),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEventResult {
    pub received: bool,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptStatusView {
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub title: String,
    pub status: AttemptStatus,
    pub answered: usize,
    pub total_questions: usize,
    pub time_remaining_seconds: i64,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableAssessmentsPage {
    pub items: Vec<AvailableAssessment>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    #[validate(length(max = 20000))]
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MonitorEventRequest {
    #[validate(length(min = 1, max = 64))]
    pub event_type: String,
    #[serde(default)]
    pub details: JsonValue,
    /// Base64-encoded webcam snapshot.
    pub image: Option<String>,
}
