use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::question::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Draft,
    Published,
}

impl AssessmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentStatus::Draft => "draft",
            AssessmentStatus::Published => "published",
        }
    }
}

impl std::str::FromStr for AssessmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AssessmentStatus::Draft),
            "published" => Ok(AssessmentStatus::Published),
            other => Err(format!("unknown assessment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSettings {
    pub allow_retake: bool,
    pub max_attempts: i32,
    pub randomize_questions: bool,
    pub show_results: bool,
}

impl Default for AssessmentSettings {
    fn default() -> Self {
        Self {
            allow_retake: false,
            max_attempts: 1,
            randomize_questions: false,
            show_results: true,
        }
    }
}

impl AssessmentSettings {
    /// `max_attempts` only applies when retakes are allowed.
    pub fn effective_max_attempts(&self) -> i64 {
        if self.allow_retake {
            i64::from(self.max_attempts.max(1))
        } else {
            1
        }
    }

    /// Checks the retake policy against the user's attempt history.
    /// Returns the rejection reason when a new attempt is not allowed.
    pub fn check_retake(&self, attempt_count: i64, has_completed: bool) -> Result<(), &'static str> {
        if self.allow_retake {
            if attempt_count >= self.effective_max_attempts() {
                return Err("max attempts");
            }
        } else if has_completed {
            return Err("already completed");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: AssessmentStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub passing_score: f64,
    pub settings: AssessmentSettings,
    pub teacher_id: Uuid,
}

impl Assessment {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn is_published(&self) -> bool {
        self.status == AssessmentStatus::Published
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.due_date, Some(due) if due <= now)
    }
}

/// An assessment together with its question bank in authoring order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentDefinition {
    pub assessment: Assessment,
    pub questions: Vec<Question>,
}

/// One row of the "assessments I can still take" listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableAssessment {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub passing_score: f64,
    pub attempts_used: i64,
    pub max_attempts: i64,
}
