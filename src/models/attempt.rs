use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Passed,
    Failed,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Passed => "passed",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }

    /// Passed or Failed; Abandoned attempts do not count as a completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, AttemptStatus::Passed | AttemptStatus::Failed)
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "passed" => Ok(AttemptStatus::Passed),
            "failed" => Ok(AttemptStatus::Failed),
            "abandoned" => Ok(AttemptStatus::Abandoned),
            other => Err(format!("unknown attempt status '{}'", other)),
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub assessment_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Percentage in [0, 100].
    pub score: Option<f64>,
    /// Whole minutes between start and submission.
    pub duration: Option<i64>,
    pub status: AttemptStatus,
}

impl Attempt {
    pub fn begin(user_id: Uuid, assessment_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            assessment_id,
            started_at,
            submitted_at: None,
            ended_at: None,
            score: None,
            duration: None,
            status: AttemptStatus::InProgress,
        }
    }

    pub fn deadline(&self, duration: Duration) -> DateTime<Utc> {
        self.started_at + duration
    }

    pub fn is_expired(&self, duration: Duration, now: DateTime<Utc>) -> bool {
        now > self.deadline(duration)
    }

    /// Returns the terminal copy of this attempt. Submission and end times
    /// are both `at`; duration is floored to whole minutes.
    pub fn finalized(&self, at: DateTime<Utc>, score: f64, status: AttemptStatus) -> Self {
        let at = at.max(self.started_at);
        Self {
            submitted_at: Some(at),
            ended_at: Some(at),
            score: Some(score),
            duration: Some((at - self.started_at).num_minutes()),
            status,
            ..self.clone()
        }
    }

    /// Stable per-attempt seed for question shuffling.
    pub fn shuffle_seed(&self) -> u64 {
        let (hi, lo) = self.id.as_u64_pair();
        hi ^ lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalized_sets_every_terminal_field() {
        let start = Utc::now();
        let attempt = Attempt::begin(Uuid::new_v4(), Uuid::new_v4(), start);
        assert!(attempt.submitted_at.is_none() && attempt.score.is_none());

        let done = attempt.finalized(start + Duration::seconds(330), 75.0, AttemptStatus::Passed);
        assert_eq!(done.submitted_at, done.ended_at);
        assert_eq!(done.duration, Some(5));
        assert_eq!(done.score, Some(75.0));
        assert!(done.status.is_terminal());
        assert_eq!(done.id, attempt.id);
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let start = Utc::now();
        let attempt = Attempt::begin(Uuid::new_v4(), Uuid::new_v4(), start);
        let d = Duration::minutes(10);
        assert!(!attempt.is_expired(d, start + d));
        assert!(attempt.is_expired(d, start + d + Duration::seconds(1)));
    }
}
