use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub assessment_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(default = "default_points")]
    pub points: f64,
    /// Absent for essays.
    pub correct_answer: Option<String>,
    /// Only populated for multiple-choice questions, in display order.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

fn default_points() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    Essay,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Essay => "essay",
        }
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "true_false" => Ok(QuestionType::TrueFalse),
            "essay" => Ok(QuestionType::Essay),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

/// Student-facing projection of a question. It has no correct-answer field
/// so the key can never be serialized to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentQuestion {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub points: f64,
}

impl Question {
    pub fn sanitized(&self) -> StudentQuestion {
        StudentQuestion {
            id: self.id,
            question_type: self.question_type,
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            points: self.points,
        }
    }

    /// Validates a raw answer against the question type and returns its
    /// correctness: `Some(bool)` for auto-gradable questions, `None` for essays.
    pub fn evaluate(&self, raw_answer: &str) -> Result<Option<bool>, String> {
        match self.question_type {
            QuestionType::MultipleChoice => {
                if !self.options.iter().any(|o| o.id == raw_answer) {
                    return Err("invalid option".to_string());
                }
                Ok(Some(self.matches_key(raw_answer)))
            }
            QuestionType::TrueFalse => {
                if raw_answer != "true" && raw_answer != "false" {
                    return Err("true/false answer must be \"true\" or \"false\"".to_string());
                }
                Ok(Some(self.matches_key(raw_answer)))
            }
            QuestionType::Essay => Ok(None),
        }
    }

    fn matches_key(&self, raw_answer: &str) -> bool {
        self.correct_answer.as_deref() == Some(raw_answer)
    }
}
