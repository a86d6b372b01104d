use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::answer::Answer;
use crate::models::attempt::AttemptStatus;
use crate::models::question::{Question, QuestionType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub total_questions: usize,
    pub correct_count: usize,
    pub incorrect_count: usize,
    pub unanswered_count: usize,
    pub essay_count: usize,
    pub total_points: f64,
    pub earned_points: f64,
    /// Unrounded percentage in [0, 100].
    pub score_percent: f64,
    pub status: AttemptStatus,
}

pub struct GradingService;

impl GradingService {
    /// Scores an attempt. Essays contribute to the point total but never to
    /// earned points; unanswered questions count as zero.
    pub fn grade(
        questions: &[Question],
        answers: &HashMap<Uuid, Answer>,
        passing_score: f64,
    ) -> GradeResult {
        let mut total_points = 0.0;
        let mut earned_points = 0.0;
        let mut correct_count = 0;
        let mut incorrect_count = 0;
        let mut unanswered_count = 0;
        let mut essay_count = 0;

        for q in questions {
            total_points += q.points;
            let Some(answer) = answers.get(&q.id) else {
                unanswered_count += 1;
                continue;
            };

            if q.question_type == QuestionType::Essay {
                essay_count += 1;
                continue;
            }

            match answer.is_correct {
                Some(true) => {
                    correct_count += 1;
                    earned_points += q.points;
                }
                Some(false) => incorrect_count += 1,
                None => {}
            }
        }

        let score_percent = if total_points > 0.0 {
            (earned_points / total_points) * 100.0
        } else {
            0.0
        };
        let status = if score_percent >= passing_score {
            AttemptStatus::Passed
        } else {
            AttemptStatus::Failed
        };

        GradeResult {
            total_questions: questions.len(),
            correct_count,
            incorrect_count,
            unanswered_count,
            essay_count,
            total_points,
            earned_points,
            score_percent,
            status,
        }
    }

    pub fn feedback(grade: &GradeResult) -> String {
        let mut feedback = String::from("Thank you for completing the assessment.");
        if grade.essay_count > 0 {
            feedback.push_str(" Your essay will be graded manually.");
        }
        feedback
    }
}

pub fn answers_by_question(answers: Vec<Answer>) -> HashMap<Uuid, Answer> {
    answers.into_iter().map(|a| (a.question_id, a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn question(kind: QuestionType, points: f64, key: Option<&str>) -> Question {
        Question {
            id: Uuid::new_v4(),
            assessment_id: Uuid::nil(),
            question_type: kind,
            prompt: "?".into(),
            points,
            correct_answer: key.map(String::from),
            options: vec![],
        }
    }

    fn answer(q: &Question, raw: &str, is_correct: Option<bool>) -> Answer {
        Answer {
            id: Uuid::new_v4(),
            attempt_id: Uuid::nil(),
            question_id: q.id,
            answer: raw.into(),
            is_correct,
            answered_at: Utc::now(),
        }
    }

    #[test]
    fn all_correct_passes_with_full_score() {
        let q1 = question(QuestionType::MultipleChoice, 10.0, Some("a"));
        let q2 = question(QuestionType::TrueFalse, 10.0, Some("true"));
        let answers = answers_by_question(vec![
            answer(&q1, "a", Some(true)),
            answer(&q2, "true", Some(true)),
        ]);

        let grade = GradingService::grade(&[q1, q2], &answers, 50.0);
        assert_eq!(grade.status, AttemptStatus::Passed);
        assert_eq!(grade.score_percent, 100.0);
        assert_eq!(grade.correct_count, 2);
        assert_eq!(grade.total_questions, 2);
        assert_eq!(grade.unanswered_count, 0);
    }

    #[test]
    fn unanswered_and_wrong_fail() {
        let q1 = question(QuestionType::MultipleChoice, 10.0, Some("a"));
        let q2 = question(QuestionType::TrueFalse, 10.0, Some("true"));
        let answers = answers_by_question(vec![answer(&q1, "b", Some(false))]);

        let grade = GradingService::grade(&[q1, q2], &answers, 50.0);
        assert_eq!(grade.status, AttemptStatus::Failed);
        assert_eq!(grade.score_percent, 0.0);
        assert_eq!(grade.incorrect_count, 1);
        assert_eq!(grade.unanswered_count, 1);
    }

    #[test]
    fn essays_count_toward_total_only() {
        let q1 = question(QuestionType::Essay, 10.0, None);
        let q2 = question(QuestionType::TrueFalse, 10.0, Some("true"));
        let answers = answers_by_question(vec![
            answer(&q1, "anything", None),
            answer(&q2, "true", Some(true)),
        ]);

        let grade = GradingService::grade(&[q1, q2], &answers, 50.0);
        assert_eq!(grade.score_percent, 50.0);
        assert_eq!(grade.status, AttemptStatus::Passed);
        assert_eq!(grade.essay_count, 1);
        assert_eq!(grade.correct_count, 1);
        assert!(GradingService::feedback(&grade).ends_with("Your essay will be graded manually."));
    }

    #[test]
    fn passing_boundary_is_inclusive() {
        let q1 = question(QuestionType::TrueFalse, 1.0, Some("true"));
        let q2 = question(QuestionType::TrueFalse, 3.0, Some("true"));
        let answers = answers_by_question(vec![answer(&q1, "true", Some(true))]);

        assert_eq!(
            GradingService::grade(&[q1.clone(), q2.clone()], &answers, 25.0).status,
            AttemptStatus::Passed
        );
        assert_eq!(
            GradingService::grade(&[q1, q2], &answers, 25.1).status,
            AttemptStatus::Failed
        );
    }

    #[test]
    fn zero_points_scores_zero() {
        let q = question(QuestionType::Essay, 0.0, None);
        let grade = GradingService::grade(&[q], &HashMap::new(), 0.0);
        assert_eq!(grade.score_percent, 0.0);
        assert_eq!(grade.status, AttemptStatus::Passed);
        assert_eq!(
            GradingService::feedback(&grade),
            "Thank you for completing the assessment."
        );
    }

    #[test]
    fn grading_is_deterministic() {
        let q1 = question(QuestionType::MultipleChoice, 3.0, Some("a"));
        let q2 = question(QuestionType::TrueFalse, 7.0, Some("false"));
        let answers = answers_by_question(vec![answer(&q2, "false", Some(true))]);
        let questions = [q1, q2];

        let first = GradingService::grade(&questions, &answers, 60.0);
        let second = GradingService::grade(&questions, &answers, 60.0);
        assert_eq!(first, second);
        assert_eq!(first.score_percent.to_bits(), second.score_percent.to_bits());
    }
}
