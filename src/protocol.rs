//! Wire structs for the backend's REST API (serde ready).
//! Every JSON endpoint except `/health` wraps its payload in `Envelope`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    Answer, AnswerId, AnswerResult, Mission, MissionId, MissionProgress, Problem, ProblemInfo,
    User,
};

/// `{success, message, data?, timestamp}` wrapper around every response.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
}

/// FastAPI's error body for non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub detail: Value,
}

impl ErrorDetail {
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(s) => s.clone(),
            // Validation errors come back as a list of {loc, msg, type}.
            Value::Array(items) => items
                .iter()
                .filter_map(|i| i.get("msg").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

//
// Auth
//

#[derive(Debug, Serialize)]
pub struct LoginIn<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginOut {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".into()
}

#[derive(Debug, Deserialize)]
pub struct VerifyOut {
    pub user: User,
}

//
// Missions
//

/// Payload of `GET /missions/current` and `GET /missions/{id}`.
#[derive(Clone, Debug, Deserialize)]
pub struct MissionSnapshot {
    pub mission: Mission,
    #[serde(default)]
    pub current_problem: Option<Problem>,
    pub progress: MissionProgress,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StartedMission {
    pub mission: Mission,
    #[serde(default)]
    pub first_problem: Option<Problem>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteOut {
    #[serde(default)]
    pub mission: Option<Mission>,
    #[serde(default)]
    pub completed: bool,
}

//
// Problems
//

#[derive(Clone, Debug, Serialize)]
pub struct TopicQuery {
    #[serde(skip)]
    pub topic: String,
    pub difficulty_min: u8,
    pub difficulty_max: u8,
    pub limit: u32,
}

impl TopicQuery {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), difficulty_min: 1, difficulty_max: 10, limit: 10 }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TopicProblems {
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub topic: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MissionProblem {
    pub problem: Problem,
    #[serde(default)]
    pub sequence_order: u32,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MissionProblems {
    pub mission_id: MissionId,
    pub problems: Vec<MissionProblem>,
    #[serde(default)]
    pub total_count: usize,
}

//
// Answers
//

#[derive(Clone, Debug, Deserialize)]
pub struct SubmittedAnswer {
    pub answer_id: AnswerId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub image_count: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AddedImages {
    pub answer_id: AnswerId,
    pub total_images: usize,
    pub added_images: usize,
}

/// Raw payload of `GET /answers/{id}/result`. Pending answers carry only
/// `{answer_id, status, answer}`; graded ones add `result` and `problem_info`.
#[derive(Debug, Deserialize)]
pub struct ResultOut {
    pub answer: Answer,
    #[serde(default)]
    pub result: Option<AnswerResult>,
    #[serde(default)]
    pub problem_info: Option<ProblemInfo>,
}

/// Answer lookup as the stores see it.
#[derive(Clone, Debug, PartialEq)]
pub enum AnswerLookup {
    Pending {
        answer: Answer,
    },
    Graded {
        answer: Answer,
        result: AnswerResult,
        problem_info: Option<ProblemInfo>,
    },
}

impl AnswerLookup {
    pub fn answer(&self) -> &Answer {
        match self {
            AnswerLookup::Pending { answer } | AnswerLookup::Graded { answer, .. } => answer,
        }
    }
}

impl From<ResultOut> for AnswerLookup {
    fn from(out: ResultOut) -> Self {
        // A missing score means grading is still running, whatever else came back.
        if !out.answer.is_graded() {
            return AnswerLookup::Pending { answer: out.answer };
        }
        match out.result {
            Some(result) => AnswerLookup::Graded {
                answer: out.answer,
                result,
                problem_info: out.problem_info,
            },
            None => {
                let result = AnswerResult {
                    answer_id: out.answer.id,
                    score: out.answer.score.unwrap_or_default(),
                    feedback: out.answer.ai_feedback.clone().unwrap_or_default(),
                    concepts_learned: out.answer.key_concepts_identified.clone(),
                    areas_for_improvement: out.answer.mistakes_detected.clone(),
                    next_recommendations: Vec::new(),
                };
                AnswerLookup::Graded { answer: out.answer, result, problem_info: out.problem_info }
            }
        }
    }
}

//
// Misc
//

#[derive(Clone, Debug, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub uploads_dir: Option<bool>,
}
