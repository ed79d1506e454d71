//! Domain models shared by the gateway and the stores: missions, problems,
//! progress snapshots, answers and grading results.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

pub type UserId = i64;
pub type MissionId = i64;
pub type ProblemId = i64;
pub type AnswerId = i64;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
  #[default]
  Pending,
  InProgress,
  Completed,
}

impl MissionStatus {
  fn rank(self) -> u8 {
    match self {
      MissionStatus::Pending => 0,
      MissionStatus::InProgress => 1,
      MissionStatus::Completed => 2,
    }
  }

  /// Status only moves forward: pending -> in_progress -> completed.
  pub fn can_advance_to(self, next: MissionStatus) -> bool {
    next.rank() >= self.rank()
  }
}

/// What kind of mission the backend should assemble.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MissionType {
  #[default]
  Daily,
  Review,
  Challenge,
  Assessment,
}

impl MissionType {
  pub fn as_str(self) -> &'static str {
    self.into()
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
  pub id: UserId,
  pub name: String,
  #[serde(default)] pub grade: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Mission {
  pub id: MissionId,
  pub user_id: UserId,
  pub name: String,
  #[serde(default)] pub description: Option<String>,
  #[serde(default)] pub status: MissionStatus,
  pub total_problems: u32,
  #[serde(default)] pub completed_problems: u32,
  #[serde(default)] pub target_score: Option<i32>,
  #[serde(default)] pub actual_score: Option<i32>,
  #[serde(default)] pub start_time: Option<NaiveDateTime>,
  #[serde(default)] pub end_time: Option<NaiveDateTime>,
  #[serde(default)] pub created_at: Option<NaiveDateTime>,
}

impl Mission {
  /// Clamp counts so `completed_problems <= total_problems` holds on the client copy.
  pub fn normalized(mut self) -> Self {
    self.completed_problems = self.completed_problems.min(self.total_problems);
    self
  }
}

/// Read-only copy of a problem from the backend's problem bank.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Problem {
  pub id: ProblemId,
  pub title: String,
  pub content: String,
  #[serde(default)] pub solution: Option<String>,
  pub difficulty_level: u8,
  pub topic: String,
  #[serde(default)] pub subtopic: Option<String>,
  /// Minutes.
  #[serde(default)] pub estimated_time: Option<u32>,
  #[serde(default)] pub keywords: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MissionProgress {
  pub mission_id: MissionId,
  pub total_problems: u32,
  pub completed_problems: u32,
  #[serde(default)] pub current_problem: Option<Problem>,
  pub progress_percentage: f64,
  #[serde(default)] pub estimated_remaining_time: Option<u32>,
}

impl MissionProgress {
  /// Snapshot for a freshly started mission, built without a refresh round-trip.
  pub fn initial(mission: &Mission, first_problem: Option<Problem>) -> Self {
    Self {
      mission_id: mission.id,
      total_problems: mission.total_problems,
      completed_problems: mission.completed_problems.min(mission.total_problems),
      current_problem: first_problem,
      progress_percentage: progress_percentage(mission.completed_problems, mission.total_problems),
      estimated_remaining_time: None,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.progress_percentage >= 100.0
  }
}

/// Completed share in percent, rounded to two decimals. Zero problems count as 0 %.
pub fn progress_percentage(completed: u32, total: u32) -> f64 {
  if total == 0 {
    return 0.0;
  }
  let pct = f64::from(completed.min(total)) / f64::from(total) * 100.0;
  (pct * 100.0).round() / 100.0
}

/// One submission attempt for a (mission, problem) pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Answer {
  pub id: AnswerId,
  pub user_id: UserId,
  pub mission_id: MissionId,
  pub problem_id: ProblemId,
  #[serde(default)] pub answer_images: Vec<String>,
  #[serde(default)] pub extracted_text: Option<String>,
  #[serde(default)] pub extracted_markdown: Option<String>,
  #[serde(default)] pub score: Option<u8>,
  #[serde(default)] pub ai_feedback: Option<String>,
  #[serde(default)] pub key_concepts_identified: Vec<String>,
  #[serde(default)] pub mistakes_detected: Vec<String>,
  /// Seconds.
  #[serde(default)] pub time_spent: Option<u64>,
  #[serde(default)] pub submitted_at: Option<NaiveDateTime>,
  #[serde(default)] pub scored_at: Option<NaiveDateTime>,
}

impl Answer {
  pub fn is_graded(&self) -> bool {
    self.score.is_some()
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnswerResult {
  pub answer_id: AnswerId,
  pub score: u8,
  #[serde(default)] pub feedback: String,
  #[serde(default)] pub concepts_learned: Vec<String>,
  #[serde(default)] pub areas_for_improvement: Vec<String>,
  #[serde(default)] pub next_recommendations: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProblemInfo {
  pub title: String,
  pub topic: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LearningInsights {
  pub user_id: UserId,
  pub period_days: u32,
  pub total_problems_solved: u32,
  pub average_score: f64,
  pub improvement_rate: f64,
  #[serde(default)] pub strong_topics: Vec<String>,
  #[serde(default)] pub weak_topics: Vec<String>,
  #[serde(default)] pub recommendations: Vec<String>,
  #[serde(default)] pub time_efficiency: HashMap<String, f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceTrend {
  #[serde(default)] pub dates: Vec<String>,
  #[serde(default)] pub scores: Vec<f64>,
  #[serde(default)] pub topics: Vec<String>,
  #[serde(default)] pub difficulty_levels: Vec<u8>,
}
