//! Gateway to the tutoring backend.
//!
//! The stores only see `ApiGateway`; `HttpGateway` is the production
//! implementation. Tests plug in scripted gateways.

use async_trait::async_trait;

use crate::domain::{
  AnswerId, LearningInsights, Mission, MissionId, MissionProgress, MissionType, PerformanceTrend,
  Problem, ProblemId,
};
use crate::error::ClientResult;
use crate::images::ImageUpload;
use crate::protocol::{
  AddedImages, AnswerLookup, HealthStatus, LoginOut, MissionProblems, MissionSnapshot,
  StartedMission, SubmittedAnswer, TopicProblems, TopicQuery,
};

pub mod http;

pub use http::HttpGateway;

/// Everything `submit` needs besides the bearer credential.
#[derive(Clone, Debug)]
pub struct AnswerSubmission {
  pub mission_id: MissionId,
  pub problem_id: ProblemId,
  /// Seconds spent on the problem, if tracked.
  pub time_spent: Option<u64>,
  pub images: Vec<ImageUpload>,
}

#[async_trait]
pub trait ApiGateway: Send + Sync {
  // --- auth ---
  async fn login(&self, username: &str, password: &str) -> ClientResult<LoginOut>;
  async fn verify_token(&self) -> ClientResult<crate::domain::User>;
  async fn logout(&self) -> ClientResult<()>;

  // --- missions ---
  /// `Ok(None)` when the user has no active mission.
  async fn current_mission(&self) -> ClientResult<Option<MissionSnapshot>>;
  async fn start_mission(&self, kind: MissionType) -> ClientResult<StartedMission>;
  async fn mission(&self, id: MissionId) -> ClientResult<MissionSnapshot>;
  async fn mission_progress(&self, id: MissionId) -> ClientResult<MissionProgress>;
  /// Fails with `ClientError::MissionNotFinished` while problems remain.
  async fn complete_mission(&self, id: MissionId) -> ClientResult<Mission>;
  /// `Ok(None)` when every problem of the mission is done.
  async fn next_problem(&self, id: MissionId) -> ClientResult<Option<Problem>>;

  // --- problems ---
  async fn problem(&self, id: ProblemId) -> ClientResult<Problem>;
  async fn problems_by_topic(&self, query: &TopicQuery) -> ClientResult<TopicProblems>;
  async fn problems_by_mission(&self, id: MissionId) -> ClientResult<MissionProblems>;

  // --- answers ---
  async fn submit_answer(&self, submission: AnswerSubmission) -> ClientResult<SubmittedAnswer>;
  async fn process_answer(&self, id: AnswerId) -> ClientResult<serde_json::Value>;
  async fn answer_result(&self, id: AnswerId) -> ClientResult<AnswerLookup>;
  async fn add_answer_images(&self, id: AnswerId, images: Vec<ImageUpload>) -> ClientResult<AddedImages>;

  // --- analytics / ops ---
  async fn learning_insights(&self, period_days: u32) -> ClientResult<LearningInsights>;
  async fn performance_trend(&self, period_days: u32) -> ClientResult<PerformanceTrend>;
  async fn health_check(&self) -> ClientResult<HealthStatus>;
}
