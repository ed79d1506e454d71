//! reqwest-backed `ApiGateway`.
//!
//! Every call attaches the stored bearer token (if any), unwraps the response
//! envelope and maps failures onto `ClientError`. Calls are instrumented and
//! log paths, statuses and latencies; never tokens or image bytes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{AnswerSubmission, ApiGateway};
use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::domain::{
  AnswerId, LearningInsights, Mission, MissionId, MissionProgress, MissionType, PerformanceTrend,
  Problem, ProblemId, User,
};
use crate::error::{ClientError, ClientResult};
use crate::images::ImageUpload;
use crate::protocol::{
  AddedImages, AnswerLookup, CompleteOut, Envelope, ErrorDetail, HealthStatus, LoginIn, LoginOut,
  MissionProblems, MissionSnapshot, ResultOut, StartedMission, SubmittedAnswer, TopicProblems,
  TopicQuery, VerifyOut,
};
use crate::util::trunc_for_log;

const LOG_BODY_MAX: usize = 300;

#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base_url: String,
  credentials: Arc<dyn CredentialStore>,
}

impl HttpGateway {
  pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> ClientResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()?;
    let base_url = config.base_url.trim_end_matches('/').to_string();
    info!(target: "api", %base_url, timeout_secs = config.request_timeout_secs, "HTTP gateway ready");
    Ok(Self { client, base_url, credentials })
  }

  fn api(&self, path: &str) -> String {
    format!("{}/api{}", self.base_url, path)
  }

  fn authorized(&self, rb: RequestBuilder) -> RequestBuilder {
    let rb = rb.header(ACCEPT, "application/json");
    match self.credentials.load() {
      Some(token) => rb.bearer_auth(token),
      None => rb,
    }
  }

  /// Send, check the status and decode the envelope with an untyped payload.
  async fn envelope(&self, rb: RequestBuilder, op: &'static str) -> ClientResult<Envelope<Value>> {
    let start = Instant::now();
    let res = self.authorized(rb).send().await?;
    let status = res.status();
    let body = res.text().await?;
    let elapsed = start.elapsed();

    if !status.is_success() {
      let message = serde_json::from_str::<ErrorDetail>(&body)
        .map(|d| d.message())
        .unwrap_or_else(|_| format!("HTTP {}", status));
      warn!(target: "api", op, status = status.as_u16(), ?elapsed, body = %trunc_for_log(&body, LOG_BODY_MAX), "API call failed");
      if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized(message));
      }
      return Err(ClientError::Api { status: Some(status.as_u16()), message, details: None });
    }

    let env: Envelope<Value> = serde_json::from_str(&body).map_err(|e| {
      warn!(target: "api", op, error = %e, body = %trunc_for_log(&body, LOG_BODY_MAX), "Undecodable envelope");
      ClientError::Decode(format!("{op}: {e}"))
    })?;
    debug!(target: "api", op, status = status.as_u16(), ?elapsed, success = env.success, bytes = body.len(), "API call finished");
    Ok(env)
  }

  /// Successful payload, `None` for `data: null`. `success: false` becomes `ClientError::Api`.
  async fn data<T: DeserializeOwned>(&self, rb: RequestBuilder, op: &'static str) -> ClientResult<Option<T>> {
    let env = self.envelope(rb, op).await?;
    if !env.success {
      return Err(ClientError::Api { status: None, message: env.message, details: env.data });
    }
    match env.data {
      None | Some(Value::Null) => Ok(None),
      Some(v) => serde_json::from_value(v).map(Some).map_err(|e| ClientError::Decode(format!("{op}: {e}"))),
    }
  }

  async fn required<T: DeserializeOwned>(&self, rb: RequestBuilder, op: &'static str) -> ClientResult<T> {
    self
      .data(rb, op)
      .await?
      .ok_or_else(|| ClientError::Decode(format!("{op}: response carries no data")))
  }
}

fn images_form(mut form: Form, images: Vec<ImageUpload>) -> ClientResult<Form> {
  for img in images {
    let part = Part::bytes(img.bytes)
      .file_name(img.file_name)
      .mime_str(&img.mime)
      .map_err(|e| ClientError::Validation(format!("Invalid image type '{}': {e}", img.mime)))?;
    form = form.part("images", part);
  }
  Ok(form)
}

fn validate_topic_query(q: &TopicQuery) -> ClientResult<()> {
  if q.topic.trim().is_empty() {
    return Err(ClientError::Validation("Topic must not be empty.".into()));
  }
  if !(1..=10).contains(&q.difficulty_min) || !(1..=10).contains(&q.difficulty_max) {
    return Err(ClientError::Validation("Difficulty must be between 1 and 10.".into()));
  }
  if q.difficulty_min > q.difficulty_max {
    return Err(ClientError::Validation("Minimum difficulty cannot exceed maximum difficulty.".into()));
  }
  if !(1..=50).contains(&q.limit) {
    return Err(ClientError::Validation("Limit must be between 1 and 50.".into()));
  }
  Ok(())
}

#[async_trait]
impl ApiGateway for HttpGateway {
  #[instrument(level = "info", skip(self, password), fields(%username))]
  async fn login(&self, username: &str, password: &str) -> ClientResult<LoginOut> {
    let rb = self.client.post(self.api("/auth/login")).json(&LoginIn { username, password });
    self.required(rb, "login").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn verify_token(&self) -> ClientResult<User> {
    let out: VerifyOut = self.required(self.client.get(self.api("/auth/verify")), "verify_token").await?;
    Ok(out.user)
  }

  #[instrument(level = "info", skip(self))]
  async fn logout(&self) -> ClientResult<()> {
    self.data::<Value>(self.client.post(self.api("/auth/logout")), "logout").await?;
    Ok(())
  }

  #[instrument(level = "info", skip(self))]
  async fn current_mission(&self) -> ClientResult<Option<MissionSnapshot>> {
    self.data(self.client.get(self.api("/missions/current")), "current_mission").await
  }

  #[instrument(level = "info", skip(self), fields(kind = kind.as_str()))]
  async fn start_mission(&self, kind: MissionType) -> ClientResult<StartedMission> {
    let rb = self.client.post(self.api("/missions/start")).query(&[("mission_type", kind.as_str())]);
    self.required(rb, "start_mission").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn mission(&self, id: MissionId) -> ClientResult<MissionSnapshot> {
    self.required(self.client.get(self.api(&format!("/missions/{id}"))), "mission").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn mission_progress(&self, id: MissionId) -> ClientResult<MissionProgress> {
    self.required(self.client.get(self.api(&format!("/missions/{id}/progress"))), "mission_progress").await
  }

  #[instrument(level = "info", skip(self))]
  async fn complete_mission(&self, id: MissionId) -> ClientResult<Mission> {
    let env = self.envelope(self.client.post(self.api(&format!("/missions/{id}/complete"))), "complete_mission").await?;
    let out: Option<CompleteOut> = match env.data {
      None | Some(Value::Null) => None,
      Some(v) => Some(serde_json::from_value(v).map_err(|e| ClientError::Decode(format!("complete_mission: {e}")))?),
    };
    match out {
      Some(CompleteOut { completed: true, mission: Some(mission) }) if env.success => Ok(mission),
      Some(CompleteOut { completed: false, .. }) => Err(ClientError::MissionNotFinished(env.message)),
      _ if !env.success => Err(ClientError::Api { status: None, message: env.message, details: None }),
      _ => Err(ClientError::Decode("complete_mission: missing mission in confirmation".into())),
    }
  }

  #[instrument(level = "debug", skip(self))]
  async fn next_problem(&self, id: MissionId) -> ClientResult<Option<Problem>> {
    self.data(self.client.get(self.api(&format!("/missions/{id}/next-problem"))), "next_problem").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn problem(&self, id: ProblemId) -> ClientResult<Problem> {
    self.required(self.client.get(self.api(&format!("/problems/{id}"))), "problem").await
  }

  #[instrument(level = "debug", skip(self, query), fields(topic = %query.topic))]
  async fn problems_by_topic(&self, query: &TopicQuery) -> ClientResult<TopicProblems> {
    validate_topic_query(query)?;
    let rb = self
      .client
      .get(self.api(&format!("/problems/by-topic/{}", urlencoding::encode(&query.topic))))
      .query(query);
    self.required(rb, "problems_by_topic").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn problems_by_mission(&self, id: MissionId) -> ClientResult<MissionProblems> {
    self.required(self.client.get(self.api(&format!("/problems/by-mission/{id}"))), "problems_by_mission").await
  }

  #[instrument(
    level = "info",
    skip(self, submission),
    fields(mission_id = submission.mission_id, problem_id = submission.problem_id, images = submission.images.len(), time_spent = ?submission.time_spent)
  )]
  async fn submit_answer(&self, submission: AnswerSubmission) -> ClientResult<SubmittedAnswer> {
    let mut form = Form::new()
      .text("mission_id", submission.mission_id.to_string())
      .text("problem_id", submission.problem_id.to_string());
    if let Some(secs) = submission.time_spent {
      form = form.text("time_spent", secs.to_string());
    }
    let form = images_form(form, submission.images)?;
    let rb = self.client.post(self.api("/answers/submit")).multipart(form);
    self.required(rb, "submit_answer").await
  }

  #[instrument(level = "info", skip(self))]
  async fn process_answer(&self, id: AnswerId) -> ClientResult<Value> {
    let out = self.data::<Value>(self.client.post(self.api(&format!("/answers/{id}/process"))), "process_answer").await?;
    Ok(out.unwrap_or(Value::Null))
  }

  #[instrument(level = "debug", skip(self))]
  async fn answer_result(&self, id: AnswerId) -> ClientResult<AnswerLookup> {
    let out: ResultOut = self.required(self.client.get(self.api(&format!("/answers/{id}/result"))), "answer_result").await?;
    Ok(out.into())
  }

  #[instrument(level = "info", skip(self, images), fields(images = images.len()))]
  async fn add_answer_images(&self, id: AnswerId, images: Vec<ImageUpload>) -> ClientResult<AddedImages> {
    let form = images_form(Form::new(), images)?;
    let rb = self.client.post(self.api(&format!("/answers/{id}/images"))).multipart(form);
    self.required(rb, "add_answer_images").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn learning_insights(&self, period_days: u32) -> ClientResult<LearningInsights> {
    let rb = self.client.get(self.api("/analytics/insights")).query(&[("period_days", period_days)]);
    self.required(rb, "learning_insights").await
  }

  #[instrument(level = "debug", skip(self))]
  async fn performance_trend(&self, period_days: u32) -> ClientResult<PerformanceTrend> {
    let rb = self.client.get(self.api("/analytics/trend")).query(&[("period_days", period_days)]);
    self.required(rb, "performance_trend").await
  }

  /// `/health` answers with a bare object instead of an envelope.
  #[instrument(level = "debug", skip(self))]
  async fn health_check(&self) -> ClientResult<HealthStatus> {
    let res = self.client.get(format!("{}/health", self.base_url)).send().await?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = serde_json::from_str::<ErrorDetail>(&body)
        .map(|d| d.message())
        .unwrap_or_else(|_| format!("HTTP {}", status));
      return Err(ClientError::Api { status: Some(status.as_u16()), message, details: None });
    }
    Ok(res.json::<HealthStatus>().await?)
  }
}
