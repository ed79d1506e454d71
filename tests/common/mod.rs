//! In-process fake of the tutoring backend: same paths, envelopes and error
//! bodies as the real service, backed by a single mutex-guarded state.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
  extract::{Multipart, Path, Query, State},
  http::{header::AUTHORIZATION, HeaderMap, StatusCode},
  routing::{get, post},
  Json, Router,
};
use serde_json::{json, Value};

use mathmission::clock::SystemClock;
use mathmission::config::ClientConfig;
use mathmission::credentials::MemoryCredentialStore;
use mathmission::{HttpGateway, Session};

pub const TOKEN: &str = "tok-student-1";
pub const PASSWORD: &str = "secret";
const STAMP: &str = "2024-03-01T10:00:00";

#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedImage {
  pub file_name: String,
  pub content_type: String,
  pub len: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ReceivedSubmission {
  pub fields: HashMap<String, String>,
  pub images: Vec<ReceivedImage>,
}

struct FakeAnswer {
  mission_id: i64,
  problem_id: i64,
  images: usize,
  time_spent: Option<u64>,
  pending_fetches_left: u32,
  score: Option<u8>,
}

#[derive(Default)]
pub struct Backend {
  pub total_problems: i64,
  pub mission_started: bool,
  pub mission_completed: bool,
  pub completed: Vec<i64>,
  /// Result fetches reporting "processing" before an answer is graded.
  pub grade_after: u32,
  pub submissions: Vec<ReceivedSubmission>,
  pub calls: HashMap<String, usize>,
  answers: HashMap<i64, FakeAnswer>,
  next_answer_id: i64,
}

pub type Shared = Arc<Mutex<Backend>>;

impl Backend {
  pub fn daily(total_problems: i64) -> Self {
    Self { total_problems, next_answer_id: 500, ..Self::default() }
  }

  pub fn calls(&self, op: &str) -> usize {
    self.calls.get(op).copied().unwrap_or(0)
  }

  fn hit(&mut self, op: &str) {
    *self.calls.entry(op.to_string()).or_default() += 1;
  }

  fn next_problem(&self) -> Option<i64> {
    (1..=self.total_problems).find(|id| !self.completed.contains(id))
  }

  fn mission_json(&self) -> Value {
    json!({
      "id": 1, "user_id": 1, "name": "일일 미션", "description": "오늘의 수학 문제",
      "status": if self.mission_completed { "completed" } else { "in_progress" },
      "total_problems": self.total_problems,
      "completed_problems": self.completed.len(),
      "target_score": 80,
      "actual_score": if self.mission_completed { json!(90) } else { Value::Null },
      "start_time": STAMP, "end_time": Value::Null, "created_at": STAMP
    })
  }

  fn progress_json(&self) -> Value {
    let done = self.completed.len() as f64;
    let pct = ((done / self.total_problems as f64 * 100.0) * 100.0).round() / 100.0;
    json!({
      "mission_id": 1,
      "total_problems": self.total_problems,
      "completed_problems": self.completed.len(),
      "current_problem": self.next_problem().map(problem_json),
      "progress_percentage": pct,
      "estimated_remaining_time": Value::Null
    })
  }

  fn answer_json(&self, id: i64) -> Value {
    let a = &self.answers[&id];
    json!({
      "id": id, "user_id": 1, "mission_id": a.mission_id, "problem_id": a.problem_id,
      "answer_images": (0..a.images).map(|i| format!("uploads/{id}_{i}.png")).collect::<Vec<_>>(),
      "extracted_text": Value::Null,
      "score": a.score,
      "ai_feedback": a.score.map(|_| "풀이가 정확합니다."),
      "key_concepts_identified": ["등차수열"],
      "mistakes_detected": [],
      "time_spent": a.time_spent,
      "submitted_at": STAMP,
      "scored_at": a.score.map(|_| STAMP)
    })
  }

  fn grade(&mut self, id: i64) {
    if let Some(a) = self.answers.get_mut(&id) {
      if a.score.is_none() {
        a.score = Some(90);
        if !self.completed.contains(&a.problem_id) {
          self.completed.push(a.problem_id);
        }
      }
    }
  }
}

pub fn problem_json(id: i64) -> Value {
  json!({
    "id": id,
    "title": format!("등차수열 {id}"),
    "content": "첫째항이 2이고 공차가 3인 등차수열의 제10항을 구하시오.",
    "solution": Value::Null,
    "difficulty_level": 3,
    "topic": "수열",
    "subtopic": "등차수열",
    "estimated_time": 5,
    "keywords": ["등차수열", "일반항"]
  })
}

type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn ok(message: &str, data: Value) -> Reply {
  Ok(Json(json!({ "success": true, "message": message, "data": data, "timestamp": STAMP })))
}

fn detail(status: StatusCode, msg: &str) -> (StatusCode, Json<Value>) {
  (status, Json(json!({ "detail": msg })))
}

fn require_token(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
  let expected = format!("Bearer {TOKEN}");
  match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
    Some(v) if v == expected => Ok(()),
    _ => Err(detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")),
  }
}

async fn login(State(s): State<Shared>, Json(body): Json<Value>) -> Reply {
  s.lock().unwrap().hit("login");
  if body["password"] != PASSWORD {
    return Err(detail(StatusCode::UNAUTHORIZED, "Incorrect username or password"));
  }
  ok(
    "로그인 성공",
    json!({
      "access_token": TOKEN,
      "token_type": "bearer",
      "user": { "id": 1, "name": body["username"], "grade": "고1" }
    }),
  )
}

async fn verify(State(s): State<Shared>, headers: HeaderMap) -> Reply {
  s.lock().unwrap().hit("verify");
  require_token(&headers)?;
  ok("토큰 유효", json!({ "user": { "id": 1, "name": "student", "grade": "고1" } }))
}

async fn logout(State(s): State<Shared>, headers: HeaderMap) -> Reply {
  s.lock().unwrap().hit("logout");
  require_token(&headers)?;
  ok("로그아웃 되었습니다.", Value::Null)
}

async fn current(State(s): State<Shared>, headers: HeaderMap) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("current");
  if !b.mission_started || b.mission_completed {
    return ok("진행 중인 미션이 없습니다.", Value::Null);
  }
  ok(
    "현재 미션 조회 성공",
    json!({
      "mission": b.mission_json(),
      "current_problem": b.next_problem().map(problem_json),
      "progress": b.progress_json()
    }),
  )
}

async fn start(State(s): State<Shared>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("start");
  if b.mission_started && !b.mission_completed {
    return Err(detail(StatusCode::BAD_REQUEST, "이미 진행 중인 미션이 있습니다."));
  }
  if q.get("mission_type").map(String::as_str) != Some("daily") {
    return Err(detail(StatusCode::BAD_REQUEST, "지원하지 않는 미션 유형입니다."));
  }
  b.mission_started = true;
  b.mission_completed = false;
  b.completed.clear();
  ok("새 미션이 시작되었습니다.", json!({ "mission": b.mission_json(), "first_problem": problem_json(1) }))
}

async fn mission_by_id(State(s): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("mission");
  if id != 1 || !b.mission_started {
    return Err(detail(StatusCode::NOT_FOUND, "미션을 찾을 수 없습니다."));
  }
  ok(
    "미션 조회 성공",
    json!({
      "mission": b.mission_json(),
      "current_problem": b.next_problem().map(problem_json),
      "progress": b.progress_json()
    }),
  )
}

async fn progress(State(s): State<Shared>, headers: HeaderMap, Path(_id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("progress");
  ok("진행률 조회 성공", b.progress_json())
}

async fn next_problem(State(s): State<Shared>, headers: HeaderMap, Path(_id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("next_problem");
  match b.next_problem() {
    Some(id) => ok("다음 문제 조회 성공", problem_json(id)),
    None => ok("모든 문제를 완료했습니다.", Value::Null),
  }
}

async fn complete(State(s): State<Shared>, headers: HeaderMap, Path(_id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("complete");
  if (b.completed.len() as i64) < b.total_problems {
    return Ok(Json(json!({
      "success": false,
      "message": "아직 완료되지 않은 문제가 있습니다.",
      "data": { "completed": false },
      "timestamp": STAMP
    })));
  }
  b.mission_completed = true;
  ok("미션이 완료되었습니다!", json!({ "mission": b.mission_json(), "completed": true }))
}

async fn submit(State(s): State<Shared>, headers: HeaderMap, mut mp: Multipart) -> Reply {
  require_token(&headers)?;
  let mut received = ReceivedSubmission::default();
  while let Some(field) = mp
    .next_field()
    .await
    .map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?
  {
    let name = field.name().unwrap_or_default().to_string();
    if name == "images" {
      let file_name = field.file_name().unwrap_or_default().to_string();
      let content_type = field.content_type().unwrap_or_default().to_string();
      let bytes = field.bytes().await.map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?;
      received.images.push(ReceivedImage { file_name, content_type, len: bytes.len() });
    } else {
      let text = field.text().await.map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?;
      received.fields.insert(name, text);
    }
  }
  if received.images.is_empty() {
    return Err(detail(StatusCode::BAD_REQUEST, "최소 1개의 이미지를 업로드해야 합니다."));
  }
  let parse = |k: &str| received.fields.get(k).and_then(|v| v.parse::<i64>().ok());
  let (Some(mission_id), Some(problem_id)) = (parse("mission_id"), parse("problem_id")) else {
    return Err(detail(StatusCode::UNPROCESSABLE_ENTITY, "field required"));
  };
  let time_spent = received.fields.get("time_spent").and_then(|v| v.parse::<u64>().ok());

  let mut b = s.lock().unwrap();
  b.hit("submit");
  b.next_answer_id += 1;
  let id = b.next_answer_id;
  let pending = b.grade_after;
  let count = received.images.len();
  b.answers.insert(
    id,
    FakeAnswer { mission_id, problem_id, images: count, time_spent, pending_fetches_left: pending, score: None },
  );
  b.submissions.push(received);
  ok("답안이 성공적으로 제출되었습니다.", json!({ "answer_id": id, "status": "submitted", "image_count": count }))
}

async fn process(State(s): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("process");
  if !b.answers.contains_key(&id) {
    return Err(detail(StatusCode::NOT_FOUND, "답안을 찾을 수 없습니다."));
  }
  b.grade(id);
  ok("AI 채점이 완료되었습니다.", json!({ "answer_id": id, "score": 90 }))
}

async fn result(State(s): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("result");
  let Some(a) = b.answers.get_mut(&id) else {
    return Err(detail(StatusCode::NOT_FOUND, "답안을 찾을 수 없습니다."));
  };
  if a.score.is_none() {
    if a.pending_fetches_left > 0 {
      a.pending_fetches_left -= 1;
      return ok("답안 처리 중입니다.", json!({ "answer_id": id, "status": "processing", "answer": b.answer_json(id) }));
    }
    b.grade(id);
  }
  ok(
    "결과 조회 성공",
    json!({
      "result": {
        "answer_id": id, "score": 90, "feedback": "풀이가 정확합니다.",
        "concepts_learned": ["등차수열"], "areas_for_improvement": [], "next_recommendations": ["등비수열"]
      },
      "answer": b.answer_json(id),
      "problem_info": { "title": "등차수열", "topic": "수열" }
    }),
  )
}

async fn add_images(State(s): State<Shared>, headers: HeaderMap, Path(id): Path<i64>, mut mp: Multipart) -> Reply {
  require_token(&headers)?;
  let mut added = 0;
  while let Some(field) = mp
    .next_field()
    .await
    .map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?
  {
    if field.name() == Some("images") {
      field.bytes().await.map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?;
      added += 1;
    }
  }
  let mut b = s.lock().unwrap();
  b.hit("add_images");
  let Some(a) = b.answers.get_mut(&id) else {
    return Err(detail(StatusCode::NOT_FOUND, "답안을 찾을 수 없습니다."));
  };
  a.images += added;
  let total = a.images;
  ok("이미지가 추가되었습니다.", json!({ "answer_id": id, "total_images": total, "added_images": added }))
}

async fn problem_by_id(State(s): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("problem");
  if !(1..=b.total_problems).contains(&id) {
    return Err(detail(StatusCode::NOT_FOUND, "문제를 찾을 수 없습니다."));
  }
  ok("문제 조회 성공", problem_json(id))
}

async fn by_mission(State(s): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("by_mission");
  let problems: Vec<Value> = (1..=b.total_problems)
    .map(|pid| json!({ "problem": problem_json(pid), "sequence_order": pid, "is_completed": b.completed.contains(&pid) }))
    .collect();
  ok("미션 문제 조회 성공", json!({ "mission_id": id, "problems": problems, "total_count": problems.len() }))
}

fn period_days(q: &HashMap<String, String>) -> i64 {
  q.get("period_days").and_then(|v| v.parse().ok()).unwrap_or(30)
}

async fn insights(State(s): State<Shared>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("insights");
  ok(
    "학습 분석 조회 성공",
    json!({
      "user_id": 1,
      "period_days": period_days(&q),
      "total_problems_solved": b.completed.len(),
      "average_score": 90.0,
      "improvement_rate": 12.5,
      "strong_topics": ["수열"],
      "weak_topics": ["미분"],
      "recommendations": ["미분 기초 복습"],
      "time_efficiency": { "수열": 0.8 }
    }),
  )
}

async fn trend(State(s): State<Shared>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Reply {
  require_token(&headers)?;
  let mut b = s.lock().unwrap();
  b.hit("trend");
  let days = period_days(&q).clamp(0, 2) as usize;
  let dates: Vec<&str> = ["2024-03-01", "2024-03-02"].into_iter().take(days).collect();
  let scores: Vec<f64> = [80.0, 90.0].into_iter().take(days).collect();
  ok(
    "성과 추이 조회 성공",
    json!({ "dates": dates, "scores": scores, "topics": vec!["수열"; days], "difficulty_levels": vec![3; days] }),
  )
}

async fn by_topic(
  State(s): State<Shared>,
  headers: HeaderMap,
  Path(topic): Path<String>,
  Query(q): Query<HashMap<String, String>>,
) -> Reply {
  require_token(&headers)?;
  s.lock().unwrap().hit("by_topic");
  let limit: usize = q.get("limit").and_then(|v| v.parse().ok()).unwrap_or(10);
  let problems: Vec<Value> = (1..=3).map(problem_json).take(limit).collect();
  ok("주제별 문제 조회 성공", json!({ "problems": problems, "count": problems.len(), "topic": topic }))
}

async fn health() -> Json<Value> {
  Json(json!({ "status": "healthy", "database": "connected", "uploads_dir": true }))
}

pub fn router(shared: Shared) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/api/auth/login", post(login))
    .route("/api/auth/verify", get(verify))
    .route("/api/auth/logout", post(logout))
    .route("/api/missions/current", get(current))
    .route("/api/missions/start", post(start))
    .route("/api/missions/:id", get(mission_by_id))
    .route("/api/missions/:id/progress", get(progress))
    .route("/api/missions/:id/next-problem", get(next_problem))
    .route("/api/missions/:id/complete", post(complete))
    .route("/api/problems/by-topic/:topic", get(by_topic))
    .route("/api/problems/by-mission/:id", get(by_mission))
    .route("/api/problems/:id", get(problem_by_id))
    .route("/api/analytics/insights", get(insights))
    .route("/api/analytics/trend", get(trend))
    .route("/api/answers/submit", post(submit))
    .route("/api/answers/:id/process", post(process))
    .route("/api/answers/:id/result", get(result))
    .route("/api/answers/:id/images", post(add_images))
    .with_state(shared)
}

/// Serve `backend` on an ephemeral port. Returns the base URL and the shared state.
pub async fn spawn(backend: Backend) -> (String, Shared) {
  let shared: Shared = Arc::new(Mutex::new(backend));
  let app = router(shared.clone());
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  (format!("http://{addr}"), shared)
}

pub fn session(base_url: &str, creds: Arc<MemoryCredentialStore>) -> Session {
  let cfg = ClientConfig { base_url: base_url.to_string(), request_timeout_secs: 5, ..ClientConfig::default() };
  let api = Arc::new(HttpGateway::new(&cfg, creds.clone()).unwrap());
  Session::new(api, creds, Arc::new(SystemClock), cfg.uploads.clone())
}

pub fn png(name: &str) -> mathmission::images::ImageUpload {
  let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
  bytes.extend_from_slice(&[7u8; 64]);
  mathmission::images::ImageUpload::new(name, "image/png", bytes)
}
