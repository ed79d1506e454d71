//! MathMission · study-step driver
//!
//! Signs in, loads (or starts) today's mission, submits the answer images given
//! on the command line for the current problem, waits for grading and completes
//! the mission once every problem is done.
//!
//! Important env variables:
//!   MATHMISSION_CONFIG       : path to TOML config (base URL, timeouts, upload limits)
//!   MATHMISSION_BASE_URL     : backend base URL (default "http://localhost:5000")
//!   MATHMISSION_TOKEN_PATH   : file that keeps the bearer token between runs
//!   MATHMISSION_USERNAME     : used when no stored token verifies
//!   MATHMISSION_PASSWORD     : idem
//!   MATHMISSION_MISSION_TYPE : daily (default) | review | challenge | assessment
//!   LOG_LEVEL                : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT               : "pretty" (default) or "json"
//!
//! Usage: mathmission [IMAGE ...]

use std::path::PathBuf;

use tracing::{error, info, instrument, warn};

use mathmission::answer::AnswerPhase;
use mathmission::domain::{MissionId, MissionType, ProblemId, User};
use mathmission::images::ImageUpload;
use mathmission::{telemetry, ApiGateway, ClientConfig, Session};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const INSIGHT_DAYS: u32 = 7;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), BoxError> {
  telemetry::init_tracing();

  let cfg = ClientConfig::from_env();
  info!(target: "mathmission", base_url = %cfg.base_url, "Starting");
  let session = Session::from_config(&cfg)?;

  match session.api().health_check().await {
    Ok(h) => info!(target: "mathmission", status = %h.status, database = ?h.database, "Backend reachable"),
    Err(e) => warn!(target: "mathmission", error = %e, "Health check failed"),
  }

  let user = sign_in(&session).await?;
  info!(target: "mathmission", user_id = user.id, name = %user.name, "Signed in");

  let images: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
  tokio::select! {
    res = study_step(&session, images) => res?,
    _ = tokio::signal::ctrl_c() => {
      warn!(target: "mathmission", "Interrupted; discarding staged answer");
      session.answers().reset().await;
    }
  }
  Ok(())
}

async fn sign_in(session: &Session) -> Result<User, BoxError> {
  if let Some(user) = session.verify_token().await {
    return Ok(user);
  }
  let username = std::env::var("MATHMISSION_USERNAME").map_err(|_| "MATHMISSION_USERNAME is not set")?;
  let password = std::env::var("MATHMISSION_PASSWORD").map_err(|_| "MATHMISSION_PASSWORD is not set")?;
  Ok(session.login(&username, &password).await?)
}

#[instrument(level = "info", skip_all, fields(images = images.len()))]
async fn study_step(session: &Session, images: Vec<PathBuf>) -> Result<(), BoxError> {
  let missions = session.missions();
  let mission = match missions.fetch_current_mission().await? {
    Some(m) => m,
    None => {
      let kind = std::env::var("MATHMISSION_MISSION_TYPE")
        .ok()
        .map(|s| s.trim().parse::<MissionType>())
        .transpose()?
        .unwrap_or_default();
      missions.start_new_mission(kind).await?
    }
  };
  info!(target: "mathmission", mission_id = mission.id, name = %mission.name, completed = mission.completed_problems, total = mission.total_problems, "Mission ready");
  match session.api().problems_by_mission(mission.id).await {
    Ok(list) => {
      for p in &list.problems {
        info!(target: "mathmission", order = p.sequence_order, problem_id = p.problem.id, title = %p.problem.title, done = p.is_completed, "Mission problem");
      }
    }
    Err(e) => warn!(target: "mathmission", mission_id = mission.id, error = %e, "Could not list mission problems"),
  }

  if let Some(problem) = missions.current_problem().await {
    info!(target: "mathmission", problem_id = problem.id, title = %problem.title, topic = %problem.topic, "Current problem");
    if !images.is_empty() {
      answer_problem(session, mission.id, problem.id, images).await?;
    }
  }

  if let Some(p) = missions.update_progress().await {
    info!(target: "mathmission", completed = p.completed_problems, total = p.total_problems, pct = p.progress_percentage, "Progress");
  }
  if missions.all_problems_done().await {
    let done = missions.complete_mission().await?;
    info!(target: "mathmission", mission_id = done.id, score = ?done.actual_score, "Mission completed");
    report_progress(session).await;
  }
  Ok(())
}

/// Weekly learning summary shown after a finished mission.
async fn report_progress(session: &Session) {
  let api = session.api();
  match api.learning_insights(INSIGHT_DAYS).await {
    Ok(i) => info!(
      target: "mathmission",
      solved = i.total_problems_solved,
      average = i.average_score,
      strong = ?i.strong_topics,
      weak = ?i.weak_topics,
      "Learning insights"
    ),
    Err(e) => warn!(target: "mathmission", error = %e, "Learning insights unavailable"),
  }
  match api.performance_trend(INSIGHT_DAYS).await {
    Ok(t) => info!(target: "mathmission", days = t.dates.len(), scores = ?t.scores, "Performance trend"),
    Err(e) => warn!(target: "mathmission", error = %e, "Performance trend unavailable"),
  }
}

async fn answer_problem(
  session: &Session,
  mission_id: MissionId,
  problem_id: ProblemId,
  paths: Vec<PathBuf>,
) -> Result<(), BoxError> {
  let answers = session.answers();
  let missions = session.missions();
  for path in &paths {
    let upload = ImageUpload::from_path(path).await?;
    answers.add_captured_image(upload).await?;
  }

  missions.stop_timer().await;
  let spent = missions.time_spent().await;
  let answer_id = match answers.submit_answer(mission_id, problem_id, Some(spent)).await {
    Ok(id) => id,
    Err(e) => {
      missions.start_timer().await;
      return Err(e.into());
    }
  };
  answers.clear_captured_images().await;
  info!(target: "mathmission", answer_id, time_spent = spent, "Answer submitted");

  let mut phases = answers.subscribe();
  answers.process_answer(answer_id).await?;
  let phase = *phases
    .wait_for(|p| matches!(p, AnswerPhase::Graded | AnswerPhase::Failed))
    .await?;

  let view = answers.view().await;
  match (phase, view.result) {
    (AnswerPhase::Graded, Some(result)) => {
      info!(target: "mathmission", answer_id, score = result.score, feedback = %result.feedback, "Graded");
    }
    _ => {
      let msg = view.error.map(|e| e.to_string()).unwrap_or_else(|| "grading failed".into());
      error!(target: "mathmission", answer_id, error = %msg, "Grading did not finish");
    }
  }
  Ok(())
}
