//! Answer lifecycle: staged images, submission, AI processing and grading.
//!
//! The phase (Empty, Capturing, Submitting, AwaitingGrading, Graded, Failed) is
//! derived from `AnswerState` after every event and published on a watch
//! channel. While a result is pending, one background task re-fetches it every
//! `GRADING_POLL_INTERVAL` until it is graded, fails, or the store is reset.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{AnswerSubmission, ApiGateway};
use crate::config::UploadLimits;
use crate::domain::{Answer, AnswerId, AnswerResult, MissionId, ProblemId, ProblemInfo};
use crate::error::StoreError;
use crate::images::{validate_upload, CapturedImage, ImageUpload, PreviewRegistry};
use crate::protocol::{AddedImages, AnswerLookup, SubmittedAnswer};

pub const GRADING_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const NO_IMAGES: &str = "Add at least one answer image before submitting.";
pub const SUBMIT_IN_PROGRESS: &str = "An answer is already being submitted.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerPhase {
  Empty,
  Capturing,
  Submitting,
  AwaitingGrading,
  Graded,
  Failed,
}

#[derive(Debug)]
pub enum AnswerEvent {
  ImageAdded(CapturedImage),
  ImageRemoved(usize),
  ImagesCleared,
  /// Local validation failure; recorded without moving to `Failed`.
  Rejected(StoreError),
  SubmitStarted,
  SubmitSucceeded(SubmittedAnswer),
  SubmitFailed(StoreError),
  ProcessStarted(AnswerId),
  ProcessFinished,
  ImagesAppended(AddedImages),
  ResultPending(Answer),
  ResultGraded { answer: Answer, result: AnswerResult, problem_info: Option<ProblemInfo> },
  Failed(StoreError),
  ErrorCleared,
  Reset,
}

#[derive(Debug, Default)]
pub struct AnswerState {
  captured: Vec<CapturedImage>,
  submitting: bool,
  processing: bool,
  awaiting_grading: bool,
  failed: bool,
  answer_id: Option<AnswerId>,
  answer: Option<Answer>,
  result: Option<AnswerResult>,
  problem_info: Option<ProblemInfo>,
  error: Option<StoreError>,
  epoch: u64,
}

/// Cloneable read-out of `AnswerState` for views.
#[derive(Clone, Debug, PartialEq)]
pub struct AnswerView {
  pub phase: AnswerPhase,
  pub previews: Vec<String>,
  pub submitting: bool,
  pub processing: bool,
  pub answer_id: Option<AnswerId>,
  pub answer: Option<Answer>,
  pub result: Option<AnswerResult>,
  pub problem_info: Option<ProblemInfo>,
  pub error: Option<StoreError>,
}

impl AnswerState {
  pub fn phase(&self) -> AnswerPhase {
    if self.submitting {
      AnswerPhase::Submitting
    } else if self.processing || self.awaiting_grading {
      AnswerPhase::AwaitingGrading
    } else if self.failed {
      AnswerPhase::Failed
    } else if self.result.is_some() {
      AnswerPhase::Graded
    } else if self.captured.is_empty() {
      AnswerPhase::Empty
    } else {
      AnswerPhase::Capturing
    }
  }

  pub fn captured_count(&self) -> usize {
    self.captured.len()
  }

  pub fn view(&self) -> AnswerView {
    AnswerView {
      phase: self.phase(),
      previews: self.captured.iter().map(CapturedImage::preview_ref).collect(),
      submitting: self.submitting,
      processing: self.processing,
      answer_id: self.answer_id,
      answer: self.answer.clone(),
      result: self.result.clone(),
      problem_info: self.problem_info.clone(),
      error: self.error.clone(),
    }
  }

  pub fn apply(&mut self, event: AnswerEvent) {
    match event {
      AnswerEvent::ImageAdded(image) => {
        self.captured.push(image);
        self.error = None;
      }
      AnswerEvent::ImageRemoved(index) => {
        if index < self.captured.len() {
          self.captured.remove(index);
        }
      }
      AnswerEvent::ImagesCleared => self.captured.clear(),
      AnswerEvent::Rejected(err) => self.error = Some(err),
      AnswerEvent::SubmitStarted => {
        self.submitting = true;
        self.failed = false;
        self.error = None;
      }
      AnswerEvent::SubmitSucceeded(out) => {
        self.submitting = false;
        self.answer_id = Some(out.answer_id);
        self.answer = None;
        self.result = None;
        self.problem_info = None;
      }
      AnswerEvent::ProcessStarted(id) => {
        self.processing = true;
        self.failed = false;
        self.error = None;
        self.answer_id = Some(id);
      }
      AnswerEvent::ProcessFinished => self.processing = false,
      AnswerEvent::ImagesAppended(added) => {
        self.answer_id = Some(added.answer_id);
        self.error = None;
      }
      AnswerEvent::ResultPending(answer) => {
        self.answer_id = Some(answer.id);
        self.answer = Some(answer);
        self.result = None;
        self.problem_info = None;
        self.awaiting_grading = true;
        self.failed = false;
        self.error = None;
      }
      AnswerEvent::ResultGraded { answer, result, problem_info } => {
        self.answer_id = Some(answer.id);
        self.answer = Some(answer);
        self.result = Some(result);
        self.problem_info = problem_info;
        self.awaiting_grading = false;
        self.failed = false;
        self.error = None;
      }
      AnswerEvent::SubmitFailed(err) | AnswerEvent::Failed(err) => {
        self.submitting = false;
        self.processing = false;
        self.awaiting_grading = false;
        self.failed = true;
        self.error = Some(err);
      }
      AnswerEvent::ErrorCleared => {
        self.error = None;
        self.failed = false;
      }
      AnswerEvent::Reset => {
        // Dropping the staged images releases their previews.
        *self = AnswerState { epoch: self.epoch + 1, ..AnswerState::default() };
      }
    }
  }
}

struct PollTask {
  epoch: u64,
  answer_id: AnswerId,
  handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct AnswerStore {
  api: Arc<dyn ApiGateway>,
  limits: UploadLimits,
  previews: PreviewRegistry,
  state: Arc<RwLock<AnswerState>>,
  poller: Arc<Mutex<Option<PollTask>>>,
  phase_tx: Arc<watch::Sender<AnswerPhase>>,
}

impl AnswerStore {
  pub fn new(api: Arc<dyn ApiGateway>, limits: UploadLimits) -> Self {
    let (phase_tx, _) = watch::channel(AnswerPhase::Empty);
    Self {
      api,
      limits,
      previews: PreviewRegistry::new(),
      state: Arc::new(RwLock::new(AnswerState::default())),
      poller: Arc::new(Mutex::new(None)),
      phase_tx: Arc::new(phase_tx),
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<AnswerPhase> {
    self.phase_tx.subscribe()
  }

  pub fn previews(&self) -> &PreviewRegistry {
    &self.previews
  }

  pub async fn phase(&self) -> AnswerPhase {
    self.state.read().await.phase()
  }

  pub async fn view(&self) -> AnswerView {
    self.state.read().await.view()
  }

  pub async fn captured_count(&self) -> usize {
    self.state.read().await.captured_count()
  }

  pub async fn error(&self) -> Option<StoreError> {
    self.state.read().await.error.clone()
  }

  fn apply_locked(&self, st: &mut AnswerState, event: AnswerEvent) {
    st.apply(event);
    self.phase_tx.send_replace(st.phase());
  }

  async fn dispatch(&self, event: AnswerEvent) -> u64 {
    let mut st = self.state.write().await;
    self.apply_locked(&mut st, event);
    st.epoch
  }

  /// Apply a response event unless the store was reset after `epoch`.
  async fn commit(&self, epoch: u64, event: AnswerEvent) -> bool {
    let mut st = self.state.write().await;
    if st.epoch != epoch {
      debug!(target: "answer", epoch, current_epoch = st.epoch, "Stale response dropped");
      return false;
    }
    self.apply_locked(&mut st, event);
    true
  }

  async fn reject(&self, err: StoreError) -> StoreError {
    self.dispatch(AnswerEvent::Rejected(err.clone())).await;
    err
  }

  /// Stage one image for the next submission. Returns the new staged count.
  #[instrument(level = "debug", skip(self, upload), fields(file = %upload.file_name, bytes = upload.len()))]
  pub async fn add_captured_image(&self, upload: ImageUpload) -> Result<usize, StoreError> {
    let mut st = self.state.write().await;
    let check = if st.captured.len() >= self.limits.max_images {
      Err(StoreError::with_code(format!("At most {} images per answer.", self.limits.max_images), "validation"))
    } else {
      validate_upload(&upload, &self.limits).map_err(StoreError::from)
    };
    if let Err(err) = check {
      warn!(target: "answer", error = %err, "Image rejected");
      self.apply_locked(&mut st, AnswerEvent::Rejected(err.clone()));
      return Err(err);
    }
    let image = CapturedImage::new(upload, &self.previews);
    self.apply_locked(&mut st, AnswerEvent::ImageAdded(image));
    Ok(st.captured.len())
  }

  pub async fn remove_captured_image(&self, index: usize) -> Result<(), StoreError> {
    let mut st = self.state.write().await;
    if index >= st.captured.len() {
      let err = StoreError::with_code(format!("No staged image at position {index}."), "validation");
      self.apply_locked(&mut st, AnswerEvent::Rejected(err.clone()));
      return Err(err);
    }
    self.apply_locked(&mut st, AnswerEvent::ImageRemoved(index));
    Ok(())
  }

  pub async fn clear_captured_images(&self) {
    self.dispatch(AnswerEvent::ImagesCleared).await;
  }

  /// Upload the staged images as a new answer. Staged images are kept after
  /// success so the caller decides when to clear them.
  #[instrument(level = "info", skip(self))]
  pub async fn submit_answer(
    &self,
    mission_id: MissionId,
    problem_id: ProblemId,
    time_spent: Option<u64>,
  ) -> Result<AnswerId, StoreError> {
    let (epoch, images) = {
      let mut st = self.state.write().await;
      if st.captured.is_empty() {
        let err = StoreError::with_code(NO_IMAGES, "no_images");
        self.apply_locked(&mut st, AnswerEvent::Rejected(err.clone()));
        return Err(err);
      }
      if st.submitting {
        warn!(target: "answer", "Submit ignored, another submission is in flight");
        return Err(StoreError::with_code(SUBMIT_IN_PROGRESS, "submit_in_progress"));
      }
      self.apply_locked(&mut st, AnswerEvent::SubmitStarted);
      let images: Vec<ImageUpload> = st.captured.iter().map(|c| c.upload().clone()).collect();
      (st.epoch, images)
    };

    let count = images.len();
    let submission = AnswerSubmission { mission_id, problem_id, time_spent, images };
    match self.api.submit_answer(submission).await {
      Ok(out) => {
        let answer_id = out.answer_id;
        info!(target: "answer", answer_id, images = count, "Answer submitted");
        self.commit(epoch, AnswerEvent::SubmitSucceeded(out)).await;
        Ok(answer_id)
      }
      Err(e) => {
        let err = StoreError::from(&e);
        error!(target: "answer", error = %e, "Answer submission failed");
        self.commit(epoch, AnswerEvent::SubmitFailed(err.clone())).await;
        Err(err)
      }
    }
  }

  /// Fetch the grading result. A pending result keeps a poller running until it is graded.
  #[instrument(level = "info", skip(self))]
  pub async fn get_answer_result(&self, answer_id: AnswerId) -> Result<AnswerLookup, StoreError> {
    let epoch = self.state.read().await.epoch;
    let (lookup, applied) = self.fetch_result(epoch, answer_id).await?;
    if applied && matches!(lookup, AnswerLookup::Pending { .. }) {
      self.ensure_poller(epoch, answer_id);
    }
    Ok(lookup)
  }

  /// Ask the backend to run AI grading now, then load the result.
  #[instrument(level = "info", skip(self))]
  pub async fn process_answer(&self, answer_id: AnswerId) -> Result<AnswerLookup, StoreError> {
    let epoch = self.dispatch(AnswerEvent::ProcessStarted(answer_id)).await;
    match self.api.process_answer(answer_id).await {
      Ok(summary) => {
        debug!(target: "answer", answer_id, score = ?summary.get("score"), "Processing finished");
        if !self.commit(epoch, AnswerEvent::ProcessFinished).await {
          return Err(StoreError::new("Answer state was reset."));
        }
        self.get_answer_result(answer_id).await
      }
      Err(e) => {
        let err = StoreError::from(&e);
        error!(target: "answer", answer_id, error = %e, "Processing failed");
        self.commit(epoch, AnswerEvent::Failed(err.clone())).await;
        Err(err)
      }
    }
  }

  /// Attach more images to an existing answer, then reload its result.
  #[instrument(level = "info", skip(self, uploads), fields(count = uploads.len()))]
  pub async fn add_answer_images(
    &self,
    answer_id: AnswerId,
    uploads: Vec<ImageUpload>,
  ) -> Result<AddedImages, StoreError> {
    if uploads.is_empty() {
      return Err(self.reject(StoreError::with_code(NO_IMAGES, "no_images")).await);
    }
    for upload in &uploads {
      if let Err(e) = validate_upload(upload, &self.limits) {
        return Err(self.reject(StoreError::from(e)).await);
      }
    }

    let epoch = self.state.read().await.epoch;
    match self.api.add_answer_images(answer_id, uploads).await {
      Ok(added) => {
        info!(target: "answer", answer_id, added = added.added_images, total = added.total_images, "Images appended");
        if self.commit(epoch, AnswerEvent::ImagesAppended(added.clone())).await {
          if let Err(err) = self.get_answer_result(answer_id).await {
            warn!(target: "answer", answer_id, error = %err, "Result refresh after appending images failed");
          }
        }
        Ok(added)
      }
      Err(e) => {
        let err = StoreError::from(&e);
        error!(target: "answer", answer_id, error = %e, "Appending images failed");
        self.commit(epoch, AnswerEvent::Failed(err.clone())).await;
        Err(err)
      }
    }
  }

  pub async fn clear_error(&self) {
    self.dispatch(AnswerEvent::ErrorCleared).await;
  }

  /// Stop polling and return to the initial state. Responses still in flight are dropped.
  #[instrument(level = "info", skip(self))]
  pub async fn reset(&self) {
    self.stop_poller();
    self.dispatch(AnswerEvent::Reset).await;
    debug!(target: "answer", live_previews = self.previews.live_count(), "Answer state reset");
  }

  /// Fetch and commit one result. The flag is false when the store moved on meanwhile.
  async fn fetch_result(&self, epoch: u64, answer_id: AnswerId) -> Result<(AnswerLookup, bool), StoreError> {
    match self.api.answer_result(answer_id).await {
      Ok(lookup) => {
        debug!(target: "answer", answer_id, images = lookup.answer().answer_images.len(), "Result fetched");
        let event = match lookup.clone() {
          AnswerLookup::Pending { answer } => {
            debug!(target: "answer", answer_id, "Grading still running");
            AnswerEvent::ResultPending(answer)
          }
          AnswerLookup::Graded { answer, result, problem_info } => {
            info!(target: "answer", answer_id, score = result.score, "Answer graded");
            AnswerEvent::ResultGraded { answer, result, problem_info }
          }
        };
        let applied = self.commit(epoch, event).await;
        Ok((lookup, applied))
      }
      Err(e) => {
        let err = StoreError::from(&e);
        error!(target: "answer", answer_id, error = %e, "Fetching answer result failed");
        self.commit(epoch, AnswerEvent::Failed(err.clone())).await;
        Err(err)
      }
    }
  }

  fn lock_poller(&self) -> std::sync::MutexGuard<'_, Option<PollTask>> {
    self.poller.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn ensure_poller(&self, epoch: u64, answer_id: AnswerId) {
    let mut slot = self.lock_poller();
    if let Some(task) = slot.as_ref() {
      if task.epoch == epoch && task.answer_id == answer_id && !task.handle.is_finished() {
        return;
      }
    }
    if let Some(old) = slot.take() {
      old.handle.abort();
    }
    debug!(target: "answer", answer_id, interval_secs = GRADING_POLL_INTERVAL.as_secs(), "Grading poller started");
    let this = self.clone();
    let handle = tokio::spawn(async move { this.poll_until_graded(epoch, answer_id).await });
    *slot = Some(PollTask { epoch, answer_id, handle });
  }

  fn stop_poller(&self) {
    if let Some(task) = self.lock_poller().take() {
      task.handle.abort();
      debug!(target: "answer", answer_id = task.answer_id, "Grading poller stopped");
    }
  }

  async fn poll_until_graded(self, epoch: u64, answer_id: AnswerId) {
    loop {
      tokio::time::sleep(GRADING_POLL_INTERVAL).await;
      {
        let st = self.state.read().await;
        if st.epoch != epoch || !st.awaiting_grading || st.answer_id != Some(answer_id) {
          debug!(target: "answer", answer_id, "Poller no longer current");
          return;
        }
      }
      match self.fetch_result(epoch, answer_id).await {
        Ok((AnswerLookup::Pending { .. }, true)) => continue,
        Ok(_) => return,
        Err(err) => {
          warn!(target: "answer", answer_id, error = %err, "Grading poller stopped after error");
          return;
        }
      }
    }
  }
}
