//! Mission lifecycle: the active mission, its current problem, the progress
//! snapshot and the elapsed-time timer for the problem being worked on.
//!
//! Every mutation goes through `MissionState::apply`. `MissionStore` wraps the
//! state with the injected gateway and clock; async operations capture the
//! store epoch when they start and drop their response if a `reset` happened
//! in between (or the active mission changed under them).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::api::ApiGateway;
use crate::clock::Clock;
use crate::domain::{Mission, MissionId, MissionProgress, MissionStatus, MissionType, Problem};
use crate::error::StoreError;
use crate::protocol::{MissionSnapshot, StartedMission};
use crate::timer::ElapsedTimer;

pub const NO_ACTIVE_MISSION: &str = "There is no active mission.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissionPhase {
    NoMission,
    Loading,
    Active,
    AllProblemsDone,
    Completed,
}

#[derive(Debug)]
pub enum MissionEvent {
    FetchStarted,
    MissionFetched(MissionSnapshot),
    NoActiveMission,
    MissionStarted(StartedMission),
    ProblemFetched(Option<Problem>),
    ProgressRefreshed(MissionProgress),
    MissionCompleted(Mission),
    Failed(StoreError),
    ErrorCleared,
    TimerStarted,
    TimerStopped,
    TimerReset,
    Reset,
}

#[derive(Clone, Debug, Default)]
pub struct MissionState {
    pub mission: Option<Mission>,
    pub current_problem: Option<Problem>,
    pub progress: Option<MissionProgress>,
    pub loading: bool,
    pub error: Option<StoreError>,
    pub timer: ElapsedTimer,
    epoch: u64,
}

impl MissionState {
    pub fn phase(&self) -> MissionPhase {
        if self.loading {
            return MissionPhase::Loading;
        }
        match &self.mission {
            None => MissionPhase::NoMission,
            Some(m) if m.status == MissionStatus::Completed => MissionPhase::Completed,
            Some(_) if self.all_problems_done() => MissionPhase::AllProblemsDone,
            Some(_) => MissionPhase::Active,
        }
    }

    /// Completion check used after grading: nothing left to answer and progress at 100 %.
    pub fn all_problems_done(&self) -> bool {
        self.current_problem.is_none() && self.progress.as_ref().is_some_and(MissionProgress::is_complete)
    }

    pub fn time_spent(&self, now: Instant) -> u64 {
        self.timer.time_spent(now)
    }

    pub fn apply(&mut self, event: MissionEvent, now: Instant) {
        match event {
            MissionEvent::FetchStarted => self.loading = true,
            MissionEvent::MissionFetched(snap) => {
                self.loading = false;
                self.error = None;
                self.adopt_mission(snap.mission);
                self.progress = Some(snap.progress);
                self.set_current_problem(snap.current_problem, now);
            }
            MissionEvent::NoActiveMission => {
                self.loading = false;
                self.error = None;
                self.mission = None;
                self.progress = None;
                self.set_current_problem(None, now);
            }
            MissionEvent::MissionStarted(started) => {
                self.loading = false;
                self.error = None;
                self.progress = Some(MissionProgress::initial(&started.mission, started.first_problem.clone()));
                self.mission = Some(started.mission.normalized());
                self.set_current_problem(started.first_problem, now);
            }
            MissionEvent::ProblemFetched(problem) => self.set_current_problem(problem, now),
            MissionEvent::ProgressRefreshed(progress) => {
                if let Some(m) = self.mission.as_mut() {
                    m.total_problems = progress.total_problems;
                    m.completed_problems = progress.completed_problems.min(progress.total_problems);
                }
                let current = progress.current_problem.clone();
                self.progress = Some(progress);
                self.set_current_problem(current, now);
            }
            MissionEvent::MissionCompleted(mission) => {
                self.error = None;
                let mut mission = mission.normalized();
                // The backend only confirms once every problem is done.
                mission.status = MissionStatus::Completed;
                mission.completed_problems = mission.total_problems;
                if let Some(p) = self.progress.as_mut() {
                    p.total_problems = mission.total_problems;
                    p.completed_problems = mission.total_problems;
                    p.current_problem = None;
                    p.progress_percentage = 100.0;
                }
                self.mission = Some(mission);
                self.timer.stop(now);
                self.set_current_problem(None, now);
            }
            MissionEvent::Failed(err) => {
                self.loading = false;
                self.error = Some(err);
            }
            MissionEvent::ErrorCleared => self.error = None,
            MissionEvent::TimerStarted => self.timer.start(now),
            MissionEvent::TimerStopped => self.timer.stop(now),
            MissionEvent::TimerReset => self.timer.reset(),
            MissionEvent::Reset => {
                *self = MissionState { epoch: self.epoch + 1, ..MissionState::default() };
            }
        }
    }

    fn adopt_mission(&mut self, incoming: Mission) {
        let mut incoming = incoming.normalized();
        if let Some(current) = &self.mission {
            if current.id == incoming.id && !current.status.can_advance_to(incoming.status) {
                warn!(target: "mission", mission_id = incoming.id, from = ?current.status, to = ?incoming.status, "Ignoring backward status transition");
                incoming.status = current.status;
            }
        }
        self.mission = Some(incoming);
    }

    /// A different problem (or none) resets the timer; a new problem starts it again.
    fn set_current_problem(&mut self, problem: Option<Problem>, now: Instant) {
        let old_id = self.current_problem.as_ref().map(|p| p.id);
        let new_id = problem.as_ref().map(|p| p.id);
        if old_id != new_id {
            match new_id {
                Some(_) => self.timer.restart(now),
                None => self.timer.reset(),
            }
        }
        self.current_problem = problem;
    }
}

#[derive(Clone)]
pub struct MissionStore {
    api: Arc<dyn ApiGateway>,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<MissionState>>,
}

impl MissionStore {
    pub fn new(api: Arc<dyn ApiGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { api, clock, state: Arc::new(RwLock::new(MissionState::default())) }
    }

    pub async fn snapshot(&self) -> MissionState {
        self.state.read().await.clone()
    }

    pub async fn phase(&self) -> MissionPhase {
        self.state.read().await.phase()
    }

    pub async fn mission(&self) -> Option<Mission> {
        self.state.read().await.mission.clone()
    }

    pub async fn current_problem(&self) -> Option<Problem> {
        self.state.read().await.current_problem.clone()
    }

    pub async fn progress(&self) -> Option<MissionProgress> {
        self.state.read().await.progress.clone()
    }

    pub async fn error(&self) -> Option<StoreError> {
        self.state.read().await.error.clone()
    }

    pub async fn all_problems_done(&self) -> bool {
        self.state.read().await.all_problems_done()
    }

    /// Apply an event right away; returns the epoch it was applied under.
    async fn dispatch(&self, event: MissionEvent) -> u64 {
        let now = self.clock.now();
        let mut st = self.state.write().await;
        st.apply(event, now);
        st.epoch
    }

    /// Apply a response event if the store has not moved on since `epoch`
    /// (and, when given, `mission_id` is still the active mission).
    async fn commit(&self, epoch: u64, mission_id: Option<MissionId>, event: MissionEvent) -> bool {
        let now = self.clock.now();
        let mut st = self.state.write().await;
        let mission_matches = mission_id.map_or(true, |id| st.mission.as_ref().map(|m| m.id) == Some(id));
        if st.epoch != epoch || !mission_matches {
            debug!(target: "mission", epoch, current_epoch = st.epoch, ?mission_id, "Stale response dropped");
            return false;
        }
        st.apply(event, now);
        true
    }

    async fn active_mission_id(&self) -> (u64, Option<MissionId>) {
        let st = self.state.read().await;
        (st.epoch, st.mission.as_ref().map(|m| m.id))
    }

    async fn no_active_mission(&self) -> StoreError {
        let err = StoreError::with_code(NO_ACTIVE_MISSION, "no_active_mission");
        self.dispatch(MissionEvent::Failed(err.clone())).await;
        err
    }

    /// Load the user's active mission. `Ok(None)` means there is none, which is not an error.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_current_mission(&self) -> Result<Option<Mission>, StoreError> {
        let epoch = self.dispatch(MissionEvent::FetchStarted).await;
        match self.api.current_mission().await {
            Ok(Some(snap)) => {
                let mission = snap.mission.clone();
                info!(target: "mission", mission_id = mission.id, completed = mission.completed_problems, total = mission.total_problems, "Active mission loaded");
                self.commit(epoch, None, MissionEvent::MissionFetched(snap)).await;
                Ok(Some(mission))
            }
            Ok(None) => {
                info!(target: "mission", "No active mission");
                self.commit(epoch, None, MissionEvent::NoActiveMission).await;
                Ok(None)
            }
            Err(e) => {
                let err = StoreError::from(&e);
                error!(target: "mission", error = %e, "Fetching current mission failed");
                self.commit(epoch, None, MissionEvent::Failed(err.clone())).await;
                Err(err)
            }
        }
    }

    #[instrument(level = "info", skip(self), fields(kind = kind.as_str()))]
    pub async fn start_new_mission(&self, kind: MissionType) -> Result<Mission, StoreError> {
        let epoch = self.dispatch(MissionEvent::FetchStarted).await;
        match self.api.start_mission(kind).await {
            Ok(started) => {
                let mission = started.mission.clone();
                info!(target: "mission", mission_id = mission.id, total = mission.total_problems, first_problem = ?started.first_problem.as_ref().map(|p| p.id), "Mission started");
                self.commit(epoch, None, MissionEvent::MissionStarted(started)).await;
                Ok(mission)
            }
            Err(e) => {
                let err = StoreError::from(&e);
                error!(target: "mission", error = %e, "Starting mission failed");
                self.commit(epoch, None, MissionEvent::Failed(err.clone())).await;
                Err(err)
            }
        }
    }

    /// Next unanswered problem of the active mission; `Ok(None)` once all are done.
    #[instrument(level = "info", skip(self))]
    pub async fn get_current_problem(&self) -> Result<Option<Problem>, StoreError> {
        let (epoch, Some(mission_id)) = self.active_mission_id().await else {
            return Err(self.no_active_mission().await);
        };
        match self.api.next_problem(mission_id).await {
            Ok(problem) => {
                debug!(target: "mission", mission_id, problem_id = ?problem.as_ref().map(|p| p.id), "Current problem fetched");
                self.commit(epoch, Some(mission_id), MissionEvent::ProblemFetched(problem.clone())).await;
                Ok(problem)
            }
            Err(e) => {
                let err = StoreError::from(&e);
                error!(target: "mission", mission_id, error = %e, "Fetching current problem failed");
                self.commit(epoch, Some(mission_id), MissionEvent::Failed(err.clone())).await;
                Err(err)
            }
        }
    }

    /// Best-effort refresh. Failures are logged and never recorded as store errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_progress(&self) -> Option<MissionProgress> {
        let (epoch, mission_id) = self.active_mission_id().await;
        let mission_id = mission_id?;
        match self.api.mission_progress(mission_id).await {
            Ok(progress) => {
                debug!(target: "mission", mission_id, completed = progress.completed_problems, total = progress.total_problems, pct = progress.progress_percentage, "Progress refreshed");
                self.commit(epoch, Some(mission_id), MissionEvent::ProgressRefreshed(progress.clone()))
                    .await
                    .then_some(progress)
            }
            Err(e) => {
                warn!(target: "mission", mission_id, error = %e, "Progress refresh failed");
                None
            }
        }
    }

    /// Finalize the mission. Fails with code `mission_not_finished` while problems remain.
    #[instrument(level = "info", skip(self))]
    pub async fn complete_mission(&self) -> Result<Mission, StoreError> {
        let (epoch, Some(mission_id)) = self.active_mission_id().await else {
            return Err(self.no_active_mission().await);
        };
        match self.api.complete_mission(mission_id).await {
            Ok(mission) => {
                info!(target: "mission", mission_id, actual_score = ?mission.actual_score, "Mission completed");
                let confirmed = mission.clone();
                if self.commit(epoch, Some(mission_id), MissionEvent::MissionCompleted(mission)).await {
                    self.update_progress().await;
                }
                let current = self.mission().await.filter(|m| m.id == mission_id);
                Ok(current.unwrap_or(confirmed))
            }
            Err(e) => {
                let err = StoreError::from(&e);
                warn!(target: "mission", mission_id, error = %e, code = ?err.code, "Completing mission failed");
                self.commit(epoch, Some(mission_id), MissionEvent::Failed(err.clone())).await;
                Err(err)
            }
        }
    }

    pub async fn start_timer(&self) {
        self.dispatch(MissionEvent::TimerStarted).await;
    }

    pub async fn stop_timer(&self) {
        self.dispatch(MissionEvent::TimerStopped).await;
    }

    pub async fn reset_timer(&self) {
        self.dispatch(MissionEvent::TimerReset).await;
    }

    /// Whole seconds spent on the current problem, including a running interval.
    pub async fn time_spent(&self) -> u64 {
        let now = self.clock.now();
        self.state.read().await.time_spent(now)
    }

    pub async fn clear_error(&self) {
        self.dispatch(MissionEvent::ErrorCleared).await;
    }

    #[instrument(level = "info", skip(self))]
    pub async fn reset(&self) {
        self.dispatch(MissionEvent::Reset).await;
        debug!(target: "mission", "Mission state reset");
    }
}
