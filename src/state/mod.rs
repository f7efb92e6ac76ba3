pub mod bus;
pub mod devices;
pub mod game;
pub mod ids;
pub mod mirror;
pub mod roster;
pub mod scoreboard;
pub mod state_machine;
pub mod timeouts;

use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    dao::leaderboard_store::LeaderboardStore,
    error::ServiceError,
    state::{game::GameSession, state_machine::GamePhase},
};

pub use self::bus::EventHub;
pub use self::mirror::MirrorQueue;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId};
pub use self::timeouts::TimeoutRegistry;
use self::state_machine::{GameEvent, GameStateMachine};

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: the single authoritative session, its round state
/// machine, pending timers and the leaderboard store handle.
pub struct AppState {
    config: AppConfig,
    leaderboard_store: RwLock<Option<Arc<dyn LeaderboardStore>>>,
    events: EventHub,
    session: RwLock<GameSession>,
    game: RwLock<GameStateMachine>,
    timeouts: TimeoutRegistry,
    mirror: MirrorQueue,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a leaderboard store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let session = GameSession::new(config.devices().to_vec(), config.settings().clone());
        Arc::new(Self {
            config,
            leaderboard_store: RwLock::new(None),
            events: EventHub::new(),
            session: RwLock::new(session),
            game: RwLock::new(GameStateMachine::new()),
            timeouts: TimeoutRegistry::new(),
            mirror: MirrorQueue::new(),
            transition_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current leaderboard store, if one is installed.
    pub async fn leaderboard_store(&self) -> Option<Arc<dyn LeaderboardStore>> {
        let guard = self.leaderboard_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new leaderboard store implementation and leave degraded mode.
    pub async fn install_leaderboard_store(&self, store: Arc<dyn LeaderboardStore>) {
        {
            let mut guard = self.leaderboard_store.write().await;
            *guard = Some(store);
        }
    }

    /// Remove the current leaderboard store and enter degraded mode.
    pub async fn clear_leaderboard_store(&self) {
        {
            let mut guard = self.leaderboard_store.write().await;
            guard.take();
        }
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.leaderboard_store.read().await;
        guard.is_none()
    }

    /// Publish/subscribe hub for broadcast events.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Delayed callbacks driving the round flow.
    pub fn timeouts(&self) -> &TimeoutRegistry {
        &self.timeouts
    }

    /// Ordered queue feeding the persistent leaderboard writer.
    pub fn mirror(&self) -> &MirrorQueue {
        &self.mirror
    }

    /// Run `f` against a shared borrow of the session.
    pub async fn with_session<R>(&self, f: impl FnOnce(&GameSession) -> R) -> R {
        let guard = self.session.read().await;
        f(&guard)
    }

    /// Run `f` against an exclusive borrow of the session.
    pub async fn with_session_mut<R>(&self, f: impl FnOnce(&mut GameSession) -> R) -> R {
        let mut guard = self.session.write().await;
        f(&mut guard)
    }

    /// Snapshot the current phase of the shared game state machine.
    pub async fn state_machine_phase(&self) -> GamePhase {
        self.game.read().await.phase()
    }

    /// Plan a transition to the shared game state machine, returning the plan.
    async fn plan_transition(&self, event: GameEvent) -> Result<Plan, PlanError> {
        let mut sm = self.game.write().await;
        sm.plan(event)
    }

    /// Apply the planned transition to the shared game state machine, returning the next phase.
    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let mut sm = self.game.write().await;
        sm.apply(plan_id)
    }

    /// Abort a planned transition of the shared game state machine
    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.game.write().await;
        sm.abort_plan(plan_id)
    }

    /// Plan `event`, run `work`, then apply the plan on success or discard it on
    /// failure or timeout. Transitions are serialized by a single gate.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: GameEvent,
        work: F,
    ) -> Result<(T, GamePhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan {
            id: plan_id, from, ..
        } = self.plan_transition(event.clone()).await?;

        let work_future = work();
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                info!(event = ?event, from = ?from, to = ?next, "game phase changed");
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }
}
