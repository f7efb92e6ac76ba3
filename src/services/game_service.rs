//! Round coordination: question display, countdown, scoring, results and game end.
//!
//! Every phase change goes through [`AppState::run_transition`]; broadcasts are
//! published once the transition is applied. Timer callbacks re-check the phase
//! they were scheduled for and do nothing when it moved on.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        common::{LeaderboardRow, QuestionPayload, SessionSnapshot},
        events::{
            AnswerSubmittedEvent, GameBroadcast, GameEndEvent, GameResetEvent, GameStartEvent,
            QuestionShowEvent, ResultsEvent, ScoreAwardEvent, SettingsUpdateEvent, TimerEndEvent,
            TimerTickEvent,
        },
        game::{
            ActionResponse, GlobalLeaderboardResponse, GlobalLeaderboardRow, LeaderboardResponse,
            ScoreUpdateResponse,
        },
        phase::VisibleGamePhase,
    },
    error::ServiceError,
    services::broadcasts,
    state::{
        AppState, SharedState,
        game::{GameSession, GameSettings, MAX_TIME_LIMIT_MS, MIN_TIME_LIMIT_MS, Question},
        ids::PlayerId,
        mirror::MirrorBatch,
        scoreboard::ScoreBoard,
        state_machine::{FinishReason, GameEvent, GamePhase, RoundPhase},
    },
};

/// Interval between two `timer.tick` broadcasts.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Rows carried by `round.results`.
pub const RESULTS_LEADERBOARD_SIZE: usize = 10;
/// Rows returned by leaderboard reads without an explicit limit.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
/// Upper bound for leaderboard reads.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Replace the question catalog. Only the host may do so, and only in the lobby.
pub async fn load_questions(
    state: &SharedState,
    host_id: &PlayerId,
    questions: Vec<Question>,
) -> Result<usize, ServiceError> {
    ensure_host(state, host_id).await?;
    ensure_idle(state, "questions can only be loaded in the lobby").await?;

    if questions.is_empty() {
        return Err(ServiceError::InvalidInput(
            "a catalog needs at least one question".into(),
        ));
    }
    for (position, question) in questions.iter().enumerate() {
        check_question(question)
            .map_err(|reason| ServiceError::InvalidInput(format!("question {position}: {reason}")))?;
    }

    let count = questions.len();
    state
        .with_session_mut(|session| session.catalog = questions)
        .await;
    info!(count, "question catalog replaced");
    Ok(count)
}

/// Install the startup catalog, skipping malformed questions.
pub async fn install_catalog(state: &SharedState, questions: Vec<Question>) -> usize {
    let questions: Vec<Question> = questions
        .into_iter()
        .enumerate()
        .filter_map(|(position, question)| match check_question(&question) {
            Ok(()) => Some(question),
            Err(reason) => {
                warn!(position, reason = %reason, "skipping malformed catalog question");
                None
            }
        })
        .collect();
    let count = questions.len();
    state
        .with_session_mut(|session| session.catalog = questions)
        .await;
    count
}

/// Start a game from the lobby and show its first question.
pub async fn start_game(
    state: &SharedState,
    host_id: &PlayerId,
) -> Result<ActionResponse, ServiceError> {
    ensure_host(state, host_id).await?;

    let ((start, show, epoch), phase) = state
        .run_transition(GameEvent::StartGame, || async {
            let epoch = state.timeouts().epoch();
            state
                .with_session_mut(|session| {
                    if session.catalog.is_empty() {
                        return Err(ServiceError::InvalidState(
                            "cannot start a game without questions".into(),
                        ));
                    }
                    let question_count = session.prepare_game();
                    let start = GameStartEvent {
                        host_id: session.roster.host().cloned(),
                        question_count,
                        settings: session.settings.clone(),
                    };
                    let show = show_question(session, 0)?;
                    Ok((start, show, epoch))
                })
                .await
        })
        .await?;

    info!(question_count = start.question_count, "game started");
    broadcasts::publish(state, GameBroadcast::GameStart(start));
    announce_question(state, epoch, show);
    Ok(phase.into())
}

/// Record an answer for the open question.
///
/// Returns `false` when the answer was ignored: second answers, absent or
/// opted-out players, or answers racing the close.
pub async fn submit_answer(
    state: &SharedState,
    player_id: &PlayerId,
    answer_index: usize,
    response_time_ms: Option<u64>,
) -> Result<bool, ServiceError> {
    let GamePhase::Running(RoundPhase::AwaitingAnswers { index }) =
        state.state_machine_phase().await
    else {
        return Err(ServiceError::InvalidState("answers are not open".into()));
    };

    let outcome = state
        .with_session_mut(|session| {
            let Some(round) = session
                .round
                .as_mut()
                .filter(|round| round.index == index && round.open)
            else {
                return Ok(None);
            };
            if answer_index >= round.question.options.len() {
                return Err(ServiceError::InvalidInput(format!(
                    "answer index {answer_index} is out of range"
                )));
            }
            if session.roster.has_answered(player_id)
                || !session.roster.record_answer(player_id, Some(answer_index))
            {
                return Ok(None);
            }

            let response_time_ms = response_time_ms
                .unwrap_or_else(|| round.elapsed_ms())
                .min(round.time_limit_ms);
            round.tally(answer_index);
            round
                .response_times
                .insert(player_id.clone(), response_time_ms);

            let event = AnswerSubmittedEvent {
                player_id: player_id.clone(),
                answer_index,
                response_time_ms,
                answered_count: session.roster.answered_count(),
                active_count: session.roster.active_count(),
            };
            let everyone = session.settings.close_when_all_answered
                && session.roster.all_active_answered();
            Ok(Some((event, everyone)))
        })
        .await?;

    let Some((event, everyone)) = outcome else {
        debug!(player = %player_id, index, "answer ignored");
        return Ok(false);
    };

    broadcasts::publish(state, GameBroadcast::AnswerSubmitted(event));
    if everyone {
        close_quietly(state, index, "every active player answered").await;
    }
    Ok(true)
}

/// Close answers early when the roster changed so that every active player answered.
pub async fn close_if_all_answered(state: &SharedState) {
    let GamePhase::Running(RoundPhase::AwaitingAnswers { index }) =
        state.state_machine_phase().await
    else {
        return;
    };
    let ready = state
        .with_session(|session| {
            session.settings.close_when_all_answered
                && session.round_at(index).is_some_and(|round| round.open)
                && session.roster.all_active_answered()
        })
        .await;
    if ready {
        close_quietly(state, index, "remaining players all answered").await;
    }
}

/// Close answers to question `index`: score them, publish awards and results,
/// then start the results timer.
pub async fn close_answers(state: &SharedState, index: usize) -> Result<GamePhase, ServiceError> {
    let ((awards, results, delay, epoch), phase) = state
        .run_transition(GameEvent::CloseAnswers, || async {
            let ((awards, results), delay) = state
                .with_session_mut(|session| {
                    let outcome = score_round(session, index)?;
                    Ok::<_, ServiceError>((outcome, session.settings.results_duration()))
                })
                .await?;
            state.timeouts().cancel_all();
            let epoch = state.timeouts().epoch();
            Ok((awards, results, delay, epoch))
        })
        .await?;

    info!(index, scorers = awards.len(), "answers closed");
    broadcasts::broadcast_score_awards(state, &awards);
    mirror_scores(
        state,
        awards
            .iter()
            .map(|award| (award.player_id.clone(), award.total))
            .collect(),
    );
    broadcasts::publish(state, GameBroadcast::Results(results));

    let task_state = Arc::clone(state);
    if state
        .timeouts()
        .schedule_in_epoch(epoch, delay, move || on_results_elapsed(task_state, index))
        .is_none()
    {
        debug!(index, "results timer dropped after cancellation");
    }
    Ok(phase)
}

/// Leave the results of question `index`: clear per-round answers, then show the
/// next question or finish the game.
pub async fn advance_from_results(
    state: &SharedState,
    index: usize,
) -> Result<GamePhase, ServiceError> {
    let (remaining, _) = state
        .run_transition(GameEvent::ResultsElapsed, || async {
            let remaining = state
                .with_session_mut(|session| {
                    if session.round_at(index).is_none() {
                        return Err(stale_round(index));
                    }
                    session.roster.clear_round();
                    Ok(session.question_count().saturating_sub(index + 1))
                })
                .await?;
            state.timeouts().cancel_all();
            Ok(remaining)
        })
        .await?;

    if remaining == 0 {
        return finish(state, FinishReason::CatalogCompleted).await;
    }

    let next = index + 1;
    let ((show, epoch), phase) = state
        .run_transition(GameEvent::NextQuestion, || async {
            let epoch = state.timeouts().epoch();
            let show = state
                .with_session_mut(|session| show_question(session, next))
                .await?;
            Ok((show, epoch))
        })
        .await?;
    announce_question(state, epoch, show);
    Ok(phase)
}

/// Move a running game to the final leaderboard.
pub async fn finish(state: &SharedState, reason: FinishReason) -> Result<GamePhase, ServiceError> {
    let (event, phase) = state
        .run_transition(GameEvent::Finish(reason), || async {
            state.timeouts().cancel_all();
            Ok(state
                .with_session_mut(|session| {
                    let leaderboard = session
                        .scores
                        .snapshot_leaderboard(&session.roster.players())
                        .into_iter()
                        .map(LeaderboardRow::from)
                        .collect();
                    session.roster.clear_round();
                    session.round = None;
                    GameEndEvent {
                        host_id: session.roster.host().cloned(),
                        reason,
                        leaderboard,
                    }
                })
                .await)
        })
        .await?;

    info!(reason = ?reason, players = event.leaderboard.len(), "game finished");
    broadcasts::publish(state, GameBroadcast::GameEnd(event));
    Ok(phase)
}

/// Host skip: close answers, or leave the results early.
pub async fn advance(
    state: &SharedState,
    host_id: &PlayerId,
) -> Result<ActionResponse, ServiceError> {
    ensure_host(state, host_id).await?;
    let phase = match state.state_machine_phase().await {
        GamePhase::Running(RoundPhase::AwaitingAnswers { index }) => {
            close_answers(state, index).await?
        }
        GamePhase::Running(RoundPhase::ShowingResults { index }) => {
            advance_from_results(state, index).await?
        }
        other => {
            return Err(ServiceError::InvalidState(format!(
                "cannot advance while in phase {other:?}"
            )));
        }
    };
    Ok(phase.into())
}

/// Stop a running game, or leave the final leaderboard for the lobby.
pub async fn end_game(
    state: &SharedState,
    host_id: &PlayerId,
) -> Result<ActionResponse, ServiceError> {
    ensure_host(state, host_id).await?;
    let phase = match state.state_machine_phase().await {
        GamePhase::Running(_) => finish(state, FinishReason::ManualStop).await?,
        GamePhase::Finished => {
            let (_, phase) = state
                .run_transition(GameEvent::EndGame, || async {
                    state.with_session_mut(GameSession::reset_game).await;
                    Ok(())
                })
                .await?;
            broadcasts::publish(
                state,
                GameBroadcast::GameReset(GameResetEvent {
                    host_id: Some(host_id.clone()),
                }),
            );
            phase
        }
        GamePhase::Idle => {
            return Err(ServiceError::InvalidState("no game to end".into()));
        }
    };
    Ok(phase.into())
}

/// Drop whatever is running: cancel every timer, then return to the lobby with
/// scores and round state cleared.
pub async fn abort(state: &SharedState) -> Result<GamePhase, ServiceError> {
    state.timeouts().cancel_all();
    let (_, phase) = state
        .run_transition(GameEvent::Abort, || async {
            // Catches timers armed by a transition that held the gate meanwhile.
            state.timeouts().cancel_all();
            state.with_session_mut(GameSession::reset_game).await;
            Ok(())
        })
        .await?;
    Ok(phase)
}

/// Host reset back to the lobby.
pub async fn reset(
    state: &SharedState,
    host_id: &PlayerId,
) -> Result<ActionResponse, ServiceError> {
    ensure_host(state, host_id).await?;
    let phase = abort(state).await?;
    info!(host = %host_id, "game reset");
    broadcasts::publish(
        state,
        GameBroadcast::GameReset(GameResetEvent {
            host_id: Some(host_id.clone()),
        }),
    );
    Ok(phase.into())
}

/// Replace the lobby settings.
pub async fn update_settings(
    state: &SharedState,
    host_id: &PlayerId,
    settings: GameSettings,
) -> Result<GameSettings, ServiceError> {
    ensure_host(state, host_id).await?;
    ensure_idle(state, "settings can only change in the lobby").await?;
    settings.check().map_err(ServiceError::InvalidInput)?;

    state
        .with_session_mut(|session| session.settings = settings.clone())
        .await;
    broadcasts::publish(
        state,
        GameBroadcast::SettingsUpdate(SettingsUpdateEvent {
            host_id: host_id.clone(),
            settings: settings.clone(),
        }),
    );
    Ok(settings)
}

/// Manual score correction.
pub async fn adjust_score(
    state: &SharedState,
    host_id: &PlayerId,
    player_id: &PlayerId,
    delta: i64,
) -> Result<ScoreUpdateResponse, ServiceError> {
    ensure_host(state, host_id).await?;
    let total = state
        .with_session_mut(|session| {
            if !session.roster.is_present(player_id) {
                return Err(ServiceError::NotFound(format!(
                    "player `{player_id}` is not present"
                )));
            }
            Ok(session.scores.add_points(player_id, delta))
        })
        .await?;

    let award = ScoreAwardEvent {
        player_id: player_id.clone(),
        points: delta,
        total,
    };
    broadcasts::broadcast_score_awards(state, std::slice::from_ref(&award));
    mirror_scores(state, vec![(player_id.clone(), total)]);
    Ok(ScoreUpdateResponse {
        player_id: player_id.clone(),
        score: total,
    })
}

/// Session leaderboard, best first.
pub async fn leaderboard(state: &SharedState, limit: Option<usize>) -> LeaderboardResponse {
    let limit = clamp_limit(limit);
    let leaderboard = state
        .with_session(|session| {
            session
                .scores
                .top_n(&session.roster.players(), limit)
                .into_iter()
                .map(LeaderboardRow::from)
                .collect()
        })
        .await;
    LeaderboardResponse { leaderboard }
}

/// Persistent leaderboard read through the installed store.
pub async fn global_leaderboard(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<GlobalLeaderboardResponse, ServiceError> {
    let store = state
        .leaderboard_store()
        .await
        .ok_or(ServiceError::Degraded)?;
    let name = state.config().leaderboard_name().to_string();
    let rows = store
        .top_scores(&name, clamp_limit(limit))
        .await?
        .into_iter()
        .map(GlobalLeaderboardRow::from)
        .collect();
    Ok(GlobalLeaderboardResponse {
        leaderboard: name,
        rows,
    })
}

/// Snapshot of the session used to resync late subscribers.
pub async fn build_snapshot(state: &AppState) -> SessionSnapshot {
    let phase = state.state_machine_phase().await;
    let degraded = state.is_degraded().await;
    state
        .with_session(|session| {
            let round = phase
                .question_index()
                .and_then(|index| session.round_at(index));
            let revealed = matches!(
                phase,
                GamePhase::Running(RoundPhase::ShowingResults { .. } | RoundPhase::Advancing { .. })
            );
            let awaiting = matches!(
                phase,
                GamePhase::Running(RoundPhase::AwaitingAnswers { .. })
            );

            SessionSnapshot {
                phase: VisibleGamePhase::from(&phase),
                session_id: session.id,
                degraded,
                question: round.map(|round| QuestionPayload::from(&round.question)),
                question_index: round.map(|round| round.index),
                question_count: session.question_count(),
                time_remaining_ms: round
                    .filter(|_| awaiting)
                    .map(|round| round.remaining_ms()),
                correct_index: round
                    .filter(|_| revealed)
                    .map(|round| round.question.correct_index),
                per_option_counts: round
                    .filter(|_| revealed)
                    .map(|round| round.option_counts.clone()),
                host_id: session.roster.host().cloned(),
                settings: session.settings.clone(),
                leaderboard: session
                    .scores
                    .top_n(&session.roster.players(), RESULTS_LEADERBOARD_SIZE)
                    .into_iter()
                    .map(LeaderboardRow::from)
                    .collect(),
                present_count: session.roster.count(),
                active_count: session.roster.active_count(),
                answered_count: session.roster.answered_count(),
            }
        })
        .await
}

/// Reject callers that do not hold the host role.
pub async fn ensure_host(state: &AppState, host_id: &PlayerId) -> Result<(), ServiceError> {
    let is_host = state
        .with_session(|session| session.roster.is_host(host_id))
        .await;
    if is_host {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(format!(
            "player `{host_id}` is not the host"
        )))
    }
}

/// Mirror changed totals into the persistent leaderboard without blocking the round.
///
/// Batches go through the state's [`MirrorQueue`](crate::state::MirrorQueue) and a
/// single writer task, so the store sees them in the order the scores changed.
pub fn mirror_scores(state: &SharedState, totals: Vec<(PlayerId, i64)>) {
    if totals.is_empty() {
        return;
    }
    if let Some(rx) = state.mirror().take_receiver() {
        tokio::spawn(run_mirror_writer(Arc::downgrade(state), rx));
    }
    if !state.mirror().push(totals) {
        warn!("score mirror writer stopped; scores not mirrored");
    }
}

async fn run_mirror_writer(state: Weak<AppState>, mut rx: UnboundedReceiver<MirrorBatch>) {
    while let Some(totals) = rx.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        write_mirror_batch(&state, totals).await;
    }
    debug!("score mirror writer finished");
}

async fn write_mirror_batch(state: &AppState, totals: MirrorBatch) {
    let Some(store) = state.leaderboard_store().await else {
        warn!(
            count = totals.len(),
            "leaderboard store unavailable; scores not mirrored"
        );
        return;
    };
    let leaderboard = state.config().leaderboard_name();
    let overwrite = state.config().leaderboard_overwrite();
    for (player_id, score) in totals {
        if let Err(err) = store
            .set_score_for_player(leaderboard, player_id.as_str(), score, overwrite)
            .await
        {
            warn!(player = %player_id, error = %err, "failed to mirror score");
        }
    }
}

async fn ensure_idle(state: &AppState, message: &str) -> Result<(), ServiceError> {
    if state.state_machine_phase().await == GamePhase::Idle {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(message.into()))
    }
}

fn check_question(question: &Question) -> Result<(), String> {
    if question.prompt.trim().is_empty() {
        return Err("prompt must not be empty".into());
    }
    if question.options.len() < 2 {
        return Err("at least two options are required".into());
    }
    if question.correct_index >= question.options.len() {
        return Err("correct index must name one of the options".into());
    }
    if question
        .time_limit_ms
        .is_some_and(|limit| !(MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS).contains(&limit))
    {
        return Err(format!(
            "time limit must be between {MIN_TIME_LIMIT_MS} and {MAX_TIME_LIMIT_MS} ms"
        ));
    }
    Ok(())
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT)
}

fn stale_round(index: usize) -> ServiceError {
    ServiceError::InvalidState(format!("question {index} is no longer current"))
}

fn show_question(session: &mut GameSession, index: usize) -> Result<QuestionShowEvent, ServiceError> {
    let count = session.question_count();
    let round = session
        .begin_round(index)
        .ok_or_else(|| ServiceError::InvalidState(format!("no question at index {index}")))?;
    Ok(QuestionShowEvent {
        question: QuestionPayload::from(&round.question),
        index,
        count,
        time_limit_ms: round.time_limit_ms,
    })
}

fn score_round(
    session: &mut GameSession,
    index: usize,
) -> Result<(Vec<ScoreAwardEvent>, ResultsEvent), ServiceError> {
    let round = session
        .round
        .as_mut()
        .filter(|round| round.index == index && round.open)
        .ok_or_else(|| stale_round(index))?;
    round.open = false;

    let correct_index = round.question.correct_index;
    let mut awards = Vec::new();
    for player_id in session.roster.answered_ids() {
        let Some(choice) = session.roster.answer_choice(&player_id) else {
            continue;
        };
        let response_time_ms = round
            .response_times
            .get(&player_id)
            .copied()
            .unwrap_or(round.time_limit_ms);
        let points = ScoreBoard::compute_answer_points(
            choice == correct_index,
            response_time_ms,
            round.time_limit_ms,
        );
        if points == 0 {
            continue;
        }
        let total = session.scores.add_points(&player_id, points);
        awards.push(ScoreAwardEvent {
            player_id,
            points,
            total,
        });
    }

    let results = ResultsEvent {
        question: QuestionPayload::from(&round.question),
        index,
        correct_index,
        per_option_counts: round.option_counts.clone(),
        scores: session
            .scores
            .top_n(&session.roster.players(), RESULTS_LEADERBOARD_SIZE)
            .into_iter()
            .map(LeaderboardRow::from)
            .collect(),
    };
    Ok((awards, results))
}

fn announce_question(state: &SharedState, epoch: u64, show: QuestionShowEvent) {
    let index = show.index;
    let time_limit_ms = show.time_limit_ms;
    debug!(index, time_limit_ms, "question shown");
    broadcasts::publish(state, GameBroadcast::QuestionShow(show));
    schedule_tick(state, epoch, index, time_limit_ms);
}

fn schedule_tick(state: &SharedState, epoch: u64, index: usize, remaining_ms: u64) {
    let delay = TICK_INTERVAL.min(Duration::from_millis(remaining_ms));
    let task_state = Arc::clone(state);
    state
        .timeouts()
        .schedule_in_epoch(epoch, delay, move || on_tick(task_state, epoch, index));
}

async fn close_quietly(state: &SharedState, index: usize, cause: &'static str) {
    match close_answers(state, index).await {
        Ok(_) => debug!(index, cause, "answers closed early"),
        Err(err) => debug!(index, cause, error = %err, "early close skipped"),
    }
}

fn on_tick(state: SharedState, epoch: u64, index: usize) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if state.state_machine_phase().await
            != GamePhase::Running(RoundPhase::AwaitingAnswers { index })
        {
            return;
        }
        let Some(remaining_ms) = state
            .with_session(|session| {
                session
                    .round_at(index)
                    .filter(|round| round.open)
                    .map(|round| round.remaining_ms())
            })
            .await
        else {
            return;
        };

        if remaining_ms == 0 {
            broadcasts::publish(&state, GameBroadcast::TimerEnd(TimerEndEvent { index }));
            close_quietly(&state, index, "countdown elapsed").await;
            return;
        }

        broadcasts::publish(
            &state,
            GameBroadcast::TimerTick(TimerTickEvent {
                time_remaining: remaining_ms.div_ceil(1_000),
                index,
            }),
        );
        schedule_tick(&state, epoch, index, remaining_ms);
    })
}

fn on_results_elapsed(state: SharedState, index: usize) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if state.state_machine_phase().await
            != GamePhase::Running(RoundPhase::ShowingResults { index })
        {
            return;
        }
        if let Err(err) = advance_from_results(&state, index).await {
            debug!(index, error = %err, "results timer skipped");
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            leaderboard_store::{LeaderboardStore, MemoryLeaderboardStore},
            models::LeaderboardRecord,
            storage::StorageResult,
        },
        dto::events::EventName,
        state::{bus::Subscription, roster::Player},
    };

    /// Store whose first write is much slower than the following ones.
    #[derive(Clone, Default)]
    struct SlowFirstWriteStore {
        inner: MemoryLeaderboardStore,
        writes: Arc<AtomicUsize>,
    }

    impl LeaderboardStore for SlowFirstWriteStore {
        fn set_score_for_player(
            &self,
            leaderboard: &str,
            player_id: &str,
            score: i64,
            overwrite: bool,
        ) -> BoxFuture<'static, StorageResult<LeaderboardRecord>> {
            let delay = if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
                Duration::from_millis(200)
            } else {
                Duration::from_millis(10)
            };
            let inner = self.inner.clone();
            let leaderboard = leaderboard.to_string();
            let player_id = player_id.to_string();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                inner
                    .set_score_for_player(&leaderboard, &player_id, score, overwrite)
                    .await
            })
        }

        fn top_scores(
            &self,
            leaderboard: &str,
            limit: usize,
        ) -> BoxFuture<'static, StorageResult<Vec<LeaderboardRecord>>> {
            self.inner.top_scores(leaderboard, limit)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    fn question(prompt: &str, correct_index: usize) -> Question {
        Question {
            prompt: prompt.into(),
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_index,
            time_limit_ms: None,
        }
    }

    fn settings() -> GameSettings {
        GameSettings {
            time_limit_ms: 3_000,
            results_duration_ms: 2_000,
            ..GameSettings::default()
        }
    }

    async fn lobby(players: &[&str]) -> SharedState {
        lobby_with(AppConfig::default(), players).await
    }

    async fn lobby_with(config: AppConfig, players: &[&str]) -> SharedState {
        let state = AppState::new(config);
        install_catalog(&state, vec![question("q0", 0), question("q1", 1)]).await;
        state
            .with_session_mut(|session| {
                session.settings = settings();
                for id in players {
                    session.roster.join(Player::new(*id, id.to_uppercase()));
                }
                if let Some(first) = players.first() {
                    session.roster.set_host(&PlayerId::from(*first)).unwrap();
                }
            })
            .await;
        state
    }

    fn host() -> PlayerId {
        PlayerId::from("a")
    }

    fn drain(subscription: &mut Subscription) -> Vec<GameBroadcast> {
        let mut events = Vec::new();
        while let Some(event) = subscription.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[GameBroadcast]) -> Vec<EventName> {
        events.iter().map(GameBroadcast::name).collect()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_requires_host_and_questions() {
        let state = lobby(&["a", "b"]).await;
        let err = start_game(&state, &PlayerId::from("b")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        install_catalog(&state, Vec::new()).await;
        let err = start_game(&state, &host()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(state.state_machine_phase().await, GamePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_then_closes_answers() {
        let state = lobby(&["a", "b"]).await;
        let mut events = state.events().subscribe_all();

        let response = start_game(&state, &host()).await.unwrap();
        assert_eq!(response.phase, VisibleGamePhase::AwaitingAnswers);
        assert_eq!(
            names(&drain(&mut events)),
            vec![EventName::GameStart, EventName::QuestionShow]
        );

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        settle().await;

        let seen = drain(&mut events);
        let ticks: Vec<u64> = seen
            .iter()
            .filter_map(|event| match event {
                GameBroadcast::TimerTick(tick) => Some(tick.time_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![2, 1]);
        assert!(names(&seen).contains(&EventName::TimerEnd));
        assert_eq!(names(&seen).last(), Some(&EventName::Results));
        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::ShowingResults { index: 0 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_scores_and_moves_to_next_question() {
        let state = lobby(&["a", "b", "c"]).await;
        let mut events = state.events().subscribe_all();
        start_game(&state, &host()).await.unwrap();

        assert!(submit_answer(&state, &PlayerId::from("a"), 0, Some(100)).await.unwrap());
        assert!(submit_answer(&state, &PlayerId::from("b"), 0, Some(2_500)).await.unwrap());
        assert!(!submit_answer(&state, &PlayerId::from("b"), 1, None).await.unwrap());
        assert!(submit_answer(&state, &PlayerId::from("c"), 2, Some(50)).await.unwrap());

        // Everyone answered: closed without waiting for the countdown.
        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::ShowingResults { index: 0 })
        );
        let seen = drain(&mut events);
        let results = seen
            .iter()
            .find_map(|event| match event {
                GameBroadcast::Results(results) => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(results.per_option_counts, vec![2, 0, 1]);
        let scores: Vec<(String, i64)> = results
            .scores
            .iter()
            .map(|row| (row.id.to_string(), row.score))
            .collect();
        assert_eq!(
            scores,
            vec![("a".to_string(), 200), ("b".to_string(), 100)]
        );

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        settle().await;

        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::AwaitingAnswers { index: 1 })
        );
        let (present, answered, opted_out) = state
            .with_session(|session| {
                (
                    session.roster.count(),
                    session.roster.answered_count(),
                    session.roster.opted_out_ids().len(),
                )
            })
            .await;
        assert_eq!((present, answered, opted_out), (3, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn last_question_finishes_the_game() {
        let state = lobby(&["a"]).await;
        install_catalog(&state, vec![question("only", 1)]).await;
        let mut events = state.events().subscribe([EventName::GameEnd]);
        start_game(&state, &host()).await.unwrap();

        submit_answer(&state, &host(), 1, Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        settle().await;

        assert_eq!(state.state_machine_phase().await, GamePhase::Finished);
        match events.try_recv() {
            Some(GameBroadcast::GameEnd(end)) => {
                assert_eq!(end.reason, FinishReason::CatalogCompleted);
                assert_eq!(end.leaderboard.len(), 1);
                assert_eq!(end.leaderboard[0].score, 200);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(state.timeouts().pending_count(), 0);

        end_game(&state, &host()).await.unwrap();
        assert_eq!(state.state_machine_phase().await, GamePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn opt_out_is_not_scored_and_out_of_range_is_rejected() {
        let state = lobby(&["a", "b"]).await;
        start_game(&state, &host()).await.unwrap();

        let err = submit_answer(&state, &host(), 7, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        state
            .with_session_mut(|session| session.roster.opt_out(&PlayerId::from("b")))
            .await;
        assert!(!submit_answer(&state, &PlayerId::from("b"), 0, None).await.unwrap());
        assert!(!submit_answer(&state, &PlayerId::from("ghost"), 0, None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_timers_and_stale_callbacks_do_nothing() {
        let state = lobby(&["a", "b"]).await;
        start_game(&state, &host()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;

        let mut events = state.events().subscribe_all();
        reset(&state, &host()).await.unwrap();
        assert_eq!(state.timeouts().pending_count(), 0);
        assert_eq!(names(&drain(&mut events)), vec![EventName::GameReset]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert!(drain(&mut events).is_empty());
        assert_eq!(state.state_machine_phase().await, GamePhase::Idle);

        let scores_empty = state
            .with_session(|session| session.scores.scores().next().is_none())
            .await;
        assert!(scores_empty);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_close_is_rejected() {
        let state = lobby(&["a"]).await;
        start_game(&state, &host()).await.unwrap();
        let err = close_answers(&state, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::AwaitingAnswers { index: 0 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn host_advance_skips_through_a_round() {
        let state = lobby(&["a", "b"]).await;
        start_game(&state, &host()).await.unwrap();

        let response = advance(&state, &host()).await.unwrap();
        assert_eq!(response.phase, VisibleGamePhase::ShowingResults);
        let response = advance(&state, &host()).await.unwrap();
        assert_eq!(response.phase, VisibleGamePhase::AwaitingAnswers);

        let response = end_game(&state, &host()).await.unwrap();
        assert_eq!(response.phase, VisibleGamePhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_only_change_in_the_lobby() {
        let state = lobby(&["a"]).await;
        let invalid = GameSettings {
            time_limit_ms: 1,
            ..settings()
        };
        let err = update_settings(&state, &host(), invalid).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let updated = GameSettings {
            shuffle_questions: true,
            ..settings()
        };
        update_settings(&state, &host(), updated.clone()).await.unwrap();
        assert_eq!(
            state.with_session(|session| session.settings.clone()).await,
            updated
        );

        start_game(&state, &host()).await.unwrap();
        let err = update_settings(&state, &host(), settings()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn scores_are_mirrored_into_the_store() {
        let state = lobby(&["a", "b"]).await;
        let store = MemoryLeaderboardStore::new();
        state.install_leaderboard_store(Arc::new(store.clone())).await;

        adjust_score(&state, &host(), &PlayerId::from("b"), 150).await.unwrap();
        settle().await;

        let top = store.top_scores("trivia", 5).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].player_id, "b");
        assert_eq!(top[0].score, 150);

        let global = global_leaderboard(&state, None).await.unwrap();
        assert_eq!(global.rows.len(), 1);

        let err = adjust_score(&state, &host(), &PlayerId::from("ghost"), 5).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mirrored_scores_reach_the_store_in_change_order() {
        let config = AppConfig::from_json(r#"{ "leaderboard_overwrite": true }"#).unwrap();
        let state = lobby_with(config, &["a", "b"]).await;
        let store = SlowFirstWriteStore::default();
        state.install_leaderboard_store(Arc::new(store.clone())).await;

        let b = PlayerId::from("b");
        adjust_score(&state, &host(), &b, 300).await.unwrap();
        let latest = adjust_score(&state, &host(), &b, -200).await.unwrap();
        assert_eq!(latest.score, 100);

        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;

        let top = store.inner.top_scores("trivia", 5).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].score, 100);
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_from_a_cancelled_chain_does_not_rearm() {
        let state = lobby(&["a", "b"]).await;
        start_game(&state, &host()).await.unwrap();
        let first_game_epoch = state.timeouts().epoch();

        reset(&state, &host()).await.unwrap();
        start_game(&state, &host()).await.unwrap();
        assert_eq!(state.timeouts().pending_count(), 1);

        // A tick of the first game that was already running when the reset happened.
        on_tick(Arc::clone(&state), first_game_epoch, 0).await;
        assert_eq!(state.timeouts().pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn results_of_a_restarted_game_last_their_full_duration() {
        let state = lobby(&["a", "b"]).await;
        start_game(&state, &host()).await.unwrap();
        advance(&state, &host()).await.unwrap();
        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::ShowingResults { index: 0 })
        );

        reset(&state, &host()).await.unwrap();
        assert_eq!(state.timeouts().pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        start_game(&state, &host()).await.unwrap();
        advance(&state, &host()).await.unwrap();

        // The first game's results timer would have fired here.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        settle().await;
        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::ShowingResults { index: 0 })
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(
            state.state_machine_phase().await,
            GamePhase::Running(RoundPhase::AwaitingAnswers { index: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn global_leaderboard_needs_a_store() {
        let state = lobby(&["a"]).await;
        let err = global_leaderboard(&state, Some(5)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_follows_the_round() {
        let state = lobby(&["a", "b"]).await;
        let snapshot = build_snapshot(&state).await;
        assert_eq!(snapshot.phase, VisibleGamePhase::Idle);
        assert!(snapshot.question.is_none());
        assert_eq!(snapshot.host_id, Some(host()));

        start_game(&state, &host()).await.unwrap();
        submit_answer(&state, &host(), 0, Some(10)).await.unwrap();
        let snapshot = build_snapshot(&state).await;
        assert_eq!(snapshot.question_index, Some(0));
        assert_eq!(snapshot.time_remaining_ms, Some(3_000));
        assert!(snapshot.correct_index.is_none());
        assert_eq!(snapshot.answered_count, 1);

        advance(&state, &host()).await.unwrap();
        let snapshot = build_snapshot(&state).await;
        assert_eq!(snapshot.correct_index, Some(0));
        assert_eq!(snapshot.per_option_counts, Some(vec![1, 0, 0]));
        assert_eq!(snapshot.leaderboard.len(), 1);
    }

    #[tokio::test]
    async fn load_questions_validates_and_replaces() {
        let state = lobby(&["a"]).await;
        let err = load_questions(&state, &host(), vec![question("bad", 5)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let count = load_questions(&state, &host(), vec![question("fine", 2)])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(state.with_session(|session| session.catalog.len()).await, 1);
    }
}
