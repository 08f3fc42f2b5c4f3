use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::{SessionRecord, SessionType, TimerSettings, TimerSettingsPatch, TimerState, TimerStatus};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerEventKind {
    Started,
    Resumed,
    Paused,
    Reset,
    Completed,
    AutoStarted,
    SessionChanged,
    SettingsChanged,
    Corrected,
}

/// Lifecycle notification carrying the state right after the transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerEvent {
    pub kind: TimerEventKind,
    pub state: TimerState,
}

/// Owns the timer state and the one-second clock that drives it.
///
/// Every mutation goes through the state mutex, so user actions, clock
/// ticks and remote corrections never interleave. Clones share the same
/// timer.
#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<TimerState>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    events: broadcast::Sender<TimerEvent>,
}

impl TimerController {
    pub fn new(settings: TimerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(TimerState::new(settings))),
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub async fn get_state(&self) -> TimerState {
        self.state.lock().await.clone()
    }

    pub async fn start(&self) -> bool {
        let kind = {
            let mut state = self.state.lock().await;
            let resuming = state.status == TimerStatus::Paused
                && state.current_time != state.initial_time;
            if !state.start(Utc::now()) {
                return false;
            }
            let kind = if resuming {
                TimerEventKind::Resumed
            } else {
                TimerEventKind::Started
            };
            emit(&self.events, kind, &state);
            kind
        };

        log_debug!("timer {:?}", kind);
        self.spawn_ticker().await;
        true
    }

    pub async fn pause(&self) -> bool {
        let paused = {
            let mut state = self.state.lock().await;
            let paused = state.pause();
            if paused {
                emit(&self.events, TimerEventKind::Paused, &state);
            }
            paused
        };
        if paused {
            self.cancel_ticker().await;
        }
        paused
    }

    pub async fn reset(&self) -> Option<SessionRecord> {
        let record = {
            let mut state = self.state.lock().await;
            let record = state.reset(Utc::now());
            emit(&self.events, TimerEventKind::Reset, &state);
            record
        };
        self.cancel_ticker().await;

        if let Some(record) = &record {
            log_info!(
                "recorded unfinished {} session ({}s)",
                record.session_type.label(),
                record.duration
            );
        }
        record
    }

    pub async fn set_session_type(&self, session_type: SessionType) {
        {
            let mut state = self.state.lock().await;
            state.set_session_type(session_type);
            emit(&self.events, TimerEventKind::SessionChanged, &state);
        }
        self.cancel_ticker().await;
    }

    pub async fn advance(&self) -> SessionType {
        let next = {
            let mut state = self.state.lock().await;
            let next = state.advance();
            emit(&self.events, TimerEventKind::SessionChanged, &state);
            next
        };
        self.cancel_ticker().await;
        next
    }

    /// Merges the patch; an invalid patch leaves settings untouched.
    pub async fn update_settings(&self, patch: TimerSettingsPatch) -> Result<TimerSettings> {
        let mut state = self.state.lock().await;
        state.update_settings(&patch)?;
        emit(&self.events, TimerEventKind::SettingsChanged, &state);
        Ok(state.settings)
    }

    pub async fn clear_history(&self) {
        self.state.lock().await.clear_history();
    }

    /// Overwrites the remaining time with the peer's value when `diverged`
    /// says the two disagree. Returns the value applied, if any. A finished
    /// session is never corrected.
    pub async fn correct_remaining_if<F>(&self, remote_remaining: u32, diverged: F) -> Option<u32>
    where
        F: FnOnce(u32, u32) -> bool,
    {
        let (corrected, rolled_over) = {
            let mut state = self.state.lock().await;
            if state.status == TimerStatus::Finished {
                return None;
            }
            let local = state.current_time;
            if !diverged(local, remote_remaining) {
                return None;
            }

            let corrected = state.correct_remaining(remote_remaining, Utc::now())?;
            log_info!(
                "timer corrected from {local}s to {corrected}s (remote {remote_remaining}s, drift {}s)",
                local.abs_diff(remote_remaining)
            );
            emit(&self.events, TimerEventKind::Corrected, &state);

            let rolled_over = if state.status == TimerStatus::Finished {
                Some(complete_session(&mut state, &self.events))
            } else {
                None
            };
            (corrected, rolled_over)
        };

        match rolled_over {
            // A paused session has no clock running, so the auto-started one needs its own.
            Some(true) => self.spawn_ticker().await,
            Some(false) => self.cancel_ticker().await,
            None => {}
        }
        Some(corrected)
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let events = self.events.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            // A late tick is applied once; missed ticks are never replayed.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                let mut guard = state.lock().await;
                if !guard.tick(Utc::now()) {
                    break;
                }
                if guard.status == TimerStatus::Finished
                    && !complete_session(&mut guard, &events)
                {
                    break;
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

/// Announces a finished session and rolls into the next one when the
/// auto-start settings ask for it. Returns `true` if a new session started.
fn complete_session(state: &mut TimerState, events: &broadcast::Sender<TimerEvent>) -> bool {
    log_info!(
        "{} session complete ({} work sessions so far)",
        state.session_type.label(),
        state.completed_sessions
    );
    emit(events, TimerEventKind::Completed, state);

    if !state.should_auto_start_next() {
        return false;
    }
    state.advance();
    state.start(Utc::now());
    emit(events, TimerEventKind::AutoStarted, state);
    true
}

fn emit(events: &broadcast::Sender<TimerEvent>, kind: TimerEventKind, state: &TimerState) {
    let _ = events.send(TimerEvent {
        kind,
        state: state.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_settings() -> TimerSettings {
        TimerSettings {
            work_duration: 5,
            short_break_duration: 3,
            long_break_duration: 4,
            sessions_until_long_break: 2,
            ..TimerSettings::default()
        }
    }

    async fn drain(rx: &mut broadcast::Receiver<TimerEvent>) -> Vec<TimerEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test(start_paused = true)]
    async fn clock_ticks_once_per_second() {
        let timer = TimerController::new(TimerSettings::default());
        timer.start().await;

        time::sleep(Duration::from_millis(10_500)).await;
        let state = timer.get_state().await;
        assert_eq!(state.current_time, 1490);
        assert_eq!(state.status, TimerStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn session_runs_to_completion_and_stops_clock() {
        let timer = TimerController::new(quick_settings());
        let mut events = timer.subscribe_events();
        timer.start().await;

        time::sleep(Duration::from_secs(30)).await;
        let state = timer.get_state().await;
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.current_time, 0);
        assert_eq!(state.completed_sessions, 1);
        assert_eq!(state.history.len(), 1);
        assert_eq!(
            drain(&mut events).await,
            vec![TimerEventKind::Started, TimerEventKind::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_countdown_and_resume_continues() {
        let timer = TimerController::new(TimerSettings::default());
        let mut events = timer.subscribe_events();
        timer.start().await;
        time::sleep(Duration::from_millis(3_500)).await;
        assert!(timer.pause().await);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(timer.get_state().await.current_time, 1497);

        assert!(timer.start().await);
        time::sleep(Duration::from_millis(2_500)).await;
        let state = timer.get_state().await;
        assert_eq!(state.current_time, 1495);
        assert_eq!(state.current_session, Some(1));
        assert_eq!(
            drain(&mut events).await,
            vec![
                TimerEventKind::Started,
                TimerEventKind::Paused,
                TimerEventKind::Resumed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_clock_and_records_partial_session() {
        let timer = TimerController::new(TimerSettings::default());
        timer.start().await;
        time::sleep(Duration::from_millis(10_500)).await;

        let record = timer.reset().await.expect("partial session recorded");
        assert_eq!(record.duration, 10);
        assert!(!record.completed);

        time::sleep(Duration::from_secs(5)).await;
        let state = timer.get_state().await;
        assert_eq!(state.current_time, 1500);
        assert_eq!(state.status, TimerStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_start_rolls_into_break() {
        let timer = TimerController::new(TimerSettings {
            auto_start_breaks: true,
            ..quick_settings()
        });
        let mut events = timer.subscribe_events();
        timer.start().await;

        time::sleep(Duration::from_millis(6_500)).await;
        let state = timer.get_state().await;
        assert_eq!(state.session_type, SessionType::ShortBreak);
        assert_eq!(state.status, TimerStatus::Running);
        assert_eq!(state.current_time, 2);
        assert_eq!(state.current_session, Some(2));

        time::sleep(Duration::from_secs(10)).await;
        let state = timer.get_state().await;
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.session_type, SessionType::ShortBreak);
        assert_eq!(
            drain(&mut events).await,
            vec![
                TimerEventKind::Started,
                TimerEventKind::Completed,
                TimerEventKind::AutoStarted,
                TimerEventKind::Completed
            ]
        );
    }

    #[tokio::test]
    async fn correction_respects_divergence_predicate() {
        let timer = TimerController::new(TimerSettings::default());
        timer.start().await;

        let applied = timer
            .correct_remaining_if(1499, |local, remote| local.abs_diff(remote) > 2)
            .await;
        assert_eq!(applied, None);
        assert_eq!(timer.get_state().await.current_time, 1500);

        let applied = timer
            .correct_remaining_if(1495, |local, remote| local.abs_diff(remote) > 2)
            .await;
        assert_eq!(applied, Some(1495));
        assert_eq!(timer.get_state().await.current_time, 1495);
        timer.reset().await;
    }

    #[tokio::test(start_paused = true)]
    async fn correction_to_zero_while_paused_completes_session() {
        let timer = TimerController::new(TimerSettings::default());
        let mut events = timer.subscribe_events();
        timer.start().await;
        time::sleep(Duration::from_millis(3_500)).await;
        timer.pause().await;

        let applied = timer
            .correct_remaining_if(0, |local, remote| local.abs_diff(remote) > 2)
            .await;
        assert_eq!(applied, Some(0));

        assert!(!timer.start().await);
        time::sleep(Duration::from_secs(60)).await;
        let state = timer.get_state().await;
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.current_time, 0);
        assert_eq!(state.completed_sessions, 1);
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].completed);
        assert_eq!(
            drain(&mut events).await,
            vec![
                TimerEventKind::Started,
                TimerEventKind::Paused,
                TimerEventKind::Corrected,
                TimerEventKind::Completed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paused_completion_auto_starts_with_a_running_clock() {
        let timer = TimerController::new(TimerSettings {
            auto_start_breaks: true,
            ..quick_settings()
        });
        timer.start().await;
        time::sleep(Duration::from_millis(1_500)).await;
        timer.pause().await;

        timer
            .correct_remaining_if(0, |local, remote| local.abs_diff(remote) > 2)
            .await;
        let state = timer.get_state().await;
        assert_eq!(state.session_type, SessionType::ShortBreak);
        assert_eq!(state.status, TimerStatus::Running);

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(timer.get_state().await.current_time, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_session_is_never_corrected() {
        let timer = TimerController::new(quick_settings());
        timer.start().await;
        time::sleep(Duration::from_secs(10)).await;

        let applied = timer
            .correct_remaining_if(3, |local, remote| local.abs_diff(remote) > 2)
            .await;
        assert_eq!(applied, None);
        let state = timer.get_state().await;
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.current_time, 0);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let timer = TimerController::new(TimerSettings::default());
        let result = timer
            .update_settings(TimerSettingsPatch {
                short_break_duration: Some(0),
                ..TimerSettingsPatch::default()
            })
            .await;
        assert!(result.is_err());
        assert_eq!(timer.get_state().await.settings, TimerSettings::default());
    }
}
