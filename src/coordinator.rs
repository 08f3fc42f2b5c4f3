use std::sync::Arc;

use chrono::Utc;
use futures::{future::BoxFuture, FutureExt};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    notifications::{NotificationLevel, NotificationSink, UiNotification},
    sync::{
        drift_exceeds, InboundReactor, MessageKind, Subscription, SyncChannel, SyncMessage,
        SyncPayload, TimerSyncData,
    },
    timer::{SessionRecord, TimerController, TimerEventKind},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const SYNC_TITLE: &str = "Timer Sync";

/// Applies inbound messages to the local timer and the notification sink.
pub struct TimerReactor {
    timer: TimerController,
    notifier: Arc<dyn NotificationSink>,
    drift_threshold_secs: u32,
}

impl TimerReactor {
    pub fn new(
        timer: TimerController,
        notifier: Arc<dyn NotificationSink>,
        drift_threshold_secs: u32,
    ) -> Self {
        Self {
            timer,
            notifier,
            drift_threshold_secs,
        }
    }

    fn toast(&self, message: impl Into<String>, level: NotificationLevel) {
        self.notifier
            .notify(UiNotification::new(SYNC_TITLE, message, level));
    }

    async fn apply(&self, message: &SyncMessage) {
        match &message.payload {
            SyncPayload::TimerUpdate(remote) => {
                let threshold = self.drift_threshold_secs;
                // Remote always wins once the two sides diverge.
                let corrected = self
                    .timer
                    .correct_remaining_if(remote.current_time, |local, remote| {
                        drift_exceeds(local, remote, threshold)
                    })
                    .await;
                if corrected.is_none() {
                    log_debug!("timer_update within drift tolerance");
                }
            }
            SyncPayload::SessionComplete(payload) => {
                self.toast(
                    format!("🎉 {} session completed!", payload.session_type.label()),
                    NotificationLevel::Success,
                );
            }
            SyncPayload::SessionStart(_) => {
                self.timer.start().await;
                self.toast("Session started!", NotificationLevel::Success);
            }
            SyncPayload::SessionPause(_) => {
                self.timer.pause().await;
                self.toast("Session paused", NotificationLevel::Warning);
            }
            SyncPayload::SessionReset(_) => {
                self.timer.reset().await;
                self.toast("Session reset", NotificationLevel::Info);
            }
            SyncPayload::Notification(payload) => {
                self.toast(payload.message.clone(), payload.level);
            }
            SyncPayload::Ping(_) => {}
        }
    }
}

impl InboundReactor for TimerReactor {
    fn snapshot(&self) -> BoxFuture<'_, TimerSyncData> {
        async move {
            let state = self.timer.get_state().await;
            TimerSyncData::from_state(&state, Utc::now())
        }
        .boxed()
    }

    fn react<'a>(&'a self, message: &'a SyncMessage) -> BoxFuture<'a, ()> {
        self.apply(message).boxed()
    }
}

/// Glue between the local timer and the sync channel.
///
/// Holds only handles: the timer owns timer state and the channel owns the
/// connection, so a coordinator can be dropped and re-attached at any time.
/// Dropping the last clone stops its completion listener.
#[derive(Clone)]
pub struct SyncCoordinator {
    timer: TimerController,
    channel: SyncChannel,
    _listener: Arc<DropGuard>,
}

impl SyncCoordinator {
    /// Installs the inbound reactions on `channel` and starts forwarding
    /// local completions to the peer. Must be called inside a runtime.
    pub fn attach(
        timer: TimerController,
        channel: SyncChannel,
        notifier: Arc<dyn NotificationSink>,
        drift_threshold_secs: u32,
    ) -> Self {
        channel.set_reactor(Arc::new(TimerReactor::new(
            timer.clone(),
            notifier,
            drift_threshold_secs,
        )));

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut events = timer.subscribe_events();
        let outbound = channel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => event,
                    _ = cancelled.cancelled() => break,
                };
                match event {
                    Ok(event) => {
                        if !outbound.is_connected() {
                            continue;
                        }
                        match event.kind {
                            TimerEventKind::Completed => {
                                outbound.notify_session_complete(&event.state)
                            }
                            TimerEventKind::AutoStarted => {
                                outbound.notify_session_start(&event.state)
                            }
                            _ => {}
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log_warn!("timer event listener lagged; {skipped} events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            timer,
            channel,
            _listener: Arc::new(token.drop_guard()),
        }
    }

    pub fn timer(&self) -> &TimerController {
        &self.timer
    }

    pub fn channel(&self) -> &SyncChannel {
        &self.channel
    }

    pub async fn start(&self) -> bool {
        let started = self.timer.start().await;
        if started && self.channel.is_connected() {
            let state = self.timer.get_state().await;
            self.channel.notify_session_start(&state);
        }
        started
    }

    pub async fn pause(&self) -> bool {
        let paused = self.timer.pause().await;
        if paused && self.channel.is_connected() {
            let state = self.timer.get_state().await;
            self.channel.notify_session_pause(&state);
        }
        paused
    }

    pub async fn reset(&self) -> Option<SessionRecord> {
        let record = self.timer.reset().await;
        if self.channel.is_connected() {
            let state = self.timer.get_state().await;
            self.channel.notify_session_reset(&state);
        }
        record
    }

    /// Pushes a full `timer_update` snapshot to the peer.
    pub async fn sync_timer_state(&self) {
        if self.channel.is_connected() {
            let state = self.timer.get_state().await;
            self.channel.sync_timer_state(&state);
        }
    }

    pub fn subscribe_timer_updates<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TimerSyncData) + Send + Sync + 'static,
    {
        self.channel
            .subscribe(MessageKind::TimerUpdate, move |message| {
                if let SyncPayload::TimerUpdate(data) = &message.payload {
                    handler(data);
                }
            })
    }

    pub fn subscribe_session_complete<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncMessage) + Send + Sync + 'static,
    {
        self.channel.subscribe(MessageKind::SessionComplete, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notifications::RecordingNotifier,
        sync::message::{
            NotificationPayload, PingPayload, SessionPausePayload, SessionStartPayload,
        },
        timer::{SessionType, TimerSettings, TimerState, TimerStatus},
    };

    fn reactor() -> (TimerReactor, TimerController, RecordingNotifier) {
        reactor_with(TimerSettings::default())
    }

    fn reactor_with(settings: TimerSettings) -> (TimerReactor, TimerController, RecordingNotifier) {
        let timer = TimerController::new(settings);
        let notifier = RecordingNotifier::new();
        let reactor = TimerReactor::new(timer.clone(), Arc::new(notifier.clone()), 2);
        (reactor, timer, notifier)
    }

    fn message(payload: SyncPayload) -> SyncMessage {
        SyncMessage::new(payload, Utc::now(), Some("peer".into()))
    }

    fn remote_update(current_time: u32) -> SyncMessage {
        message(SyncPayload::TimerUpdate(TimerSyncData {
            current_time,
            initial_time: 1500,
            status: TimerStatus::Running,
            session_type: SessionType::Work,
            current_session: Some(1),
            completed_sessions: 0,
            last_update: Utc::now(),
        }))
    }

    #[tokio::test]
    async fn large_drift_is_overwritten_by_remote() {
        let (reactor, timer, _) = reactor();
        reactor.react(&remote_update(1495)).await;
        assert_eq!(timer.get_state().await.current_time, 1495);
    }

    #[tokio::test]
    async fn small_drift_is_tolerated() {
        let (reactor, timer, _) = reactor();
        reactor.react(&remote_update(1499)).await;
        assert_eq!(timer.get_state().await.current_time, 1500);
    }

    fn assert_consistent(state: &TimerState) {
        assert!(state.current_time <= state.initial_time);
        if state.status == TimerStatus::Finished {
            assert_eq!(state.current_time, 0);
        }
        if state.status == TimerStatus::Running {
            assert!(state.current_time > 0);
        }
    }

    #[tokio::test]
    async fn idle_timer_ignores_remote_zero() {
        let (reactor, timer, _) = reactor();
        reactor.react(&remote_update(0)).await;

        let state = timer.get_state().await;
        assert_consistent(&state);
        assert_eq!(state.status, TimerStatus::Idle);
        assert_eq!(state.current_time, 1500);
    }

    #[tokio::test]
    async fn remote_zero_completes_running_session() {
        let (reactor, timer, _) = reactor();
        timer.start().await;
        reactor.react(&remote_update(0)).await;

        let state = timer.get_state().await;
        assert_consistent(&state);
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.completed_sessions, 1);
    }

    #[tokio::test]
    async fn paused_timer_follows_remote_and_completes_at_zero() {
        let (reactor, timer, _) = reactor();
        timer.start().await;
        timer.pause().await;

        reactor.react(&remote_update(1200)).await;
        let state = timer.get_state().await;
        assert_consistent(&state);
        assert_eq!(state.status, TimerStatus::Paused);
        assert_eq!(state.current_time, 1200);

        reactor.react(&remote_update(0)).await;
        let state = timer.get_state().await;
        assert_consistent(&state);
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.completed_sessions, 1);
        assert!(state.history[0].completed);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_timer_ignores_lagging_peer() {
        let (reactor, timer, _) = reactor_with(TimerSettings {
            work_duration: 3,
            ..TimerSettings::default()
        });
        timer.start().await;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        reactor.react(&remote_update(3)).await;
        let state = timer.get_state().await;
        assert_consistent(&state);
        assert_eq!(state.status, TimerStatus::Finished);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn remote_lifecycle_drives_local_timer() {
        let (reactor, timer, notifier) = reactor();

        reactor
            .react(&message(SyncPayload::SessionStart(SessionStartPayload {
                session_type: SessionType::Work,
                duration: 1500,
            })))
            .await;
        assert_eq!(timer.get_state().await.status, TimerStatus::Running);

        reactor
            .react(&message(SyncPayload::SessionPause(SessionPausePayload {
                remaining_time: 1500,
            })))
            .await;
        assert_eq!(timer.get_state().await.status, TimerStatus::Paused);

        let levels: Vec<NotificationLevel> =
            notifier.take().into_iter().map(|note| note.level).collect();
        assert_eq!(
            levels,
            vec![NotificationLevel::Success, NotificationLevel::Warning]
        );
    }

    #[tokio::test]
    async fn notifications_are_forwarded_and_pings_ignored() {
        let (reactor, timer, notifier) = reactor();
        reactor
            .react(&message(SyncPayload::Notification(NotificationPayload {
                message: "Team break in 5".into(),
                level: NotificationLevel::Warning,
            })))
            .await;
        reactor
            .react(&message(SyncPayload::Ping(PingPayload {})))
            .await;

        let notes = notifier.take();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message, "Team break in 5");
        assert_eq!(notes[0].title, SYNC_TITLE);
        assert_eq!(notes[0].duration_ms, 5000);
        assert_eq!(timer.get_state().await.status, TimerStatus::Idle);
    }

    #[tokio::test]
    async fn snapshot_mirrors_timer_state() {
        let (reactor, timer, _) = reactor();
        timer.start().await;
        let snapshot = reactor.snapshot().await;
        assert_eq!(snapshot.current_time, 1500);
        assert_eq!(snapshot.status, TimerStatus::Running);
        assert_eq!(snapshot.current_session, Some(1));
        timer.reset().await;
    }
}
