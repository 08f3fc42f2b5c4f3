use std::{fmt, sync::Arc};

use chrono::Utc;
use futures::future::BoxFuture;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SyncConfig,
    error::{SyncError, SyncResult},
    notifications::{NotificationLevel, NotificationSink, UiNotification},
    timer::TimerState,
};

use super::{
    backoff::ReconnectPolicy,
    message::{
        MessageKind, PingPayload, SessionCompletePayload, SessionPausePayload,
        SessionResetPayload, SessionStartPayload, SyncMessage, SyncPayload, TimerSyncData,
    },
    subscribers::{SubscriberRegistry, Subscription},
    transport::{Connector, Frame, TransportLink, NORMAL_CLOSURE},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closing => "CLOSING",
        };
        f.write_str(label)
    }
}

/// Local side effects for inbound messages. Runs inside the channel's
/// dispatch, before any subscriber sees the message.
pub trait InboundReactor: Send + Sync + 'static {
    /// Current timer state, pushed to the peer right after each connect.
    fn snapshot(&self) -> BoxFuture<'_, TimerSyncData>;

    fn react<'a>(&'a self, message: &'a SyncMessage) -> BoxFuture<'a, ()>;
}

/// True when local and remote remaining time disagree by more than the
/// tolerated number of seconds.
pub fn drift_exceeds(local_remaining: u32, remote_remaining: u32, threshold_secs: u32) -> bool {
    local_remaining.abs_diff(remote_remaining) > threshold_secs
}

pub fn generate_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("user_{}_{}", Utc::now().timestamp_millis(), suffix)
}

pub fn endpoint_with_client(address: &str, client_id: &str) -> String {
    let separator = if address.contains('?') { '&' } else { '?' };
    format!("{address}{separator}userId={client_id}")
}

enum Command {
    Connect {
        address: String,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send(SyncPayload),
    SetReactor(Option<Arc<dyn InboundReactor>>),
}

enum Event {
    LinkOpened {
        generation: u64,
        result: SyncResult<TransportLink>,
    },
    Inbound {
        generation: u64,
        frame: Frame,
    },
    HeartbeatDue {
        generation: u64,
    },
    ReconnectDue {
        ticket: u64,
    },
}

struct Shared {
    client_id: String,
    default_address: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    subscribers: SubscriberRegistry,
}

/// Handle to the realtime sync connection.
///
/// All connection state lives in a single actor task; the handle only posts
/// commands to it, so connects, inbound frames, heartbeats and reconnect
/// timers are processed one at a time in arrival order. Cloning the handle
/// is cheap. The actor shuts down (closing the link normally) once every
/// handle is dropped.
#[derive(Clone)]
pub struct SyncChannel {
    shared: Arc<Shared>,
}

impl SyncChannel {
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let client_id = generate_client_id();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let subscribers = SubscriberRegistry::new();

        let actor = ChannelActor {
            policy: ReconnectPolicy::from_config(&config),
            address: config.url.clone(),
            config: config.clone(),
            client_id: client_id.clone(),
            connector,
            notifier,
            reactor: None,
            subscribers: subscribers.clone(),
            state: state_tx,
            commands: commands_rx,
            events_tx,
            events_rx,
            generation: 0,
            link: None,
            pending_connects: Vec::new(),
            automatic_attempt: false,
            reconnect_ticket: 0,
            reconnect_timer: None,
            exhaustion_reported: false,
        };
        tokio::spawn(actor.run());

        Self {
            shared: Arc::new(Shared {
                client_id,
                default_address: config.url,
                commands: commands_tx,
                state: state_rx,
                subscribers,
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Receiver for status indicators; yields every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// Opens the link. Resolves immediately if already connected or
    /// connecting; otherwise waits for the handshake, failure, or timeout.
    pub async fn connect(&self, address: &str) -> SyncResult<()> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Connect {
            address: address.to_string(),
            reply,
        })?;
        response.await.map_err(|_| SyncError::ChannelClosed)?
    }

    pub async fn connect_default(&self) -> SyncResult<()> {
        let address = self.shared.default_address.clone();
        self.connect(&address).await
    }

    /// Closes the link with a normal closure. Pending heartbeats and
    /// scheduled reconnects are cancelled; nothing reconnects afterwards.
    pub async fn disconnect(&self) {
        let (reply, response) = oneshot::channel();
        if self.post(Command::Disconnect { reply }).is_ok() {
            let _ = response.await;
        }
    }

    /// Stamps and transmits a payload. Dropped with a warning when the
    /// channel is not connected.
    pub fn send(&self, payload: SyncPayload) {
        if !self.is_connected() {
            log_warn!(
                "{}; {:?} not sent",
                SyncError::SendRejected,
                payload.kind()
            );
            return;
        }
        if let Err(err) = self.post(Command::Send(payload)) {
            log_warn!("{err}; message not sent");
        }
    }

    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> Subscription
    where
        F: Fn(&SyncMessage) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(kind, Arc::new(handler))
    }

    /// Installs (or replaces) the local reaction to inbound messages.
    pub fn set_reactor(&self, reactor: Arc<dyn InboundReactor>) {
        let _ = self.post(Command::SetReactor(Some(reactor)));
    }

    pub fn clear_reactor(&self) {
        let _ = self.post(Command::SetReactor(None));
    }

    pub fn sync_timer_state(&self, state: &TimerState) {
        self.send(SyncPayload::TimerUpdate(TimerSyncData::from_state(
            state,
            Utc::now(),
        )));
    }

    pub fn notify_session_start(&self, state: &TimerState) {
        self.send(SyncPayload::SessionStart(SessionStartPayload {
            session_type: state.session_type,
            duration: state.initial_time,
        }));
    }

    pub fn notify_session_pause(&self, state: &TimerState) {
        self.send(SyncPayload::SessionPause(SessionPausePayload {
            remaining_time: state.current_time,
        }));
    }

    pub fn notify_session_reset(&self, state: &TimerState) {
        self.send(SyncPayload::SessionReset(SessionResetPayload {
            session_type: state.session_type,
        }));
    }

    pub fn notify_session_complete(&self, state: &TimerState) {
        self.send(SyncPayload::SessionComplete(SessionCompletePayload {
            session_type: state.session_type,
            duration: state.initial_time,
            completed_sessions: state.completed_sessions,
        }));
    }

    fn post(&self, command: Command) -> SyncResult<()> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| SyncError::ChannelClosed)
    }
}

struct ActiveLink {
    outgoing: mpsc::UnboundedSender<Frame>,
    tasks: CancellationToken,
}

struct ChannelActor {
    config: SyncConfig,
    client_id: String,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn NotificationSink>,
    reactor: Option<Arc<dyn InboundReactor>>,
    subscribers: SubscriberRegistry,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    address: String,
    /// Bumped on every connect attempt and local disconnect; events tagged
    /// with an older generation belong to a link we no longer own.
    generation: u64,
    link: Option<ActiveLink>,
    pending_connects: Vec<oneshot::Sender<SyncResult<()>>>,
    automatic_attempt: bool,
    policy: ReconnectPolicy,
    reconnect_ticket: u64,
    reconnect_timer: Option<CancellationToken>,
    exhaustion_reported: bool,
}

impl ChannelActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }

        self.cancel_reconnect();
        self.close_link("Client shutting down");
        log_debug!("sync channel actor stopped");
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log_debug!("sync connection {previous} -> {next}");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { address, reply } => {
                match self.current_state() {
                    ConnectionState::Connected | ConnectionState::Connecting => {
                        let _ = reply.send(Ok(()));
                    }
                    ConnectionState::Disconnected | ConnectionState::Closing => {
                        self.address = address;
                        self.cancel_reconnect();
                        self.pending_connects.push(reply);
                        self.begin_connect(false);
                    }
                }
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Send(payload) => self.transmit(payload),
            Command::SetReactor(reactor) => self.reactor = reactor,
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::LinkOpened { generation, result } => {
                self.on_link_opened(generation, result).await;
            }
            Event::Inbound { generation, frame } => {
                if generation != self.generation || self.link.is_none() {
                    return;
                }
                match frame {
                    Frame::Text(text) => self.dispatch(&text).await,
                    Frame::Close { code, reason } => self.on_link_lost(code, &reason),
                }
            }
            Event::HeartbeatDue { generation } => {
                if generation == self.generation
                    && self.current_state() == ConnectionState::Connected
                {
                    self.transmit(SyncPayload::Ping(PingPayload {}));
                }
            }
            Event::ReconnectDue { ticket } => {
                if ticket != self.reconnect_ticket || self.reconnect_timer.take().is_none() {
                    return;
                }
                if self.current_state() != ConnectionState::Disconnected {
                    return;
                }
                log_info!(
                    "Attempting to reconnect... ({}/{})",
                    self.policy.attempts(),
                    self.policy.max_attempts()
                );
                self.begin_connect(true);
            }
        }
    }

    fn begin_connect(&mut self, automatic: bool) {
        self.generation += 1;
        self.automatic_attempt = automatic;
        self.set_state(ConnectionState::Connecting);

        let generation = self.generation;
        let url = endpoint_with_client(&self.address, &self.client_id);
        let timeout = self.config.connect_timeout;
        let opening = self.connector.open(url.clone());
        let events = self.events_tx.clone();

        log_info!("connecting sync channel to {url}");
        tokio::spawn(async move {
            let result = match time::timeout(timeout, opening).await {
                Ok(Ok(link)) => Ok(link),
                Ok(Err(err)) => Err(SyncError::Connect(format!("{err:#}"))),
                Err(_) => Err(SyncError::Timeout(timeout)),
            };
            let _ = events.send(Event::LinkOpened { generation, result });
        });
    }

    async fn on_link_opened(&mut self, generation: u64, result: SyncResult<TransportLink>) {
        let current = generation == self.generation
            && self.current_state() == ConnectionState::Connecting;

        if !current {
            // A local disconnect overtook this handshake; let it finish and
            // close the link cleanly.
            if let Ok(link) = result {
                let _ = link.outgoing.send(Frame::normal_close("Client disconnecting"));
            }
            return;
        }

        match result {
            Ok(link) => {
                self.install_link(link);
                self.policy.reset();
                self.exhaustion_reported = false;
                self.set_state(ConnectionState::Connected);
                log_info!("sync channel connected as {}", self.client_id);

                if let Some(reactor) = self.reactor.clone() {
                    let snapshot = reactor.snapshot().await;
                    self.transmit(SyncPayload::TimerUpdate(snapshot));
                }
                self.resolve_pending(|| Ok(()));
            }
            Err(err) => {
                log_error!("sync connection failed: {err}");
                self.set_state(ConnectionState::Disconnected);
                let mut failure = Some(err);
                self.resolve_pending(|| Err(failure.take().unwrap_or(SyncError::Aborted)));
                if self.automatic_attempt {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn install_link(&mut self, link: TransportLink) {
        let TransportLink {
            outgoing,
            mut incoming,
        } = link;
        let tasks = CancellationToken::new();
        let generation = self.generation;

        let events = self.events_tx.clone();
        let reader_cancel = tasks.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = incoming.recv() => {
                        let Some(frame) = frame else {
                            let _ = events.send(Event::Inbound {
                                generation,
                                frame: Frame::Close {
                                    code: super::transport::ABNORMAL_CLOSURE,
                                    reason: "transport ended".to_string(),
                                },
                            });
                            break;
                        };
                        let closing = matches!(frame, Frame::Close { .. });
                        if events.send(Event::Inbound { generation, frame }).is_err() || closing {
                            break;
                        }
                    }
                    _ = reader_cancel.cancelled() => break,
                }
            }
        });

        let events = self.events_tx.clone();
        let heartbeat_cancel = tasks.clone();
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if events.send(Event::HeartbeatDue { generation }).is_err() {
                            break;
                        }
                    }
                    _ = heartbeat_cancel.cancelled() => break,
                }
            }
        });

        self.link = Some(ActiveLink { outgoing, tasks });
    }

    fn on_link_lost(&mut self, code: u16, reason: &str) {
        if let Some(link) = self.link.take() {
            link.tasks.cancel();
        }
        self.set_state(ConnectionState::Disconnected);

        if code == NORMAL_CLOSURE {
            log_info!("sync channel closed by peer ({code} {reason})");
            return;
        }
        log_warn!("sync channel dropped unexpectedly ({code} {reason})");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let Some(delay) = self.policy.next_delay() else {
            log_error!(
                "giving up on sync server after {} reconnect attempts",
                self.policy.max_attempts()
            );
            if !self.exhaustion_reported {
                self.exhaustion_reported = true;
                self.notifier.notify(UiNotification::new(
                    "Connection lost",
                    format!(
                        "Unable to reach the sync server after {} attempts. Retry to reconnect.",
                        self.policy.max_attempts()
                    ),
                    NotificationLevel::Error,
                ));
            }
            return;
        };

        self.reconnect_ticket += 1;
        let ticket = self.reconnect_ticket;
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let events = self.events_tx.clone();

        log_info!(
            "reconnecting in {:?} (attempt {}/{})",
            delay,
            self.policy.attempts(),
            self.policy.max_attempts()
        );
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    let _ = events.send(Event::ReconnectDue { ticket });
                }
                _ = cancelled.cancelled() => {}
            }
        });
        self.reconnect_timer = Some(cancel);
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn disconnect(&mut self) {
        self.cancel_reconnect();
        self.generation += 1;
        self.resolve_pending(|| Err(SyncError::Aborted));

        if self.link.is_some() {
            self.set_state(ConnectionState::Closing);
            self.close_link("Client disconnecting");
            log_info!("sync channel disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn close_link(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            link.tasks.cancel();
            let _ = link.outgoing.send(Frame::normal_close(reason));
        }
    }

    fn transmit(&self, payload: SyncPayload) {
        let kind = payload.kind();
        let Some(link) = self
            .link
            .as_ref()
            .filter(|_| self.current_state() == ConnectionState::Connected)
        else {
            log_warn!("{}; {kind:?} not sent", SyncError::SendRejected);
            return;
        };

        let message = SyncMessage::new(payload, Utc::now(), Some(self.client_id.clone()));
        match message.to_json() {
            Ok(text) => {
                if link.outgoing.send(Frame::Text(text)).is_err() {
                    log_warn!("sync transport is gone; {kind:?} not sent");
                }
            }
            Err(err) => log_error!("failed to encode {kind:?}: {err}"),
        }
    }

    async fn dispatch(&self, text: &str) {
        let message = match SyncMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                log_warn!("dropping inbound sync message: {err}");
                return;
            }
        };

        if let Some(reactor) = self.reactor.as_ref() {
            reactor.react(&message).await;
        }
        self.subscribers.dispatch(&message);
    }

    fn resolve_pending<F>(&mut self, mut outcome: F)
    where
        F: FnMut() -> SyncResult<()>,
    {
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(outcome());
        }
    }
}
