//! Notification connection manager.
//!
//! The socket IO loop runs in a spawned reader task; the actor owns the connection state,
//! the writer and every timer, and receives frames, closes and timer ticks as messages. The
//! mailbox serializes them so socket and timer callbacks never overlap.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{
    EventDispatcher, InboundMessage, JsonHeartbeat, LinearBackoffReconnect, RealtimeEvent,
    WebSocketError, WebSocketResult, WsConnectionStats, WsConnectionStatus, WsDisconnectCause,
    WsFrame, WsHealthMonitor, WsPingPongStrategy, WsReconnectStrategy,
};
use crate::config::NotificationEndpoint;
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};

const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Arguments passed when constructing a notification actor.
pub struct NotificationActorArgs<T = TungsteniteTransport, R = LinearBackoffReconnect, P = JsonHeartbeat>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    pub endpoint: NotificationEndpoint,
    pub transport: T,
    pub reconnect_strategy: R,
    pub ping_strategy: P,
    pub dispatcher: EventDispatcher,
}

pub struct NotificationActor<T = TungsteniteTransport, R = LinearBackoffReconnect, P = JsonHeartbeat>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    endpoint: NotificationEndpoint,
    transport: T,
    reconnect: R,
    ping: P,
    dispatcher: EventDispatcher,
    health: WsHealthMonitor,
    actor_ref: ActorRef<Self>,
    status: WsConnectionStatus,
    user_id: Option<u64>,
    /// Bumped on every open and every explicit disconnect; tasks carry the value they
    /// were spawned with so late events from a previous socket are ignored.
    generation: u64,
    writer: Option<T::Writer>,
    /// In-flight handshake; aborted when the connection is abandoned before it opens.
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    ping_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T, R, P> Actor for NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    type Args = NotificationActorArgs<T, R, P>;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "NotificationActor"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> WebSocketResult<Self> {
        let NotificationActorArgs {
            endpoint,
            transport,
            reconnect_strategy,
            ping_strategy,
            dispatcher,
        } = args;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            endpoint,
            transport,
            reconnect: reconnect_strategy,
            ping: ping_strategy,
            dispatcher,
            health: WsHealthMonitor::new(),
            actor_ref,
            status: WsConnectionStatus::Disconnected,
            user_id: None,
            generation: 0,
            writer: None,
            connect_task: None,
            reader_task: None,
            ping_task: None,
            reconnect_task: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> WebSocketResult<()> {
        self.cancel_handshake();
        self.cancel_reconnect_timer();
        self.teardown_socket().await;
        Ok(())
    }
}

/// Public commands accepted by the notification actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCommand {
    Connect { user_id: u64 },
    Disconnect,
}

/// Socket and timer callbacks, each tagged with the generation it belongs to.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Inbound { generation: u64, frame: WsFrame },
    Closed { generation: u64, cause: WsDisconnectCause },
    HeartbeatTick { generation: u64 },
    ReconnectDue { generation: u64 },
}

pub(crate) struct ConnectionEstablished<T: WsTransport> {
    generation: u64,
    reader: T::Reader,
    writer: T::Writer,
}

pub(crate) struct ConnectionFailed {
    generation: u64,
    error: String,
}

/// Query the current connection state.
#[derive(Debug, Clone, Copy)]
pub struct GetConnectionSnapshot;

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub status: WsConnectionStatus,
    pub user_id: Option<u64>,
    pub reconnect_attempts: u32,
    pub heartbeat_active: bool,
    pub reconnect_pending: bool,
    pub stats: WsConnectionStats,
}

impl<T, R, P> KameoMessage<NotificationCommand> for NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        command: NotificationCommand,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match command {
            NotificationCommand::Connect { user_id } => self.handle_connect(user_id),
            NotificationCommand::Disconnect => self.handle_disconnect().await,
        }
        Ok(())
    }
}

impl<T, R, P> KameoMessage<ConnectionEvent> for NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    type Reply = ();

    async fn handle(&mut self, event: ConnectionEvent, _ctx: &mut Context<Self, Self::Reply>) {
        match event {
            ConnectionEvent::Inbound { generation, frame } => {
                if self.is_current(generation) {
                    self.process_inbound(frame);
                }
            }
            ConnectionEvent::Closed { generation, cause } => {
                if self.is_current(generation) {
                    self.handle_close(cause).await;
                } else {
                    debug!(generation, current = self.generation, "ignoring close of stale socket");
                }
            }
            ConnectionEvent::HeartbeatTick { generation } => {
                if self.is_current(generation) {
                    self.send_heartbeat().await;
                }
            }
            ConnectionEvent::ReconnectDue { generation } => {
                if !self.is_current(generation) {
                    return;
                }
                // The timer fired; its handle is finished.
                self.reconnect_task = None;
                if self.user_id.is_some() && self.status == WsConnectionStatus::Disconnected {
                    self.open();
                }
            }
        }
    }
}

impl<T, R, P> KameoMessage<ConnectionEstablished<T>> for NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) {
        let ConnectionEstablished {
            generation,
            reader,
            mut writer,
        } = msg;

        if self.is_current(generation) {
            self.connect_task = None;
        }
        if !self.is_current(generation) || self.status != WsConnectionStatus::Connecting {
            debug!(generation, "closing socket opened for a superseded connect");
            let _ = tokio::time::timeout(WRITER_CLOSE_TIMEOUT, writer.close()).await;
            return;
        }

        self.on_connection_established(reader, writer);
    }
}

impl<T, R, P> KameoMessage<ConnectionFailed> for NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    type Reply = ();

    async fn handle(&mut self, msg: ConnectionFailed, _ctx: &mut Context<Self, Self::Reply>) {
        if !self.is_current(msg.generation) {
            return;
        }
        self.connect_task = None;
        self.handle_close(WsDisconnectCause::HandshakeFailed { message: msg.error })
            .await;
    }
}

impl<T, R, P> KameoMessage<GetConnectionSnapshot> for NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    type Reply = WebSocketResult<ConnectionSnapshot>;

    async fn handle(
        &mut self,
        _msg: GetConnectionSnapshot,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(ConnectionSnapshot {
            status: self.status,
            user_id: self.user_id,
            reconnect_attempts: self.reconnect.attempts(),
            heartbeat_active: self.ping_task.is_some(),
            reconnect_pending: self
                .reconnect_task
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            stats: self.health.get_stats(),
        })
    }
}

impl<T, R, P> NotificationActor<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    #[inline]
    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn handle_connect(&mut self, user_id: u64) {
        if self.status != WsConnectionStatus::Disconnected {
            debug!(
                user_id,
                status = ?self.status,
                "connect ignored: notification socket already active"
            );
            return;
        }

        self.user_id = Some(user_id);
        self.reconnect.reset();
        self.cancel_reconnect_timer();
        self.open();
    }

    async fn handle_disconnect(&mut self) {
        self.cancel_handshake();
        self.cancel_reconnect_timer();
        self.teardown_socket().await;
        self.user_id = None;
        self.reconnect.reset();
        self.generation = self.generation.wrapping_add(1);

        if self.status != WsConnectionStatus::Disconnected {
            self.status = WsConnectionStatus::Disconnected;
            info!(generation = self.generation, "notification socket disconnected");
            self.dispatcher.emit(&RealtimeEvent::Disconnected);
        }
    }

    fn open(&mut self) {
        let Some(user_id) = self.user_id else {
            return;
        };

        self.cancel_handshake();
        self.generation = self.generation.wrapping_add(1);
        self.status = WsConnectionStatus::Connecting;

        let url = self.endpoint.url(user_id);
        let generation = self.generation;
        let transport = self.transport.clone();
        let actor_ref = self.actor_ref.clone();
        info!(connection = %url, user_id, generation, "opening notification socket");

        self.connect_task = Some(tokio::spawn(async move {
            match transport.connect(url).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            generation,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed {
                            generation,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        }));
    }

    fn on_connection_established(&mut self, mut reader: T::Reader, writer: T::Writer) {
        let generation = self.generation;
        self.status = WsConnectionStatus::Connected;
        self.reconnect.reset();
        self.ping.reset();
        self.health.reset();
        self.writer = Some(writer);

        let reader_actor_ref = self.actor_ref.clone();
        let mut reader_shutdown = self.shutdown_rx.clone();
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = reader_shutdown.changed() => {
                        if res.is_err() || *reader_shutdown.borrow_and_update() { break; }
                    }
                    message = reader.next() => {
                        let cause = match message {
                            Some(Ok(WsFrame::Close(frame))) => WsDisconnectCause::RemoteClosed {
                                code: frame.as_ref().map(|f| f.code),
                                reason: frame
                                    .map(|f| String::from_utf8_lossy(f.reason.as_ref()).into_owned())
                                    .unwrap_or_default(),
                            },
                            Some(Ok(frame)) => {
                                let sent = reader_actor_ref
                                    .tell(ConnectionEvent::Inbound { generation, frame })
                                    .send()
                                    .await;
                                if sent.is_err() {
                                    break;
                                }
                                continue;
                            }
                            Some(Err(err)) => WsDisconnectCause::ReadFailure { error: err.to_string() },
                            None => WsDisconnectCause::StreamEnded,
                        };
                        let _ = reader_actor_ref
                            .tell(ConnectionEvent::Closed { generation, cause })
                            .send()
                            .await;
                        break;
                    }
                }
            }
        }));

        self.start_heartbeat(generation);

        info!(
            connection = %self.connection_label(),
            generation,
            "notification socket connected"
        );
        self.dispatcher.emit(&RealtimeEvent::Connected);
    }

    fn start_heartbeat(&mut self, generation: u64) {
        self.stop_heartbeat();

        let interval = self.ping.interval();
        if interval.is_zero() {
            info!(connection = %self.connection_label(), "heartbeat disabled");
            return;
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        let actor_ref = self.actor_ref.clone();
        self.ping_task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow() { break; }
                    }
                    _ = ticker.tick() => {
                        let sent = actor_ref
                            .tell(ConnectionEvent::HeartbeatTick { generation })
                            .send()
                            .await;
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.ping_task.take() {
            handle.abort();
        }
    }

    async fn send_heartbeat(&mut self) {
        if self.status != WsConnectionStatus::Connected {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let Some(frame) = self.ping.create_ping() else {
            return;
        };

        match writer.send(frame).await {
            Ok(()) => {
                self.health.record_ping();
                debug!(connection = %self.connection_label(), "sent heartbeat ping");
            }
            Err(err) => {
                // The reader observes the broken socket and drives the close path.
                self.health.record_error();
                warn!(
                    connection = %self.connection_label(),
                    error = %err,
                    "heartbeat ping send failed"
                );
            }
        }
    }

    fn process_inbound(&mut self, frame: WsFrame) {
        self.health.record_message();

        let Some(payload) = frame.payload() else {
            // Protocol-level ping/pong; tungstenite answers pings itself.
            return;
        };

        match InboundMessage::decode(payload) {
            Ok(InboundMessage::Pong) => {
                if let Some(rtt) = self.ping.record_pong() {
                    self.health.record_rtt(rtt);
                }
            }
            Ok(InboundMessage::Notification(notification)) => {
                self.health.record_notification();
                debug!(
                    connection = %self.connection_label(),
                    notification_id = notification.id,
                    kind = %notification.kind,
                    "notification received"
                );
                self.dispatcher
                    .emit(&RealtimeEvent::Notification(notification));
            }
            Err(err @ WebSocketError::UnknownMessage(_)) => {
                self.health.record_dropped_frame();
                debug!(connection = %self.connection_label(), error = %err, "dropping frame");
            }
            Err(err) => {
                self.health.record_dropped_frame();
                warn!(
                    connection = %self.connection_label(),
                    error = %err,
                    payload_len = payload.len(),
                    "dropping malformed frame"
                );
            }
        }
    }

    async fn handle_close(&mut self, cause: WsDisconnectCause) {
        if let Some(error) = cause.error_description() {
            self.health.record_error();
            self.dispatcher.emit(&RealtimeEvent::Error(error));
        }

        self.teardown_socket().await;
        self.status = WsConnectionStatus::Disconnected;
        info!(
            connection = %self.connection_label(),
            cause = ?cause,
            "notification socket closed"
        );
        self.dispatcher.emit(&RealtimeEvent::Disconnected);

        self.schedule_reconnect(&cause);
    }

    fn schedule_reconnect(&mut self, cause: &WsDisconnectCause) {
        let Some(user_id) = self.user_id else {
            return;
        };

        if !self.reconnect.should_retry() {
            let attempts = self.reconnect.attempts();
            warn!(
                connection = %self.connection_label(),
                user_id,
                attempts,
                cause = ?cause,
                "notification reconnect attempts exhausted"
            );
            self.dispatcher
                .emit(&RealtimeEvent::ReconnectExhausted { attempts });
            return;
        }

        let delay = self.reconnect.next_delay();
        let attempt = self.reconnect.attempts();
        self.health.increment_reconnect();

        warn!(
            connection = %self.connection_label(),
            user_id,
            attempt,
            delay_ms = delay.as_millis().min(u64::MAX as u128) as u64,
            cause = ?cause,
            "notification reconnect scheduled"
        );

        self.cancel_reconnect_timer();
        let generation = self.generation;
        let actor_ref = self.actor_ref.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = actor_ref
                .tell(ConnectionEvent::ReconnectDue { generation })
                .send()
                .await;
        }));
    }

    /// Dropping the connect future drops any half-open socket with it.
    fn cancel_handshake(&mut self) {
        if let Some(handle) = self.connect_task.take() {
            handle.abort();
        }
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(handle) = self.reconnect_task.take() {
            handle.abort();
        }
    }

    /// Stop heartbeat and reader, then close and drop the writer.
    async fn teardown_socket(&mut self) {
        self.stop_heartbeat();

        let _ = self.shutdown_tx.send(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
        self.reader_task = None;

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(WRITER_CLOSE_TIMEOUT, writer.close())
                .await
                .is_err()
            {
                debug!(connection = %self.connection_label(), "writer close timed out");
            }
        }
    }

    fn connection_label(&self) -> String {
        match self.user_id {
            Some(user_id) => self.endpoint.url(user_id),
            None => self.endpoint.host().to_string(),
        }
    }
}
