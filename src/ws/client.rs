use kameo::Actor;
use kameo::prelude::ActorRef;

use super::actor::{
    ConnectionSnapshot, GetConnectionSnapshot, NotificationActor, NotificationActorArgs,
    NotificationCommand,
};
use crate::config::RealtimeConfig;
use crate::core::{
    EventDispatcher, JsonHeartbeat, LinearBackoffReconnect, RealtimeEvent, RealtimeEventKind,
    Subscription, WebSocketError, WebSocketResult, WsPingPongStrategy, WsReconnectStrategy,
};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Owned handle to one notification connection.
///
/// Construct one per application instance at the composition root and pass it to the
/// components that need it. Must be created inside a tokio runtime.
pub struct NotificationClient<T = TungsteniteTransport, R = LinearBackoffReconnect, P = JsonHeartbeat>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    actor: ActorRef<NotificationActor<T, R, P>>,
    dispatcher: EventDispatcher,
}

impl NotificationClient {
    /// Client over a real websocket using the configured endpoint and policies.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::spawn(NotificationActorArgs {
            endpoint: config.notification_endpoint(),
            transport: TungsteniteTransport::default(),
            reconnect_strategy: LinearBackoffReconnect::new(
                config.reconnect_base_delay,
                config.max_reconnect_attempts,
            ),
            ping_strategy: JsonHeartbeat::new(config.heartbeat_interval),
            dispatcher: EventDispatcher::new(),
        })
    }
}

impl<T, R, P> NotificationClient<T, R, P>
where
    T: WsTransport,
    R: WsReconnectStrategy,
    P: WsPingPongStrategy,
{
    pub fn spawn(args: NotificationActorArgs<T, R, P>) -> Self {
        let dispatcher = args.dispatcher.clone();
        let actor = NotificationActor::spawn(args);
        Self { actor, dispatcher }
    }

    /// Open the socket for `user_id`. No-op while a connection is active or being opened.
    pub async fn connect(&self, user_id: u64) -> WebSocketResult<()> {
        self.actor
            .ask(NotificationCommand::Connect { user_id })
            .await
            .map_err(|err| WebSocketError::ActorError(err.to_string()))
    }

    /// Tear the connection down and forget the user. Safe to call repeatedly.
    pub async fn disconnect(&self) -> WebSocketResult<()> {
        self.actor
            .ask(NotificationCommand::Disconnect)
            .await
            .map_err(|err| WebSocketError::ActorError(err.to_string()))
    }

    pub fn on<F>(&self, kind: RealtimeEventKind, callback: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.dispatcher.on(kind, callback)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub async fn snapshot(&self) -> WebSocketResult<ConnectionSnapshot> {
        self.actor
            .ask(GetConnectionSnapshot)
            .await
            .map_err(|err| WebSocketError::ActorError(err.to_string()))
    }

    /// Disconnect, drop every listener and stop the actor.
    pub async fn dispose(self) {
        let _ = self.disconnect().await;
        self.dispatcher.clear();
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
    }
}
