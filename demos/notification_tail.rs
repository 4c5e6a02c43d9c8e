use std::time::Duration;

use gala_realtime::config::RealtimeConfig;
use gala_realtime::transport::tungstenite::install_rustls_crypto_provider;
use gala_realtime::ws::{
    DEFAULT_INBOX_CAPACITY, NotificationClient, NotificationInbox, RealtimeEvent,
    RealtimeEventKind,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "notification_tail\n\
  Opens the notification socket for one user and logs every event until Ctrl-C.\n\
\n\
USAGE:\n\
  cargo run --example notification_tail -- <user-id>\n\
\n\
ENVIRONMENT:\n\
  GALA_API_URL     backend origin (default http://localhost:8000)\n\
  GALA_WS_HOST     websocket host override\n\
  GALA_WS_SECURE   force wss (true/false)\n\
  RUST_LOG         tracing filter (default info)\n\
"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(user_id) = std::env::args().nth(1).and_then(|arg| arg.parse::<u64>().ok()) else {
        eprintln!("{}", usage());
        std::process::exit(2);
    };

    let config = match RealtimeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}\n\n{}", usage());
            std::process::exit(2);
        }
    };

    install_rustls_crypto_provider();
    let client = NotificationClient::from_config(&config);
    let inbox = NotificationInbox::attach(client.dispatcher(), DEFAULT_INBOX_CAPACITY);

    for kind in [
        RealtimeEventKind::Connected,
        RealtimeEventKind::Disconnected,
        RealtimeEventKind::Notification,
        RealtimeEventKind::Error,
        RealtimeEventKind::ReconnectExhausted,
    ] {
        let _ = client.on(kind, |event| match event {
            RealtimeEvent::Connected => info!("connected"),
            RealtimeEvent::Disconnected => info!("disconnected"),
            RealtimeEvent::Notification(n) => {
                info!(id = n.id, kind = %n.kind, title = %n.title, "{}", n.message)
            }
            RealtimeEvent::Error(message) => warn!(%message, "socket error"),
            RealtimeEvent::ReconnectExhausted { attempts } => {
                error!(attempts, "giving up; restart to retry")
            }
        });
    }

    if let Err(err) = client.connect(user_id).await {
        error!(error = %err, "connect failed");
        return;
    }

    let mut report = tokio::time::interval(Duration::from_secs(60));
    report.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                if let Ok(snapshot) = client.snapshot().await {
                    info!(
                        status = ?snapshot.status,
                        unread = inbox.unread_count(),
                        messages = snapshot.stats.messages,
                        p50_rtt_us = snapshot.stats.p50_heartbeat_rtt_us,
                        "connection report"
                    );
                }
            }
        }
    }

    client.dispose().await;
}
