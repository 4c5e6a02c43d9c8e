use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use gala_realtime::config::NotificationEndpoint;
use gala_realtime::testing::{MockServer, MockSocket, MockTransport, NoReconnect};
use gala_realtime::ws::{
    EventDispatcher, JsonHeartbeat, NotificationActorArgs, NotificationClient, NotificationInbox,
    PING_FRAME, RealtimeEvent, RealtimeEventKind, WsConnectionStatus, WsFrame,
};
use tokio::sync::mpsc;

type MockClient = NotificationClient<MockTransport, NoReconnect, JsonHeartbeat>;

const NOTIFICATION: &str = r#"{"type":"notification","notification":{"id":11,"type":"booking_confirmed","title":"Booking confirmed","message":"Your dress is reserved for Saturday","is_read":false,"created_at":"2024-05-01T09:30:00Z"}}"#;

async fn connected_client(heartbeat: Duration) -> (MockClient, MockServer, MockSocket) {
    let (transport, mut server) = MockTransport::channel_pair();
    let client = NotificationClient::spawn(NotificationActorArgs {
        endpoint: NotificationEndpoint::new("mock", false),
        transport,
        reconnect_strategy: NoReconnect,
        ping_strategy: JsonHeartbeat::new(heartbeat),
        dispatcher: EventDispatcher::new(),
    });

    client.connect(5).await.expect("connect accepted");
    let socket = server
        .accept_timeout(Duration::from_secs(1))
        .await
        .expect("socket opened");
    wait_until_connected(&client, Duration::from_secs(1)).await;
    (client, server, socket)
}

async fn wait_until_connected(client: &MockClient, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let status = client.snapshot().await.expect("snapshot").status;
        if status == WsConnectionStatus::Connected {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for connected status");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notifications_reach_listeners_and_noise_is_dropped() {
    let (client, _server, socket) = connected_client(Duration::from_secs(30)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.on(RealtimeEventKind::Notification, move |event| {
        let _ = tx.send(event.clone());
    });
    let mut inbox = NotificationInbox::attach(client.dispatcher(), 10);

    socket.send_text(r#"{"type":"pong"}"#).unwrap();
    socket.send_text("{definitely not json").unwrap();
    socket.send_text(r#"{"type":"presence","user":5}"#).unwrap();
    socket
        .send_inbound(WsFrame::Ping(bytes::Bytes::from_static(b"hb")))
        .unwrap();
    socket.send_text(NOTIFICATION).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("notification delivered")
        .expect("listener alive");
    let RealtimeEvent::Notification(notification) = event else {
        panic!("unexpected event {event:?}");
    };
    assert_eq!(notification.id, 11);
    assert_eq!(notification.kind, "booking_confirmed");
    assert_eq!(notification.title, "Booking confirmed");
    assert!(!notification.is_read);

    // Only the one real notification was published.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(inbox.unread_count(), 1);
    inbox.detach();

    let stats = client.snapshot().await.unwrap().stats;
    assert_eq!(stats.messages, 5);
    assert_eq!(stats.notifications, 1);
    assert_eq!(stats.dropped_frames, 2);

    client.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_sends_json_ping_on_interval() {
    let (client, _server, mut socket) = connected_client(Duration::from_millis(30)).await;

    for _ in 0..2 {
        let frame = socket
            .recv_outbound_timeout(Duration::from_secs(1))
            .await
            .expect("heartbeat ping");
        assert_eq!(frame, WsFrame::text_static(PING_FRAME));
        socket.send_text(r#"{"type":"pong"}"#).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    let snapshot = client.snapshot().await.unwrap();
    assert!(snapshot.heartbeat_active);
    assert!(snapshot.stats.pings_sent >= 2);
    assert!(snapshot.stats.rtt_samples >= 1);

    client.disconnect().await.unwrap();
    // No heartbeat after disconnect.
    while socket.recv_outbound_timeout(Duration::from_millis(5)).await.is_some() {}
    assert!(
        socket
            .recv_outbound_timeout(Duration::from_millis(100))
            .await
            .is_none()
    );

    client.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_listener_does_not_starve_others() {
    let (client, _server, socket) = connected_client(Duration::from_secs(30)).await;

    let delivered = Arc::new(AtomicUsize::new(0));
    let _bad = client.on(RealtimeEventKind::Notification, |_| {
        panic!("listener bug");
    });
    let _good = client.on(RealtimeEventKind::Notification, {
        let delivered = delivered.clone();
        move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
        }
    });

    socket.send_text(NOTIFICATION).unwrap();
    socket.send_text(NOTIFICATION).unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while delivered.load(Ordering::SeqCst) < 2 {
        assert!(Instant::now() < deadline, "good listener starved");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        client.snapshot().await.unwrap().status,
        WsConnectionStatus::Connected
    );

    client.dispose().await;
}
