use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use gala_realtime::ws::{EventDispatcher, InboundMessage, RealtimeEvent, RealtimeEventKind};

fn notification_frame(id: u64) -> Bytes {
    Bytes::from(format!(
        r#"{{"type":"notification","notification":{{"id":{id},"type":"booking_confirmed","title":"Booking confirmed","message":"Your evening gown is reserved for 14 June","is_read":false,"created_at":"2024-06-01T12:00:00Z"}}}}"#
    ))
}

fn bench_decode_1000_notifications(c: &mut Criterion) {
    let frames: Vec<Bytes> = (0..1000).map(notification_frame).collect();

    c.bench_function("decode_1000_notification_frames", |b| {
        b.iter(|| {
            let mut ids = 0u64;
            for frame in &frames {
                if let Ok(InboundMessage::Notification(n)) =
                    InboundMessage::decode(black_box(frame.as_ref()))
                {
                    ids = ids.wrapping_add(n.id);
                }
            }
            black_box(ids);
        })
    });
}

fn bench_decode_pong(c: &mut Criterion) {
    let pong = Bytes::from_static(br#"{"type":"pong"}"#);
    c.bench_function("decode_pong_frame", |b| {
        b.iter(|| black_box(InboundMessage::decode(black_box(pong.as_ref())).is_ok()))
    });
}

fn bench_emit_to_listeners(c: &mut Criterion) {
    let Ok(InboundMessage::Notification(notification)) =
        InboundMessage::decode(notification_frame(1).as_ref())
    else {
        panic!("fixture must decode");
    };
    let event = RealtimeEvent::Notification(notification);

    for listeners in [1usize, 8, 32] {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(AtomicU64::new(0));
        for _ in 0..listeners {
            let seen = seen.clone();
            let _ = dispatcher.on(RealtimeEventKind::Notification, move |_| {
                seen.fetch_add(1, Ordering::Relaxed);
            });
        }

        c.bench_function(&format!("emit_notification_l{listeners}"), |b| {
            b.iter(|| dispatcher.emit(black_box(&event)))
        });
    }
}

criterion_group!(
    benches,
    bench_decode_1000_notifications,
    bench_decode_pong,
    bench_emit_to_listeners
);
criterion_main!(benches);
