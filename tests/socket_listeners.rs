use serde_json::json;
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tungstenite::Message;

use classwatch::alerts::{spawn_alerts, NotificationList};
use classwatch::display::{SharedVideo, VideoElement, VideoSource};
use classwatch::overlay::{OverlayRenderer, SharedOverlay};
use classwatch::relay::{spawn_relay, RelayHandler};
use classwatch::{CancelToken, Frame};

/// Accepts one WebSocket client, sends `messages`, then either closes or
/// waits for the client to hang up.
fn serve_once(messages: Vec<String>, close_after_send: bool) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let join = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut socket = tungstenite::accept(stream).expect("handshake");
        for message in messages {
            socket.send(Message::text(message)).expect("send");
        }
        if close_after_send {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        while socket.read().is_ok() {}
    });
    (format!("ws://{}/ws/test?token=tok", addr), join)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn alert_listener_collects_pushed_alerts() {
    let (url, server) = serve_once(
        vec![
            "✅ Monitoring session started for Room 4".to_string(),
            json!({
                "message": "🚨 Phone detected (91% confidence)",
                "image_path": "uploads/evidence/violation_1.jpg"
            })
            .to_string(),
        ],
        false,
    );
    let list = NotificationList::new();
    let cancel = CancelToken::new();
    let handle = spawn_alerts(
        url,
        "http://localhost:8000".to_string(),
        list.clone(),
        cancel.clone(),
    )
    .expect("spawn alerts");

    assert!(wait_until(Duration::from_secs(5), || list.len() == 2));
    let alerts = list.snapshot();
    assert_eq!(alerts[0].message, "🚨 Phone detected (91% confidence)");
    assert_eq!(
        alerts[0].image_url.as_deref(),
        Some("http://localhost:8000/uploads/evidence/violation_1.jpg")
    );
    assert_eq!(alerts[1].message, "✅ Monitoring session started for Room 4");

    cancel.cancel();
    handle.join().expect("join alerts");
    server.join().expect("server thread");
}

#[test]
fn relay_listener_fills_empty_video_and_paints_overlay() {
    let image = Frame::filled(32, 24, [40, 40, 40])
        .to_data_uri(80)
        .expect("encode frame");
    let message = json!({
        "type": "frame",
        "image": image,
        "predictions": [{"class": "cell phone", "conf": 0.7, "x": 4, "y": 4, "w": 8, "h": 8}]
    })
    .to_string();
    let (url, server) = serve_once(vec![json!({"type": "ping"}).to_string(), message], false);

    let video = SharedVideo::new(VideoElement::with_display_size(64, 48));
    let overlay = SharedOverlay::new();
    let cancel = CancelToken::new();
    let handler = RelayHandler::new(
        video.clone(),
        overlay.clone(),
        OverlayRenderer::new("cell phone"),
    );
    let handle = spawn_relay(url, handler, cancel.clone()).expect("spawn relay");

    assert!(wait_until(Duration::from_secs(5), || {
        overlay.lock().map(|o| o.predictions.len() == 1).unwrap_or(false)
    }));
    {
        let video = video.lock().expect("video lock");
        assert!(matches!(video.source(), VideoSource::DataUri(_)));
        assert_eq!(video.native_size(), (32, 24));
    }
    assert_eq!(overlay.lock().expect("overlay lock").surface.image().dimensions(), (64, 48));

    cancel.cancel();
    handle.join().expect("join relay");
    server.join().expect("server thread");
}

#[test]
fn relay_respects_live_stream_source() {
    let image = Frame::filled(8, 8, [0, 0, 0])
        .to_data_uri(80)
        .expect("encode frame");
    let message = json!({"type": "frame", "image": image, "predictions": []}).to_string();
    let (url, server) = serve_once(vec![message], true);

    let video = SharedVideo::new(VideoElement::new());
    video
        .lock()
        .expect("video lock")
        .set_source(VideoSource::Url("http://192.168.1.40:81/stream".to_string()));
    let handler = RelayHandler::new(
        video.clone(),
        SharedOverlay::new(),
        OverlayRenderer::new("cell phone"),
    );
    let cancel = CancelToken::new();
    let handle = spawn_relay(url, handler, cancel.clone()).expect("spawn relay");

    // The server closes after its one message, which ends the listener.
    assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
    assert_eq!(
        video.lock().expect("video lock").source(),
        &VideoSource::Url("http://192.168.1.40:81/stream".to_string())
    );
    handle.join().expect("join relay");
    server.join().expect("server thread");
}
