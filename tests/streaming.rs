//! End-to-end session tests against a loopback WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use tencent_asr::{
    AsrError, AudioFrame, CaptureGuard, Credentials, Endpoint, RecognitionCallbacks, Recognizer,
    RecognizerConfig, RetryPolicy, SessionTimeouts, SigningScheme,
};

const HANDSHAKE_ACK: &str = r#"{"code":0,"message":"success","voice_id":"srv-voice"}"#;

fn test_config(port: u16) -> RecognizerConfig {
    RecognizerConfig {
        credentials: Credentials::new("AKIDtest", "testkey", "1000001"),
        endpoint: Endpoint {
            host: format!("127.0.0.1:{port}"),
            path_prefix: "/asr/v2".into(),
            tls: false,
        },
        scheme: SigningScheme::QueryHmacSha1,
        params: Default::default(),
        timeouts: SessionTimeouts {
            handshake: Duration::from_secs(5),
            no_result: Duration::from_secs(5),
            finalize_grace: Duration::from_millis(200),
        },
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(20),
        },
    }
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn wait_for_binary(ws: &mut WebSocketStream<TcpStream>) {
    while let Some(msg) = ws.next().await {
        if let Ok(Message::Binary(_)) = msg {
            return;
        }
    }
    panic!("client closed before sending audio");
}

/// Drain frames until the `{"type":"end"}` stop signal (or the client goes
/// away).
async fn wait_for_stop(ws: &mut WebSocketStream<TcpStream>) {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            if text.as_str().contains(r#""end""#) {
                return;
            }
        }
    }
}

#[derive(Default)]
struct Recorder {
    interims: Mutex<Vec<String>>,
    finals: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    closed: AtomicU32,
}

fn recording_callbacks(rec: &Arc<Recorder>) -> RecognitionCallbacks {
    let (interim, fin, err, closed) = (rec.clone(), rec.clone(), rec.clone(), rec.clone());
    RecognitionCallbacks::new()
        .on_interim(move |t| interim.interims.lock().push(t.to_string()))
        .on_final(move |t| fin.finals.lock().push(t.to_string()))
        .on_error(move |e| err.errors.lock().push(e.to_string()))
        .on_closed(move || {
            closed.closed.fetch_add(1, Ordering::SeqCst);
        })
}

struct TestGuard(Arc<AtomicU32>);

impl CaptureGuard for TestGuard {
    fn release(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn frame() -> AudioFrame {
    AudioFrame::from_pcm16(vec![0u8; 640]).unwrap()
}

#[tokio::test]
async fn delivers_final_transcript_end_to_end() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(HANDSHAKE_ACK)).await.unwrap();
        wait_for_binary(&mut ws).await;
        ws.send(Message::text(
            r#"{"code":0,"result":{"voice_text_str":"hello"},"final":0}"#,
        ))
        .await
        .unwrap();
        ws.send(Message::text(
            r#"{"code":0,"result":{"voice_text_str":"hello world"},"final":1}"#,
        ))
        .await
        .unwrap();
        wait_for_stop(&mut ws).await;
        let _ = ws.send(Message::Close(None)).await;
    });

    let rec = Arc::new(Recorder::default());
    let recognizer = Recognizer::new(test_config(port)).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);
    handle.feed_audio(frame());

    let outcome = handle.join().await;
    server.await.unwrap();

    assert_eq!(outcome.transcript.as_deref(), Some("hello world"));
    assert_eq!(outcome.voice_id.as_deref(), Some("srv-voice"));
    assert!(outcome.failure.is_none());
    assert_eq!(rec.interims.lock().as_slice(), ["hello"]);
    assert_eq!(rec.finals.lock().as_slice(), ["hello world"]);
    assert!(rec.errors.lock().is_empty());
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fatal_service_code_stops_without_retry() {
    let (listener, port) = bind().await;
    let dials = Arc::new(AtomicU32::new(0));
    let server_dials = dials.clone();
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        server_dials.fetch_add(1, Ordering::SeqCst);
        ws.send(Message::text(
            r#"{"code":4002,"message":"authentication failed"}"#,
        ))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let rec = Arc::new(Recorder::default());
    let recognizer = Recognizer::new(test_config(port)).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);

    let outcome = handle.join().await;
    server.await.unwrap();

    assert_eq!(dials.load(Ordering::SeqCst), 1);
    assert!(matches!(
        outcome.failure,
        Some(AsrError::ServiceFatal { code: 4002, .. })
    ));
    assert_eq!(rec.errors.lock().len(), 1);
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_drops_exhaust_the_retry_budget() {
    let (listener, port) = bind().await;
    let dials = Arc::new(AtomicU32::new(0));
    let server_dials = dials.clone();
    let server = tokio::spawn(async move {
        for _ in 0..3 {
            let ws = accept_ws(&listener).await;
            server_dials.fetch_add(1, Ordering::SeqCst);
            drop(ws);
        }
    });

    let rec = Arc::new(Recorder::default());
    let recognizer = Recognizer::new(test_config(port)).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);

    let outcome = handle.join().await;
    server.await.unwrap();

    assert_eq!(dials.load(Ordering::SeqCst), 3);
    assert!(matches!(
        outcome.failure,
        Some(AsrError::ConnectionExhausted { attempts: 3, .. })
    ));
    assert_eq!(rec.errors.lock().len(), 1);
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_stop_closes_gracefully_and_releases_capture() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(HANDSHAKE_ACK)).await.unwrap();
        wait_for_stop(&mut ws).await;
        let _ = ws.send(Message::Close(None)).await;
    });

    let rec = Arc::new(Recorder::default());
    let releases = Arc::new(AtomicU32::new(0));
    let recognizer = Recognizer::new(test_config(port)).unwrap();
    let handle = recognizer.start(
        recording_callbacks(&rec),
        Some(Box::new(TestGuard(releases.clone()))),
    );
    handle.feed_audio(frame());

    // Let the session reach streaming before stopping.
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop();

    let outcome = handle.join().await;
    server.await.unwrap();

    assert!(outcome.manually_stopped);
    assert!(outcome.failure.is_none());
    assert!(rec.errors.lock().is_empty());
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clean_close_promotes_interim_text() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(HANDSHAKE_ACK)).await.unwrap();
        wait_for_binary(&mut ws).await;
        ws.send(Message::text(
            r#"{"code":0,"result":{"voice_text_str":"partial"},"final":0}"#,
        ))
        .await
        .unwrap();
        let _ = ws.send(Message::Close(None)).await;
        while ws.next().await.is_some() {}
    });

    let rec = Arc::new(Recorder::default());
    let recognizer = Recognizer::new(test_config(port)).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);
    handle.feed_audio(frame());

    let outcome = handle.join().await;
    server.await.unwrap();

    assert_eq!(outcome.transcript.as_deref(), Some("partial"));
    assert!(outcome.failure.is_none());
    assert_eq!(rec.finals.lock().as_slice(), ["partial"]);
    assert!(rec.errors.lock().is_empty());
}

#[tokio::test]
async fn silence_hits_the_no_result_timeout() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(HANDSHAKE_ACK)).await.unwrap();
        // Never send a result.
        while ws.next().await.is_some() {}
    });

    let rec = Arc::new(Recorder::default());
    let mut config = test_config(port);
    config.timeouts.no_result = Duration::from_millis(150);
    let recognizer = Recognizer::new(config).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);
    handle.feed_audio(frame());

    let outcome = handle.join().await;
    server.await.unwrap();

    assert_eq!(outcome.failure, Some(AsrError::NoSpeechDetected));
    assert!(outcome.transcript.is_none());
    assert_eq!(rec.errors.lock().len(), 1);
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interim_text_survives_reconnect_attempts() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(HANDSHAKE_ACK)).await.unwrap();
        wait_for_binary(&mut ws).await;
        ws.send(Message::text(
            r#"{"code":0,"result":{"voice_text_str":"hello"},"final":0}"#,
        ))
        .await
        .unwrap();
        // Drop without a close frame, then keep dropping the retries.
        drop(ws);
        for _ in 0..2 {
            let ws = accept_ws(&listener).await;
            drop(ws);
        }
    });

    let rec = Arc::new(Recorder::default());
    let recognizer = Recognizer::new(test_config(port)).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);
    handle.feed_audio(frame());

    let outcome = handle.join().await;
    server.await.unwrap();

    // The text recognized before the drop outlives the retry budget.
    assert_eq!(outcome.transcript.as_deref(), Some("hello"));
    assert!(matches!(
        outcome.failure,
        Some(AsrError::ConnectionExhausted { attempts: 3, .. })
    ));
    assert_eq!(rec.interims.lock().as_slice(), ["hello"]);
    assert_eq!(rec.finals.lock().as_slice(), ["hello"]);
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_during_backoff_abandons_retry() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let ws = accept_ws(&listener).await;
        drop(ws);
    });

    let rec = Arc::new(Recorder::default());
    let mut config = test_config(port);
    config.retry.initial_backoff = Duration::from_secs(5);
    let recognizer = Recognizer::new(config).unwrap();
    let handle = recognizer.start(recording_callbacks(&rec), None);

    // The first dial fails quickly; the stop lands in the backoff sleep.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .unwrap();
    server.await.unwrap();

    assert!(outcome.manually_stopped);
    assert!(rec.errors.lock().is_empty());
    assert_eq!(rec.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn starting_a_new_session_stops_the_previous_one() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let mut ws = accept_ws(&listener).await;
            tokio::spawn(async move {
                let _ = ws.send(Message::text(HANDSHAKE_ACK)).await;
                while ws.next().await.is_some() {}
            });
        }
    });

    let first_rec = Arc::new(Recorder::default());
    let second_rec = Arc::new(Recorder::default());
    let recognizer = Recognizer::new(test_config(port)).unwrap();

    let first = recognizer.start(recording_callbacks(&first_rec), None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = recognizer.start(recording_callbacks(&second_rec), None);

    let first_outcome = first.join().await;
    assert!(first_outcome.manually_stopped);
    assert!(first_rec.errors.lock().is_empty());

    second.stop();
    let second_outcome = second.join().await;
    assert!(second_outcome.manually_stopped);
    server.await.unwrap();
}
