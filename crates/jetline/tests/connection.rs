//! End-to-end connection tests over a scripted transport

use async_trait::async_trait;
use jetline::transport::{PreparedRequest, Transport, TransportEvent, SUCCESS_STATUS};
use jetline::{
    connect_with_transport, ConnectError, ModuleConfig, RequestConfig, SessionEvent, StreamError,
};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

/// Transport that replays whatever the test feeds it
struct MockTransport {
    script: UnboundedReceiver<TransportEvent>,
}

fn mock() -> (UnboundedSender<TransportEvent>, MockTransport) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, MockTransport { script: rx })
}

#[async_trait]
impl Transport for MockTransport {
    async fn run(
        &mut self,
        _request: PreparedRequest,
        events: UnboundedSender<TransportEvent>,
        abort: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => return,
                next = self.script.recv() => {
                    let Some(event) = next else { return };
                    let done = matches!(event, TransportEvent::Done { .. });
                    if events.send(event).is_err() || done {
                        return;
                    }
                }
            }
        }
    }
}

fn request() -> RequestConfig {
    RequestConfig::new("http://localhost:4100/stream")
}

fn headers_ok() -> TransportEvent {
    TransportEvent::Headers {
        status: SUCCESS_STATUS,
    }
}

fn progress(text: &str) -> TransportEvent {
    TransportEvent::Progress {
        status: SUCCESS_STATUS,
        text: text.to_string(),
    }
}

fn done(status: u16) -> TransportEvent {
    TransportEvent::Done { status }
}

#[tokio::test]
async fn test_handshake_suppresses_acknowledgment_frame() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder
        .send(progress("{\"name\":\"heartbeat\"}\n{\"x\":1}\n"))
        .unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();

    // The acknowledging heartbeat is filtered; only the data frame and the
    // batch's length notification come through.
    match session.recv().await.unwrap() {
        SessionEvent::Data { frame } => assert_eq!(frame, json!({"x": 1})),
        other => panic!("expected data, got {other:?}"),
    }
    match session.recv().await.unwrap() {
        SessionEvent::ResponseLength { length } => assert_eq!(length, 29),
        other => panic!("expected response length, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unfiltered_acknowledgment_emits_heartbeat_first() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder
        .send(progress("{\"name\":\"heartbeat\"}\n{\"x\":1}\n"))
        .unwrap();

    let module = ModuleConfig::default().filter_acknowledge(false);
    let mut session = connect_with_transport(request(), module, transport)
        .await
        .unwrap();

    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::Heartbeat
    ));
    match session.recv().await.unwrap() {
        SessionEvent::Data { frame } => assert_eq!(frame, json!({"x": 1})),
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_custom_acknowledge_filter() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    // Heartbeats no longer acknowledge; the session only opens on `ready`.
    feeder
        .send(progress("{\"name\":\"heartbeat\"}\n{\"ready\":true}\n{\"x\":1}\n"))
        .unwrap();

    let module = ModuleConfig::default()
        .acknowledge_filter(|frame: &serde_json::Value| frame.get("ready").is_some());
    let mut session = connect_with_transport(request(), module, transport)
        .await
        .unwrap();

    match session.recv().await.unwrap() {
        SessionEvent::Data { frame } => assert_eq!(frame, json!({"x": 1})),
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_success_headers_reject_handshake() {
    let (feeder, transport) = mock();
    feeder.send(TransportEvent::Headers { status: 503 }).unwrap();

    let err = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::HttpError { status: 503 }));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_headers() {
    let (feeder, transport) = mock();

    let err = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::RequestTimeout));
    drop(feeder);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_headers_but_no_acknowledgment() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress("{\"x\":1}\n")).unwrap();

    let err = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::RequestTimeout));
    drop(feeder);
}

#[tokio::test(start_paused = true)]
async fn test_failed_completion_while_connecting_waits_for_timeout() {
    let (feeder, transport) = mock();
    // The request dies before headers; no error surfaces until the
    // connection timeout decides.
    feeder.send(done(0)).unwrap();

    let err = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::RequestTimeout));
    drop(feeder);
}

#[tokio::test]
async fn test_completion_before_acknowledgment_is_rejected() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress("{\"x\":1}\n")).unwrap();
    feeder.send(done(SUCCESS_STATUS)).unwrap();

    let err = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::RequestRejected));
}

#[tokio::test]
async fn test_clean_disconnect() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress("{\"name\":\"heartbeat\"}\n")).unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();
    feeder.send(done(SUCCESS_STATUS)).unwrap();

    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::ResponseLength { length: 21 }
    ));
    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::Disconnect { error: None }
    ));
    assert!(session.recv().await.is_none());
}

#[tokio::test]
async fn test_aborted_stream_disconnects_with_http_abort() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress("{\"name\":\"heartbeat\"}\n")).unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();
    feeder.send(done(0)).unwrap();

    loop {
        match session.recv().await.unwrap() {
            SessionEvent::Disconnect { error } => {
                assert_eq!(error, Some(StreamError::HttpAbort));
                break;
            }
            SessionEvent::ResponseLength { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_failed_stream_disconnects_with_network_error() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress("{\"name\":\"heartbeat\"}\n")).unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();
    feeder.send(done(502)).unwrap();

    loop {
        match session.recv().await.unwrap() {
            SessionEvent::Disconnect { error } => {
                assert_eq!(error, Some(StreamError::Network { status: 502 }));
                break;
            }
            SessionEvent::ResponseLength { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_no_events_after_explicit_disconnect() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress("{\"name\":\"heartbeat\"}\n")).unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();

    session.disconnect();
    // Anything the transport delivers now goes nowhere.
    let _ = feeder.send(progress("{\"name\":\"heartbeat\"}\n{\"late\":1}\n"));
    let _ = feeder.send(done(SUCCESS_STATUS));

    // Only the pre-disconnect batch is buffered; no disconnect event, no
    // late data.
    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::ResponseLength { length: 21 }
    ));
    assert!(session.recv().await.is_none());
}

#[tokio::test]
async fn test_redelivered_buffer_is_not_reprocessed() {
    let (feeder, transport) = mock();
    let body = "{\"name\":\"heartbeat\"}\n{\"x\":1}\n";
    feeder.send(headers_ok()).unwrap();
    feeder.send(progress(body)).unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();

    // Re-delivering the full buffer adds no bytes: the batch is a no-op and
    // emits nothing, not even a length notification.
    feeder.send(progress(body)).unwrap();
    feeder.send(done(SUCCESS_STATUS)).unwrap();

    match session.recv().await.unwrap() {
        SessionEvent::Data { frame } => assert_eq!(frame, json!({"x": 1})),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::ResponseLength { .. }
    ));
    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::Disconnect { error: None }
    ));
}

#[tokio::test]
async fn test_is_idle_tracks_partial_frames() {
    let (feeder, transport) = mock();
    feeder.send(headers_ok()).unwrap();
    feeder
        .send(progress("{\"name\":\"heartbeat\"}\n{\"pa"))
        .unwrap();

    let mut session = connect_with_transport(request(), ModuleConfig::default(), transport)
        .await
        .unwrap();

    // A partial trailing frame leaves unconsumed bytes pending.
    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::ResponseLength { length: 25 }
    ));
    assert!(!session.is_idle());

    feeder
        .send(progress("{\"name\":\"heartbeat\"}\n{\"pay\":1}\n"))
        .unwrap();
    match session.recv().await.unwrap() {
        SessionEvent::Data { frame } => assert_eq!(frame, json!({"pay": 1})),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(matches!(
        session.recv().await.unwrap(),
        SessionEvent::ResponseLength { length: 31 }
    ));
    assert!(session.is_idle());
}
