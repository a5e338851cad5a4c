//! In-process processing service for session tests

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use slidecast::{ChannelOptions, EventStream, RelayConfig, Resolution, SessionEvent};
use slidecast_core::{
    EnginePacket, OpenHandshake, SocketPacketKind, PROCESSED_FRAME_EVENT, PROCESS_FRAME_EVENT,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Clone)]
pub struct MockConfig {
    /// Answer every frame with a processed frame carrying these counters
    pub echo_slides: Option<(u32, u32)>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            echo_slides: Some((2, 10)),
        }
    }
}

#[derive(Default)]
pub struct MockState {
    pub frames: Mutex<Vec<String>>,
    pub connections: AtomicUsize,
    pub client_disconnects: AtomicUsize,
}

pub struct MockService {
    pub endpoint: String,
    pub state: Arc<MockState>,
    kick: broadcast::Sender<()>,
    push: broadcast::Sender<String>,
    _task: JoinHandle<()>,
}

impl MockService {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let (kick, _) = broadcast::channel(4);
        let (push, _) = broadcast::channel(16);

        let task_state = state.clone();
        let task_kick = kick.clone();
        let task_push = push.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = task_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    n,
                    config.clone(),
                    task_state.clone(),
                    task_kick.subscribe(),
                    task_push.subscribe(),
                ));
            }
        });

        Self {
            endpoint: format!("http://{}", addr),
            state,
            kick,
            push,
            _task: task,
        }
    }

    /// Server-side disconnect of every open connection
    pub fn kick_all(&self) {
        let _ = self.kick.send(());
    }

    /// Emit an event to every open connection
    pub fn emit(&self, event: &str, payload: Value) {
        let _ = self.push.send(EnginePacket::event(event, payload));
    }

    pub fn frames_received(&self) -> usize {
        self.state.frames.lock().len()
    }

    pub fn client_disconnects(&self) -> usize {
        self.state.client_disconnects.load(Ordering::SeqCst)
    }
}

async fn serve(
    stream: TcpStream,
    n: usize,
    config: MockConfig,
    state: Arc<MockState>,
    mut kick: broadcast::Receiver<()>,
    mut push: broadcast::Receiver<String>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let open = EnginePacket::Open(OpenHandshake {
        sid: format!("engine-{}", n),
        upgrades: vec![],
        ping_interval: 100,
        ping_timeout: 2000,
        max_payload: Some(10_000_000),
    });
    if ws.send(Message::Text(open.encode())).await.is_err() {
        return;
    }

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) if text.starts_with("40") => break,
            Some(Ok(_)) => continue,
            _ => return,
        }
    }
    if ws
        .send(Message::Text(format!(r#"40{{"sid":"socket-{}"}}"#, n)))
        .await
        .is_err()
    {
        return;
    }

    let mut pings = tokio::time::interval(Duration::from_millis(100));
    pings.tick().await;

    loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Message(packet)) if packet.kind == SocketPacketKind::Disconnect => {
                        state.client_disconnects.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                    Ok(EnginePacket::Message(packet)) => {
                        if let Some((name, payload)) = packet.event_parts() {
                            if name != PROCESS_FRAME_EVENT {
                                continue;
                            }
                            let frame = payload.as_str().unwrap_or_default().to_string();
                            state.frames.lock().push(frame.clone());
                            if let Some((current, total)) = config.echo_slides {
                                let reply = EnginePacket::event(
                                    PROCESSED_FRAME_EVENT,
                                    json!({"frame": frame, "currentSlide": current, "totalSlides": total}),
                                );
                                if ws.send(Message::Text(reply)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    _ => {}
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = pings.tick() => {
                if ws.send(Message::Text(EnginePacket::Ping.encode())).await.is_err() {
                    break;
                }
            }
            Ok(text) = push.recv() => {
                if ws.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Ok(()) = kick.recv() => {
                let _ = ws.send(Message::Text("41".to_string())).await;
                let _ = ws.close(None).await;
                break;
            }
        }
    }
}

/// Small frames and a fast reconnection policy
pub fn test_config(endpoint: &str) -> RelayConfig {
    let mut config = RelayConfig::for_endpoint(endpoint);
    config.capture.target_resolution = Resolution::new(160, 120);
    config.handle_termination_signal = false;
    config.channel = ChannelOptions {
        reconnection_attempts: 2,
        reconnection_delay: Duration::from_millis(50),
        timeout: Duration::from_secs(2),
        ..Default::default()
    };
    config
}

pub async fn wait_for_event<F>(events: &mut EventStream, predicate: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let wait = async {
        loop {
            match events.next().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for session event")
}

/// Poll `condition` until it holds
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("condition never held");
}
