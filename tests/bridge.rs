//! End-to-end tests for the bridge: real sockets, real shared memory, a
//! scripted upstream agent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use pageant_bridge::frontend::{HealthFlag, NotificationFrontend, PipeFrontend};
use pageant_bridge::protocol::REPLY_HEADER_LEN;
use pageant_bridge::security::{SecurityValidator, SegmentPolicy};
use pageant_bridge::segment::Segment;
use pageant_bridge::transport::{notify, Notification};
use pageant_bridge::{Supervisor, SupervisorConfig, SupervisorState};

/// Mock upstream agent: serves identity-list style replies that carry the
/// request payload back, and counts how often it is dialed.
fn spawn_mock_agent(path: &str) -> Arc<AtomicUsize> {
    let listener = UnixListener::bind(path).unwrap();
    let dials = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dials);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut prefix = [0u8; 4];
                if stream.read_exact(&mut prefix).await.is_err() {
                    return;
                }
                let len = u32::from_be_bytes(prefix) as usize;
                let mut payload = vec![0u8; len];
                if stream.read_exact(&mut payload).await.is_err() {
                    return;
                }

                let mut reply = ((5 + payload.len()) as u32).to_be_bytes().to_vec();
                reply.push(0x0C);
                reply.extend_from_slice(&1u32.to_be_bytes());
                reply.extend_from_slice(&payload);
                let _ = stream.write_all(&reply).await;
            });
        }
    });

    dials
}

/// Send one length-prefixed request and read the echoed reply.
async fn exchange(stream: &mut UnixStream, payload: &[u8]) -> Vec<u8> {
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.unwrap();

    let mut reply = vec![0u8; REPLY_HEADER_LEN + payload.len()];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

struct DenyAll;

impl SegmentPolicy for DenyAll {
    fn validate(&self, _segment: &Segment) -> bool {
        false
    }
}

fn unique_segment_name(tag: &str) -> String {
    format!("/pageant-bridge-it-{}-{}", tag, std::process::id())
}

/// Write a length-prefixed frame into a fresh segment and return it.
fn segment_with_frame(name: &str, payload: &[u8]) -> Segment {
    let segment = Segment::create(name, 16383).unwrap();
    let mut view = segment.map().unwrap();
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    view.write(&frame).unwrap();
    segment
}

#[tokio::test]
async fn sequential_requests_stay_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let pipe_path = dir.path().join("pageant.sock");
    let agent_path = agent_path.to_str().unwrap();
    let pipe_path = pipe_path.to_str().unwrap();

    spawn_mock_agent(agent_path);
    let frontend = PipeFrontend::start(pipe_path, agent_path, HealthFlag::new())
        .await
        .unwrap();

    let mut stream = UnixStream::connect(pipe_path).await.unwrap();
    for i in 0u32..8 {
        let payload = format!("request-{i}").into_bytes();
        let reply = exchange(&mut stream, &payload).await;
        assert_eq!(&reply[REPLY_HEADER_LEN..], payload.as_slice());
    }

    drop(stream);
    frontend.stop().await;
}

#[tokio::test]
async fn concurrent_connections_see_atomic_exchanges() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let pipe_path = dir.path().join("pageant.sock");
    let agent_path = agent_path.to_str().unwrap();
    let pipe_path = pipe_path.to_str().unwrap().to_string();

    spawn_mock_agent(agent_path);
    let frontend = PipeFrontend::start(&pipe_path, agent_path, HealthFlag::new())
        .await
        .unwrap();

    let mut clients = Vec::new();
    for client_id in 0u32..4 {
        let pipe_path = pipe_path.clone();
        clients.push(tokio::spawn(async move {
            let mut stream = UnixStream::connect(&pipe_path).await.unwrap();
            for i in 0u32..16 {
                let payload = format!("client-{client_id}-request-{i}").into_bytes();
                let reply = exchange(&mut stream, &payload).await;
                // Bytes of other connections' responses must never bleed in.
                assert_eq!(&reply[REPLY_HEADER_LEN..], payload.as_slice());
            }
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    frontend.stop().await;
}

#[tokio::test]
async fn worker_failure_leaves_listener_serving() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let pipe_path = dir.path().join("pageant.sock");
    let agent_path = agent_path.to_str().unwrap();
    let pipe_path = pipe_path.to_str().unwrap();

    spawn_mock_agent(agent_path);
    let health = HealthFlag::new();
    let frontend = PipeFrontend::start(pipe_path, agent_path, health.clone())
        .await
        .unwrap();

    // A frame claiming a payload past the protocol maximum kills only its
    // own connection.
    let mut bad = UnixStream::connect(pipe_path).await.unwrap();
    bad.write_all(&0x4000u32.to_be_bytes()).await.unwrap();
    let mut end = Vec::new();
    let _ = bad.read_to_end(&mut end).await;
    assert!(end.is_empty());
    assert!(!health.get());

    let mut good = UnixStream::connect(pipe_path).await.unwrap();
    let reply = exchange(&mut good, b"still-serving").await;
    assert_eq!(&reply[REPLY_HEADER_LEN..], b"still-serving");
    assert!(health.get());

    frontend.stop().await;
}

#[tokio::test]
async fn notification_roundtrip_overwrites_segment_with_reply() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let msg_path = dir.path().join("msg.sock");
    let agent_path = agent_path.to_str().unwrap();
    let msg_path = msg_path.to_str().unwrap();

    spawn_mock_agent(agent_path);
    let supervisor = Supervisor::new(
        SupervisorConfig {
            agent_endpoint: agent_path.to_string(),
            pipe_path: dir.path().join("unused.sock").to_str().unwrap().to_string(),
            notify_path: msg_path.to_string(),
        },
        Arc::new(SecurityValidator::new()),
    );
    let health = HealthFlag::new();
    let frontend = NotificationFrontend::start(
        msg_path,
        agent_path,
        health.clone(),
        Arc::new(SecurityValidator::new()),
        supervisor.restart_handle(),
    )
    .await
    .unwrap();

    let name = unique_segment_name("roundtrip");
    let segment = segment_with_frame(&name, b"sign-me");

    let ok = notify(
        msg_path,
        &Notification::DataCopy {
            segment: name.clone(),
        },
    )
    .await
    .unwrap();
    assert!(ok);
    assert!(health.get());

    // The reply replaced the request at offset 0.
    let view = segment.map().unwrap();
    let reply = view.read(REPLY_HEADER_LEN + 7).unwrap();
    assert_eq!(&reply[REPLY_HEADER_LEN..], b"sign-me");
    assert_eq!(reply[4], 0x0C);

    drop(view);
    drop(segment);
    Segment::unlink(&name).unwrap();
    frontend.stop().await;
}

#[tokio::test]
async fn untrusted_segment_is_never_relayed() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let msg_path = dir.path().join("msg.sock");
    let agent_path = agent_path.to_str().unwrap();
    let msg_path = msg_path.to_str().unwrap();

    let dials = spawn_mock_agent(agent_path);
    let supervisor = Supervisor::new(
        SupervisorConfig {
            agent_endpoint: agent_path.to_string(),
            pipe_path: dir.path().join("unused.sock").to_str().unwrap().to_string(),
            notify_path: msg_path.to_string(),
        },
        Arc::new(DenyAll),
    );
    let health = HealthFlag::new();
    let frontend = NotificationFrontend::start(
        msg_path,
        agent_path,
        health.clone(),
        Arc::new(DenyAll),
        supervisor.restart_handle(),
    )
    .await
    .unwrap();

    let name = unique_segment_name("untrusted");
    let segment = segment_with_frame(&name, b"stolen-request");

    let ok = notify(
        msg_path,
        &Notification::DataCopy {
            segment: name.clone(),
        },
    )
    .await
    .unwrap();
    assert!(!ok);
    assert!(!health.get());
    assert_eq!(dials.load(Ordering::SeqCst), 0);

    // The payload was refused without being touched.
    let view = segment.map().unwrap();
    let untouched = view.read(4 + 14).unwrap();
    assert_eq!(&untouched[4..], b"stolen-request");

    drop(view);
    drop(segment);
    Segment::unlink(&name).unwrap();
    frontend.stop().await;
}

#[tokio::test]
async fn oversized_segment_frame_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let msg_path = dir.path().join("msg.sock");
    let agent_path = agent_path.to_str().unwrap();
    let msg_path = msg_path.to_str().unwrap();

    let dials = spawn_mock_agent(agent_path);
    let supervisor = Supervisor::new(
        SupervisorConfig {
            agent_endpoint: agent_path.to_string(),
            pipe_path: dir.path().join("unused.sock").to_str().unwrap().to_string(),
            notify_path: msg_path.to_string(),
        },
        Arc::new(SecurityValidator::new()),
    );
    let frontend = NotificationFrontend::start(
        msg_path,
        agent_path,
        HealthFlag::new(),
        Arc::new(SecurityValidator::new()),
        supervisor.restart_handle(),
    )
    .await
    .unwrap();

    let name = unique_segment_name("oversized");
    let segment = Segment::create(&name, 16383).unwrap();
    let mut view = segment.map().unwrap();
    // Length prefix announcing a frame past the protocol maximum.
    view.write(&0x3FFCu32.to_be_bytes()).unwrap();
    drop(view);

    let ok = notify(
        msg_path,
        &Notification::DataCopy {
            segment: name.clone(),
        },
    )
    .await
    .unwrap();
    assert!(!ok);
    assert_eq!(dials.load(Ordering::SeqCst), 0);

    drop(segment);
    Segment::unlink(&name).unwrap();
    frontend.stop().await;
}

#[tokio::test]
async fn concurrent_restart_requests_coalesce_into_one_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let agent_path = agent_path.to_str().unwrap();

    spawn_mock_agent(agent_path);
    let supervisor = Supervisor::new(
        SupervisorConfig {
            agent_endpoint: agent_path.to_string(),
            pipe_path: dir.path().join("pageant.sock").to_str().unwrap().to_string(),
            notify_path: dir.path().join("msg.sock").to_str().unwrap().to_string(),
        },
        Arc::new(SecurityValidator::new()),
    );
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    supervisor.start().await;
    assert_eq!(supervisor.state(), SupervisorState::Running);

    supervisor.request_restart();
    supervisor.request_restart();
    assert_eq!(supervisor.state(), SupervisorState::RestartInFlight);

    // Wait out the single restart cycle.
    for _ in 0..50 {
        if supervisor.restart_cycles() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.restart_cycles(), 1);

    // The restarted pipe frontend serves requests again.
    let pipe_path = dir.path().join("pageant.sock");
    let mut stream = UnixStream::connect(pipe_path.to_str().unwrap()).await.unwrap();
    let reply = exchange(&mut stream, b"after-restart").await;
    assert_eq!(&reply[REPLY_HEADER_LEN..], b"after-restart");

    drop(stream);
    supervisor.stop().await;
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn health_reflects_relay_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let pipe_path = dir.path().join("pageant.sock");
    let pipe_path = pipe_path.to_str().unwrap();
    // No upstream agent: every relay fails to connect.
    let dead_endpoint = dir.path().join("no-agent.sock");

    let health = HealthFlag::new();
    let frontend = PipeFrontend::start(
        pipe_path,
        dead_endpoint.to_str().unwrap(),
        health.clone(),
    )
    .await
    .unwrap();
    assert!(health.get());

    let mut stream = UnixStream::connect(pipe_path).await.unwrap();
    stream.write_all(&[0, 0, 0, 1, 0x0B]).await.unwrap();
    let mut end = Vec::new();
    let _ = stream.read_to_end(&mut end).await;

    assert!(end.is_empty());
    assert!(!health.get());

    frontend.stop().await;
}

#[tokio::test]
async fn stop_releases_the_listener_socket() {
    let dir = tempfile::tempdir().unwrap();
    let agent_path = dir.path().join("agent.sock");
    let pipe_path = dir.path().join("pageant.sock");
    let agent_path = agent_path.to_str().unwrap();
    let pipe_path_str = pipe_path.to_str().unwrap();

    spawn_mock_agent(agent_path);
    let frontend = PipeFrontend::start(pipe_path_str, agent_path, HealthFlag::new())
        .await
        .unwrap();
    assert!(pipe_path.exists());

    frontend.stop().await;
    assert!(!pipe_path.exists());

    // A fresh frontend can bind the same path immediately.
    let again = PipeFrontend::start(pipe_path_str, agent_path, HealthFlag::new())
        .await
        .unwrap();
    again.stop().await;
}
