//! End-to-end tests for the webhook controller: lifecycle transitions,
//! capture fan-out over a real listener, and tunnel fallback behavior.

use async_trait::async_trait;
use hooktrap_core::{
    ControllerConfig, HooktrapError, TunnelChild, TunnelConfig, TunnelLauncher, TunnelManager,
    TunnelProc, WebhookController,
};
use hooktrap_types::WebhookEvent;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Tunnel launcher that replays a canned stdout script, or hangs silently.
struct ScriptedLauncher {
    stdout: Vec<u8>,
    hang: bool,
    launches: AtomicUsize,
    killed: Arc<AtomicBool>,
}

impl ScriptedLauncher {
    fn announcing(url: &str) -> Arc<Self> {
        Arc::new(Self {
            stdout: format!("{url} tunneled with tls termination, {url}\n").into_bytes(),
            hang: false,
            launches: AtomicUsize::new(0),
            killed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn silent() -> Arc<Self> {
        Arc::new(Self {
            stdout: Vec::new(),
            hang: true,
            launches: AtomicUsize::new(0),
            killed: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct ScriptedProc {
    killed: Arc<AtomicBool>,
    _held: Vec<tokio::io::DuplexStream>,
}

#[async_trait]
impl TunnelProc for ScriptedProc {
    async fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TunnelLauncher for ScriptedLauncher {
    async fn launch(&self, _local_port: u16) -> hooktrap_core::Result<TunnelChild> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut held = Vec::new();
        let stdout: Box<dyn AsyncRead + Send + Unpin> = if self.hang {
            let (read, write) = tokio::io::duplex(64);
            held.push(write);
            Box::new(read)
        } else {
            Box::new(Cursor::new(self.stdout.clone()))
        };
        let (stderr_read, stderr_write) = tokio::io::duplex(64);
        held.push(stderr_write);

        Ok(TunnelChild {
            stdout,
            stderr: Box::new(stderr_read),
            proc: Box::new(ScriptedProc {
                killed: self.killed.clone(),
                _held: held,
            }),
        })
    }
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        host: "127.0.0.1".to_string(),
        shutdown_grace: Duration::from_secs(2),
        ..ControllerConfig::default()
    }
}

fn tunnel_test_config() -> TunnelConfig {
    TunnelConfig {
        discovery_window: Duration::from_millis(200),
        probe_local: false,
        verify_url: false,
        ..TunnelConfig::default()
    }
}

fn controller() -> Arc<WebhookController> {
    WebhookController::new(test_config())
}

fn controller_with_launcher(launcher: Arc<ScriptedLauncher>) -> Arc<WebhookController> {
    let tunnel = TunnelManager::with_launcher(launcher, tunnel_test_config());
    WebhookController::with_tunnel(test_config(), tunnel)
}

#[tokio::test]
async fn start_reports_local_url_and_running_status() {
    let ctrl = controller();
    let resp = ctrl.start(0, false).await.unwrap();

    assert!(resp.port > 0);
    assert_eq!(resp.public_url, format!("http://localhost:{}", resp.port));

    let status = ctrl.status().await;
    assert!(status.running);
    assert_eq!(status.public_url, resp.public_url);
    assert_eq!(status.port, resp.port);

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn second_start_fails_and_leaves_first_instance_running() {
    let ctrl = controller();
    let first = ctrl.start(0, false).await.unwrap();

    let err = ctrl.start(0, false).await.unwrap_err();
    assert!(matches!(err, HooktrapError::AlreadyRunning));

    // First instance still answers on its original port.
    let status = ctrl.status().await;
    assert!(status.running);
    assert_eq!(status.port, first.port);

    let resp = reqwest::get(format!("http://127.0.0.1:{}/still-alive", first.port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn stop_when_not_running_has_no_side_effects() {
    let ctrl = controller();
    let err = ctrl.stop().await.unwrap_err();
    assert!(matches!(err, HooktrapError::NotRunning));

    let status = ctrl.status().await;
    assert!(!status.running);
    assert_eq!(status.public_url, "");
    assert_eq!(status.port, 0);
}

#[tokio::test]
async fn bind_conflict_surfaces_as_bind_error() {
    let ctrl_a = controller();
    let resp = ctrl_a.start(0, false).await.unwrap();

    let ctrl_b = controller();
    let err = ctrl_b.start(resp.port, false).await.unwrap_err();
    assert!(matches!(err, HooktrapError::BindError { .. }));
    assert!(!ctrl_b.status().await.running);

    ctrl_a.stop().await.unwrap();
}

#[tokio::test]
async fn captured_request_fans_out_to_subscribers() {
    let ctrl = controller();
    let resp = ctrl.start(0, false).await.unwrap();
    let (_id, mut rx) = ctrl.subscribe_events().await.unwrap();

    let client = reqwest::Client::new();
    let ack: serde_json::Value = client
        .post(format!(
            "http://127.0.0.1:{}/payments/callback?ref=1&ref=2",
            resp.port
        ))
        .header("X-Source", "stripe")
        .body("{\"amount\":42}")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(ack["status"], "received");
    assert!(ack["id"].is_string());

    let event: WebhookEvent = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.method, "POST");
    assert_eq!(event.path, "/payments/callback");
    assert_eq!(event.body, "{\"amount\":42}");
    assert_eq!(event.headers.get("x-source"), Some(&"stripe".to_string()));
    // Duplicate query keys keep the first value.
    assert_eq!(event.query_params.get("ref"), Some(&"1".to_string()));
    assert_eq!(event.id.to_string(), ack["id"].as_str().unwrap());

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn api_paths_are_not_captured() {
    let ctrl = controller();
    let resp = ctrl.start(0, false).await.unwrap();
    let (_id, mut rx) = ctrl.subscribe_events().await.unwrap();

    let client = reqwest::Client::new();
    // Start over HTTP while already running: a control-plane error, not a capture.
    let start = client
        .post(format!("http://127.0.0.1:{}/api/webhook/start", resp.port))
        .json(&serde_json::json!({ "port": 9999, "enableTunnel": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(start.status(), 409);

    // Unknown API paths 404 instead of being swallowed by the catch-all.
    let unknown = client
        .get(format!("http://127.0.0.1:{}/api/nope", resp.port))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    assert!(rx.try_recv().is_err());
    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn event_stream_delivers_sse_frames() {
    let ctrl = controller();
    let resp = ctrl.start(0, false).await.unwrap();
    let base = format!("http://127.0.0.1:{}", resp.port);

    let client = reqwest::Client::new();
    let stream = client
        .get(format!("{base}/api/webhook/events"))
        .send()
        .await
        .unwrap();
    assert!(stream
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    client
        .post(format!("{base}/orders/hook"))
        .body("order created")
        .send()
        .await
        .unwrap();

    let mut stream = stream;
    let mut buffered = String::new();
    let frame = loop {
        let chunk = tokio::time::timeout(Duration::from_secs(2), stream.chunk())
            .await
            .expect("timed out waiting for SSE frame")
            .unwrap()
            .expect("stream ended before delivering an event");
        buffered.push_str(&String::from_utf8_lossy(&chunk));
        if let Some(line) = buffered.lines().find(|l| l.starts_with("data: ")) {
            break line.trim_start_matches("data: ").to_string();
        }
    };

    let event: WebhookEvent = serde_json::from_str(&frame).unwrap();
    assert_eq!(event.method, "POST");
    assert_eq!(event.path, "/orders/hook");
    assert_eq!(event.body, "order created");

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn stop_closes_subscribers_and_clears_state() {
    let ctrl = controller();
    let resp = ctrl.start(0, false).await.unwrap();
    let (_id, mut rx) = ctrl.subscribe_events().await.unwrap();

    ctrl.stop().await.unwrap();

    // Subscriber channel observes end-of-stream.
    assert!(rx.recv().await.is_none());

    let status = ctrl.status().await;
    assert!(!status.running);
    assert_eq!(status.public_url, "");
    assert_eq!(status.port, 0);

    // Listener is actually gone.
    assert!(
        reqwest::get(format!("http://127.0.0.1:{}/", resp.port))
            .await
            .is_err()
    );

    // And the controller is restartable.
    ctrl.start(0, false).await.unwrap();
    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn subscribers_joining_during_stop_do_not_survive_it() {
    let ctrl = controller();
    ctrl.start(0, false).await.unwrap();

    let mut joiners = Vec::new();
    for _ in 0..8 {
        let ctrl = ctrl.clone();
        joiners.push(tokio::spawn(async move {
            // Subscribe repeatedly while stop races in.
            for _ in 0..50 {
                let _ = ctrl.subscribe_events().await;
                tokio::task::yield_now().await;
            }
        }));
    }

    tokio::task::yield_now().await;
    ctrl.stop().await.unwrap();

    for joiner in joiners {
        joiner.await.unwrap();
    }
    assert!(ctrl.registry().is_empty());
}

#[tokio::test]
async fn tunnel_timeout_falls_back_to_local_url() {
    let launcher = ScriptedLauncher::silent();
    let ctrl = controller_with_launcher(launcher.clone());

    let resp = ctrl.start(0, true).await.unwrap();
    assert_eq!(resp.public_url, format!("http://localhost:{}", resp.port));
    assert!(ctrl.status().await.running);
    // No orphaned tunnel process after the fallback.
    assert!(launcher.killed.load(Ordering::SeqCst));

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn tunnel_url_is_used_when_discovered() {
    let launcher = ScriptedLauncher::announcing("https://abc123.lhr.life");
    let ctrl = controller_with_launcher(launcher);

    let resp = ctrl.start(0, true).await.unwrap();
    assert_eq!(resp.public_url, "https://abc123.lhr.life");
    assert_eq!(ctrl.status().await.public_url, "https://abc123.lhr.life");

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn enable_tunnel_requires_running_server() {
    let launcher = ScriptedLauncher::announcing("https://abc123.lhr.life");
    let ctrl = controller_with_launcher(launcher);

    let err = ctrl.enable_tunnel().await.unwrap_err();
    assert!(matches!(err, HooktrapError::NotRunning));
}

#[tokio::test]
async fn enable_tunnel_at_runtime_then_again_is_a_noop() {
    let launcher = ScriptedLauncher::announcing("https://abc123.lhr.life");
    let ctrl = controller_with_launcher(launcher.clone());

    let started = ctrl.start(0, false).await.unwrap();
    assert_eq!(started.public_url, format!("http://localhost:{}", started.port));

    let enabled = ctrl.enable_tunnel().await.unwrap();
    assert_eq!(enabled.public_url, "https://abc123.lhr.life");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

    // Already tunneled: same URL back, no second launch.
    let again = ctrl.enable_tunnel().await.unwrap();
    assert_eq!(again.public_url, "https://abc123.lhr.life");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

    let disabled = ctrl.disable_tunnel().await.unwrap();
    assert_eq!(disabled.public_url, format!("http://localhost:{}", started.port));
    assert!(launcher.killed.load(Ordering::SeqCst));

    ctrl.stop().await.unwrap();
}

#[tokio::test]
async fn stop_over_http_shuts_the_server_down() {
    let ctrl = controller();
    let resp = ctrl.start(0, false).await.unwrap();

    let client = reqwest::Client::new();
    let stopped: serde_json::Value = client
        .post(format!("http://127.0.0.1:{}/api/webhook/stop", resp.port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["status"], "stopped");
    assert!(!ctrl.status().await.running);
}
