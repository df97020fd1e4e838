//! Polling sessions that stream a server's live usage to a sink.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::ClientApi;
use crate::error::ApiErrorKind;
use crate::types::ResourceSnapshot;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Requested intervals below this are raised to it.
    pub min_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Receiver of snapshots. Returning `false` means the consumer is gone.
#[async_trait]
pub trait SnapshotSink: Send + Sync + 'static {
    async fn deliver(&self, snapshot: ResourceSnapshot) -> bool;
}

#[async_trait]
impl SnapshotSink for mpsc::Sender<ResourceSnapshot> {
    async fn deliver(&self, snapshot: ResourceSnapshot) -> bool {
        self.send(snapshot).await.is_ok()
    }
}

#[async_trait]
impl SnapshotSink for mpsc::UnboundedSender<ResourceSnapshot> {
    async fn deliver(&self, snapshot: ResourceSnapshot) -> bool {
        self.send(snapshot).is_ok()
    }
}

/// Identifies one started session. Stale handles are ignored by `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub server: String,
    pub subscriber: String,
    id: Uuid,
}

struct ActiveSession {
    id: Uuid,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSession {
    /// Cancel and wait for the loop to exit, so nothing is delivered afterwards.
    async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("Monitor session {} panicked", self.id);
            }
        }
    }
}

type SessionKey = (String, String);

pub struct ResourceMonitor {
    client: ClientApi,
    config: MonitorConfig,
    sessions: Mutex<HashMap<SessionKey, ActiveSession>>,
}

impl ResourceMonitor {
    pub fn new(client: ClientApi, config: MonitorConfig) -> Self {
        Self {
            client,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling `server` for `subscriber`, replacing any session that
    /// pair already has.
    pub async fn start<S: SnapshotSink>(
        &self,
        server: &str,
        subscriber: &str,
        interval: Duration,
        sink: S,
    ) -> SessionHandle {
        let interval = interval.max(self.config.min_interval).max(Duration::from_millis(1));
        let key = (server.to_string(), subscriber.to_string());

        let mut sessions = self.sessions.lock().await;
        if let Some(old) = sessions.remove(&key) {
            info!("Replacing monitor session for server={} subscriber={}", server, subscriber);
            old.shutdown().await;
        }

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.client.clone(),
            server.to_string(),
            interval,
            sink,
            token.clone(),
        ));
        sessions.insert(key, ActiveSession { id, token, task });

        info!(
            server = %server,
            subscriber = %subscriber,
            interval_ms = interval.as_millis() as u64,
            "Monitor session started"
        );

        SessionHandle {
            server: server.to_string(),
            subscriber: subscriber.to_string(),
            id,
        }
    }

    /// Stop a session. Returns false if the handle no longer names a session.
    pub async fn stop(&self, handle: &SessionHandle) -> bool {
        let session = {
            let mut sessions = self.sessions.lock().await;
            let key = (handle.server.clone(), handle.subscriber.clone());
            match sessions.get(&key) {
                Some(s) if s.id == handle.id => sessions.remove(&key),
                _ => None,
            }
        };

        match session {
            Some(session) => {
                session.shutdown().await;
                info!("Monitor session stopped for server={}", handle.server);
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) -> usize {
        let drained: Vec<ActiveSession> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        let count = drained.len();
        for session in drained {
            session.shutdown().await;
        }
        count
    }

    /// True while the session's loop is still running.
    pub async fn is_active(&self, handle: &SessionHandle) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(handle.server.clone(), handle.subscriber.clone()))
            .map(|s| s.id == handle.id && !s.task.is_finished())
            .unwrap_or(false)
    }
}

async fn poll_loop<S: SnapshotSink>(
    client: ClientApi,
    server: String,
    interval: Duration,
    sink: S,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence: u64 = 0;
    let mut last_at: Option<OffsetDateTime> = None;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = client.resources(&server) => r,
        };

        sequence += 1;
        let mut at = OffsetDateTime::now_utc();
        if let Some(prev) = last_at {
            if at <= prev {
                at = prev + time::Duration::nanoseconds(1);
            }
        }
        last_at = Some(at);

        let snapshot = match fetched {
            Ok(body) => match ResourceSnapshot::from_stats(&server, sequence, at, &body) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Unreadable stats for server {}: {}", server, e);
                    ResourceSnapshot::degraded(&server, sequence, at)
                }
            },
            Err(e) if e.kind == ApiErrorKind::Auth => {
                error!("Monitor for server {} stopped: {}", server, e);
                break;
            }
            Err(e) => {
                warn!("Degraded tick {} for server {}: {}", sequence, server, e);
                ResourceSnapshot::degraded(&server, sequence, at)
            }
        };

        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            ok = sink.deliver(snapshot) => ok,
        };
        if !delivered {
            debug!("Sink for server {} closed", server);
            break;
        }
    }
}
