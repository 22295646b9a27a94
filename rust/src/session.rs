use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::SessionError;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(50);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Line,
    Correlated,
    Push,
}

impl TransportKind {
    /// Only correlated sessions outlive their connection, so only they idle out.
    fn expires_when_idle(self) -> bool {
        matches!(self, Self::Correlated)
    }
}

struct Session {
    kind: TransportKind,
    created_at_ms: u64,
    last_activity: Instant,
    principal: Option<Principal>,
    outbound: Option<mpsc::Sender<Value>>,
    inbound: Option<mpsc::Sender<Value>>,
    call_lock: Arc<Mutex<()>>,
    closed: CancellationToken,
}

impl Session {
    fn handle(&self, id: &str) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            kind: self.kind,
            principal: self.principal.clone(),
            outbound: self.outbound.clone(),
            inbound: self.inbound.clone(),
            call_lock: self.call_lock.clone(),
            closed: self.closed.clone(),
        }
    }

    fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        self.kind.expires_when_idle() && now.saturating_duration_since(self.last_activity) > timeout
    }
}

/// Cloned view of a live session. Holding one never keeps the session alive.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub kind: TransportKind,
    pub principal: Option<Principal>,
    pub outbound: Option<mpsc::Sender<Value>>,
    pub inbound: Option<mpsc::Sender<Value>>,
    /// Held for the duration of one call; serializes calls in arrival order.
    pub call_lock: Arc<Mutex<()>>,
    /// Cancelled when the session closes.
    pub closed: CancellationToken,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field(
                "principal",
                &self.principal.as_ref().map(|principal| &principal.subject),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub kind: TransportKind,
    pub created_at_ms: u64,
    pub idle_ms: u64,
    pub subject: Option<String>,
}

struct Inner {
    sessions: DashMap<String, Session>,
    /// Recently closed ids and when they closed. Kept for one idle window.
    retired: DashMap<String, Instant>,
    idle_timeout: Duration,
}

/// Concurrent registry of live sessions, shared by all transports.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                retired: DashMap::new(),
                idle_timeout,
            }),
        }
    }

    pub fn create(&self, kind: TransportKind, principal: Option<Principal>) -> SessionHandle {
        loop {
            let id = Uuid::new_v4().to_string();
            if self.inner.retired.contains_key(&id) {
                continue;
            }
            let entry = match self.inner.sessions.entry(id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(entry) => entry,
            };
            let session = Session {
                kind,
                created_at_ms: unix_millis(),
                last_activity: Instant::now(),
                principal,
                outbound: None,
                inbound: None,
                call_lock: Arc::new(Mutex::new(())),
                closed: CancellationToken::new(),
            };
            let handle = session.handle(&id);
            entry.insert(session);
            tracing::info!(session_id = %id, ?kind, "Session created");
            return handle;
        }
    }

    /// Look up a live session and refresh its activity clock. A correlated
    /// session past its idle window is closed here instead of returned.
    pub fn touch(&self, id: &str) -> Result<SessionHandle, SessionError> {
        let now = Instant::now();
        match self.inner.sessions.get_mut(id) {
            None => return Err(SessionError::Unknown(id.to_string())),
            Some(mut session) => {
                if !session.is_idle(now, self.inner.idle_timeout) {
                    session.last_activity = now;
                    return Ok(session.handle(id));
                }
            }
        }
        self.close(id, "idle timeout");
        Err(SessionError::Unknown(id.to_string()))
    }

    pub fn close(&self, id: &str, reason: &str) -> bool {
        let Some((id, session)) = self.inner.sessions.remove(id) else {
            return false;
        };
        self.inner.retired.insert(id.clone(), Instant::now());
        session.closed.cancel();
        tracing::info!(session_id = %id, reason, "Session closed");
        true
    }

    pub fn attach_outbound(
        &self,
        id: &str,
        sender: mpsc::Sender<Value>,
    ) -> Result<SessionHandle, SessionError> {
        let mut session = self
            .inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::Unknown(id.to_string()))?;
        session.outbound = Some(sender);
        session.last_activity = Instant::now();
        Ok(session.handle(id))
    }

    pub fn attach_inbound(
        &self,
        id: &str,
        sender: mpsc::Sender<Value>,
    ) -> Result<SessionHandle, SessionError> {
        let mut session = self
            .inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::Unknown(id.to_string()))?;
        session.inbound = Some(sender);
        Ok(session.handle(id))
    }

    /// Best-effort push to the session's outbound stream.
    pub async fn notify(&self, id: &str, message: Value) -> bool {
        let sender = self
            .inner
            .sessions
            .get(id)
            .and_then(|session| session.outbound.clone());
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => {
                tracing::debug!(session_id = %id, "Dropping notification: no outbound stream");
                false
            }
        }
    }

    /// Close every correlated session idle for longer than the timeout and
    /// forget ids retired more than one idle window ago.
    pub fn sweep_idle(&self) -> Vec<String> {
        let now = Instant::now();
        let window = self.inner.idle_timeout;
        self.inner
            .retired
            .retain(|_, closed_at| now.saturating_duration_since(*closed_at) <= window);
        let idle = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now, self.inner.idle_timeout))
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        idle.into_iter()
            .filter(|id| self.close(id, "idle timeout"))
            .collect()
    }

    pub fn spawn_idle_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = (self.inner.idle_timeout / 2).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = manager.sweep_idle();
                        if !closed.is_empty() {
                            tracing::debug!("Reclaimed {} idle session(s)", closed.len());
                        }
                    }
                }
            }
        })
    }

    pub fn close_all(&self, reason: &str) {
        for info in self.snapshot() {
            tracing::debug!(
                session_id = %info.id,
                kind = ?info.kind,
                idle_ms = info.idle_ms,
                "Closing session ({reason})"
            );
            self.close(&info.id, reason);
        }
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        self.inner
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionInfo {
                    id: entry.key().clone(),
                    kind: session.kind,
                    created_at_ms: session.created_at_ms,
                    idle_ms: now.saturating_duration_since(session.last_activity).as_millis() as u64,
                    subject: session
                        .principal
                        .as_ref()
                        .map(|principal| principal.subject.clone()),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
