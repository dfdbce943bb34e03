use crate::{AuthSession, AuthState};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Pending sign-ins live as long as their state token.
pub const DEFAULT_PENDING_TTL_SECONDS: i64 = 600;
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_MAX_PENDING: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub pending_ttl: Duration,
    pub session_ttl: Duration,
    /// Pending sessions beyond this are evicted oldest first.
    pub max_pending: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::seconds(DEFAULT_PENDING_TTL_SECONDS),
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// In-process store of session contexts keyed by session id.
///
/// Contexts are cloned in and out; a handler loads one, mutates it and saves
/// it back. Only sessions that hold a sign-in (pending or completed) are
/// kept, and each save sweeps out those past their TTL. Nothing here
/// survives a restart.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, AuthSession>>>,
    limits: RegistryLimits,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: RegistryLimits) -> Self {
        Self {
            sessions: Arc::default(),
            limits,
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// A fresh anonymous session. It is stored on the first [`save`](Self::save)
    /// after it starts a sign-in.
    pub fn create(&self) -> AuthSession {
        let session = AuthSession::new();
        debug!("Created session {}", session.id());
        session
    }

    pub async fn get(&self, id: &str) -> Option<AuthSession> {
        self.get_at(id, Utc::now()).await
    }

    pub async fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<AuthSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|session| self.is_live(session, now))
            .cloned()
    }

    /// Look up `id`, falling back to a new anonymous session when it is
    /// unknown or expired.
    pub async fn get_or_create(&self, id: Option<&str>) -> AuthSession {
        if let Some(id) = id {
            if let Some(session) = self.get(id).await {
                return session;
            }
        }
        self.create()
    }

    pub async fn save(&self, session: AuthSession) {
        self.save_at(session, Utc::now()).await;
    }

    /// Store `session`, or drop it when it has gone back to anonymous.
    pub async fn save_at(&self, session: AuthSession, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;
        self.sweep(&mut sessions, now);

        if !self.is_live(&session, now) {
            sessions.remove(session.id());
            return;
        }
        sessions.insert(session.id().to_string(), session);
        self.enforce_pending_cap(&mut sessions);
    }

    pub async fn invalidate(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id).is_some()
    }

    /// Drop every expired session; returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        self.sweep(&mut sessions, now)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn is_live(&self, session: &AuthSession, now: DateTime<Utc>) -> bool {
        match session.state() {
            AuthState::Anonymous => false,
            AuthState::Pending { issued_at } => now - *issued_at <= self.limits.pending_ttl,
            AuthState::Authenticated { signed_in_at, .. } => {
                now - *signed_in_at <= self.limits.session_ttl
            }
        }
    }

    fn sweep(&self, sessions: &mut HashMap<String, AuthSession>, now: DateTime<Utc>) -> usize {
        let before = sessions.len();
        sessions.retain(|_, session| self.is_live(session, now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!("Evicted {} expired sessions", removed);
        }
        removed
    }

    fn enforce_pending_cap(&self, sessions: &mut HashMap<String, AuthSession>) {
        let mut pending: Vec<(DateTime<Utc>, String)> = sessions
            .iter()
            .filter_map(|(id, session)| match session.state() {
                AuthState::Pending { issued_at } => Some((*issued_at, id.clone())),
                _ => None,
            })
            .collect();
        if pending.len() <= self.limits.max_pending {
            return;
        }

        pending.sort();
        let excess = pending.len() - self.limits.max_pending;
        warn!("Pending sign-in limit reached; evicting {} oldest", excess);
        for (_, id) in pending.into_iter().take(excess) {
            sessions.remove(&id);
        }
    }
}
