use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::attempt_session::{AttemptSession, SessionState, TickOutcome};
use crate::error::{Error, Result};

pub type SharedSession = Arc<Mutex<AttemptSession>>;

/// Live attempt sessions keyed by attempt id. Each session sits behind its own async
/// mutex, which both request handlers and the countdown task lock.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: AttemptSession) -> SharedSession {
        let id = session.attempt_id();
        let shared = Arc::new(Mutex::new(session));
        self.sessions
            .write()
            .expect("session registry lock poisoned")
            .insert(id, shared.clone());
        shared
    }

    pub fn get(&self, session_id: Uuid) -> Result<SharedSession> {
        self.sessions
            .read()
            .expect("session registry lock poisoned")
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", session_id)))
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .expect("session registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops completed sessions that started more than `completed_after` ago, and
    /// sessions that never completed (abandoned, or stuck in `Submitting`) once they are
    /// older than `abandoned_after`. A running countdown keeps its session alive. Sessions
    /// that are busy right now are left for the next sweep.
    pub fn prune(&self, completed_after: chrono::Duration, abandoned_after: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().expect("session registry lock poisoned");
        let before = sessions.len();
        sessions.retain(|id, shared| {
            let Ok(session) = shared.try_lock() else {
                return true;
            };
            let age = session.started_at().map(|at| now - at);
            match session.state() {
                SessionState::Completed => age.map_or(false, |age| age <= completed_after),
                SessionState::InProgress
                    if session.remaining_seconds().is_some_and(|left| left > 0) =>
                {
                    true
                }
                state => {
                    let keep = age.is_some_and(|age| age <= abandoned_after);
                    if !keep && state == SessionState::Submitting {
                        tracing::warn!(session_id = %id, "dropping session whose submission was never stored");
                    }
                    keep
                }
            }
        });
        before - sessions.len()
    }

    /// Ticks the session once a second until it leaves `InProgress`. When the countdown
    /// runs out, `on_expired` is handed the session, which is then in `Submitting`.
    pub fn spawn_countdown<F, Fut>(&self, session: SharedSession, on_expired: F) -> JoinHandle<()>
    where
        F: FnOnce(SharedSession) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                let outcome = session.lock().await.tick(Utc::now());
                match outcome {
                    TickOutcome::Running { .. } => continue,
                    TickOutcome::Idle => break,
                    TickOutcome::Expired => {
                        let attempt_id = session.lock().await.attempt_id();
                        tracing::info!(%attempt_id, "time limit reached, submitting attempt");
                        on_expired(session).await;
                        break;
                    }
                }
            }
        })
    }
}
