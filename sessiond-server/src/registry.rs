//! Session Registry
//!
//! Maps session ids to running sessions. Creation is single-flight: while a
//! session is being started, other callers for the same id wait for that
//! attempt instead of spawning a second PTY.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sessiond_protocol::SessionInfo;
use sessiond_utils::{Result, SessiondError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionOptions;
use crate::session::Session;

/// What waiters learn about an in-flight creation
type CreateOutcome = std::result::Result<Arc<Session>, String>;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    creating: HashMap<String, watch::Receiver<Option<CreateOutcome>>>,
    /// Set by `close_all`; no session is registered afterwards
    shutting_down: bool,
}

enum Role {
    Creator(JoinHandle<Result<Arc<Session>>>),
    Waiter(watch::Receiver<Option<CreateOutcome>>),
}

/// Registry of live sessions
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    options: SessionOptions,
}

impl SessionRegistry {
    pub fn new(options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            options,
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Return the running session for `id`, starting one if needed.
    ///
    /// The flag is true when the session already existed (or another caller
    /// created it concurrently).
    pub async fn get_or_create(self: &Arc<Self>, id: &str, cwd: &str) -> Result<(Arc<Session>, bool)> {
        if id.is_empty() {
            return Err(SessiondError::SessionIdRequired);
        }
        loop {
            let role = {
                let mut inner = self.inner.lock();
                if inner.shutting_down {
                    return Err(SessiondError::CreateFailed("daemon shutting down".into()));
                }
                if let Some(existing) = inner.sessions.get(id).cloned() {
                    if existing.is_running() {
                        return Ok((existing, true));
                    }
                    inner.sessions.remove(id);
                    continue;
                }
                match inner.creating.get(id) {
                    Some(rx) => Role::Waiter(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        inner.creating.insert(id.to_string(), rx);
                        Role::Creator(self.spawn_create(id.to_string(), resolve_cwd(cwd), tx))
                    }
                }
            };

            return match role {
                Role::Creator(task) => {
                    let session = task
                        .await
                        .map_err(|e| SessiondError::internal(format!("create task failed: {}", e)))??;
                    if !session.is_running() {
                        return Err(SessiondError::session_not_running(id));
                    }
                    Ok((session, false))
                }
                Role::Waiter(mut rx) => {
                    debug!(session_id = %id, "waiting for in-flight create");
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .map_err(|_| SessiondError::internal("create task ended without a result"))?
                        .clone();
                    match outcome {
                        Some(Ok(session)) if session.is_running() => Ok((session, true)),
                        Some(Err(message)) => Err(SessiondError::CreateFailed(message)),
                        _ => Err(SessiondError::session_not_running(id)),
                    }
                }
            };
        }
    }

    /// Start the session on its own task so an abandoned caller cannot
    /// leave the in-flight entry behind
    fn spawn_create(
        self: &Arc<Self>,
        id: String,
        cwd: PathBuf,
        tx: watch::Sender<Option<CreateOutcome>>,
    ) -> JoinHandle<Result<Arc<Session>>> {
        let registry = self.clone();
        tokio::spawn(async move {
            let session = Session::new(id.clone(), cwd, registry.options.clone());
            let weak = Arc::downgrade(&registry);
            session.set_on_close(move |closed| {
                if let Some(registry) = weak.upgrade() {
                    registry.remove_if_same(closed);
                }
            });

            let mut result = session.start().await;
            let late = {
                let mut inner = registry.inner.lock();
                inner.creating.remove(&id);
                if !inner.shutting_down && result.is_ok() && session.is_running() {
                    inner.sessions.insert(id.clone(), session.clone());
                }
                inner.shutting_down
            };
            if late && result.is_ok() {
                session.close("shutdown").await;
                result = Err(SessiondError::CreateFailed("daemon shutting down".into()));
            }
            match &result {
                Ok(()) => info!(session_id = %id, "session created"),
                Err(e) => info!(session_id = %id, error = %e, "session create failed"),
            }
            let outcome = match &result {
                Ok(()) => Ok(session.clone()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send(Some(outcome));
            result.map(|()| session)
        })
    }

    /// Look up a session; closed sessions are dropped from the map
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.get(id).cloned()?;
        if session.is_closed() {
            inner.sessions.remove(id);
            return None;
        }
        Some(session)
    }

    fn remove_if_same(&self, closed: &Session) {
        let mut inner = self.inner.lock();
        let same = inner
            .sessions
            .get(closed.id())
            .is_some_and(|s| std::ptr::eq(s.as_ref(), closed));
        if same {
            inner.sessions.remove(closed.id());
            debug!(session_id = %closed.id(), "session unregistered");
        }
    }

    /// Close `id`; unknown ids are fine.
    ///
    /// The close callback unregisters the session, and only if the map still
    /// points at it, so a session re-created during the close survives.
    pub async fn stop(&self, id: &str) {
        if let Some(session) = self.get(id) {
            session.close("closed").await;
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.inner.lock().sessions.values().cloned().collect();
        let mut infos: Vec<_> = sessions.iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session and refuse new ones
    pub async fn close_all(&self) {
        let sessions: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "closing all sessions");
        futures::future::join_all(sessions.iter().map(|s| s.close("shutdown"))).await;
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionRegistry")
            .field("sessions", &inner.sessions.len())
            .field("creating", &inner.creating.len())
            .finish()
    }
}

fn resolve_cwd(cwd: &str) -> PathBuf {
    if cwd.is_empty() {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    } else {
        PathBuf::from(cwd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_registry(dir: &TempDir) -> Arc<SessionRegistry> {
        SessionRegistry::new(SessionOptions::for_dir(dir.path()))
    }

    fn cwd(dir: &TempDir) -> String {
        dir.path().display().to_string()
    }

    #[tokio::test]
    async fn test_create_requires_id() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        let err = registry.get_or_create("", &cwd(&dir)).await.unwrap_err();
        assert_eq!(err.to_string(), "session id required");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_reuse() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let (first, existing) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();
        assert!(!existing);
        let (second, existing) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();
        assert!(existing);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(first.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_create_single_flight() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        let cwd = cwd(&dir);

        let results = futures::future::join_all(
            (0..5).map(|_| registry.get_or_create("ws", &cwd)),
        )
        .await;

        let sessions: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        let created = sessions.iter().filter(|(_, existing)| !existing).count();
        assert_eq!(created, 1);
        assert!(sessions
            .iter()
            .all(|(s, _)| Arc::ptr_eq(s, &sessions[0].0)));

        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_stop_removes_session() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        let (session, _) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();

        registry.stop("ws").await;
        assert!(session.is_closed());
        assert!(registry.get("ws").is_none());
        assert!(registry.list().is_empty());

        registry.stop("unknown").await;

        let (fresh, existing) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();
        assert!(!existing);
        assert!(!Arc::ptr_eq(&session, &fresh));
        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_close_unregisters_via_callback() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        let (session, _) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();

        session.close("closed").await;
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_list_reports_sessions() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        registry.get_or_create("b", &cwd(&dir)).await.unwrap();
        registry.get_or_create("a", &cwd(&dir)).await.unwrap();

        let list = registry.list();
        let ids: Vec<_> = list.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(list.iter().all(|s| s.running));
        assert_eq!(list[0].cwd, cwd(&dir));

        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_failed_create_not_registered() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let options = SessionOptions {
            transcript_dir: Some(blocker.join("logs")),
            ..SessionOptions::for_dir(dir.path())
        };
        let registry = SessionRegistry::new(options);

        let result = registry.get_or_create("ws", &cwd(&dir)).await;
        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.inner.lock().creating.is_empty());
    }

    // ==================== Lifecycle Race Tests ====================

    #[tokio::test]
    async fn test_stop_keeps_session_recreated_during_close() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        let (old, _) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();

        let stopper = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.stop("ws").await })
        };
        while !old.is_closed() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let (fresh, existing) = registry.get_or_create("ws", &cwd(&dir)).await.unwrap();
        assert!(!existing);
        stopper.await.unwrap();

        assert!(fresh.is_running());
        let current = registry.get("ws").expect("re-created session registered");
        assert!(Arc::ptr_eq(&current, &fresh));

        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_create_after_close_all_refused() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        registry.get_or_create("ws", &cwd(&dir)).await.unwrap();
        registry.close_all().await;

        let err = registry.get_or_create("other", &cwd(&dir)).await.unwrap_err();
        assert!(err.to_string().contains("shutting down"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_inflight_create_finishing_after_close_all() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        registry.close_all().await;

        let (tx, mut rx) = watch::channel(None);
        let result = registry
            .spawn_create("late".to_string(), dir.path().to_path_buf(), tx)
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.inner.lock().creating.is_empty());

        let outcome = rx.wait_for(Option::is_some).await.unwrap().clone();
        assert!(matches!(outcome, Some(Err(_))));
    }
}
