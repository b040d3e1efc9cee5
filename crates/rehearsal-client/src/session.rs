//! Client session manager
//!
//! Holds the tokens for the signed-in user and keeps the access token fresh
//! with a background task that renews it every [`SESSION_REFRESH_INTERVAL`].
//!
//! Every login starts a new session epoch. A refresh response is applied only
//! while the session that requested it is still current, so a refresh that
//! resolves after logout (or after a re-login) cannot resurrect old tokens.

use crate::api::{AuthApi, RegisterForm};
use crate::config::SESSION_REFRESH_INTERVAL;
use crate::error::{ClientError, Result};
use crate::routes::Route;
use rehearsal_core::User;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Published on every authentication transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Anonymous,
    Authenticated,
}

/// Local view of the current session
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    epoch: u64,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

struct Inner {
    api: Arc<dyn AuthApi>,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<AuthStatus>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refresh token of the session with `epoch`, if it is still current
    fn refresh_token_for(&self, epoch: u64) -> Option<String> {
        let state = self.lock();
        if state.epoch == epoch {
            state.refresh_token.clone()
        } else {
            None
        }
    }

    async fn refresh(&self, refresh_token: String, epoch: u64) -> Result<()> {
        match self.api.refresh(&refresh_token).await {
            Ok(access_token) => {
                let mut state = self.lock();
                if state.epoch == epoch && state.is_authenticated() {
                    state.access_token = Some(access_token);
                    debug!(epoch, "access token refreshed");
                } else {
                    debug!(epoch, current = state.epoch, "discarding refresh for a stale session");
                }
                Ok(())
            }
            Err(e) => {
                self.expire(epoch);
                Err(e)
            }
        }
    }

    /// Drop the session with `epoch` after its refresh failed
    fn expire(&self, epoch: u64) {
        {
            let mut state = self.lock();
            if state.epoch != epoch || !state.is_authenticated() {
                return;
            }
            *state = SessionState {
                epoch: epoch + 1,
                ..SessionState::default()
            };
        }
        warn!(epoch, "session expired");
        self.status_tx.send_replace(AuthStatus::Anonymous);
    }

    /// Clear local state unconditionally, returning the old refresh token
    fn clear(&self) -> Option<String> {
        let refresh_token = {
            let mut state = self.lock();
            let refresh_token = state.refresh_token.take();
            *state = SessionState {
                epoch: state.epoch + 1,
                ..SessionState::default()
            };
            refresh_token
        };
        self.status_tx.send_replace(AuthStatus::Anonymous);
        refresh_token
    }
}

/// Owned handle to the background refresh task
struct RefreshTask {
    epoch: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    fn spawn(inner: Arc<Inner>, epoch: u64, period: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(refresh_loop(inner, epoch, period, stop_rx));
        Self {
            epoch,
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        // An in-flight refresh is cancelled rather than awaited.
        self.handle.abort();
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

async fn refresh_loop(
    inner: Arc<Inner>,
    epoch: u64,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(refresh_token) = inner.refresh_token_for(epoch) else {
                    break;
                };
                if let Err(e) = inner.refresh(refresh_token, epoch).await {
                    warn!(epoch, error = %e, "token refresh failed");
                    break;
                }
            }
            _ = &mut stop_rx => break,
        }
    }

    debug!(epoch, "refresh task stopped");
}

/// Session manager
///
/// Dropping the manager stops its refresh task.
pub struct SessionManager {
    inner: Arc<Inner>,
    task: Mutex<Option<RefreshTask>>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::Anonymous);
        Self {
            inner: Arc::new(Inner {
                api,
                state: Mutex::new(SessionState::default()),
                status_tx,
            }),
            task: Mutex::new(None),
        }
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<User> {
        self.inner.api.register(form).await
    }

    /// Sign in, replacing any current session
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let response = self.inner.api.login(email, password).await?;
        let user = response.user.clone();

        // The task slot stays locked until the new epoch's task is installed,
        // so concurrent logins cannot leave a stale task in place.
        let previous = {
            let mut task = self.lock_task();
            let epoch = {
                let mut state = self.inner.lock();
                let epoch = state.epoch + 1;
                *state = SessionState {
                    user: Some(response.user),
                    access_token: Some(response.access_token),
                    refresh_token: Some(response.refresh_token),
                    epoch,
                };
                epoch
            };
            self.inner.status_tx.send_replace(AuthStatus::Authenticated);
            task.replace(RefreshTask::spawn(
                self.inner.clone(),
                epoch,
                SESSION_REFRESH_INTERVAL,
            ))
        };
        if let Some(task) = previous {
            task.stop();
        }

        info!(user_id = %user.id, "logged in");
        Ok(user)
    }

    /// Renew the access token now
    ///
    /// A failure ends the session.
    pub async fn refresh_now(&self) -> Result<()> {
        let (refresh_token, epoch) = {
            let state = self.inner.lock();
            let token = state
                .refresh_token
                .clone()
                .ok_or(ClientError::NotAuthenticated)?;
            (token, state.epoch)
        };
        self.inner.refresh(refresh_token, epoch).await
    }

    /// Sign out
    ///
    /// Local state is cleared and the refresh task stopped before the server
    /// is notified; a failed notification still leaves the client signed out.
    pub async fn logout(&self) -> Result<()> {
        let (refresh_token, previous) = {
            let mut task = self.lock_task();
            (self.inner.clear(), task.take())
        };
        if let Some(task) = previous {
            task.stop();
        }

        match refresh_token {
            Some(token) => self.inner.api.logout(&token).await,
            None => Ok(()),
        }
    }

    /// Sign in, GET `path`, then sign out
    ///
    /// The logout runs whether or not the request succeeded; a request error
    /// takes precedence over a logout error.
    pub async fn login_and_get(
        &self,
        email: &str,
        password: &str,
        path: &str,
    ) -> Result<serde_json::Value> {
        self.login(email, password).await?;
        let body = self.authorized_get(path).await;
        let logout = self.logout().await;
        let body = body?;
        logout?;
        Ok(body)
    }

    /// Where navigating to `route` actually lands
    pub fn resolve(&self, route: Route) -> Route {
        if route.requires_auth() && !self.is_authenticated() {
            Route::Login
        } else {
            route
        }
    }

    pub fn resolve_path(&self, path: &str) -> Route {
        self.resolve(Route::parse(path))
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().is_authenticated()
    }

    pub fn status(&self) -> AuthStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.lock().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.lock().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.lock().access_token.clone()
    }

    /// GET `path` with the current access token
    pub async fn authorized_get(&self, path: &str) -> Result<serde_json::Value> {
        let token = self.access_token().ok_or(ClientError::NotAuthenticated)?;
        self.inner.api.get_json(path, &token).await
    }

    /// Whether a live refresh task belongs to the current session
    pub fn refresh_task_running(&self) -> bool {
        let task = self.lock_task();
        let epoch = self.inner.lock().epoch;
        task.as_ref()
            .is_some_and(|task| task.epoch == epoch && task.is_running())
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<RefreshTask>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn replace_task(&self, next: Option<RefreshTask>) {
        let previous = std::mem::replace(&mut *self.lock_task(), next);
        if let Some(task) = previous {
            task.stop();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.replace_task(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LoginResponse;
    use async_trait::async_trait;
    use chrono::Utc;
    use rehearsal_core::Profile;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    const PAST_ONE_TICK: Duration = Duration::from_secs(10 * 60 + 1);

    #[derive(Default)]
    struct MockApi {
        logins: AtomicUsize,
        refreshes: AtomicUsize,
        logouts: AtomicUsize,
        fail_refresh: AtomicBool,
        fail_get: AtomicBool,
        refresh_delay: Mutex<Option<Duration>>,
    }

    impl MockApi {
        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    fn user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            phone_number: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            profile: Profile::default(),
        }
    }

    #[async_trait]
    impl AuthApi for MockApi {
        async fn register(&self, form: &RegisterForm) -> Result<User> {
            Ok(user(&form.email))
        }

        async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
            if password != "secret123" {
                return Err(ClientError::Unauthorized("Invalid credentials".into()));
            }
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(LoginResponse {
                message: "Login successful".into(),
                user: user(email),
                access_token: format!("access-login-{n}"),
                refresh_token: format!("refresh-{n}"),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<String> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = *self.refresh_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_refresh.load(Ordering::SeqCst) {
                return Err(ClientError::Unauthorized(
                    "Invalid or expired refresh token".into(),
                ));
            }
            Ok(format!("access-refresh-{n}"))
        }

        async fn logout(&self, _refresh_token: &str) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_json(&self, path: &str, access_token: &str) -> Result<serde_json::Value> {
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(ClientError::Api {
                    status: 500,
                    message: "Server error".into(),
                });
            }
            Ok(serde_json::json!({ "path": path, "token": access_token }))
        }
    }

    fn manager() -> (Arc<MockApi>, SessionManager) {
        let api = Arc::new(MockApi::default());
        (api.clone(), SessionManager::new(api))
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_stores_tokens_and_starts_task() {
        let (_, session) = manager();
        assert_eq!(session.status(), AuthStatus::Anonymous);

        let user = session.login("a@b.com", "secret123").await.unwrap();

        assert!(session.is_authenticated());
        assert_eq!(session.status(), AuthStatus::Authenticated);
        assert_eq!(session.current_user().unwrap().id, user.id);
        assert_eq!(session.access_token().as_deref(), Some("access-login-1"));
        assert_eq!(
            session.snapshot().refresh_token.as_deref(),
            Some("refresh-1")
        );
        assert!(session.refresh_task_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_stays_anonymous() {
        let (_, session) = manager();

        let err = session.login("a@b.com", "wrong").await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
        assert!(!session.is_authenticated());
        assert!(!session.refresh_task_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_every_ten_minutes() {
        let (api, session) = manager();
        session.login("a@b.com", "secret123").await.unwrap();

        tokio::time::sleep(Duration::from_secs(9 * 60)).await;
        assert_eq!(api.refreshes(), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(api.refreshes(), 1);
        assert_eq!(session.access_token().as_deref(), Some("access-refresh-1"));

        tokio::time::sleep(SESSION_REFRESH_INTERVAL).await;
        assert_eq!(api.refreshes(), 2);
        assert_eq!(session.access_token().as_deref(), Some("access-refresh-2"));
        assert!(session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_stops_refresh() {
        let (api, session) = manager();
        session.login("a@b.com", "secret123").await.unwrap();

        session.logout().await.unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.status(), AuthStatus::Anonymous);
        assert_eq!(api.logouts.load(Ordering::SeqCst), 1);
        assert!(!session.refresh_task_running());

        tokio::time::sleep(PAST_ONE_TICK * 3).await;
        assert_eq!(api.refreshes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_when_anonymous_skips_server() {
        let (api, session) = manager();
        session.logout().await.unwrap();
        assert_eq!(api.logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_ends_session() {
        let (api, session) = manager();
        let mut status = session.subscribe();
        session.login("a@b.com", "secret123").await.unwrap();
        assert_eq!(*status.borrow_and_update(), AuthStatus::Authenticated);

        api.fail_refresh.store(true, Ordering::SeqCst);
        tokio::time::sleep(PAST_ONE_TICK).await;

        assert_eq!(api.refreshes(), 1);
        assert!(!session.is_authenticated());
        assert!(session.snapshot().refresh_token.is_none());
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), AuthStatus::Anonymous);
        assert_eq!(session.resolve(Route::Bands), Route::Login);
        assert!(!session.refresh_task_running());

        // Single attempt: no retries afterwards.
        tokio::time::sleep(PAST_ONE_TICK * 2).await;
        assert_eq!(api.refreshes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_logout_is_discarded() {
        let api = Arc::new(MockApi::default());
        *api.refresh_delay.lock().unwrap() = Some(Duration::from_secs(5));
        let session = Arc::new(SessionManager::new(api.clone()));
        session.login("a@b.com", "secret123").await.unwrap();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.refresh_now().await })
        };
        // Let the refresh reach the server before logging out.
        while api.refreshes() == 0 {
            tokio::task::yield_now().await;
        }

        session.logout().await.unwrap();
        pending.await.unwrap().unwrap();

        assert!(!session.is_authenticated());
        assert_eq!(session.access_token(), None);
        assert_eq!(session.status(), AuthStatus::Anonymous);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_from_previous_login_is_discarded() {
        let api = Arc::new(MockApi::default());
        *api.refresh_delay.lock().unwrap() = Some(Duration::from_secs(5));
        let session = Arc::new(SessionManager::new(api.clone()));
        session.login("a@b.com", "secret123").await.unwrap();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.refresh_now().await })
        };
        while api.refreshes() == 0 {
            tokio::task::yield_now().await;
        }

        session.login("a@b.com", "secret123").await.unwrap();
        pending.await.unwrap().unwrap();

        assert_eq!(session.access_token().as_deref(), Some("access-login-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_replaces_task() {
        let (api, session) = manager();
        session.login("a@b.com", "secret123").await.unwrap();
        session.login("a@b.com", "secret123").await.unwrap();

        tokio::time::sleep(PAST_ONE_TICK).await;
        assert_eq!(api.refreshes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_refresh_task() {
        let (api, session) = manager();
        session.login("a@b.com", "secret123").await.unwrap();

        drop(session);
        tokio::time::sleep(PAST_ONE_TICK * 2).await;
        assert_eq!(api.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_resolve_routes() {
        let (_, session) = manager();

        assert_eq!(session.resolve_path("/bands/3"), Route::Login);
        assert_eq!(session.resolve_path("/register"), Route::Register);
        assert_eq!(session.resolve_path("/does-not-exist"), Route::NotFound);

        session.login("a@b.com", "secret123").await.unwrap();
        assert_eq!(
            session.resolve_path("/bands/3"),
            Route::BandDetail("3".into())
        );
        assert_eq!(session.resolve(Route::Dashboard), Route::Dashboard);
    }

    #[tokio::test]
    async fn test_authorized_get() {
        let (_, session) = manager();
        assert!(matches!(
            session.authorized_get("/api/users/me").await,
            Err(ClientError::NotAuthenticated)
        ));

        session.login("a@b.com", "secret123").await.unwrap();
        let body = session.authorized_get("/api/users/me").await.unwrap();
        assert_eq!(body["token"], "access-login-1");
    }

    #[tokio::test]
    async fn test_refresh_now_requires_session() {
        let (_, session) = manager();
        assert!(matches!(
            session.refresh_now().await,
            Err(ClientError::NotAuthenticated)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_logins_keep_current_task() {
        let (api, session) = manager();
        let session = Arc::new(session);

        for _ in 0..20 {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let session = session.clone();
                    tokio::spawn(async move { session.login("a@b.com", "secret123").await })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            assert!(session.is_authenticated());
            assert!(session.refresh_task_running());
        }

        session.logout().await.unwrap();
        assert!(!session.refresh_task_running());
        assert_eq!(api.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_and_get_always_logs_out() {
        let (api, session) = manager();

        let body = session
            .login_and_get("a@b.com", "secret123", "/api/users/me")
            .await
            .unwrap();
        assert_eq!(body["path"], "/api/users/me");
        assert_eq!(api.logouts.load(Ordering::SeqCst), 1);

        api.fail_get.store(true, Ordering::SeqCst);
        let err = session
            .login_and_get("a@b.com", "secret123", "/api/users/me")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 500, .. }));
        assert_eq!(api.logouts.load(Ordering::SeqCst), 2);
        assert!(!session.is_authenticated());
        assert!(!session.refresh_task_running());
    }
}
