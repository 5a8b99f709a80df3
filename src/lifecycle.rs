//! Session state machine: login, proactive refresh, forced logout.
//!
//! ```text
//! Anonymous ──login/register──▶ Authenticated ──timer / 401──▶ Refreshing
//!     ▲                              ▲                            │
//!     │                              └────────── success ─────────┤
//!     └──────────────────────────── failure ──────────────────────┘
//! ```
//!
//! Two background tasks drive it: a one-shot timer that fires
//! [`refresh_lead`](crate::LifecycleSettings::refresh_lead) before expiry, and a
//! periodic poll that reconciles the in-memory state with the
//! [`SessionStore`]. Both hold only a weak reference to the lifecycle and are
//! aborted when it is shut down or dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::LifecycleSettings;
use crate::error::Error;
use crate::session::{Session, SessionStore, parse_expiration};
use crate::types::{AccessToken, Cpf, LoginResponse, Person, RefreshResponse};
use crate::validation::validate_registration;

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LifecycleState {
    Anonymous,
    Authenticated,
    Refreshing,
}

impl LifecycleState {
    #[must_use]
    pub fn is_logged_in(self) -> bool {
        self != Self::Anonymous
    }
}

/// How a call to [`TokenLifecycle::refresh`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RefreshOutcome {
    /// New token stored.
    Refreshed,
    /// The backend refused or was unreachable; the session was expired.
    Failed,
    /// The session changed (logout, new login) while the call was in
    /// flight and its result was discarded. Nothing was expired.
    Superseded,
}

impl RefreshOutcome {
    #[must_use]
    pub fn is_refreshed(self) -> bool {
        self == Self::Refreshed
    }
}

/// A user-visible message (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Notice {
    Success(String),
    Error(String),
    /// Emitted once per forced transition to [`LifecycleState::Anonymous`].
    SessionExpired,
}

impl Notice {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Success(message) | Self::Error(message) => message,
            Self::SessionExpired => SESSION_EXPIRED_MESSAGE,
        }
    }
}

/// Receives notices. Any `Fn(Notice)` closure qualifies.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notice: Notice);
}

impl<F> Notifier for F
where
    F: Fn(Notice) + Send + Sync + 'static,
{
    fn notify(&self, notice: Notice) {
        self(notice);
    }
}

/// Authentication endpoints the lifecycle needs.
///
/// Implemented by [`ApiClient`](crate::ApiClient); tests substitute fakes.
///
/// # Example
///
/// ```rust,ignore
/// impl AuthApi for MyBackend {
///     async fn login(&self, cpf: &Cpf, password: &str) -> Result<LoginResponse, Error> {
///         self.rpc.authenticate(cpf.as_str(), password).await
///     }
///     async fn refresh(&self, token: &AccessToken) -> Result<RefreshResponse, Error> {
///         self.rpc.renew(token.as_str()).await
///     }
///     async fn register(&self, person: &Person) -> Result<(), Error> {
///         self.rpc.sign_up(person).await
///     }
/// }
/// ```
pub trait AuthApi: Send + Sync + 'static {
    /// Exchange credentials for a token.
    fn login(
        &self,
        cpf: &Cpf,
        password: &str,
    ) -> impl Future<Output = Result<LoginResponse, Error>> + Send;

    /// Exchange a still-valid token for a fresh one.
    fn refresh(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<RefreshResponse, Error>> + Send;

    /// Create an account. `person.password` is set.
    fn register(&self, person: &Person) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Which sessions may enter a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGuard {
    /// Logged-in users only; everyone else goes to the login screen.
    Protected,
    /// Login and sign-up screens; logged-in users go to the main screen.
    AuthOnly,
}

impl RouteGuard {
    #[must_use]
    pub fn permits(self, logged_in: bool) -> bool {
        match self {
            Self::Protected => logged_in,
            Self::AuthOnly => !logged_in,
        }
    }
}

/// Time to wait before the proactive refresh: `max(0, (expires_at - now) - lead)`.
#[must_use]
pub fn refresh_delay(expires_at: OffsetDateTime, now: OffsetDateTime, lead: Duration) -> Duration {
    Duration::try_from(expires_at - now - lead).unwrap_or(Duration::ZERO)
}

/// Owns the session lifecycle. Cheap to clone; clones share state.
pub struct TokenLifecycle<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for TokenLifecycle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for TokenLifecycle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("state", &*lock(&self.inner.state))
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

struct Inner<A> {
    api: A,
    store: SessionStore,
    notifier: Box<dyn Notifier>,
    settings: LifecycleSettings,
    state: Mutex<LifecycleState>,
    /// Serializes refreshes; holds the outcome of the last one.
    refresh_gate: tokio::sync::Mutex<RefreshOutcome>,
    /// Bumped when a refresh completes.
    generation: AtomicU64,
    timer: Mutex<Option<(u64, JoinHandle<()>)>>,
    timer_seq: AtomicU64,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<A> Drop for Inner<A> {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, handle)) = timer.take() {
            handle.abort();
        }
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = poller.take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: AuthApi> TokenLifecycle<A> {
    /// Create an idle lifecycle in [`LifecycleState::Anonymous`].
    ///
    /// Nothing runs until [`start()`](Self::start) or a login.
    pub fn new(
        api: A,
        store: SessionStore,
        notifier: impl Notifier,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                notifier: Box::new(notifier),
                settings,
                state: Mutex::new(LifecycleState::Anonymous),
                refresh_gate: tokio::sync::Mutex::new(RefreshOutcome::Failed),
                generation: AtomicU64::new(0),
                timer: Mutex::new(None),
                timer_seq: AtomicU64::new(0),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Adopt whatever session the store holds and start the background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        let authenticated = self.inner.store.is_authenticated();
        if authenticated {
            self.set_state(LifecycleState::Authenticated);
            self.schedule_from_store();
        } else {
            self.set_state(LifecycleState::Anonymous);
        }
        tracing::debug!(authenticated, "session lifecycle started");
        self.spawn_poller();
    }

    /// Stop the refresh timer and the poll. The session itself is kept.
    pub fn shutdown(&self) {
        self.cancel_timer();
        if let Some(handle) = lock(&self.inner.poller).take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *lock(&self.inner.state)
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.state().is_logged_in()
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    #[must_use]
    pub fn api(&self) -> &A {
        &self.inner.api
    }

    #[must_use]
    pub fn settings(&self) -> &LifecycleSettings {
        &self.inner.settings
    }

    /// Emit a notice through the configured notifier.
    pub fn notify(&self, notice: Notice) {
        self.inner.notifier.notify(notice);
    }

    /// Log in and remember (or forget) `cpf` for the next login form.
    ///
    /// # Errors
    ///
    /// Returns the backend's normalized error, [`Error::Connectivity`], or
    /// [`Error::Storage`] if the session cannot be persisted.
    pub async fn login(&self, cpf: &Cpf, password: &str, remember: bool) -> Result<Session, Error> {
        let session = self.open_session(cpf, password).await?;
        self.inner.store.remember_user(cpf.as_str(), remember)?;
        Ok(session)
    }

    /// Create the account, then log in with the same credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] without calling the backend when the
    /// form fails the sign-up rules, otherwise the errors of the backend calls.
    pub async fn register(&self, person: &Person) -> Result<Session, Error> {
        let check = validate_registration(person);
        if !check.is_valid {
            return Err(Error::Validation(check.errors));
        }
        let cpf: Cpf = person.cpf.parse()?;
        let password = person.password.as_deref().unwrap_or_default();

        self.inner.api.register(person).await.inspect_err(|e| {
            tracing::warn!(error = %e, "registration failed");
        })?;
        tracing::info!(cpf = %cpf.formatted(), "account registered");

        self.open_session(&cpf, password).await
    }

    /// Voluntary logout. No notice is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the session keys cannot be removed; the
    /// in-memory state is Anonymous regardless.
    pub fn logout(&self) -> Result<(), Error> {
        self.cancel_timer();
        self.set_state(LifecycleState::Anonymous);
        tracing::info!("logged out");
        self.inner.store.clear()
    }

    /// Refresh the token now.
    ///
    /// Concurrent callers share one backend call: whoever arrives while a
    /// refresh is running waits for it and returns its outcome. A result that
    /// lands after a logout or a new login is dropped and reported as
    /// [`RefreshOutcome::Superseded`].
    pub async fn refresh(&self) -> RefreshOutcome {
        let seen = self.inner.generation.load(Ordering::Acquire);
        let mut last_outcome = self.inner.refresh_gate.lock().await;
        if self.inner.generation.load(Ordering::Acquire) != seen {
            tracing::debug!(outcome = %*last_outcome, "joined a refresh already in flight");
            return *last_outcome;
        }

        let outcome = self.perform_refresh().await;
        *last_outcome = outcome;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Forced logout: clear the session and notify if a session was active.
    pub(crate) fn expire(&self, reason: &str) {
        self.cancel_timer();
        if let Err(e) = self.inner.store.clear() {
            tracing::error!(error = %e, "failed to clear session");
        }
        let previous = std::mem::replace(&mut *lock(&self.inner.state), LifecycleState::Anonymous);
        if previous.is_logged_in() {
            tracing::warn!(reason, "session expired, forcing logout");
            self.notify(Notice::SessionExpired);
        }
    }

    async fn open_session(&self, cpf: &Cpf, password: &str) -> Result<Session, Error> {
        let response = self.inner.api.login(cpf, password).await.inspect_err(|e| {
            tracing::warn!(error = %e, "login failed");
        })?;

        let session = Session {
            expires_at: parse_expiration(&response.expiration)?,
            access_token: response.access_token,
            subject_id: response.cpf,
        };
        self.inner.store.save(&session)?;
        self.set_state(LifecycleState::Authenticated);
        self.schedule_refresh(session.expires_at);

        tracing::info!(cpf = %cpf.formatted(), "login successful");
        Ok(session)
    }

    async fn perform_refresh(&self) -> RefreshOutcome {
        let token = match self.inner.store.access_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.expire("no token to refresh");
                return RefreshOutcome::Failed;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot read token for refresh");
                self.expire("session storage unreadable");
                return RefreshOutcome::Failed;
            }
        };

        self.set_state(LifecycleState::Refreshing);
        tracing::debug!("refreshing access token");

        let result = self.inner.api.refresh(&token).await.and_then(|response| {
            let expires_at = parse_expiration(&response.expiration)?;
            Ok((response.access_token, expires_at))
        });

        if self.state() != LifecycleState::Refreshing {
            tracing::debug!("session changed during refresh, discarding result");
            return RefreshOutcome::Superseded;
        }

        let stored = result.and_then(|(token, expires_at)| {
            self.inner.store.update_token(&token, expires_at)?;
            Ok(expires_at)
        });
        match stored {
            Ok(expires_at) => {
                self.set_state(LifecycleState::Authenticated);
                self.schedule_refresh(expires_at);
                tracing::info!("access token refreshed");
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                self.expire("token refresh failed");
                RefreshOutcome::Failed
            }
        }
    }

    fn set_state(&self, state: LifecycleState) {
        *lock(&self.inner.state) = state;
    }

    fn schedule_from_store(&self) {
        match self.inner.store.expires_at() {
            Ok(Some(expires_at)) => self.schedule_refresh(expires_at),
            Ok(None) => tracing::debug!("no expiry stored, refresh not scheduled"),
            Err(e) => tracing::error!(error = %e, "cannot read token expiry"),
        }
    }

    /// Replace the pending refresh timer.
    fn schedule_refresh(&self, expires_at: OffsetDateTime) {
        let delay = refresh_delay(
            expires_at,
            OffsetDateTime::now_utc(),
            self.inner.settings.refresh_lead(),
        );
        let deadline = Instant::now() + delay;
        let id = self.inner.timer_seq.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let lifecycle = TokenLifecycle { inner };
            lifecycle.release_timer(id);
            lifecycle.refresh().await;
        });
        tracing::debug!(delay_secs = delay.as_secs(), "token refresh scheduled");

        if let Some((_, previous)) = lock(&self.inner.timer).replace((id, handle)) {
            previous.abort();
        }
    }

    /// Forget the timer slot without aborting it, if it is still ours.
    fn release_timer(&self, id: u64) {
        let mut timer = lock(&self.inner.timer);
        if timer.as_ref().is_some_and(|(current, _)| *current == id) {
            timer.take();
        }
    }

    fn cancel_timer(&self) {
        if let Some((_, handle)) = lock(&self.inner.timer).take() {
            handle.abort();
        }
    }

    fn spawn_poller(&self) {
        let period = self.inner.settings.poll_interval();
        let first_tick = Instant::now() + period;
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TokenLifecycle { inner }.poll();
            }
        });

        if let Some(previous) = lock(&self.inner.poller).replace(handle) {
            previous.abort();
        }
    }

    /// Reconcile the in-memory state with the store.
    fn poll(&self) {
        let state = self.state();
        if state == LifecycleState::Refreshing {
            return;
        }
        match (state.is_logged_in(), self.inner.store.is_authenticated()) {
            (true, false) => {
                tracing::info!("stored session expired or was removed");
                self.expire("session no longer valid in storage");
            }
            (false, true) => {
                tracing::info!("session appeared in storage");
                self.set_state(LifecycleState::Authenticated);
                self.schedule_from_store();
            }
            _ => {}
        }
    }
}
