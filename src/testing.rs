//! Fakes shared by the async tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::Error;
use crate::lifecycle::{AuthApi, Notice, Notifier};
use crate::normalize::{INVALID_CREDENTIALS, NormalizedApiError};
use crate::session::Session;
use crate::types::{AccessToken, Cpf, LoginResponse, Person, RefreshResponse};

pub(crate) const PASSWORD: &str = "secret1";

/// Issued tokens live this long.
const TOKEN_TTL: time::Duration = time::Duration::minutes(10);

#[derive(Debug, Default)]
struct Calls {
    login: AtomicUsize,
    refresh: AtomicUsize,
    register: AtomicUsize,
}

/// Backend that accepts [`PASSWORD`] and numbers refreshed tokens
/// `token-1`, `token-2`, ...
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeApi {
    calls: Arc<Calls>,
    refresh_fails: bool,
    delay: Duration,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_refresh(mut self) -> Self {
        self.refresh_fails = true;
        self
    }

    /// Time each refresh takes to answer.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.calls.login.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.calls.refresh.load(Ordering::SeqCst)
    }

    pub(crate) fn register_calls(&self) -> usize {
        self.calls.register.load(Ordering::SeqCst)
    }
}

impl AuthApi for FakeApi {
    async fn login(&self, cpf: &Cpf, password: &str) -> Result<LoginResponse, Error> {
        self.calls.login.fetch_add(1, Ordering::SeqCst);
        if password != PASSWORD {
            return Err(Error::Api(NormalizedApiError::from_global(INVALID_CREDENTIALS)));
        }
        Ok(LoginResponse::new(
            AccessToken::new("token-0"),
            cpf.as_str(),
            expiration_in(TOKEN_TTL),
        ))
    }

    async fn refresh(&self, _token: &AccessToken) -> Result<RefreshResponse, Error> {
        let n = self.calls.refresh.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.refresh_fails {
            return Err(Error::Api(NormalizedApiError::from_global("invalid token")));
        }
        Ok(RefreshResponse::new(
            AccessToken::new(format!("token-{n}")),
            expiration_in(TOKEN_TTL),
        ))
    }

    async fn register(&self, _person: &Person) -> Result<(), Error> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Collects notices for assertions.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<Notice>>>);

impl Recorder {
    pub(crate) fn notifier(&self) -> impl Notifier {
        let notices = Arc::clone(&self.0);
        move |notice: Notice| notices.lock().unwrap().push(notice)
    }

    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn expired_count(&self) -> usize {
        self.notices()
            .iter()
            .filter(|n| **n == Notice::SessionExpired)
            .count()
    }
}

/// Let spawned tasks run up to their next pending timer.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn valid_cpf() -> Cpf {
    "52998224725".parse().unwrap()
}

pub(crate) fn session_expiring_in(ttl: time::Duration) -> Session {
    Session {
        access_token: AccessToken::new("token-0"),
        subject_id: valid_cpf().as_str().to_owned(),
        expires_at: OffsetDateTime::now_utc() + ttl,
    }
}

fn expiration_in(ttl: time::Duration) -> String {
    (OffsetDateTime::now_utc() + ttl).format(&Rfc3339).unwrap()
}
