use std::future::Future;

use crate::error::Error;
use crate::lifecycle::{AuthApi, Notice, RefreshOutcome, TokenLifecycle};
use crate::types::AccessToken;

/// Notification behavior of [`TokenLifecycle::call_with_auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    success_message: Option<String>,
    notify_errors: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CallOptions {
    /// Errors are notified, success is silent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            success_message: None,
            notify_errors: true,
        }
    }

    #[must_use]
    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    /// Leave error reporting to the caller.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.notify_errors = false;
        self
    }

    #[must_use]
    pub fn success_message(&self) -> Option<&str> {
        self.success_message.as_deref()
    }

    #[must_use]
    pub fn notify_errors(&self) -> bool {
        self.notify_errors
    }
}

impl<A: AuthApi> TokenLifecycle<A> {
    /// Run `call` with the current token, refreshing once on a 401.
    ///
    /// - Success returns the value (and notifies the success message, if set).
    /// - [`Error::Unauthorized`] triggers one refresh. If it succeeds, `call`
    ///   runs once more and that outcome is final. If it fails, the session is
    ///   expired and the original error is returned. If the session changed
    ///   while the refresh was in flight, `call` runs once more with whatever
    ///   token is stored now.
    /// - Any other error is notified as its priority message and returned.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] when there is no session, otherwise
    /// whatever `call` returned last.
    pub async fn call_with_auth<T, F, Fut>(&self, options: &CallOptions, mut call: F) -> Result<T, Error>
    where
        F: FnMut(AccessToken) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let Some(token) = self.current_token() else {
            self.expire("no session for an authenticated call");
            return Err(Error::NotAuthenticated);
        };

        let result = match call(token).await {
            Err(e) if e.is_auth_failure() => {
                tracing::info!("request unauthorized, refreshing token before retrying");
                if self.refresh().await == RefreshOutcome::Failed {
                    self.expire("token refresh failed after 401");
                    return Err(e);
                }
                let Some(token) = self.current_token() else {
                    return Err(e);
                };
                call(token).await
            }
            other => other,
        };

        match &result {
            Ok(_) => {
                if let Some(message) = options.success_message() {
                    self.notify(Notice::Success(message.to_owned()));
                }
            }
            Err(e) if options.notify_errors() => {
                let normalized = e.to_normalized();
                self.notify(Notice::Error(normalized.priority_message().to_owned()));
            }
            Err(_) => {}
        }
        result
    }

    fn current_token(&self) -> Option<AccessToken> {
        self.store()
            .access_token()
            .inspect_err(|e| tracing::error!(error = %e, "cannot read access token"))
            .ok()
            .flatten()
    }
}
