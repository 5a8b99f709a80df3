use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::session::{FileStorage, SessionStore};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing of the session lifecycle and of read retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    refresh_lead: Duration,
    poll_interval: Duration,
    reconnect_delay: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            refresh_lead: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl LifecycleSettings {
    /// How long before expiry the proactive refresh fires (default 5 min).
    #[must_use]
    pub fn with_refresh_lead(mut self, lead: Duration) -> Self {
        self.refresh_lead = lead;
        self
    }

    /// Period of the background expiry check (default 60 s).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause between reconnection attempts of read operations (default 5 s).
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn refresh_lead(&self) -> Duration {
        self.refresh_lead
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}

/// Console client configuration.
///
/// The base URL is the only required field. Use [`from_env()`](ClientConfig::from_env)
/// for convention-based setup, or [`new()`](ClientConfig::new) with `with_*`
/// methods for full control.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) session_file: Option<PathBuf>,
    pub(crate) lifecycle: LifecycleSettings,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            session_file: None,
            lifecycle: LifecycleSettings::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `PEOPLE_API_BASE_URL`: base URL of the REST backend
    ///
    /// # Optional env vars
    /// - `PEOPLE_API_TIMEOUT_SECS`: HTTP timeout in seconds
    /// - `PEOPLE_SESSION_FILE`: persist the session to this JSON file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL is missing or a value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("PEOPLE_API_BASE_URL")
            .map_err(|_| Error::Config("PEOPLE_API_BASE_URL is required".into()))?;
        let base_url: Url = base_url
            .parse()
            .map_err(|e| Error::Config(format!("PEOPLE_API_BASE_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Ok(secs) = std::env::var("PEOPLE_API_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("PEOPLE_API_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Ok(path) = std::env::var("PEOPLE_SESSION_FILE") {
            config = config.with_session_file(path);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: LifecycleSettings) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn session_file(&self) -> Option<&Path> {
        self.session_file.as_deref()
    }

    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleSettings {
        &self.lifecycle
    }

    /// Session store matching this config: file-backed when a session file
    /// is set, in memory otherwise.
    #[must_use]
    pub fn session_store(&self) -> SessionStore {
        match &self.session_file {
            Some(path) => SessionStore::new(FileStorage::new(path)),
            None => SessionStore::in_memory(),
        }
    }
}
