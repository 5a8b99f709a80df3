use std::sync::Arc;

use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use super::storage::{CredentialStorage, MemoryStorage};
use crate::error::Error;
use crate::types::AccessToken;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const USER_CPF_KEY: &str = "userCpf";
pub const TOKEN_EXPIRATION_KEY: &str = "tokenExpiration";
/// Independent of the session: survives logout.
pub const REMEMBERED_USER_KEY: &str = "rememberedUser";

/// The authenticated principal. All three parts exist together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: AccessToken,
    /// CPF of the account, as returned by `/Auth`.
    pub subject_id: String,
    pub expires_at: OffsetDateTime,
}

impl Session {
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

/// Parses the backend's expiration timestamp.
///
/// Accepts RFC 3339 and offset-less ISO 8601 (read as UTC).
///
/// # Errors
///
/// Returns [`Error::Api`] if the text is not a timestamp.
pub fn parse_expiration(text: &str) -> Result<OffsetDateTime, Error> {
    let text = text.trim();
    OffsetDateTime::parse(text, &Rfc3339)
        .or_else(|_| PrimitiveDateTime::parse(text, &Iso8601::DEFAULT).map(|dt| dt.assume_utc()))
        .map_err(|e| {
            Error::Api(crate::normalize::NormalizedApiError::from_global(format!(
                "Invalid token expiration '{text}': {e}"
            )))
        })
}

/// Single owner of the persisted session keys.
///
/// Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn CredentialStorage>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: impl CredentialStorage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// The stored session, if complete and readable. Expiry is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    pub fn session(&self) -> Result<Option<Session>, Error> {
        let [token, subject_id, expiration] = self.snapshot()?;
        let (Some(token), Some(subject_id), Some(expires_at)) = (
            token,
            subject_id,
            expiration.and_then(|text| parse_expiration(&text).ok()),
        ) else {
            return Ok(None);
        };
        Ok(Some(Session {
            access_token: AccessToken::from(token),
            subject_id,
            expires_at,
        }))
    }

    /// Token, subject and expiration text read together.
    fn snapshot(&self) -> Result<[Option<String>; 3], Error> {
        let values = self
            .storage
            .get_many(&[ACCESS_TOKEN_KEY, USER_CPF_KEY, TOKEN_EXPIRATION_KEY])?;
        <[Option<String>; 3]>::try_from(values).map_err(|values| {
            Error::Storage(format!("expected 3 values, storage returned {}", values.len()))
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    pub fn access_token(&self) -> Result<Option<AccessToken>, Error> {
        Ok(self.storage.get(ACCESS_TOKEN_KEY)?.map(AccessToken::from))
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    pub fn subject_id(&self) -> Result<Option<String>, Error> {
        self.storage.get(USER_CPF_KEY)
    }

    /// Stored expiry; an unparseable value reads as absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    pub fn expires_at(&self) -> Result<Option<OffsetDateTime>, Error> {
        Ok(self
            .storage
            .get(TOKEN_EXPIRATION_KEY)?
            .and_then(|text| parse_expiration(&text).ok()))
    }

    /// Persist a fresh session in one step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn save(&self, session: &Session) -> Result<(), Error> {
        let expiration = format_expiration(session.expires_at)?;
        self.storage.apply(&[
            (ACCESS_TOKEN_KEY, Some(session.access_token.as_str())),
            (USER_CPF_KEY, Some(session.subject_id.as_str())),
            (TOKEN_EXPIRATION_KEY, Some(expiration.as_str())),
        ])
    }

    /// Replace token and expiry together after a refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn update_token(&self, token: &AccessToken, expires_at: OffsetDateTime) -> Result<(), Error> {
        let expiration = format_expiration(expires_at)?;
        self.storage.apply(&[
            (ACCESS_TOKEN_KEY, Some(token.as_str())),
            (TOKEN_EXPIRATION_KEY, Some(expiration.as_str())),
        ])
    }

    /// Remove the session keys. The remembered identity is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn clear(&self) -> Result<(), Error> {
        self.storage.apply(&[
            (ACCESS_TOKEN_KEY, None),
            (USER_CPF_KEY, None),
            (TOKEN_EXPIRATION_KEY, None),
        ])
    }

    /// Token and expiry present and the expiry still ahead.
    ///
    /// Missing keys, an expired token and an unreadable store all read as
    /// `false`; callers cannot tell them apart.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn is_authenticated_at(&self, now: OffsetDateTime) -> bool {
        match self.snapshot() {
            Ok([Some(_), _, Some(expiration)]) => {
                parse_expiration(&expiration).is_ok_and(|expires_at| now < expires_at)
            }
            _ => false,
        }
    }

    /// Store `cpf` for the next login form when `remember` is set, forget it
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn remember_user(&self, cpf: &str, remember: bool) -> Result<(), Error> {
        let value = remember.then_some(cpf);
        self.storage.apply(&[(REMEMBERED_USER_KEY, value)])
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    pub fn remembered_user(&self) -> Result<Option<String>, Error> {
        self.storage.get(REMEMBERED_USER_KEY)
    }
}

fn format_expiration(at: OffsetDateTime) -> Result<String, Error> {
    at.format(&Rfc3339)
        .map_err(|e| Error::Storage(format!("cannot format expiration: {e}")))
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::macros::datetime;

    use super::*;

    fn session(expires_at: OffsetDateTime) -> Session {
        Session {
            access_token: AccessToken::new("token-0"),
            subject_id: "52998224725".into(),
            expires_at,
        }
    }

    #[test]
    fn save_and_read_back() {
        let store = SessionStore::in_memory();
        let expires_at = datetime!(2030-01-01 12:00 UTC);
        store.save(&session(expires_at)).unwrap();

        let read = store.session().unwrap().unwrap();
        assert_eq!(read, session(expires_at));
    }

    #[test]
    fn authenticated_only_before_expiry() {
        let store = SessionStore::in_memory();
        let expires_at = datetime!(2030-01-01 12:00 UTC);
        store.save(&session(expires_at)).unwrap();

        assert!(store.is_authenticated_at(expires_at - Duration::SECOND));
        assert!(!store.is_authenticated_at(expires_at));
        assert!(!store.is_authenticated_at(expires_at + Duration::SECOND));
    }

    #[test]
    fn missing_keys_are_not_authenticated() {
        let storage = MemoryStorage::new();
        storage.apply(&[(ACCESS_TOKEN_KEY, Some("t"))]).unwrap();
        let store = SessionStore::new(storage);

        assert!(!store.is_authenticated());
        assert_eq!(store.session().unwrap(), None);
    }

    #[test]
    fn garbage_expiry_is_not_authenticated() {
        let storage = MemoryStorage::new();
        storage
            .apply(&[(ACCESS_TOKEN_KEY, Some("t")), (TOKEN_EXPIRATION_KEY, Some("soon"))])
            .unwrap();
        assert!(!SessionStore::new(storage).is_authenticated());
    }

    #[test]
    fn offset_less_stored_expiry_reads_as_utc() {
        let storage = MemoryStorage::new();
        storage
            .apply(&[
                (ACCESS_TOKEN_KEY, Some("t")),
                (USER_CPF_KEY, Some("52998224725")),
                (TOKEN_EXPIRATION_KEY, Some("2030-01-01T12:00:00")),
            ])
            .unwrap();
        let store = SessionStore::new(storage);

        let expires_at = datetime!(2030-01-01 12:00 UTC);
        assert_eq!(store.expires_at().unwrap(), Some(expires_at));
        assert_eq!(store.session().unwrap().unwrap().expires_at, expires_at);
        assert!(store.is_authenticated_at(expires_at - Duration::SECOND));
    }

    /// Serves batches only, so any per-key read of the session shows up.
    struct BatchOnly(MemoryStorage);

    impl CredentialStorage for BatchOnly {
        fn get(&self, key: &str) -> Result<Option<String>, Error> {
            Err(Error::Storage(format!("single read of {key}")))
        }

        fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, Error> {
            self.0.get_many(keys)
        }

        fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
            self.0.apply(changes)
        }
    }

    #[test]
    fn session_is_read_in_one_batch() {
        let store = SessionStore::new(BatchOnly(MemoryStorage::new()));
        let expires_at = datetime!(2030-01-01 12:00 UTC);
        store.save(&session(expires_at)).unwrap();

        assert_eq!(store.session().unwrap(), Some(session(expires_at)));
        assert!(store.is_authenticated_at(expires_at - Duration::SECOND));
        assert!(store.access_token().is_err());
    }

    #[test]
    fn update_token_keeps_subject() {
        let store = SessionStore::in_memory();
        store.save(&session(datetime!(2030-01-01 12:00 UTC))).unwrap();

        let later = datetime!(2030-01-01 13:00 UTC);
        store.update_token(&AccessToken::new("token-1"), later).unwrap();

        let read = store.session().unwrap().unwrap();
        assert_eq!(read.access_token.as_str(), "token-1");
        assert_eq!(read.expires_at, later);
        assert_eq!(read.subject_id, "52998224725");
    }

    #[test]
    fn clear_keeps_remembered_user() {
        let store = SessionStore::in_memory();
        store.save(&session(datetime!(2030-01-01 12:00 UTC))).unwrap();
        store.remember_user("52998224725", true).unwrap();

        store.clear().unwrap();
        assert_eq!(store.session().unwrap(), None);
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.remembered_user().unwrap().as_deref(), Some("52998224725"));

        store.remember_user("52998224725", false).unwrap();
        assert_eq!(store.remembered_user().unwrap(), None);
    }

    #[test]
    fn parses_backend_expirations() {
        assert_eq!(
            parse_expiration("2030-01-01T12:00:00Z").unwrap(),
            datetime!(2030-01-01 12:00 UTC)
        );
        assert_eq!(
            parse_expiration("2030-01-01T09:00:00-03:00").unwrap(),
            datetime!(2030-01-01 12:00 UTC)
        );
        assert_eq!(
            parse_expiration("2030-01-01T12:00:00.1234567").unwrap(),
            datetime!(2030-01-01 12:00:00.1234567 UTC)
        );
        assert!(parse_expiration("tomorrow").is_err());
    }
}
