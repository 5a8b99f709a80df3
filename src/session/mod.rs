//! Persisted authentication state.
//!
//! [`SessionStore`] is the only owner of the session keys. It sits on a
//! [`CredentialStorage`] backend, which the embedding application picks:
//! [`MemoryStorage`] for tests and ephemeral runs, [`FileStorage`] to survive
//! restarts, or its own implementation.

mod storage;
mod store;

pub use storage::{CredentialStorage, FileStorage, MemoryStorage};
pub use store::{
    ACCESS_TOKEN_KEY, REMEMBERED_USER_KEY, Session, SessionStore, TOKEN_EXPIRATION_KEY,
    USER_CPF_KEY, parse_expiration,
};
