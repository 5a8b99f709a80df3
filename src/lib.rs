#![doc = include_str!("../README.md")]

#[cfg(feature = "client")]
pub mod client;
pub mod config;
pub mod cpf;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod reconnect;
pub mod request;
pub mod session;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
#[cfg(feature = "client")]
pub use client::ApiClient;
pub use config::{ClientConfig, LifecycleSettings};
pub use cpf::{format_cpf, strip_non_digits, validate_cpf};
pub use error::Error;
pub use lifecycle::{
    AuthApi, LifecycleState, Notice, Notifier, RefreshOutcome, RouteGuard, TokenLifecycle,
    refresh_delay,
};
pub use normalize::{NormalizedApiError, parse_backend_validation_error};
pub use reconnect::fetch_with_reconnect;
pub use request::CallOptions;
pub use session::{CredentialStorage, FileStorage, MemoryStorage, Session, SessionStore};
pub use types::{AccessToken, Cpf, Gender, LoginResponse, Person, PersonQuery, RefreshResponse};
pub use validation::{
    FormCheck, ValidationErrorSet, validate_field, validate_form, validate_registration,
};
