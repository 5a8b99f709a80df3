//! Client-side field and form validation.
//!
//! Validation is deferred to submission: while the user is typing
//! [`validate_field`] reports nothing, inputs are only reformatted.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cpf::validate_cpf;
use crate::types::Person;

pub const NAME_REQUIRED: &str = "Name is required";
pub const NAME_INVALID: &str = "Name must contain only letters, spaces, apostrophes or hyphens";
pub const EMAIL_REQUIRED: &str = "Email is required";
pub const EMAIL_INVALID: &str = "Invalid email";
pub const CPF_REQUIRED: &str = "CPF is required";
pub const CPF_INVALID: &str = "Invalid CPF";
pub const PASSWORD_REQUIRED: &str = "Password is required";
pub const PASSWORD_TOO_SHORT: &str = "Password must be at least 6 characters";

/// Minimum password length accepted at registration.
pub const PASSWORD_MIN_LEN: usize = 6;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\s'-]+$").expect("static name pattern"));

// One `@` and a dot inside the domain.
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"));

/// Field name (lowercase) to a single message.
///
/// Inserting a message for a field that already has one replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrorSet(BTreeMap<String, String>);

impl ValidationErrorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set of one message.
    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.insert(field, message);
        set
    }

    /// Record `message` for `field`, lower-casing the key.
    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_lowercase(), message.into());
    }

    /// Drop the message for `field`, typically once the user edits it.
    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.0.remove(&field.to_lowercase())
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(&field.to_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(&field.to_lowercase())
    }

    /// Merge `other` into `self`; messages from `other` win.
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for ValidationErrorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (field, message)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
        }
        Ok(())
    }
}

impl<'a> FromIterator<(&'a str, String)> for ValidationErrorSet {
    fn from_iter<I: IntoIterator<Item = (&'a str, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (field, message) in iter {
            set.insert(field, message);
        }
        set
    }
}

impl IntoIterator for ValidationErrorSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[must_use]
pub fn validate_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

#[must_use]
pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Sign-up password rule: present and at least [`PASSWORD_MIN_LEN`] characters.
#[must_use]
pub fn validate_password(password: &str) -> Option<&'static str> {
    if password.is_empty() {
        Some(PASSWORD_REQUIRED)
    } else if password.chars().count() < PASSWORD_MIN_LEN {
        Some(PASSWORD_TOO_SHORT)
    } else {
        None
    }
}

/// Checks one field and returns its message, if any.
///
/// Returns `None` unless `is_submit` is set. Unknown field names have no
/// rules and always pass.
#[must_use]
pub fn validate_field(field: &str, value: &str, is_submit: bool) -> Option<&'static str> {
    if !is_submit {
        return None;
    }

    let blank = value.trim().is_empty();
    match field {
        "name" if blank => Some(NAME_REQUIRED),
        "name" if !validate_name(value) => Some(NAME_INVALID),
        "email" if blank => Some(EMAIL_REQUIRED),
        "email" if !validate_email(value) => Some(EMAIL_INVALID),
        "cpf" if blank => Some(CPF_REQUIRED),
        "cpf" if !validate_cpf(value, is_submit) => Some(CPF_INVALID),
        "password" => validate_password(value),
        _ => None,
    }
}

/// Result of [`validate_form`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormCheck {
    pub errors: ValidationErrorSet,
    pub is_valid: bool,
}

impl FormCheck {
    fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let errors: ValidationErrorSet = fields
            .into_iter()
            .filter_map(|(field, value)| {
                validate_field(field, value, true).map(|m| (field, m.to_owned()))
            })
            .collect();
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Runs the name, email and CPF rules with submit semantics.
#[must_use]
pub fn validate_form(person: &Person) -> FormCheck {
    FormCheck::from_fields([
        ("name", person.name.as_str()),
        ("email", person.email.as_str()),
        ("cpf", person.cpf.as_str()),
    ])
}

/// [`validate_form`] plus the password rule used at sign-up.
#[must_use]
pub fn validate_registration(person: &Person) -> FormCheck {
    FormCheck::from_fields([
        ("name", person.name.as_str()),
        ("email", person.email.as_str()),
        ("cpf", person.cpf.as_str()),
        ("password", person.password.as_deref().unwrap_or_default()),
    ])
}
