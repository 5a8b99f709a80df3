//! Normalization of backend error payloads.
//!
//! The backend answers failures with either an ASP.NET-style validation
//! object (`{"errors": {"Field": ["msg", ...]}, "title": "..."}`), a bare
//! `{"title": ...}`, or raw exception text. Everything funnels into
//! [`NormalizedApiError`] so callers only match one shape.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::validation::ValidationErrorSet;

pub const CPF_ALREADY_REGISTERED: &str = "CPF already registered";
pub const CPF_TAKEN_BY_ANOTHER_USER: &str =
    "CPF already registered. A CPF that belongs to another user cannot be used.";
pub const CPF_REJECTED: &str = "The CPF provided is invalid. Please check the number.";
pub const NAME_LETTERS_ONLY: &str = "Name must contain only letters, spaces, apostrophes or hyphens";
pub const EMAIL_REJECTED: &str =
    "Problem with the email provided. Check that it is correct and not already in use.";
pub const DATE_OF_BIRTH_REJECTED: &str = "Invalid date of birth or wrong format.";
pub const CONNECTIVITY_MESSAGE: &str =
    "Unable to reach the server. Check your internet connection or try again later.";
pub const INVALID_CREDENTIALS: &str = "Invalid CPF or password";
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";
pub const PERSON_NOT_FOUND: &str = "Person not found or already deleted.";
pub const DELETE_FAILED: &str = "Could not delete the person. Try again later.";

/// Phrases that, next to a mention of "cpf", mean the CPF is taken.
const DUPLICATION_PHRASES: [&str; 6] = [
    "já cadastrado",
    "já existe",
    "pertence a outro",
    "duplicate",
    "já registrado",
    "already exists",
];

const FLUENT_VALIDATION_MARKER: &str = "FluentValidation.ValidationException";

/// Labels of a FluentValidation dump and the form field they map to.
const FLUENT_FIELDS: [(&str, &str); 4] = [
    ("Name", "name"),
    ("CPF", "cpf"),
    ("Email", "email"),
    ("DateOfBirth", "dateofbirth"),
];

/// A failed API call: field messages, a global message, or both.
///
/// Never empty: every constructor guarantees at least one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedApiError {
    field_errors: ValidationErrorSet,
    global: Option<String>,
}

impl NormalizedApiError {
    /// Error not attributable to a single field. A blank message becomes
    /// [`UNEXPECTED_ERROR`].
    #[must_use]
    pub fn from_global(message: impl Into<String>) -> Self {
        let message = message.into();
        let global = if message.trim().is_empty() {
            UNEXPECTED_ERROR.to_owned()
        } else {
            message
        };
        Self {
            field_errors: ValidationErrorSet::new(),
            global: Some(global),
        }
    }

    #[must_use]
    pub fn from_field(field: &str, message: impl Into<String>) -> Self {
        Self {
            field_errors: ValidationErrorSet::single(field, message),
            global: None,
        }
    }

    /// Field errors with an optional global message; an empty set with no
    /// global falls back to [`UNEXPECTED_ERROR`].
    #[must_use]
    pub fn from_fields(field_errors: ValidationErrorSet, global: Option<String>) -> Self {
        if field_errors.is_empty() && global.is_none() {
            return Self::from_global(UNEXPECTED_ERROR);
        }
        Self {
            field_errors,
            global,
        }
    }

    #[must_use]
    pub fn field_errors(&self) -> &ValidationErrorSet {
        &self.field_errors
    }

    #[must_use]
    pub fn global(&self) -> Option<&str> {
        self.global.as_deref()
    }

    #[must_use]
    pub fn has_field_errors(&self) -> bool {
        !self.field_errors.is_empty()
    }

    /// The one message worth a toast: cpf, then email, then name, then any
    /// other field, then the global message.
    #[must_use]
    pub fn priority_message(&self) -> &str {
        ["cpf", "email", "name"]
            .into_iter()
            .find_map(|field| self.field_errors.get(field))
            .or_else(|| self.field_errors.iter().next().map(|(_, m)| m))
            .or(self.global.as_deref())
            .unwrap_or(UNEXPECTED_ERROR)
    }

    #[must_use]
    pub fn into_parts(self) -> (ValidationErrorSet, Option<String>) {
        (self.field_errors, self.global)
    }
}

impl std::fmt::Display for NormalizedApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.priority_message())
    }
}

/// Whether `text` says the CPF is already taken. Purely substring based.
#[must_use]
pub fn mentions_duplicate_cpf(text: &str) -> bool {
    text.to_lowercase().contains("cpf") && DUPLICATION_PHRASES.iter().any(|p| text.contains(p))
}

/// Generic parse of a failed response body.
///
/// 1. "cpf" plus a duplication phrase short-circuits to the cpf field.
/// 2. A JSON `errors` map yields one message per lower-cased key (the
///    first of each list) and `title` as the global message.
/// 3. A JSON object with only `title` yields that as global.
/// 4. Anything else becomes a global message carrying the raw text.
#[must_use]
pub fn parse_backend_validation_error(body: &str) -> NormalizedApiError {
    if mentions_duplicate_cpf(body) {
        return NormalizedApiError::from_field("cpf", CPF_ALREADY_REGISTERED);
    }

    let Ok(JsonValue::Object(object)) = serde_json::from_str::<JsonValue>(body) else {
        return NormalizedApiError::from_global(body);
    };

    let title = object
        .get("title")
        .and_then(JsonValue::as_str)
        .map(str::to_owned);

    if let Some(JsonValue::Object(errors)) = object.get("errors") {
        let field_errors: ValidationErrorSet = errors
            .iter()
            .filter_map(|(key, messages)| Some((key.as_str(), first_message(messages)?)))
            .collect();
        if !field_errors.is_empty() || title.is_some() {
            return NormalizedApiError::from_fields(field_errors, title);
        }
    } else if let Some(title) = title {
        return NormalizedApiError::from_global(title);
    }

    NormalizedApiError::from_global(body)
}

fn first_message(messages: &JsonValue) -> Option<String> {
    match messages {
        JsonValue::Array(items) => items.first()?.as_str().map(str::to_owned),
        JsonValue::String(message) => Some(message.clone()),
        _ => None,
    }
}

/// Per-field messages out of a FluentValidation exception dump such as
/// `"... ValidationException: Validation failed: -- Name: Nome inválido. Severity: Error"`.
#[must_use]
pub fn extract_validation_errors(text: &str) -> ValidationErrorSet {
    let mut errors = ValidationErrorSet::new();
    if !text.contains(FLUENT_VALIDATION_MARKER) {
        return errors;
    }

    for (label, field) in FLUENT_FIELDS {
        let marker = format!("{label}: ");
        let Some(start) = text.find(&marker) else {
            continue;
        };
        let rest = &text[start + marker.len()..];
        let end = [rest.find(". Severity"), rest.find('\n')]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(rest.len());
        let message = rest[..end].trim();
        if !message.is_empty() {
            errors.insert(field, message);
        }
    }
    errors
}

/// Failed `POST /Auth`.
#[must_use]
pub fn normalize_login_error(body: &str) -> NormalizedApiError {
    if body.trim().is_empty() {
        return NormalizedApiError::from_global(INVALID_CREDENTIALS);
    }
    parse_backend_validation_error(body)
}

/// Failed `POST /People`.
#[must_use]
pub fn normalize_add_error(body: &str) -> NormalizedApiError {
    let parsed = parse_backend_validation_error(body);
    if parsed.has_field_errors() {
        return parsed;
    }

    if body.contains("Nome deve conter apenas letras") {
        return NormalizedApiError::from_field("name", NAME_LETTERS_ONLY);
    }

    let lower = body.to_lowercase();
    let duplicate = body.contains("Este CPF já está cadastrado")
        || body.contains("CPF já cadastrado")
        || body.contains("CPF já existe")
        || body.contains("já existe")
        || body.contains("já registrado")
        || (body.contains("CPF") && body.contains("pertence a outro usuário"))
        || (lower.contains("cpf") && lower.contains("duplicate"));
    if duplicate {
        return NormalizedApiError::from_field("cpf", CPF_ALREADY_REGISTERED);
    }

    let extracted = extract_validation_errors(body);
    if !extracted.is_empty() {
        return NormalizedApiError::from_fields(extracted, None);
    }

    NormalizedApiError::from_global(format!("Failed to add person: {body}"))
}

/// Failed `PUT /People/{cpf}`.
#[must_use]
pub fn normalize_update_error(body: &str) -> NormalizedApiError {
    let parsed = parse_backend_validation_error(body);
    if parsed.has_field_errors() {
        return parsed;
    }

    if body.contains("CPF já cadastrado")
        || body.contains("já está cadastrado")
        || body.contains("pertence a outro usuário")
        || body.contains("já existe")
    {
        NormalizedApiError::from_field("cpf", CPF_TAKEN_BY_ANOTHER_USER)
    } else if body.contains("CPF inválido") {
        NormalizedApiError::from_field("cpf", CPF_REJECTED)
    } else if body.contains("Email") {
        NormalizedApiError::from_field("email", EMAIL_REJECTED)
    } else if body.contains("Data de nascimento") {
        NormalizedApiError::from_field("dateofbirth", DATE_OF_BIRTH_REJECTED)
    } else {
        NormalizedApiError::from_global(format!("Failed to update person: {body}"))
    }
}

/// Failed `DELETE /People/{cpf}`.
#[must_use]
pub fn normalize_delete_error(body: &str) -> NormalizedApiError {
    if body.contains("não encontrada") {
        NormalizedApiError::from_global(PERSON_NOT_FOUND)
    } else if body.contains("não foi possível excluir") {
        NormalizedApiError::from_global(DELETE_FAILED)
    } else {
        NormalizedApiError::from_global(format!("Failed to delete person: {body}"))
    }
}

/// Failed `GET /People`: validation maps are flattened into one line.
#[must_use]
pub fn normalize_search_error(body: &str) -> NormalizedApiError {
    let Ok(JsonValue::Object(object)) = serde_json::from_str::<JsonValue>(body) else {
        return NormalizedApiError::from_global(format!("Error fetching people: {body}"));
    };

    if let Some(JsonValue::Object(errors)) = object.get("errors") {
        let lines: Vec<String> = errors
            .iter()
            .map(|(key, messages)| {
                let joined = match messages {
                    JsonValue::Array(items) => items
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.as_str().unwrap_or_default().to_owned(),
                };
                format!("{key}: {joined}")
            })
            .collect();
        if !lines.is_empty() {
            return NormalizedApiError::from_global(format!(
                "Validation errors: {}",
                lines.join("; ")
            ));
        }
    }

    let detail = object
        .get("title")
        .and_then(JsonValue::as_str)
        .map_or_else(|| JsonValue::Object(object.clone()).to_string(), str::to_owned);
    NormalizedApiError::from_global(format!("Error fetching people: {detail}"))
}

/// Plain error text from anywhere else: a taken CPF still lands on the cpf
/// field, the rest is global.
#[must_use]
pub fn normalize_message(text: &str) -> NormalizedApiError {
    if mentions_duplicate_cpf(text) {
        NormalizedApiError::from_field("cpf", CPF_ALREADY_REGISTERED)
    } else {
        NormalizedApiError::from_global(text)
    }
}
