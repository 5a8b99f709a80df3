use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::cpf;
use crate::error::Error;

/// Validated CPF, held as its 11 digits.
///
/// Guaranteed valid by construction: separators are stripped and the check
/// digits verified on parse. Use `"529.982.247-25".parse::<Cpf>()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cpf(String);

impl Cpf {
    /// Digits only, as the backend expects them.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `NNN.NNN.NNN-NN` display form.
    #[must_use]
    pub fn formatted(&self) -> String {
        cpf::format_cpf(&self.0)
    }
}

impl std::fmt::Display for Cpf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Cpf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for Cpf {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if cpf::validate_cpf(&s, true) {
            Ok(Self(cpf::strip_non_digits(&s)))
        } else {
            Err(Error::InvalidCpf(s))
        }
    }
}

impl From<Cpf> for String {
    fn from(c: Cpf) -> Self {
        c.0
    }
}

/// Opaque bearer token issued by `/Auth`.
///
/// `Debug` is redacted so the token never ends up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Gender as encoded by the backend (`0|1|2`).
///
/// Unknown numeric values read as [`Gender::Other`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Gender {
    #[default]
    Other,
    Female,
    Male,
}

impl Gender {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Other => "Other",
            Self::Female => "Female",
            Self::Male => "Male",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<u8> for Gender {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Female,
            2 => Self::Male,
            _ => Self::Other,
        }
    }
}

impl From<Gender> for u8 {
    fn from(g: Gender) -> Self {
        match g {
            Gender::Other => 0,
            Gender::Female => 1,
            Gender::Male => 2,
        }
    }
}

/// A person record as exchanged with `/People`.
///
/// `password` is write-only: it is sent on create/update when set and never
/// read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Person {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default, with = "date_of_birth")]
    pub date_of_birth: Option<Date>,
    #[serde(default)]
    pub naturality: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub cpf: String,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Person {
    /// Create a person with the required fields; the rest default to empty.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, cpf: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            gender: Gender::Other,
            date_of_birth: None,
            naturality: None,
            nationality: None,
            cpf: cpf.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = gender;
        self
    }

    #[must_use]
    pub fn with_date_of_birth(mut self, date: Date) -> Self {
        self.date_of_birth = Some(date);
        self
    }

    #[must_use]
    pub fn with_naturality(mut self, naturality: impl Into<String>) -> Self {
        self.naturality = Some(naturality.into());
        self
    }

    #[must_use]
    pub fn with_nationality(mut self, nationality: impl Into<String>) -> Self {
        self.nationality = Some(nationality.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// `dd/mm/yyyy`, the console's display form.
    #[must_use]
    pub fn date_of_birth_display(&self) -> Option<String> {
        self.date_of_birth.map(|d| {
            format!("{:02}/{:02}/{:04}", d.day(), u8::from(d.month()), d.year())
        })
    }

    /// Copy of this record ready to send: CPF reduced to digits.
    pub(crate) fn to_payload(&self) -> Self {
        let mut payload = self.clone();
        payload.cpf = cpf::strip_non_digits(&self.cpf);
        payload
    }
}

/// `YYYY-MM-DD` on the wire. Reads also accept a full timestamp and keep
/// the date part, since the backend may echo `DateTime` values.
mod date_of_birth {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;
    use time::macros::format_description;

    pub(super) fn serialize<S: Serializer>(value: &Option<Date>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => {
                let text = date
                    .format(format_description!("[year]-[month]-[day]"))
                    .map_err(serde::ser::Error::custom)?;
                s.serialize_some(&text)
            }
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Date>, D::Error> {
        let Some(text) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let day = text.split('T').next().unwrap_or_default().trim();
        if day.is_empty() {
            return Ok(None);
        }
        Date::parse(day, format_description!("[year]-[month]-[day]"))
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Filters for `GET /People`. Empty fields are left out of the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonQuery {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub naturality: Option<String>,
    pub nationality: Option<String>,
}

impl PersonQuery {
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Query pairs with capitalized keys (`name` becomes `Name`).
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("cpf", &self.cpf),
            ("naturality", &self.naturality),
            ("nationality", &self.nationality),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value.as_deref()?.trim();
            (!value.is_empty()).then(|| (capitalize(key), value.to_owned()))
        })
        .collect()
    }

    #[must_use]
    pub fn is_filtered(&self) -> bool {
        !self.to_pairs().is_empty()
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `POST /Auth` request body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub(crate) cpf: &'a str,
    pub(crate) password: &'a str,
}

/// `POST /Auth/refresh` request body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub(crate) token: &'a str,
}

/// Successful `POST /Auth` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct LoginResponse {
    pub access_token: AccessToken,
    pub cpf: String,
    /// ISO-8601 timestamp, see [`parse_expiration`](crate::session::parse_expiration).
    pub expiration: String,
}

impl LoginResponse {
    #[must_use]
    pub fn new(access_token: AccessToken, cpf: impl Into<String>, expiration: impl Into<String>) -> Self {
        Self {
            access_token,
            cpf: cpf.into(),
            expiration: expiration.into(),
        }
    }
}

/// Successful `POST /Auth/refresh` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RefreshResponse {
    pub access_token: AccessToken,
    pub expiration: String,
}

impl RefreshResponse {
    #[must_use]
    pub fn new(access_token: AccessToken, expiration: impl Into<String>) -> Self {
        Self {
            access_token,
            expiration: expiration.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn valid_cpf() {
        assert!("52998224725".parse::<Cpf>().is_ok());
        assert_eq!(
            "529.982.247-25".parse::<Cpf>().unwrap().as_str(),
            "52998224725"
        );
    }

    #[test]
    fn invalid_cpf() {
        assert!("52998224724".parse::<Cpf>().is_err());
        assert!("11111111111".parse::<Cpf>().is_err());
        assert!("".parse::<Cpf>().is_err());
    }

    #[test]
    fn cpf_formatted() {
        let cpf: Cpf = "52998224725".parse().unwrap();
        assert_eq!(cpf.formatted(), "529.982.247-25");
        assert_eq!(cpf.to_string(), "52998224725");
    }

    #[test]
    fn cpf_serde_rejects_invalid() {
        let cpf: Cpf = serde_json::from_str("\"529.982.247-25\"").unwrap();
        assert_eq!(serde_json::to_string(&cpf).unwrap(), "\"52998224725\"");
        assert!(serde_json::from_str::<Cpf>("\"12345678900\"").is_err());
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("secret-token");
        assert_eq!(format!("{token:?}"), "AccessToken(..)");
    }

    #[test]
    fn gender_wire_values() {
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "1");
        assert_eq!(serde_json::from_str::<Gender>("2").unwrap(), Gender::Male);
        assert_eq!(serde_json::from_str::<Gender>("7").unwrap(), Gender::Other);
        assert_eq!(Gender::Male.to_string(), "Male");
    }

    #[test]
    fn person_reads_backend_record() {
        let json = r#"{
            "name": "Ana Souza",
            "email": "ana@example.com",
            "gender": 1,
            "dateOfBirth": "1990-05-01T00:00:00",
            "naturality": null,
            "nationality": "Brasileira",
            "cpf": "52998224725",
            "password": "hash-should-be-ignored"
        }"#;
        let person: Person = serde_json::from_str(json).unwrap();
        assert_eq!(person.gender, Gender::Female);
        assert_eq!(person.date_of_birth, Some(date!(1990 - 05 - 01)));
        assert_eq!(person.password, None);
        assert_eq!(person.date_of_birth_display().as_deref(), Some("01/05/1990"));
    }

    #[test]
    fn person_payload_strips_cpf_and_keeps_password() {
        let person = Person::new("Ana", "ana@example.com", "529.982.247-25")
            .with_date_of_birth(date!(1990 - 05 - 01))
            .with_password("secret1");
        let json = serde_json::to_value(person.to_payload()).unwrap();
        assert_eq!(json["cpf"], "52998224725");
        assert_eq!(json["dateOfBirth"], "1990-05-01");
        assert_eq!(json["password"], "secret1");
        assert_eq!(json["gender"], 0);
    }

    #[test]
    fn person_without_password_omits_it() {
        let json = serde_json::to_value(Person::new("Ana", "a@b.co", "1")).unwrap();
        assert!(json.get("password").is_none());
        assert!(json["dateOfBirth"].is_null());
    }

    #[test]
    fn query_pairs_are_capitalized_and_skip_empty() {
        let query = PersonQuery {
            name: Some("Ana".into()),
            cpf: Some("  ".into()),
            nationality: Some("Brasileira".into()),
            ..PersonQuery::default()
        };
        assert_eq!(
            query.to_pairs(),
            vec![
                ("Name".to_string(), "Ana".to_string()),
                ("Nationality".to_string(), "Brasileira".to_string()),
            ]
        );
        assert!(!PersonQuery::default().is_filtered());
    }
}
