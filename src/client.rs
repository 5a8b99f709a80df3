//! REST client for the `/Auth` and `/People` endpoints.

use std::future::Future;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::cpf::strip_non_digits;
use crate::error::Error;
use crate::lifecycle::AuthApi;
use crate::normalize::{
    NormalizedApiError, normalize_add_error, normalize_delete_error, normalize_login_error,
    normalize_message, normalize_search_error, normalize_update_error,
};
use crate::types::{
    AccessToken, Cpf, LoginRequest, LoginResponse, Person, PersonQuery, RefreshRequest,
    RefreshResponse,
};
use crate::validation::{CPF_REQUIRED, EMAIL_REQUIRED, NAME_REQUIRED, ValidationErrorSet};

type Normalizer = fn(&str) -> NormalizedApiError;

/// HTTP client for the people backend.
///
/// Every failure comes back normalized: transport problems as
/// [`Error::Connectivity`], a 401 on a bearer call as [`Error::Unauthorized`],
/// anything else the backend refuses as [`Error::Api`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend cannot be initialized.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `POST /Auth`.
    ///
    /// A rejected login is never [`Error::Unauthorized`]: it carries the
    /// backend's field errors or message, or "Invalid CPF or password".
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] on rejection, [`Error::Connectivity`] if the
    /// backend is unreachable.
    pub async fn login(&self, cpf: &Cpf, password: &str) -> Result<LoginResponse, Error> {
        let body = LoginRequest {
            cpf: cpf.as_str(),
            password,
        };
        let request = self.http.post(self.endpoint(&["Auth"])?).json(&body);

        let response = self.send(request, "login").await?;
        let response = Self::ensure_accepted(response, "login", normalize_login_error).await?;
        Self::read_json(response, "login")
            .await?
            .ok_or_else(|| Error::Api(NormalizedApiError::from_global("Empty login response")))
    }

    /// `POST /Auth/refresh` with the current token as bearer and in the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for any non-2xx answer, [`Error::Connectivity`]
    /// if the backend is unreachable.
    pub async fn refresh_token(&self, token: &AccessToken) -> Result<RefreshResponse, Error> {
        let body = RefreshRequest {
            token: token.as_str(),
        };
        let request = self
            .http
            .post(self.endpoint(&["Auth", "refresh"])?)
            .bearer_auth(token.as_str())
            .json(&body);

        let response = self.send(request, "token refresh").await?;
        let response = Self::ensure_accepted(response, "token refresh", normalize_message).await?;
        Self::read_json(response, "token refresh")
            .await?
            .ok_or_else(|| Error::Api(NormalizedApiError::from_global("Empty refresh response")))
    }

    /// Sign-up: `POST /People` without a token.
    ///
    /// # Errors
    ///
    /// Same as [`add_person()`](Self::add_person).
    pub async fn register(&self, person: &Person) -> Result<Option<Person>, Error> {
        require_name_and_email(person)?;
        let request = self.http.post(self.endpoint(&["People"])?).json(&person.to_payload());

        let response = self.send(request, "registration").await?;
        let response = Self::ensure_accepted(response, "registration", normalize_add_error).await?;
        Self::read_json(response, "registration").await
    }

    /// `GET /People` with the non-empty filters as capitalized query keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] on 401, [`Error::Api`] on other
    /// rejections, [`Error::Connectivity`] if the backend is unreachable.
    pub async fn search_people(
        &self,
        token: &AccessToken,
        query: &PersonQuery,
    ) -> Result<Vec<Person>, Error> {
        let request = self
            .http
            .get(self.endpoint(&["People"])?)
            .bearer_auth(token.as_str())
            .query(&query.to_pairs());

        let response = self.send(request, "search people").await?;
        let response = Self::ensure_success(response, "search people", normalize_search_error).await?;
        Ok(Self::read_json(response, "search people").await?.unwrap_or_default())
    }

    /// `POST /People`. Returns the created record when the backend echoes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] without sending when name or email is
    /// blank, otherwise as [`search_people()`](Self::search_people).
    pub async fn add_person(
        &self,
        token: &AccessToken,
        person: &Person,
    ) -> Result<Option<Person>, Error> {
        require_name_and_email(person)?;
        let request = self
            .http
            .post(self.endpoint(&["People"])?)
            .bearer_auth(token.as_str())
            .json(&person.to_payload());

        let response = self.send(request, "add person").await?;
        let response = Self::ensure_success(response, "add person", normalize_add_error).await?;
        Self::read_json(response, "add person").await
    }

    /// `PUT /People/{cpf}`, where `cpf` identifies the record before the edit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] "CPF is required" for a blank `cpf` and
    /// [`Error::Validation`] for a blank name or email, both without
    /// sending; otherwise as [`search_people()`](Self::search_people).
    pub async fn update_person(
        &self,
        token: &AccessToken,
        cpf: &str,
        person: &Person,
    ) -> Result<Option<Person>, Error> {
        let cpf = require_path_cpf(cpf)?;
        require_name_and_email(person)?;
        let request = self
            .http
            .put(self.endpoint(&["People", cpf.as_str()])?)
            .bearer_auth(token.as_str())
            .json(&person.to_payload());

        let response = self.send(request, "update person").await?;
        let response = Self::ensure_success(response, "update person", normalize_update_error).await?;
        Self::read_json(response, "update person").await
    }

    /// `DELETE /People/{cpf}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] "CPF is required" for a blank `cpf`, otherwise
    /// as [`search_people()`](Self::search_people).
    pub async fn delete_person(&self, token: &AccessToken, cpf: &str) -> Result<(), Error> {
        let cpf = require_path_cpf(cpf)?;
        let request = self
            .http
            .delete(self.endpoint(&["People", cpf.as_str()])?)
            .bearer_auth(token.as_str());

        let response = self.send(request, "delete person").await?;
        Self::ensure_success(response, "delete person", normalize_delete_error).await?;
        Ok(())
    }

    /// Base URL with `segments` appended as path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("base URL cannot have a path: {}", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends the request; transport failures become [`Error::Connectivity`].
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        request.send().await.map_err(|e| {
            if e.is_builder() {
                return Error::Http(e);
            }
            tracing::warn!(operation, error = %e, "backend unreachable");
            Error::Connectivity
        })
    }

    /// Bearer calls: 401 is the refresh marker, everything else is normalized.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
        normalize: Normalizer,
    ) -> Result<reqwest::Response, Error> {
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(operation, "backend answered 401");
            return Err(Error::Unauthorized);
        }
        Self::ensure_accepted(response, operation, normalize).await
    }

    /// Checks HTTP response status; returns the response on success or the normalized body.
    async fn ensure_accepted(
        response: reqwest::Response,
        operation: &'static str,
        normalize: Normalizer,
    ) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = Self::read_body(response, operation).await?;
        tracing::warn!(operation, status = status.as_u16(), "backend rejected request");
        Err(Error::Api(normalize(&body)))
    }

    /// A connection dropped mid-body counts as [`Error::Connectivity`], same as
    /// one that never connected.
    async fn read_body(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<String, Error> {
        response.text().await.map_err(|e| {
            tracing::warn!(operation, error = %e, "response body cut off");
            Error::Connectivity
        })
    }

    /// JSON body, or `None` when the response is not JSON or is empty.
    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<Option<T>, Error> {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));
        if !is_json {
            return Ok(None);
        }
        let text = Self::read_body(response, operation).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

impl AuthApi for ApiClient {
    fn login(
        &self,
        cpf: &Cpf,
        password: &str,
    ) -> impl Future<Output = Result<LoginResponse, Error>> + Send {
        ApiClient::login(self, cpf, password)
    }

    fn refresh(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<RefreshResponse, Error>> + Send {
        self.refresh_token(token)
    }

    async fn register(&self, person: &Person) -> Result<(), Error> {
        ApiClient::register(self, person).await.map(|_| ())
    }
}

fn require_name_and_email(person: &Person) -> Result<(), Error> {
    if person.name.trim().is_empty() {
        return Err(Error::Validation(ValidationErrorSet::single("name", NAME_REQUIRED)));
    }
    if person.email.trim().is_empty() {
        return Err(Error::Validation(ValidationErrorSet::single("email", EMAIL_REQUIRED)));
    }
    Ok(())
}

fn require_path_cpf(cpf: &str) -> Result<String, Error> {
    let digits = strip_non_digits(cpf);
    if digits.is_empty() {
        return Err(Error::Api(NormalizedApiError::from_global(CPF_REQUIRED)));
    }
    Ok(digits)
}
